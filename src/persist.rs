use chrono::{DateTime, TimeZone};
use itertools::Itertools;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tracing::info;

use crate::config::Hyperparameters;
use crate::error::{Error, Result};
use crate::evaluator::History;
use crate::layer::{Activation, Layer};
use crate::network::Network;

// On disk a network is its architecture plus one record per layer, with the weights written as
// nested lists, one inner list per output neuron.
#[derive(Debug, Serialize, Deserialize)]
struct NetworkRecord {
    architecture: Vec<usize>,
    layers: Vec<LayerRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LayerRecord {
    activation: Activation,
    weights: Vec<Vec<f64>>,
    biases: Vec<f64>,
}

impl From<&Layer> for LayerRecord {
    fn from(layer: &Layer) -> Self {
        LayerRecord {
            activation: layer.activation(),
            weights: layer.weights().rows().into_iter().map(|row| row.to_vec()).collect(),
            biases: layer.biases().to_vec(),
        }
    }
}

impl TryFrom<LayerRecord> for Layer {
    type Error = Error;

    fn try_from(record: LayerRecord) -> Result<Layer> {
        let outputs = record.weights.len();
        let inputs = record.weights.first().map_or(0, Vec::len);
        if let Some(row) = record.weights.iter().find(|row| row.len() != inputs) {
            return Err(Error::ShapeMismatch {
                context: "stored weight row",
                expected: inputs,
                actual: row.len(),
            });
        }

        let weights = Array2::from_shape_vec((outputs, inputs), record.weights.concat())
            .map_err(|error| Error::InvalidData(error.to_string()))?;
        Layer::from_parameters(weights, Array1::from(record.biases), record.activation)
    }
}

/// Writes `network` to `path` as JSON.
pub fn save_network(network: &Network, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let record = NetworkRecord {
        architecture: network.architecture(),
        layers: network.layers().iter().map(LayerRecord::from).collect(),
    };
    write_json(&record, path)?;
    info!("Saved network to {}", path.display());
    Ok(())
}

/// Reads a network written by [`save_network`], checking that its layers fit together and
/// match the stored architecture.
pub fn load_network(path: impl AsRef<Path>) -> Result<Network> {
    let path = path.as_ref();
    let record: NetworkRecord = serde_json::from_reader(BufReader::new(File::open(path)?))?;

    let layers = record
        .layers
        .into_iter()
        .map(Layer::try_from)
        .collect::<Result<Vec<_>>>()?;
    let network = Network::from_layers(layers)?;
    if network.architecture() != record.architecture {
        return Err(Error::InvalidData(format!(
            "stored architecture {:?} doesn't match layers of shape {:?}",
            record.architecture,
            network.architecture()
        )));
    }

    info!("Loaded network {:?} from {}", record.architecture, path.display());
    Ok(network)
}

/// Writes the collected histories of a training run to `path` as JSON.
pub fn save_history(history: &History, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    write_json(history, path)?;
    info!("Saved training history to {}", path.display());
    Ok(())
}

fn write_json<T: Serialize + ?Sized>(value: &T, path: &Path) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}

/// Builds the file name stem shared by everything a training run writes out. It records when the
/// run finished, the architecture, the validation and test error percentages, and the
/// hyperparameters, e.g.
/// `20160314-092653_[784,400,400,10]_valerr2.5_evaerr3_lr0.1_mom0.6_dec0.01_decthr2_stopthr10_mb10`.
pub fn artifact_stem<Tz>(
    timestamp: &DateTime<Tz>,
    architecture: &[usize],
    validation_error: f64,
    test_error: f64,
    hyperparameters: &Hyperparameters,
) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    format!(
        "{}_[{}]_valerr{}_evaerr{}_lr{}_mom{}_dec{}_decthr{}_stopthr{}_mb{}",
        timestamp.format("%Y%m%d-%H%M%S"),
        architecture.iter().join(","),
        validation_error,
        test_error,
        hyperparameters.learning_rate,
        hyperparameters.momentum,
        hyperparameters.decay,
        hyperparameters.decay_threshold,
        hyperparameters.stop_threshold,
        hyperparameters.minibatch_size,
    )
}
