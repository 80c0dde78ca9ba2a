use ndarray::{Array2, ArrayView2};
use ndarray_rand::rand::Rng;
use tracing::info;

use crate::error::{Error, Result};
use crate::layer::{Activation, Layer};

/// An ordered stack of fully-connected layers: sigmoid hidden layers followed by a single softmax
/// classification head.
///
/// Only the parameter values ever change after construction. Cloning produces a fully independent
/// copy, which is how the best network seen during training is snapshotted.
#[derive(Debug, Clone, PartialEq)]
pub struct Network {
    layers: Vec<Layer>,
}

impl Network {
    // Builds a network from an architecture such as `[784, 30, 10]`, starting with the input
    // width and finishing with the number of output classes. Every weight and bias starts
    // uniformly distributed in `(-initial_weight_magnitude, initial_weight_magnitude)`.
    pub fn new<R: Rng + ?Sized>(
        architecture: &[usize],
        initial_weight_magnitude: f64,
        rng: &mut R,
    ) -> Result<Network> {
        if architecture.len() < 2 {
            return Err(Error::ShapeMismatch {
                context: "architecture length",
                expected: 2,
                actual: architecture.len(),
            });
        }
        if let Some(position) = architecture.iter().position(|&size| size == 0) {
            return Err(Error::InvalidConfig(format!(
                "layer {position} of the architecture has no neurons"
            )));
        }
        if !(initial_weight_magnitude > 0.0 && initial_weight_magnitude.is_finite()) {
            return Err(Error::InvalidConfig(format!(
                "initial weight magnitude must be positive, got {initial_weight_magnitude}"
            )));
        }

        let last = architecture.len() - 2;
        let layers = architecture
            // Pair each size with the following one, i.e. (inputs, outputs) for every layer...
            .windows(2)
            .enumerate()
            // With every layer but the last using sigmoid, and the last one softmax.
            .map(|(index, sizes)| {
                let activation = if index == last {
                    Activation::Softmax
                } else {
                    Activation::Sigmoid
                };
                Layer::new(
                    sizes[1],
                    sizes[0],
                    activation,
                    initial_weight_magnitude,
                    rng,
                )
            })
            .collect::<Vec<_>>();

        for (index, layer) in layers.iter().enumerate() {
            info!(
                "Created weight matrix in layer {index}: {:?}",
                layer.weights().dim()
            );
            info!(
                "Created biases vector in layer {index}: {:?}",
                layer.biases().dim()
            );
        }

        Ok(Network { layers })
    }

    // Assembles a network from already-built layers, checking that adjacent widths agree and that
    // only the last layer is a softmax head.
    pub fn from_layers(layers: Vec<Layer>) -> Result<Network> {
        let Some(head) = layers.last() else {
            return Err(Error::ShapeMismatch {
                context: "layer count",
                expected: 1,
                actual: 0,
            });
        };
        if head.activation() != Activation::Softmax {
            return Err(Error::InvalidData(
                "the last layer must use softmax".to_string(),
            ));
        }
        if layers[..layers.len() - 1]
            .iter()
            .any(|layer| layer.activation() != Activation::Sigmoid)
        {
            return Err(Error::InvalidData(
                "every hidden layer must use sigmoid".to_string(),
            ));
        }
        for pair in layers.windows(2) {
            if pair[0].outputs() != pair[1].inputs() {
                return Err(Error::ShapeMismatch {
                    context: "adjacent layer widths",
                    expected: pair[0].outputs(),
                    actual: pair[1].inputs(),
                });
            }
        }
        Ok(Network { layers })
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub(crate) fn layers_mut(&mut self) -> &mut [Layer] {
        &mut self.layers
    }

    // The layer sizes this network was built from, input width first.
    pub fn architecture(&self) -> Vec<usize> {
        std::iter::once(self.layers[0].inputs())
            .chain(self.layers.iter().map(Layer::outputs))
            .collect()
    }

    pub fn input_width(&self) -> usize {
        self.layers[0].inputs()
    }

    pub fn output_width(&self) -> usize {
        self.layers[self.layers.len() - 1].outputs()
    }

    // Runs a `[batch x inputs]` matrix through every layer and returns the output activations.
    pub fn feed_forward(&self, input: &ArrayView2<f64>) -> Result<Array2<f64>> {
        self.check_input_width(input)?;

        // Only the previous activation is ever needed, so keep overwriting it.
        let mut activation = self.layers[0].feed_forward(input);
        for layer in &self.layers[1..] {
            activation = layer.feed_forward(&activation.view());
        }
        Ok(activation)
    }

    // Like feed_forward, but keeps every activation for backpropagation. The
    // returned vector holds `layers + 1` matrices: the input itself followed by each layer's
    // output.
    pub fn feed_forward_all(&self, input: &ArrayView2<f64>) -> Result<Vec<Array2<f64>>> {
        self.check_input_width(input)?;

        let mut activations = Vec::with_capacity(self.layers.len() + 1);
        activations.push(input.to_owned());
        for layer in &self.layers {
            let next = layer.feed_forward(&activations[activations.len() - 1].view());
            activations.push(next);
        }
        Ok(activations)
    }

    // Backpropagates the output-layer error through every layer, returning one delta per layer
    // in layer order (first hidden layer first).
    pub fn feed_backward(
        &self,
        output_error: Array2<f64>,
        activations: &[Array2<f64>],
    ) -> Result<Vec<Array2<f64>>> {
        if activations.len() != self.layers.len() + 1 {
            return Err(Error::ShapeMismatch {
                context: "activation count",
                expected: self.layers.len() + 1,
                actual: activations.len(),
            });
        }

        let mut deltas = Vec::with_capacity(self.layers.len());
        let mut error = output_error;
        // Layer L produced activations[L + 1], so walk both backwards together.
        for (layer, activation) in self.layers.iter().zip(&activations[1..]).rev() {
            let (delta, propagated) = layer.feed_backward(error, activation);
            deltas.push(delta);
            error = propagated;
        }
        deltas.reverse();
        Ok(deltas)
    }

    fn check_input_width(&self, input: &ArrayView2<f64>) -> Result<()> {
        if input.ncols() != self.input_width() {
            return Err(Error::ShapeMismatch {
                context: "input batch width",
                expected: self.input_width(),
                actual: input.ncols(),
            });
        }
        Ok(())
    }
}
