use flate2::read::GzDecoder;
use itertools::Itertools;
use ndarray::{Array1, Array2, s};
use std::{fs::File, io::Read, path::Path};
use tracing::{debug, info};

use crate::dataset::{Dataset, Labels, vectorize_digits};
use crate::error::{Error, Result};

pub const CLASSES: usize = 10;
pub const TRAINING_SIZE: usize = 50_000;

const IMAGE_MAGIC: u32 = 2051;
const LABEL_MAGIC: u32 = 2049;

/// The MNIST digits, split three ways. Training labels are one-hot rows, validation and test
/// labels plain digits. Every image is a row of 784 pixel intensities in `[0, 1]`.
pub struct MnistData {
    pub training: Dataset,
    pub validation: Dataset,
    pub test: Dataset,
}

impl MnistData {
    /// Reads the four gzipped IDX files from `dir`. The first 50000 training images are used
    /// for training and the remaining 10000 for validation.
    pub fn load(dir: impl AsRef<Path>) -> Result<MnistData> {
        MnistData::load_with_split(dir, TRAINING_SIZE)
    }

    /// Like [`MnistData::load`], with the first `training_size` training images kept for
    /// training and the rest used for validation.
    pub fn load_with_split(dir: impl AsRef<Path>, training_size: usize) -> Result<MnistData> {
        let dir = dir.as_ref();

        let (features, digits) = read_pair(
            &dir.join("train-images-idx3-ubyte.gz"),
            &dir.join("train-labels-idx1-ubyte.gz"),
        )?;
        if training_size > digits.len() {
            return Err(Error::InvalidConfig(format!(
                "cannot keep {training_size} training images out of {}",
                digits.len()
            )));
        }

        // Split before converting, so only the training part turns into one-hot rows.
        let training_features = features.slice(s![..training_size, ..]).to_owned();
        let training_digits = digits.slice(s![..training_size]);
        let training = Dataset::new(
            training_features,
            Labels::OneHot(vectorize_digits(&training_digits, CLASSES)?),
        )?;
        let validation = Dataset::new(
            features.slice(s![training_size.., ..]).to_owned(),
            Labels::Digits(digits.slice(s![training_size..]).to_owned()),
        )?;

        let (features, digits) = read_pair(
            &dir.join("t10k-images-idx3-ubyte.gz"),
            &dir.join("t10k-labels-idx1-ubyte.gz"),
        )?;
        let test = Dataset::new(features, Labels::Digits(digits))?;

        info!(
            "Loaded MNIST: {} training, {} validation, {} test images",
            training.len(),
            validation.len(),
            test.len()
        );
        Ok(MnistData {
            training,
            validation,
            test,
        })
    }
}

fn read_pair(images: &Path, labels: &Path) -> Result<(Array2<f64>, Array1<usize>)> {
    let features = parse_images(&read_bytes(images)?)?;
    let digits = parse_labels(&read_bytes(labels)?)?;

    // There should be an equal number of images and labels. If not, the files don't belong
    // together.
    if features.nrows() != digits.len() {
        return Err(Error::ShapeMismatch {
            context: "MNIST label count",
            expected: features.nrows(),
            actual: digits.len(),
        });
    }
    Ok((features, digits))
}

// Reads a whole gzip-compressed file into memory.
fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    debug!("Reading {}", path.display());
    let file = File::open(path)?;
    let mut unzipped_file = GzDecoder::new(file);
    let mut bytes = Vec::new();
    unzipped_file.read_to_end(&mut bytes)?;
    Ok(bytes)
}

// Reads `count` big-endian 32-bit header fields from the start of an IDX file.
fn header(bytes: &[u8], count: usize) -> Result<Vec<u32>> {
    if bytes.len() < count * 4 {
        return Err(Error::InvalidData(format!(
            "IDX file of {} bytes is too short for its header",
            bytes.len()
        )));
    }
    Ok(bytes[..count * 4]
        .chunks_exact(4)
        .map(|chunk| u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

// The image file's header is four 32-bit integers: the magic number (2051), the number of
// images, and the number of rows and columns per image. Every pixel after that is one byte.
fn parse_images(bytes: &[u8]) -> Result<Array2<f64>> {
    let Some((magic, images, rows, columns)) = header(bytes, 4)?.into_iter().collect_tuple()
    else {
        return Err(Error::InvalidData("malformed IDX image header".to_string()));
    };
    if magic != IMAGE_MAGIC {
        return Err(Error::InvalidData(format!(
            "expected image magic number {IMAGE_MAGIC}, found {magic}"
        )));
    }

    // The sizes come straight from the file, so a corrupt header mustn't be able to overflow them.
    let pixels = (rows as usize).checked_mul(columns as usize);
    let Some((images, pixels, expected)) = pixels.and_then(|pixels| {
        let images = images as usize;
        images.checked_mul(pixels).map(|expected| (images, pixels, expected))
    }) else {
        return Err(Error::InvalidData(format!(
            "IDX image header describes {images} images of {rows}x{columns} pixels, which is too large"
        )));
    };
    let body = &bytes[16..];
    if body.len() != expected {
        return Err(Error::InvalidData(format!(
            "expected {images} images of {pixels} pixels, found {} bytes",
            body.len()
        )));
    }

    let intensities = body.iter().map(|&value| value as f64 / 255.0).collect();
    Array2::from_shape_vec((images, pixels), intensities)
        .map_err(|error| Error::InvalidData(error.to_string()))
}

// The label file's header is the magic number (2049) and the number of labels, followed by one
// byte per label.
fn parse_labels(bytes: &[u8]) -> Result<Array1<usize>> {
    let Some((magic, labels)) = header(bytes, 2)?.into_iter().collect_tuple() else {
        return Err(Error::InvalidData("malformed IDX label header".to_string()));
    };
    if magic != LABEL_MAGIC {
        return Err(Error::InvalidData(format!(
            "expected label magic number {LABEL_MAGIC}, found {magic}"
        )));
    }

    let body = &bytes[8..];
    if body.len() != labels as usize {
        return Err(Error::InvalidData(format!(
            "expected {labels} labels, found {} bytes",
            body.len()
        )));
    }
    if let Some(digit) = body.iter().find(|&&digit| digit as usize >= CLASSES) {
        return Err(Error::InvalidData(format!("label {digit} is not a digit")));
    }
    Ok(body.iter().map(|&digit| digit as usize).collect())
}
