use ndarray::{Array, Array1, Array2, ArrayView2};
use ndarray_rand::{RandomExt, rand::Rng, rand_distr::Uniform};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Activation function applied to a layer's weighted input.
///
/// `Softmax` is only ever used for the terminal layer, and its backward step assumes the error it
/// receives was produced by the cross-entropy cost. The softmax Jacobian cancels against the
/// cross-entropy gradient, leaving `prediction - target` as the delta, so the layer passes the
/// incoming error straight through. Pairing `Softmax` with any other cost gives wrong gradients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Sigmoid,
    Softmax,
}

impl Activation {
    // Applies the activation to a batch of weighted inputs in-place. Sigmoid works on each element
    // independently, softmax normalizes each row (i.e. each example) separately.
    fn apply(self, mut z: Array2<f64>) -> Array2<f64> {
        match self {
            Activation::Sigmoid => z.mapv_inplace(sigmoid),
            Activation::Softmax => {
                for mut row in z.rows_mut() {
                    // Shift by the row maximum before exponentiating so large inputs can't
                    // overflow. The result is mathematically unchanged.
                    let max = row.fold(f64::NEG_INFINITY, |max, &value| max.max(value));
                    row.mapv_inplace(|value| (value - max).exp());
                    let sum = row.sum();
                    row /= sum;
                }
            }
        }
        z
    }
}

/// A single fully-connected layer.
///
/// Weights are stored as an `[outputs x inputs]` matrix and biases as an `[outputs]` vector. Batches
/// flow through with one example per row, so the forward pass is `g(X . W^T + b)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    weights: Array2<f64>,
    biases: Array1<f64>,
    activation: Activation,
}

impl Layer {
    // Creates a layer whose weights and biases are drawn uniformly from
    // `(-initial_weight_magnitude, initial_weight_magnitude)`.
    pub fn new<R: Rng + ?Sized>(
        outputs: usize,
        inputs: usize,
        activation: Activation,
        initial_weight_magnitude: f64,
        rng: &mut R,
    ) -> Layer {
        let distribution = Uniform::new(-initial_weight_magnitude, initial_weight_magnitude);
        Layer {
            weights: Array::random_using((outputs, inputs), distribution, rng),
            biases: Array::random_using(outputs, distribution, rng),
            activation,
        }
    }

    // Builds a layer from existing parameters, e.g. ones read back from disk.
    pub fn from_parameters(
        weights: Array2<f64>,
        biases: Array1<f64>,
        activation: Activation,
    ) -> Result<Layer> {
        if weights.nrows() != biases.len() {
            return Err(Error::ShapeMismatch {
                context: "layer biases",
                expected: weights.nrows(),
                actual: biases.len(),
            });
        }
        Ok(Layer {
            weights,
            biases,
            activation,
        })
    }

    pub fn inputs(&self) -> usize {
        self.weights.ncols()
    }

    pub fn outputs(&self) -> usize {
        self.weights.nrows()
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }

    pub fn weights(&self) -> &Array2<f64> {
        &self.weights
    }

    pub fn biases(&self) -> &Array1<f64> {
        &self.biases
    }

    // The trainer is the only thing that changes parameters after construction, and it never
    // changes their shapes, only their values.
    pub(crate) fn parameters_mut(&mut self) -> (&mut Array2<f64>, &mut Array1<f64>) {
        (&mut self.weights, &mut self.biases)
    }

    // Computes `g(input . W^T + b)` for a `[batch x inputs]` input, giving a `[batch x outputs]`
    // activation matrix. The caller is responsible for the input width matching `self.inputs()`.
    pub fn feed_forward(&self, input: &ArrayView2<f64>) -> Array2<f64> {
        let z = input.dot(&self.weights.t()) + &self.biases;
        self.activation.apply(z)
    }

    // Given the error arriving from the next layer and this layer's own activation from the
    // forward pass, returns `(delta, error_for_previous_layer)`.
    //
    // For sigmoid layers the delta is `error * a * (1 - a)`. For the softmax output layer the
    // incoming error already is the delta (see Activation).
    pub fn feed_backward(
        &self,
        error: Array2<f64>,
        activation: &Array2<f64>,
    ) -> (Array2<f64>, Array2<f64>) {
        // The sigmoid's derivative can be written in terms of its own output, σ'(z) = a(1 - a),
        // so the weighted inputs from the forward pass never need to be kept around.
        let delta = match self.activation {
            Activation::Sigmoid => error * activation.mapv(|a| a * (1.0 - a)),
            Activation::Softmax => error,
        };
        // Send the delta back through the same weights it came through to get the previous layer's
        // error. The weights are [outputs x inputs], so no transpose is needed here.
        let propagated = delta.dot(&self.weights);
        (delta, propagated)
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + f64::exp(-z))
}
