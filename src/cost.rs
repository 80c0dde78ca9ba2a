use ndarray::{Array2, ArrayView2, Zip};

/// A cost function comparing a batch of predictions with its targets. Both matrices hold one
/// example per row.
pub trait CostFunction {
    /// The total (not mean) cost over the whole batch.
    fn cost(&self, predicted: &ArrayView2<f64>, target: &ArrayView2<f64>) -> f64;

    /// The error handed to the output layer to start backpropagation.
    fn delta(&self, predicted: &ArrayView2<f64>, target: &ArrayView2<f64>) -> Array2<f64>;
}

/// Binary cross-entropy summed over every output of every example.
///
/// Its `delta` is only the true gradient when the output layer is a softmax, whose derivative
/// cancels out against this cost's.
#[derive(Debug, Clone, Copy, Default)]
pub struct CrossEntropyCost;

impl CostFunction for CrossEntropyCost {
    fn cost(&self, predicted: &ArrayView2<f64>, target: &ArrayView2<f64>) -> f64 {
        Zip::from(predicted)
            .and(target)
            .fold(0.0, |total, &a, &y| {
                // A saturated prediction makes one of the logs infinite (or 0 * inf = NaN), which
                // would poison the whole sum. Such terms count as nothing instead.
                total + finite_or_zero(-y * a.ln()) + finite_or_zero(-(1.0 - y) * (1.0 - a).ln())
            })
    }

    fn delta(&self, predicted: &ArrayView2<f64>, target: &ArrayView2<f64>) -> Array2<f64> {
        predicted - target
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}
