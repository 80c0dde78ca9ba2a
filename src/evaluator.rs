use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cost::{CostFunction, CrossEntropyCost};
use crate::dataset::{Dataset, argmax_rows, error_fraction};
use crate::error::Result;
use crate::network::Network;

pub const DEFAULT_LOG_INTERVAL: usize = 1000;
pub const DEFAULT_CHUNK_SIZE: usize = 5000;

/// Which quantities [`Evaluator::monitor`] computes and logs at the end of every epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Monitor {
    pub training_cost: bool,
    pub training_accuracy: bool,
    pub validation_cost: bool,
    pub validation_accuracy: bool,
}

impl Default for Monitor {
    fn default() -> Self {
        Monitor {
            training_cost: false,
            training_accuracy: false,
            validation_cost: false,
            validation_accuracy: true,
        }
    }
}

/// Time series collected over a training run. Each one only grows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    /// `1 - accuracy / total` on the validation set, once per epoch.
    pub validation_errors: Vec<f64>,
    /// Running mean minibatch cost, once per minibatch.
    pub training_costs: Vec<f64>,
    /// Mean validation cost per example, once per epoch when monitored.
    pub validation_costs: Vec<f64>,
    /// `1 - accuracy / total` on the training set, once per epoch when monitored.
    pub training_errors: Vec<f64>,
}

/// Scores a network against the training and validation sets and keeps the run's history.
pub struct Evaluator<'a, C = CrossEntropyCost> {
    cost_function: C,
    training_data: &'a Dataset,
    validation_data: &'a Dataset,
    monitor: Monitor,
    log_interval: usize,
    chunk_size: usize,
    minibatches_count: usize,
    history: History,
}

impl<'a> Evaluator<'a, CrossEntropyCost> {
    pub fn new(training_data: &'a Dataset, validation_data: &'a Dataset) -> Self {
        Evaluator::with_cost_function(CrossEntropyCost, training_data, validation_data)
    }
}

impl<'a, C: CostFunction> Evaluator<'a, C> {
    pub fn with_cost_function(
        cost_function: C,
        training_data: &'a Dataset,
        validation_data: &'a Dataset,
    ) -> Self {
        Evaluator {
            cost_function,
            training_data,
            validation_data,
            monitor: Monitor::default(),
            log_interval: DEFAULT_LOG_INTERVAL,
            chunk_size: DEFAULT_CHUNK_SIZE,
            minibatches_count: 0,
            history: History::default(),
        }
    }

    pub fn with_monitor(mut self, monitor: Monitor) -> Self {
        self.monitor = monitor;
        self
    }

    /// Log the running training cost every `log_interval` minibatches. Zero turns it off.
    pub fn with_log_interval(mut self, log_interval: usize) -> Self {
        self.log_interval = log_interval;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn minibatches_count(&self) -> usize {
        self.minibatches_count
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn into_history(self) -> History {
        self.history
    }

    /// Computes and logs whatever the evaluator was configured to monitor. Returns the last
    /// accuracy computed (validation accuracy wins over training accuracy when both are on), or
    /// `None` if no accuracy is monitored.
    pub fn monitor(&mut self, network: &Network) -> Result<Option<usize>> {
        let mut last_accuracy = None;

        if self.monitor.training_cost {
            let cost = total_cost(
                &self.cost_function,
                self.training_data,
                network,
                self.chunk_size,
            )?;
            info!("Training cost: \t{cost}");
        }
        if self.monitor.training_accuracy {
            let correct = accuracy(self.training_data, network, self.chunk_size)?;
            let total = self.training_data.len();
            info!("Training accuracy: \t{correct} / {total}");
            self.history
                .training_errors
                .push(error_fraction(correct, total));
            last_accuracy = Some(correct);
        }
        if self.monitor.validation_cost {
            let cost = total_cost(
                &self.cost_function,
                self.validation_data,
                network,
                self.chunk_size,
            )?;
            info!("Validation cost: \t{cost}");
            self.history.validation_costs.push(cost);
        }
        if self.monitor.validation_accuracy {
            let correct = accuracy(self.validation_data, network, self.chunk_size)?;
            let total = self.validation_data.len();
            info!("Validation accuracy: \t{correct} / {total}");
            self.history
                .validation_errors
                .push(error_fraction(correct, total));
            last_accuracy = Some(correct);
        }

        self.minibatches_count = 0;
        Ok(last_accuracy)
    }

    /// Records the training cost accumulated so far this epoch, after one more minibatch.
    pub fn log_training_cost(&mut self, running_cost: f64) {
        self.minibatches_count += 1;
        let mean = running_cost / self.minibatches_count as f64;
        if self.log_interval > 0 && self.minibatches_count % self.log_interval == 0 {
            info!(
                "Cost after {} minibatches is {mean}",
                self.minibatches_count
            );
        }
        self.history.training_costs.push(mean);
    }
}

// Datasets no larger than one chunk are scored in a single pass. Larger ones must split evenly.
fn effective_chunk_size(len: usize, chunk_size: usize) -> usize {
    if len > chunk_size { chunk_size } else { len }
}

/// The mean cost per example of `network` over `dataset`, fed forward `chunk_size` rows at a time.
/// Digit labels are converted to one-hot rows before costing.
pub fn total_cost<C: CostFunction>(
    cost_function: &C,
    dataset: &Dataset,
    network: &Network,
    chunk_size: usize,
) -> Result<f64> {
    if dataset.is_empty() {
        return Ok(0.0);
    }

    let mut cost = 0.0;
    for (features, labels) in dataset.batches(effective_chunk_size(dataset.len(), chunk_size))? {
        let predicted = network.feed_forward(&features)?;
        let target = labels.to_one_hot(network.output_width())?;
        cost += cost_function.cost(&predicted.view(), &target.view());
    }
    Ok(cost / dataset.len() as f64)
}

/// The number of examples in `dataset` that `network` classifies correctly. One-hot labels are
/// decoded to digits by their arg-max first.
pub fn accuracy(dataset: &Dataset, network: &Network, chunk_size: usize) -> Result<usize> {
    if dataset.is_empty() {
        return Ok(0);
    }

    let mut correct = 0;
    for (features, labels) in dataset.batches(effective_chunk_size(dataset.len(), chunk_size))? {
        let estimates = argmax_rows(&network.feed_forward(&features)?.view());
        let digits = labels.to_digits();
        correct += estimates
            .iter()
            .zip(digits.iter())
            .filter(|(estimate, digit)| estimate == digit)
            .count();
    }
    Ok(correct)
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;
    use ndarray::{Array1, Array2, arr1, arr2};

    use crate::dataset::{Labels, vectorize_digits};
    use crate::error::Error;
    use crate::layer::{Activation, Layer};

    // A single softmax layer that maps one-hot inputs to the same class, or to the other class
    // when `inverted`.
    fn classifier(inverted: bool) -> Network {
        let scale = if inverted { -10.0 } else { 10.0 };
        let layer = Layer::from_parameters(
            arr2(&[[scale, 0.0], [0.0, scale]]),
            arr1(&[0.0, 0.0]),
            Activation::Softmax,
        )
        .unwrap();
        Network::from_layers(vec![layer]).unwrap()
    }

    // A layer with zero parameters always predicts [0.5, 0.5].
    fn undecided() -> Network {
        let layer =
            Layer::from_parameters(Array2::zeros((2, 2)), Array1::zeros(2), Activation::Softmax)
                .unwrap();
        Network::from_layers(vec![layer]).unwrap()
    }

    fn digits(len: usize) -> Array1<usize> {
        Array1::from_iter((0..len).map(|i| i % 2))
    }

    fn digit_dataset(len: usize) -> Dataset {
        let digits = digits(len);
        let features = vectorize_digits(&digits.view(), 2).unwrap();
        Dataset::new(features, Labels::Digits(digits)).unwrap()
    }

    fn one_hot_dataset(len: usize) -> Dataset {
        let one_hot = vectorize_digits(&digits(len).view(), 2).unwrap();
        Dataset::new(one_hot.clone(), Labels::OneHot(one_hot)).unwrap()
    }

    #[test]
    fn accuracy_counts_correct_predictions() {
        let data = digit_dataset(100);
        assert_eq!(accuracy(&data, &classifier(false), DEFAULT_CHUNK_SIZE).unwrap(), 100);
        assert_eq!(accuracy(&data, &classifier(true), DEFAULT_CHUNK_SIZE).unwrap(), 0);
    }

    #[test]
    fn accuracy_decodes_one_hot_labels_and_chunks() {
        let data = one_hot_dataset(100);
        assert_eq!(accuracy(&data, &classifier(false), 10).unwrap(), 100);
        assert_eq!(accuracy(&data, &classifier(true), 25).unwrap(), 0);
    }

    #[test]
    fn accuracy_rejects_uneven_chunks() {
        let data = digit_dataset(100);
        assert!(matches!(
            accuracy(&data, &classifier(false), 30),
            Err(Error::IndivisibleBatch { len: 100, size: 30 })
        ));
    }

    #[test]
    fn total_cost_is_mean_per_example() {
        // Every example costs -ln(0.5) twice.
        let expected = 1.3862943611198906;
        let network = undecided();

        let digits = digit_dataset(20);
        let cost = total_cost(&CrossEntropyCost, &digits, &network, DEFAULT_CHUNK_SIZE).unwrap();
        assert_relative_eq!(cost, expected, epsilon = 1e-12);

        let one_hot = one_hot_dataset(20);
        let cost = total_cost(&CrossEntropyCost, &one_hot, &network, 5).unwrap();
        assert_relative_eq!(cost, expected, epsilon = 1e-12);
    }

    #[test]
    fn monitor_records_everything_it_tracks() {
        let training = one_hot_dataset(40);
        let validation = digit_dataset(20);
        let mut evaluator = Evaluator::new(&training, &validation).with_monitor(Monitor {
            training_cost: true,
            training_accuracy: true,
            validation_cost: true,
            validation_accuracy: true,
        });

        evaluator.log_training_cost(1.0);
        assert_eq!(evaluator.minibatches_count(), 1);

        let accuracy = evaluator.monitor(&classifier(true)).unwrap();
        assert_eq!(accuracy, Some(0));
        assert_eq!(evaluator.minibatches_count(), 0);

        let history = evaluator.history();
        assert_eq!(history.validation_errors, vec![1.0]);
        assert_eq!(history.training_errors, vec![1.0]);
        assert_eq!(history.validation_costs.len(), 1);
    }

    #[test]
    fn monitor_without_accuracy_returns_none() {
        let training = one_hot_dataset(4);
        let validation = digit_dataset(4);
        let mut evaluator = Evaluator::new(&training, &validation).with_monitor(Monitor {
            validation_accuracy: false,
            validation_cost: true,
            ..Monitor::default()
        });

        assert_eq!(evaluator.monitor(&undecided()).unwrap(), None);
        assert!(evaluator.history().validation_errors.is_empty());
        assert_eq!(evaluator.history().validation_costs.len(), 1);
    }

    #[test]
    fn training_cost_history_is_running_mean() {
        let training = one_hot_dataset(4);
        let validation = digit_dataset(4);
        let mut evaluator = Evaluator::new(&training, &validation).with_log_interval(2);

        evaluator.log_training_cost(2.0);
        evaluator.log_training_cost(3.0);
        evaluator.log_training_cost(9.0);
        assert_eq!(evaluator.history().training_costs, vec![2.0, 1.5, 3.0]);

        evaluator.monitor(&classifier(false)).unwrap();
        evaluator.log_training_cost(4.0);
        assert_eq!(evaluator.history().training_costs, vec![2.0, 1.5, 3.0, 4.0]);
        assert_eq!(evaluator.history().validation_errors, vec![0.0]);
    }
}
