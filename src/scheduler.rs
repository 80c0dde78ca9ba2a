use tracing::info;

use crate::error::{Error, Result};
use crate::network::Network;

/// Picks the learning rate for each epoch. A learning rate of zero tells the trainer to stop.
///
/// `compute_next_learning_rate` is called once at the end of every epoch, and `learning_rate`
/// then returns the rate for the next one.
pub trait Scheduler {
    fn compute_next_learning_rate(&mut self, accuracy: Option<usize>, network: &Network);

    fn learning_rate(&self) -> f64;

    /// The best network seen so far, for schedulers that keep track of one.
    fn best_network(&self) -> Option<&Network> {
        None
    }
}

/// Takes learning rates from a fixed list, one per epoch, repeating the last entry once the list
/// runs out. After `max_epochs` epochs the rate drops to zero.
#[derive(Debug, Clone)]
pub struct ListScheduler {
    learning_rates: Vec<f64>,
    max_epochs: usize,
    epoch: usize,
    learning_rate: f64,
}

impl ListScheduler {
    pub fn new(learning_rates: Vec<f64>, max_epochs: usize) -> Result<ListScheduler> {
        let Some(&first) = learning_rates.first() else {
            return Err(Error::InvalidConfig(
                "a list scheduler needs at least one learning rate".to_string(),
            ));
        };
        Ok(ListScheduler {
            learning_rates,
            max_epochs,
            epoch: 0,
            learning_rate: first,
        })
    }

    pub fn epoch(&self) -> usize {
        self.epoch
    }
}

impl Scheduler for ListScheduler {
    fn compute_next_learning_rate(&mut self, _accuracy: Option<usize>, _network: &Network) {
        self.learning_rate = if self.epoch >= self.max_epochs {
            0.0
        } else {
            // The constructor guarantees the list isn't empty.
            let last = self.learning_rates.len() - 1;
            self.learning_rates[self.epoch.min(last)]
        };
        self.epoch += 1;
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }
}

/// Decays the learning rate when accuracy stops improving, and stops training altogether when it
/// hasn't improved for long enough or the epoch budget runs out.
///
/// Every time a new highest accuracy is seen, the network that achieved it is cloned and kept.
#[derive(Debug, Clone)]
pub struct DecayScheduler {
    learning_rate: f64,
    decay_threshold: usize,
    decay: f64,
    stop_threshold: usize,
    max_epochs: usize,

    no_improvements_stop: usize,
    no_improvements_decay: usize,
    highest_accuracy: usize,
    highest_accuracy_network: Option<Network>,
    epoch: usize,
}

impl DecayScheduler {
    pub const DEFAULT_DECAY_THRESHOLD: usize = 3;
    pub const DEFAULT_DECAY: f64 = 0.01;
    pub const DEFAULT_STOP_THRESHOLD: usize = 10;
    pub const DEFAULT_MAX_EPOCHS: usize = 99;

    pub fn new(initial_learning_rate: f64) -> DecayScheduler {
        DecayScheduler {
            learning_rate: initial_learning_rate,
            decay_threshold: Self::DEFAULT_DECAY_THRESHOLD,
            decay: Self::DEFAULT_DECAY,
            stop_threshold: Self::DEFAULT_STOP_THRESHOLD,
            max_epochs: Self::DEFAULT_MAX_EPOCHS,
            no_improvements_stop: 0,
            no_improvements_decay: 0,
            highest_accuracy: 0,
            highest_accuracy_network: None,
            epoch: 0,
        }
    }

    /// Multiply the learning rate by `decay` after `decay_threshold` epochs without improvement.
    pub fn with_decay(mut self, decay: f64, decay_threshold: usize) -> Self {
        self.decay = decay;
        self.decay_threshold = decay_threshold;
        self
    }

    /// Stop after `stop_threshold` epochs without improvement.
    pub fn with_stop_threshold(mut self, stop_threshold: usize) -> Self {
        self.stop_threshold = stop_threshold;
        self
    }

    pub fn with_max_epochs(mut self, max_epochs: usize) -> Self {
        self.max_epochs = max_epochs;
        self
    }

    pub fn highest_accuracy(&self) -> usize {
        self.highest_accuracy
    }

    pub fn epoch(&self) -> usize {
        self.epoch
    }

    /// Gives up ownership of the best network snapshot.
    pub fn into_best_network(self) -> Option<Network> {
        self.highest_accuracy_network
    }
}

impl Scheduler for DecayScheduler {
    fn compute_next_learning_rate(&mut self, accuracy: Option<usize>, network: &Network) {
        // An epoch with no accuracy measured can't be an improvement.
        match accuracy {
            Some(accuracy) if accuracy > self.highest_accuracy => {
                info!("Highest accuracy network so far: {accuracy}");
                self.highest_accuracy = accuracy;
                // Replacing the option drops the previous snapshot.
                self.highest_accuracy_network = Some(network.clone());
                self.no_improvements_stop = 0;
                self.no_improvements_decay = 0;
            }
            _ => {
                self.no_improvements_stop += 1;
                self.no_improvements_decay += 1;
            }
        }

        if self.no_improvements_stop >= self.stop_threshold {
            info!(
                "No improvement for {} epochs, stopping",
                self.no_improvements_stop
            );
            self.learning_rate = 0.0;
        } else if self.epoch >= self.max_epochs {
            info!("Reached the budget of {} epochs, stopping", self.max_epochs);
            self.learning_rate = 0.0;
        } else if self.no_improvements_decay >= self.decay_threshold {
            self.learning_rate *= self.decay;
            self.no_improvements_decay = 0;
            info!("Learning rate decayed: {}", self.learning_rate);
        }

        self.epoch += 1;
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn best_network(&self) -> Option<&Network> {
        self.highest_accuracy_network.as_ref()
    }
}
