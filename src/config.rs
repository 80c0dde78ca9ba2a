use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::evaluator::{DEFAULT_CHUNK_SIZE, DEFAULT_LOG_INTERVAL};
use crate::scheduler::DecayScheduler;

/// Everything needed to set up one training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    pub learning_rate: f64,
    pub momentum: f64,
    /// Factor the learning rate is multiplied by when accuracy stalls.
    pub decay: f64,
    /// Epochs without improvement before the learning rate decays.
    pub decay_threshold: usize,
    /// Epochs without improvement before training stops.
    pub stop_threshold: usize,
    pub minibatch_size: usize,
    pub max_epochs: usize,
    pub initial_weight_magnitude: f64,
    /// Layer sizes, input width first and number of classes last.
    pub architecture: Vec<usize>,
    pub seed: u64,
    pub log_interval: usize,
    pub chunk_size: usize,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Hyperparameters {
            learning_rate: 0.1,
            momentum: 0.6,
            decay: 0.01,
            decay_threshold: 2,
            stop_threshold: 10,
            minibatch_size: 10,
            max_epochs: DecayScheduler::DEFAULT_MAX_EPOCHS,
            initial_weight_magnitude: 0.1,
            architecture: vec![784, 400, 400, 10],
            seed: 42,
            log_interval: DEFAULT_LOG_INTERVAL,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl Hyperparameters {
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| Err(Error::InvalidConfig(message));

        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return invalid(format!(
                "learning rate must be positive, got {}",
                self.learning_rate
            ));
        }
        if !(0.0..1.0).contains(&self.momentum) {
            return invalid(format!("momentum must be in [0, 1), got {}", self.momentum));
        }
        if !(self.decay > 0.0 && self.decay <= 1.0) {
            return invalid(format!("decay must be in (0, 1], got {}", self.decay));
        }
        if self.decay_threshold == 0 || self.stop_threshold == 0 {
            return invalid("decay and stop thresholds must be at least 1".to_string());
        }
        if self.minibatch_size == 0 {
            return invalid("minibatch size must be at least 1".to_string());
        }
        if self.chunk_size == 0 {
            return invalid("chunk size must be at least 1".to_string());
        }
        if !(self.initial_weight_magnitude > 0.0 && self.initial_weight_magnitude.is_finite()) {
            return invalid(format!(
                "initial weight magnitude must be positive, got {}",
                self.initial_weight_magnitude
            ));
        }
        if self.architecture.len() < 2 || self.architecture.contains(&0) {
            return invalid(format!(
                "architecture needs at least two non-empty layers, got {:?}",
                self.architecture
            ));
        }
        Ok(())
    }

    pub fn decay_scheduler(&self) -> DecayScheduler {
        DecayScheduler::new(self.learning_rate)
            .with_decay(self.decay, self.decay_threshold)
            .with_stop_threshold(self.stop_threshold)
            .with_max_epochs(self.max_epochs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::scheduler::Scheduler;

    #[test]
    fn defaults_are_valid() {
        let hyperparameters = Hyperparameters::default();
        hyperparameters.validate().unwrap();
        assert_eq!(hyperparameters.decay_scheduler().learning_rate(), 0.1);
    }

    #[test]
    fn unusable_values_are_rejected() {
        let cases = [
            Hyperparameters {
                learning_rate: 0.0,
                ..Hyperparameters::default()
            },
            Hyperparameters {
                momentum: 1.5,
                ..Hyperparameters::default()
            },
            Hyperparameters {
                decay: 0.0,
                ..Hyperparameters::default()
            },
            Hyperparameters {
                stop_threshold: 0,
                ..Hyperparameters::default()
            },
            Hyperparameters {
                minibatch_size: 0,
                ..Hyperparameters::default()
            },
            Hyperparameters {
                architecture: vec![784],
                ..Hyperparameters::default()
            },
            Hyperparameters {
                architecture: vec![784, 0, 10],
                ..Hyperparameters::default()
            },
        ];
        for hyperparameters in cases {
            assert!(
                matches!(hyperparameters.validate(), Err(Error::InvalidConfig(_))),
                "{hyperparameters:?} should be rejected"
            );
        }
    }

    #[test]
    fn round_trips_through_json() {
        let hyperparameters = Hyperparameters {
            architecture: vec![784, 30, 10],
            ..Hyperparameters::default()
        };
        let json = serde_json::to_string(&hyperparameters).unwrap();
        let parsed: Hyperparameters = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, hyperparameters);
    }
}
