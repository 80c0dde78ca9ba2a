//! A feed-forward neural network trained by mini-batch stochastic gradient descent, with
//! momentum, a decaying learning rate and early stopping, for classifying MNIST digits.

pub mod config;
pub mod cost;
pub mod dataset;
pub mod error;
pub mod evaluator;
pub mod layer;
pub mod mnist;
pub mod network;
pub mod persist;
pub mod scheduler;
pub mod trainer;

pub use config::Hyperparameters;
pub use cost::{CostFunction, CrossEntropyCost};
pub use dataset::{Dataset, Labels};
pub use error::{Error, Result};
pub use evaluator::{Evaluator, History, Monitor};
pub use layer::{Activation, Layer};
pub use mnist::MnistData;
pub use network::Network;
pub use scheduler::{DecayScheduler, ListScheduler, Scheduler};
pub use trainer::Sgd;
