use ndarray::{Array1, Array2, ArrayView2, Axis};
use ndarray_rand::rand::Rng;
use tracing::{debug, info};

use crate::cost::{CostFunction, CrossEntropyCost};
use crate::dataset::{Dataset, check_divisible};
use crate::error::{Error, Result};
use crate::evaluator::{Evaluator, History};
use crate::network::Network;
use crate::scheduler::Scheduler;

// The running update applied to one layer's parameters when momentum is on.
#[derive(Debug, Clone)]
struct Velocity {
    weights: Array2<f64>,
    biases: Array1<f64>,
}

/// Mini-batch stochastic gradient descent, optionally with momentum.
///
/// The momentum coefficient is passed to every call rather than stored, so there is exactly one
/// place it comes from. The velocities carried between steps are kept here.
pub struct Sgd<C = CrossEntropyCost> {
    cost_function: C,
    velocities: Vec<Velocity>,
}

impl Sgd<CrossEntropyCost> {
    pub fn new() -> Self {
        Sgd::with_cost_function(CrossEntropyCost)
    }
}

impl Default for Sgd<CrossEntropyCost> {
    fn default() -> Self {
        Sgd::new()
    }
}

impl<C: CostFunction> Sgd<C> {
    pub fn with_cost_function(cost_function: C) -> Self {
        Sgd {
            cost_function,
            velocities: Vec::new(),
        }
    }

    /// Trains `network` until `scheduler` hands out a learning rate of zero.
    ///
    /// Every epoch the training data is reshuffled and split into minibatches of
    /// `minibatch_size`, each of which updates the network once. The evaluator then scores the
    /// network and the scheduler decides on the next learning rate from that score. The dataset
    /// length must be a multiple of `minibatch_size`, and `momentum` must be in `[0, 1)`, zero
    /// meaning plain gradient descent.
    ///
    /// Returns the run's history. Its `validation_errors` and `training_costs` are the per-epoch
    /// validation error and per-minibatch running training cost.
    pub fn sgd<E, S, R>(
        &mut self,
        network: &mut Network,
        training_data: &Dataset,
        minibatch_size: usize,
        momentum: f64,
        evaluator: &mut Evaluator<'_, E>,
        scheduler: &mut S,
        rng: &mut R,
    ) -> Result<History>
    where
        E: CostFunction,
        S: Scheduler + ?Sized,
        R: Rng + ?Sized,
    {
        check_divisible(training_data.len(), minibatch_size)?;
        check_momentum(momentum)?;
        // A new run starts from rest, whatever earlier calls left behind.
        self.velocities.clear();

        info!("Starting SGD training with...");
        info!("Feats \t{:?}", training_data.features().dim());
        info!("Labels \t{} examples", training_data.labels().len());
        info!("Momentum \t{momentum}");

        for epoch in 0.. {
            info!("Epoch \t{epoch}");
            let learning_rate = scheduler.learning_rate();
            debug!("Learning rate \t{learning_rate}");

            let shuffled = training_data.shuffled(rng);
            let mut training_cost = 0.0;
            for (xs, labels) in shuffled.batches(minibatch_size)? {
                let ys = labels.to_one_hot(network.output_width())?;
                training_cost += self.update(network, &xs, &ys.view(), learning_rate, momentum)?;
                evaluator.log_training_cost(training_cost);
            }

            let accuracy = evaluator.monitor(network)?;
            scheduler.compute_next_learning_rate(accuracy, network);
            if scheduler.learning_rate() == 0.0 {
                info!("Training stopped after {} epochs", epoch + 1);
                break;
            }
        }

        Ok(evaluator.history().clone())
    }

    /// Performs one gradient step on the minibatch `xs` with one-hot targets `ys`, returning the
    /// minibatch's total cost before the step.
    ///
    /// The learning rate is divided by the batch size, so the step depends on the mean gradient
    /// rather than the sum. With a non-zero `momentum` the step also carries over that fraction of
    /// the previous step taken on a network of the same shape.
    pub fn update(
        &mut self,
        network: &mut Network,
        xs: &ArrayView2<f64>,
        ys: &ArrayView2<f64>,
        learning_rate: f64,
        momentum: f64,
    ) -> Result<f64> {
        check_momentum(momentum)?;

        // Run the batch forward, keeping every layer's activation, since backpropagation needs
        // each layer's input as well as its output.
        let activations = network.feed_forward_all(xs)?;
        let output = activations[activations.len() - 1].view();
        if ys.dim() != output.dim() {
            return Err(Error::ShapeMismatch {
                context: "target batch width",
                expected: output.ncols(),
                actual: ys.ncols(),
            });
        }

        // The cost gradient is the error at the output layer. Pushing it back through the network
        // gives one delta matrix per layer, one row per example.
        let cost_gradient = self.cost_function.delta(&output, ys);
        let scalar_cost = self.cost_function.cost(&output, ys);
        let deltas = network.feed_backward(cost_gradient, &activations)?;

        let scaled_learning_rate = learning_rate / xs.nrows() as f64;
        // Velocities left over from a differently shaped network don't apply. Start from rest.
        if momentum > 0.0 && !self.velocities_fit(network) {
            self.velocities = network
                .layers()
                .iter()
                .map(|layer| Velocity {
                    weights: Array2::zeros(layer.weights().raw_dim()),
                    biases: Array1::zeros(layer.biases().raw_dim()),
                })
                .collect();
        }

        for (index, (layer, delta)) in network.layers_mut().iter_mut().zip(&deltas).enumerate() {
            // Summing over the batch axis gives the total gradient for the whole minibatch. The
            // layer's input is the previous activation, so activations[index] pairs with layer
            // `index`.
            let nabla_biases = delta.sum_axis(Axis(0));
            let nabla_weights = delta.t().dot(&activations[index]);

            let (weights, biases) = layer.parameters_mut();
            if momentum > 0.0 {
                // v = momentum * v - rate * gradient, then the parameters move by v.
                let velocity = &mut self.velocities[index];
                velocity.weights.mapv_inplace(|v| v * momentum);
                velocity
                    .weights
                    .scaled_add(-scaled_learning_rate, &nabla_weights);
                velocity.biases.mapv_inplace(|v| v * momentum);
                velocity
                    .biases
                    .scaled_add(-scaled_learning_rate, &nabla_biases);
                *weights += &velocity.weights;
                *biases += &velocity.biases;
            } else {
                weights.scaled_add(-scaled_learning_rate, &nabla_weights);
                biases.scaled_add(-scaled_learning_rate, &nabla_biases);
            }
        }

        Ok(scalar_cost)
    }

    fn velocities_fit(&self, network: &Network) -> bool {
        self.velocities.len() == network.layers().len()
            && self
                .velocities
                .iter()
                .zip(network.layers())
                .all(|(velocity, layer)| {
                    velocity.weights.raw_dim() == layer.weights().raw_dim()
                        && velocity.biases.raw_dim() == layer.biases().raw_dim()
                })
    }
}

fn check_momentum(momentum: f64) -> Result<()> {
    if !(0.0..1.0).contains(&momentum) {
        return Err(Error::InvalidConfig(format!(
            "momentum must be in [0, 1), got {momentum}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_abs_diff_eq;
    use ndarray::{Array, arr2, concatenate};
    use ndarray_rand::RandomExt;
    use ndarray_rand::rand::{SeedableRng, rngs::StdRng};
    use ndarray_rand::rand_distr::Uniform;

    use crate::dataset::Labels;
    use crate::scheduler::ListScheduler;

    fn network() -> Network {
        Network::new(&[3, 4, 2], 0.5, &mut StdRng::seed_from_u64(11)).unwrap()
    }

    fn assert_same_parameters(a: &Network, b: &Network) {
        for (left, right) in a.layers().iter().zip(b.layers()) {
            assert_abs_diff_eq!(left.weights(), right.weights(), epsilon = 1e-12);
            assert_abs_diff_eq!(left.biases(), right.biases(), epsilon = 1e-12);
        }
    }

    // Categorical cross-entropy, whose gradient with respect to the softmax input is exactly
    // `prediction - target`.
    fn categorical_cost(network: &Network, xs: &Array2<f64>, ys: &Array2<f64>) -> f64 {
        let output = network.feed_forward(&xs.view()).unwrap();
        -(ys * &output.mapv(f64::ln)).sum()
    }

    #[test]
    fn gradients_match_finite_differences() {
        let mut rng = StdRng::seed_from_u64(5);
        let xs = Array::random_using((4, 3), Uniform::new(0.0, 1.0), &mut rng);
        let ys = arr2(&[[1.0, 0.0], [0.0, 1.0], [0.0, 1.0], [1.0, 0.0]]);
        let original = network();

        // With a learning rate equal to the batch size the step is exactly minus the gradient.
        let mut stepped = original.clone();
        Sgd::new()
            .update(&mut stepped, &xs.view(), &ys.view(), 4.0, 0.0)
            .unwrap();

        let h = 1e-6;
        for (index, layer) in original.layers().iter().enumerate() {
            for ((row, column), &weight) in layer.weights().indexed_iter() {
                let mut plus = original.clone();
                let mut minus = original.clone();
                plus.layers_mut()[index].parameters_mut().0[[row, column]] = weight + h;
                minus.layers_mut()[index].parameters_mut().0[[row, column]] = weight - h;
                let numeric = (categorical_cost(&plus, &xs, &ys)
                    - categorical_cost(&minus, &xs, &ys))
                    / (2.0 * h);

                let analytic = weight - stepped.layers()[index].weights()[[row, column]];
                assert_abs_diff_eq!(analytic, numeric, epsilon = 1e-6);
            }
            for (row, &bias) in layer.biases().indexed_iter() {
                let mut plus = original.clone();
                let mut minus = original.clone();
                plus.layers_mut()[index].parameters_mut().1[row] = bias + h;
                minus.layers_mut()[index].parameters_mut().1[row] = bias - h;
                let numeric = (categorical_cost(&plus, &xs, &ys)
                    - categorical_cost(&minus, &xs, &ys))
                    / (2.0 * h);

                let analytic = bias - stepped.layers()[index].biases()[row];
                assert_abs_diff_eq!(analytic, numeric, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn update_is_invariant_to_batch_size() {
        let xs = arr2(&[[0.2, 0.9, 0.4]]);
        let ys = arr2(&[[0.0, 1.0]]);
        let doubled_xs = concatenate![Axis(0), xs, xs];
        let doubled_ys = concatenate![Axis(0), ys, ys];

        let mut single = network();
        let mut doubled = network();
        let single_cost = Sgd::new()
            .update(&mut single, &xs.view(), &ys.view(), 0.5, 0.0)
            .unwrap();
        let doubled_cost = Sgd::new()
            .update(&mut doubled, &doubled_xs.view(), &doubled_ys.view(), 0.5, 0.0)
            .unwrap();

        assert_same_parameters(&single, &doubled);
        assert_abs_diff_eq!(doubled_cost, 2.0 * single_cost, epsilon = 1e-12);
    }

    #[test]
    fn momentum_accumulates_previous_step() {
        let xs = arr2(&[[0.2, 0.9, 0.4], [0.7, 0.1, 0.3]]);
        let ys = arr2(&[[0.0, 1.0], [1.0, 0.0]]);
        let start = network();

        let mut plain = start.clone();
        let mut with_momentum = start.clone();
        let mut plain_sgd = Sgd::new();
        let mut momentum_sgd = Sgd::new();

        // From zero velocity the first step is an ordinary gradient step.
        plain_sgd
            .update(&mut plain, &xs.view(), &ys.view(), 0.3, 0.0)
            .unwrap();
        momentum_sgd
            .update(&mut with_momentum, &xs.view(), &ys.view(), 0.3, 0.5)
            .unwrap();
        assert_same_parameters(&plain, &with_momentum);

        // The second step adds half of the first step on top of the gradient step.
        let after_first = plain.clone();
        plain_sgd
            .update(&mut plain, &xs.view(), &ys.view(), 0.3, 0.0)
            .unwrap();
        momentum_sgd
            .update(&mut with_momentum, &xs.view(), &ys.view(), 0.3, 0.5)
            .unwrap();

        for (index, layer) in with_momentum.layers().iter().enumerate() {
            let first_step = after_first.layers()[index].weights() - start.layers()[index].weights();
            let expected = plain.layers()[index].weights() + &(first_step * 0.5);
            assert_abs_diff_eq!(layer.weights(), &expected, epsilon = 1e-12);
        }
    }

    #[test]
    fn momentum_restarts_on_a_differently_shaped_network() {
        let xs = arr2(&[[0.2, 0.9, 0.4], [0.7, 0.1, 0.3]]);
        let ys = arr2(&[[0.0, 1.0], [1.0, 0.0]]);
        let mut sgd = Sgd::new();
        let mut narrow = network();
        sgd.update(&mut narrow, &xs.view(), &ys.view(), 0.3, 0.5)
            .unwrap();

        // Same depth, different hidden width: the old velocities can't apply.
        let wide = Network::new(&[3, 5, 2], 0.5, &mut StdRng::seed_from_u64(12)).unwrap();
        let mut with_stale_state = wide.clone();
        let mut fresh = wide.clone();
        sgd.update(&mut with_stale_state, &xs.view(), &ys.view(), 0.3, 0.5)
            .unwrap();
        Sgd::new()
            .update(&mut fresh, &xs.view(), &ys.view(), 0.3, 0.5)
            .unwrap();
        assert_same_parameters(&with_stale_state, &fresh);
    }

    #[test]
    fn sgd_uses_the_momentum_it_is_given() {
        let mut rng = StdRng::seed_from_u64(21);
        let features = Array::random_using((8, 3), Uniform::new(0.0, 1.0), &mut rng);
        let digits = Array1::from_iter((0..8).map(|i| i % 2));
        let training = Dataset::new(features, Labels::Digits(digits)).unwrap();

        let run = |sgd: &mut Sgd, momentum: f64| {
            let mut trained = network();
            let mut evaluator = Evaluator::new(&training, &training);
            let mut scheduler = ListScheduler::new(vec![0.5], 2).unwrap();
            sgd.sgd(
                &mut trained,
                &training,
                4,
                momentum,
                &mut evaluator,
                &mut scheduler,
                &mut StdRng::seed_from_u64(4),
            )
            .unwrap();
            trained
        };

        // An optimizer that has already run with momentum carries nothing into a plain run.
        let mut reused = Sgd::new();
        let with_momentum = run(&mut reused, 0.9);
        let plain_after_momentum = run(&mut reused, 0.0);
        let plain = run(&mut Sgd::new(), 0.0);
        assert_eq!(plain_after_momentum, plain);
        assert_ne!(with_momentum, plain);
    }

    #[test]
    fn repeated_updates_reduce_cost() {
        let xs = arr2(&[[1.0, 0.0, 0.0], [0.0, 1.0, 1.0]]);
        let ys = arr2(&[[1.0, 0.0], [0.0, 1.0]]);
        let mut network = network();
        let mut sgd = Sgd::new();

        let first = sgd
            .update(&mut network, &xs.view(), &ys.view(), 0.5, 0.6)
            .unwrap();
        let mut last = first;
        for _ in 0..200 {
            last = sgd
                .update(&mut network, &xs.view(), &ys.view(), 0.5, 0.6)
                .unwrap();
        }
        assert!(last < first / 2.0);
    }

    #[test]
    fn mismatched_targets_are_rejected() {
        let xs = arr2(&[[1.0, 0.0, 0.0]]);
        let ys = arr2(&[[1.0, 0.0, 0.0]]);
        let result = Sgd::new().update(&mut network(), &xs.view(), &ys.view(), 0.1, 0.0);
        assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn momentum_must_be_a_fraction() {
        let xs = arr2(&[[1.0, 0.0, 0.0]]);
        let ys = arr2(&[[1.0, 0.0]]);
        for momentum in [-0.1, 1.0, f64::NAN] {
            let result = Sgd::new().update(&mut network(), &xs.view(), &ys.view(), 0.1, momentum);
            assert!(matches!(result, Err(Error::InvalidConfig(_))));
        }
        assert!(
            Sgd::new()
                .update(&mut network(), &xs.view(), &ys.view(), 0.1, 0.9)
                .is_ok()
        );
    }
}
