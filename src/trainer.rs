use std::time::{Duration, Instant};

use ndarray::prelude::*;
use rand::prelude::*;

use crate::ekf::EkfState;
use crate::error::{EkfError, Result};
use crate::matrix::MatrixInit;
use crate::network::{Network, NetworkConfig};

/// Per-call training settings.
///
/// `p` may be omitted after the first call to continue from the current
/// covariance. `q` defaults to no process noise. `r` is required.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainOptions {
    pub p: Option<MatrixInit>,
    pub q: Option<MatrixInit>,
    pub r: Option<MatrixInit>,
    pub step_size: f64,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            p: None,
            q: None,
            r: None,
            step_size: 1.0,
        }
    }
}

impl TrainOptions {
    pub fn with_p(mut self, p: impl Into<MatrixInit>) -> Self {
        self.p = Some(p.into());
        self
    }

    pub fn with_q(mut self, q: impl Into<MatrixInit>) -> Self {
        self.q = Some(q.into());
        self
    }

    pub fn with_r(mut self, r: impl Into<MatrixInit>) -> Self {
        self.r = Some(r.into());
        self
    }

    pub fn with_step_size(mut self, step_size: f64) -> Self {
        self.step_size = step_size;
        self
    }
}

/// Receives training progress. Observers only see counters and timings.
pub trait ProgressObserver {
    fn epoch_started(&mut self, _epoch: usize, _epochs: usize, _samples: usize) {}

    fn epoch_finished(&mut self, _epoch: usize, _epochs: usize, _samples: usize, _elapsed: Duration) {}
}

/// Reports epochs through the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressObserver for LogProgress {
    fn epoch_started(&mut self, epoch: usize, epochs: usize, samples: usize) {
        log::debug!("Epoch {}/{}: {} samples", epoch + 1, epochs, samples);
    }

    fn epoch_finished(&mut self, epoch: usize, epochs: usize, samples: usize, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        let rate = if secs > 0.0 { samples as f64 / secs } else { f64::INFINITY };
        log::info!(
            "Epoch {}/{} complete in {:.3}s ({:.1} samples/s)",
            epoch + 1,
            epochs,
            secs,
            rate
        );
    }
}

/// Owns a network, its filter state and the RNG used for initialization and shuffling.
pub struct EkfTrainer {
    network: Network,
    state: EkfState,
    rng: StdRng,
}

fn validate_shape(network: &Network, inputs: &ArrayView2<f64>, targets: &ArrayView2<f64>) -> Result<()> {
    if inputs.nrows() != targets.nrows() {
        return Err(EkfError::Shape(format!(
            "inputs and targets must have the same number of data points, got {} and {}",
            inputs.nrows(),
            targets.nrows()
        )));
    }
    if inputs.ncols() != network.n_input() {
        return Err(EkfError::Shape(format!(
            "inputs must have {} input variables, got {}",
            network.n_input(),
            inputs.ncols()
        )));
    }
    if targets.ncols() != network.n_output() {
        return Err(EkfError::Shape(format!(
            "targets must have {} output variables, got {}",
            network.n_output(),
            targets.ncols()
        )));
    }
    Ok(())
}

impl EkfTrainer {
    pub fn new(config: &NetworkConfig) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let network = Network::new(config, &mut rng)?;
        Ok(Self {
            network,
            state: EkfState::new(),
            rng,
        })
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn network_mut(&mut self) -> &mut Network {
        &mut self.network
    }

    pub fn state(&self) -> &EkfState {
        &self.state
    }

    pub fn predict(&self, input: &ArrayView1<f64>) -> Result<Array1<f64>> {
        self.network.predict(input)
    }

    pub fn train(
        &mut self,
        epochs: usize,
        inputs: &ArrayView2<f64>,
        targets: &ArrayView2<f64>,
        options: &TrainOptions,
    ) -> Result<()> {
        self.train_with_observer(epochs, inputs, targets, options, &mut LogProgress)
    }

    /// Single-output training with the targets given as a plain vector.
    pub fn train_column(
        &mut self,
        epochs: usize,
        inputs: &ArrayView2<f64>,
        targets: &ArrayView1<f64>,
        options: &TrainOptions,
    ) -> Result<()> {
        let targets = targets.view().insert_axis(Axis(1));
        self.train(epochs, inputs, &targets, options)
    }

    /// Run `epochs` passes over the data, one EKF step per sample in a fresh
    /// random order each epoch.
    ///
    /// All argument checks happen before anything is mutated. A singular
    /// innovation covariance mid-run aborts the call.
    pub fn train_with_observer(
        &mut self,
        epochs: usize,
        inputs: &ArrayView2<f64>,
        targets: &ArrayView2<f64>,
        options: &TrainOptions,
        observer: &mut dyn ProgressObserver,
    ) -> Result<()> {
        if epochs == 0 {
            return Err(EkfError::Configuration("epochs must be positive".into()));
        }
        validate_shape(&self.network, inputs, targets)?;
        let prepared = self.state.prepare(
            self.network.num_weights(),
            self.network.n_output(),
            options.p.as_ref(),
            options.q.as_ref(),
            options.r.as_ref(),
        )?;
        self.state.commit(prepared);

        let n = inputs.nrows();
        let mut order: Vec<usize> = (0..n).collect();
        for epoch in 0..epochs {
            let start = Instant::now();
            observer.epoch_started(epoch, epochs, n);

            order.shuffle(&mut self.rng);
            let shuffled_inputs = inputs.select(Axis(0), &order);
            let shuffled_targets = targets.select(Axis(0), &order);

            for (u, y) in shuffled_inputs.rows().into_iter().zip(shuffled_targets.rows()) {
                let (h, l) = self.network.forward(&u)?;
                self.state
                    .update(&mut self.network, &u, &y, &h.view(), &l.view(), options.step_size)?;
            }

            observer.epoch_finished(epoch, epochs, n, start.elapsed());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::ActivationKind;

    #[derive(Default)]
    struct Recorder {
        started: Vec<usize>,
        finished: Vec<(usize, usize)>,
    }

    impl ProgressObserver for Recorder {
        fn epoch_started(&mut self, epoch: usize, _epochs: usize, _samples: usize) {
            self.started.push(epoch);
        }

        fn epoch_finished(&mut self, epoch: usize, _epochs: usize, samples: usize, _elapsed: Duration) {
            self.finished.push((epoch, samples));
        }
    }

    fn data() -> (Array2<f64>, Array2<f64>) {
        let inputs = array![[0.1, 0.2], [0.4, -0.3], [-0.6, 0.5], [0.9, 0.0]];
        let targets = inputs.mean_axis(Axis(1)).unwrap().insert_axis(Axis(1));
        (inputs, targets)
    }

    #[test]
    fn observer_sees_every_epoch() {
        let (inputs, targets) = data();
        let mut trainer = EkfTrainer::new(&NetworkConfig::new(2, 1, 3, ActivationKind::Tanh)).unwrap();
        let mut recorder = Recorder::default();
        let options = TrainOptions::default().with_p(1.0).with_r(0.1);
        trainer
            .train_with_observer(3, &inputs.view(), &targets.view(), &options, &mut recorder)
            .unwrap();
        assert_eq!(recorder.started, vec![0, 1, 2]);
        assert_eq!(recorder.finished, vec![(0, 4), (1, 4), (2, 4)]);
    }

    #[test]
    fn observer_does_not_change_result() {
        let (inputs, targets) = data();
        let config = NetworkConfig::new(2, 1, 3, ActivationKind::Logistic).with_seed(7);
        let options = TrainOptions::default().with_p(1.0).with_r(0.1);
        let mut a = EkfTrainer::new(&config).unwrap();
        let mut b = EkfTrainer::new(&config).unwrap();
        a.train(2, &inputs.view(), &targets.view(), &options).unwrap();
        b.train_with_observer(2, &inputs.view(), &targets.view(), &options, &mut Recorder::default())
            .unwrap();
        assert_eq!(a.network().flat_weights(), b.network().flat_weights());
        assert_eq!(a.state().covariance(), b.state().covariance());
    }

    #[test]
    fn zero_epochs_rejected() {
        let (inputs, targets) = data();
        let mut trainer = EkfTrainer::new(&NetworkConfig::new(2, 1, 3, ActivationKind::Tanh)).unwrap();
        let options = TrainOptions::default().with_p(1.0).with_r(0.1);
        let err = trainer.train(0, &inputs.view(), &targets.view(), &options).unwrap_err();
        assert!(matches!(err, EkfError::Configuration(_)));
    }

    #[test]
    fn wrong_widths_rejected() {
        let (inputs, targets) = data();
        let mut trainer = EkfTrainer::new(&NetworkConfig::new(3, 1, 3, ActivationKind::Tanh)).unwrap();
        let options = TrainOptions::default().with_p(1.0).with_r(0.1);
        let err = trainer.train(1, &inputs.view(), &targets.view(), &options).unwrap_err();
        assert!(matches!(err, EkfError::Shape(_)));
        assert!(!trainer.state().is_initialized());
    }

    #[test]
    fn singular_innovation_aborts_whole_run() {
        let (inputs, targets) = data();
        let mut trainer = EkfTrainer::new(&NetworkConfig::new(2, 1, 3, ActivationKind::Tanh)).unwrap();
        let n = trainer.network().num_weights();
        // only the output bias is uncertain, with variance -R, so S = 0 on every sample
        let mut p = Array2::<f64>::zeros((n, n));
        p[[n - 1, n - 1]] = -0.1;
        let weights = trainer.network().flat_weights();
        let mut recorder = Recorder::default();
        let options = TrainOptions::default().with_p(p).with_r(0.1);
        let err = trainer
            .train_with_observer(5, &inputs.view(), &targets.view(), &options, &mut recorder)
            .unwrap_err();
        assert_eq!(err, EkfError::SingularMatrix { dim: 1 });
        assert_eq!(recorder.started, vec![0]);
        assert!(recorder.finished.is_empty());
        assert_eq!(trainer.network().flat_weights(), weights);
    }

    #[test]
    fn column_targets_match_matrix_targets() {
        let (inputs, targets) = data();
        let config = NetworkConfig::new(2, 1, 3, ActivationKind::Tanh).with_seed(3);
        let options = TrainOptions::default().with_p(1.0).with_r(0.1);
        let mut a = EkfTrainer::new(&config).unwrap();
        let mut b = EkfTrainer::new(&config).unwrap();
        a.train(2, &inputs.view(), &targets.view(), &options).unwrap();
        b.train_column(2, &inputs.view(), &targets.column(0), &options).unwrap();
        assert_eq!(a.network().flat_weights(), b.network().flat_weights());

        let mut wide = EkfTrainer::new(&NetworkConfig::new(2, 2, 3, ActivationKind::Tanh)).unwrap();
        let err = wide
            .train_column(1, &inputs.view(), &targets.column(0), &options)
            .unwrap_err();
        assert!(matches!(err, EkfError::Shape(_)));
    }
}
