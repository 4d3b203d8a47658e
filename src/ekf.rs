use ndarray::prelude::*;

use crate::error::{EkfError, Result};
use crate::matrix::{self, MatrixInit};
use crate::network::Network;

/// Filter state that lives alongside the network across training calls.
///
/// P survives between calls; Q and R are replaced on every call.
#[derive(Debug, Clone)]
pub struct EkfState {
    p: Array2<f64>,
    q: Array2<f64>,
    q_nonzero: bool,
    r: Array2<f64>,
    initialized: bool,
}

/// Fully validated matrices for one training call, not yet committed.
#[derive(Debug, Clone)]
pub struct Prepared {
    p: Option<Array2<f64>>,
    q: Array2<f64>,
    q_nonzero: bool,
    r: Array2<f64>,
}

impl Default for EkfState {
    fn default() -> Self {
        Self::new()
    }
}

impl EkfState {
    pub fn new() -> Self {
        Self {
            p: Array2::zeros((0, 0)),
            q: Array2::zeros((0, 0)),
            q_nonzero: false,
            r: Array2::zeros((0, 0)),
            initialized: false,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn covariance(&self) -> ArrayView2<'_, f64> {
        self.p.view()
    }

    pub fn process_noise(&self) -> ArrayView2<'_, f64> {
        self.q.view()
    }

    pub fn measurement_noise(&self) -> ArrayView2<'_, f64> {
        self.r.view()
    }

    pub fn has_process_noise(&self) -> bool {
        self.q_nonzero
    }

    /// Resolve and check P, Q and R for a training call without touching `self`.
    pub fn prepare(
        &self,
        num_weights: usize,
        n_output: usize,
        p: Option<&MatrixInit>,
        q: Option<&MatrixInit>,
        r: Option<&MatrixInit>,
    ) -> Result<Prepared> {
        let p = matrix::resolve(p, num_weights, "P")?;
        if p.is_none() && !self.initialized {
            return Err(EkfError::Configuration("initial P not specified".into()));
        }
        if let Some(p) = &p {
            if !matrix::is_symmetric(&p.view(), 1e-12) {
                log::warn!("initial P is not symmetric");
            }
        }

        let q = matrix::resolve(q, num_weights, "Q")?
            .unwrap_or_else(|| Array2::zeros((num_weights, num_weights)));
        let q_nonzero = q.iter().any(|&v| v != 0.0);

        let r = matrix::resolve(r, n_output, "R")?
            .ok_or_else(|| EkfError::Configuration("measurement noise R not specified".into()))?;
        let rank = matrix::rank(&r.view());
        if rank != n_output {
            return Err(EkfError::RankDeficiency {
                name: "R",
                rank,
                dim: n_output,
            });
        }

        log::debug!(
            "ekf prepared: P {} ({}x{}), Q nonzero={}, R {}x{}",
            if p.is_some() { "reset" } else { "kept" },
            num_weights,
            num_weights,
            q_nonzero,
            n_output,
            n_output
        );
        Ok(Prepared { p, q, q_nonzero, r })
    }

    pub fn commit(&mut self, prepared: Prepared) {
        if let Some(p) = prepared.p {
            self.p = p;
            self.initialized = true;
        }
        self.q = prepared.q;
        self.q_nonzero = prepared.q_nonzero;
        self.r = prepared.r;
    }

    /// One EKF correction for a single sample.
    ///
    /// `output` and `hidden` must come from `network.forward(input)` with the
    /// current weights.
    pub fn update(
        &mut self,
        network: &mut Network,
        input: &ArrayView1<f64>,
        target: &ArrayView1<f64>,
        output: &ArrayView1<f64>,
        hidden: &ArrayView1<f64>,
        step_size: f64,
    ) -> Result<()> {
        if !self.initialized {
            return Err(EkfError::Configuration("EKF state used before P was set".into()));
        }
        let n = network.num_weights();
        if self.p.dim() != (n, n) || self.r.dim() != (network.n_output(), network.n_output()) {
            return Err(EkfError::Shape(format!(
                "filter state sized for P {:?} / R {:?} does not fit a network with {} weights and {} outputs",
                self.p.shape(),
                self.r.shape(),
                n,
                network.n_output()
            )));
        }
        if target.len() != network.n_output() || output.len() != network.n_output() {
            return Err(EkfError::Shape(format!(
                "target and output must have {} variables, got {} and {}",
                network.n_output(),
                target.len(),
                output.len()
            )));
        }

        let h = network.jacobian(input, hidden)?;
        let pht = self.p.dot(&h.t());
        let s = h.dot(&pht) + &self.r;
        let k = matrix::mul_inverse(&pht.view(), &s.view())?;

        let innovation = target - output;
        let delta = step_size * k.dot(&innovation);
        network.apply_delta(&delta.view())?;

        let hp = h.dot(&self.p);
        self.p -= &k.dot(&hp);
        matrix::symmetrize(&mut self.p);
        if self.q_nonzero {
            self.p += &self.q;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::ActivationKind;
    use crate::network::{NetworkConfig, SEED};
    use approx::assert_abs_diff_eq;
    use rand::prelude::*;

    fn setup(n_output: usize) -> (Network, EkfState) {
        let config = NetworkConfig::new(2, n_output, 3, ActivationKind::Tanh).with_weight_scale(1.0);
        let mut rng = StdRng::seed_from_u64(SEED);
        let net = Network::new(&config, &mut rng).unwrap();
        let mut state = EkfState::new();
        let prepared = state
            .prepare(net.num_weights(), n_output, Some(&MatrixInit::Scalar(1.0)), None, Some(&MatrixInit::Scalar(0.1)))
            .unwrap();
        state.commit(prepared);
        (net, state)
    }

    fn step(net: &mut Network, state: &mut EkfState, input: &Array1<f64>, target: &Array1<f64>, step_size: f64) {
        let (out, hidden) = net.forward(&input.view()).unwrap();
        state
            .update(net, &input.view(), &target.view(), &out.view(), &hidden.view(), step_size)
            .unwrap();
    }

    #[test]
    fn missing_p_on_first_call() {
        let state = EkfState::new();
        let err = state.prepare(10, 1, None, None, Some(&MatrixInit::Scalar(0.1))).unwrap_err();
        assert!(matches!(err, EkfError::Configuration(_)));
    }

    #[test]
    fn missing_r_is_configuration_error() {
        let state = EkfState::new();
        let err = state.prepare(10, 1, Some(&MatrixInit::Scalar(1.0)), None, None).unwrap_err();
        assert!(matches!(err, EkfError::Configuration(_)));
    }

    #[test]
    fn singular_r_is_rank_deficient() {
        let state = EkfState::new();
        let err = state
            .prepare(10, 2, Some(&MatrixInit::Scalar(1.0)), None, Some(&Array2::<f64>::zeros((2, 2)).into()))
            .unwrap_err();
        assert_eq!(err, EkfError::RankDeficiency { name: "R", rank: 0, dim: 2 });
    }

    #[test]
    fn zero_q_scalar_disables_process_noise() {
        let mut state = EkfState::new();
        let prepared = state
            .prepare(4, 1, Some(&MatrixInit::Scalar(1.0)), Some(&MatrixInit::Scalar(0.0)), Some(&MatrixInit::Scalar(0.1)))
            .unwrap();
        state.commit(prepared);
        assert!(!state.has_process_noise());
        let prepared = state.prepare(4, 1, None, Some(&MatrixInit::Scalar(1e-4)), Some(&MatrixInit::Scalar(0.1))).unwrap();
        state.commit(prepared);
        assert!(state.has_process_noise());
        assert!(state.is_initialized());
    }

    #[test]
    fn zero_step_keeps_weights_but_moves_p() {
        let (mut net, mut state) = setup(1);
        let weights = net.flat_weights();
        let p_before = state.covariance().to_owned();
        step(&mut net, &mut state, &array![0.4, -0.2], &array![0.9], 0.0);
        assert_eq!(net.flat_weights(), weights);
        assert_ne!(state.covariance(), p_before);
        // covariance only shrinks along the measured directions
        for i in 0..net.num_weights() {
            assert!(state.covariance()[[i, i]] <= p_before[[i, i]] + 1e-12);
        }
    }

    #[test]
    fn covariance_matches_closed_form() {
        let (mut net, mut state) = setup(1);
        let input = array![0.4, -0.2];
        let (out, hidden) = net.forward(&input.view()).unwrap();
        let h = net.jacobian(&input.view(), &hidden.view()).unwrap();
        // P = I, R = 0.1: P' = I - h^T h / (h h^T + 0.1)
        let hh = h.dot(&h.t())[[0, 0]];
        let expected = Array2::<f64>::eye(net.num_weights()) - h.t().dot(&h) / (hh + 0.1);
        state
            .update(&mut net, &input.view(), &array![0.5].view(), &out.view(), &hidden.view(), 1.0)
            .unwrap();
        for (a, b) in state.covariance().iter().zip(expected.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
        }
    }

    #[test]
    fn update_reduces_error_on_sample() {
        let (mut net, mut state) = setup(2);
        let input = array![0.3, 0.6];
        let target = array![0.2, -0.4];
        let before = (&net.predict(&input.view()).unwrap() - &target).mapv(f64::abs).sum();
        step(&mut net, &mut state, &input, &target, 1.0);
        let after = (&net.predict(&input.view()).unwrap() - &target).mapv(f64::abs).sum();
        assert!(after < before);
    }

    #[test]
    fn p_stays_symmetric() {
        let (mut net, mut state) = setup(2);
        let prepared = state
            .prepare(net.num_weights(), 2, None, Some(&MatrixInit::Scalar(1e-3)), Some(&MatrixInit::Scalar(0.1)))
            .unwrap();
        state.commit(prepared);
        for i in 0..25 {
            let x = i as f64 / 25.0;
            step(&mut net, &mut state, &array![x, 1.0 - x], &array![x, -x], 1.0);
        }
        assert!(matrix::is_symmetric(&state.covariance(), 1e-10));
    }

    #[test]
    fn singular_innovation_aborts_update() {
        let (mut net, mut state) = setup(1);
        let n = net.num_weights();
        // only the output bias is uncertain, with variance -R: S = -0.1 + 0.1 = 0
        let mut p = Array2::<f64>::zeros((n, n));
        p[[n - 1, n - 1]] = -0.1;
        let prepared = state.prepare(n, 1, Some(&p.into()), None, Some(&MatrixInit::Scalar(0.1))).unwrap();
        state.commit(prepared);
        let weights = net.flat_weights();
        let input = array![0.1, 0.2];
        let (out, hidden) = net.forward(&input.view()).unwrap();
        let err = state
            .update(&mut net, &input.view(), &array![1.0].view(), &out.view(), &hidden.view(), 1.0)
            .unwrap_err();
        assert_eq!(err, EkfError::SingularMatrix { dim: 1 });
        assert_eq!(net.flat_weights(), weights);
    }
}
