//! Fit an EKF-trained network to a noisy double-pendulum trajectory and
//! report how well it reconstructs the clean state.

use std::f64::consts::PI;
use std::time::Duration;

use anyhow::{Context, Result};
use ndarray::prelude::*;
use rand::prelude::*;
use rand_distr::StandardNormal;

use ekf_network::{ActivationKind, EkfTrainer, NetworkConfig, ProgressObserver, TrainOptions};

const SEED: u64 = 42;
const DT: f64 = 0.01;
const T_END: f64 = 10.0;
const NOISE: f64 = 0.1;

const M1: f64 = 1.0;
const M2: f64 = 1.0;
const L1: f64 = 1.0;
const L2: f64 = 1.0;
const G: f64 = 9.8;

/// State is `[theta1, omega1, theta2, omega2]`.
fn double_pendulum(y: &Array1<f64>) -> Array1<f64> {
    let (t1, w1, t2, w2) = (y[0], y[1], y[2], y[3]);
    let d = t1 - t2;
    let den = 2.0 * M1 + M2 - M2 * (2.0 * t1 - 2.0 * t2).cos();
    let a1 = (-G * (2.0 * M1 + M2) * t1.sin()
        - M2 * G * (t1 - 2.0 * t2).sin()
        - 2.0 * d.sin() * M2 * (w2 * w2 * L2 + w1 * w1 * L1 * d.cos()))
        / (L1 * den);
    let a2 = (2.0 * d.sin()
        * (w1 * w1 * L1 * (M1 + M2) + G * (M1 + M2) * t1.cos() + w2 * w2 * L2 * M2 * d.cos()))
        / (L2 * den);
    array![w1, a1, w2, a2]
}

/// Classic fixed-step RK4; returns one row per step, starting at `y0`.
fn integrate(f: impl Fn(&Array1<f64>) -> Array1<f64>, y0: Array1<f64>, dt: f64, steps: usize) -> Array2<f64> {
    let mut out = Array2::zeros((steps, y0.len()));
    let mut y = y0;
    for i in 0..steps {
        out.row_mut(i).assign(&y);
        let k1 = f(&y);
        let k2 = f(&(&y + &(0.5 * dt * &k1)));
        let k3 = f(&(&y + &(0.5 * dt * &k2)));
        let k4 = f(&(&y + &(dt * &k3)));
        y = &y + &((dt / 6.0) * (k1 + 2.0 * k2 + 2.0 * k3 + k4));
    }
    out
}

/// Per-column standardization to zero mean and unit variance.
struct StandardScaler {
    mean: Array1<f64>,
    std: Array1<f64>,
}

impl StandardScaler {
    fn fit(data: &ArrayView2<f64>) -> Result<Self> {
        let mean = data.mean_axis(Axis(0)).context("cannot fit a scaler on no data")?;
        let std = data
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > 0.0 { s } else { 1.0 });
        Ok(Self { mean, std })
    }

    fn transform(&self, data: &ArrayView2<f64>) -> Array2<f64> {
        (data - &self.mean) / &self.std
    }

    fn inverse_transform(&self, data: &ArrayView2<f64>) -> Array2<f64> {
        data * &self.std + &self.mean
    }
}

struct StdoutProgress;

impl ProgressObserver for StdoutProgress {
    fn epoch_started(&mut self, epoch: usize, epochs: usize, samples: usize) {
        println!("Epoch {}/{} ({} samples)", epoch + 1, epochs, samples);
    }

    fn epoch_finished(&mut self, epoch: usize, _epochs: usize, samples: usize, elapsed: Duration) {
        println!(
            "Epoch {} complete in {}s ({:.0} samples/s)",
            epoch + 1,
            elapsed.as_secs_f32(),
            samples as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
        );
    }
}

fn main() -> Result<()> {
    let steps = (T_END / DT).round() as usize;
    let truth = integrate(double_pendulum, array![PI / 4.0, 0.0, PI / 2.0, 0.0], DT, steps);

    let mut rng = StdRng::seed_from_u64(SEED);
    let noisy = &truth + &Array2::from_shape_simple_fn(truth.dim(), || NOISE * rng.sample::<f64, _>(StandardNormal));

    let scaler = StandardScaler::fit(&noisy.view())?;
    let scaled = scaler.transform(&noisy.view());

    let config = NetworkConfig::new(4, 4, 20, ActivationKind::Relu).with_seed(SEED);
    let mut trainer = EkfTrainer::new(&config).context("building network")?;
    let options = TrainOptions::default().with_p(0.5).with_r(0.1);
    trainer
        .train_with_observer(1, &scaled.view(), &scaled.view(), &options, &mut StdoutProgress)
        .context("training")?;

    let predicted = scaler.inverse_transform(&trainer.network().predict_batch(&scaled.view())?.view());
    let noisy_mse = (&noisy - &truth).mapv(|e| e * e).mean().unwrap_or(0.0);
    let pred_mse = (&predicted - &truth).mapv(|e| e * e).mean().unwrap_or(0.0);
    println!("samples: {}", steps);
    println!("mse(noisy, true):     {:.5}", noisy_mse);
    println!("mse(predicted, true): {:.5}", pred_mse);
    for (i, name) in ["theta1", "omega1", "theta2", "omega2"].iter().enumerate() {
        let err = (&predicted.column(i) - &truth.column(i)).mapv(|e| e * e).mean().unwrap_or(0.0);
        println!("  {:<7} {:.5}", name, err);
    }
    Ok(())
}
