//! Online training of a single-hidden-layer network with an Extended Kalman Filter.
//!
//! The weights are the filter state and the network is the (nonlinear)
//! observation function: every sample linearizes the network through its
//! Jacobian and applies one Kalman correction to the weights and their
//! covariance.

#[cfg(feature = "blas")]
extern crate blas_src;

pub mod activation;
pub mod ekf;
pub mod error;
pub mod matrix;
pub mod network;
pub mod trainer;

#[cfg(feature = "python")]
mod python;


pub use activation::{Activation, ActivationKind};
pub use ekf::EkfState;
pub use error::{EkfError, Result};
pub use matrix::MatrixInit;
pub use network::{Network, NetworkConfig};
pub use trainer::{EkfTrainer, LogProgress, ProgressObserver, TrainOptions};
