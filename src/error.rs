use thiserror::Error;

/// Everything that can go wrong while building or training an EKF network.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EkfError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("shape error: {0}")]
    Shape(String),

    #[error("innovation covariance is singular ({dim}x{dim})")]
    SingularMatrix { dim: usize },

    #[error("{name} must be positive definite: rank {rank} < dimension {dim}")]
    RankDeficiency {
        name: &'static str,
        rank: usize,
        dim: usize,
    },
}

pub type Result<T> = std::result::Result<T, EkfError>;
