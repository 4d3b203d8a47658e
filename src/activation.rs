use std::fmt;
use std::str::FromStr;

use crate::error::EkfError;

/// Hidden-layer nonlinearity.
///
/// `derivative` takes the *activated* value rather than the preactivation,
/// since the Jacobian only ever sees post-activation hidden units.
pub trait Activation: Send + Sync {
    fn activate(&self, x: f64) -> f64;
    fn derivative(&self, out: f64) -> f64;
}

pub struct Logistic;
pub struct Tanh;
pub struct Relu;

impl Activation for Logistic {
    fn activate(&self, x: f64) -> f64 {
        1.0 / (1.0 + (-x).exp())
    }

    fn derivative(&self, out: f64) -> f64 {
        out * (1.0 - out)
    }
}

impl Activation for Tanh {
    fn activate(&self, x: f64) -> f64 {
        x.tanh()
    }

    fn derivative(&self, out: f64) -> f64 {
        1.0 - out * out
    }
}

impl Activation for Relu {
    fn activate(&self, x: f64) -> f64 {
        x.max(0.0)
    }

    fn derivative(&self, out: f64) -> f64 {
        if out > 0.0 {
            1.0
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationKind {
    Logistic,
    Tanh,
    Relu,
}

impl ActivationKind {
    pub fn resolve(self) -> &'static dyn Activation {
        match self {
            ActivationKind::Logistic => &Logistic,
            ActivationKind::Tanh => &Tanh,
            ActivationKind::Relu => &Relu,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ActivationKind::Logistic => "logistic",
            ActivationKind::Tanh => "tanh",
            ActivationKind::Relu => "relu",
        }
    }
}

impl FromStr for ActivationKind {
    type Err = EkfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "logistic" => Ok(ActivationKind::Logistic),
            "tanh" => Ok(ActivationKind::Tanh),
            "relu" => Ok(ActivationKind::Relu),
            other => Err(EkfError::Configuration(format!(
                "activation must be 'logistic', 'tanh', or 'relu', got '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for ActivationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn parses_known_tags() {
        assert_eq!("logistic".parse::<ActivationKind>(), Ok(ActivationKind::Logistic));
        assert_eq!("tanh".parse::<ActivationKind>(), Ok(ActivationKind::Tanh));
        assert_eq!("relu".parse::<ActivationKind>(), Ok(ActivationKind::Relu));
    }

    #[test]
    fn rejects_unknown_tag() {
        let err = "softplus".parse::<ActivationKind>().unwrap_err();
        assert!(matches!(err, EkfError::Configuration(_)));
    }

    #[test]
    fn derivative_matches_numeric_slope() {
        let h = 1e-6;
        for kind in [ActivationKind::Logistic, ActivationKind::Tanh] {
            let act = kind.resolve();
            for &x in &[-2.0, -0.3, 0.0, 0.7, 1.9] {
                let numeric = (act.activate(x + h) - act.activate(x - h)) / (2.0 * h);
                assert_abs_diff_eq!(act.derivative(act.activate(x)), numeric, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn relu_slope_from_output() {
        let act = ActivationKind::Relu.resolve();
        assert_eq!(act.activate(-1.5), 0.0);
        assert_eq!(act.activate(2.5), 2.5);
        assert_eq!(act.derivative(0.0), 0.0);
        assert_eq!(act.derivative(2.5), 1.0);
    }
}
