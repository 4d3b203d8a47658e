use nalgebra::DMatrix;
use ndarray::prelude::*;

use crate::error::{EkfError, Result};

/// A covariance or noise matrix as supplied by the caller: either a scalar
/// to be broadcast onto the diagonal, or an explicit square matrix.
#[derive(Debug, Clone, PartialEq)]
pub enum MatrixInit {
    Scalar(f64),
    Matrix(Array2<f64>),
}

impl From<f64> for MatrixInit {
    fn from(v: f64) -> Self {
        MatrixInit::Scalar(v)
    }
}

impl From<Array2<f64>> for MatrixInit {
    fn from(m: Array2<f64>) -> Self {
        MatrixInit::Matrix(m)
    }
}

/// Turn an optional caller matrix into an `n x n` array.
///
/// `None` stays `None` so the caller can pick a default or fail.
pub fn resolve(m: Option<&MatrixInit>, n: usize, name: &str) -> Result<Option<Array2<f64>>> {
    let resolved = match m {
        None => return Ok(None),
        Some(MatrixInit::Scalar(v)) => *v * Array2::<f64>::eye(n),
        Some(MatrixInit::Matrix(m)) => {
            if m.dim() != (n, n) {
                return Err(EkfError::Shape(format!(
                    "{} must be a float scalar or ({} by {}) array, got {:?}",
                    name,
                    n,
                    n,
                    m.shape()
                )));
            }
            m.to_owned()
        }
    };
    if !resolved.iter().all(|v| v.is_finite()) {
        return Err(EkfError::Configuration(format!("{} must contain only finite values", name)));
    }
    Ok(Some(resolved))
}

fn to_dmatrix(a: &ArrayView2<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(a.nrows(), a.ncols(), |i, j| a[[i, j]])
}

fn to_array(m: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

/// Numerical rank from the singular values, with numpy's
/// `max(sigma) * max(rows, cols) * eps` cutoff.
pub fn rank(a: &ArrayView2<f64>) -> usize {
    if a.is_empty() {
        return 0;
    }
    let svd = to_dmatrix(a).svd(false, false);
    let tol = svd.singular_values.max() * a.nrows().max(a.ncols()) as f64 * f64::EPSILON;
    svd.rank(tol)
}

/// `a . s^-1`, computed by solving `s^T x = a^T`.
///
/// A symmetric positive definite `s` goes through Cholesky, anything else
/// through LU. Fails with `SingularMatrix` when neither yields a finite result.
pub fn mul_inverse(a: &ArrayView2<f64>, s: &ArrayView2<f64>) -> Result<Array2<f64>> {
    let n = s.nrows();
    if s.ncols() != n || a.ncols() != n {
        return Err(EkfError::Shape(format!(
            "cannot multiply {:?} by the inverse of {:?}",
            a.shape(),
            s.shape()
        )));
    }
    let st = to_dmatrix(&s.t());
    let rhs = to_dmatrix(&a.t());
    let chol = if is_symmetric(s, 0.0) {
        st.clone().cholesky().map(|c| c.solve(&rhs))
    } else {
        None
    };
    let x = chol
        .or_else(|| st.lu().solve(&rhs))
        .filter(|x| x.iter().all(|v| v.is_finite()))
        .ok_or(EkfError::SingularMatrix { dim: n })?;
    Ok(to_array(&x.transpose()))
}

/// Replace `a` with `(a + a^T) / 2`.
pub fn symmetrize(a: &mut Array2<f64>) {
    let n = a.nrows();
    for i in 0..n {
        for j in i + 1..n {
            let avg = 0.5 * (a[[i, j]] + a[[j, i]]);
            a[[i, j]] = avg;
            a[[j, i]] = avg;
        }
    }
}

pub fn is_symmetric(a: &ArrayView2<f64>, tol: f64) -> bool {
    if a.nrows() != a.ncols() {
        return false;
    }
    let n = a.nrows();
    (0..n).all(|i| (i + 1..n).all(|j| (a[[i, j]] - a[[j, i]]).abs() <= tol))
}
