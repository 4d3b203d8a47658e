use ndarray::Array2;
use numpy::{IntoPyArray, PyArray1, PyArray2, PyReadonlyArray1, PyReadonlyArray2};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use crate::error::EkfError;
use crate::matrix::MatrixInit;
use crate::network::{NetworkConfig, DEFAULT_WEIGHT_SCALE, SEED};
use crate::trainer::{EkfTrainer, TrainOptions};

impl From<EkfError> for PyErr {
    fn from(err: EkfError) -> PyErr {
        PyValueError::new_err(err.to_string())
    }
}

/// Accept either a float or a 2-D float array.
fn matrix_arg(arg: Option<&PyAny>) -> PyResult<Option<MatrixInit>> {
    let Some(arg) = arg else {
        return Ok(None);
    };
    if let Ok(v) = arg.extract::<f64>() {
        return Ok(Some(MatrixInit::Scalar(v)));
    }
    let m: PyReadonlyArray2<f64> = arg.extract()?;
    Ok(Some(MatrixInit::Matrix(m.as_array().to_owned())))
}

#[pymodule]
fn ekf_network(_: Python, m: &PyModule) -> PyResult<()> {
    #[pyclass(name = "EKF")]
    struct Ekf {
        trainer: Box<EkfTrainer>,
    }

    #[pymethods]
    impl Ekf {
        #[new]
        #[pyo3(signature = (n_input, n_output, n_hidden, activ, weight_scale = DEFAULT_WEIGHT_SCALE, seed = SEED))]
        fn py_new(
            n_input: usize,
            n_output: usize,
            n_hidden: usize,
            activ: &str,
            weight_scale: f64,
            seed: u64,
        ) -> PyResult<Self> {
            let config = NetworkConfig::new(n_input, n_output, n_hidden, activ.parse()?)
                .with_weight_scale(weight_scale)
                .with_seed(seed);
            Ok(Self {
                trainer: Box::new(EkfTrainer::new(&config)?),
            })
        }

        #[getter]
        fn num_weights(&self) -> usize {
            self.trainer.network().num_weights()
        }

        #[getter]
        fn activ(&self) -> &'static str {
            self.trainer.network().activation_kind().name()
        }

        #[pyo3(signature = (n_epochs, u, y, p = None, q = None, r = None, step = 1.0))]
        fn train(
            &mut self,
            n_epochs: usize,
            u: PyReadonlyArray2<f64>,
            y: &PyAny,
            p: Option<&PyAny>,
            q: Option<&PyAny>,
            r: Option<&PyAny>,
            step: f64,
        ) -> PyResult<()> {
            let options = TrainOptions {
                p: matrix_arg(p)?,
                q: matrix_arg(q)?,
                r: matrix_arg(r)?,
                step_size: step,
            };
            if let Ok(y) = y.extract::<PyReadonlyArray2<f64>>() {
                self.trainer
                    .train(n_epochs, &u.as_array(), &y.as_array(), &options)?;
            } else {
                let y: PyReadonlyArray1<f64> = y.extract()?;
                self.trainer
                    .train_column(n_epochs, &u.as_array(), &y.as_array(), &options)?;
            }
            Ok(())
        }

        fn predict<'py>(&self, data: PyReadonlyArray1<f64>, py: Python<'py>) -> PyResult<&'py PyArray1<f64>> {
            let output = self.trainer.predict(&data.as_array())?;
            Ok(output.into_pyarray(py))
        }

        fn predict_batch<'py>(&self, data: PyReadonlyArray2<f64>, py: Python<'py>) -> PyResult<&'py PyArray2<f64>> {
            let output = self.trainer.network().predict_batch(&data.as_array())?;
            Ok(output.into_pyarray(py))
        }

        fn get_weights<'py>(&self, py: Python<'py>) -> (&'py PyArray2<f64>, &'py PyArray2<f64>) {
            let net = self.trainer.network();
            (
                net.hidden_weights().to_owned().into_pyarray(py),
                net.output_weights().to_owned().into_pyarray(py),
            )
        }

        fn set_weights(&mut self, hidden: PyReadonlyArray2<f64>, output: PyReadonlyArray2<f64>) -> PyResult<()> {
            let hidden: Array2<f64> = hidden.as_array().to_owned();
            let output: Array2<f64> = output.as_array().to_owned();
            self.trainer.network_mut().set_weights(hidden, output)?;
            Ok(())
        }

        fn covariance<'py>(&self, py: Python<'py>) -> Option<&'py PyArray2<f64>> {
            let state = self.trainer.state();
            state
                .is_initialized()
                .then(|| state.covariance().to_owned().into_pyarray(py))
        }
    }
    m.add_class::<Ekf>()?;
    Ok(())
}
