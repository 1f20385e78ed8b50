//! The immutable problem definition shared by every linearization call.

use crate::autodiff::{Differentiator, ForwardDiff};
use crate::error::DelayError;
use crate::field::DifferentiableVectorField;
use crate::traits::{DelayVectorField, Scalar};
use anyhow::{bail, Context, Result};
use nalgebra::DVector;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// `(delays0, p) -> delay magnitudes`, one per slot.
pub type DelayFn = Arc<dyn Fn(&[f64], &[f64]) -> Vec<f64> + Send + Sync>;

/// `(x, p) -> named quantities` stored by the engine for each branch point.
pub type RecordFn = Arc<dyn Fn(&DVector<f64>, &[f64]) -> Vec<(String, f64)> + Send + Sync>;

/// `(x, p) -> coordinates` handed to the engine's display layer.
pub type PlotFn = Arc<dyn Fn(&DVector<f64>, &[f64]) -> Vec<f64> + Send + Sync>;

/// Selects the parameter varied during continuation.
pub trait ParamLens: Send + Sync {
    fn get(&self, params: &[f64]) -> Result<f64>;

    /// Returns a copy of `params` with the selected entry replaced.
    /// Generic so the entry can carry a dual-number tangent.
    fn set<T: Scalar>(&self, params: &[T], value: T) -> Result<Vec<T>>;
}

/// Selects `params[index]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexLens(pub usize);

impl ParamLens for IndexLens {
    fn get(&self, params: &[f64]) -> Result<f64> {
        params.get(self.0).copied().ok_or_else(|| {
            DelayError::ParamIndex {
                index: self.0,
                len: params.len(),
            }
            .into()
        })
    }

    fn set<T: Scalar>(&self, params: &[T], value: T) -> Result<Vec<T>> {
        if self.0 >= params.len() {
            bail!(DelayError::ParamIndex {
                index: self.0,
                len: params.len(),
            });
        }
        let mut updated = params.to_vec();
        updated[self.0] = value;
        Ok(updated)
    }
}

fn ensure_valid_delays(delays: &[f64]) -> Result<()> {
    if let Some((slot, &value)) = delays
        .iter()
        .enumerate()
        .find(|(_, tau)| !tau.is_finite() || **tau < 0.0)
    {
        bail!(DelayError::InvalidDelay { slot, value });
    }
    Ok(())
}

/// Callbacks stored on the problem. `Default` supplies explicit defaults:
/// constant delays, the state norm as the recorded quantity, and the raw
/// state as plot coordinates.
#[derive(Clone)]
pub struct ProblemCallbacks {
    pub delay_fn: DelayFn,
    pub record: RecordFn,
    pub plot: PlotFn,
}

impl Default for ProblemCallbacks {
    fn default() -> Self {
        Self {
            delay_fn: Arc::new(|delays0: &[f64], _p: &[f64]| delays0.to_vec()),
            record: Arc::new(|x: &DVector<f64>, _p: &[f64]| {
                vec![("norm".to_string(), x.norm())]
            }),
            plot: Arc::new(|x: &DVector<f64>, _p: &[f64]| x.iter().copied().collect()),
        }
    }
}

impl ProblemCallbacks {
    pub fn with_delay_fn<F>(mut self, delay_fn: F) -> Self
    where
        F: Fn(&[f64], &[f64]) -> Vec<f64> + Send + Sync + 'static,
    {
        self.delay_fn = Arc::new(delay_fn);
        self
    }

    pub fn with_record<F>(mut self, record: F) -> Self
    where
        F: Fn(&DVector<f64>, &[f64]) -> Vec<(String, f64)> + Send + Sync + 'static,
    {
        self.record = Arc::new(record);
        self
    }

    pub fn with_plot<F>(mut self, plot: F) -> Self
    where
        F: Fn(&DVector<f64>, &[f64]) -> Vec<f64> + Send + Sync + 'static,
    {
        self.plot = Arc::new(plot);
        self
    }
}

impl fmt::Debug for ProblemCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProblemCallbacks")
    }
}

/// Equilibrium problem for a constant-delay system.
///
/// Built once per analysis run and never mutated afterwards; all
/// linearization entry points take it by shared reference.
pub struct DelayEquilibriumProblem<S, L = IndexLens, D = ForwardDiff> {
    field: DifferentiableVectorField<S, D>,
    delays0: Vec<f64>,
    initial_state: DVector<f64>,
    params: Vec<f64>,
    lens: L,
    callbacks: ProblemCallbacks,
}

impl<S, L, D> DelayEquilibriumProblem<S, L, D>
where
    S: DelayVectorField,
    L: ParamLens,
    D: Differentiator,
{
    /// Validates the configuration and builds the problem.
    ///
    /// Fails if the field's delayed-argument count, `delays0` and the delay
    /// function output (evaluated at `params`) disagree, if a delay is
    /// negative or non-finite, or if `initial_state` has the wrong length.
    pub fn new(
        field: DifferentiableVectorField<S, D>,
        delays0: Vec<f64>,
        initial_state: DVector<f64>,
        params: Vec<f64>,
        lens: L,
        callbacks: ProblemCallbacks,
    ) -> Result<Self> {
        let dim = field.dimension();
        if dim == 0 {
            bail!(DelayError::EmptySystem);
        }
        if initial_state.len() != dim {
            bail!(DelayError::StateDimension {
                context: "Initial state",
                expected: dim,
                got: initial_state.len(),
            });
        }
        if field.delay_count() != delays0.len() {
            bail!(DelayError::DelayCountMismatch {
                field: field.delay_count(),
                configured: delays0.len(),
            });
        }

        let delays = (callbacks.delay_fn)(&delays0, &params);
        if delays.len() != delays0.len() {
            bail!(DelayError::DelayFunctionLength {
                expected: delays0.len(),
                got: delays.len(),
            });
        }
        ensure_valid_delays(&delays)?;
        lens.get(&params)
            .context("Parameter lens does not select an entry of the parameter vector.")?;

        debug!(
            dimension = dim,
            delays = delays0.len(),
            symmetric = field.settings().is_symmetric,
            "built delay equilibrium problem"
        );

        Ok(Self {
            field,
            delays0,
            initial_state,
            params,
            lens,
            callbacks,
        })
    }

    pub fn field(&self) -> &DifferentiableVectorField<S, D> {
        &self.field
    }

    pub fn dimension(&self) -> usize {
        self.field.dimension()
    }

    pub fn delay_count(&self) -> usize {
        self.delays0.len()
    }

    pub fn delays0(&self) -> &[f64] {
        &self.delays0
    }

    pub fn initial_state(&self) -> &DVector<f64> {
        &self.initial_state
    }

    pub fn params(&self) -> &[f64] {
        &self.params
    }

    pub fn lens(&self) -> &L {
        &self.lens
    }

    /// Current value of the continuation parameter.
    pub fn param_value(&self) -> Result<f64> {
        self.lens.get(&self.params)
    }

    /// Evaluates the delay function at `params`, checking its length and
    /// that every delay is finite and non-negative.
    pub fn delays(&self, params: &[f64]) -> Result<Vec<f64>> {
        let delays = (self.callbacks.delay_fn)(&self.delays0, params);
        if delays.len() != self.delay_count() {
            bail!(DelayError::DelayFunctionLength {
                expected: self.delay_count(),
                got: delays.len(),
            });
        }
        ensure_valid_delays(&delays)?;
        Ok(delays)
    }

    pub fn record(&self) -> &RecordFn {
        &self.callbacks.record
    }

    pub fn plot(&self) -> &PlotFn {
        &self.callbacks.plot
    }
}

impl<S, L: fmt::Debug, D> fmt::Debug for DelayEquilibriumProblem<S, L, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelayEquilibriumProblem")
            .field("delays0", &self.delays0)
            .field("initial_state", &self.initial_state)
            .field("params", &self.params)
            .field("lens", &self.lens)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// x' = p0 - x - p1 * x(t - τ1) * x(t - τ2)
    struct TwoDelays;

    impl DelayVectorField for TwoDelays {
        fn dimension(&self) -> usize {
            1
        }

        fn delay_count(&self) -> usize {
            2
        }

        fn apply<T: Scalar>(&self, x: &[T], xd: &[Vec<T>], params: &[T], out: &mut [T]) {
            out[0] = params[0] - x[0] - params[1] * xd[0][0] * xd[1][0];
        }
    }

    fn assert_err_contains<T: fmt::Debug>(result: Result<T>, needle: &str) {
        let err = result.expect_err("expected error");
        let message = format!("{err:#}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    fn assert_err_is<T: fmt::Debug>(result: Result<T>, expected: DelayError) {
        let err = result.expect_err("expected error");
        assert_eq!(err.downcast_ref::<DelayError>(), Some(&expected), "{err}");
    }

    fn build(
        delays0: Vec<f64>,
        params: Vec<f64>,
        callbacks: ProblemCallbacks,
    ) -> Result<DelayEquilibriumProblem<TwoDelays>> {
        DelayEquilibriumProblem::new(
            DifferentiableVectorField::from_field(TwoDelays),
            delays0,
            DVector::from_element(1, 0.5),
            params,
            IndexLens(0),
            callbacks,
        )
    }

    #[test]
    fn accessors_expose_construction_values() {
        let problem = build(vec![1.0, 2.5], vec![0.3, 2.0], ProblemCallbacks::default())
            .expect("problem should build");
        assert_eq!(problem.dimension(), 1);
        assert_eq!(problem.delay_count(), 2);
        assert_eq!(problem.delays0(), &[1.0, 2.5]);
        assert_eq!(problem.params(), &[0.3, 2.0]);
        assert_eq!(problem.initial_state()[0], 0.5);
        assert_eq!(problem.lens(), &IndexLens(0));
        assert_eq!(problem.param_value().unwrap(), 0.3);
        assert_eq!(problem.delays(&[0.3, 2.0]).unwrap(), vec![1.0, 2.5]);
    }

    #[test]
    fn default_callbacks_record_norm_and_plot_state() {
        let problem = build(vec![1.0, 1.0], vec![0.3, 2.0], ProblemCallbacks::default()).unwrap();
        let x = DVector::from_element(1, -3.0);
        let custom =
            ProblemCallbacks::default().with_record(|x, p| vec![("x0".into(), x[0] + p[0])]);
        assert_eq!((custom.record)(&x, &[1.0]), vec![("x0".to_string(), -2.0)]);
        let record = (problem.record())(&x, problem.params());
        assert_eq!(record, vec![("norm".to_string(), 3.0)]);
        assert_eq!((problem.plot())(&x, problem.params()), vec![-3.0]);
    }

    #[test]
    fn rejects_mismatched_delay_count() {
        assert_err_is(
            build(vec![1.0], vec![0.3, 2.0], ProblemCallbacks::default()),
            DelayError::DelayCountMismatch {
                field: 2,
                configured: 1,
            },
        );
    }

    #[test]
    fn rejects_delay_function_of_wrong_length() {
        let callbacks =
            ProblemCallbacks::default().with_delay_fn(|delays0, _p| delays0[..1].to_vec());
        assert_err_is(
            build(vec![1.0, 2.0], vec![0.3, 2.0], callbacks),
            DelayError::DelayFunctionLength {
                expected: 2,
                got: 1,
            },
        );
    }

    #[test]
    fn rejects_negative_delay() {
        assert_err_is(
            build(vec![1.0, -0.5], vec![0.3, 2.0], ProblemCallbacks::default()),
            DelayError::InvalidDelay {
                slot: 1,
                value: -0.5,
            },
        );
    }

    #[test]
    fn rejects_wrong_initial_state_length() {
        let result = DelayEquilibriumProblem::new(
            DifferentiableVectorField::from_field(TwoDelays),
            vec![1.0, 1.0],
            DVector::zeros(3),
            vec![0.3, 2.0],
            IndexLens(0),
            ProblemCallbacks::default(),
        );
        assert_err_is(
            result,
            DelayError::StateDimension {
                context: "Initial state",
                expected: 1,
                got: 3,
            },
        );
    }

    #[test]
    fn rejects_lens_outside_parameter_vector() {
        let result = DelayEquilibriumProblem::new(
            DifferentiableVectorField::from_field(TwoDelays),
            vec![1.0, 1.0],
            DVector::zeros(1),
            vec![0.3, 2.0],
            IndexLens(5),
            ProblemCallbacks::default(),
        );
        assert_err_contains(result, "Parameter index 5 out of range");
    }

    #[test]
    fn parameter_dependent_delays_are_reevaluated() {
        let callbacks = ProblemCallbacks::default()
            .with_delay_fn(|delays0, p| delays0.iter().map(|d| d * p[1]).collect());
        let problem = build(vec![1.0, 0.5], vec![0.3, 2.0], callbacks).unwrap();
        assert_eq!(problem.delays(&[0.3, 4.0]).unwrap(), vec![4.0, 2.0]);
    }

    #[test]
    fn index_lens_sets_without_mutating_input() {
        let params = vec![1.0, 2.0, 3.0];
        let updated = IndexLens(1).set(&params, 9.0).unwrap();
        assert_eq!(updated, vec![1.0, 9.0, 3.0]);
        assert_eq!(params, vec![1.0, 2.0, 3.0]);
        assert!(IndexLens(3).set(&params, 0.0).is_err());
    }

    #[test]
    fn rejects_zero_dimensional_field() {
        struct Empty;

        impl DelayVectorField for Empty {
            fn dimension(&self) -> usize {
                0
            }

            fn delay_count(&self) -> usize {
                1
            }

            fn apply<T: Scalar>(&self, _x: &[T], _xd: &[Vec<T>], _p: &[T], _out: &mut [T]) {}
        }

        let result = DelayEquilibriumProblem::new(
            DifferentiableVectorField::from_field(Empty),
            vec![1.0],
            DVector::zeros(0),
            vec![0.3],
            IndexLens(0),
            ProblemCallbacks::default(),
        );
        assert_err_is(result, DelayError::EmptySystem);
    }

    #[test]
    fn rejects_non_finite_delays() {
        for bad in [f64::INFINITY, f64::NEG_INFINITY] {
            assert_err_is(
                build(vec![bad, 1.0], vec![0.3, 2.0], ProblemCallbacks::default()),
                DelayError::InvalidDelay {
                    slot: 0,
                    value: bad,
                },
            );
        }
        // NaN never compares equal, so check the message instead.
        assert_err_contains(
            build(vec![1.0, f64::NAN], vec![0.3, 2.0], ProblemCallbacks::default()),
            "Delay 1 must be finite and non-negative",
        );
    }

    #[test]
    fn delays_drifting_negative_are_rejected_per_call() {
        let callbacks = ProblemCallbacks::default()
            .with_delay_fn(|delays0, p| delays0.iter().map(|d| d * p[1]).collect());
        let problem = build(vec![1.0, 0.5], vec![0.3, 2.0], callbacks).unwrap();
        assert_err_is(
            problem.delays(&[0.3, -2.0]),
            DelayError::InvalidDelay {
                slot: 0,
                value: -2.0,
            },
        );
    }
}
