//! Adapter exposing a delay equilibrium problem to a pseudo-arclength
//! continuation engine.
//!
//! The engine works on the augmented state `[p, x]`, where `p` is the value
//! selected by the problem's lens.

use crate::autodiff::Differentiator;
use crate::error::DelayError;
use crate::jacobian::{ensure_state, residual};
use crate::problem::{DelayEquilibriumProblem, ParamLens};
use crate::traits::{lift, DelayVectorField, Scalar, VectorFunction};
use anyhow::{bail, Context, Result};
use nalgebra::{DMatrix, DVector};

/// Core interface implemented by any system that can be continued via PALC.
pub trait ContinuationProblem {
    /// Number of state variables (excluding the continuation parameter).
    fn dimension(&self) -> usize;

    /// Evaluate the residual F(aug_state) and write into `out`.
    fn residual(&mut self, aug_state: &DVector<f64>, out: &mut DVector<f64>) -> Result<()>;

    /// Compute the extended Jacobian (derivative of F w.r.t. [p, x]).
    fn extended_jacobian(&mut self, aug_state: &DVector<f64>) -> Result<DMatrix<f64>>;
}

/// `q -> F(x, [x; N], lens.set(params, q))`
struct ParamSection<'a, S, L> {
    field: &'a S,
    state: &'a [f64],
    params: &'a [f64],
    lens: &'a L,
}

impl<S: DelayVectorField, L: ParamLens> VectorFunction for ParamSection<'_, S, L> {
    fn output_dimension(&self) -> usize {
        self.field.dimension()
    }

    fn eval<T: Scalar>(&self, z: &[T], out: &mut [T]) {
        let x: Vec<T> = self.state.iter().map(|&v| lift(v)).collect();
        let xd = vec![x.clone(); self.field.delay_count()];
        let params: Vec<T> = self.params.iter().map(|&v| lift(v)).collect();
        // `param_derivative` checked that the lens can write into these parameters.
        match self.lens.set(&params, z[0]) {
            Ok(params) => self.field.apply(&x, &xd, &params, out),
            Err(_) => out.fill(T::nan()),
        }
    }
}

pub struct DelayContinuationProblem<'a, S, L, D> {
    problem: &'a DelayEquilibriumProblem<S, L, D>,
}

impl<'a, S, L, D> DelayContinuationProblem<'a, S, L, D>
where
    S: DelayVectorField,
    L: ParamLens,
    D: Differentiator,
{
    pub fn new(problem: &'a DelayEquilibriumProblem<S, L, D>) -> Self {
        Self { problem }
    }

    /// `[lens value, initial state]`, the starting point of a branch.
    pub fn initial_aug_state(&self) -> Result<DVector<f64>> {
        let state = self.problem.initial_state();
        let mut aug = DVector::zeros(state.len() + 1);
        aug[0] = self.problem.param_value()?;
        aug.rows_mut(1, state.len()).copy_from(state);
        Ok(aug)
    }

    fn split(&self, aug_state: &DVector<f64>) -> Result<(Vec<f64>, DVector<f64>)> {
        let dim = self.problem.dimension();
        if aug_state.len() != dim + 1 {
            bail!(DelayError::StateDimension {
                context: "Augmented state",
                expected: dim + 1,
                got: aug_state.len(),
            });
        }
        let params = self.problem.lens().set(self.problem.params(), aug_state[0])?;
        let state = aug_state.rows(1, dim).into_owned();
        Ok((params, state))
    }

    /// Derivative of the residual with respect to the lens parameter.
    pub fn param_derivative(&self, x: &DVector<f64>, params: &[f64]) -> Result<DVector<f64>> {
        ensure_state(self.problem, x)?;
        let lens = self.problem.lens();
        let value = lens.get(params)?;
        lens.set(params, value)
            .context("Parameter lens cannot write the continuation parameter.")?;
        let section = ParamSection {
            field: self.problem.field().field(),
            state: x.as_slice(),
            params,
            lens,
        };
        self.problem
            .field()
            .differentiator()
            .directional_derivative(&section, &[value], &[1.0])
    }
}

impl<S, L, D> ContinuationProblem for DelayContinuationProblem<'_, S, L, D>
where
    S: DelayVectorField,
    L: ParamLens,
    D: Differentiator,
{
    fn dimension(&self) -> usize {
        self.problem.dimension()
    }

    fn residual(&mut self, aug_state: &DVector<f64>, out: &mut DVector<f64>) -> Result<()> {
        let dim = self.dimension();
        if out.len() != dim {
            bail!("Residual buffer has incorrect dimension");
        }
        let (params, state) = self.split(aug_state)?;
        out.copy_from(&residual(self.problem, &state, &params)?);
        Ok(())
    }

    fn extended_jacobian(&mut self, aug_state: &DVector<f64>) -> Result<DMatrix<f64>> {
        let dim = self.dimension();
        let (params, state) = self.split(aug_state)?;

        let mut j_ext = DMatrix::zeros(dim, dim + 1);
        j_ext
            .column_mut(0)
            .copy_from(&self.param_derivative(&state, &params)?);
        j_ext
            .columns_mut(1, dim)
            .copy_from(&self.problem.field().jacobian(&state, &params)?);
        Ok(j_ext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::DifferentiableVectorField;
    use crate::problem::{IndexLens, ProblemCallbacks};
    use approx::assert_relative_eq;

    /// Delayed logistic equation, x' = r x (1 − x(t − τ) / k).
    struct Hutchinson;

    impl DelayVectorField for Hutchinson {
        fn dimension(&self) -> usize {
            1
        }

        fn delay_count(&self) -> usize {
            1
        }

        fn apply<T: Scalar>(&self, x: &[T], xd: &[Vec<T>], p: &[T], out: &mut [T]) {
            let (r, k) = (p[0], p[1]);
            out[0] = r * x[0] * (T::one() - xd[0][0] / k);
        }
    }

    fn problem() -> DelayEquilibriumProblem<Hutchinson> {
        DelayEquilibriumProblem::new(
            DifferentiableVectorField::from_field(Hutchinson),
            vec![1.2],
            DVector::from_element(1, 2.0),
            vec![0.9, 2.0],
            IndexLens(1),
            ProblemCallbacks::default(),
        )
        .expect("problem should build")
    }

    #[test]
    fn initial_aug_state_places_param_first() {
        let problem = problem();
        let adapter = DelayContinuationProblem::new(&problem);
        let aug = adapter.initial_aug_state().unwrap();
        assert_eq!(aug.as_slice(), &[2.0, 2.0]);
    }

    #[test]
    fn residual_uses_lens_value_from_aug_state() {
        let problem = problem();
        let mut adapter = DelayContinuationProblem::new(&problem);
        let aug = DVector::from_vec(vec![4.0, 2.0]);
        let mut out = DVector::zeros(1);
        adapter.residual(&aug, &mut out).unwrap();
        assert_relative_eq!(out[0], 0.9 * 2.0 * (1.0 - 2.0 / 4.0), epsilon = 1e-15);

        // The stored parameters are untouched.
        assert_eq!(problem.params(), &[0.9, 2.0]);
    }

    #[test]
    fn extended_jacobian_matches_finite_differences() {
        let problem = problem();
        let mut adapter = DelayContinuationProblem::new(&problem);
        let aug = DVector::from_vec(vec![2.5, 1.7]);
        let j_ext = adapter.extended_jacobian(&aug).unwrap();
        assert_eq!(j_ext.shape(), (1, 2));

        let h = 1e-6;
        for col in 0..2 {
            let mut plus = aug.clone();
            let mut minus = aug.clone();
            plus[col] += h;
            minus[col] -= h;
            let (mut f_plus, mut f_minus) = (DVector::zeros(1), DVector::zeros(1));
            adapter.residual(&plus, &mut f_plus).unwrap();
            adapter.residual(&minus, &mut f_minus).unwrap();
            let fd = (f_plus[0] - f_minus[0]) / (2.0 * h);
            assert_relative_eq!(j_ext[(0, col)], fd, epsilon = 1e-7);
        }
    }

    #[test]
    fn rejects_misshapen_aug_state() {
        let problem = problem();
        let mut adapter = DelayContinuationProblem::new(&problem);
        let err = adapter
            .extended_jacobian(&DVector::zeros(3))
            .expect_err("expected dimension error");
        assert!(format!("{err}").contains("Augmented state dimension mismatch"));
    }

    /// Reads `params[1]` but refuses every write.
    struct ReadOnlyLens;

    impl ParamLens for ReadOnlyLens {
        fn get(&self, params: &[f64]) -> Result<f64> {
            Ok(params[1])
        }

        fn set<T: Scalar>(&self, _params: &[T], _value: T) -> Result<Vec<T>> {
            bail!("read-only lens")
        }
    }

    #[test]
    fn param_derivative_reports_failing_lens_write() {
        let problem = DelayEquilibriumProblem::new(
            DifferentiableVectorField::from_field(Hutchinson),
            vec![1.2],
            DVector::from_element(1, 2.0),
            vec![0.9, 2.0],
            ReadOnlyLens,
            ProblemCallbacks::default(),
        )
        .expect("problem should build");
        let adapter = DelayContinuationProblem::new(&problem);
        let err = adapter
            .param_derivative(&DVector::from_element(1, 1.5), &[0.9, 2.0])
            .expect_err("expected lens error");
        let message = format!("{err:#}");
        assert!(message.contains("cannot write the continuation parameter"), "{message}");
        assert!(message.contains("read-only lens"), "{message}");
    }

    #[test]
    fn param_derivative_rejects_wrong_state_length() {
        let problem = problem();
        let adapter = DelayContinuationProblem::new(&problem);
        let err = adapter
            .param_derivative(&DVector::zeros(3), &[0.9, 2.0])
            .expect_err("expected dimension error");
        assert!(format!("{err}").contains("State dimension mismatch. Expected 1, got 3."));
    }
}
