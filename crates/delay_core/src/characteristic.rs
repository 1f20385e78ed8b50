//! The characteristic matrix of a linearized constant-delay system.
//!
//! ```text
//! Δ(λ) = λI − J0 − Σ exp(−λ τ_i) Jd[i]
//! ```
//!
//! `λ` is an eigenvalue of the linearization exactly when `Δ(λ)` is
//! singular; the equilibrium is stable when all such `λ` lie in the open left
//! half-plane. Nothing here searches for roots: these are the primitives an
//! external eigenvalue solver calls.

use crate::autodiff::Differentiator;
use crate::error::DelayError;
use crate::jacobian::{jacobian, JacobianBundle};
use crate::problem::{DelayEquilibriumProblem, ParamLens};
use crate::traits::DelayVectorField;
use anyhow::{bail, Result};
use nalgebra::{DMatrix, DVector};
use num_complex::Complex;

fn complexify(matrix: &DMatrix<f64>) -> DMatrix<Complex<f64>> {
    matrix.map(|v| Complex::new(v, 0.0))
}

impl JacobianBundle {
    /// Every `jd` block must have its delay; a bundle built by hand or
    /// deserialized may not.
    fn ensure_delay_slots(&self) -> Result<()> {
        if self.jd.len() != self.delays.len() {
            bail!(DelayError::DelayFunctionLength {
                expected: self.jd.len(),
                got: self.delays.len(),
            });
        }
        Ok(())
    }

    /// `exp(−λ τ_i)` for every delay slot.
    fn delay_weights(&self, lambda: Complex<f64>) -> impl Iterator<Item = Complex<f64>> + '_ {
        self.delays.iter().map(move |&tau| (-lambda * tau).exp())
    }

    /// Applies `Δ(λ)` to `v` without forming the matrix.
    pub fn apply_characteristic(
        &self,
        v: &DVector<Complex<f64>>,
        lambda: Complex<f64>,
    ) -> Result<DVector<Complex<f64>>> {
        self.ensure_delay_slots()?;
        if v.len() != self.dimension() {
            bail!(DelayError::StateDimension {
                context: "Characteristic vector",
                expected: self.dimension(),
                got: v.len(),
            });
        }
        let mut result = v * lambda - complexify(&self.j0) * v;
        for (block, weight) in self.jd.iter().zip(self.delay_weights(lambda)) {
            result -= (complexify(block) * v) * weight;
        }
        Ok(result)
    }

    /// The full matrix `Δ(λ)`.
    pub fn characteristic_matrix(&self, lambda: Complex<f64>) -> Result<DMatrix<Complex<f64>>> {
        self.ensure_delay_slots()?;
        let n = self.dimension();
        let mut delta = DMatrix::from_diagonal_element(n, n, lambda) - complexify(&self.j0);
        for (block, weight) in self.jd.iter().zip(self.delay_weights(lambda)) {
            delta -= complexify(block) * weight;
        }
        Ok(delta)
    }

    /// `dΔ/dλ = I + Σ τ_i exp(−λ τ_i) Jd[i]`, as needed by Newton-type
    /// solvers on the characteristic equation.
    pub fn characteristic_derivative(
        &self,
        lambda: Complex<f64>,
    ) -> Result<DMatrix<Complex<f64>>> {
        self.ensure_delay_slots()?;
        let n = self.dimension();
        let mut derivative = DMatrix::identity(n, n);
        for ((block, weight), &tau) in self
            .jd
            .iter()
            .zip(self.delay_weights(lambda))
            .zip(&self.delays)
        {
            derivative += complexify(block) * (weight * tau);
        }
        Ok(derivative)
    }
}

/// `Δ(λ)v` at `(x, params)`, from a freshly assembled bundle.
pub fn delta<S, L, D>(
    problem: &DelayEquilibriumProblem<S, L, D>,
    x: &DVector<f64>,
    params: &[f64],
    v: &DVector<Complex<f64>>,
    lambda: Complex<f64>,
) -> Result<DVector<Complex<f64>>>
where
    S: DelayVectorField,
    L: ParamLens,
    D: Differentiator,
{
    jacobian(problem, x, params)?.apply_characteristic(v, lambda)
}

/// `Δ(λ)` at `(x, params)`, from a freshly assembled bundle.
pub fn characteristic_matrix<S, L, D>(
    problem: &DelayEquilibriumProblem<S, L, D>,
    x: &DVector<f64>,
    params: &[f64],
    lambda: Complex<f64>,
) -> Result<DMatrix<Complex<f64>>>
where
    S: DelayVectorField,
    L: ParamLens,
    D: Differentiator,
{
    jacobian(problem, x, params)?.characteristic_matrix(lambda)
}
