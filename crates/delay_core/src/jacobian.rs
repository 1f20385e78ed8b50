//! Residual and delay-aware Jacobian assembly at an equilibrium candidate.
//!
//! At a constant-delay equilibrium every delayed replica equals the
//! instantaneous state, so the residual is `F(x, [x; N], p)`. Its ordinary
//! Jacobian splits by the chain rule into one block for the instantaneous
//! argument and one block per delay slot:
//!
//! ```text
//! J_all = J0 + Jd[0] + ... + Jd[N-1]
//! ```
//!
//! The split blocks are the coefficients of the characteristic matrix
//! (see [`crate::characteristic`]).

use crate::autodiff::Differentiator;
use crate::error::DelayError;
use crate::field::{Argument, FieldSection};
use crate::problem::{DelayEquilibriumProblem, ParamLens};
use crate::traits::DelayVectorField;
use anyhow::{bail, Context, Result};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Linearization of a delay equilibrium, recomputed on every call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JacobianBundle {
    /// Derivative with respect to the instantaneous state.
    pub j0: DMatrix<f64>,
    /// Derivative with respect to each delayed replica, in delay-slot order.
    pub jd: Vec<DMatrix<f64>>,
    /// `j0 + Σ jd`
    pub j_all: DMatrix<f64>,
    /// Delay magnitudes evaluated at the call's parameters.
    pub delays: Vec<f64>,
}

impl JacobianBundle {
    pub fn dimension(&self) -> usize {
        self.j0.nrows()
    }

    pub fn delay_count(&self) -> usize {
        self.jd.len()
    }

    /// A new bundle with every block transposed; `self` is left untouched.
    pub fn transpose(&self) -> Self {
        Self {
            j0: self.j0.transpose(),
            jd: self.jd.iter().map(|block| block.transpose()).collect(),
            j_all: self.j_all.transpose(),
            delays: self.delays.clone(),
        }
    }
}

pub(crate) fn ensure_state<S: DelayVectorField, L: ParamLens, D: Differentiator>(
    problem: &DelayEquilibriumProblem<S, L, D>,
    x: &DVector<f64>,
) -> Result<()> {
    if x.len() != problem.dimension() {
        bail!(DelayError::StateDimension {
            context: "State",
            expected: problem.dimension(),
            got: x.len(),
        });
    }
    Ok(())
}

/// Evaluates `F(x, [x, ..., x], p)`.
///
/// `x` is an equilibrium at `params` exactly when this vanishes.
pub fn residual<S, L, D>(
    problem: &DelayEquilibriumProblem<S, L, D>,
    x: &DVector<f64>,
    params: &[f64],
) -> Result<DVector<f64>>
where
    S: DelayVectorField,
    L: ParamLens,
    D: Differentiator,
{
    ensure_state(problem, x)?;
    let xd = vec![x.as_slice().to_vec(); problem.delay_count()];
    let mut out = DVector::zeros(problem.dimension());
    problem
        .field()
        .field()
        .apply(x.as_slice(), &xd, params, out.as_mut_slice());
    Ok(out)
}

/// Assembles `j0`, one `jd` block per delay, their sum, and the delays.
pub fn jacobian<S, L, D>(
    problem: &DelayEquilibriumProblem<S, L, D>,
    x: &DVector<f64>,
    params: &[f64],
) -> Result<JacobianBundle>
where
    S: DelayVectorField,
    L: ParamLens,
    D: Differentiator,
{
    ensure_state(problem, x)?;
    let field = problem.field().field();
    let diff = problem.field().differentiator();
    let base = x.as_slice();

    let j0 = diff
        .jacobian(&FieldSection::new(field, base, params, Argument::Instant), base)
        .context("Failed to differentiate with respect to the instantaneous state.")?;

    let jd = (0..problem.delay_count())
        .map(|slot| {
            let section = FieldSection::new(field, base, params, Argument::Delay(slot));
            diff.jacobian(&section, base)
                .with_context(|| format!("Failed to differentiate with respect to delay {slot}."))
        })
        .collect::<Result<Vec<_>>>()?;

    let delays = problem.delays(params)?;
    let j_all = jd.iter().fold(j0.clone(), |acc, block| acc + block);

    trace!(
        dimension = problem.dimension(),
        delays = ?delays,
        "assembled delay jacobian bundle"
    );

    Ok(JacobianBundle {
        j0,
        jd,
        j_all,
        delays,
    })
}

/// Fresh bundle with every block transposed, for adjoint computations when
/// no closed-form adjoint is available.
pub fn jad<S, L, D>(
    problem: &DelayEquilibriumProblem<S, L, D>,
    x: &DVector<f64>,
    params: &[f64],
) -> Result<JacobianBundle>
where
    S: DelayVectorField,
    L: ParamLens,
    D: Differentiator,
{
    Ok(jacobian(problem, x, params)?.transpose())
}
