//! Differentiable wrapper around a user delay vector field.
//!
//! Every derivative slot is filled at construction: either with the
//! user-supplied closure or with a forward-mode default built from `F`.
//! Defaults linearize the field with all delayed replicas pinned to the
//! instantaneous state, which is the combined (non delay-aware) derivative;
//! the per-delay decomposition lives in [`crate::jacobian`].

use crate::autodiff::{Differentiator, Directional, ForwardDiff};
use crate::error::DelayError;
use crate::multilinear::{BilinearMap, TrilinearMap};
use crate::traits::{lift, DelayVectorField, Scalar, VectorFunction};
use anyhow::{bail, Result};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// `(x, p, dx) -> dF(x, p)[dx]`
pub type DirectionalFn =
    Arc<dyn Fn(&DVector<f64>, &[f64], &DVector<f64>) -> Result<DVector<f64>> + Send + Sync>;

/// `(x, p) -> J(x, p)`
pub type JacobianFn = Arc<dyn Fn(&DVector<f64>, &[f64]) -> Result<DMatrix<f64>> + Send + Sync>;

pub fn directional_fn<F>(f: F) -> DirectionalFn
where
    F: Fn(&DVector<f64>, &[f64], &DVector<f64>) -> Result<DVector<f64>> + Send + Sync + 'static,
{
    Arc::new(f)
}

pub fn jacobian_fn<F>(f: F) -> JacobianFn
where
    F: Fn(&DVector<f64>, &[f64]) -> Result<DMatrix<f64>> + Send + Sync + 'static,
{
    Arc::new(f)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FieldSettings {
    /// Whether the Jacobian is known to be symmetric.
    pub is_symmetric: bool,
    /// Threshold used by downstream singularity tests.
    pub tolerance: f64,
}

impl Default for FieldSettings {
    fn default() -> Self {
        Self {
            is_symmetric: false,
            tolerance: 1e-8,
        }
    }
}

/// Optional closed-form derivatives. Absent entries are derived with AD.
#[derive(Clone, Default)]
pub struct DerivativeOverrides {
    pub d_f: Option<DirectionalFn>,
    pub d_f_adjoint: Option<DirectionalFn>,
    pub jacobian: Option<JacobianFn>,
    pub jacobian_adjoint: Option<JacobianFn>,
    pub d2f: Option<BilinearMap>,
    pub d3f: Option<TrilinearMap>,
}

/// Which argument(s) of `F` receive the differentiation variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Argument {
    /// Only the instantaneous state.
    Instant,
    /// Only the delayed replica in the given slot.
    Delay(usize),
    /// The instantaneous state and every replica together.
    All,
}

/// `z -> F(x(z), xd(z), p)` with the arguments not selected by `wrt`
/// held at `base`.
pub struct FieldSection<'a, S> {
    field: &'a S,
    base: &'a [f64],
    params: &'a [f64],
    wrt: Argument,
}

impl<'a, S: DelayVectorField> FieldSection<'a, S> {
    pub fn new(field: &'a S, base: &'a [f64], params: &'a [f64], wrt: Argument) -> Self {
        Self {
            field,
            base,
            params,
            wrt,
        }
    }

    /// All replicas pinned to the differentiation variable.
    pub fn pinned(field: &'a S, params: &'a [f64]) -> Self {
        Self::new(field, &[], params, Argument::All)
    }
}

impl<S: DelayVectorField> VectorFunction for FieldSection<'_, S> {
    fn output_dimension(&self) -> usize {
        self.field.dimension()
    }

    fn eval<T: Scalar>(&self, z: &[T], out: &mut [T]) {
        let base: Vec<T> = self.base.iter().map(|&v| lift(v)).collect();
        let params: Vec<T> = self.params.iter().map(|&v| lift(v)).collect();
        let slots = self.field.delay_count();

        let (x, xd): (&[T], Vec<Vec<T>>) = match self.wrt {
            Argument::All => (z, vec![z.to_vec(); slots]),
            Argument::Instant => (z, vec![base.clone(); slots]),
            Argument::Delay(slot) => {
                let xd = (0..slots)
                    .map(|i| if i == slot { z.to_vec() } else { base.clone() })
                    .collect();
                (base.as_slice(), xd)
            }
        };
        self.field.apply(x, &xd, &params, out);
    }
}

fn ensure_len(len: usize, expected: usize, context: &'static str) -> Result<()> {
    if len != expected {
        bail!(DelayError::StateDimension {
            context,
            expected,
            got: len,
        });
    }
    Ok(())
}

/// A delay vector field together with its derivative operators.
pub struct DifferentiableVectorField<S, D = ForwardDiff> {
    field: Arc<S>,
    diff: D,
    d_f: DirectionalFn,
    d_f_adjoint: Option<DirectionalFn>,
    jacobian: JacobianFn,
    jacobian_adjoint: Option<JacobianFn>,
    d2f: BilinearMap,
    d3f: TrilinearMap,
    settings: FieldSettings,
}

impl<S> DifferentiableVectorField<S, ForwardDiff>
where
    S: DelayVectorField + Send + Sync + 'static,
{
    pub fn new(field: S, overrides: DerivativeOverrides, settings: FieldSettings) -> Self {
        Self::with_differentiator(field, ForwardDiff, overrides, settings)
    }

    /// Every derivative generated by forward-mode AD, default settings.
    pub fn from_field(field: S) -> Self {
        Self::new(field, DerivativeOverrides::default(), FieldSettings::default())
    }
}

impl<S, D> DifferentiableVectorField<S, D>
where
    S: DelayVectorField + Send + Sync + 'static,
    D: Differentiator,
{
    pub fn with_differentiator(
        field: S,
        diff: D,
        overrides: DerivativeOverrides,
        settings: FieldSettings,
    ) -> Self {
        let field = Arc::new(field);
        let DerivativeOverrides {
            d_f,
            d_f_adjoint,
            jacobian,
            jacobian_adjoint,
            d2f,
            d3f,
        } = overrides;

        let d_f = d_f.unwrap_or_else(|| {
            let (f, d) = (Arc::clone(&field), diff.clone());
            directional_fn(move |x, p, dx| {
                let pinned = FieldSection::pinned(f.as_ref(), p);
                d.directional_derivative(&pinned, x.as_slice(), dx.as_slice())
            })
        });

        let jacobian = jacobian.unwrap_or_else(|| {
            let (f, d) = (Arc::clone(&field), diff.clone());
            jacobian_fn(move |x, p| {
                let pinned = FieldSection::pinned(f.as_ref(), p);
                d.jacobian(&pinned, x.as_slice())
            })
        });

        // Higher derivatives differentiate F itself; a user d_f is an f64
        // closure and cannot be propagated through dual numbers.
        let d2f = d2f.unwrap_or_else(|| {
            let (f, d) = (Arc::clone(&field), diff.clone());
            BilinearMap::new(move |x, p, a, b| {
                ensure_len(a.len(), x.len(), "d2F direction")?;
                let pinned = FieldSection::pinned(f.as_ref(), p);
                let first = Directional::new(&pinned, a.as_slice());
                d.directional_derivative(&first, x.as_slice(), b.as_slice())
            })
        });

        let d3f = d3f.unwrap_or_else(|| {
            let (f, d) = (Arc::clone(&field), diff.clone());
            TrilinearMap::new(move |x, p, a, b, c| {
                ensure_len(a.len(), x.len(), "d3F direction")?;
                ensure_len(b.len(), x.len(), "d3F direction")?;
                let pinned = FieldSection::pinned(f.as_ref(), p);
                let first = Directional::new(&pinned, a.as_slice());
                let second = Directional::new(&first, b.as_slice());
                d.directional_derivative(&second, x.as_slice(), c.as_slice())
            })
        });

        Self {
            field,
            diff,
            d_f,
            d_f_adjoint,
            jacobian,
            jacobian_adjoint,
            d2f,
            d3f,
            settings,
        }
    }
}

impl<S, D> DifferentiableVectorField<S, D>
where
    S: DelayVectorField,
{
    pub fn field(&self) -> &S {
        &self.field
    }

    pub fn differentiator(&self) -> &D {
        &self.diff
    }

    pub fn dimension(&self) -> usize {
        self.field.dimension()
    }

    pub fn delay_count(&self) -> usize {
        self.field.delay_count()
    }

    pub fn settings(&self) -> &FieldSettings {
        &self.settings
    }

    /// Evaluates `F(x, xd, p)` directly.
    pub fn value(
        &self,
        x: &DVector<f64>,
        xd: &[DVector<f64>],
        params: &[f64],
    ) -> Result<DVector<f64>> {
        let n = self.dimension();
        ensure_len(x.len(), n, "State")?;
        ensure_len(xd.len(), self.delay_count(), "Delayed state count")?;
        for replica in xd {
            ensure_len(replica.len(), n, "Delayed state")?;
        }
        let delayed: Vec<Vec<f64>> = xd.iter().map(|r| r.as_slice().to_vec()).collect();
        let mut out = DVector::zeros(n);
        self.field
            .apply(x.as_slice(), &delayed, params, out.as_mut_slice());
        Ok(out)
    }

    /// Directional derivative with all replicas pinned to `x`.
    pub fn d_f(&self, x: &DVector<f64>, params: &[f64], dx: &DVector<f64>) -> Result<DVector<f64>> {
        let n = self.dimension();
        ensure_len(x.len(), n, "State")?;
        let out = (self.d_f)(x, params, dx)?;
        if out.len() != n {
            bail!(DelayError::DerivativeLength {
                derivative: "dF",
                expected: n,
                got: out.len(),
            });
        }
        Ok(out)
    }

    /// Combined Jacobian with all replicas pinned to `x`.
    pub fn jacobian(&self, x: &DVector<f64>, params: &[f64]) -> Result<DMatrix<f64>> {
        let n = self.dimension();
        ensure_len(x.len(), n, "State")?;
        let jac = (self.jacobian)(x, params)?;
        if jac.shape() != (n, n) {
            bail!(DelayError::DerivativeShape {
                derivative: "J",
                expected: (n, n),
                got: jac.shape(),
            });
        }
        Ok(jac)
    }

    /// User-supplied adjoint of `d_f`, if any.
    pub fn d_f_adjoint(&self) -> Option<&DirectionalFn> {
        self.d_f_adjoint.as_ref()
    }

    /// User-supplied adjoint Jacobian, if any. When absent, use
    /// [`crate::jacobian::jad`].
    pub fn jacobian_adjoint(&self) -> Option<&JacobianFn> {
        self.jacobian_adjoint.as_ref()
    }

    pub fn d2f(&self) -> &BilinearMap {
        &self.d2f
    }

    pub fn d3f(&self) -> &TrilinearMap {
        &self.d3f
    }
}
