pub mod autodiff;
pub mod characteristic;
pub mod continuation;
pub mod error;
pub mod field;
pub mod jacobian;
pub mod multilinear;
pub mod problem;
/// The `delay_core` crate linearizes equilibria of constant-delay dynamical systems
/// `x'(t) = F(x(t), x(t - τ_1), ..., x(t - τ_N), p)` for an external continuation engine.
/// User fields are written once, generically over `Scalar`, and are evaluated on
/// `f64` as well as on (nested) Dual numbers.
///
/// Key components:
/// - **Traits**: `Scalar` (numeric type abstraction), `DelayVectorField` (user field), `VectorFunction`.
/// - **Autodiff**: nestable Dual numbers and the `ForwardDiff` backend.
/// - **Field**: `DifferentiableVectorField` with default or user-supplied derivatives.
/// - **Problem**: the immutable `DelayEquilibriumProblem` definition.
/// - **Jacobian**: `residual`, `jacobian`, `jad` and the `JacobianBundle` split by delay.
/// - **Characteristic**: `delta`, the action of `Δ(λ) = λI − J0 − Σ exp(−λτ_i) Jd_i`.
pub mod traits;

pub use autodiff::{Differentiator, Dual, ForwardDiff};
pub use characteristic::{characteristic_matrix, delta};
pub use continuation::{ContinuationProblem, DelayContinuationProblem};
pub use error::DelayError;
pub use field::{DerivativeOverrides, DifferentiableVectorField, FieldSettings};
pub use jacobian::{jacobian, jad, residual, JacobianBundle};
pub use multilinear::{BilinearMap, TrilinearMap};
pub use problem::{DelayEquilibriumProblem, IndexLens, ParamLens, ProblemCallbacks};
pub use traits::{DelayVectorField, Scalar, VectorFunction};
