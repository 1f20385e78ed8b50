use num_traits::{Float, FromPrimitive};
use std::fmt::Debug;

/// A trait for types that can be used as scalars in our dynamical systems.
/// Must support basic arithmetic, debug printing, and conversion from f64.
pub trait Scalar: Float + FromPrimitive + Debug + 'static {}

impl<T: Float + FromPrimitive + Debug + 'static> Scalar for T {}

/// Converts an `f64` constant into the scalar type `T`.
///
/// Every `Scalar` in this crate is float-backed, so the conversion never
/// fails in practice; NaN is returned rather than panicking if it does.
pub fn lift<T: Scalar>(value: f64) -> T {
    T::from_f64(value).unwrap_or_else(T::nan)
}

/// A vector field with constant delays, `F(x, xd, p)`.
///
/// `apply` is generic over the scalar so that one implementation serves plain
/// evaluation (`f64`) as well as first, second and third order forward-mode
/// differentiation (nested `Dual` numbers).
pub trait DelayVectorField {
    /// Dimension of the state space (length of `x` and of each replica).
    fn dimension(&self) -> usize;

    /// Number of delayed state arguments the field reads.
    fn delay_count(&self) -> usize;

    /// Evaluates the field.
    /// x: instantaneous state
    /// xd: delayed states, one per delay slot
    /// params: parameter vector
    /// out: buffer to write the result (same length as x)
    fn apply<T: Scalar>(&self, x: &[T], xd: &[Vec<T>], params: &[T], out: &mut [T]);
}

/// A map `R^m -> R^n` that can be evaluated on any scalar type.
///
/// This is the unit of work the differentiation backend operates on.
pub trait VectorFunction {
    fn output_dimension(&self) -> usize;

    fn eval<T: Scalar>(&self, z: &[T], out: &mut [T]);
}
