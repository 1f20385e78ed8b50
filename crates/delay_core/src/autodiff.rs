use crate::traits::{lift, Scalar, VectorFunction};
use anyhow::{bail, Result};
use nalgebra::{DMatrix, DVector};
use num_traits::{Float, FromPrimitive, Num, NumCast, One, ToPrimitive, Zero};
use std::num::FpCategory;
use std::ops::{
    Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Rem, RemAssign, Sub, SubAssign,
};

/// Dual number for forward-mode AD.
/// val: real part
/// eps: infinitesimal part
///
/// The component type is itself a `Scalar`, so duals nest: `Dual<Dual<f64>>`
/// carries mixed second derivatives, `Dual<Dual<Dual<f64>>>` third ones.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Dual<T = f64> {
    pub val: T,
    pub eps: T,
}

impl<T: Scalar> Dual<T> {
    pub fn new(val: T, eps: T) -> Self {
        Self { val, eps }
    }

    /// A value with zero tangent.
    pub fn constant(val: T) -> Self {
        Self::new(val, T::zero())
    }

    fn chain(self, val: T, slope: T) -> Self {
        Self::new(val, slope * self.eps)
    }
}

impl<T: Scalar> Zero for Dual<T> {
    fn zero() -> Self {
        Self::constant(T::zero())
    }
    fn is_zero(&self) -> bool {
        self.val.is_zero() && self.eps.is_zero()
    }
}

impl<T: Scalar> One for Dual<T> {
    fn one() -> Self {
        Self::constant(T::one())
    }
}

impl<T: Scalar> Add for Dual<T> {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.val + rhs.val, self.eps + rhs.eps)
    }
}

impl<T: Scalar> Sub for Dual<T> {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.val - rhs.val, self.eps - rhs.eps)
    }
}

impl<T: Scalar> Mul for Dual<T> {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        Self::new(self.val * rhs.val, self.val * rhs.eps + self.eps * rhs.val)
    }
}

impl<T: Scalar> Div for Dual<T> {
    type Output = Self;
    fn div(self, rhs: Self) -> Self {
        let denom = rhs.val * rhs.val;
        Self::new(
            self.val / rhs.val,
            (self.eps * rhs.val - self.val * rhs.eps) / denom,
        )
    }
}

impl<T: Scalar> Neg for Dual<T> {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.val, -self.eps)
    }
}

impl<T: Scalar> Rem for Dual<T> {
    type Output = Self;
    fn rem(self, rhs: Self) -> Self {
        // a % b = a - trunc(a / b) * b, with trunc locally constant.
        let quotient = (self.val / rhs.val).trunc();
        Self::new(self.val % rhs.val, self.eps - quotient * rhs.eps)
    }
}

impl<T: Scalar> AddAssign for Dual<T> {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}
impl<T: Scalar> SubAssign for Dual<T> {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}
impl<T: Scalar> MulAssign for Dual<T> {
    fn mul_assign(&mut self, rhs: Self) {
        *self = *self * rhs;
    }
}
impl<T: Scalar> DivAssign for Dual<T> {
    fn div_assign(&mut self, rhs: Self) {
        *self = *self / rhs;
    }
}
impl<T: Scalar> RemAssign for Dual<T> {
    fn rem_assign(&mut self, rhs: Self) {
        *self = *self % rhs;
    }
}

impl<T: Scalar> Num for Dual<T> {
    type FromStrRadixErr = ();
    fn from_str_radix(str: &str, radix: u32) -> Result<Self, Self::FromStrRadixErr> {
        T::from_str_radix(str, radix)
            .map(Self::constant)
            .map_err(|_| ())
    }
}

impl<T: Scalar> ToPrimitive for Dual<T> {
    fn to_i64(&self) -> Option<i64> {
        self.val.to_i64()
    }
    fn to_u64(&self) -> Option<u64> {
        self.val.to_u64()
    }
    fn to_f64(&self) -> Option<f64> {
        self.val.to_f64()
    }
}

impl<T: Scalar> FromPrimitive for Dual<T> {
    fn from_i64(n: i64) -> Option<Self> {
        T::from_i64(n).map(Self::constant)
    }
    fn from_u64(n: u64) -> Option<Self> {
        T::from_u64(n).map(Self::constant)
    }
    fn from_f64(n: f64) -> Option<Self> {
        T::from_f64(n).map(Self::constant)
    }
}

impl<T: Scalar> NumCast for Dual<T> {
    fn from<N: ToPrimitive>(n: N) -> Option<Self> {
        <T as NumCast>::from(n).map(Self::constant)
    }
}

impl<T: Scalar> Float for Dual<T> {
    fn nan() -> Self {
        Self::constant(T::nan())
    }
    fn infinity() -> Self {
        Self::constant(T::infinity())
    }
    fn neg_infinity() -> Self {
        Self::constant(T::neg_infinity())
    }
    fn neg_zero() -> Self {
        Self::new(T::neg_zero(), T::neg_zero())
    }
    fn min_value() -> Self {
        Self::constant(T::min_value())
    }
    fn min_positive_value() -> Self {
        Self::constant(T::min_positive_value())
    }
    fn max_value() -> Self {
        Self::constant(T::max_value())
    }
    fn is_nan(self) -> bool {
        self.val.is_nan()
    }
    fn is_infinite(self) -> bool {
        self.val.is_infinite()
    }
    fn is_finite(self) -> bool {
        self.val.is_finite()
    }
    fn is_normal(self) -> bool {
        self.val.is_normal()
    }
    fn classify(self) -> FpCategory {
        self.val.classify()
    }
    fn floor(self) -> Self {
        Self::constant(self.val.floor())
    }
    fn ceil(self) -> Self {
        Self::constant(self.val.ceil())
    }
    fn round(self) -> Self {
        Self::constant(self.val.round())
    }
    fn trunc(self) -> Self {
        Self::constant(self.val.trunc())
    }
    fn fract(self) -> Self {
        Self::new(self.val.fract(), self.eps)
    }
    fn abs(self) -> Self {
        Self::new(
            self.val.abs(),
            if self.val >= T::zero() { self.eps } else { -self.eps },
        )
    }
    fn signum(self) -> Self {
        Self::constant(self.val.signum())
    }
    fn is_sign_positive(self) -> bool {
        self.val.is_sign_positive()
    }
    fn is_sign_negative(self) -> bool {
        self.val.is_sign_negative()
    }
    fn mul_add(self, a: Self, b: Self) -> Self {
        self * a + b
    }
    fn recip(self) -> Self {
        Self::one() / self
    }

    fn powi(self, n: i32) -> Self {
        if n == 0 {
            return Self::one();
        }
        let slope = lift::<T>(n as f64) * self.val.powi(n - 1);
        self.chain(self.val.powi(n), slope)
    }

    fn powf(self, n: Self) -> Self {
        let val_pow = self.val.powf(n.val);
        if n.eps.is_zero() {
            // Constant exponent: avoids ln(x) for negative bases.
            let slope = n.val * self.val.powf(n.val - T::one());
            return self.chain(val_pow, slope);
        }
        // x^y = exp(y * ln(x))
        let eps_new = val_pow * (n.eps * self.val.ln() + n.val * self.eps / self.val);
        Self::new(val_pow, eps_new)
    }

    fn sqrt(self) -> Self {
        let s = self.val.sqrt();
        Self::new(s, self.eps / (s + s))
    }

    fn exp(self) -> Self {
        let e = self.val.exp();
        self.chain(e, e)
    }

    fn exp2(self) -> Self {
        let e = self.val.exp2();
        self.chain(e, e * lift(std::f64::consts::LN_2))
    }
    fn ln(self) -> Self {
        Self::new(self.val.ln(), self.eps / self.val)
    }
    fn log(self, base: Self) -> Self {
        self.ln() / base.ln()
    }
    fn log2(self) -> Self {
        Self::new(
            self.val.log2(),
            self.eps / (self.val * lift(std::f64::consts::LN_2)),
        )
    }
    fn log10(self) -> Self {
        Self::new(
            self.val.log10(),
            self.eps / (self.val * lift(std::f64::consts::LN_10)),
        )
    }

    fn max(self, other: Self) -> Self {
        if self.val > other.val {
            self
        } else {
            other
        }
    }
    fn min(self, other: Self) -> Self {
        if self.val < other.val {
            self
        } else {
            other
        }
    }

    fn abs_sub(self, other: Self) -> Self {
        if self.val > other.val {
            self - other
        } else {
            Self::zero()
        }
    }

    fn cbrt(self) -> Self {
        let c = self.val.cbrt();
        Self::new(c, self.eps / (lift::<T>(3.0) * c * c))
    }
    fn hypot(self, other: Self) -> Self {
        let h = self.val.hypot(other.val);
        Self::new(h, (self.val * self.eps + other.val * other.eps) / h)
    }

    fn sin(self) -> Self {
        self.chain(self.val.sin(), self.val.cos())
    }
    fn cos(self) -> Self {
        self.chain(self.val.cos(), -self.val.sin())
    }
    fn tan(self) -> Self {
        let t = self.val.tan();
        self.chain(t, T::one() + t * t)
    }
    fn asin(self) -> Self {
        let slope = (T::one() - self.val * self.val).sqrt().recip();
        self.chain(self.val.asin(), slope)
    }
    fn acos(self) -> Self {
        let slope = -(T::one() - self.val * self.val).sqrt().recip();
        self.chain(self.val.acos(), slope)
    }
    fn atan(self) -> Self {
        let slope = (T::one() + self.val * self.val).recip();
        self.chain(self.val.atan(), slope)
    }
    fn atan2(self, other: Self) -> Self {
        let denom = self.val * self.val + other.val * other.val;
        Self::new(
            self.val.atan2(other.val),
            (other.val * self.eps - self.val * other.eps) / denom,
        )
    }
    fn sin_cos(self) -> (Self, Self) {
        (self.sin(), self.cos())
    }

    fn exp_m1(self) -> Self {
        self.chain(self.val.exp_m1(), self.val.exp())
    }
    fn ln_1p(self) -> Self {
        self.chain(self.val.ln_1p(), (T::one() + self.val).recip())
    }
    fn sinh(self) -> Self {
        self.chain(self.val.sinh(), self.val.cosh())
    }
    fn cosh(self) -> Self {
        self.chain(self.val.cosh(), self.val.sinh())
    }
    fn tanh(self) -> Self {
        let t = self.val.tanh();
        self.chain(t, T::one() - t * t)
    }
    fn asinh(self) -> Self {
        let slope = (self.val * self.val + T::one()).sqrt().recip();
        self.chain(self.val.asinh(), slope)
    }
    fn acosh(self) -> Self {
        let slope = (self.val * self.val - T::one()).sqrt().recip();
        self.chain(self.val.acosh(), slope)
    }
    fn atanh(self) -> Self {
        let slope = (T::one() - self.val * self.val).recip();
        self.chain(self.val.atanh(), slope)
    }

    fn integer_decode(self) -> (u64, i16, i8) {
        self.val.integer_decode()
    }
}

// --- Differentiation backend ---

/// First-derivative capability used to linearize vector fields.
///
/// Implementations must not share mutable evaluation state between calls:
/// the same differentiator is used concurrently for distinct points.
pub trait Differentiator: Clone + Send + Sync + 'static {
    /// Full Jacobian of `f` at `point` (rows: outputs, columns: inputs).
    fn jacobian<F: VectorFunction>(&self, f: &F, point: &[f64]) -> Result<DMatrix<f64>>;

    /// Derivative of `t -> f(point + t * direction)` at `t = 0`.
    fn directional_derivative<F: VectorFunction>(
        &self,
        f: &F,
        point: &[f64],
        direction: &[f64],
    ) -> Result<DVector<f64>>;
}

/// Forward-mode differentiation with `Dual` numbers, one pass per column.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForwardDiff;

impl Differentiator for ForwardDiff {
    fn jacobian<F: VectorFunction>(&self, f: &F, point: &[f64]) -> Result<DMatrix<f64>> {
        let rows = f.output_dimension();
        let cols = point.len();
        let mut jacobian = DMatrix::zeros(rows, cols);
        let mut dual_point = vec![Dual::<f64>::zero(); cols];
        let mut dual_out = vec![Dual::<f64>::zero(); rows];

        for j in 0..cols {
            for i in 0..cols {
                dual_point[i] = Dual::new(point[i], if i == j { 1.0 } else { 0.0 });
            }
            f.eval(&dual_point, &mut dual_out);
            for i in 0..rows {
                jacobian[(i, j)] = dual_out[i].eps;
            }
        }

        Ok(jacobian)
    }

    fn directional_derivative<F: VectorFunction>(
        &self,
        f: &F,
        point: &[f64],
        direction: &[f64],
    ) -> Result<DVector<f64>> {
        if direction.len() != point.len() {
            bail!(
                "Direction dimension mismatch. Expected {}, got {}.",
                point.len(),
                direction.len()
            );
        }
        let dual_point: Vec<Dual> = point
            .iter()
            .zip(direction)
            .map(|(&x, &dx)| Dual::new(x, dx))
            .collect();
        let mut dual_out = vec![Dual::<f64>::zero(); f.output_dimension()];
        f.eval(&dual_point, &mut dual_out);
        Ok(DVector::from_iterator(
            dual_out.len(),
            dual_out.iter().map(|d| d.eps),
        ))
    }
}

/// The directional derivative of `inner` along a fixed `direction`, itself
/// a `VectorFunction`, so it can be differentiated again.
pub struct Directional<'a, F> {
    pub inner: &'a F,
    pub direction: &'a [f64],
}

impl<'a, F> Directional<'a, F> {
    pub fn new(inner: &'a F, direction: &'a [f64]) -> Self {
        Self { inner, direction }
    }
}

impl<F: VectorFunction> VectorFunction for Directional<'_, F> {
    fn output_dimension(&self) -> usize {
        self.inner.output_dimension()
    }

    fn eval<T: Scalar>(&self, z: &[T], out: &mut [T]) {
        let seeded: Vec<Dual<T>> = z
            .iter()
            .zip(self.direction)
            .map(|(&x, &dx)| Dual::new(x, lift(dx)))
            .collect();
        let mut dual_out = vec![Dual::<T>::zero(); out.len()];
        self.inner.eval(&seeded, &mut dual_out);
        for (o, d) in out.iter_mut().zip(&dual_out) {
            *o = d.eps;
        }
    }
}
