//! Symmetric multilinear maps for higher derivatives.
//!
//! Normal-form computations treat `d2F` and `d3F` as symmetric tensors. The
//! wrappers here sort their direction arguments into a canonical order before
//! invoking the raw function, so any permutation of the same arguments yields
//! bit-identical output.

use anyhow::Result;
use nalgebra::DVector;
use num_complex::Complex;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Raw second derivative `(x, p, a, b) -> d2F(x, p)[a, b]`.
pub type RawBilinear = Arc<
    dyn Fn(&DVector<f64>, &[f64], &DVector<f64>, &DVector<f64>) -> Result<DVector<f64>>
        + Send
        + Sync,
>;

/// Raw third derivative `(x, p, a, b, c) -> d3F(x, p)[a, b, c]`.
pub type RawTrilinear = Arc<
    dyn Fn(
            &DVector<f64>,
            &[f64],
            &DVector<f64>,
            &DVector<f64>,
            &DVector<f64>,
        ) -> Result<DVector<f64>>
        + Send
        + Sync,
>;

/// Lexicographic order on vectors, using the IEEE total order per entry.
fn canonical_cmp(a: &DVector<f64>, b: &DVector<f64>) -> Ordering {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| x.total_cmp(y))
        .find(|o| o.is_ne())
        .unwrap_or_else(|| a.len().cmp(&b.len()))
}

#[derive(Clone)]
pub struct BilinearMap {
    raw: RawBilinear,
}

impl BilinearMap {
    pub fn new<F>(raw: F) -> Self
    where
        F: Fn(&DVector<f64>, &[f64], &DVector<f64>, &DVector<f64>) -> Result<DVector<f64>>
            + Send
            + Sync
            + 'static,
    {
        Self { raw: Arc::new(raw) }
    }

    pub fn apply(
        &self,
        x: &DVector<f64>,
        params: &[f64],
        a: &DVector<f64>,
        b: &DVector<f64>,
    ) -> Result<DVector<f64>> {
        if canonical_cmp(a, b) == Ordering::Greater {
            (self.raw)(x, params, b, a)
        } else {
            (self.raw)(x, params, a, b)
        }
    }

    /// Extends the map to complex directions by bilinearity:
    /// `B(ar + i·ai, br + i·bi) = B(ar, br) − B(ai, bi) + i·(B(ar, bi) + B(ai, br))`.
    pub fn apply_complex(
        &self,
        x: &DVector<f64>,
        params: &[f64],
        a: &DVector<Complex<f64>>,
        b: &DVector<Complex<f64>>,
    ) -> Result<DVector<Complex<f64>>> {
        let (ar, ai) = (a.map(|c| c.re), a.map(|c| c.im));
        let (br, bi) = (b.map(|c| c.re), b.map(|c| c.im));
        let re = self.apply(x, params, &ar, &br)? - self.apply(x, params, &ai, &bi)?;
        let im = self.apply(x, params, &ar, &bi)? + self.apply(x, params, &ai, &br)?;
        Ok(re.zip_map(&im, Complex::new))
    }
}

impl fmt::Debug for BilinearMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BilinearMap")
    }
}

#[derive(Clone)]
pub struct TrilinearMap {
    raw: RawTrilinear,
}

impl TrilinearMap {
    pub fn new<F>(raw: F) -> Self
    where
        F: Fn(
                &DVector<f64>,
                &[f64],
                &DVector<f64>,
                &DVector<f64>,
                &DVector<f64>,
            ) -> Result<DVector<f64>>
            + Send
            + Sync
            + 'static,
    {
        Self { raw: Arc::new(raw) }
    }

    pub fn apply(
        &self,
        x: &DVector<f64>,
        params: &[f64],
        a: &DVector<f64>,
        b: &DVector<f64>,
        c: &DVector<f64>,
    ) -> Result<DVector<f64>> {
        let mut args = [a, b, c];
        args.sort_by(|l, r| canonical_cmp(l, r));
        (self.raw)(x, params, args[0], args[1], args[2])
    }
}

impl fmt::Debug for TrilinearMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TrilinearMap")
    }
}
