use thiserror::Error;

/// Shape and configuration failures detected by this crate.
///
/// Public functions return `anyhow::Result`; these values travel inside the
/// `anyhow::Error` and can be recovered with `downcast_ref`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DelayError {
    #[error("System has zero dimension.")]
    EmptySystem,

    #[error("{context} dimension mismatch. Expected {expected}, got {got}.")]
    StateDimension {
        context: &'static str,
        expected: usize,
        got: usize,
    },

    #[error(
        "Vector field reads {field} delayed arguments but {configured} delays are configured."
    )]
    DelayCountMismatch { field: usize, configured: usize },

    #[error("Delay function returned {got} delays, expected {expected}.")]
    DelayFunctionLength { expected: usize, got: usize },

    #[error("Delay {slot} must be finite and non-negative, got {value}.")]
    InvalidDelay { slot: usize, value: f64 },

    #[error("Parameter index {index} out of range for {len} parameters.")]
    ParamIndex { index: usize, len: usize },

    #[error("{derivative} returned {got} entries, expected {expected}.")]
    DerivativeLength {
        derivative: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("{derivative} returned a {got:?} matrix, expected {expected:?}.")]
    DerivativeShape {
        derivative: &'static str,
        expected: (usize, usize),
        got: (usize, usize),
    },
}
