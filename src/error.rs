//! Error types.
//!
//! Mirrors the five error kinds from the original RoDeO diagnostics
//! (`original_source/src/drivers.hpp` aborts on config/IO/simulator failure;
//! `kriging_training.cpp` silently penalizes numerical failures inside the
//! evolutionary loop). `NumericalError` should essentially never escape to a
//! caller outside of `kriging::train` — everywhere else it is caught and
//! turned into a discarded candidate or a penalized fitness value.

use thiserror::Error;

/// The crate-wide error type.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    /// Missing required configuration key or contradictory inequality definition.
    #[error("configuration error: {0}")]
    Config(String),

    /// Missing training file, unreadable simulator output, unwritable design file.
    #[error("I/O error: {0}")]
    Io(String),

    /// Non-PD correlation matrix, sigma^2 <= 0, division by zero in EI.
    ///
    /// Locally recoverable everywhere except `kriging::train`, where it means
    /// every evolutionary attempt failed to produce a valid hyperparameter set.
    #[error("numerical error: {0}")]
    Numerical(String),

    /// A surrogate was asked to predict before it was initialized/trained.
    #[error("model not initialized: {0}")]
    ModelBind(String),

    /// The external evaluator returned a nonzero exit code or unparsable output.
    #[error("simulator failure: {0}")]
    Simulator(String),
}

/// Shorthand `Result` type used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

/// Equivalent of RoDeO's `abort()`-on-bad-config paths: returns a `ConfigError`.
macro_rules! config_ensure {
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            return Err($crate::error::Error::Config(format!($($arg)*)));
        }
    };
}
pub(crate) use config_ensure;
