//! Error taxonomy shared by graph construction and execution (SPEC_FULL.md §7).

use std::fmt;

use crate::registry::DispatchKey;

/// A single error type returned from every fallible entry point in the crate.
#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    /// Construction-time violation of a primitive's argument contract.
    #[error("invalid argument `{field}`: {message}")]
    InvalidArgument { field: String, message: String },

    /// No implementation registered for a dispatch key.
    #[error("not implemented for {key}")]
    NotImplemented { key: DispatchKey },

    /// `.nnd` file or other I/O failure.
    #[error("io error: {message}")]
    IoError { message: String },

    /// Allocator failure.
    #[error("out of memory: requested {requested} bytes, {available} available")]
    OutOfMemory { requested: usize, available: usize },

    /// An assertion that should be unreachable fired (format indexer, validator).
    #[error("internal invariant violated: {message}")]
    InternalInvariant { message: String },
}

impl Error {
    pub fn invalid_argument(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::InvalidArgument {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Error::InternalInvariant {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::IoError {
            message: e.to_string(),
        }
    }
}

/// Helper so `DispatchKey` can be interpolated into `Display` without a separate impl site.
impl fmt::Display for DispatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(engine={:?}, in_fmt={:?}, out_fmt={:?})",
            self.engine, self.input_format, self.output_format
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
