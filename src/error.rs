use std::{error, fmt};

// -------------------------------------------------------------------------------------------------

/// Provides an enumeration of all possible errors reported by pixelgrain.
///
/// Errors are only ever returned from setup functions (constructors, `prepare`, `validate`).
/// Real-time processing functions never fail: they degrade to silence instead.
#[derive(Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    ParameterError(String),
    InvalidSourceBuffer(String),
    FftError(Box<dyn error::Error + Send + Sync>),
    AllocationError(String),
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParameterError(str) => write!(f, "Invalid parameter: {str}"),
            Self::InvalidSourceBuffer(str) => write!(f, "Invalid source buffer: {str}"),
            Self::FftError(err) => write!(f, "FFT failed: {err}"),
            Self::AllocationError(str) => write!(f, "Failed to allocate buffers: {str}"),
        }
    }
}

impl From<realfft::FftError> for Error {
    fn from(err: realfft::FftError) -> Error {
        Error::FftError(Box::new(err))
    }
}

impl From<std::collections::TryReserveError> for Error {
    fn from(err: std::collections::TryReserveError) -> Self {
        Error::AllocationError(err.to_string())
    }
}
