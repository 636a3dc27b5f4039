//! Error types for the adapter and the integer codes exposed across the C boundary.

use thiserror::Error;

/// Result type alias for adapter operations
pub type Result<T> = std::result::Result<T, AdapterError>;

/// Error types that can occur in adapter operations
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unsupported index type: {0}")]
    UnsupportedIndex(i32),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Corrupt index image: {0}")]
    CorruptImage(String),

    #[error("Index handle is unusable after an earlier engine failure")]
    Poisoned,
}

/// Stable integer error codes. `0` is success and is never represented here.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    UnknownError = 1,
    InvalidArgument = 3,
    UnsupportedIndex = 6,
    DimensionNotEqual = 8,
}

impl ErrorCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl From<&AdapterError> for ErrorCode {
    fn from(err: &AdapterError) -> Self {
        match err {
            AdapterError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            AdapterError::UnsupportedIndex(_) => ErrorCode::UnsupportedIndex,
            AdapterError::DimensionMismatch { .. } => ErrorCode::DimensionNotEqual,
            AdapterError::Engine(_)
            | AdapterError::IoError(_)
            | AdapterError::SerializationError(_)
            | AdapterError::CorruptImage(_)
            | AdapterError::Poisoned => ErrorCode::UnknownError,
        }
    }
}

impl AdapterError {
    /// Integer code for this error.
    pub fn code(&self) -> i32 {
        ErrorCode::from(self).as_i32()
    }

    /// Whether the error came from the delegate engine or the byte stream
    /// rather than from caller input.
    pub fn is_engine_failure(&self) -> bool {
        ErrorCode::from(self) == ErrorCode::UnknownError
    }
}

/// Collapse a result into the `0`-on-success convention.
pub fn to_code<T>(result: &Result<T>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(e) => e.code(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(ErrorCode::UnknownError.as_i32(), 1);
        assert_eq!(ErrorCode::InvalidArgument.as_i32(), 3);
        assert_eq!(ErrorCode::UnsupportedIndex.as_i32(), 6);
        assert_eq!(ErrorCode::DimensionNotEqual.as_i32(), 8);
    }

    #[test]
    fn test_engine_failures_map_to_unknown() {
        let errs = vec![
            AdapterError::Engine("boom".to_string()),
            AdapterError::CorruptImage("bad crc".to_string()),
            AdapterError::SerializationError("eof".to_string()),
            AdapterError::Poisoned,
        ];
        for e in errs {
            assert_eq!(e.code(), 1, "{e}");
            assert!(e.is_engine_failure());
        }
    }

    #[test]
    fn test_to_code() {
        let ok: Result<()> = Ok(());
        assert_eq!(to_code(&ok), 0);
        let err: Result<()> = Err(AdapterError::UnsupportedIndex(7));
        assert_eq!(to_code(&err), 6);
    }
}
