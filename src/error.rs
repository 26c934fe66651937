/// Error types for the geocoder library
use std::fmt;

use crate::mmdb::MmdbError;

/// Result type alias for geocoder operations
pub type Result<T> = std::result::Result<T, GeoError>;

/// Main error type for load and query operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeoError {
    /// Malformed caller input (bad prefix text, page bounds, empty batch)
    InvalidArgument(String),

    /// Country code or canonical prefix not present in the store
    NotFound(String),

    /// Decode or canonicalization failure while building a store
    LoadFailure(String),

    /// Load aborted by the cancellation token
    Cancelled,
}

/// Coarse error category, for transport layers that map errors to status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    LoadFailure,
    Cancelled,
}

impl GeoError {
    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            GeoError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            GeoError::NotFound(_) => ErrorKind::NotFound,
            GeoError::LoadFailure(_) => ErrorKind::LoadFailure,
            GeoError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// True for errors caused by the caller's input rather than server state
    pub fn is_client_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::InvalidArgument | ErrorKind::NotFound
        )
    }
}

impl fmt::Display for GeoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeoError::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            GeoError::NotFound(msg) => write!(f, "not found: {}", msg),
            GeoError::LoadFailure(msg) => write!(f, "load failed: {}", msg),
            GeoError::Cancelled => write!(f, "load cancelled"),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::NotFound => "not_found",
            ErrorKind::LoadFailure => "load_failure",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

impl std::error::Error for GeoError {}

impl From<MmdbError> for GeoError {
    fn from(err: MmdbError) -> Self {
        GeoError::LoadFailure(err.to_string())
    }
}

impl From<std::io::Error> for GeoError {
    fn from(err: std::io::Error) -> Self {
        GeoError::LoadFailure(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            GeoError::InvalidArgument("x".into()).kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(GeoError::NotFound("x".into()).kind(), ErrorKind::NotFound);
        assert_eq!(GeoError::Cancelled.kind(), ErrorKind::Cancelled);
        assert!(GeoError::NotFound("RU".into()).is_client_error());
        assert!(!GeoError::LoadFailure("bad".into()).is_client_error());
    }

    #[test]
    fn test_display_includes_message() {
        let err = GeoError::NotFound("unknown iso code: XX".to_string());
        assert_eq!(err.to_string(), "not found: unknown iso code: XX");
    }

    #[test]
    fn test_mmdb_error_becomes_load_failure() {
        let err: GeoError = MmdbError::MetadataNotFound.into();
        assert_eq!(err.kind(), ErrorKind::LoadFailure);
    }
}
