/// Shared error type used across the overseer crates.
///
/// Variants line up with the error taxonomy at the HTTP boundary: validation
/// is a 400, not-found and ownership mismatches are always 404 (never a
/// 403 that would leak existence), conflict maps to a no-op success or the
/// existing resource, and external/internal failures fail the owning run or
/// job rather than propagating past the component that caught them.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("validation: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(&'static str),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("external: {0}")]
    External(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config: {0}")]
    Config(String),

    #[error("internal: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error should be reported to the HTTP caller as a 404,
    /// per the "never leak existence" rule (§7).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_reported_as_not_found() {
        let err = Error::NotFound("run");
        assert!(err.is_not_found());
    }

    #[test]
    fn validation_is_not_reported_as_not_found() {
        let err = Error::Validation("task must not be empty".into());
        assert!(!err.is_not_found());
    }

    #[test]
    fn io_error_converts_via_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
