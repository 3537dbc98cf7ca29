//! Error types shared by every interop layer.

use thiserror::Error;

/// Errors that can occur anywhere in the interop core.
///
/// The type is `Clone` so a settled outcome (for example a memoized intent
/// result) can be handed out more than once.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// An argument failed a type or shape check. Raised before any message
    /// is sent.
    #[error("validation error: {0}")]
    Validation(String),

    /// No matching application, intent, channel, instance or method.
    #[error("not found: {0}")]
    NotFound(String),

    /// A duplicate registration, or a claim on a slot someone else holds.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A bounded wait elapsed.
    #[error("timed out: {0}")]
    AppTimeout(String),

    /// The resource has been torn down.
    #[error("invalid state: {0}")]
    State(String),

    /// A remote handler failed or panicked.
    #[error("handler failed: {0}")]
    Handler(String),

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Discriminant of [`Error`], for matching without the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    AppTimeout,
    State,
    Handler,
    Config,
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Error::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Error::Conflict(message.into())
    }

    pub fn app_timeout(message: impl Into<String>) -> Self {
        Error::AppTimeout(message.into())
    }

    pub fn state(message: impl Into<String>) -> Self {
        Error::State(message.into())
    }

    pub fn handler(message: impl Into<String>) -> Self {
        Error::Handler(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    /// The kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::AppTimeout(_) => ErrorKind::AppTimeout,
            Error::State(_) => ErrorKind::State,
            Error::Handler(_) => ErrorKind::Handler,
            Error::Config(_) => ErrorKind::Config,
        }
    }
}

/// Result type alias for interop operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_message() {
        let e = Error::not_found("intent 'view'");
        assert_eq!(format!("{}", e), "not found: intent 'view'");

        let e = Error::app_timeout("listener for 'view'");
        assert!(format!("{}", e).contains("timed out"));
    }

    #[test]
    fn kind_matches_variant() {
        assert_eq!(Error::validation("x").kind(), ErrorKind::Validation);
        assert_eq!(Error::conflict("x").kind(), ErrorKind::Conflict);
        assert_eq!(Error::state("x").kind(), ErrorKind::State);
        assert_eq!(Error::handler("x").kind(), ErrorKind::Handler);
        assert_eq!(Error::Config("x".into()).kind(), ErrorKind::Config);
    }

    #[test]
    fn errors_are_cloneable() {
        let e = Error::handler("boom");
        assert_eq!(e.clone(), e);
    }
}
