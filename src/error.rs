//! Domain error taxonomy shared by the registries and the session hub

/// Errors returned by registry and hub operations.
///
/// Every operation that returns one of these leaves its state untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// Malformed input (bad join code length, out of range score, ...)
    #[error("{0}")]
    Validation(String),

    /// Unknown room, tournament, match or join code
    #[error("{0}")]
    NotFound(String),

    /// Already queued, room full, already a participant, not ready, ...
    #[error("{0}")]
    Conflict(String),

    /// Action invalid for the current status
    #[error("{0}")]
    State(String),
}

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
