use thiserror::Error;

/// Engine-level error kinds.
///
/// `Config` covers everything detected before any trial executes and maps
/// to exit status 2; `Aborted` is a recoverable trial/metric error escalated
/// by abort-on-error and maps to exit status 1, so driving scripts can tell
/// "could not even start" apart from "ran with failures".
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0}")]
    Config(String),
    #[error("{0}")]
    Aborted(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::Config(_) => 2,
            _ => 1,
        }
    }
}

pub(crate) fn config(message: impl Into<String>) -> EngineError {
    EngineError::Config(message.into())
}
