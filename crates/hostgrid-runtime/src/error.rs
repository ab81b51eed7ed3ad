//! Error types for container runtime drivers.

use thiserror::Error;

pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime connection failed: {0}")]
    Connect(String),

    #[error("container not found: {0}")]
    NotFound(String),

    #[error("container {name}: {reason}")]
    Operation { name: String, reason: String },

    #[error("container {name} exited with code {code}: {message}")]
    NonZeroExit {
        name: String,
        code: i64,
        message: String,
    },
}

impl RuntimeError {
    pub fn operation(name: &str, reason: impl ToString) -> Self {
        Self::Operation {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
