//! Error types for warden-core.

use std::time::Duration;

use thiserror::Error;

/// Result type for warden-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running snippets through a sandbox context.
#[derive(Debug, Error)]
pub enum Error {
    /// The readiness handshake did not complete within its budget.
    ///
    /// The context is left alive; a slow bootstrap is not fatal.
    #[error("runner initialization timed out after {}ms", budget.as_millis())]
    InitTimeout { budget: Duration },

    /// The engine failed to start or never published its execute capability.
    #[error("runner bootstrap failed: {0}")]
    BootstrapFailure(String),

    /// The context was replaced before the request could be dispatched.
    #[error("runner not ready: context was replaced before dispatch")]
    NotReady,

    /// The snippet exceeded its wall-clock budget and the context was destroyed.
    #[error("execution timed out after {}ms", budget.as_millis())]
    ExecutionTimeout { budget: Duration },

    /// The engine reported an error while running the snippet.
    #[error("execution failed: {0}")]
    ExecutionFailure(String),

    /// The call was still pending when its context was reset.
    #[error("runner reset while the call was pending")]
    ResetInterrupted,

    /// IPC communication error with the context.
    #[error("IPC error: {0}")]
    Ipc(String),

    /// Frame encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the failure destroyed (or discarded) the context it ran on.
    ///
    /// The next call transparently starts a fresh context.
    pub fn is_terminal_for_context(&self) -> bool {
        matches!(
            self,
            Self::ExecutionTimeout { .. } | Self::BootstrapFailure(_) | Self::ResetInterrupted
        )
    }

    /// Error message with a short recovery hint appended, for CLI output.
    pub fn with_hint(&self) -> String {
        let hint = match self {
            Self::InitTimeout { .. } => {
                Some("the engine is still starting; retry or raise --init-timeout")
            }
            Self::BootstrapFailure(_) => {
                Some("check WARDEN_ENGINE_PATH points at a valid engine library")
            }
            Self::ExecutionTimeout { .. } => {
                Some("the snippet may loop forever; raise --timeout if it is just slow")
            }
            Self::Ipc(msg) if msg.contains("worker binary") => {
                Some("set WARDEN_WORKER_PATH or build the warden-worker binary")
            }
            _ => None,
        };

        match hint {
            Some(hint) => format!("{}\n  hint: {}", self, hint),
            None => self.to_string(),
        }
    }
}
