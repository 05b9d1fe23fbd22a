//! The opaque execution engine, as seen from inside a context.
//!
//! An engine is started by an [`EngineLoader`] and announces itself by
//! publishing an [`Engine`] through a [`CapabilitySlot`] exactly once.
//! From then on the adapter calls [`Engine::execute`] synchronously.
//!
//! ```text
//! Adapter ── start(slot) ──▶ EngineLoader
//!    ▲                           │ (may finish starting on its own thread)
//!    └──── slot.publish(engine) ◀┘
//! ```

mod dylib;

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::oneshot;

pub use dylib::{DylibEngineLoader, ENGINE_LIBRARY_NAME};

/// Output captured by the engine for one snippet.
///
/// Engines may leave either stream unset; the adapter reports a missing
/// stream as empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineOutput {
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

impl EngineOutput {
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: Some(stdout.into()),
            stderr: Some(stderr.into()),
        }
    }

    pub fn stdout(stdout: impl Into<String>) -> Self {
        Self {
            stdout: Some(stdout.into()),
            stderr: None,
        }
    }
}

/// Failure raised by an engine or its loader.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct EngineError {
    pub message: String,
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The synchronous execute capability.
///
/// `execute` runs to completion on the caller's thread. It offers no
/// cancellation: a snippet that never returns takes the thread with it.
pub trait Engine: Send + Sync {
    fn execute(&self, code: &str) -> Result<EngineOutput, EngineError>;
}

impl<F> Engine for F
where
    F: Fn(&str) -> Result<EngineOutput, EngineError> + Send + Sync,
{
    fn execute(&self, code: &str) -> Result<EngineOutput, EngineError> {
        self(code)
    }
}

/// Single-use channel through which a starting engine publishes itself.
///
/// Dropping the slot without publishing fails the bootstrap.
pub struct CapabilitySlot {
    tx: oneshot::Sender<Arc<dyn Engine>>,
}

impl CapabilitySlot {
    /// Create a slot and the receiver the adapter waits on.
    pub fn channel() -> (Self, oneshot::Receiver<Arc<dyn Engine>>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Publish the execute capability.
    ///
    /// Returns `false` if nobody is waiting any more (the bootstrap already
    /// gave up).
    pub fn publish(self, engine: Arc<dyn Engine>) -> bool {
        self.tx.send(engine).is_ok()
    }
}

/// Loads and starts an engine.
///
/// `start` performs the loading steps that can fail synchronously (fetching
/// the bootstrap code, instantiating the compiled module). It either
/// publishes into `slot` before returning or hands the slot to whatever
/// finishes starting the engine.
pub trait EngineLoader: Send + Sync {
    fn start(&self, slot: CapabilitySlot) -> Result<(), EngineError>;
}

/// Loader for an engine that already lives in this process.
pub struct InProcessLoader {
    engine: Arc<dyn Engine>,
}

impl InProcessLoader {
    pub fn new(engine: impl Engine + 'static) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }
}

impl EngineLoader for InProcessLoader {
    fn start(&self, slot: CapabilitySlot) -> Result<(), EngineError> {
        slot.publish(Arc::clone(&self.engine));
        Ok(())
    }
}
