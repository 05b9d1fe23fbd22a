//! Isolated execution contexts.
//!
//! A context hosts one [`Adapter`](crate::adapter::Adapter) and is reachable
//! only through messages: the client posts [`Request`]s and receives
//! [`ContextEvent`]s. Contexts are disposable and non-preemptible; the only
//! way to stop a snippet is [`IsolatedContext::destroy`].
//!
//! # Context kinds
//!
//! - **`ProcessContextFactory`** - the adapter runs in a `warden-worker`
//!   process. Destroying the context kills the process, which reclaims a
//!   snippet stuck in an infinite loop.
//! - **`ThreadContextFactory`** - the adapter runs on a dedicated OS thread
//!   with its own runtime. Destroying the context disconnects the thread; a
//!   thread stuck inside the engine cannot be stopped and is abandoned.
//!   Suited to trusted engines and tests.

mod process;
mod thread;

use tokio::sync::mpsc;

use crate::error::Result;
use crate::ipc::{Request, Response};

pub use process::ProcessContextFactory;
pub use thread::ThreadContextFactory;

/// Something a context reports back to its owner.
#[derive(Debug)]
pub enum ContextEvent {
    /// A protocol response.
    Response(Response),
    /// The context died or became unusable.
    Crashed { reason: String },
}

/// Channel on which a context reports its events.
pub type ContextEvents = mpsc::UnboundedSender<ContextEvent>;

/// A live isolated context, as seen from the host.
pub trait IsolatedContext: Send {
    /// Queue a request for the context. Never blocks.
    fn post(&mut self, request: Request) -> Result<()>;

    /// Tear the context down, abandoning whatever it is doing.
    ///
    /// Idempotent. Events that still trickle out afterwards are stale and
    /// are ignored by the client.
    fn destroy(&mut self);
}

/// Creates fresh contexts.
pub trait ContextFactory: Send + Sync {
    /// Start a new context reporting to `events`.
    ///
    /// The adapter inside begins bootstrapping right away. Called from
    /// within a tokio runtime.
    fn create(&self, events: ContextEvents) -> Result<Box<dyn IsolatedContext>>;
}
