//! Execution engine adapter.
//!
//! Runs inside an isolated context. It bootstraps the engine once, then
//! answers protocol requests:
//!
//! - `Ping` → `Ready` once the engine is up, `Failure` if it never will be
//! - `Run`  → `Result` with the captured streams, or `Failure`
//!
//! The bootstrap outcome is memoized: every request awaits the same
//! initialization, and a failure is permanent for this adapter instance.
//! A failed context has to be discarded by the host and replaced.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::{OnceCell, mpsc};

use crate::config::AdapterConfig;
use crate::engine::{CapabilitySlot, Engine, EngineLoader};
use crate::ipc::{CorrelationId, Request, RequestKind, Response};

/// Prefix of every failure sent while the engine is unavailable.
pub const NOT_READY: &str = "runner not ready";

/// Observable bootstrap state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterState {
    Initializing,
    Ready,
    /// Terminal; carries the cached bootstrap failure.
    Failed(String),
}

type InitOutcome = Result<Arc<dyn Engine>, String>;

/// Serves protocol requests for one context instance.
pub struct Adapter {
    loader: Arc<dyn EngineLoader>,
    config: AdapterConfig,
    outcome: OnceCell<InitOutcome>,
}

impl Adapter {
    pub fn new(loader: Arc<dyn EngineLoader>, config: AdapterConfig) -> Arc<Self> {
        Arc::new(Self {
            loader,
            config,
            outcome: OnceCell::new(),
        })
    }

    pub fn state(&self) -> AdapterState {
        match self.outcome.get() {
            None => AdapterState::Initializing,
            Some(Ok(_)) => AdapterState::Ready,
            Some(Err(message)) => AdapterState::Failed(message.clone()),
        }
    }

    /// Run the bootstrap if nobody has yet, and wait for its outcome.
    pub async fn initialize(&self) -> AdapterState {
        self.outcome().await;
        self.state()
    }

    async fn outcome(&self) -> &InitOutcome {
        self.outcome.get_or_init(|| self.bootstrap()).await
    }

    async fn bootstrap(&self) -> InitOutcome {
        let (slot, published) = CapabilitySlot::channel();
        let budget = self.config.bootstrap_timeout;

        let outcome = match self.loader.start(slot) {
            Err(e) => Err(e.message),
            Ok(()) => match tokio::time::timeout(budget, published).await {
                Ok(Ok(engine)) => Ok(engine),
                Ok(Err(_)) => {
                    Err("engine stopped before publishing its execute capability".to_string())
                }
                Err(_) => Err(format!(
                    "engine did not publish its execute capability within {}ms",
                    budget.as_millis()
                )),
            },
        };

        match &outcome {
            Ok(_) => tracing::info!("engine ready"),
            Err(message) => tracing::warn!("engine bootstrap failed: {}", message),
        }
        outcome
    }

    /// Answer one request.
    ///
    /// Waits for the shared bootstrap first. A `Run` executes synchronously
    /// on the calling thread and does not yield until the engine returns.
    pub async fn handle(&self, request: Request) -> Response {
        let Request { id, kind } = request;

        let engine = match self.outcome().await {
            Ok(engine) => Arc::clone(engine),
            Err(message) => {
                return Response::failure(id, format!("{}: {}", NOT_READY, message));
            }
        };

        match kind {
            RequestKind::Ping => Response::ready(id),
            RequestKind::Run { code } => run_snippet(id, engine.as_ref(), &code),
        }
    }

    /// Serve requests until the request channel closes.
    ///
    /// The bootstrap starts immediately rather than on the first request.
    /// Each request is handled on its own task, so requests that arrive
    /// during bootstrap are not answered strictly in arrival order.
    pub async fn serve(
        self: Arc<Self>,
        mut requests: mpsc::UnboundedReceiver<Request>,
        responses: mpsc::UnboundedSender<Response>,
    ) {
        let warm = Arc::clone(&self);
        tokio::spawn(async move {
            warm.initialize().await;
        });

        while let Some(request) = requests.recv().await {
            tracing::trace!(id = %request.id, "request received");
            let adapter = Arc::clone(&self);
            let responses = responses.clone();
            tokio::spawn(async move {
                let response = adapter.handle(request).await;
                let _ = responses.send(response);
            });
        }

        tracing::debug!("request channel closed, adapter stopping");
    }
}

fn run_snippet(id: CorrelationId, engine: &dyn Engine, code: &str) -> Response {
    match panic::catch_unwind(AssertUnwindSafe(|| engine.execute(code))) {
        Ok(Ok(output)) => Response::result(
            id,
            output.stdout.unwrap_or_default(),
            output.stderr.unwrap_or_default(),
        ),
        Ok(Err(e)) => Response::failure(id, e.message),
        Err(payload) => Response::failure(
            id,
            format!("engine panicked: {}", panic_message(payload.as_ref())),
        ),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
