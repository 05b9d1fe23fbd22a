//! Contexts backed by a dedicated OS thread in this process.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::mpsc;

use crate::adapter::Adapter;
use crate::config::AdapterConfig;
use crate::engine::EngineLoader;
use crate::error::{Error, Result};
use crate::ipc::{Request, Response};

use super::{ContextEvent, ContextEvents, ContextFactory, IsolatedContext};

static NEXT_THREAD: AtomicU64 = AtomicU64::new(1);

/// Runs each context's adapter on its own thread with a current-thread
/// runtime, so a blocking `execute` stalls only that context.
pub struct ThreadContextFactory {
    loader: Arc<dyn EngineLoader>,
    config: AdapterConfig,
}

impl ThreadContextFactory {
    pub fn new(loader: impl EngineLoader + 'static) -> Self {
        Self {
            loader: Arc::new(loader),
            config: AdapterConfig::default(),
        }
    }

    pub fn with_adapter_config(mut self, config: AdapterConfig) -> Self {
        self.config = config;
        self
    }
}

impl ContextFactory for ThreadContextFactory {
    fn create(&self, events: ContextEvents) -> Result<Box<dyn IsolatedContext>> {
        let (requests, queue) = mpsc::unbounded_channel();
        let destroyed = Arc::new(AtomicBool::new(false));
        let adapter = Adapter::new(Arc::clone(&self.loader), self.config);

        let name = format!("warden-context-{}", NEXT_THREAD.fetch_add(1, Ordering::Relaxed));
        let flag = Arc::clone(&destroyed);
        std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_context(adapter, queue, events, flag))
            .map_err(|e| Error::Ipc(format!("Failed to spawn context thread: {}", e)))?;

        tracing::debug!(thread = %name, "started context thread");

        Ok(Box::new(ThreadContext {
            requests: Some(requests),
            destroyed,
        }))
    }
}

fn run_context(
    adapter: Arc<Adapter>,
    queue: mpsc::UnboundedReceiver<Request>,
    events: ContextEvents,
    destroyed: Arc<AtomicBool>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            let _ = events.send(ContextEvent::Crashed {
                reason: format!("failed to start context runtime: {}", e),
            });
            return;
        }
    };

    let (responses, mut outbox) = mpsc::unbounded_channel::<Response>();
    runtime.block_on(async move {
        let forward = async {
            while let Some(response) = outbox.recv().await {
                if destroyed.load(Ordering::SeqCst) {
                    break;
                }
                if events.send(ContextEvent::Response(response)).is_err() {
                    break;
                }
            }
        };
        tokio::join!(adapter.serve(queue, responses), forward);
    });
}

struct ThreadContext {
    requests: Option<mpsc::UnboundedSender<Request>>,
    destroyed: Arc<AtomicBool>,
}

impl IsolatedContext for ThreadContext {
    fn post(&mut self, request: Request) -> Result<()> {
        let requests = self
            .requests
            .as_ref()
            .ok_or_else(|| Error::Ipc("Context has been destroyed".to_string()))?;
        requests
            .send(request)
            .map_err(|_| Error::Ipc("Context thread has exited".to_string()))
    }

    fn destroy(&mut self) {
        // Closing the queue stops the adapter once the engine returns; if it
        // never does, the thread is simply left behind.
        self.destroyed.store(true, Ordering::SeqCst);
        self.requests = None;
    }
}

impl Drop for ThreadContext {
    fn drop(&mut self) {
        self.destroy();
    }
}
