//! Execution host client.
//!
//! `SandboxClient` owns one isolated context at a time and everything needed
//! to talk to it: the context handle, its readiness flag, and the table of
//! pending calls keyed by correlation id.
//!
//! ```text
//! run(code) ──▶ await_ready ──▶ register id ──▶ post Run ──▶ wait (timer)
//!                  │                                          │
//!                  └─ ensure_context (lazy create + warm-up)  ├─ Result  → Ok(output)
//!                                                             ├─ Failure → ExecutionFailure
//!                                                             └─ timeout → destroy context,
//!                                                                          fail every pending call
//! ```
//!
//! Cancellation is always destroy-and-replace: the context is torn down, all
//! outstanding calls fail, and the next call builds a fresh context.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use rustc_hash::FxHashMap;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::{ClientConfig, RunOptions};
use crate::context::{ContextEvent, ContextFactory, IsolatedContext};
use crate::error::{Error, Result};
use crate::ipc::{CorrelationId, Request, Response, ResponseKind};

/// Captured output of a snippet, exactly as the engine produced it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingKind {
    Handshake,
    Run,
}

enum Reply {
    Ready,
    Output(RunOutput),
}

/// Bookkeeping for one outstanding request.
///
/// The timer lives with the waiting caller (a `timeout` around the
/// receiver); completing the record ends that wait.
struct PendingCall {
    kind: PendingKind,
    complete: oneshot::Sender<Result<Reply>>,
}

struct LiveContext {
    generation: u64,
    handle: Box<dyn IsolatedContext>,
    ready: bool,
    dispatcher: JoinHandle<()>,
}

#[derive(Default)]
struct ClientState {
    context: Option<LiveContext>,
    generation: u64,
    pending: FxHashMap<CorrelationId, PendingCall>,
}

impl ClientState {
    fn is_current(&self, generation: u64) -> bool {
        self.context
            .as_ref()
            .is_some_and(|context| context.generation == generation)
    }

    /// Register a pending call and post its request to the live context.
    fn dispatch(
        &mut self,
        request: Request,
        kind: PendingKind,
    ) -> Result<oneshot::Receiver<Result<Reply>>> {
        let id = request.id.clone();
        let context = self.context.as_mut().ok_or(Error::NotReady)?;

        let (complete, receiver) = oneshot::channel();
        self.pending.insert(id.clone(), PendingCall { kind, complete });

        if let Err(e) = context.handle.post(request) {
            self.pending.remove(&id);
            self.reset("request could not be posted");
            return Err(e);
        }
        Ok(receiver)
    }

    /// Destroy the context (if any) and fail every pending call.
    fn reset(&mut self, reason: &str) {
        if let Some(mut context) = self.context.take() {
            context.handle.destroy();
            context.dispatcher.abort();
            tracing::debug!(generation = context.generation, reason, "context destroyed");
        }

        if !self.pending.is_empty() {
            tracing::debug!(count = self.pending.len(), reason, "failing pending calls");
        }
        for (_, call) in self.pending.drain() {
            let _ = call.complete.send(Err(Error::ResetInterrupted));
        }
    }

    fn on_event(&mut self, generation: u64, event: ContextEvent) {
        if !self.is_current(generation) {
            tracing::trace!(generation, "discarding event from a retired context");
            return;
        }

        match event {
            ContextEvent::Response(response) => self.on_response(response),
            ContextEvent::Crashed { reason } => {
                tracing::warn!(generation, %reason, "context crashed");
                self.reset("context crashed");
            }
        }
    }

    fn on_response(&mut self, response: Response) {
        let Response { id, kind } = response;

        let Some(call) = self.pending.remove(&id) else {
            tracing::trace!(%id, "discarding unmatched response");
            return;
        };

        match (call.kind, kind) {
            (PendingKind::Handshake, ResponseKind::Ready) => {
                if let Some(context) = self.context.as_mut() {
                    context.ready = true;
                }
                let _ = call.complete.send(Ok(Reply::Ready));
            }
            (PendingKind::Handshake, ResponseKind::Failure { message }) => {
                let _ = call.complete.send(Err(Error::BootstrapFailure(message)));
                // A failed adapter never recovers; start over next time
                self.reset("bootstrap failed");
            }
            (PendingKind::Run, ResponseKind::Result { stdout, stderr }) => {
                let _ = call
                    .complete
                    .send(Ok(Reply::Output(RunOutput { stdout, stderr })));
            }
            (PendingKind::Run, ResponseKind::Failure { message }) => {
                let _ = call.complete.send(Err(Error::ExecutionFailure(message)));
            }
            (expected, kind) => {
                let _ = call.complete.send(Err(Error::Ipc(format!(
                    "unexpected {} response to a {:?} request",
                    response_name(&kind),
                    expected
                ))));
            }
        }
    }
}

fn response_name(kind: &ResponseKind) -> &'static str {
    match kind {
        ResponseKind::Ready => "Ready",
        ResponseKind::Result { .. } => "Result",
        ResponseKind::Failure { .. } => "Failure",
    }
}

/// Turn whatever came out of a completion channel into the call's outcome.
///
/// A closed channel means the record was dropped without completing, which
/// only happens when its context went away.
fn settle<E>(received: std::result::Result<Result<Reply>, E>) -> Result<Reply> {
    received.unwrap_or(Err(Error::ResetInterrupted))
}

/// Drains one context's events into the client state.
///
/// Holds only a weak reference so a dropped client is not kept alive by its
/// own dispatcher.
async fn dispatch_events(
    state: Weak<Mutex<ClientState>>,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<ContextEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(shared) = state.upgrade() else {
            return;
        };
        let mut guard = shared.lock().unwrap_or_else(PoisonError::into_inner);
        guard.on_event(generation, event);
    }

    // Every sender is gone without a crash report; treat it as one.
    if let Some(shared) = state.upgrade() {
        let mut guard = shared.lock().unwrap_or_else(PoisonError::into_inner);
        guard.on_event(
            generation,
            ContextEvent::Crashed {
                reason: "context closed its event channel".to_string(),
            },
        );
    }
}

/// Client for running snippets in an isolated, disposable context.
///
/// Concurrent calls on one client share its context, and therefore share a
/// timeout's blast radius: when one call times out, every call pending on
/// the same context fails. Use separate clients for independent sandboxes.
pub struct SandboxClient {
    factory: Arc<dyn ContextFactory>,
    config: ClientConfig,
    state: Arc<Mutex<ClientState>>,
}

impl SandboxClient {
    /// Create a client with default budgets.
    ///
    /// No context is started until the first call.
    pub fn new(factory: impl ContextFactory + 'static) -> Self {
        Self::with_config(factory, ClientConfig::default())
    }

    pub fn with_config(factory: impl ContextFactory + 'static, config: ClientConfig) -> Self {
        Self {
            factory: Arc::new(factory),
            config,
            state: Arc::new(Mutex::new(ClientState::default())),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a snippet and return its captured output verbatim.
    ///
    /// `options` overrides the client's default budgets for this call.
    pub async fn run(
        &self,
        code: impl Into<String>,
        options: Option<RunOptions>,
    ) -> Result<RunOutput> {
        let options = options.unwrap_or(self.config.defaults);
        let code = code.into();

        self.await_ready(options.init_timeout).await?;

        let id = CorrelationId::generate();
        let mut receiver = {
            let mut state = self.lock();
            // A concurrent timeout may have replaced the context meanwhile
            if !state.context.as_ref().is_some_and(|context| context.ready) {
                return Err(Error::NotReady);
            }
            state.dispatch(Request::run(id.clone(), code), PendingKind::Run)?
        };
        tracing::trace!(%id, "run dispatched");

        let budget = options.execution_timeout;
        let reply = match tokio::time::timeout(budget, &mut receiver).await {
            Ok(received) => settle(received),
            Err(_) => {
                let mut state = self.lock();
                if state.pending.remove(&id).is_none() {
                    // Completed just as the timer fired; that outcome stands
                    drop(state);
                    settle(receiver.try_recv())
                } else {
                    tracing::warn!(
                        %id,
                        budget_ms = budget.as_millis() as u64,
                        "execution timed out, destroying context"
                    );
                    state.reset("execution timed out");
                    Err(Error::ExecutionTimeout { budget })
                }
            }
        };

        match reply? {
            Reply::Output(output) => Ok(output),
            Reply::Ready => Err(Error::Ipc("unexpected Ready reply to a run request".to_string())),
        }
    }

    /// Wait until the context's engine is ready, creating the context if
    /// needed.
    ///
    /// Running out of `budget` fails with [`Error::InitTimeout`] but leaves
    /// the context alive: a slow bootstrap is not a dead one.
    pub async fn await_ready(&self, budget: Duration) -> Result<()> {
        let (id, mut receiver) = {
            let mut state = self.lock();
            self.ensure_context(&mut state)?;
            if state.context.as_ref().is_some_and(|context| context.ready) {
                return Ok(());
            }
            let id = CorrelationId::generate();
            let receiver = state.dispatch(Request::ping(id.clone()), PendingKind::Handshake)?;
            (id, receiver)
        };

        let reply = match tokio::time::timeout(budget, &mut receiver).await {
            Ok(received) => settle(received),
            Err(_) => {
                let mut state = self.lock();
                if state.pending.remove(&id).is_some() {
                    tracing::debug!(
                        budget_ms = budget.as_millis() as u64,
                        "readiness handshake timed out"
                    );
                    return Err(Error::InitTimeout { budget });
                }
                drop(state);
                settle(receiver.try_recv())
            }
        };

        reply.map(|_| ())
    }

    /// Destroy the context, if any, and fail every pending call.
    ///
    /// Safe to call at any time; the next call starts a fresh context.
    pub fn reset_context(&self) {
        self.lock().reset("reset requested");
    }

    /// Whether a context exists and has completed its readiness handshake.
    pub fn is_ready(&self) -> bool {
        self.lock()
            .context
            .as_ref()
            .is_some_and(|context| context.ready)
    }

    pub fn has_context(&self) -> bool {
        self.lock().context.is_some()
    }

    /// Number of calls still waiting on the context.
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    fn ensure_context(&self, state: &mut ClientState) -> Result<()> {
        if state.context.is_some() {
            return Ok(());
        }

        state.generation += 1;
        let generation = state.generation;
        let (events, receiver) = mpsc::unbounded_channel();
        let mut handle = self.factory.create(events)?;

        // Warm-up ping: gets the adapter going before anyone waits on it.
        // Its answer is never registered and is discarded on arrival.
        if let Err(e) = handle.post(Request::ping(CorrelationId::warmup())) {
            handle.destroy();
            return Err(e);
        }

        let dispatcher = tokio::spawn(dispatch_events(
            Arc::downgrade(&self.state),
            generation,
            receiver,
        ));
        state.context = Some(LiveContext {
            generation,
            handle,
            ready: false,
            dispatcher,
        });

        tracing::debug!(generation, "context created");
        Ok(())
    }
}

impl Drop for SandboxClient {
    fn drop(&mut self) {
        self.lock().reset("client dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Instant;

    use crate::config::AdapterConfig;
    use crate::context::{ContextEvents, ThreadContextFactory};
    use crate::engine::{EngineError, EngineOutput, InProcessLoader};
    use crate::ipc::RequestKind;

    // -- Thread-backed contexts running the real adapter ---------------------

    /// Engine whose `loop` snippet never returns.
    fn sandbox(entered_loop: Arc<AtomicBool>) -> ThreadContextFactory {
        ThreadContextFactory::new(InProcessLoader::new(
            move |code: &str| -> std::result::Result<EngineOutput, EngineError> {
                match code {
                    "x" => Ok(EngineOutput::new("5\n", "")),
                    "print 1" => Ok(EngineOutput::stdout("1\n")),
                    "throw" => Err(EngineError::new("boom")),
                    "loop" => {
                        entered_loop.store(true, Ordering::SeqCst);
                        loop {
                            std::thread::park();
                        }
                    }
                    other => Ok(EngineOutput::new("", format!("unknown snippet: {other}\n"))),
                }
            },
        ))
    }

    fn budget(ms: u64) -> Option<RunOptions> {
        Some(RunOptions::default().with_execution_timeout(Duration::from_millis(ms)))
    }

    #[tokio::test]
    async fn test_run_returns_output_verbatim() {
        let client = SandboxClient::new(sandbox(Arc::default()));

        let output = client.run("x", None).await.unwrap();

        assert_eq!(
            output,
            RunOutput {
                stdout: "5\n".to_string(),
                stderr: String::new(),
            }
        );
        assert!(client.is_ready());
        assert_eq!(client.pending_count(), 0);
    }

    #[test]
    fn test_run_output_json_shape() {
        let output = RunOutput {
            stdout: "5\n".to_string(),
            stderr: String::new(),
        };

        let json = serde_json::to_value(&output).unwrap();

        assert_eq!(json, serde_json::json!({ "stdout": "5\n", "stderr": "" }));
    }

    #[tokio::test]
    async fn test_engine_error_propagates() {
        let client = SandboxClient::new(sandbox(Arc::default()));

        let err = client.run("throw", None).await.unwrap_err();

        assert!(matches!(err, Error::ExecutionFailure(_)));
        assert!(err.to_string().contains("boom"));
        // Engine errors are not fatal to the context
        assert!(client.is_ready());
    }

    #[tokio::test]
    async fn test_timeout_recreates_context() {
        let client = SandboxClient::new(sandbox(Arc::default()));

        let start = Instant::now();
        let err = client.run("loop", budget(50)).await.unwrap_err();
        let elapsed = start.elapsed();

        assert!(matches!(err, Error::ExecutionTimeout { .. }), "got {err:?}");
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(1500), "took {elapsed:?}");
        assert!(!client.has_context());

        let output = client.run("print 1", None).await.unwrap();
        assert_eq!(output.stdout, "1\n");
    }

    #[tokio::test]
    async fn test_timeout_fails_every_pending_call() {
        let entered_loop = Arc::new(AtomicBool::new(false));
        let client = Arc::new(SandboxClient::new(sandbox(Arc::clone(&entered_loop))));
        client.await_ready(Duration::from_secs(5)).await.unwrap();

        let hung = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.run("loop", budget(300)).await })
        };
        while !entered_loop.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        // Queued behind the hung snippet on the same context
        let healthy = client.run("print 1", budget(5_000)).await;
        let hung = hung.await.unwrap();

        assert!(matches!(hung, Err(Error::ExecutionTimeout { .. })), "got {hung:?}");
        assert!(matches!(healthy, Err(Error::ResetInterrupted)), "got {healthy:?}");
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_separate_clients_do_not_share_blast_radius() {
        let first = SandboxClient::new(sandbox(Arc::default()));
        let second = SandboxClient::new(sandbox(Arc::default()));

        let (hung, healthy) = tokio::join!(
            first.run("loop", budget(50)),
            second.run("x", budget(5_000))
        );

        assert!(matches!(hung, Err(Error::ExecutionTimeout { .. })));
        assert_eq!(healthy.unwrap().stdout, "5\n");
    }

    #[tokio::test]
    async fn test_bootstrap_timeout_surfaces_as_bootstrap_failure() {
        struct NeverStarts;

        impl crate::engine::EngineLoader for NeverStarts {
            fn start(
                &self,
                slot: crate::engine::CapabilitySlot,
            ) -> std::result::Result<(), EngineError> {
                // Keep the slot alive for longer than the bootstrap budget
                std::thread::spawn(move || {
                    std::thread::sleep(Duration::from_secs(2));
                    drop(slot);
                });
                Ok(())
            }
        }

        let factory = ThreadContextFactory::new(NeverStarts).with_adapter_config(AdapterConfig {
            bootstrap_timeout: Duration::from_millis(50),
        });
        let client = SandboxClient::new(factory);

        let err = client.run("x", None).await.unwrap_err();

        match err {
            Error::BootstrapFailure(message) => assert!(message.contains("within 50ms")),
            other => panic!("expected bootstrap failure, got {other:?}"),
        }
        assert!(!client.has_context());
    }

    // -- Scripted contexts, for exact control over responses -----------------

    #[derive(Default)]
    struct ScriptState {
        events: Vec<ContextEvents>,
        posted: Vec<Request>,
        destroyed: usize,
        answer_pings: bool,
    }

    #[derive(Clone, Default)]
    struct Script(Arc<Mutex<ScriptState>>);

    impl Script {
        fn answering_pings() -> Self {
            let script = Self::default();
            script.0.lock().unwrap().answer_pings = true;
            script
        }

        fn respond(&self, context: usize, response: Response) {
            let state = self.0.lock().unwrap();
            let _ = state.events[context].send(ContextEvent::Response(response));
        }

        fn crash(&self, context: usize) {
            let state = self.0.lock().unwrap();
            let _ = state.events[context].send(ContextEvent::Crashed {
                reason: "worker exited".to_string(),
            });
        }

        fn contexts(&self) -> usize {
            self.0.lock().unwrap().events.len()
        }

        fn destroyed(&self) -> usize {
            self.0.lock().unwrap().destroyed
        }

        fn posted(&self) -> Vec<Request> {
            self.0.lock().unwrap().posted.clone()
        }

        /// Wait until a `Run` has been posted and return its id.
        async fn next_run(&self) -> CorrelationId {
            for _ in 0..1000 {
                let run = self
                    .posted()
                    .into_iter()
                    .find(|request| matches!(request.kind, RequestKind::Run { .. }));
                if let Some(request) = run {
                    return request.id;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            panic!("no run request was posted");
        }
    }

    struct ScriptedContext {
        script: Script,
        index: usize,
    }

    impl IsolatedContext for ScriptedContext {
        fn post(&mut self, request: Request) -> Result<()> {
            let mut state = self.script.0.lock().unwrap();
            if state.answer_pings && request.kind == RequestKind::Ping {
                let _ = state.events[self.index]
                    .send(ContextEvent::Response(Response::ready(request.id.clone())));
            }
            state.posted.push(request);
            Ok(())
        }

        fn destroy(&mut self) {
            self.script.0.lock().unwrap().destroyed += 1;
        }
    }

    impl ContextFactory for Script {
        fn create(&self, events: ContextEvents) -> Result<Box<dyn IsolatedContext>> {
            let mut state = self.0.lock().unwrap();
            state.events.push(events);
            Ok(Box::new(ScriptedContext {
                script: self.clone(),
                index: state.events.len() - 1,
            }))
        }
    }

    async fn settle_events() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_reset_without_context_is_noop() {
        let script = Script::default();
        let client = SandboxClient::new(script.clone());

        client.reset_context();
        client.reset_context();

        assert!(!client.has_context());
        assert_eq!(script.contexts(), 0);
        assert_eq!(script.destroyed(), 0);
    }

    #[tokio::test]
    async fn test_warmup_ping_is_sent_first_and_never_registered() {
        let script = Script::answering_pings();
        let client = SandboxClient::new(script.clone());

        client.await_ready(Duration::from_secs(1)).await.unwrap();

        let posted = script.posted();
        assert_eq!(posted[0], Request::ping(CorrelationId::warmup()));
        assert_eq!(posted[1].kind, RequestKind::Ping);
        assert_ne!(posted[1].id, CorrelationId::warmup());
        assert!(client.is_ready());
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_ready_client_skips_handshake() {
        let script = Script::answering_pings();
        let client = SandboxClient::new(script.clone());

        client.await_ready(Duration::from_secs(1)).await.unwrap();
        client.await_ready(Duration::from_secs(1)).await.unwrap();

        assert_eq!(script.posted().len(), 2);
    }

    #[tokio::test]
    async fn test_stray_response_leaves_state_alone() {
        let script = Script::answering_pings();
        let client = SandboxClient::new(script.clone());
        client.await_ready(Duration::from_secs(1)).await.unwrap();

        script.respond(0, Response::result(CorrelationId::from("nobody"), "x".into(), "".into()));
        script.respond(0, Response::failure(CorrelationId::from("nobody"), "late"));
        script.respond(0, Response::ready(CorrelationId::from("nobody")));
        settle_events().await;

        assert!(client.is_ready());
        assert!(client.has_context());
        assert_eq!(client.pending_count(), 0);
        assert_eq!(script.destroyed(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_response_completes_once() {
        let script = Script::answering_pings();
        let client = Arc::new(SandboxClient::new(script.clone()));

        let call = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.run("x", None).await })
        };
        let id = script.next_run().await;

        script.respond(0, Response::result(id.clone(), "first".into(), "".into()));
        script.respond(0, Response::result(id, "second".into(), "".into()));

        let output = call.await.unwrap().unwrap();
        settle_events().await;

        assert_eq!(output.stdout, "first");
        assert_eq!(client.pending_count(), 0);
        assert!(client.is_ready());
    }

    #[tokio::test]
    async fn test_init_timeout_keeps_context_alive() {
        let script = Script::default();
        let client = SandboxClient::new(script.clone());

        let err = client
            .await_ready(Duration::from_millis(50))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InitTimeout { .. }));
        assert!(client.has_context());
        assert!(!client.is_ready());
        assert_eq!(client.pending_count(), 0);
        assert_eq!(script.destroyed(), 0);
    }

    #[tokio::test]
    async fn test_handshake_failure_discards_context() {
        let script = Script::default();
        let client = Arc::new(SandboxClient::new(script.clone()));

        let call = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.await_ready(Duration::from_secs(5)).await })
        };
        let handshake = loop {
            let pings: Vec<Request> = script.posted();
            if let Some(ping) = pings.into_iter().find(|r| r.id != CorrelationId::warmup()) {
                break ping.id;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        };

        script.respond(0, Response::failure(handshake, "runner not ready: no engine"));
        let err = call.await.unwrap().unwrap_err();

        assert!(matches!(err, Error::BootstrapFailure(ref m) if m.contains("no engine")));
        assert!(!client.has_context());
        assert_eq!(script.destroyed(), 1);
    }

    #[tokio::test]
    async fn test_crash_fails_pending_and_next_call_recreates() {
        let script = Script::answering_pings();
        let client = Arc::new(SandboxClient::new(script.clone()));

        let call = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.run("x", None).await })
        };
        script.next_run().await;
        script.crash(0);

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::ResetInterrupted));
        assert!(!client.has_context());

        client.await_ready(Duration::from_secs(1)).await.unwrap();
        assert_eq!(script.contexts(), 2);
    }

    #[tokio::test]
    async fn test_reset_fails_pending_call() {
        let script = Script::answering_pings();
        let client = Arc::new(SandboxClient::new(script.clone()));

        let call = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.run("x", None).await })
        };
        script.next_run().await;
        client.reset_context();

        assert!(matches!(call.await.unwrap(), Err(Error::ResetInterrupted)));
        assert_eq!(script.destroyed(), 1);
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_events_from_retired_context_are_ignored() {
        let script = Script::answering_pings();
        let client = SandboxClient::new(script.clone());
        client.await_ready(Duration::from_secs(1)).await.unwrap();
        client.reset_context();
        client.await_ready(Duration::from_secs(1)).await.unwrap();

        script.crash(0);
        settle_events().await;

        assert!(client.is_ready());
        assert_eq!(script.destroyed(), 1);
    }

    #[tokio::test]
    async fn test_mismatched_response_kind_is_an_error() {
        let script = Script::answering_pings();
        let client = Arc::new(SandboxClient::new(script.clone()));

        let call = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.run("x", None).await })
        };
        let id = script.next_run().await;
        script.respond(0, Response::ready(id));

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Ipc(ref m) if m.contains("unexpected Ready")));
    }

    #[tokio::test]
    async fn test_dropping_client_destroys_context() {
        let script = Script::answering_pings();
        let client = SandboxClient::new(script.clone());
        client.await_ready(Duration::from_secs(1)).await.unwrap();

        drop(client);

        assert_eq!(script.destroyed(), 1);
    }
}
