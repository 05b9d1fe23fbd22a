//! Contexts backed by `warden-worker` processes.

use std::path::PathBuf;

use crate::config::AdapterConfig;
use crate::error::Result;
use crate::ipc::{Request, WorkerCommand, WorkerProcess};

use super::{ContextEvents, ContextFactory, IsolatedContext};

/// Spawns one worker process per context.
#[derive(Debug, Clone)]
pub struct ProcessContextFactory {
    command: WorkerCommand,
}

impl ProcessContextFactory {
    /// Use the worker binary at `worker_path`.
    pub fn new(worker_path: impl Into<PathBuf>) -> Self {
        Self {
            command: WorkerCommand::new(worker_path),
        }
    }

    /// Find the worker binary the usual way (see [`WorkerCommand::locate`]).
    pub fn locate() -> Result<Self> {
        Ok(Self {
            command: WorkerCommand::locate()?,
        })
    }

    /// Tell workers to load the engine from `engine_path`.
    pub fn with_engine(mut self, engine_path: impl Into<PathBuf>) -> Self {
        self.command.engine_path = Some(engine_path.into());
        self
    }

    /// Adapter settings forwarded to every worker.
    pub fn with_adapter_config(mut self, config: AdapterConfig) -> Self {
        self.command.adapter = config;
        self
    }

    pub fn command(&self) -> &WorkerCommand {
        &self.command
    }
}

impl ContextFactory for ProcessContextFactory {
    fn create(&self, events: ContextEvents) -> Result<Box<dyn IsolatedContext>> {
        let worker = WorkerProcess::spawn(&self.command, events)?;
        Ok(Box::new(ProcessContext { worker }))
    }
}

struct ProcessContext {
    worker: WorkerProcess,
}

impl IsolatedContext for ProcessContext {
    fn post(&mut self, request: Request) -> Result<()> {
        self.worker.send(request)
    }

    fn destroy(&mut self) {
        self.worker.kill();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::ipc::CorrelationId;

    #[test]
    fn test_builder_fills_command() {
        let config = AdapterConfig {
            bootstrap_timeout: Duration::from_millis(750),
        };
        let factory = ProcessContextFactory::new("/opt/warden/warden-worker")
            .with_engine("/opt/warden/libwarden_engine.so")
            .with_adapter_config(config);

        let command = factory.command();
        assert_eq!(command.worker_path, PathBuf::from("/opt/warden/warden-worker"));
        assert_eq!(
            command.engine_path,
            Some(PathBuf::from("/opt/warden/libwarden_engine.so"))
        );
        assert_eq!(command.adapter, config);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_post_after_destroy_fails() {
        let (events, _rx) = tokio::sync::mpsc::unbounded_channel();
        let mut context = ProcessContextFactory::new("/bin/cat").create(events).unwrap();

        context.destroy();
        context.destroy();

        assert!(context.post(Request::ping(CorrelationId::generate())).is_err());
    }
}
