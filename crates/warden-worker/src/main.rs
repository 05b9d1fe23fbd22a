//! Warden worker process.
//!
//! Hosts one isolated context: it loads the engine library, then answers
//! length-prefixed requests from stdin with responses on stdout. Logs go to
//! stderr, which the host passes through.
//!
//! The host never asks a worker to stop a snippet. It kills the process.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use warden_core::ipc::{Request, Response, read_frame, write_frame};
use warden_core::{Adapter, AdapterConfig, DylibEngineLoader};

fn main() -> Result<()> {
    init_logging();

    let config = AdapterConfig::from_env()?;

    // Single thread: a running snippet owns the worker until it returns.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start worker runtime")?;

    runtime.block_on(serve(config))
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_env("WARDEN_WORKER_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn serve(config: AdapterConfig) -> Result<()> {
    let loader = DylibEngineLoader::locate();
    tracing::debug!(engine = %loader.path().display(), pid = std::process::id(), "worker starting");

    let adapter = Adapter::new(Arc::new(loader), config);
    let (requests, queue) = mpsc::unbounded_channel::<Request>();
    let (responses, mut outbox) = mpsc::unbounded_channel::<Response>();

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(response) = outbox.recv().await {
            write_frame(&mut stdout, &response).await?;
        }
        Ok::<_, warden_core::Error>(())
    });

    let reader = async move {
        let mut stdin = tokio::io::stdin();
        while let Some(request) = read_frame::<_, Request>(&mut stdin).await? {
            if requests.send(request).is_err() {
                break;
            }
        }
        Ok::<_, warden_core::Error>(())
    };

    let (read_result, ()) = tokio::join!(reader, adapter.serve(queue, responses));
    read_result.context("Failed to read request from host")?;

    writer
        .await
        .context("Response writer panicked")?
        .context("Failed to write response to host")?;

    tracing::debug!("host closed the request stream, worker exiting");
    Ok(())
}
