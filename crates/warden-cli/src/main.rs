//! Warden CLI - run untrusted snippets in a sandboxed worker process.

mod check;
mod colors;
mod run;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use warden_core::{AdapterConfig, ClientConfig, ProcessContextFactory, SandboxClient};

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "Run untrusted snippets in a sandboxed worker process")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a snippet and print its captured output
    Run {
        /// Path to the snippet, or `-` to read it from stdin
        file: String,

        /// Execution budget in milliseconds
        #[arg(long, value_name = "MS", value_parser = clap::value_parser!(u64).range(1..))]
        timeout: Option<u64>,

        /// Print the output as a JSON object instead of raw streams
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        context: ContextArgs,
    },

    /// Start a worker and wait for its engine to become ready
    Check {
        #[command(flatten)]
        context: ContextArgs,
    },
}

/// Options shared by every command that starts a context.
#[derive(Args)]
pub struct ContextArgs {
    /// Engine library to load in the worker
    #[arg(long, value_name = "PATH")]
    engine: Option<PathBuf>,

    /// Worker binary to spawn (default: WARDEN_WORKER_PATH, then lookup)
    #[arg(long, value_name = "PATH")]
    worker: Option<PathBuf>,

    /// Readiness budget in milliseconds
    #[arg(long, value_name = "MS", value_parser = clap::value_parser!(u64).range(1..))]
    init_timeout: Option<u64>,
}

impl ContextArgs {
    /// Build a client whose contexts are worker processes.
    ///
    /// Flags win over `WARDEN_*` environment variables.
    pub fn client(&self, timeout: Option<u64>) -> anyhow::Result<SandboxClient> {
        let mut config = ClientConfig::from_env()?;
        if let Some(ms) = timeout {
            config.defaults = config
                .defaults
                .with_execution_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.init_timeout {
            config.defaults = config.defaults.with_init_timeout(Duration::from_millis(ms));
        }

        let mut factory = match &self.worker {
            Some(path) => ProcessContextFactory::new(path),
            None => ProcessContextFactory::locate()?,
        };
        if let Some(engine) = &self.engine {
            factory = factory.with_engine(engine);
        }
        factory = factory.with_adapter_config(AdapterConfig::from_env()?);

        tracing::debug!(worker = %factory.command().worker_path.display(), "using worker");
        Ok(SandboxClient::with_config(factory, config))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Helper to format warden-core errors with recovery hints
    let format_error = |err: anyhow::Error| -> anyhow::Error {
        if let Some(warden_err) = err.downcast_ref::<warden_core::Error>() {
            anyhow::anyhow!("{}", warden_err.with_hint())
        } else {
            err
        }
    };

    match cli.command {
        Commands::Run {
            file,
            timeout,
            json,
            context,
        } => {
            run::execute(&file, timeout, json, &context)
                .await
                .map_err(format_error)?;
        }

        Commands::Check { context } => {
            check::execute(&context).await.map_err(format_error)?;
        }
    }

    Ok(())
}
