//! Check command implementation for Warden CLI.

use std::time::Instant;

use crate::ContextArgs;
use crate::colors;

/// Start a worker and report whether its engine comes up.
pub async fn execute(context: &ContextArgs) -> anyhow::Result<()> {
    let client = context.client(None)?;
    let budget = client.config().defaults.init_timeout;

    let start = Instant::now();
    client.await_ready(budget).await?;

    println!(
        "{}ready{} {}({:.2}s){}",
        colors::GREEN,
        colors::RESET,
        colors::DIM,
        start.elapsed().as_secs_f64(),
        colors::RESET
    );
    Ok(())
}
