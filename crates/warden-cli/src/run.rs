//! Run command implementation for Warden CLI.
//!
//! Sends one snippet through a fresh worker and prints what it captured.

use std::io::Read;

use anyhow::Context;

use crate::ContextArgs;

/// Execute a snippet from `file` (or stdin when `file` is `-`).
pub async fn execute(
    file: &str,
    timeout: Option<u64>,
    json: bool,
    context: &ContextArgs,
) -> anyhow::Result<()> {
    let code = read_snippet(file)?;
    let client = context.client(timeout)?;

    let output = client.run(code, None).await?;

    if json {
        println!("{}", serde_json::to_string(&output)?);
    } else {
        // Streams are printed verbatim, without added newlines
        print!("{}", output.stdout);
        eprint!("{}", output.stderr);
    }

    Ok(())
}

fn read_snippet(file: &str) -> anyhow::Result<String> {
    if file == "-" {
        let mut code = String::new();
        std::io::stdin()
            .read_to_string(&mut code)
            .context("Failed to read snippet from stdin")?;
        return Ok(code);
    }

    std::fs::read_to_string(file).with_context(|| format!("Failed to read snippet {}", file))
}
