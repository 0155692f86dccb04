use std::process::ExitCode;

use anyhow::Context;

#[tokio::main]
async fn main() -> ExitCode {
    // Logging problems are not fatal; the conversation still works.
    if let Err(e) = mcp_host::init_tracing() {
        eprintln!("warning: file logging disabled: {e:#}");
    }

    match try_main().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "mcp-host exited with an error");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn try_main() -> anyhow::Result<()> {
    let cwd = std::env::current_dir().context("failed to resolve the working directory")?;
    let config = mcp_host::config::load_or_builtin(&cwd).context("failed to load configuration")?;

    // Checked before any provider process is started.
    let api_key = mcp_host::inference::api_key_from_env()?;

    let outcome = mcp_host::run(config, api_key).await?;
    tracing::info!(reason = ?outcome.reason, turns = outcome.turns, "=== mcp-host stopped ===");
    Ok(())
}
