pub mod agent_core;
pub mod config;
pub mod inference;
pub mod mcp_client;

#[cfg(test)]
pub(crate) mod testing;

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt};

use agent_core::{
    ConversationController, ConversationError, ConversationOutcome, ConversationSettings,
    Dispatcher, ExitReason,
};
use config::HostConfig;
use inference::{ModelBackend, ResponsesClient};
use mcp_client::{ProcessSupervisor, ProviderConnector, StdioConnector, ToolCatalog};

/// Return the platform-standard data directory for mcp-host.
///
/// - macOS: `~/Library/Application Support/mcp-host/`
/// - Windows: `{FOLDERID_RoamingAppData}\mcp-host\`
/// - Linux: `$XDG_DATA_HOME/mcp-host/` (fallback `~/.local/share/mcp-host/`)
///
/// Falls back to `~/.mcp-host/` only if none of the above can be resolved.
pub fn data_dir() -> std::path::PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("mcp-host");
    }
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".mcp-host")
}

/// Initialize the tracing subscriber, writing structured logs to the data directory.
///
/// On each startup:
/// 1. Rotates existing logs (host.log → host.log.1 → .2 → .3, keeps last 3).
/// 2. Opens a fresh host.log with a line-flushing writer for crash resilience.
/// 3. Logs a startup banner with the log path for discoverability.
///
/// Stdout is left alone; it carries the conversation.
pub fn init_tracing() -> anyhow::Result<std::path::PathBuf> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = data_dir();
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("failed to create log directory {}", log_dir.display()))?;

    let log_path = log_dir.join("host.log");

    // Rotate: host.log.2 → .3, .1 → .2, host.log → .1
    rotate_log_file(&log_path, 3);

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("failed to open {}", log_path.display()))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("mcp_host=info,warn"));

    fmt::fmt()
        .with_env_filter(filter)
        .with_writer(FlushingWriter::new(log_file))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_file = %log_path.display(),
        pid = std::process::id(),
        "=== mcp-host starting ==="
    );

    Ok(log_path)
}

/// Rotate log files: `host.log` → `host.log.1` → `.2` → … → `.{keep}`.
///
/// Oldest file beyond `keep` is deleted. Missing files in the chain are skipped.
fn rotate_log_file(base_path: &std::path::Path, keep: u32) {
    let oldest = format!("{}.{keep}", base_path.display());
    let _ = std::fs::remove_file(&oldest);

    for i in (1..keep).rev() {
        let from = format!("{}.{i}", base_path.display());
        let to = format!("{}.{}", base_path.display(), i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    if base_path.exists() {
        let to = format!("{}.1", base_path.display());
        let _ = std::fs::rename(base_path, &to);
    }
}

/// A writer that wraps `std::fs::File` and flushes after every write.
///
/// Without explicit flushing, log entries may sit in OS buffers and be lost
/// when the process is killed mid-conversation.
#[derive(Clone)]
struct FlushingWriter {
    file: Arc<std::sync::Mutex<std::fs::File>>,
}

impl FlushingWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: Arc::new(std::sync::Mutex::new(file)),
        }
    }
}

impl std::io::Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        let n = std::io::Write::write(&mut *f, buf)?;
        std::io::Write::flush(&mut *f)?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        std::io::Write::flush(&mut *f)
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

// ─── Host Entry ──────────────────────────────────────────────────────────────

/// Run the host against the real process surface: stdio providers, the
/// Responses API, the terminal, and Ctrl-C.
pub async fn run(config: HostConfig, api_key: String) -> anyhow::Result<ConversationOutcome> {
    let model = ResponsesClient::new(&config.base_url, api_key)
        .context("failed to create model client")?;

    // Listen before any provider starts so Ctrl-C during launch still tears down.
    let interrupt = interrupt_signal();
    let stdin = spawn_line_reader(std::io::stdin()).context("failed to start console reader")?;
    let stdout = tokio::io::stdout();

    let outcome = run_session(
        &config,
        Arc::new(StdioConnector),
        model,
        stdin,
        stdout,
        interrupt,
    )
    .await?;
    Ok(outcome)
}

/// Resolves on the first Ctrl-C. Never resolves if the listener can't be
/// installed.
fn interrupt_signal() -> impl Future<Output = ()> {
    let (tx, rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                let _ = tx.send(());
            }
            Err(e) => tracing::warn!(error = %e, "failed to listen for Ctrl-C"),
        }
    });
    async move {
        if rx.await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Feed lines from a blocking reader into an async buffered stream.
///
/// Reads happen on a detached OS thread, so a read still waiting for the
/// terminal never holds up runtime shutdown. A read error ends the stream.
pub fn spawn_line_reader<S>(source: S) -> std::io::Result<tokio::io::BufReader<tokio::io::DuplexStream>>
where
    S: std::io::Read + Send + 'static,
{
    use std::io::BufRead;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    std::thread::Builder::new()
        .name("console-input".into())
        .spawn(move || {
            for line in std::io::BufReader::new(source).lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "console read failed");
                        break;
                    }
                }
            }
        })?;

    let (mut writer, reader) = tokio::io::duplex(CONSOLE_BUFFER_BYTES);
    tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if writer.write_all(line.as_bytes()).await.is_err() || writer.write_all(b"\n").await.is_err() {
                break;
            }
        }
    });
    Ok(tokio::io::BufReader::new(reader))
}

const CONSOLE_BUFFER_BYTES: usize = 64 * 1024;

/// Launch providers, converse, and tear everything down.
///
/// The conversation races `interrupt`, which wins if it is already resolved
/// when launch finishes. Whichever way it ends (exit command, end of input,
/// fatal error, interrupt) every Ready provider is closed exactly once, in
/// reverse launch order, before this returns.
pub async fn run_session<M, R, W, I>(
    config: &HostConfig,
    connector: Arc<dyn ProviderConnector>,
    model: M,
    input: R,
    output: W,
    interrupt: I,
) -> Result<ConversationOutcome, ConversationError>
where
    M: ModelBackend,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    I: Future<Output = ()>,
{
    let mut supervisor = ProcessSupervisor::launch_all(&config.providers, connector).await;

    for (name, cause) in supervisor.failures() {
        eprintln!("Failed to start provider '{name}': {cause}");
    }

    let catalog = ToolCatalog::build(supervisor.sessions());
    tracing::info!(
        providers = config.providers.len(),
        ready = supervisor.ready_sessions().count(),
        tools = catalog.len(),
        "host ready"
    );

    let result = {
        let mut controller = ConversationController::new(
            model,
            &catalog,
            Dispatcher::new(&supervisor),
            ConversationSettings::from(config),
        );
        tokio::select! {
            biased;
            _ = interrupt => {
                tracing::info!("interrupted");
                Ok(ConversationOutcome {
                    reason: ExitReason::Interrupted,
                    turns: controller.turns(),
                })
            }
            result = controller.run(input, output) => result,
        }
    };

    supervisor.close_all().await;
    result
}

// ─── Tests ───────────────────────────────────────────────────────────────────
