#![forbid(unsafe_code)]

//! `acp-host`: drive an ACP agent from the terminal.
//!
//! Starts the configured agent, opens a session in the working directory,
//! sends one prompt, and streams the turn: assistant text to stdout, tool
//! calls, plans and permission prompts to stderr. Ctrl-C asks the agent to
//! cancel the turn; a second Ctrl-C quits.

use std::collections::VecDeque;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use acp_host::models::content::ContentBlock;
use acp_host::models::permission::{PermissionOutcome, PermissionRequest};
use acp_host::models::update::{SessionUpdate, ToolCallStatus};
use acp_host::orchestrator::{ConversationView, Supervisor, ViewChange};
use acp_host::{AcpStatus, AppError, GlobalConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "acp-host", about = "Drive an ACP agent from the terminal", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Shell command line that launches the agent (overrides the config).
    #[arg(long)]
    launch: Option<String>,

    /// Working directory for the agent and the session.
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Answer every permission request with its first allow option.
    #[arg(long)]
    auto_allow: bool,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Prompt text.
    #[arg(required = true, num_args = 1..)]
    prompt: Vec<String>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?;
    let outcome = runtime.block_on(run(args));
    // The stdin reader blocks in a worker thread; do not wait for it.
    runtime.shutdown_timeout(Duration::from_millis(100));
    outcome
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = match &args.config {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };
    if let Some(launch) = args.launch {
        config.agent.launch_command = Some(launch);
    }
    if let Some(cwd) = args.cwd {
        config.agent.cwd = Some(cwd);
    }
    if args.auto_allow {
        config.permissions.auto_allow = true;
    }
    config.validate()?;
    let cwd = config.cwd()?;

    // ── Start the agent ─────────────────────────────────
    let supervisor = Supervisor::new(config.supervisor_config()?);
    let mut view = ConversationView::new(
        supervisor.connection().clone(),
        config.permissions.auto_allow,
    );
    let mut events = view.subscribe();

    let init = supervisor.ensure_started().await?;
    if let Some(agent) = &init.agent_info {
        info!(agent = %agent.name, version = %agent.version, "agent ready");
    }

    let outcome = converse(&mut view, &mut events, args.prompt.join(" "), &cwd).await;
    supervisor.stop().await;
    outcome
}

async fn converse(
    view: &mut ConversationView,
    events: &mut acp_host::Subscription,
    prompt: String,
    cwd: &std::path::Path,
) -> Result<()> {
    view.new_session(cwd).await?;

    let turn = view.prompt(vec![ContentBlock::text(prompt)])?;
    tokio::pin!(turn);

    let mut stdin = spawn_stdin_lines();
    let mut asking: VecDeque<PermissionRequest> = VecDeque::new();
    let mut cancelled = false;

    loop {
        tokio::select! {
            response = &mut turn => {
                println!();
                let response = response?;
                eprintln!("[done] stop reason: {}", response.stop_reason);
                return Ok(());
            }

            Some(event) = events.recv() => {
                match view.handle_event(&event) {
                    ViewChange::SessionUpdated { session_id, update } => {
                        if view.session_id() == Some(session_id.as_str()) {
                            render_update(view, &update);
                        }
                    }
                    ViewChange::PermissionRequested(request) => {
                        if asking.is_empty() {
                            print_permission_prompt(&request);
                        }
                        asking.push_back(request);
                    }
                    ViewChange::PermissionResolved { request_id, outcome } => {
                        eprintln!("[permission] {request_id} answered automatically: {}", describe_outcome(&outcome));
                    }
                    ViewChange::Disconnected { reason, discarded } => {
                        asking.retain(|r| !discarded.contains(&r.request_id));
                        eprintln!("[agent] {}", reason.as_deref().unwrap_or("stopped"));
                    }
                    ViewChange::Status { status: AcpStatus::Error, reason } => {
                        eprintln!("[agent] failed: {}", reason.as_deref().unwrap_or("unknown error"));
                    }
                    ViewChange::Status { .. } | ViewChange::None => {}
                }
            }

            Some(line) = stdin.recv(), if !asking.is_empty() => {
                let Some(request) = asking.front() else { continue };
                match parse_answer(&line, request) {
                    Ok((outcome, remember)) => {
                        let request_id = request.request_id.clone();
                        if let Err(err) = view.respond_permission(&request_id, outcome, remember) {
                            warn!(%err, %request_id, "failed to answer permission request");
                        }
                        asking.pop_front();
                        if let Some(next) = asking.front() {
                            print_permission_prompt(next);
                        }
                    }
                    Err(msg) => eprintln!("{msg}"),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                if cancelled {
                    return Err(AppError::Process("interrupted".into()));
                }
                cancelled = true;
                eprintln!("\n[cancel] asking the agent to stop; press Ctrl-C again to quit");
                view.cancel()?;
            }
        }
    }
}

fn render_update(view: &ConversationView, update: &SessionUpdate) {
    match update {
        SessionUpdate::AgentMessageChunk(chunk) => {
            if let Some(text) = chunk.content.as_ref().and_then(ContentBlock::as_text) {
                print!("{text}");
                // Best effort; a closed stdout surfaces on the next println.
                let _ = std::io::stdout().flush();
            }
        }
        SessionUpdate::ToolCall(fields) | SessionUpdate::ToolCallUpdate(fields) => {
            let Some(call) = view
                .state()
                .and_then(|state| state.tool_calls.get(&fields.tool_call_id))
            else {
                return;
            };
            if fields.status.is_none() && matches!(update, SessionUpdate::ToolCallUpdate(_)) {
                return;
            }
            eprintln!(
                "[tool] {} ({}) {}",
                call.title.as_deref().unwrap_or(&call.tool_call_id),
                call.kind.as_deref().unwrap_or("other"),
                call.status.map_or("pending", ToolCallStatus::as_str),
            );
        }
        SessionUpdate::Plan(plan) => {
            eprintln!("[plan]");
            for entry in &plan.entries {
                eprintln!(
                    "  - {} [{}]",
                    entry.content,
                    entry.status.as_deref().unwrap_or("pending")
                );
            }
        }
        SessionUpdate::CurrentModeUpdate(update) => {
            eprintln!("[mode] {}", update.current_mode_id);
        }
        SessionUpdate::CurrentModelUpdate(update) => {
            eprintln!("[model] {}", update.current_model_id);
        }
        _ => {}
    }
}

fn print_permission_prompt(request: &PermissionRequest) {
    eprintln!(
        "\n[permission] {} ({})",
        request.title.as_deref().unwrap_or("tool call"),
        request.tool_kind.as_deref().unwrap_or("other"),
    );
    for (index, option) in request.options.iter().enumerate() {
        eprintln!("  {}) {} [{}]", index + 1, option.name, option.kind);
    }
    eprintln!("choose a number (append ! to remember for this tool kind), empty line cancels:");
}

/// Parse `<n>`, `<n>!` or an empty line into an outcome and a remember flag.
fn parse_answer(
    line: &str,
    request: &PermissionRequest,
) -> std::result::Result<(PermissionOutcome, bool), String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok((PermissionOutcome::Cancelled, false));
    }
    let (number, remember) = match line.strip_suffix('!') {
        Some(number) => (number.trim(), true),
        None => (line, false),
    };
    let option = number
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|index| request.options.get(index))
        .ok_or_else(|| format!("expected a number between 1 and {}", request.options.len()))?;
    Ok((PermissionOutcome::selected(&option.option_id), remember))
}

fn describe_outcome(outcome: &PermissionOutcome) -> String {
    match outcome {
        PermissionOutcome::Cancelled => "cancelled".into(),
        PermissionOutcome::Selected { option_id } => format!("selected {option_id}"),
    }
}

fn spawn_stdin_lines() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut lines = FramedRead::new(tokio::io::stdin(), LinesCodec::new());
        while let Some(Ok(line)) = lines.next().await {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
