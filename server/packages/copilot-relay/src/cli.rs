use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::agent::AgentClient;
use crate::config::{ConfigError, RelayConfig};
use crate::console::{inbound, parse_line, ConsoleCommand, ConsoleSurface};
use crate::dispatcher::Dispatcher;
use crate::formatter::{format, render_agent_failure, render_agent_result};
use crate::models::ModelId;
use crate::reporter::ProgressReporter;
use crate::session::{SessionRegistry, UserId, UserPreferences};
use crate::surface::ChatSurface;

const DEFAULT_USER: i64 = 1;

#[derive(Parser, Debug)]
#[command(name = "copilot-relay", bin_name = "copilot-relay")]
#[command(about = "Relay chat requests to the copilot CLI agent", version)]
#[command(arg_required_else_help = true)]
pub struct RelayCli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    overrides: ConfigOverrides,
}

#[derive(Args, Debug)]
pub struct ConfigOverrides {
    /// JSON config file. Defaults to `<config dir>/copilot-relay/config.json`
    /// when that file exists.
    #[arg(long, short = 'c', global = true, env = "COPILOT_RELAY_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, global = true, env = "COPILOT_RELAY_AGENT_BINARY")]
    agent_binary: Option<String>,

    #[arg(long, global = true, env = "COPILOT_RELAY_WORKSPACE_ROOT")]
    workspace_root: Option<PathBuf>,

    #[arg(long, global = true, env = "COPILOT_RELAY_MODEL")]
    model: Option<String>,

    #[arg(long, global = true, env = "COPILOT_RELAY_AGENT_TIMEOUT")]
    agent_timeout_secs: Option<u64>,

    /// Log filter, e.g. `debug` or `copilot_relay=trace`. `RUST_LOG` wins
    /// when set.
    #[arg(long, global = true, env = "COPILOT_RELAY_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Drive the relay interactively from the terminal.
    Console(ConsoleArgs),
    /// Run a single agent task and print its progress and result.
    Task(TaskArgs),
    /// Render a transcript read from stdin as a completed agent result.
    Format(FormatArgs),
}

#[derive(Args, Debug)]
pub struct ConsoleArgs {
    #[arg(long, short = 'u', default_value_t = DEFAULT_USER)]
    user: i64,
}

#[derive(Args, Debug)]
pub struct TaskArgs {
    /// Task description passed to the agent.
    #[arg(required = true, num_args = 1..)]
    prompt: Vec<String>,

    #[arg(long, short = 'u', default_value_t = DEFAULT_USER)]
    user: i64,

    /// Leave agent confirmation prompts unanswered.
    #[arg(long)]
    no_auto_approve: bool,
}

#[derive(Args, Debug)]
pub struct FormatArgs {
    /// Task description shown in the header.
    #[arg(long, default_value = "transcript")]
    task: String,
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("runtime error: {0}")]
    Runtime(String),
    #[error("{0}")]
    Relay(#[from] copilot_relay_error::RelayError),
}

pub fn run_copilot_relay() -> Result<(), CliError> {
    let cli = RelayCli::parse();
    if let Err(err) = init_logging(&cli.overrides.log_level) {
        eprintln!("failed to init logging: {err}");
        return Err(err);
    }
    let config = resolve_config(&cli.overrides)?;
    run_command(cli.command, config)
}

pub fn init_logging(default_level: &str) -> Result<(), CliError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|err| CliError::Runtime(err.to_string()))?;
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_logfmt::builder()
                .layer()
                .with_writer(std::io::stderr),
        )
        .try_init()
        .map_err(|err| CliError::Runtime(err.to_string()))
}

/// Config file first, then flag and environment overrides.
pub fn resolve_config(overrides: &ConfigOverrides) -> Result<RelayConfig, CliError> {
    let mut config = match &overrides.config {
        Some(path) => RelayConfig::load(path)?,
        None => match RelayConfig::default_path().filter(|path| path.is_file()) {
            Some(path) => {
                tracing::debug!(path = %path.display(), "loading default config");
                RelayConfig::load(&path)?
            }
            None => RelayConfig::default(),
        },
    };
    if let Some(binary) = &overrides.agent_binary {
        config.agent_binary = binary.clone();
    }
    if let Some(root) = &overrides.workspace_root {
        config.workspace_root = root.clone();
    }
    if let Some(model) = &overrides.model {
        config.default_model = ModelId::new(model.clone());
    }
    if let Some(secs) = overrides.agent_timeout_secs {
        config.agent_timeout_secs = secs;
    }
    Ok(config)
}

pub fn run_command(command: Command, config: RelayConfig) -> Result<(), CliError> {
    match command {
        Command::Console(args) => with_runtime(run_console(config, args)),
        Command::Task(args) => with_runtime(run_task(config, args)),
        Command::Format(args) => run_format(&config, &args),
    }
}

fn with_runtime<F>(future: F) -> Result<(), CliError>
where
    F: std::future::Future<Output = Result<(), CliError>>,
{
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| CliError::Runtime(err.to_string()))?;
    runtime.block_on(future)
}

async fn run_console(config: RelayConfig, args: ConsoleArgs) -> Result<(), CliError> {
    let user = UserId(args.user);
    let surface: Arc<dyn ChatSurface> = Arc::new(ConsoleSurface::stdout());
    let dispatcher = Arc::new(Dispatcher::new(config, surface));
    tracing::info!(user = %user, "console started; /start for the menu, /quit to exit");

    let mut requests = JoinSet::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match parse_line(&line) {
                    ConsoleCommand::Quit => break,
                    command => {
                        if let Some(request) = inbound(user, command) {
                            let dispatcher = dispatcher.clone();
                            requests.spawn(async move { dispatcher.handle(request).await });
                        }
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
        }
    }

    while let Some(joined) = requests.join_next().await {
        if let Err(err) = joined {
            tracing::error!(error = %err, "request task failed");
        }
    }
    Ok(())
}

async fn run_task(config: RelayConfig, args: TaskArgs) -> Result<(), CliError> {
    let user = UserId(args.user);
    let task = args.prompt.join(" ");
    let defaults = UserPreferences {
        model: config.default_model.clone(),
        auto_approve: config.default_auto_approve && !args.no_auto_approve,
    };
    let sessions = Arc::new(SessionRegistry::new(config.workspace_root.clone(), defaults));
    let config = Arc::new(config);
    let client = AgentClient::new(config.clone(), sessions);

    let (events_tx, mut events_rx) = mpsc::channel(64);
    let printer = {
        let task = task.clone();
        let throttle = config.progress_throttle();
        tokio::spawn(async move {
            let mut reporter = ProgressReporter::new(task, throttle);
            let mut last_push = tokio::time::Instant::now();
            while let Some(event) = events_rx.recv().await {
                if let Some(update) = reporter.on_event(event, last_push.elapsed()) {
                    last_push = tokio::time::Instant::now();
                    eprintln!("{update}\n");
                }
            }
            reporter.into_milestones()
        })
    };

    let run = client.run_task(user, &task, false, events_tx).await?;
    let milestones = printer
        .await
        .map_err(|err| CliError::Runtime(err.to_string()))?;

    match run.error() {
        None => println!(
            "{}",
            render_agent_result(&task, &run.formatted, &milestones, &config.limits)
        ),
        Some(err) => {
            println!(
                "{}",
                render_agent_failure(&task, &err.user_message(), &run.formatted)
            );
            return Err(err.into());
        }
    }
    Ok(())
}

fn run_format(config: &RelayConfig, args: &FormatArgs) -> Result<(), CliError> {
    let mut transcript = String::new();
    std::io::stdin().lock().read_to_string(&mut transcript)?;
    let formatted = format(&transcript);
    println!(
        "{}",
        render_agent_result(&args.task, &formatted, &[], &config.limits)
    );
    Ok(())
}
