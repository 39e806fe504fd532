mod agent;
mod context;
mod error;
mod fslock;
mod prompt;
mod refs;
mod rpc;
mod session;
mod settings;
mod store;
mod supervisor;
mod tokens;
mod tools;
mod transport;
mod turns;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use agent::{AgentEvent, RunArgs, Runner};
use error::Error;
use settings::Settings;
use store::SessionStore;

#[derive(Parser, Debug)]
#[command(
    name = "baton",
    about = "A task-oriented conversational agent orchestrator",
    long_about = None,
)]
struct Args {
    /// ID of the session to continue
    #[arg(long)]
    session: Option<String>,

    /// Overall purpose of a new session
    #[arg(long)]
    purpose: Option<String>,

    /// Background context for a new session
    #[arg(long)]
    background: Option<String>,

    /// Comma-separated paths to role files for a new session
    #[arg(long)]
    roles: Option<String>,

    /// ID of the parent session (new session nests under it)
    #[arg(long)]
    parent: Option<String>,

    /// The instruction to run against the session
    #[arg(long)]
    instruction: Option<String>,

    /// Comma-separated paths to attach as file references
    #[arg(long)]
    references: Option<String>,

    /// Include the multi-step reasoning process in the prompt
    #[arg(long)]
    multi_step_reasoning: bool,

    /// ID of the session to fork
    #[arg(long, value_name = "SESSION_ID")]
    fork: Option<String>,

    /// 1-based turn number to fork from (required with --fork)
    #[arg(long, value_name = "TURN_INDEX")]
    at_turn: Option<usize>,

    /// Output format for run results
    #[arg(long, value_name = "FORMAT", default_value = "text")]
    output_format: OutputFormat,

    /// Assemble and print the prompt without executing anything
    #[arg(long)]
    dry_run: bool,

    /// Run the stdio JSON-RPC tool server instead of an instruction
    #[arg(long)]
    mcp_serve: bool,

    /// Run the instruction in a supervised agent subprocess
    #[arg(long, requires = "session", requires = "instruction")]
    supervise: bool,

    /// Stop the running agent for a session (rolls back its pool)
    #[arg(long, value_name = "SESSION_ID")]
    stop: Option<String>,

    /// Delete a session, its children and its backups
    #[arg(long, value_name = "SESSION_ID")]
    delete: Option<String>,

    /// Project root; sessions live under <root>/sessions
    #[arg(long, env = "BATON_PROJECT_ROOT")]
    project_root: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Json,
    StreamJson,
    Text,
}

#[tokio::main]
async fn main() -> ExitCode {
    // stdout is reserved for results and protocol traffic.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            let code = e
                .downcast_ref::<Error>()
                .map(Error::exit_code)
                .unwrap_or(2);
            ExitCode::from(code as u8)
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let project_root = match &args.project_root {
        Some(p) => p.clone(),
        None => std::env::current_dir()?,
    };
    let settings = Settings::load(&project_root)?;
    let store = SessionStore::new(
        project_root.join("sessions"),
        settings.timezone(),
        settings.reference_ttl,
        settings.default_hyperparameters(),
    )?;

    if args.mcp_serve {
        let server = rpc::RpcServer {
            store: &store,
            settings: &settings,
            project_root: &project_root,
        };
        server.serve().await?;
        return Ok(());
    }

    if let Some(session_id) = &args.delete {
        store.delete(session_id)?;
        eprintln!("Deleted session {session_id}.");
        return Ok(());
    }

    if let Some(session_id) = &args.stop {
        let sup = supervisor::Supervisor { project_root: &project_root, store: &store };
        sup.stop(session_id).await?;
        eprintln!("Stopped session {session_id}.");
        return Ok(());
    }

    if args.supervise {
        let sup = supervisor::Supervisor { project_root: &project_root, store: &store };
        let session_id = args.session.as_deref().unwrap_or_default();
        let instruction = args.instruction.as_deref().unwrap_or_default();
        let mut rx = sup.start(session_id, instruction)?;
        while let Some(event) = rx.recv().await {
            println!("{event}");
        }
        return Ok(());
    }

    if let Some(fork_id) = &args.fork {
        let Some(at_turn) = args.at_turn else {
            anyhow::bail!("--at-turn is required when using --fork");
        };
        if at_turn == 0 {
            return Err(Error::Validation("--at-turn is 1-based".to_string()).into());
        }
        let forked = store.fork(fork_id, at_turn - 1)?;
        println!("Successfully forked session {fork_id} at turn {at_turn}.");
        println!("New session created: {}", forked.session_id);
        return Ok(());
    }

    if let Some(instruction) = &args.instruction {
        let transport = transport::Transport::from_settings(&settings)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let printer = tokio::spawn(print_events(rx, args.output_format));

        let runner = Runner {
            store: &store,
            settings: &settings,
            transport: &transport,
            project_root: &project_root,
            events: tx,
        };
        let run_args = RunArgs {
            session_id: args.session.clone(),
            purpose: args.purpose.clone(),
            background: args.background.clone(),
            roles: split_list(args.roles.as_deref()),
            parent: args.parent.clone(),
            instruction: instruction.clone(),
            references: split_list(args.references.as_deref()),
            multi_step_reasoning: args.multi_step_reasoning,
            dry_run: args.dry_run,
        };

        let outcome = runner.run(&run_args).await;
        drop(runner);
        let _ = printer.await;

        let session_id = outcome?;
        if args.output_format == OutputFormat::Text && !args.dry_run {
            eprintln!("Successfully added response to session {session_id}.");
        }
        return Ok(());
    }

    // Nothing to do — mirror the argument summary.
    use clap::CommandFactory;
    Args::command().print_help()?;
    Ok(())
}

fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

async fn print_events(mut rx: mpsc::UnboundedReceiver<AgentEvent>, format: OutputFormat) {
    let mut collected = Vec::new();
    while let Some(event) = rx.recv().await {
        match format {
            OutputFormat::StreamJson => {
                if let Ok(line) = serde_json::to_string(&event) {
                    println!("{line}");
                }
            }
            OutputFormat::Text => print_text_event(&event),
            OutputFormat::Json => collected.push(event),
        }
    }
    if format == OutputFormat::Json {
        if let Ok(doc) = serde_json::to_string_pretty(&collected) {
            println!("{doc}");
        }
    }
}

fn print_text_event(event: &AgentEvent) {
    match event {
        AgentEvent::SessionCreated { session_id } => {
            eprintln!("New session created: {session_id}");
        }
        AgentEvent::ToolCall { name, args } => eprintln!("Tool call: {name}({args})"),
        AgentEvent::ToolResult { name, status, .. } => {
            eprintln!("Tool result: {name} -> {status}");
        }
        AgentEvent::ModelResponse { content } => println!("{content}"),
        AgentEvent::TokenStats { prompt_tokens, response_tokens, .. } => {
            eprintln!("Tokens: {prompt_tokens} prompt / {response_tokens} response");
        }
        AgentEvent::Done { .. } | AgentEvent::Error { .. } => {}
    }
}
