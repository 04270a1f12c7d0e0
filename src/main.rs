// Module declarations
mod agents;
mod capability;
mod claude;
mod cli;
mod config;
mod config_file;
mod envelope;
mod llm;
mod orchestrator;
mod registry;
mod router;
mod services;
mod store;
mod token;
mod transcript;
mod types;
mod util;

// Every module shares the crate root namespace through these re-exports.
#[allow(unused_imports)]
pub(crate) use agents::*;
#[allow(unused_imports)]
pub(crate) use capability::*;
#[allow(unused_imports)]
pub(crate) use claude::*;
#[allow(unused_imports)]
pub(crate) use cli::*;
#[allow(unused_imports)]
pub(crate) use config::*;
#[allow(unused_imports)]
pub(crate) use config_file::*;
#[allow(unused_imports)]
pub(crate) use envelope::*;
#[allow(unused_imports)]
pub(crate) use llm::*;
#[allow(unused_imports)]
pub(crate) use orchestrator::*;
#[allow(unused_imports)]
pub(crate) use registry::*;
#[allow(unused_imports)]
pub(crate) use router::*;
#[allow(unused_imports)]
pub(crate) use services::*;
#[allow(unused_imports)]
pub(crate) use store::*;
#[allow(unused_imports)]
pub(crate) use token::*;
#[allow(unused_imports)]
pub(crate) use transcript::*;
#[allow(unused_imports)]
pub(crate) use types::*;
#[allow(unused_imports)]
pub(crate) use util::*;

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.log_filter()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn build_orchestrator(config: &Arc<Config>, store: Arc<ConversationStore>) -> Result<Orchestrator, Box<dyn std::error::Error>> {
    let registry = build_registry(store, config.clone())?;
    let llm = build_llm_client(config)?;
    Ok(Orchestrator::new(&config.bot_name, registry, llm)
        .with_max_hops(config.max_hops)
        .with_transcript_dir(config.transcript_dir.clone()))
}

fn run_repl(config: &Config, orchestrator: &Orchestrator, channel: &str, user: &str) -> Result<(), Box<dyn std::error::Error>> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    if let Some(dir) = &config.transcript_dir {
        for entry in load_transcript(dir, channel, 10) {
            writeln!(stdout, "[{}] {}: {}", entry.dialog, entry.user, entry.text)?;
        }
    }
    write!(stdout, "{user}> ")?;
    stdout.flush()?;
    for line in stdin.lock().lines() {
        let line = line?;
        let text = line.trim();
        if matches!(text, "exit" | "quit") {
            break;
        }
        if !text.is_empty() {
            match orchestrator.handle_text(channel, user, text) {
                Ok(reply) => writeln!(stdout, "{}: {reply}", orchestrator.bot_name())?,
                Err(err) => writeln!(stdout, "error: {err}")?,
            }
        }
        write!(stdout, "{user}> ")?;
        stdout.flush()?;
    }
    writeln!(stdout)?;
    Ok(())
}

fn print_agents(registry: &Registry) {
    for capability in registry.describe() {
        println!("{}", capability.name);
        for action in capability.actions {
            println!("  {:<24} {}", action.name, action.description);
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;
    init_tracing(&config);

    if let CliCommand::Serve { bind, port } = &cli.command {
        if let Some(bind) = bind {
            config.bind = bind.clone();
        }
        if let Some(port) = port {
            config.port = *port;
        }
    }
    let config = Arc::new(config);

    let store = Arc::new(ConversationStore::open(&config.db_path)?.with_max_messages(config.max_messages));
    tracing::debug!(db = %config.db_path.display(), "conversation store open");
    {
        let (token, breadcrumb) = echo_credentials();
        store.ensure_bot(DEFAULT_BOT_ID, &config.bot_name, "Conversational bot with registered capabilities", &token, &breadcrumb)?;
    }

    match cli.command {
        CliCommand::Serve { .. } => {
            let orchestrator = build_orchestrator(&config, store.clone())?;
            run_server(ServiceState {
                orchestrator: Arc::new(orchestrator),
                store,
                config,
            })
        }

        CliCommand::Chat { channel, user, text } => {
            let orchestrator = build_orchestrator(&config, store)?;
            let reply = orchestrator.handle_text(&channel, &user, &text)?;
            println!("{reply}");
            Ok(())
        }

        CliCommand::Repl { channel, user } => {
            let orchestrator = build_orchestrator(&config, store)?;
            run_repl(&config, &orchestrator, &channel, &user)
        }

        CliCommand::History { channel, json } => {
            let (token, breadcrumb) = echo_credentials();
            let conversation = store.get_conversation(&channel, &token, &breadcrumb)?;
            let turns: Vec<Envelope> = conversation.messages.iter().map(Envelope::from_llm_message).collect();
            if json {
                println!("{}", serde_json::to_string_pretty(&turns)?);
            } else {
                for turn in turns {
                    println!("[{} {}] {}: {}", turn.role, turn.dialog, turn.user, turn.text);
                }
            }
            Ok(())
        }

        CliCommand::Command { text } => {
            let registry = build_registry(store, config.clone())?;
            let result = registry.route(&text)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }

        CliCommand::Agents { json } => {
            let registry = build_registry(store, config.clone())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&registry.describe())?);
            } else {
                print_agents(&registry);
            }
            Ok(())
        }
    }
}
