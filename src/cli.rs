use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "echobot")]
#[command(about = "Conversational bot that lets a language model call registered capabilities", long_about = None)]
#[command(version)]
pub(crate) struct Cli {
    /// JSON config file (falls back to ECHO_CONFIG, then ./echo.json)
    #[arg(long, global = true)]
    pub(crate) config: Option<PathBuf>,
    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

#[derive(Subcommand)]
pub(crate) enum CliCommand {
    /// Serve the HTTP API.
    Serve {
        #[arg(long)]
        bind: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },

    /// Send one message to a channel and print the reply.
    Chat {
        channel: String,
        #[arg(short, long, default_value = "cli")]
        user: String,
        text: String,
    },

    /// Interactive session on one channel. Lines are sent as they are typed.
    Repl {
        #[arg(default_value = "cli")]
        channel: String,
        #[arg(short, long, default_value = "cli")]
        user: String,
    },

    /// Run a slash command against the registry without involving the model.
    Command { text: String },

    /// List registered capabilities and their actions.
    Agents {
        #[arg(long)]
        json: bool,
    },

    /// Print the decoded turns of a channel's live conversation.
    History {
        channel: String,
        #[arg(long)]
        json: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_chat() {
        let cli = Cli::parse_from(["echobot", "chat", "general", "--user", "Mike", "Hi there"]);
        match cli.command {
            CliCommand::Chat { channel, user, text } => {
                assert_eq!(channel, "general");
                assert_eq!(user, "Mike");
                assert_eq!(text, "Hi there");
            }
            _ => panic!("expected chat"),
        }
    }

    #[test]
    fn config_flag_is_global() {
        let cli = Cli::parse_from(["echobot", "serve", "--port", "9000", "--config", "alt.json"]);
        assert_eq!(cli.config, Some(PathBuf::from("alt.json")));
        assert!(matches!(cli.command, CliCommand::Serve { port: Some(9000), bind: None }));
    }
}
