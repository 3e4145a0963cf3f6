mod agent;
mod ai_sdk;
mod client;
mod error;
mod protocol;
mod server;
mod state;
mod stream;
mod tools;
mod turn;
mod ui;

use std::io::{self, Write};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use client::{ChatClient, ClientConfig};
use protocol::StreamEvent;
use server::ServerConfig;
use state::{ChatAction, ChatState, MessageStatus};
use tools::ToolCatalog;
use tracing_subscriber::EnvFilter;

const DEFAULT_URL: &str = "http://localhost:3000";

#[derive(Parser)]
#[command(name = "loopdesk", version, about = "LoopDesk assistant chat")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Chat with the assistant in the terminal
    Chat {
        /// Base URL of the LoopDesk app serving /api/chat
        #[arg(long, env = "LOOPDESK_URL", default_value = DEFAULT_URL)]
        url: String,
    },

    /// Ask a single question and stream the answer to stdout
    Ask {
        #[arg(long, env = "LOOPDESK_URL", default_value = DEFAULT_URL)]
        url: String,

        #[arg(required = true)]
        message: Vec<String>,
    },

    /// Serve /api/chat, relaying answers from the Anthropic API
    Serve {
        #[arg(long, env = "LOOPDESK_LISTEN", default_value = "127.0.0.1:3000")]
        listen: String,

        #[arg(long, env = "LOOPDESK_MODEL", default_value = server::DEFAULT_MODEL)]
        model: String,

        #[arg(long, default_value_t = server::DEFAULT_MAX_TOKENS)]
        max_tokens: u32,

        #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
        api_key: Option<String>,

        /// Messages endpoint to stream from
        #[arg(long, env = "ANTHROPIC_MESSAGES_URL", default_value = agent::ANTHROPIC_MESSAGES_URL)]
        anthropic_url: String,
    },
}

type MainResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[tokio::main]
async fn main() -> MainResult<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // The terminal UI owns stderr's screen, so it stays quiet unless RUST_LOG asks.
    let default_filter = match cli.command {
        Command::Chat { .. } => "off",
        _ => "info",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(io::stderr)
        .init();

    let catalog = ToolCatalog::loopdesk();

    match cli.command {
        Command::Chat { url } => ui::run_tui(ChatClient::new(ClientConfig::new(url)), &catalog),
        Command::Ask { url, message } => {
            let client = ChatClient::new(ClientConfig::new(url));
            ask(client, &catalog, &message.join(" ")).await
        }
        Command::Serve {
            listen,
            model,
            max_tokens,
            api_key,
            anthropic_url,
        } => {
            server::run(ServerConfig {
                listen,
                api_key,
                api_url: anthropic_url,
                model,
                max_tokens,
            })
            .await
        }
    }
}

async fn ask(client: ChatClient, catalog: &ToolCatalog, question: &str) -> MainResult<()> {
    let mut state = ChatState::new();
    let submission = state.submit(question).ok_or("message is empty")?;

    let turn = submission.turn;
    let mut receiver = turn::spawn_turn(Arc::new(client), submission);

    let mut stdout = io::stdout();
    let mut printed = false;
    turn::drain_turn(&mut state, turn, &mut receiver, |action| -> io::Result<()> {
        match action {
            ChatAction::Event {
                event: StreamEvent::Text(text),
                ..
            } => {
                write!(stdout, "{}", text)?;
                stdout.flush()?;
                printed = true;
            }
            ChatAction::Event {
                event: StreamEvent::Tool(tool),
                ..
            } => eprintln!("[{}]", catalog.activity(tool)),
            _ => {}
        }
        Ok(())
    })
    .await?;

    let answer = state
        .messages()
        .last()
        .ok_or("no answer was recorded")?;
    match answer.status {
        MessageStatus::Failed => {
            if !printed {
                write!(stdout, "{}", answer.content)?;
            }
            writeln!(stdout)?;
            Err("chat turn failed".into())
        }
        _ => {
            writeln!(stdout)?;
            Ok(())
        }
    }
}
