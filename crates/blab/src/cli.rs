//! Line-mode chat: stdin lines go out, received messages are printed.
//!
//! ```text
//! blabber                                   # ws://127.0.0.1:8080/ws as $USER
//! blabber --server ws://chat.local:9000/ws --username alice
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use blab_protocol::default_server_url;

use crate::client::ChatClient;
use crate::error::ClientError;
use crate::log::MessageLog;

/// Command typed to leave the chat.
pub const QUIT_COMMAND: &str = "/quit";

/// blabber - line-mode client for the blabber relay
#[derive(Parser, Debug)]
#[command(name = "blabber", version, about)]
pub struct Args {
    /// WebSocket URL of the relay
    #[arg(short, long, env = "BLAB_SERVER", default_value_t = default_server_url())]
    pub server: String,

    /// Name shown next to your messages
    #[arg(short, long, env = "USER", default_value = "anonymous")]
    pub username: String,
}

/// What a typed line asks for.
#[derive(Debug, PartialEq, Eq)]
pub enum LineInput<'a> {
    Say(&'a str),
    Quit,
    Empty,
}

impl<'a> LineInput<'a> {
    pub fn parse(line: &'a str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            Self::Empty
        } else if line == QUIT_COMMAND {
            Self::Quit
        } else {
            Self::Say(line)
        }
    }
}

/// Parses arguments and chats until EOF, `/quit`, Ctrl+C or disconnect.
pub fn run() -> Result<()> {
    let args = Args::parse();

    // stdout is the chat log; diagnostics go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    chat(args)
}

#[tokio::main]
async fn chat(args: Args) -> Result<()> {
    let cancel_token = CancellationToken::new();
    let (mut client, mut incoming) =
        ChatClient::connect(&args.server, &args.username, cancel_token.clone())
            .await
            .context("Is blabberd running?")?;

    eprintln!(
        "Connected to {} as {}. Type {} to leave.",
        args.server,
        client.username(),
        QUIT_COMMAND
    );

    let mut log = MessageLog::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,

            frame = incoming.recv() => {
                let Some(frame) = frame else {
                    eprintln!("Disconnected from relay");
                    break;
                };
                log.push(frame);
                if let Some(entry) = log.last() {
                    println!("{entry}");
                }
            }

            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                match LineInput::parse(&line) {
                    LineInput::Empty => continue,
                    LineInput::Quit => break,
                    LineInput::Say(text) => match client.send(text).await {
                        Ok(()) => {}
                        Err(ClientError::Protocol(e)) => warn!(error = %e, "Message not sent"),
                        Err(e) => return Err(e).context("Connection lost"),
                    },
                }
            }
        }
    }

    client.close().await;
    Ok(())
}
