//! Parley terminal chat client.
//!
//! # Usage
//!
//! ```bash
//! # Join room 42
//! parley --ws-url ws://localhost:8080/ws --api-url http://localhost:8080/api \
//!     --room 42 --token "$PARLEY_TOKEN"
//! ```
//!
//! Typed lines are published to the room. `/room N` switches rooms; `/quit`
//! or end of input leaves gracefully. Logs go to stderr, the feed to stdout.

mod input;
mod render;

use std::{error::Error, time::Duration};

use clap::Parser;
use parley_client::{
    ChatClient, ClientConfig, RestHistoryLoader, SessionHandle, StaticCredential, WsTransport,
};
use parley_proto::RoomId;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{input::Input, render::FeedPrinter};

/// Parley chat client
#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(about = "Terminal chat client for one Parley room")]
#[command(version)]
struct Args {
    /// STOMP WebSocket endpoint
    #[arg(long, env = "PARLEY_WS_URL", default_value = "ws://localhost:8080/ws")]
    ws_url: String,

    /// REST API root used for history
    #[arg(long, env = "PARLEY_API_URL", default_value = "http://localhost:8080/api")]
    api_url: String,

    /// Room to join
    #[arg(short, long)]
    room: RoomId,

    /// Bearer token
    #[arg(long, env = "PARLEY_TOKEN", hide_env_values = true)]
    token: String,

    /// Seconds between reconnect attempts
    #[arg(long, default_value = "5")]
    reconnect_delay: u64,

    /// Give up after this many consecutive reconnects (default: never)
    #[arg(long)]
    max_reconnects: Option<u32>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let mut config = ClientConfig::default();
    config.session.connection.reconnect_delay = Duration::from_secs(args.reconnect_delay);
    config.session.connection.max_reconnect_attempts = args.max_reconnects;

    let client = ChatClient::new(
        WsTransport::new(&args.ws_url),
        RestHistoryLoader::new(&args.api_url),
        StaticCredential::new(args.token),
    )
    .with_config(config);

    tracing::info!(room = args.room, url = %args.ws_url, "joining room");
    let handle = client.open(args.room)?;
    let result = run(&handle).await;
    handle.close().await;
    result
}

/// Interleave user input with feed and status updates until the user leaves
/// or the session stops.
async fn run(handle: &SessionHandle) -> Result<(), Box<dyn Error>> {
    let mut out = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut status = handle.watch_status();
    let mut feed = handle.watch_messages();
    let mut printer = FeedPrinter::default();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match Input::parse(&line) {
                    Input::Say(text) => {
                        if let Err(err) = handle.send(text).await {
                            write_line(&mut out, &format!("-- not sent: {err}")).await?;
                        }
                    },
                    Input::Room(room_id) => {
                        if let Err(err) = handle.switch_room(room_id).await {
                            write_line(&mut out, &render::switch_failed_line(room_id, &err)).await?;
                        }
                    },
                    Input::Quit => break,
                    Input::Invalid(hint) => write_line(&mut out, &format!("-- {hint}")).await?,
                    Input::Empty => {},
                }
            },
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let line = render::status_line(&status.borrow_and_update());
                write_line(&mut out, &line).await?;
            },
            changed = feed.changed() => {
                if changed.is_err() {
                    break;
                }
                let room_id = status.borrow().room_id;
                let new_lines = printer.update(room_id, &feed.borrow_and_update());
                for line in new_lines {
                    write_line(&mut out, &line).await?;
                }
            },
        }
    }
    Ok(())
}

async fn write_line(out: &mut Stdout, line: &str) -> std::io::Result<()> {
    out.write_all(line.as_bytes()).await?;
    out.write_all(b"\n").await?;
    out.flush().await
}
