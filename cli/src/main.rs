//! chatlink CLI: talk to the assistant chat endpoint from the terminal.
//!
//! Usage:
//! ```bash
//! # Chat against the local development server (ws://localhost:8080/ws/chat)
//! chatlink chat --user-id u1
//!
//! # Derive the endpoint from the page URL the web client is served from
//! chatlink chat --user-id u1 --page-url https://tickets.example.com
//!
//! # Print the URL a connect would use
//! chatlink url --user-id u1 --session-id s-42
//! ```

use std::env;
use std::io::Write;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{bail, Context};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use chatlink_core::{
    ChatMessage, Channel, ChannelConfig, ConnectionEvent, Endpoint, Identity, MessageKind,
    ReconnectPlan,
};
use chatlink_observability::{init_tracing, LogConfig};
use chatlink_ws::WsConnector;

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "chat" => cmd_chat(&args[2..]).await,
        "url" => cmd_url(&args[2..]),
        "version" | "--version" | "-V" => {
            println!("chatlink {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("chatlink {}", env!("CARGO_PKG_VERSION"));
    println!("Resilient chat client for the assistant WebSocket endpoint\n");
    println!("USAGE:");
    println!("    chatlink <COMMAND> [FLAGS]\n");
    println!("COMMANDS:");
    println!("    chat       Connect and chat interactively (stdin → server)");
    println!("    url        Print the connection URL");
    println!("    version    Print version");
    println!("    help       Print this help\n");
    println!("FLAGS:");
    println!("    --user-id <ID>        User id sent as ?userId=  [required]");
    println!("    --session-id <ID>     Chat session to resume");
    println!("    --config <FILE>       YAML channel config");
    println!("    --page-url <URL>      Derive scheme/host/port from a page URL");
    println!("    --host <HOST>         Server host (default: localhost)");
    println!("    --port <PORT>         Server port (default: 8080)");
    println!("    --secure              Use wss://");
    println!("    --max-attempts <N>    Reconnect attempts (default: 5)");
    println!("    --delay-ms <MS>       Delay between reconnects (default: 3000)");
    println!("    --timeout-ms <MS>     Connect timeout");
    println!("    --log-level <LEVEL>   trace | debug | info | warn | error (default: warn)");
    println!("    --json-logs           Emit JSON logs\n");
    println!("In chat, type a line to send it; /quit disconnects.");
}

async fn cmd_chat(args: &[String]) -> anyhow::Result<()> {
    let log = LogConfig::default()
        .with_level(parse_flag(args, "--log-level").unwrap_or_else(|| "warn".into()))
        .json(has_flag(args, "--json-logs"));
    init_tracing(&log).context("installing log subscriber")?;

    let config = load_config(args)?;
    let identity = parse_identity(args)?;
    tracing::debug!(?config, "channel config loaded");
    let channel = Channel::new(WsConnector::new(), config);

    let in_stream = AtomicBool::new(false);
    let _messages = channel.on_message(move |message: &ChatMessage| {
        print_message(message, &in_stream);
        Ok(())
    });
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let _connections = channel.on_connection(move |event: &ConnectionEvent| {
        let _ = events_tx.send(event.clone());
        Ok(())
    });

    let url = channel.config().endpoint.url(&identity)?;
    eprintln!("connecting to {url} ...");
    channel
        .connect(identity.user_id.clone(), identity.session_id.clone())
        .await
        .with_context(|| format!("connecting to {url}"))?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == "/quit" {
                    break;
                }
                if let Err(e) = channel.send(line) {
                    if e.is_transient() {
                        eprintln!("! {e}; message not sent, retry once reconnected");
                    } else {
                        eprintln!("! {e}; message not sent");
                    }
                }
            }
            Some(event) = events.recv() => {
                eprintln!("* {event}");
                if let ConnectionEvent::Disconnected { reconnect: ReconnectPlan::Exhausted { attempts }, .. } = event {
                    bail!("server unreachable after {attempts} reconnect attempts");
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    channel.disconnect();
    channel.flush().await;
    Ok(())
}

fn cmd_url(args: &[String]) -> anyhow::Result<()> {
    let config = load_config(args)?;
    let identity = parse_identity(args)?;
    println!("{}", config.endpoint.url(&identity)?);
    Ok(())
}

fn load_config(args: &[String]) -> anyhow::Result<ChannelConfig> {
    let mut config = match parse_flag(args, "--config") {
        Some(path) => ChannelConfig::from_file(&path)?,
        None => ChannelConfig::default(),
    };

    if let Some(page) = parse_flag(args, "--page-url") {
        config.endpoint = Endpoint::from_page_url(&page)?;
    }
    if let Some(host) = parse_flag(args, "--host") {
        config.endpoint.host = host;
    }
    if let Some(port) = parse_flag(args, "--port") {
        config.endpoint.port = Some(port.parse().context("--port must be a number")?);
    }
    if has_flag(args, "--secure") {
        config.endpoint.secure = true;
    }
    if let Some(n) = parse_flag(args, "--max-attempts") {
        config.reconnect.max_attempts = n.parse().context("--max-attempts must be a number")?;
    }
    if let Some(ms) = parse_flag(args, "--delay-ms") {
        config.reconnect.delay_ms = ms.parse().context("--delay-ms must be a number")?;
    }
    if let Some(ms) = parse_flag(args, "--timeout-ms") {
        let ms: u64 = ms.parse().context("--timeout-ms must be a number")?;
        config = config.with_connect_timeout(Duration::from_millis(ms));
    }

    config.validate()?;
    Ok(config)
}

fn parse_identity(args: &[String]) -> anyhow::Result<Identity> {
    let user_id = parse_flag(args, "--user-id").context("--user-id is required")?;
    Ok(Identity::new(user_id, parse_flag(args, "--session-id")))
}

fn print_message(message: &ChatMessage, in_stream: &AtomicBool) {
    let mut out = std::io::stdout().lock();
    let _ = render_message(&mut out, message, in_stream).and_then(|()| out.flush());
}

/// Streamed chunks share one line, prefixed once and ended by the final chunk.
fn render_message(
    out: &mut impl Write,
    message: &ChatMessage,
    in_stream: &AtomicBool,
) -> std::io::Result<()> {
    let sender = message.sender.as_deref().unwrap_or("server");
    match &message.kind {
        MessageKind::Component => {
            let name = message.component_type.as_deref().unwrap_or("unknown");
            let data = message
                .component_data
                .as_ref()
                .and_then(|d| serde_json::to_string(d).ok())
                .unwrap_or_default();
            writeln!(out, "[{sender}] <{name}> {data}")
        }
        _ if message.streaming => {
            let continuing = in_stream.swap(!message.stream_end, Ordering::Relaxed);
            if !continuing {
                write!(out, "[{sender}] ")?;
            }
            if message.stream_end {
                writeln!(out, "{}", message.content)
            } else {
                write!(out, "{}", message.content)
            }
        }
        _ => writeln!(out, "[{sender}] {}", message.content),
    }
}

fn parse_flag(args: &[String], flag: &str) -> Option<String> {
    let pos = args.iter().position(|a| a == flag)?;
    args.get(pos + 1).cloned()
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(content: &str, end: bool) -> ChatMessage {
        let mut message = ChatMessage::text(content);
        message.sender = Some("assistant".into());
        message.streaming = true;
        message.stream_end = end;
        message
    }

    fn render(messages: &[ChatMessage]) -> String {
        let in_stream = AtomicBool::new(false);
        let mut out = Vec::new();
        for message in messages {
            render_message(&mut out, message, &in_stream).unwrap();
        }
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn streamed_chunks_share_one_terminated_line() {
        let text = render(&[
            chunk("Two ", false),
            chunk("tickets ", false),
            chunk("booked.", true),
            chunk("Anything else?", true),
        ]);
        assert_eq!(text, "[assistant] Two tickets booked.\n[assistant] Anything else?\n");
    }

    #[test]
    fn plain_messages_end_their_line() {
        let mut message = ChatMessage::text("hi");
        message.sender = Some("assistant".into());
        assert_eq!(render(&[message]), "[assistant] hi\n");
    }
}
