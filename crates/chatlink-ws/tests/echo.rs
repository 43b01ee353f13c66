//! End-to-end tests against a local tokio-tungstenite server.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use chatlink_core::{
    Channel, ChannelConfig, ChannelError, ChatMessage, CloseCode, ConnectionEvent, Endpoint,
    ReconnectConfig, ReconnectPlan,
};
use chatlink_ws::WsConnector;

// ─── Helpers ──────────────────────────────────────────────────────────────────

/// What the server observed.
#[derive(Debug, PartialEq)]
enum Seen {
    Request(String),
    ClientClosed(Option<u16>),
}

/// Echo server. When `restart_first` is set the first connection is closed
/// by the server with 1011 right after the handshake.
async fn spawn_server(restart_first: bool) -> anyhow::Result<(SocketAddr, mpsc::UnboundedReceiver<Seen>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut accepted = 0usize;
        while let Ok((tcp, _)) = listener.accept().await {
            accepted += 1;
            let restart = restart_first && accepted == 1;
            let seen = seen_tx.clone();
            tokio::spawn(async move {
                let uri_seen = seen.clone();
                let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                    let _ = uri_seen.send(Seen::Request(req.uri().to_string()));
                    Ok(resp)
                };
                let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(tcp, callback).await else {
                    return;
                };
                if restart {
                    let frame = CloseFrame {
                        code: WsCloseCode::Error,
                        reason: "restarting".into(),
                    };
                    let _ = ws.send(Message::Close(Some(frame))).await;
                }
                while let Some(Ok(msg)) = ws.next().await {
                    match msg {
                        Message::Text(_) => {
                            if ws.send(msg).await.is_err() {
                                break;
                            }
                        }
                        Message::Close(frame) => {
                            let _ = seen.send(Seen::ClientClosed(frame.map(|f| u16::from(f.code))));
                            break;
                        }
                        _ => {}
                    }
                }
            });
        }
    });

    Ok((addr, seen_rx))
}

fn config_for(addr: SocketAddr) -> ChannelConfig {
    let endpoint = Endpoint {
        port: Some(addr.port()),
        ..Endpoint::development("127.0.0.1")
    };
    ChannelConfig::new(endpoint)
        .with_reconnect(ReconnectConfig::fixed(3, Duration::from_millis(50)))
        .with_connect_timeout(Duration::from_secs(5))
}

async fn within<T>(fut: impl std::future::Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("timed out")
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn hello_round_trip() -> anyhow::Result<()> {
    let (addr, mut seen) = spawn_server(false).await?;
    let channel = Channel::new(WsConnector::new(), config_for(addr));
    let (tx, mut messages) = mpsc::unbounded_channel();
    let _sub = channel.on_message(move |m: &ChatMessage| {
        let _ = tx.send(m.clone());
        Ok(())
    });

    channel.connect("u1", None).await?;
    assert_eq!(
        within(seen.recv()).await,
        Some(Seen::Request("/ws/chat?userId=u1".into()))
    );

    channel.send("hello")?;
    let echoed = within(messages.recv()).await.unwrap();
    assert_eq!(echoed.content, "hello");
    assert_eq!(echoed.kind.as_str(), "text");

    channel.disconnect();
    assert_eq!(
        within(seen.recv()).await,
        Some(Seen::ClientClosed(Some(1000)))
    );
    Ok(())
}

#[tokio::test]
async fn server_close_triggers_reconnect() -> anyhow::Result<()> {
    let (addr, _seen) = spawn_server(true).await?;
    let channel = Channel::new(WsConnector::new(), config_for(addr));
    let (tx, mut events) = mpsc::unbounded_channel();
    let _sub = channel.on_connection(move |e: &ConnectionEvent| {
        let _ = tx.send(e.clone());
        Ok(())
    });

    channel.connect("u1", None).await?;
    assert_eq!(within(events.recv()).await, Some(ConnectionEvent::Connected));
    assert_eq!(
        within(events.recv()).await,
        Some(ConnectionEvent::Disconnected {
            code: CloseCode(1011),
            reason: "restarting".into(),
            reconnect: ReconnectPlan::Scheduled {
                attempt: 1,
                delay: Duration::from_millis(50),
            },
        })
    );
    assert_eq!(within(events.recv()).await, Some(ConnectionEvent::Connected));
    assert_eq!(channel.reconnect_attempts(), 0);

    let json: serde_json::Value = serde_json::from_str(&channel.send("still here")?.encode()?)?;
    assert_eq!(json["content"], "still here");
    channel.disconnect();
    Ok(())
}

#[tokio::test]
async fn refused_connection_fails_connect() -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);

    let channel = Channel::new(WsConnector::new(), config_for(addr));
    let err = within(channel.connect("u1", None)).await.unwrap_err();
    assert!(matches!(err, ChannelError::TransportOpen(_)), "got {err:?}");
    assert!(!channel.connection_state().is_connected);
    Ok(())
}
