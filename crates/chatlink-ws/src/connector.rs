//! WebSocket connector built on tokio-tungstenite.

use std::fmt::Display;

use async_trait::async_trait;
use futures::{Sink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use chatlink_core::error::ChannelError;
use chatlink_core::event::CloseCode;
use chatlink_core::transport::{Connector, FrameWriter, OutboundFrame, TransportEvent, TransportLink};

/// Opens `ws://` and `wss://` connections.
///
/// Each link gets a writer task that owns the sink half; the read half is
/// mapped straight into [`TransportEvent`]s. Ping/pong is answered by
/// tungstenite itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, url: &Url) -> Result<TransportLink, ChannelError> {
        let (ws_stream, response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| ChannelError::TransportOpen(e.to_string()))?;
        tracing::debug!(url = %url, status = %response.status(), "websocket handshake complete");

        let (sink, stream) = ws_stream.split();
        let (writer, outbound) = FrameWriter::channel();
        tokio::spawn(write_loop(sink, outbound));

        let events = stream.filter_map(|msg| async move {
            match msg {
                Ok(Message::Text(text)) => Some(TransportEvent::Frame(text.to_string())),
                Ok(Message::Close(frame)) => Some(match frame {
                    Some(frame) => TransportEvent::Closed {
                        code: CloseCode(u16::from(frame.code)),
                        reason: frame.reason.to_string(),
                    },
                    None => TransportEvent::Closed {
                        code: CloseCode::NO_STATUS,
                        reason: String::new(),
                    },
                }),
                Ok(Message::Binary(data)) => {
                    tracing::debug!(bytes = data.len(), "ignoring binary frame");
                    None
                }
                Ok(_) => None,
                Err(e) => Some(TransportEvent::Error(e.to_string())),
            }
        });

        Ok(TransportLink {
            writer,
            events: Box::pin(events),
        })
    }

    fn name(&self) -> &str {
        "websocket"
    }
}

/// Drain queued frames into the socket until a close is sent or the writer
/// is dropped.
async fn write_loop<S>(mut sink: S, mut outbound: mpsc::UnboundedReceiver<OutboundFrame>)
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    while let Some(frame) = outbound.recv().await {
        match frame {
            OutboundFrame::Text(text) => {
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    // Connection dropped; the read half reports it.
                    tracing::warn!(error = %e, "WS send failed");
                    break;
                }
            }
            OutboundFrame::Close { code, reason } => {
                let frame = CloseFrame {
                    code: code.0.into(),
                    reason: reason.into(),
                };
                if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                    tracing::debug!(error = %e, "WS close frame not sent");
                }
                break;
            }
        }
    }
    let _ = sink.close().await;
}
