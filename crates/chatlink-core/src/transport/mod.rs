//! The `Connector` trait: how the channel opens its transport.
//!
//! A connector turns a URL into a [`TransportLink`]: a synchronous
//! [`FrameWriter`] for outbound frames and a stream of [`TransportEvent`]s.
//! The channel owns each link exclusively and replaces it wholesale on every
//! connect attempt.

pub mod memory;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::mpsc;
use url::Url;

use crate::error::ChannelError;
use crate::event::CloseCode;

/// Frame queued for the transport's writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(String),
    Close { code: CloseCode, reason: String },
}

/// Event reported by an open transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Inbound UTF-8 text frame.
    Frame(String),
    /// The peer closed the connection.
    Closed { code: CloseCode, reason: String },
    /// Transport-level failure; the connection is unusable.
    Error(String),
}

/// Stream of events from one transport link.
pub type TransportEvents = Pin<Box<dyn Stream<Item = TransportEvent> + Send>>;

/// Write half of a link. Writes never block: frames are queued for the
/// transport's writer task.
#[derive(Debug, Clone)]
pub struct FrameWriter {
    tx: mpsc::UnboundedSender<OutboundFrame>,
}

impl FrameWriter {
    /// Create a writer and the receiver the transport drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<OutboundFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send_text(&self, text: String) -> Result<(), ChannelError> {
        self.push(OutboundFrame::Text(text))
    }

    pub fn close(&self, code: CloseCode, reason: impl Into<String>) -> Result<(), ChannelError> {
        self.push(OutboundFrame::Close {
            code,
            reason: reason.into(),
        })
    }

    /// `true` once the transport has stopped draining frames.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn push(&self, frame: OutboundFrame) -> Result<(), ChannelError> {
        self.tx
            .send(frame)
            .map_err(|_| ChannelError::Transport("transport writer is closed".into()))
    }
}

/// An open transport.
pub struct TransportLink {
    pub writer: FrameWriter,
    pub events: TransportEvents,
}

/// Opens transports for the channel.
///
/// # Thread Safety
/// Implementations must be `Send + Sync`; the channel stores them as
/// `Arc<dyn Connector>` and calls `open` from spawned Tokio tasks.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a connection to `url`. Resolves once the connection is usable.
    async fn open(&self, url: &Url) -> Result<TransportLink, ChannelError>;

    /// Short name used in log lines.
    fn name(&self) -> &str {
        "transport"
    }
}
