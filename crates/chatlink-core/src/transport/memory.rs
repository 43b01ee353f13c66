//! In-process transport.
//!
//! `MemoryConnector` hands out links whose far side is a [`MemoryPeer`] the
//! caller drives directly, or, in echo mode, a loopback that reflects every
//! text frame. Each `open` consumes the next scripted [`OpenBehavior`]
//! (default: accept).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use tokio::sync::mpsc;
use url::Url;

use super::{Connector, FrameWriter, OutboundFrame, TransportEvent, TransportLink};
use crate::error::ChannelError;
use crate::event::CloseCode;
use crate::message::ChatMessage;

/// What the next `open` call does.
#[derive(Debug, Clone)]
pub enum OpenBehavior {
    Accept,
    /// Accept after a delay.
    AcceptAfter(Duration),
    /// Fail with `TransportOpen(reason)`.
    Fail(String),
    /// Never resolve.
    Hang,
}

#[derive(Default)]
struct State {
    script: VecDeque<OpenBehavior>,
    urls: Vec<Url>,
    echo: bool,
}

/// Connector backed by in-memory channels.
#[derive(Clone)]
pub struct MemoryConnector {
    state: Arc<Mutex<State>>,
    peers_tx: mpsc::UnboundedSender<MemoryPeer>,
    peers_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<MemoryPeer>>>,
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryConnector {
    pub fn new() -> Self {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(Mutex::new(State::default())),
            peers_tx,
            peers_rx: Arc::new(tokio::sync::Mutex::new(peers_rx)),
        }
    }

    /// Loopback: every accepted link echoes text frames back and answers a
    /// close frame with the same code.
    pub fn echo() -> Self {
        let connector = Self::new();
        connector.lock().echo = true;
        connector
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue the behaviour of a future `open` call.
    pub fn script(&self, behavior: OpenBehavior) -> &Self {
        self.lock().script.push_back(behavior);
        self
    }

    /// Number of `open` calls so far.
    pub fn opens(&self) -> usize {
        self.lock().urls.len()
    }

    /// URLs passed to `open`, in call order.
    pub fn urls(&self) -> Vec<Url> {
        self.lock().urls.clone()
    }

    /// Wait for the next accepted (non-echo) link.
    pub async fn next_peer(&self) -> Option<MemoryPeer> {
        self.peers_rx.lock().await.recv().await
    }

    fn accept(&self, url: &Url, echo: bool) -> TransportLink {
        let (writer, outbound) = FrameWriter::channel();
        let (inbound, events) = fmpsc::unbounded();
        let peer = MemoryPeer {
            url: url.clone(),
            outbound,
            inbound,
        };
        if echo {
            tokio::spawn(peer.run_echo());
        } else if self.peers_tx.send(peer).is_err() {
            tracing::debug!("memory connector has no peer listener");
        }
        TransportLink {
            writer,
            events: Box::pin(events),
        }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open(&self, url: &Url) -> Result<TransportLink, ChannelError> {
        let (behavior, echo) = {
            let mut state = self.lock();
            state.urls.push(url.clone());
            (
                state.script.pop_front().unwrap_or(OpenBehavior::Accept),
                state.echo,
            )
        };
        match behavior {
            OpenBehavior::Accept => Ok(self.accept(url, echo)),
            OpenBehavior::AcceptAfter(delay) => {
                tokio::time::sleep(delay).await;
                Ok(self.accept(url, echo))
            }
            OpenBehavior::Fail(reason) => Err(ChannelError::TransportOpen(reason)),
            OpenBehavior::Hang => futures::future::pending().await,
        }
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Server side of a memory link.
pub struct MemoryPeer {
    url: Url,
    outbound: mpsc::UnboundedReceiver<OutboundFrame>,
    inbound: fmpsc::UnboundedSender<TransportEvent>,
}

impl MemoryPeer {
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Next frame written by the client; `None` once the client dropped the link.
    pub async fn recv(&mut self) -> Option<OutboundFrame> {
        self.outbound.recv().await
    }

    pub fn try_recv(&mut self) -> Option<OutboundFrame> {
        self.outbound.try_recv().ok()
    }

    /// Deliver a raw text frame to the client.
    pub fn push_frame(&self, text: impl Into<String>) -> bool {
        self.emit(TransportEvent::Frame(text.into()))
    }

    /// Deliver an encoded chat message to the client.
    pub fn push_message(&self, message: &ChatMessage) -> bool {
        match message.encode() {
            Ok(frame) => self.push_frame(frame),
            Err(_) => false,
        }
    }

    /// Close the connection from the server side.
    pub fn close(&self, code: CloseCode, reason: impl Into<String>) -> bool {
        self.emit(TransportEvent::Closed {
            code,
            reason: reason.into(),
        })
    }

    /// Report a transport error to the client.
    pub fn fail(&self, error: impl Into<String>) -> bool {
        self.emit(TransportEvent::Error(error.into()))
    }

    /// Drop the connection without a close frame.
    pub fn drop_connection(self) {}

    fn emit(&self, event: TransportEvent) -> bool {
        self.inbound.unbounded_send(event).is_ok()
    }

    async fn run_echo(mut self) {
        while let Some(frame) = self.outbound.recv().await {
            match frame {
                OutboundFrame::Text(text) => {
                    self.push_frame(text);
                }
                OutboundFrame::Close { code, reason } => {
                    self.close(code, reason);
                    break;
                }
            }
        }
    }
}
