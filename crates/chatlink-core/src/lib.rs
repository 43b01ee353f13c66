//! chatlink-core: the resilient messaging channel.
//!
//! # Overview
//!
//! A [`Channel`] owns one logical WebSocket-style connection to a chat
//! backend. It moves through `Disconnected → Connecting → Connected`,
//! reconnects after abnormal closures on a bounded fixed-delay schedule, and
//! fans inbound messages and connection events out to subscribers.
//!
//! - [`Channel`]: connect / disconnect / send / subscribe
//! - [`ChatMessage`]: the JSON envelope exchanged with the server
//! - [`ConnectionEvent`] / [`ChannelState`]: lifecycle notifications
//! - [`Connector`]: the transport seam; [`transport::memory`] ships an
//!   in-process implementation, `chatlink-ws` a real WebSocket one
//! - [`policy`] module: reconnect budget and delay
//! - [`ChannelConfig`]: endpoint, reconnect and timeout settings (YAML)

pub mod channel;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod event;
pub mod message;
pub mod policy;
pub mod registry;
pub mod transport;

pub use channel::{Channel, WeakChannel};
pub use config::ChannelConfig;
pub use endpoint::{Endpoint, Identity};
pub use error::ChannelError;
pub use event::{ChannelState, CloseCode, ConnectionEvent, ConnectionState, ReconnectPlan};
pub use message::{ChatMessage, MessageKind, MessageStatus};
pub use policy::{ReconnectConfig, ReconnectPolicy};
pub use registry::{Handler, ScopedSubscription, Subscription};
pub use transport::{Connector, FrameWriter, OutboundFrame, TransportEvent, TransportLink};
