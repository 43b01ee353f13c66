//! chatlink-ws: WebSocket transport for the chatlink messaging channel.
//!
//! # Features
//! - `ws://` and `wss://` (rustls with webpki roots)
//! - Text frames in, text frames out; binary frames are ignored
//! - Close codes reported as sent by the server (`1005` when absent)
//!
//! ```no_run
//! use chatlink_core::{Channel, ChannelConfig};
//! use chatlink_ws::WsConnector;
//!
//! # async fn run() -> Result<(), chatlink_core::ChannelError> {
//! let channel = Channel::new(WsConnector::new(), ChannelConfig::default());
//! channel.connect("u1", None).await?;
//! channel.send("hello")?;
//! # Ok(())
//! # }
//! ```

pub mod connector;

pub use connector::WsConnector;
