//! Reconnection policy.
//!
//! ```text
//! abnormal close → [ReconnectPolicy::next_delay] → scheduled attempt → open
//! ```

pub mod reconnect;

pub use reconnect::{ReconnectConfig, ReconnectPolicy};
