//! Connection lifecycle state and the events emitted to connection subscribers.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a [`Channel`](crate::Channel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ChannelState {
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }

    pub fn is_connecting(self) -> bool {
        self == Self::Connecting
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// Read-only `{ isConnected, isConnecting }` view for UI code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    pub is_connected: bool,
    pub is_connecting: bool,
}

impl From<ChannelState> for ConnectionState {
    fn from(state: ChannelState) -> Self {
        Self {
            is_connected: state.is_connected(),
            is_connecting: state.is_connecting(),
        }
    }
}

/// WebSocket close status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CloseCode(pub u16);

impl CloseCode {
    /// Intentional shutdown. Never triggers a reconnect.
    pub const NORMAL: CloseCode = CloseCode(1000);
    /// Endpoint going away (server restart, page navigation).
    pub const GOING_AWAY: CloseCode = CloseCode(1001);
    /// Close frame carried no status code.
    pub const NO_STATUS: CloseCode = CloseCode(1005);
    /// Connection dropped without a close frame.
    pub const ABNORMAL: CloseCode = CloseCode(1006);

    pub fn is_normal(self) -> bool {
        self == Self::NORMAL
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        Self(code)
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the channel intends to do after a disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPlan {
    /// Normal closure or explicit `disconnect()`.
    None,
    /// A reconnect attempt is scheduled.
    Scheduled {
        /// 1-based attempt number.
        attempt: u32,
        delay: Duration,
    },
    /// The attempt budget is spent; the channel stays disconnected until the
    /// caller connects again.
    Exhausted { attempts: u32 },
}

/// Event delivered to connection subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected {
        code: CloseCode,
        reason: String,
        reconnect: ReconnectPlan,
    },
}

impl ConnectionEvent {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected { .. })
    }

    /// `true` when no further automatic reconnect will happen.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Disconnected {
                reconnect: ReconnectPlan::None | ReconnectPlan::Exhausted { .. },
                ..
            }
        )
    }

    /// Close code of a disconnect event.
    pub fn code(&self) -> Option<CloseCode> {
        match self {
            Self::Disconnected { code, .. } => Some(*code),
            Self::Connected => None,
        }
    }
}

impl fmt::Display for ConnectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => write!(f, "connected"),
            Self::Disconnected {
                code,
                reason,
                reconnect,
            } => {
                write!(f, "disconnected (code {code}")?;
                if !reason.is_empty() {
                    write!(f, ", reason: {reason}")?;
                }
                match reconnect {
                    ReconnectPlan::None => write!(f, ")"),
                    ReconnectPlan::Scheduled { attempt, delay } => {
                        write!(f, ", reconnect #{attempt} in {delay:?})")
                    }
                    ReconnectPlan::Exhausted { attempts } => {
                        write!(f, ", gave up after {attempts} attempts)")
                    }
                }
            }
        }
    }
}
