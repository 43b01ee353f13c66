//! Chat endpoint addressing: `{ws|wss}://host[:port]/ws/chat?userId=…&sessionId=…`.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ChannelError;

/// Port the chat server listens on in development.
pub const DEV_PORT: u16 = 8080;
/// Path of the chat socket on the server.
pub const CHAT_PATH: &str = "/ws/chat";

/// Who the connection belongs to. Kept by the channel across reconnects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, session_id: Option<String>) -> Self {
        Self {
            user_id: user_id.into(),
            session_id,
        }
    }
}

/// Where the chat socket lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// `wss` when `true`, `ws` otherwise.
    #[serde(default)]
    pub secure: bool,
    #[serde(default = "default_host")]
    pub host: String,
    /// `None` uses the scheme's default port.
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_host() -> String { "localhost".into() }
fn default_path() -> String { CHAT_PATH.into() }

impl Default for Endpoint {
    fn default() -> Self {
        Self::development(default_host())
    }
}

impl Endpoint {
    /// Development layout: plain `ws`, fixed port 8080.
    pub fn development(host: impl Into<String>) -> Self {
        Self {
            secure: false,
            host: host.into(),
            port: Some(DEV_PORT),
            path: default_path(),
        }
    }

    /// Production layout: scheme, host and port inherited from the page the
    /// client was served from (`https` pages get `wss`).
    pub fn from_page_url(page: &str) -> Result<Self, ChannelError> {
        let page = Url::parse(page).map_err(|e| ChannelError::InvalidEndpoint(e.to_string()))?;
        let host = page
            .host_str()
            .ok_or_else(|| ChannelError::InvalidEndpoint(format!("page URL has no host: {page}")))?;
        Ok(Self {
            secure: page.scheme() == "https",
            host: host.to_string(),
            port: page.port(),
            path: default_path(),
        })
    }

    pub fn scheme(&self) -> &'static str {
        if self.secure {
            "wss"
        } else {
            "ws"
        }
    }

    /// Build the connection URL for `identity`. Query values are percent-encoded.
    pub fn url(&self, identity: &Identity) -> Result<Url, ChannelError> {
        if identity.user_id.is_empty() {
            return Err(ChannelError::InvalidEndpoint("userId is required".into()));
        }
        let mut url = Url::parse(&format!("{}://{}", self.scheme(), self.host))
            .map_err(|e| ChannelError::InvalidEndpoint(e.to_string()))?;
        url.set_port(self.port)
            .map_err(|_| ChannelError::InvalidEndpoint(format!("cannot set port on {url}")))?;
        url.set_path(&self.path);
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("userId", &identity.user_id);
            if let Some(session) = identity.session_id.as_deref().filter(|s| !s.is_empty()) {
                query.append_pair("sessionId", session);
            }
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn development_url() {
        let ep = Endpoint::development("localhost");
        let url = ep.url(&Identity::new("u1", None)).unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8080/ws/chat?userId=u1");
    }

    #[test]
    fn session_id_is_appended() {
        let ep = Endpoint::development("10.0.0.5");
        let url = ep
            .url(&Identity::new("u1", Some("s-9".into())))
            .unwrap();
        assert_eq!(url.as_str(), "ws://10.0.0.5:8080/ws/chat?userId=u1&sessionId=s-9");
    }

    #[test]
    fn secure_page_inherits_scheme_and_port() {
        let ep = Endpoint::from_page_url("https://tickets.example.com/chat").unwrap();
        assert!(ep.secure);
        assert_eq!(ep.port, None);
        let url = ep.url(&Identity::new("u1", None)).unwrap();
        assert_eq!(url.as_str(), "wss://tickets.example.com/ws/chat?userId=u1");

        let ep = Endpoint::from_page_url("http://127.0.0.1:5173/").unwrap();
        assert!(!ep.secure);
        assert_eq!(ep.port, Some(5173));
    }

    #[test]
    fn query_values_are_encoded() {
        let url = Endpoint::development("localhost")
            .url(&Identity::new("张 三&x", None))
            .unwrap();
        let pairs: Vec<_> = url.query_pairs().collect();
        assert_eq!(pairs[0].1, "张 三&x");
    }

    #[test]
    fn empty_user_id_is_rejected() {
        let err = Endpoint::default().url(&Identity::new("", None)).unwrap_err();
        assert!(matches!(err, ChannelError::InvalidEndpoint(_)));
    }
}
