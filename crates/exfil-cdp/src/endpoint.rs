//! Locating the browser's debugging WebSockets.

use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::connection::Connection;
use crate::errors::{CdpError, Result};

/// Host and port of the browser's remote debugging server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Endpoint at `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Configured host.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Configured port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// `http://host:port{path}`.
    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}:{}{path}", self.host, self.port)
    }

    /// WebSocket URL of one page target.
    pub fn target_ws_url(&self, target_id: &str) -> String {
        format!("ws://{}:{}/devtools/page/{target_id}", self.host, self.port)
    }

    /// WebSocket URL of the first page in `/json/list`.
    pub async fn page_ws_url(&self) -> Result<String> {
        let url = self.http_url("/json/list");
        let resp = reqwest::get(&url)
            .await
            .map_err(|e| CdpError::Discovery(format!("{url}: {e}")))?;
        let targets: Vec<Value> = resp
            .json()
            .await
            .map_err(|e| CdpError::Discovery(format!("{url}: {e}")))?;
        first_page_ws_url(&targets)
            .ok_or_else(|| CdpError::Discovery(format!("{url}: no page targets")))
    }

    /// Connect to the first page target.
    pub async fn connect(&self) -> Result<Connection> {
        let ws_url = self.page_ws_url().await?;
        Connection::connect(&ws_url).await
    }

    /// Connect to a specific page target.
    pub async fn connect_target(&self, target_id: &str) -> Result<Connection> {
        Connection::connect(&self.target_ws_url(target_id)).await
    }

    /// [`connect`](Self::connect), retrying every `interval` until the
    /// browser accepts. Never gives up; callers race it against browser exit.
    pub async fn connect_with_retry(&self, interval: Duration) -> Connection {
        let mut attempts = 0u64;
        loop {
            attempts += 1;
            match self.connect().await {
                Ok(conn) => {
                    debug!(attempts, url = conn.url(), "connected to browser");
                    return conn;
                }
                Err(e) => {
                    if attempts % 50 == 1 {
                        debug!(attempts, error = %e, "browser not reachable yet");
                    }
                    tokio::time::sleep(interval).await;
                }
            }
        }
    }
}

/// `webSocketDebuggerUrl` of the first `page` entry.
fn first_page_ws_url(targets: &[Value]) -> Option<String> {
    targets
        .iter()
        .filter(|t| t["type"].as_str() == Some("page"))
        .find_map(|t| t["webSocketDebuggerUrl"].as_str())
        .map(str::to_owned)
}
