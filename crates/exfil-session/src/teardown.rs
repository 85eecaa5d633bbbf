//! Orderly shutdown of the processes a run depends on.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::errors::ShutdownCause;
use crate::lifecycle::Lifecycle;

/// An external process or server stopped during teardown.
#[async_trait]
pub trait Collaborator: Send + Sync {
    /// Name used in log lines.
    fn name(&self) -> &str;

    /// Stop it. Called once.
    async fn stop(&self) -> std::io::Result<()>;
}

/// Wait for the first shutdown request, stop the browser and then the web
/// server (bounded by `timeout`), close the shutdown point, and report the
/// cause through the stopped handshake. Returns the cause as well.
pub async fn supervise(
    lifecycle: Arc<Lifecycle>,
    browser: Arc<dyn Collaborator>,
    web_server: Option<Arc<dyn Collaborator>>,
    timeout: Duration,
) -> Option<ShutdownCause> {
    let cause = lifecycle.wait_shutdown().await.flatten();
    match &cause {
        Some(c) => warn!(cause = %c, "shutting down"),
        None => info!("shutting down"),
    }
    lifecycle.close_shutdown();

    if let Err(e) = browser.stop().await {
        warn!(name = browser.name(), error = %e, "failed to stop");
    }

    if let Some(server) = web_server {
        match tokio::time::timeout(timeout, server.stop()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(name = server.name(), error = %e, "failed to stop"),
            Err(_) => warn!(name = server.name(), ?timeout, "shutdown timed out"),
        }
    }

    let _ = lifecycle.signal_stopped(cause.clone()).await;
    cause
}
