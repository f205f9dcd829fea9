//! HTTP server command: `bpla-tracker serve`.

use anyhow::Result;
use bpla_tracker::config::TrackerConfig;
use tracing::warn;

pub async fn cmd_serve(config: TrackerConfig, open: bool) -> Result<()> {
    // Skip in dev mode (the frontend dev server owns the browser tab)
    if open && !config.server.dev_mode {
        let url = format!("http://localhost:{}", config.server.port);
        tokio::spawn(async move {
            tokio::time::sleep(tokio::time::Duration::from_millis(500)).await;
            if let Err(e) = open::that(&url) {
                warn!("Failed to open browser: {}", e);
            }
        });
    }

    bpla_tracker::tracker::server::start_server(config).await
}
