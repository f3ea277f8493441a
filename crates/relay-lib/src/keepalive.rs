// ============================
// relay-lib/src/keepalive.rs
// ============================
//! Keep-alive self-ping.
//!
//! Free-tier hosts reap web services that see no traffic. When the process
//! knows its public URL it pings its own `/ping` endpoint on a fixed
//! cadence. Pure infrastructure: no client-visible semantics.

use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, warn};

/// Spawn the self-ping task. `external_url` is the deployment's public base
/// URL (from `RENDER_EXTERNAL_URL`).
pub fn spawn_keepalive(external_url: String, interval_secs: u64) {
    let url = format!("{}/ping", external_url.trim_end_matches('/'));

    tokio::spawn(async move {
        let client = reqwest::Client::new();
        let mut ticker = interval(Duration::from_secs(interval_secs));
        // the first tick fires immediately; skip it so a fresh deploy does
        // not ping itself before the listener is up
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match client.get(&url).send().await {
                Ok(response) => debug!(status = %response.status(), %url, "keep-alive ping"),
                Err(e) => warn!(%url, "keep-alive ping failed: {e}"),
            }
        }
    });
}
