//! Network connectivity tracking
//!
//! Wi-Fi association itself is handled by the host; this only records whether
//! the internet is reachable so network-bound stages can fail fast.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;

/// Shared connectivity flag
#[derive(Debug, Default)]
pub struct NetworkStatus {
    connected: AtomicBool,
}

impl NetworkStatus {
    /// Create a status with an initial value
    #[must_use]
    pub const fn new(connected: bool) -> Self {
        Self {
            connected: AtomicBool::new(connected),
        }
    }

    /// Whether the last probe succeeded
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Record the connectivity state
    pub fn set_connected(&self, connected: bool) {
        let previous = self.connected.swap(connected, Ordering::AcqRel);
        if previous != connected {
            if connected {
                tracing::info!("network connected");
            } else {
                tracing::warn!("network disconnected");
            }
        }
    }

    /// Probe a `generate_204` style URL and record the result
    ///
    /// HTTP 204 or 200 counts as connected; anything else, including a
    /// request failure, counts as disconnected.
    pub async fn probe(&self, client: &reqwest::Client, url: &str, timeout: Duration) -> bool {
        let connected = match client.get(url).timeout(timeout).send().await {
            Ok(response) => {
                let status = response.status();
                tracing::debug!(status = %status, "connectivity probe answered");
                status == reqwest::StatusCode::NO_CONTENT || status == reqwest::StatusCode::OK
            }
            Err(e) => {
                tracing::debug!(error = %e, "connectivity probe failed");
                false
            }
        };

        self.set_connected(connected);
        connected
    }

    /// Probe now and then every `interval` on a background task
    #[must_use]
    pub fn spawn_monitor(
        self: Arc<Self>,
        client: reqwest::Client,
        url: String,
        interval: Duration,
        timeout: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.probe(&client, &url, timeout).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_round_trips() {
        let status = NetworkStatus::new(false);
        assert!(!status.is_connected());
        status.set_connected(true);
        assert!(status.is_connected());
    }

    #[tokio::test]
    async fn unreachable_probe_marks_disconnected() {
        let status = NetworkStatus::new(true);
        let client = reqwest::Client::new();

        let connected = status
            .probe(&client, "http://127.0.0.1:9/generate_204", Duration::from_millis(500))
            .await;

        assert!(!connected);
        assert!(!status.is_connected());
    }
}
