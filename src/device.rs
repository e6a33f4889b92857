//! Device main loop
//!
//! Owns the chat screen and is the only context that originates triggers.
//! Every refresh it drains the transcript, refreshes playback status and
//! reaps finished sessions.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::controller::{InteractionController, TriggerOutcome};
use crate::network::NetworkStatus;
use crate::transcript::TranscriptLog;
use crate::voice::AudioPlayback;
use crate::Result;

/// Display refresh period, within the 5-20 ms budget of the touch loop
pub const REFRESH_INTERVAL: Duration = Duration::from_millis(10);

/// Primary loop over the interaction pipeline
pub struct Device {
    controller: InteractionController,
    playback: Arc<AudioPlayback>,
    log: TranscriptLog,
    network: Arc<NetworkStatus>,
}

impl Device {
    /// Assemble the device from its parts
    #[must_use]
    pub const fn new(
        controller: InteractionController,
        playback: Arc<AudioPlayback>,
        log: TranscriptLog,
        network: Arc<NetworkStatus>,
    ) -> Self {
        Self {
            controller,
            playback,
            log,
            network,
        }
    }

    /// Run until `shutdown` resolves
    ///
    /// Each message on `triggers` is one press of the talk button.
    ///
    /// # Errors
    ///
    /// Returns error if the loop cannot shut down cleanly
    pub async fn run(
        mut self,
        mut triggers: mpsc::Receiver<()>,
        shutdown: impl Future<Output = ()>,
    ) -> Result<()> {
        tokio::pin!(shutdown);

        let mut refresh = tokio::time::interval(REFRESH_INTERVAL);
        refresh.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!(
            connected = self.network.is_connected(),
            "device ready, press Enter to talk"
        );

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("shutdown requested");
                    break;
                }
                trigger = triggers.recv() => {
                    if trigger.is_none() {
                        tracing::info!("trigger source closed");
                        break;
                    }
                    self.on_trigger();
                }
                _ = refresh.tick() => self.refresh(),
            }
        }

        self.refresh();

        let playback = Arc::clone(&self.playback);
        tokio::task::spawn_blocking(move || playback.stop())
            .await
            .map_err(|e| crate::Error::Audio(e.to_string()))?;

        tracing::info!("device stopped");
        Ok(())
    }

    fn on_trigger(&mut self) {
        match self.controller.trigger() {
            TriggerOutcome::Started(id) => tracing::debug!(session = id, "talk pressed"),
            TriggerOutcome::Ignored => tracing::debug!(
                state = %self.controller.state(),
                speaking = self.controller.is_speaking(),
                "talk press ignored"
            ),
        }
    }

    fn refresh(&mut self) {
        for line in self.log.drain() {
            println!("{line}");
        }
        self.playback.poll();
        self.controller.poll();
    }
}
