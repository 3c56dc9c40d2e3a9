use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Liveness pinger: GET `url` every `interval`. Failures are logged only.
pub struct Heartbeat {
    client: reqwest::Client,
    url: String,
    interval: Duration,
}

impl Heartbeat {
    pub fn new(url: String, interval: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            interval,
        }
    }

    pub async fn ping(&self) -> Result<()> {
        let response = self.client.get(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("heartbeat returned {}", response.status()));
        }
        Ok(())
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(url = %self.url, interval_secs = self.interval.as_secs(), "heartbeat started");
        loop {
            match self.ping().await {
                Ok(()) => debug!("heartbeat sent"),
                Err(e) => warn!(error = %e, "heartbeat failed"),
            }
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        info!("heartbeat stopped");
    }
}
