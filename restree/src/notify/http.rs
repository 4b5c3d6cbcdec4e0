use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::notify::HttpSender;
use crate::types::NotificationPayload;

/// Webhook sender: one shared client, JSON `POST` to the subscription
/// endpoint, one attempt bounded by a fixed per-call timeout.
pub struct DefaultHttpSender {
    httpc: reqwest::Client,
    timeout: Duration,
}

impl DefaultHttpSender {
    pub fn new(timeout: Duration) -> Result<Self> {
        let httpc = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(8))
            .build()
            .map_err(|e| Error::Transport(anyhow!(e)))?;
        Ok(Self { httpc, timeout })
    }
}

#[async_trait]
impl HttpSender for DefaultHttpSender {
    async fn send(&self, endpoint: &str, payload: &NotificationPayload) -> Result<()> {
        log::debug!("http notification, timeout: {:?}, url: {}", self.timeout, endpoint);
        let resp = self
            .httpc
            .post(endpoint)
            .timeout(self.timeout)
            .json(payload)
            .send()
            .await
            .map_err(|e| Error::Transport(anyhow!(e)))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(Error::Transport(anyhow!(
                "response status is not OK, url:{:?}, status:{}",
                endpoint,
                resp.status()
            )))
        }
    }
}
