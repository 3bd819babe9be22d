use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::loop_worker::verify_loop;
use super::probe::AdProbe;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VerifyOutcome {
    Visible,
    TimedOut,
}

/// Polling window for one verification attempt.
#[derive(Debug, Clone, Copy)]
pub struct VerifyConfig {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            timeout: Duration::from_millis(5000),
        }
    }
}

/// Owns the polling task for the current verification attempt. One attempt
/// at a time; the session controller stops it before starting another.
pub struct VerifierController {
    config: VerifyConfig,
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl VerifierController {
    pub fn new(config: VerifyConfig) -> Self {
        Self {
            config,
            handle: None,
            cancel_token: None,
        }
    }

    pub fn start(
        &mut self,
        probe_rx: watch::Receiver<Option<AdProbe>>,
        outcome_tx: oneshot::Sender<VerifyOutcome>,
    ) -> Result<()> {
        if self.handle.is_some() {
            bail!("verification already active");
        }

        let cancel_token = CancellationToken::new();
        let token_clone = cancel_token.clone();

        let handle = tokio::spawn(verify_loop(probe_rx, outcome_tx, self.config, token_clone));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("verify loop task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }
}
