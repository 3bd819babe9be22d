use log::info;
use tokio::sync::{oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::controller::{VerifyConfig, VerifyOutcome};
use super::probe::AdProbe;

/// Samples the latest layout probe on a fixed interval until the ad is
/// visible or the verification window closes. Cancellation drops the
/// outcome sender without reporting anything.
pub async fn verify_loop(
    probe_rx: watch::Receiver<Option<AdProbe>>,
    outcome_tx: oneshot::Sender<VerifyOutcome>,
    config: VerifyConfig,
    cancel_token: CancellationToken,
) {
    let deadline = Instant::now() + config.timeout;
    let mut ticker = tokio::time::interval(config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let outcome = loop {
        tokio::select! {
            _ = ticker.tick() => {
                let visible = probe_rx
                    .borrow()
                    .as_ref()
                    .map(AdProbe::is_visible)
                    .unwrap_or(false);

                if visible {
                    break Some(VerifyOutcome::Visible);
                }
                if Instant::now() >= deadline {
                    break Some(VerifyOutcome::TimedOut);
                }
            }
            _ = cancel_token.cancelled() => {
                info!("verify loop shutting down");
                break None;
            }
        }
    };

    if let Some(outcome) = outcome {
        let _ = outcome_tx.send(outcome);
    }
}
