//! Background token keep-alive
//!
//! Renews the active session's bearer token on a fixed interval so an idle
//! proxy does not start its next request on an expired token. Runs
//! independently of the request path and follows promotions: every tick
//! renews whichever session is current at that moment.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::failover::FailoverController;

/// Spawn the keep-alive loop. The first tick is skipped since bootstrap just
/// issued a token.
pub fn spawn_keepalive_task(
    controller: Arc<FailoverController>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            keepalive_cycle(&controller).await;
        }
    })
}

/// Renew once. Failures are left for the next tick.
async fn keepalive_cycle(controller: &FailoverController) {
    let session = controller.current().await;
    match session.renew(false).await {
        Ok(()) => debug!(account = %session.account(), "keep-alive renewal succeeded"),
        Err(e) => warn!(
            account = %session.account(),
            error = %e,
            "keep-alive renewal failed, will retry next cycle"
        ),
    }
}
