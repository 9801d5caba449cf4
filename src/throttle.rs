//! Leading-edge request throttle.
//!
//! A [`Throttle`] converts a requests-per-second target into a minimum interval between
//! dispatches. A background ticker offers one permit per interval into a bounded channel
//! that holds a single permit. If the previous permit has not been claimed yet the new
//! one is dropped, so permits never accumulate and a quiet period never turns into a
//! burst. The first permit is available immediately.
//!
//! The driver awaits [`Throttle::permit`] instead of polling, which keeps the dispatch
//! loop idle between ticks. [`Throttle::try_permit`] is the non-blocking variant: an
//! attempt that arrives before the next tick is refused, it is not queued.
//!
//! Rates whose interval is shorter than the resolution of the Tokio timer (about one
//! millisecond) are silently capped at that resolution.

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, MissedTickBehavior};

use crate::StampedeError;

/// Limits how often a request may be dispatched.
#[derive(Debug)]
pub struct Throttle {
    /// Minimum time between two permits.
    interval: Duration,
    /// Receives at most one outstanding permit from the ticker.
    permits: mpsc::Receiver<()>,
    /// The ticker offering permits, aborted when the throttle is dropped.
    ticker: JoinHandle<()>,
}

impl Throttle {
    /// Launch a throttle allowing `requests_per_second` dispatches per second.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(requests_per_second: f64) -> Result<Throttle, StampedeError> {
        let interval = permit_interval(requests_per_second)?;
        let (permit_tx, permit_rx) = mpsc::channel(1);
        let ticker = tokio::spawn(throttle_main(interval, permit_tx));

        Ok(Throttle {
            interval,
            permits: permit_rx,
            ticker,
        })
    }

    /// The minimum time between two permitted dispatches.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait for the next permit. Returns false only if the ticker has stopped.
    pub async fn permit(&mut self) -> bool {
        self.permits.recv().await.is_some()
    }

    /// Claim a permit if one is available right now, without waiting.
    pub fn try_permit(&mut self) -> bool {
        self.permits.try_recv().is_ok()
    }
}

impl Drop for Throttle {
    fn drop(&mut self) {
        self.ticker.abort();
    }
}

/// Convert a rate into the interval between two permits: `1000 / rate` milliseconds.
pub fn permit_interval(requests_per_second: f64) -> Result<Duration, StampedeError> {
    if !requests_per_second.is_finite() || requests_per_second <= 0.0 {
        return Err(StampedeError::InvalidOption {
            option: "requests_per_second".to_string(),
            value: requests_per_second.to_string(),
            detail: "requests_per_second must be a finite number greater than 0.".to_string(),
        });
    }

    let interval = Duration::try_from_secs_f64(1.0 / requests_per_second).map_err(|e| {
        StampedeError::InvalidOption {
            option: "requests_per_second".to_string(),
            value: requests_per_second.to_string(),
            detail: format!("requests_per_second is too small: {}", e),
        }
    })?;

    // Tokio intervals panic on a zero period.
    Ok(interval.max(Duration::from_nanos(1)))
}

/// Offer one permit per interval until the throttle is dropped.
async fn throttle_main(interval: Duration, permit_tx: mpsc::Sender<()>) {
    info!("throttle allowing 1 request every {:?}", interval);

    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // The first tick completes immediately.
        ticker.tick().await;

        match permit_tx.try_send(()) {
            Ok(()) => (),
            Err(TrySendError::Full(())) => {
                trace!("previous permit not yet claimed, dropping tick");
            }
            Err(TrySendError::Closed(())) => {
                debug!("throttle receiver dropped, stopping ticker");
                break;
            }
        }
    }
}
