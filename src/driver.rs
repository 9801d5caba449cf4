//! Dispatch a fixed number of throttled, concurrent requests.
//!
//! The [`LoadDriver`] waits for a permit from the [`Throttle`] before each dispatch but
//! never for earlier requests to complete: if the server is slower than the dispatch
//! interval, requests pile up in flight, which is exactly the condition that exposes an
//! exhausted application pool. There is no concurrency cap other than the throttle.
//!
//! All in-flight requests are futures polled by the driver itself, so outcomes are
//! recorded one at a time, in completion order, without any locking.

use futures::stream::{FuturesUnordered, StreamExt};
use num_format::{Locale, ToFormattedString};
use std::io::Write;
use tokio::time::Instant;

use crate::config::RunConfig;
use crate::issuer::{RequestIssuer, RequestOutcome};
use crate::report::OutcomeReporter;
use crate::throttle::Throttle;
use crate::StampedeError;

/// Totals of one completed load run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Requests sent.
    pub dispatched: usize,
    /// Requests whose outcome was recorded.
    pub completed: usize,
    pub successes: usize,
    pub failures: usize,
}

/// Runs load against one target, reporting to one output.
#[derive(Debug)]
pub struct LoadDriver<W: Write> {
    issuer: RequestIssuer,
    reporter: OutcomeReporter<W>,
}

impl<W: Write> LoadDriver<W> {
    pub fn new(issuer: RequestIssuer, reporter: OutcomeReporter<W>) -> Self {
        LoadDriver { issuer, reporter }
    }

    pub fn issuer(&self) -> &RequestIssuer {
        &self.issuer
    }

    pub fn reporter(&self) -> &OutcomeReporter<W> {
        &self.reporter
    }

    pub fn reporter_mut(&mut self) -> &mut OutcomeReporter<W> {
        &mut self.reporter
    }

    pub fn into_reporter(self) -> OutcomeReporter<W> {
        self.reporter
    }

    /// Dispatch exactly `total_requests` requests and return once all have completed.
    ///
    /// Only an invalid configuration is an error: failed requests are outcomes.
    pub async fn run(&mut self, config: &RunConfig) -> Result<DispatchSummary, StampedeError> {
        config.validate()?;

        let issuer = &self.issuer;
        let reporter = &mut self.reporter;
        reporter.reset();
        reporter.announce(&format!(
            "Starting {} {} requests...",
            config.total_requests.to_formatted_string(&Locale::en),
            config.method
        ));

        let mut throttle = Throttle::new(config.requests_per_second)?;
        let mut in_flight = FuturesUnordered::new();
        let mut summary = DispatchSummary::default();
        let started = Instant::now();

        while summary.dispatched < config.total_requests {
            tokio::select! {
                permitted = throttle.permit() => {
                    if !permitted {
                        // The ticker only stops when the runtime is shutting down.
                        warn!("throttle stopped after {} requests", summary.dispatched);
                        break;
                    }
                    let delay = config.response_delay.resolve();
                    trace!("dispatching {} with delay {}", config.method, delay);
                    in_flight.push(issuer.issue(config.method, delay));
                    summary.dispatched += 1;
                }
                Some(outcome) = in_flight.next(), if !in_flight.is_empty() => {
                    record(reporter, &mut summary, &outcome);
                }
            }
        }
        debug!(
            "dispatched {} {} requests in {:?}, {} still in flight",
            summary.dispatched,
            config.method,
            started.elapsed(),
            in_flight.len()
        );

        while let Some(outcome) = in_flight.next().await {
            record(reporter, &mut summary, &outcome);
        }
        reporter.finish();

        info!(
            "{} {} requests completed in {:?}: {} succeeded, {} failed",
            summary.completed,
            config.method,
            started.elapsed(),
            summary.successes,
            summary.failures
        );

        Ok(summary)
    }
}

fn record<W: Write>(
    reporter: &mut OutcomeReporter<W>,
    summary: &mut DispatchSummary,
    outcome: &RequestOutcome,
) {
    reporter.record(outcome);
    summary.completed += 1;
    if outcome.is_success() {
        summary.successes += 1;
    } else {
        summary.failures += 1;
    }
}
