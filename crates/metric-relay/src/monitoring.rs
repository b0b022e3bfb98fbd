// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Self monitoring.
//!
//! Every interval all counters are read and zeroed, formatted as ordinary metric lines and
//! pushed through the backends' monitoring queues.

use crate::dispatch::Dispatch;
use crate::stats::{monitoring_capacity, Stats};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub struct Monitoring {
    prefix: String,
    stats: Arc<Stats>,
    dispatch: Arc<Dispatch>,
    period: Duration,
}

impl Monitoring {
    #[must_use]
    pub fn new(
        prefix: impl Into<String>,
        stats: Arc<Stats>,
        dispatch: Arc<Dispatch>,
        period: Duration,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            stats,
            dispatch,
            period,
        }
    }

    /// Reads and zeroes every counter, returning one line per counter stamped with `now`.
    pub fn generate_lines(&self, now: i64) -> Vec<String> {
        let mut lines = Vec::with_capacity(monitoring_capacity(self.stats.backend_count()));

        for (field, value) in self.stats.server().take().fields() {
            lines.push(format!("{}.server.{field} {value} {now}", self.prefix));
        }
        for (backend, client) in self.stats.clients() {
            let slug = backend.slug();
            for (field, value) in client.take().fields() {
                lines.push(format!(
                    "{}.backend.{slug}.{field} {value} {now}",
                    self.prefix
                ));
            }
        }

        let overflow = self.stats.take_aggregation_overflow();
        if overflow > 0 {
            warn!("Aggregation queue was full, {overflow} lines were dropped");
        }
        lines
    }

    /// Emits one round of monitoring lines to every backend.
    pub async fn report(&self) -> usize {
        let lines = self.generate_lines(unix_now());
        for line in &lines {
            self.dispatch.dispatch_monitoring(line).await;
        }
        debug!("Reported {} monitoring lines", lines.len());
        lines.len()
    }

    /// Reports every period, and once more on cancellation so the last partial interval is
    /// not lost.
    pub async fn run(self, cancel_token: CancellationToken) {
        debug!("Monitoring started");

        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // discard first tick, which is instantaneous

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.report().await;
                }
                _ = cancel_token.cancelled() => {
                    self.report().await;
                    break;
                }
            }
        }

        debug!("Monitoring stopped");
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}
