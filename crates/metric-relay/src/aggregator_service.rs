// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::aggregator::Aggregator;
use crate::config::AggregationRule;
use crate::dispatch::Dispatch;
use crate::queue::QueueReceiver;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Outcome of one aggregation window.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushSummary {
    /// Lines taken from the queue
    pub drained: usize,
    /// Drained lines that could not be parsed, plus groups whose value overflowed
    pub skipped: usize,
    /// Aggregated lines handed to dispatch
    pub emitted: usize,
}

pub struct AggregatorService {
    aggregator: Aggregator,
    queue: QueueReceiver,
    dispatch: Arc<Dispatch>,
    period: Duration,
}

impl AggregatorService {
    #[must_use]
    pub fn new(
        rules: Vec<AggregationRule>,
        queue: QueueReceiver,
        dispatch: Arc<Dispatch>,
        period: Duration,
    ) -> Self {
        Self {
            aggregator: Aggregator::new(rules),
            queue,
            dispatch,
            period,
        }
    }

    /// Aggregates the lines queued when the window closed. Lines arriving meanwhile belong
    /// to the next window.
    pub fn flush(&mut self) -> FlushSummary {
        let lines = self.queue.drain_snapshot();
        let mut summary = FlushSummary {
            drained: lines.len(),
            ..Default::default()
        };

        for line in &lines {
            if let Err(e) = self.aggregator.insert(line) {
                warn!("Can not aggregate \"{line}\": {e}");
                summary.skipped += 1;
            }
        }

        for result in self.aggregator.flush() {
            match result {
                Ok(line) => {
                    self.dispatch.dispatch_aggregated(&line);
                    summary.emitted += 1;
                }
                Err(e) => {
                    warn!("Dropping aggregated group: {e}");
                    summary.skipped += 1;
                }
            }
        }

        if summary.drained > 0 {
            debug!(
                "Aggregated {} lines into {}",
                summary.drained.saturating_sub(summary.skipped),
                summary.emitted
            );
        }
        summary
    }

    pub async fn run(mut self, cancel_token: CancellationToken) {
        debug!("Aggregator service started");

        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // discard first tick, which is instantaneous

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.flush();
                }
                _ = cancel_token.cancelled() => {
                    debug!("Final aggregation flush");
                    self.flush();
                    break;
                }
            }
        }

        debug!("Aggregator service stopped");
    }
}
