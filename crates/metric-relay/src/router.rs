// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Validation and routing of ingested lines.
//!
//! Accepted lines whose name carries an aggregation prefix go to the aggregation queue, all
//! others straight to the backends. Nothing here waits: full queues drop and count.

use crate::config::{AggregationRule, RelayConfig, RewriteRule};
use crate::dispatch::Dispatch;
use crate::metric::{is_valid, parse};
use crate::queue::QueueSender;
use crate::stats::{add, Stats};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Where a batch of lines came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Net,
    Dir,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Net => write!(f, "network"),
            Self::Dir => write!(f, "spool directory"),
        }
    }
}

/// Outcome of routing one batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RouteSummary {
    pub accepted: usize,
    pub invalid: usize,
    /// Accepted lines queued for aggregation
    pub aggregated: usize,
    /// Accepted lines lost because the aggregation queue was full
    pub overflowed: usize,
}

pub struct Router {
    aggregation: Vec<AggregationRule>,
    rewrites: Vec<RewriteRule>,
    aggregation_queue: QueueSender,
    dispatch: Arc<Dispatch>,
    stats: Arc<Stats>,
}

impl Router {
    #[must_use]
    pub fn new(
        config: &RelayConfig,
        aggregation_queue: QueueSender,
        dispatch: Arc<Dispatch>,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            aggregation: config.aggregation.clone(),
            rewrites: config.rewrites.clone(),
            aggregation_queue,
            dispatch,
            stats,
        }
    }

    pub fn route<I, S>(&self, lines: I, source: Source) -> RouteSummary
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut summary = RouteSummary::default();
        for line in lines {
            let Some(line) = self.accept(line.as_ref()) else {
                summary.invalid += 1;
                add(&self.stats.server().invalid, 1);
                continue;
            };

            summary.accepted += 1;
            match source {
                Source::Net => add(&self.stats.server().net, 1),
                Source::Dir => add(&self.stats.server().dir, 1),
            }

            if self.is_aggregated(&line) {
                if self.aggregation_queue.offer(line).is_ok() {
                    summary.aggregated += 1;
                } else {
                    summary.overflowed += 1;
                    self.stats.record_aggregation_overflow();
                }
            } else {
                self.dispatch.dispatch(&line);
            }
        }

        if summary.invalid > 0 {
            debug!(
                "Rejected {} of {} lines from {source}",
                summary.invalid,
                summary.invalid + summary.accepted
            );
        }
        summary
    }

    /// Validates a line and applies the first matching rewrite rule.
    fn accept(&self, line: &str) -> Option<String> {
        let line = line.trim();
        if let Err(e) = parse(line) {
            debug!("Removing bad metric \"{line}\": {e}");
            return None;
        }

        let Some(rule) = self.rewrites.iter().find(|rule| rule.pattern.is_match(line)) else {
            return Some(line.to_string());
        };
        let rewritten = rule
            .pattern
            .replace_all(line, rule.replacement.as_str())
            .trim()
            .to_string();
        if !is_valid(&rewritten) {
            debug!("Rewrite of \"{line}\" produced bad metric \"{rewritten}\"");
            return None;
        }
        trace!("Rewrote \"{line}\" to \"{rewritten}\"");
        Some(rewritten)
    }

    fn is_aggregated(&self, line: &str) -> bool {
        self.aggregation
            .iter()
            .any(|rule| line.starts_with(rule.prefix.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{parse_rewrite_rules, AggregationKind, Backend};
    use crate::dispatch::BackendReceivers;
    use crate::queue::{bounded, QueueReceiver};
    use tracing_test::traced_test;

    struct Fixture {
        router: Router,
        aggregation_rx: QueueReceiver,
        receivers: Vec<(Backend, BackendReceivers)>,
        stats: Arc<Stats>,
    }

    fn fixture(config: RelayConfig, aggregation_capacity: usize, live_capacity: usize) -> Fixture {
        let stats = Arc::new(Stats::new(&config.backends));
        let (dispatch, receivers) =
            Dispatch::new(&config.backends, live_capacity, 11, Arc::clone(&stats));
        let (aggregation_tx, aggregation_rx) = bounded(aggregation_capacity);
        let router = Router::new(&config, aggregation_tx, Arc::new(dispatch), Arc::clone(&stats));
        Fixture {
            router,
            aggregation_rx,
            receivers,
            stats,
        }
    }

    fn default_fixture() -> Fixture {
        fixture(RelayConfig::default(), 16, 16)
    }

    #[test]
    fn routes_plain_lines_to_dispatch_verbatim() {
        let mut f = default_fixture();
        let summary = f.router.route(
            ["test.oleg.test 8 1500000000", "whoop.whoop 11 1500000000"],
            Source::Net,
        );

        assert_eq!(summary.accepted, 2);
        assert_eq!(f.stats.server().snapshot().net, 2);
        assert!(f.aggregation_rx.is_empty());
        assert_eq!(
            f.receivers[0].1.live.drain_snapshot(),
            vec!["test.oleg.test 8 1500000000", "whoop.whoop 11 1500000000"]
        );
    }

    #[test]
    fn routes_prefixed_lines_to_aggregation() {
        let mut f = default_fixture();
        let summary = f
            .router
            .route(["SUM.requests 1 100", "AVG.latency 3 100"], Source::Dir);

        assert_eq!(summary.aggregated, 2);
        assert_eq!(f.stats.server().snapshot().dir, 2);
        assert_eq!(
            f.aggregation_rx.drain_snapshot(),
            vec!["SUM.requests 1 100", "AVG.latency 3 100"]
        );
        assert!(f.receivers[0].1.live.is_empty());
    }

    #[test]
    #[traced_test]
    fn counts_invalid_lines() {
        let f = default_fixture();
        let summary = f.router.route(
            ["only two", "a b 1", "a 1 x", "", "ok 1 1"],
            Source::Net,
        );

        assert_eq!(summary.invalid, 4);
        assert_eq!(summary.accepted, 1);
        let server = f.stats.server().snapshot();
        assert_eq!(server.invalid, 4);
        assert_eq!(server.net, 1);
        assert!(logs_contain("Removing bad metric"));
    }

    #[test]
    fn full_aggregation_queue_drops_without_blocking() {
        let f = fixture(RelayConfig::default(), 1, 16);
        let summary = f
            .router
            .route(["SUM.a 1 1", "SUM.a 2 1", "SUM.a 3 1"], Source::Net);

        assert_eq!(summary.aggregated, 1);
        assert_eq!(summary.overflowed, 2);
        assert_eq!(f.stats.aggregation_overflow(), 2);
        for (_, client) in f.stats.clients() {
            assert_eq!(client.snapshot().dropped, 0);
        }
    }

    #[test]
    fn full_dispatch_queue_counts_one_drop_per_backend() {
        let config = RelayConfig {
            backends: vec![
                Backend::new("localhost:2003"),
                Backend::new("localhost:2004"),
            ],
            ..Default::default()
        };
        let f = fixture(config, 16, 1);
        f.router.route(["a 1 1", "b 1 1", "c 1 1"], Source::Net);

        for (_, client) in f.stats.clients() {
            assert_eq!(client.snapshot().dropped, 2);
        }
    }

    #[test]
    fn rewrites_before_routing() {
        let config = RelayConfig {
            rewrites: parse_rewrite_rules(r"^legacy\.(\S+) => SUM.$1").unwrap(),
            aggregation: vec![AggregationRule::new("SUM.", AggregationKind::Sum)],
            ..Default::default()
        };
        let mut f = fixture(config, 16, 16);
        f.router.route(["legacy.hits 1 100"], Source::Net);

        assert_eq!(f.aggregation_rx.drain_snapshot(), vec!["SUM.hits 1 100"]);
    }

    #[test]
    fn rewrite_producing_bad_line_is_invalid() {
        let config = RelayConfig {
            rewrites: parse_rewrite_rules(r"^bad\. => broken name ").unwrap(),
            ..Default::default()
        };
        let f = fixture(config, 16, 16);
        let summary = f.router.route(["bad.x 1 100"], Source::Net);

        assert_eq!(summary.invalid, 1);
        assert_eq!(f.stats.server().snapshot().invalid, 1);
    }
}
