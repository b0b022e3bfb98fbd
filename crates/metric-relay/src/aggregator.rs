// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Windowed aggregation of prefixed lines.
//!
//! Within one window every `(kind, name)` pair owns an [`Accumulator`]. Flushing turns each
//! accumulator into a single line and starts an empty window.

use crate::config::{AggregationKind, AggregationRule};
use crate::constants::AGGREGATED_VALUE_PRECISION;
use crate::errors::ParseError;
use crate::metric::parse;
use hashbrown::HashMap;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct Accumulator {
    /// Name with the aggregation prefix stripped
    pub name: String,
    pub kind: AggregationKind,
    pub amount: u64,
    /// Running sum of values
    pub value: f64,
    pub min: f64,
    pub max: f64,
    /// Running sum of timestamps
    pub timestamp: i128,
}

impl Accumulator {
    fn new(name: String, kind: AggregationKind, value: f64, timestamp: i64) -> Self {
        Self {
            name,
            kind,
            amount: 1,
            value,
            min: value,
            max: value,
            timestamp: i128::from(timestamp),
        }
    }

    fn add(&mut self, value: f64, timestamp: i64) {
        self.amount += 1;
        self.value += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.timestamp += i128::from(timestamp);
    }

    #[must_use]
    pub fn reported_value(&self) -> f64 {
        match self.kind {
            AggregationKind::Sum => self.value,
            AggregationKind::Avg => self.value / self.amount as f64,
            AggregationKind::Min => self.min,
            AggregationKind::Max => self.max,
        }
    }

    /// Mean timestamp, truncated.
    #[must_use]
    pub fn reported_timestamp(&self) -> i64 {
        let mean = self.timestamp / i128::from(self.amount.max(1));
        // the mean of i64 values always fits in an i64
        i64::try_from(mean).unwrap_or_default()
    }

    /// Fails when the aggregated value overflowed to a non finite float.
    pub fn to_line(&self) -> Result<String, ParseError> {
        let value = self.reported_value();
        if !value.is_finite() {
            return Err(ParseError::NonFiniteValue(format!(
                "{} {value}",
                self.name
            )));
        }
        Ok(format!(
            "{} {:.prec$} {}",
            self.name,
            value,
            self.reported_timestamp(),
            prec = AGGREGATED_VALUE_PRECISION
        ))
    }
}

#[derive(Debug)]
pub struct Aggregator {
    rules: Vec<AggregationRule>,
    accumulators: HashMap<(AggregationKind, String), Accumulator>,
}

impl Aggregator {
    #[must_use]
    pub fn new(rules: Vec<AggregationRule>) -> Self {
        Self {
            rules,
            accumulators: HashMap::new(),
        }
    }

    /// Adds one prefixed line to the current window.
    pub fn insert(&mut self, line: &str) -> Result<(), ParseError> {
        let line = line.trim();
        let (kind, stripped) = self
            .rules
            .iter()
            .find_map(|rule| {
                line.strip_prefix(rule.prefix.as_str())
                    .map(|stripped| (rule.kind, stripped))
            })
            .ok_or_else(|| ParseError::NotAggregated(line.to_string()))?;
        let metric = parse(stripped)?;

        if let Some(accumulator) = self.accumulators.get_mut(&(kind, metric.name.clone())) {
            accumulator.add(metric.value, metric.timestamp);
            return Ok(());
        }
        if let Some(other) = AggregationKind::ALL.into_iter().find(|other| {
            *other != kind && self.accumulators.contains_key(&(*other, metric.name.clone()))
        }) {
            debug!(
                "{} is aggregated as both {other} and {kind}, both lines will share its name",
                metric.name
            );
        }
        self.accumulators.insert(
            (kind, metric.name.clone()),
            Accumulator::new(metric.name, kind, metric.value, metric.timestamp),
        );
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.accumulators.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.accumulators.is_empty()
    }

    /// Ends the window: one line per accumulator, ordered by name. Groups whose value
    /// overflowed come back as errors.
    pub fn flush(&mut self) -> Vec<Result<String, ParseError>> {
        let mut accumulators: Vec<Accumulator> =
            self.accumulators.drain().map(|(_, acc)| acc).collect();
        accumulators.sort_by(|a, b| a.name.cmp(&b.name).then(a.kind.cmp(&b.kind)));
        accumulators.iter().map(Accumulator::to_line).collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::metric::is_valid;
    use tracing_test::traced_test;

    fn lines(aggregator: &mut Aggregator) -> Vec<String> {
        aggregator.flush().into_iter().map(Result::unwrap).collect()
    }

    fn aggregator() -> Aggregator {
        Aggregator::new(vec![
            AggregationRule::new("SUM.", AggregationKind::Sum),
            AggregationRule::new("AVG.", AggregationKind::Avg),
            AggregationRule::new("MIN.", AggregationKind::Min),
            AggregationRule::new("MAX.", AggregationKind::Max),
        ])
    }

    #[test]
    fn average_of_two_timestamps() {
        let (n, m) = (3, 5);
        let mut aggregator = aggregator();
        for _ in 0..n {
            aggregator.insert("AVG.a 1 100").unwrap();
        }
        for _ in 0..m {
            aggregator.insert("AVG.a 1 200").unwrap();
        }

        // (100 * 3 + 200 * 5) / 8 = 162.5, truncated
        assert_eq!(lines(&mut aggregator), vec!["a 1.00 162"]);
        assert!(aggregator.is_empty());
    }

    #[test]
    fn sum_is_not_divided() {
        let mut aggregator = aggregator();
        aggregator.insert("SUM.requests 1.5 100").unwrap();
        aggregator.insert("SUM.requests 2 200").unwrap();
        aggregator.insert("SUM.requests 3 300").unwrap();

        assert_eq!(lines(&mut aggregator), vec!["requests 6.50 200"]);
    }

    #[test]
    fn min_and_max() {
        let mut aggregator = aggregator();
        for line in ["MIN.t 5 10", "MIN.t -2 20", "MAX.t 5 10", "MAX.t 7.126 20"] {
            aggregator.insert(line).unwrap();
        }

        assert_eq!(lines(&mut aggregator), vec!["t -2.00 15", "t 7.13 15"]);
    }

    #[test]
    fn groups_by_name() {
        let mut aggregator = aggregator();
        aggregator.insert("SUM.b 1 100").unwrap();
        aggregator.insert("SUM.a 1 100").unwrap();
        aggregator.insert("SUM.b 1 100").unwrap();
        assert_eq!(aggregator.len(), 2);

        assert_eq!(lines(&mut aggregator), vec!["a 1.00 100", "b 2.00 100"]);
    }

    #[test]
    fn only_the_leading_prefix_is_stripped() {
        let mut aggregator = aggregator();
        aggregator.insert("SUM.x.SUM.y 1 100").unwrap();
        assert_eq!(lines(&mut aggregator), vec!["x.SUM.y 1.00 100"]);
    }

    #[test]
    fn malformed_lines_are_rejected() {
        let mut aggregator = aggregator();
        assert_eq!(
            aggregator.insert("SUM.a x 100"),
            Err(ParseError::InvalidValue("x".to_string()))
        );
        assert_eq!(
            aggregator.insert("SUM.a 1 x"),
            Err(ParseError::InvalidTimestamp("x".to_string()))
        );
        assert!(matches!(
            aggregator.insert("plain 1 100"),
            Err(ParseError::NotAggregated(_))
        ));
        assert!(aggregator.is_empty());
    }

    #[test]
    fn window_restarts_after_flush() {
        let mut aggregator = aggregator();
        aggregator.insert("SUM.a 1 100").unwrap();
        aggregator.flush();
        aggregator.insert("SUM.a 5 300").unwrap();
        assert_eq!(lines(&mut aggregator), vec!["a 5.00 300"]);
    }

    #[test]
    fn overflowing_sum_is_not_emitted() {
        let mut aggregator = aggregator();
        aggregator.insert("SUM.a 1e308 100").unwrap();
        aggregator.insert("SUM.a 1e308 100").unwrap();
        aggregator.insert("SUM.b 1 100").unwrap();

        let flushed = aggregator.flush();

        assert!(matches!(flushed[0], Err(ParseError::NonFiniteValue(_))));
        assert_eq!(flushed[1], Ok("b 1.00 100".to_string()));
        assert!(is_valid(flushed[1].as_ref().unwrap()));
    }

    #[test]
    #[traced_test]
    fn same_name_under_two_kinds_is_logged() {
        let mut aggregator = aggregator();
        aggregator.insert("SUM.a 1 100").unwrap();
        aggregator.insert("AVG.a 3 100").unwrap();

        assert!(logs_contain("a is aggregated as both sum and avg"));
        assert_eq!(lines(&mut aggregator), vec!["a 1.00 100", "a 3.00 100"]);
    }
}
