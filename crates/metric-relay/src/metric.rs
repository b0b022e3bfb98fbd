// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Plaintext metric line: `name value timestamp`.

use crate::errors::ParseError;
use std::fmt;

/// One observation.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub name: String,
    pub value: f64,
    pub timestamp: i64,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.name, self.value, self.timestamp)
    }
}

/// Parses a single metric line.
///
/// A valid line has exactly three whitespace separated fields: a name, a finite
/// floating point value and an integer timestamp. Surrounding whitespace and the
/// line terminator are ignored.
pub fn parse(line: &str) -> Result<Metric, ParseError> {
    let mut fields = line.split_whitespace();
    let (Some(name), Some(value), Some(timestamp), None) =
        (fields.next(), fields.next(), fields.next(), fields.next())
    else {
        return Err(ParseError::FieldCount(line.split_whitespace().count()));
    };

    let value = parse_value(value)?;
    let timestamp = timestamp
        .parse::<i64>()
        .map_err(|_| ParseError::InvalidTimestamp(timestamp.to_string()))?;

    Ok(Metric {
        name: name.to_string(),
        value,
        timestamp,
    })
}

pub(crate) fn parse_value(value: &str) -> Result<f64, ParseError> {
    let parsed = value
        .parse::<f64>()
        .map_err(|_| ParseError::InvalidValue(value.to_string()))?;
    if !parsed.is_finite() {
        return Err(ParseError::NonFiniteValue(value.to_string()));
    }
    Ok(parsed)
}

#[must_use]
pub fn is_valid(line: &str) -> bool {
    parse(line).is_ok()
}
