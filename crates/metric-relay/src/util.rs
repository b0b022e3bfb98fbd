// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Utility functions for relay naming.

/// Parses and validates a dotted metric name prefix, such as the monitoring prefix.
///
/// A valid prefix must:
/// - Start with an ASCII letter
/// - Contain only ASCII alphanumerics, underscores, dashes, or periods
/// - Not be empty or contain only whitespace
///
/// Whitespace is automatically trimmed from the input.
///
/// # Examples
///
/// ```
/// use metric_relay::util::parse_metric_prefix;
///
/// assert_eq!(parse_metric_prefix("relay"), Some("relay".to_string()));
/// assert_eq!(parse_metric_prefix("my_relay.host-1"), Some("my_relay.host-1".to_string()));
/// assert_eq!(parse_metric_prefix("1invalid"), None);
/// assert_eq!(parse_metric_prefix("my relay"), None);
/// ```
pub fn parse_metric_prefix(prefix: &str) -> Option<String> {
    let trimmed = prefix.trim();
    let mut chars = trimmed.chars();

    match chars.next() {
        Some(first_char) if first_char.is_ascii_alphabetic() => {}
        Some(_) => {
            tracing::error!(
                "Metric prefix must start with a letter, got: '{}'. Ignoring prefix.",
                trimmed
            );
            return None;
        }
        None => return None,
    }

    if let Some(invalid_char) =
        chars.find(|&ch| !ch.is_ascii_alphanumeric() && !matches!(ch, '_' | '-' | '.'))
    {
        tracing::error!(
            "Metric prefix contains invalid character '{}' in '{}'. Ignoring prefix.",
            invalid_char,
            trimmed
        );
        return None;
    }

    Some(trimmed.to_string())
}

/// Turns a backend address into a string that is safe as a file name and as a
/// metric path segment. `localhost:2003` becomes `localhost_2003`.
#[must_use]
pub fn slug(address: &str) -> String {
    address
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}
