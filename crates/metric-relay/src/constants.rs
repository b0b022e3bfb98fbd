// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Counters in [`crate::stats::ServerStat`]: net, dir, invalid.
pub const SERVER_STAT_FIELDS: usize = 3;

/// Counters in [`crate::stats::ClientStat`]: saved, sent, dropped, aggregated.
pub const CLIENT_STAT_FIELDS: usize = 4;

/// Bytes written to a backend under one write deadline.
pub const WRITE_CHUNK_SIZE: usize = 64 * 1024;

/// Fractional digits of an aggregated value.
pub const AGGREGATED_VALUE_PRECISION: usize = 2;

pub const DEFAULT_BIND: &str = "127.0.0.1:3002";
pub const DEFAULT_BACKEND: &str = "127.0.0.1:2003";
pub const DEFAULT_RETRY_DIR: &str = "/var/lib/metric-relay/retry";
pub const DEFAULT_SUM_PREFIX: &str = "SUM.";
pub const DEFAULT_AVG_PREFIX: &str = "AVG.";
pub const DEFAULT_MIN_PREFIX: &str = "MIN.";
pub const DEFAULT_MAX_PREFIX: &str = "MAX.";
pub const DEFAULT_MONITORING_PREFIX: &str = "metric_relay";
pub const DEFAULT_MAX_METRICS: usize = 10_000;
pub const DEFAULT_SUM_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_SEND_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_MONITORING_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_WRITE_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_LOG_LEVEL: &str = "info";
