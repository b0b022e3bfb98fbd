// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Why a metric line was rejected.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("expected 3 fields, got {0}")]
    FieldCount(usize),
    #[error("invalid value: {0}")]
    InvalidValue(String),
    #[error("value is not finite: {0}")]
    NonFiniteValue(String),
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("no aggregation prefix on {0}")]
    NotAggregated(String),
}

/// Failure to deliver a batch to a backend.
#[derive(Debug, thiserror::Error)]
pub enum ShippingError {
    #[error("unable to connect to {backend}: {source}")]
    Connect {
        backend: String,
        #[source]
        source: std::io::Error,
    },
    #[error("connecting to {backend} timed out after {timeout:?}")]
    ConnectTimeout { backend: String, timeout: Duration },
    #[error("unable to write to {backend}: {source}")]
    Write {
        backend: String,
        #[source]
        source: std::io::Error,
    },
    #[error("writing to {backend} timed out after {timeout:?}")]
    WriteTimeout { backend: String, timeout: Duration },
}

/// Retry spool I/O failure.
#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    #[error("unable to read retry file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to append to retry file {path}: {source}")]
    Append {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to remove retry file {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Infrastructural failures. These stop the relay.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to accept connection on {addr}: {source}")]
    Accept {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Directory {path} is not accessible: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Relay task failed: {0}")]
    Runtime(String),
}
