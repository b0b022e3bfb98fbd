// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Relay counters.
//!
//! The backend map is built once from the configured backends and never resized, so every
//! update is a single atomic operation on an existing field.

use crate::config::Backend;
use crate::constants::{CLIENT_STAT_FIELDS, SERVER_STAT_FIELDS};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process wide ingestion counters.
#[derive(Debug, Default)]
pub struct ServerStat {
    /// Lines accepted from TCP connections.
    pub net: AtomicU64,
    /// Lines accepted from the spool directory.
    pub dir: AtomicU64,
    /// Lines rejected by validation.
    pub invalid: AtomicU64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ServerSnapshot {
    pub net: u64,
    pub dir: u64,
    pub invalid: u64,
}

impl ServerSnapshot {
    #[must_use]
    pub fn fields(&self) -> [(&'static str, u64); SERVER_STAT_FIELDS] {
        [
            ("net", self.net),
            ("dir", self.dir),
            ("invalid", self.invalid),
        ]
    }
}

impl ServerStat {
    #[must_use]
    pub fn snapshot(&self) -> ServerSnapshot {
        ServerSnapshot {
            net: self.net.load(Ordering::Relaxed),
            dir: self.dir.load(Ordering::Relaxed),
            invalid: self.invalid.load(Ordering::Relaxed),
        }
    }

    /// Reads and zeroes every counter. Increments racing with the call land in either
    /// this snapshot or the next one.
    pub fn take(&self) -> ServerSnapshot {
        ServerSnapshot {
            net: self.net.swap(0, Ordering::Relaxed),
            dir: self.dir.swap(0, Ordering::Relaxed),
            invalid: self.invalid.swap(0, Ordering::Relaxed),
        }
    }

    pub fn clean(&self) {
        self.net.store(0, Ordering::Relaxed);
        self.dir.store(0, Ordering::Relaxed);
        self.invalid.store(0, Ordering::Relaxed);
    }
}

/// Per backend delivery counters.
#[derive(Debug, Default)]
pub struct ClientStat {
    /// Lines written to the retry file.
    pub saved: AtomicU64,
    /// Lines written to the backend, including replayed retry lines.
    pub sent: AtomicU64,
    /// Lines lost: queue overflow or a retry file that could not be written.
    pub dropped: AtomicU64,
    /// Aggregated lines accepted by this backend's queue.
    pub aggregated: AtomicU64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ClientSnapshot {
    pub saved: u64,
    pub sent: u64,
    pub dropped: u64,
    pub aggregated: u64,
}

impl ClientSnapshot {
    #[must_use]
    pub fn fields(&self) -> [(&'static str, u64); CLIENT_STAT_FIELDS] {
        [
            ("saved", self.saved),
            ("sent", self.sent),
            ("dropped", self.dropped),
            ("aggregated", self.aggregated),
        ]
    }
}

impl ClientStat {
    #[must_use]
    pub fn snapshot(&self) -> ClientSnapshot {
        ClientSnapshot {
            saved: self.saved.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            aggregated: self.aggregated.load(Ordering::Relaxed),
        }
    }

    pub fn take(&self) -> ClientSnapshot {
        ClientSnapshot {
            saved: self.saved.swap(0, Ordering::Relaxed),
            sent: self.sent.swap(0, Ordering::Relaxed),
            dropped: self.dropped.swap(0, Ordering::Relaxed),
            aggregated: self.aggregated.swap(0, Ordering::Relaxed),
        }
    }

    pub fn clean(&self) {
        self.saved.store(0, Ordering::Relaxed);
        self.sent.store(0, Ordering::Relaxed);
        self.dropped.store(0, Ordering::Relaxed);
        self.aggregated.store(0, Ordering::Relaxed);
    }
}

pub(crate) fn add(counter: &AtomicU64, amount: usize) {
    counter.fetch_add(amount as u64, Ordering::Relaxed);
}

/// All relay counters.
#[derive(Debug, Default)]
pub struct Stats {
    server: ServerStat,
    clients: BTreeMap<Backend, ClientStat>,
    aggregation_overflow: AtomicU64,
}

impl Stats {
    #[must_use]
    pub fn new(backends: &[Backend]) -> Self {
        Self {
            server: ServerStat::default(),
            clients: backends
                .iter()
                .map(|backend| (backend.clone(), ClientStat::default()))
                .collect(),
            aggregation_overflow: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn server(&self) -> &ServerStat {
        &self.server
    }

    #[must_use]
    pub fn client(&self, backend: &Backend) -> Option<&ClientStat> {
        self.clients.get(backend)
    }

    pub fn clients(&self) -> impl Iterator<Item = (&Backend, &ClientStat)> {
        self.clients.iter()
    }

    #[must_use]
    pub fn backend_count(&self) -> usize {
        self.clients.len()
    }

    pub fn record_aggregation_overflow(&self) {
        self.aggregation_overflow.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn aggregation_overflow(&self) -> u64 {
        self.aggregation_overflow.load(Ordering::Relaxed)
    }

    pub fn take_aggregation_overflow(&self) -> u64 {
        self.aggregation_overflow.swap(0, Ordering::Relaxed)
    }

    /// Zeroes every counter. The set of backends is kept.
    pub fn clean(&self) {
        self.server.clean();
        for client in self.clients.values() {
            client.clean();
        }
        self.aggregation_overflow.store(0, Ordering::Relaxed);
    }
}

/// Number of lines one monitoring interval produces, which is also the capacity of each
/// backend's monitoring queue.
#[must_use]
pub fn monitoring_capacity(backend_count: usize) -> usize {
    SERVER_STAT_FIELDS + backend_count * CLIENT_STAT_FIELDS
}
