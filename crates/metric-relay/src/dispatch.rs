// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per backend fan-out.
//!
//! Every line is copied into every backend's queue independently. A full queue only costs
//! that backend its copy and only bumps that backend's `dropped` counter.

use crate::config::Backend;
use crate::queue::{bounded, QueueReceiver, QueueSender, Rejected};
use crate::stats::{add, Stats};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Debug)]
struct BackendQueues {
    live: QueueSender,
    monitoring: QueueSender,
}

/// Consumer ends of one backend's queues, owned by its sender.
#[derive(Debug)]
pub struct BackendReceivers {
    pub live: QueueReceiver,
    pub monitoring: QueueReceiver,
}

#[derive(Debug)]
pub struct Dispatch {
    queues: BTreeMap<Backend, BackendQueues>,
    stats: Arc<Stats>,
}

impl Dispatch {
    /// Builds one live queue and one monitoring queue per backend.
    pub fn new(
        backends: &[Backend],
        live_capacity: usize,
        monitoring_capacity: usize,
        stats: Arc<Stats>,
    ) -> (Self, Vec<(Backend, BackendReceivers)>) {
        let mut queues = BTreeMap::new();
        let mut receivers = Vec::with_capacity(backends.len());
        for backend in backends {
            let (live_tx, live_rx) = bounded(live_capacity);
            let (monitoring_tx, monitoring_rx) = bounded(monitoring_capacity);
            queues.insert(
                backend.clone(),
                BackendQueues {
                    live: live_tx,
                    monitoring: monitoring_tx,
                },
            );
            receivers.push((
                backend.clone(),
                BackendReceivers {
                    live: live_rx,
                    monitoring: monitoring_rx,
                },
            ));
        }
        (Self { queues, stats }, receivers)
    }

    pub fn backends(&self) -> impl Iterator<Item = &Backend> {
        self.queues.keys()
    }

    /// Copies a line into every backend's live queue without waiting. Returns how many
    /// backends accepted it.
    pub fn dispatch(&self, line: &str) -> usize {
        self.fan_out(line, false)
    }

    /// Like [`Dispatch::dispatch`], and counts the line as aggregated for every backend
    /// that accepted it.
    pub fn dispatch_aggregated(&self, line: &str) -> usize {
        self.fan_out(line, true)
    }

    fn fan_out(&self, line: &str, aggregated: bool) -> usize {
        let mut accepted = 0;
        for (backend, queues) in &self.queues {
            let stat = self.stats.client(backend);
            match queues.live.offer(line.to_string()) {
                Ok(()) => {
                    accepted += 1;
                    if aggregated {
                        if let Some(stat) = stat {
                            add(&stat.aggregated, 1);
                        }
                    }
                }
                Err(rejected) => {
                    if let Some(stat) = stat {
                        add(&stat.dropped, 1);
                    }
                    match rejected {
                        Rejected::Full(line) => trace!("Queue for {backend} is full, dropping {line}"),
                        Rejected::Closed(line) => {
                            debug!("Sender for {backend} is gone, dropping {line}")
                        }
                    }
                }
            }
        }
        accepted
    }

    /// Delivers a self monitoring line to every backend, waiting for room instead of
    /// dropping. The monitoring queues are sized to hold one full interval.
    pub async fn dispatch_monitoring(&self, line: &str) {
        for (backend, queues) in &self.queues {
            if let Err(Rejected::Closed(line) | Rejected::Full(line)) =
                queues.monitoring.send(line.to_string()).await
            {
                debug!("Sender for {backend} is gone, discarding monitoring line {line}");
            }
        }
    }
}
