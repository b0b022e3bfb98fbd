// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Backend sender: one per backend, owning its queues, connection and retry file.
//!
//! Each cycle first replays the retry file, then sends what was queued. Any failure spills
//! the pending batch to the retry file and ends the cycle, so nothing is sent out of order
//! ahead of older spilled lines.

use crate::config::{Backend, RelayConfig};
use crate::constants::WRITE_CHUNK_SIZE;
use crate::dispatch::BackendReceivers;
use crate::errors::ShippingError;
use crate::retry::RetrySpool;
use crate::stats::{add, ClientStat, Stats};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Counter deltas produced by one cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleOutcome {
    pub sent: usize,
    pub saved: usize,
    pub dropped: usize,
}

pub struct BackendSender {
    backend: Backend,
    receivers: BackendReceivers,
    spool: RetrySpool,
    connection: Option<TcpStream>,
    stats: Arc<Stats>,
    connect_timeout: Duration,
    write_timeout: Duration,
    send_interval: Duration,
}

impl BackendSender {
    #[must_use]
    pub fn new(
        backend: Backend,
        receivers: BackendReceivers,
        config: &RelayConfig,
        stats: Arc<Stats>,
    ) -> Self {
        BackendSender {
            spool: RetrySpool::new(&config.retry_dir, &backend),
            backend,
            receivers,
            connection: None,
            stats,
            connect_timeout: config.connect_timeout,
            write_timeout: config.write_timeout,
            send_interval: config.send_interval,
        }
    }

    #[must_use]
    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    #[must_use]
    pub fn spool(&self) -> &RetrySpool {
        &self.spool
    }

    /// Runs one send cycle: retry file first, then the queued lines.
    pub async fn cycle(&mut self) -> CycleOutcome {
        let mut pending = self.receivers.monitoring.drain_snapshot();
        pending.extend(self.receivers.live.drain_snapshot());
        let mut outcome = CycleOutcome::default();

        if self.spool.exists().await {
            match self.spool.read().await {
                Ok(retried) if !retried.is_empty() => {
                    if let Err(e) = self.send(&retried).await {
                        warn!(
                            "Backend {} still unavailable, keeping {} lines in {}: {e}",
                            self.backend,
                            retried.len(),
                            self.spool.path().display()
                        );
                        self.spill(pending, &mut outcome).await;
                        return self.record(outcome);
                    }
                    outcome.sent += retried.len();
                    debug!("Resent {} lines to {}", retried.len(), self.backend);
                    if let Err(e) = self.spool.remove().await {
                        error!("{e}");
                        self.spill(pending, &mut outcome).await;
                        return self.record(outcome);
                    }
                }
                Ok(_) => {
                    if let Err(e) = self.spool.remove().await {
                        error!("{e}");
                    }
                }
                Err(e) => {
                    error!("{e}");
                    self.spill(pending, &mut outcome).await;
                    return self.record(outcome);
                }
            }
        }

        if pending.is_empty() {
            return self.record(outcome);
        }
        match self.send(&pending).await {
            Ok(()) => {
                outcome.sent += pending.len();
                debug!("Sent {} lines to {}", pending.len(), self.backend);
            }
            Err(e) => {
                warn!("Failed to send to {}: {e}", self.backend);
                self.spill(pending, &mut outcome).await;
            }
        }
        self.record(outcome)
    }

    async fn spill(&self, lines: Vec<String>, outcome: &mut CycleOutcome) {
        if lines.is_empty() {
            return;
        }
        match self.spool.append(&lines).await {
            Ok(()) => {
                debug!(
                    "Saved {} lines for {} to {}",
                    lines.len(),
                    self.backend,
                    self.spool.path().display()
                );
                outcome.saved += lines.len();
            }
            Err(e) => {
                error!("Dropping {} lines for {}: {e}", lines.len(), self.backend);
                outcome.dropped += lines.len();
            }
        }
    }

    fn record(&self, outcome: CycleOutcome) -> CycleOutcome {
        if let Some(stat) = self.client_stat() {
            add(&stat.sent, outcome.sent);
            add(&stat.saved, outcome.saved);
            add(&stat.dropped, outcome.dropped);
        }
        outcome
    }

    fn client_stat(&self) -> Option<&ClientStat> {
        self.stats.client(&self.backend)
    }

    /// Writes a batch over the persistent connection, connecting first if needed. The write
    /// deadline applies per chunk, so large backlogs drain as long as the backend keeps
    /// reading. Any failure closes the connection so the next cycle reconnects.
    async fn send(&mut self, lines: &[String]) -> Result<(), ShippingError> {
        let mut payload = String::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
        for line in lines {
            payload.push_str(line);
            payload.push('\n');
        }

        let mut stream = match self.connection.take() {
            Some(stream) => stream,
            None => self.connect().await?,
        };

        for chunk in payload.as_bytes().chunks(WRITE_CHUNK_SIZE) {
            self.write_chunk(&mut stream, chunk).await?;
        }
        self.connection = Some(stream);
        Ok(())
    }

    async fn write_chunk(
        &self,
        stream: &mut TcpStream,
        chunk: &[u8],
    ) -> Result<(), ShippingError> {
        let write = async {
            stream.write_all(chunk).await?;
            stream.flush().await
        };
        match timeout(self.write_timeout, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(ShippingError::Write {
                backend: self.backend.to_string(),
                source,
            }),
            Err(_) => Err(ShippingError::WriteTimeout {
                backend: self.backend.to_string(),
                timeout: self.write_timeout,
            }),
        }
    }

    async fn connect(&self) -> Result<TcpStream, ShippingError> {
        match timeout(
            self.connect_timeout,
            TcpStream::connect(self.backend.address()),
        )
        .await
        {
            Ok(Ok(stream)) => {
                debug!("Connected to {}", self.backend);
                Ok(stream)
            }
            Ok(Err(source)) => Err(ShippingError::Connect {
                backend: self.backend.to_string(),
                source,
            }),
            Err(_) => Err(ShippingError::ConnectTimeout {
                backend: self.backend.to_string(),
                timeout: self.connect_timeout,
            }),
        }
    }

    /// Cycles every send interval. After cancellation one last cycle delivers or spills
    /// whatever is still queued.
    pub async fn run(mut self, cancel_token: CancellationToken) {
        debug!("Sender for {} started", self.backend);

        let mut ticker = interval(self.send_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // discard first tick, which is instantaneous

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.cycle().await;
                }
                _ = cancel_token.cancelled() => {
                    self.cycle().await;
                    break;
                }
            }
        }

        debug!("Sender for {} stopped", self.backend);
    }
}
