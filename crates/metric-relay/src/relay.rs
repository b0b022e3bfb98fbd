// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Startup and shutdown wiring.
//!
//! [`Relay::start`] builds the shared counters, queues and workers from one configuration
//! snapshot. Shutdown walks the pipeline front to back: each stage is cancelled only once
//! every task of the stage before it has exited, so lines in flight are aggregated,
//! delivered or spilled to disk rather than lost.

use crate::aggregator_service::AggregatorService;
use crate::config::RelayConfig;
use crate::dispatch::Dispatch;
use crate::errors::RelayError;
use crate::flusher::BackendSender;
use crate::listener::Listener;
use crate::monitoring::Monitoring;
use crate::queue::bounded;
use crate::router::Router;
use crate::spool::SpoolReader;
use crate::stats::Stats;
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// A group of tasks stopped together.
#[derive(Debug, Default)]
struct Stage {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Stage {
    fn spawn<F>(&mut self, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.tasks.push(tokio::spawn(task));
    }

    async fn stop(self, name: &str) -> Result<(), RelayError> {
        self.token.cancel();
        let mut result = Ok(());
        for task in self.tasks {
            if let Err(e) = task.await {
                if result.is_ok() {
                    result = Err(join_error(&e));
                }
            }
        }
        debug!("Stopped {name} stage");
        result
    }
}

#[derive(Debug)]
pub struct Relay {
    config: RelayConfig,
}

impl Relay {
    #[must_use]
    pub fn new(config: RelayConfig) -> Self {
        Self { config }
    }

    /// Validates the configuration, binds the listener and spawns every worker.
    pub async fn start(self) -> Result<RelayHandle, RelayError> {
        let config = self.config;
        config.validate()?;
        require_dir(&config.retry_dir).await?;
        if let Some(metric_dir) = &config.metric_dir {
            require_dir(metric_dir).await?;
        }

        let listener = Listener::bind(&config.bind).await?;
        let local_addr = listener.local_addr();

        let stats = Arc::new(Stats::new(&config.backends));
        let (dispatch, receivers) = Dispatch::new(
            &config.backends,
            config.backend_queue_capacity(),
            config.monitoring_queue_capacity(),
            Arc::clone(&stats),
        );
        let dispatch = Arc::new(dispatch);
        let (aggregation_tx, aggregation_rx) = bounded(config.aggregation_queue_capacity());
        let router = Arc::new(Router::new(
            &config,
            aggregation_tx,
            Arc::clone(&dispatch),
            Arc::clone(&stats),
        ));

        let mut delivery = Stage::default();
        for (backend, queues) in receivers {
            let sender = BackendSender::new(backend, queues, &config, Arc::clone(&stats));
            let token = delivery.token.clone();
            delivery.spawn(sender.run(token));
        }

        let mut monitoring = Stage::default();
        let reporter = Monitoring::new(
            config.monitoring_prefix.clone(),
            Arc::clone(&stats),
            Arc::clone(&dispatch),
            config.monitoring_interval,
        );
        let token = monitoring.token.clone();
        monitoring.spawn(reporter.run(token));

        let mut aggregation = Stage::default();
        let aggregator = AggregatorService::new(
            config.aggregation.clone(),
            aggregation_rx,
            Arc::clone(&dispatch),
            config.sum_interval,
        );
        let token = aggregation.token.clone();
        aggregation.spawn(aggregator.run(token));

        let mut ingestion = Stage::default();
        if let Some(metric_dir) = &config.metric_dir {
            let reader = SpoolReader::new(metric_dir, Arc::clone(&router), config.send_interval);
            let token = ingestion.token.clone();
            ingestion.spawn(reader.run(token));
        }
        let listener = tokio::spawn(listener.run(
            router,
            config.max_metrics,
            ingestion.token.clone(),
        ));

        info!(
            "Relaying metrics from {local_addr} to {} backend(s)",
            config.backends.len()
        );

        Ok(RelayHandle {
            local_addr,
            stats,
            listener: Some(listener),
            ingestion,
            aggregation,
            monitoring,
            delivery,
        })
    }
}

/// Running relay.
#[derive(Debug)]
pub struct RelayHandle {
    local_addr: SocketAddr,
    stats: Arc<Stats>,
    listener: Option<JoinHandle<Result<(), RelayError>>>,
    ingestion: Stage,
    aggregation: Stage,
    monitoring: Stage,
    delivery: Stage,
}

impl RelayHandle {
    /// Address the listener is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    #[must_use]
    pub fn stats(&self) -> Arc<Stats> {
        Arc::clone(&self.stats)
    }

    /// Resolves when the listener stops on its own, which only happens on a fatal accept
    /// error. Safe to drop before completion.
    pub async fn listener_exited(&mut self) -> Result<(), RelayError> {
        let Some(listener) = self.listener.as_mut() else {
            return Ok(());
        };
        let result = listener.await;
        self.listener = None;
        result.map_err(|e| join_error(&e))?
    }

    /// Drains the pipeline and waits for every worker to exit. Every stage is stopped even
    /// when an earlier one failed; the first failure is returned.
    pub async fn shutdown(mut self) -> Result<(), RelayError> {
        info!("Shutting down, draining queues");

        self.ingestion.token.cancel();
        let mut result = match self.listener.take() {
            Some(listener) => listener.await.map_err(|e| join_error(&e)).and_then(|r| r),
            None => Ok(()),
        };
        let stages = [
            (self.ingestion, "ingestion"),
            (self.aggregation, "aggregation"),
            (self.monitoring, "monitoring"),
            (self.delivery, "delivery"),
        ];
        for (stage, name) in stages {
            let stopped = stage.stop(name).await;
            if result.is_ok() {
                result = stopped;
            }
        }

        match &result {
            Ok(()) => info!("Shutdown complete"),
            Err(e) => error!("Shutdown completed with an error: {e}"),
        }
        result
    }
}

async fn require_dir(path: &Path) -> Result<(), RelayError> {
    let directory_error = |source| RelayError::Directory {
        path: path.to_path_buf(),
        source,
    };
    let metadata = tokio::fs::metadata(path).await.map_err(directory_error)?;
    if !metadata.is_dir() {
        return Err(directory_error(io::Error::other("not a directory")));
    }
    Ok(())
}

fn join_error(e: &JoinError) -> RelayError {
    RelayError::Runtime(e.to_string())
}
