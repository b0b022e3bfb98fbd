// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, process};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use metric_relay::{
    config::RelayConfig,
    constants::DEFAULT_LOG_LEVEL,
    relay::{Relay, RelayHandle},
};

#[tokio::main]
pub async fn main() {
    let log_level = env::var("RELAY_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or(DEFAULT_LOG_LEVEL.to_string());

    let env_filter = EnvFilter::try_new(&log_level).unwrap_or_else(|_| {
        eprintln!("Invalid RELAY_LOG_LEVEL '{log_level}', using {DEFAULT_LOG_LEVEL}");
        EnvFilter::new(DEFAULT_LOG_LEVEL)
    });

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Setting default subscriber failed: {e}");
        process::exit(1);
    }

    debug!("Logging subsystem enabled");

    let config = match RelayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            process::exit(1);
        }
    };

    let mut handle = match Relay::new(config).start().await {
        Ok(handle) => handle,
        Err(e) => {
            error!("Unable to start metric relay: {e}");
            process::exit(1);
        }
    };
    info!("metric relay listening on {}", handle.local_addr());

    let listener_stopped = tokio::select! {
        result = handle.listener_exited() => Some(result),
        _ = shutdown_signal() => None,
    };

    match listener_stopped {
        Some(result) => {
            match result {
                Ok(()) => error!("Listener stopped unexpectedly"),
                Err(e) => error!("Listener stopped unexpectedly: {e}"),
            }
            drain(handle).await;
            process::exit(1);
        }
        None => {
            info!("Shutdown signal received");
            if !drain(handle).await {
                process::exit(1);
            }
        }
    }
}

/// Returns false if any worker failed while draining.
async fn drain(handle: RelayHandle) -> bool {
    match handle.shutdown().await {
        Ok(()) => true,
        Err(e) => {
            error!("Error during shutdown: {e}");
            false
        }
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                error!("Unable to listen for SIGTERM: {e}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
