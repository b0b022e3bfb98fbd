// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Spool directory ingestion.
//!
//! Applications that cannot hold a TCP connection drop metric files into a directory. Every
//! poll reads each regular file as one batch and truncates it, so the next poll only sees
//! what was appended since.

use crate::router::{Router, Source};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::{read_dir, OpenOptions};
use tokio::io::AsyncReadExt;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

pub struct SpoolReader {
    dir: PathBuf,
    router: Arc<Router>,
    period: Duration,
}

impl SpoolReader {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, router: Arc<Router>, period: Duration) -> Self {
        Self {
            dir: dir.into(),
            router,
            period,
        }
    }

    /// Scans the directory once. Returns the number of lines routed.
    pub async fn poll(&self) -> usize {
        let mut entries = match read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) => {
                error!("Unable to list spool directory {}: {e}", self.dir.display());
                return 0;
            }
        };

        let mut routed = 0;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    error!("Unable to list spool directory {}: {e}", self.dir.display());
                    break;
                }
            };
            let path = entry.path();
            match entry.file_type().await {
                Ok(file_type) if file_type.is_file() => {}
                _ => continue,
            }

            match take_content(&path).await {
                Ok(content) if content.is_empty() => {}
                Ok(content) => {
                    let lines: Vec<&str> = content
                        .lines()
                        .filter(|line| !line.trim().is_empty())
                        .collect();
                    trace!("Read {} lines from {}", lines.len(), path.display());
                    routed += lines.len();
                    self.router.route(lines, Source::Dir);
                }
                Err(e) => error!("Unable to read spool file {}: {e}", path.display()),
            }
        }
        routed
    }

    pub async fn run(self, cancel_token: CancellationToken) {
        debug!("Spool reader for {} started", self.dir.display());

        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll().await;
                }
                _ = cancel_token.cancelled() => break,
            }
        }

        debug!("Spool reader for {} stopped", self.dir.display());
    }
}

/// Reads a file's full content and truncates it to zero length.
async fn take_content(path: &Path) -> io::Result<String> {
    let mut file = OpenOptions::new().read(true).write(true).open(path).await?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).await?;
    if !bytes.is_empty() {
        file.set_len(0).await?;
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
