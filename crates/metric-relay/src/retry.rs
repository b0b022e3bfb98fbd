// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! On-disk retry spool, one append-only file per backend.
//!
//! Files only ever receive whole newline terminated lines in a single write. When reading,
//! a trailing fragment without a terminator (a write torn by a crash) is ignored, and so is
//! any line that is not valid UTF-8.

use crate::config::Backend;
use crate::errors::RetryError;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetrySpool {
    path: PathBuf,
}

impl RetrySpool {
    /// The file is `<retry_dir>/<backend slug>`.
    #[must_use]
    pub fn new(retry_dir: &Path, backend: &Backend) -> Self {
        Self {
            path: retry_dir.join(backend.slug()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn exists(&self) -> bool {
        tokio::fs::try_exists(&self.path).await.unwrap_or(false)
    }

    pub async fn append(&self, lines: &[String]) -> Result<(), RetryError> {
        if lines.is_empty() {
            return Ok(());
        }
        let mut buf = String::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
        for line in lines {
            buf.push_str(line);
            buf.push('\n');
        }

        let append_error = |source| RetryError::Append {
            path: self.path.clone(),
            source,
        };
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(append_error)?;
        file.write_all(buf.as_bytes()).await.map_err(append_error)?;
        file.sync_data().await.map_err(append_error)?;
        Ok(())
    }

    /// Reads every complete line, oldest first. A missing file reads as empty.
    pub async fn read(&self) -> Result<Vec<String>, RetryError> {
        let content = match tokio::fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(RetryError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let mut lines = Vec::new();
        for chunk in content.split_inclusive(|b| *b == b'\n') {
            let Some(line) = chunk.strip_suffix(b"\n") else {
                warn!(
                    "Ignoring incomplete line \"{}\" at the end of {}",
                    String::from_utf8_lossy(chunk),
                    self.path.display()
                );
                continue;
            };
            let line = match std::str::from_utf8(line) {
                Ok(line) => line.trim_end_matches('\r'),
                Err(e) => {
                    warn!(
                        "Ignoring undecodable line \"{}\" in {}: {e}",
                        String::from_utf8_lossy(line),
                        self.path.display()
                    );
                    continue;
                }
            };
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }
        Ok(lines)
    }

    /// Deletes the file once its content has been delivered.
    pub async fn remove(&self) -> Result<(), RetryError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(RetryError::Remove {
                path: self.path.clone(),
                source,
            }),
        }
    }
}
