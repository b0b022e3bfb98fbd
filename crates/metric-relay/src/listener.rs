// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! TCP ingestion.
//!
//! Each accepted connection gets its own task. It reads newline terminated lines until EOF,
//! an I/O error or `max_metrics` lines, closes the connection and routes the batch.

use crate::errors::RelayError;
use crate::router::{Router, Source};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

pub struct Listener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Listener {
    pub async fn bind(addr: &str) -> Result<Self, RelayError> {
        let bind_error = |source| RelayError::Bind {
            addr: addr.to_string(),
            source,
        };
        let listener = TcpListener::bind(addr).await.map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;
        debug!("Listening for metrics on {local_addr}");
        Ok(Self {
            listener,
            local_addr,
        })
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections until cancelled. In-flight connections stop reading on
    /// cancellation and still route what they already read. An accept error ends the loop.
    pub async fn run(
        self,
        router: Arc<Router>,
        max_metrics: usize,
        cancel_token: CancellationToken,
    ) -> Result<(), RelayError> {
        let mut connections = JoinSet::new();

        let result = loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        trace!("Accepted connection from {peer}");
                        connections.spawn(handle_connection(
                            stream,
                            peer,
                            Arc::clone(&router),
                            max_metrics,
                            cancel_token.clone(),
                        ));
                    }
                    Err(source) => {
                        error!("Failed to accept connection on {}: {source}", self.local_addr);
                        break Err(RelayError::Accept {
                            addr: self.local_addr,
                            source,
                        });
                    }
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                _ = cancel_token.cancelled() => break Ok(()),
            }
        };

        drop(self.listener);
        while connections.join_next().await.is_some() {}
        debug!("Listener on {} stopped", self.local_addr);
        result
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    router: Arc<Router>,
    max_metrics: usize,
    cancel_token: CancellationToken,
) {
    let lines = read_lines(BufReader::new(stream), max_metrics, &cancel_token).await;
    trace!("Received {} lines from {peer}", lines.len());
    router.route(lines, Source::Net);
}

/// Reads at most `max` complete lines. A trailing fragment without a newline is discarded.
pub async fn read_lines<R>(
    mut reader: R,
    max: usize,
    cancel_token: &CancellationToken,
) -> Vec<String>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = Vec::new();
    let mut buf = String::new();

    while lines.len() < max {
        buf.clear();
        let read = tokio::select! {
            read = reader.read_line(&mut buf) => read,
            _ = cancel_token.cancelled() => break,
        };
        match read {
            Ok(0) => break,
            Ok(_) => {
                let Some(line) = buf.strip_suffix('\n') else {
                    trace!("Discarding unterminated fragment \"{buf}\"");
                    break;
                };
                lines.push(line.strip_suffix('\r').unwrap_or(line).to_string());
            }
            Err(e) => {
                debug!("Stopped reading connection: {e}");
                break;
            }
        }
    }
    lines
}
