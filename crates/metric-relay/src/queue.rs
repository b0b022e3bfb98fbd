// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded line queues.
//!
//! Producers on the user data path only ever call [`QueueSender::offer`], which never waits:
//! a full queue hands the line back and the caller accounts for the drop. Consumers drain a
//! snapshot of the queue length so a live producer cannot extend a drain indefinitely.

use tokio::sync::mpsc;

/// Creates a queue holding at most `capacity` lines. `capacity` is clamped to 1.
#[must_use]
pub fn bounded(capacity: usize) -> (QueueSender, QueueReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (QueueSender { tx }, QueueReceiver { rx })
}

#[derive(Debug, PartialEq, Eq)]
pub enum Rejected {
    Full(String),
    Closed(String),
}

#[derive(Clone, Debug)]
pub struct QueueSender {
    tx: mpsc::Sender<String>,
}

impl QueueSender {
    /// Enqueues without waiting.
    pub fn offer(&self, line: String) -> Result<(), Rejected> {
        self.tx.try_send(line).map_err(|e| match e {
            mpsc::error::TrySendError::Full(line) => Rejected::Full(line),
            mpsc::error::TrySendError::Closed(line) => Rejected::Closed(line),
        })
    }

    /// Enqueues, waiting for room. Only for paths whose volume is bounded by construction.
    pub async fn send(&self, line: String) -> Result<(), Rejected> {
        self.tx
            .send(line)
            .await
            .map_err(|mpsc::error::SendError(line)| Rejected::Closed(line))
    }

    #[must_use]
    pub fn max_capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

#[derive(Debug)]
pub struct QueueReceiver {
    rx: mpsc::Receiver<String>,
}

impl QueueReceiver {
    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Removes exactly the lines that were queued when the call started.
    pub fn drain_snapshot(&mut self) -> Vec<String> {
        let pending = self.rx.len();
        let mut lines = Vec::with_capacity(pending);
        for _ in 0..pending {
            match self.rx.try_recv() {
                Ok(line) => lines.push(line),
                Err(_) => break,
            }
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offer_drops_when_full() {
        let (tx, mut rx) = bounded(2);
        assert_eq!(tx.offer("a 1 1".to_string()), Ok(()));
        assert_eq!(tx.offer("b 1 1".to_string()), Ok(()));
        assert_eq!(
            tx.offer("c 1 1".to_string()),
            Err(Rejected::Full("c 1 1".to_string()))
        );
        assert_eq!(rx.drain_snapshot(), vec!["a 1 1", "b 1 1"]);
        assert!(rx.is_empty());
    }

    #[test]
    fn offer_reports_closed_queue() {
        let (tx, rx) = bounded(1);
        drop(rx);
        assert_eq!(
            tx.offer("a 1 1".to_string()),
            Err(Rejected::Closed("a 1 1".to_string()))
        );
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let (tx, _rx) = bounded(0);
        assert_eq!(tx.max_capacity(), 1);
    }

    #[test]
    fn drain_snapshot_leaves_later_lines() {
        let (tx, mut rx) = bounded(8);
        tx.offer("a 1 1".to_string()).unwrap();
        let first = rx.drain_snapshot();
        tx.offer("b 1 1".to_string()).unwrap();
        assert_eq!(first, vec!["a 1 1"]);
        assert_eq!(rx.len(), 1);
        assert_eq!(rx.drain_snapshot(), vec!["b 1 1"]);
    }

    #[tokio::test]
    async fn send_waits_for_room() {
        let (tx, mut rx) = bounded(1);
        tx.offer("a 1 1".to_string()).unwrap();
        let waiting = tokio::spawn({
            let tx = tx.clone();
            async move { tx.send("b 1 1".to_string()).await }
        });
        tokio::task::yield_now().await;
        assert_eq!(rx.drain_snapshot(), vec!["a 1 1"]);
        waiting.await.unwrap().unwrap();
        assert_eq!(rx.drain_snapshot(), vec!["b 1 1"]);
    }
}
