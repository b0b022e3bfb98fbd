// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use metric_relay::config::{Backend, RelayConfig};
use metric_relay::relay::{Relay, RelayHandle};
use metric_relay::retry::RetrySpool;
use std::net::SocketAddr;
use std::path::Path;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::mpsc,
    time::{sleep, timeout, Duration},
};

/// Accepts any number of connections and forwards every received line.
async fn fake_backend() -> (String, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stream).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            });
        }
    });
    (address, rx)
}

async fn unreachable_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().to_string()
}

fn relay_config(backend: &str, retry_dir: &Path) -> RelayConfig {
    RelayConfig {
        bind: "127.0.0.1:0".to_string(),
        backends: vec![Backend::new(backend)],
        retry_dir: retry_dir.to_path_buf(),
        send_interval: Duration::from_millis(50),
        sum_interval: Duration::from_millis(100),
        connect_timeout: Duration::from_secs(1),
        write_timeout: Duration::from_secs(1),
        ..Default::default()
    }
}

async fn submit(addr: SocketAddr, payload: &str) {
    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(payload.as_bytes()).await.unwrap();
    client.shutdown().await.unwrap();
}

/// Collects received lines until `expected` lines not produced by self monitoring arrived.
async fn receive_user_lines(
    rx: &mut mpsc::UnboundedReceiver<String>,
    expected: usize,
) -> Vec<String> {
    let mut received = Vec::new();
    let collect = async {
        while received.len() < expected {
            match rx.recv().await {
                Some(line) if line.starts_with("metric_relay.") => {}
                Some(line) => received.push(line),
                None => break,
            }
        }
    };
    timeout(Duration::from_secs(5), collect)
        .await
        .expect("timed out waiting for backend lines");
    received
}

async fn start(config: RelayConfig) -> RelayHandle {
    Relay::new(config).start().await.unwrap()
}

#[tokio::test]
async fn relays_tcp_lines_to_backend() {
    let retry_dir = tempfile::tempdir().unwrap();
    let (address, mut rx) = fake_backend().await;
    let handle = start(relay_config(&address, retry_dir.path())).await;

    submit(
        handle.local_addr(),
        "test.oleg.test 8 1500000000\nnot a metric\nwhoop.whoop 11 1500000000\n",
    )
    .await;

    assert_eq!(
        receive_user_lines(&mut rx, 2).await,
        vec!["test.oleg.test 8 1500000000", "whoop.whoop 11 1500000000"]
    );
    let server = handle.stats().server().snapshot();
    assert_eq!(server.net, 2);
    assert_eq!(server.invalid, 1);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn aggregates_prefixed_lines() {
    let retry_dir = tempfile::tempdir().unwrap();
    let (address, mut rx) = fake_backend().await;
    // one window that only closes on shutdown, so the whole batch lands in it
    let config = RelayConfig {
        sum_interval: Duration::from_secs(60),
        ..relay_config(&address, retry_dir.path())
    };
    let handle = start(config).await;
    let stats = handle.stats();

    submit(
        handle.local_addr(),
        "SUM.requests 1 100\nSUM.requests 2 200\nAVG.latency 4 100\nAVG.latency 2 100\n",
    )
    .await;
    timeout(Duration::from_secs(5), async {
        while stats.server().snapshot().net < 4 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    handle.shutdown().await.unwrap();

    let mut received = receive_user_lines(&mut rx, 2).await;
    received.sort();
    assert_eq!(received, vec!["latency 3.00 100", "requests 3.00 150"]);
}

#[tokio::test]
async fn ingests_spool_directory() {
    let retry_dir = tempfile::tempdir().unwrap();
    let metric_dir = tempfile::tempdir().unwrap();
    tokio::fs::write(metric_dir.path().join("app"), "spooled.metric 1 1500000000\n")
        .await
        .unwrap();
    let (address, mut rx) = fake_backend().await;
    let config = RelayConfig {
        metric_dir: Some(metric_dir.path().to_path_buf()),
        ..relay_config(&address, retry_dir.path())
    };
    let handle = start(config).await;

    assert_eq!(
        receive_user_lines(&mut rx, 1).await,
        vec!["spooled.metric 1 1500000000"]
    );
    assert_eq!(handle.stats().server().snapshot().dir, 1);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn reports_own_counters() {
    let retry_dir = tempfile::tempdir().unwrap();
    let (address, mut rx) = fake_backend().await;
    let config = RelayConfig {
        monitoring_interval: Duration::from_millis(100),
        ..relay_config(&address, retry_dir.path())
    };
    let handle = start(config).await;
    submit(handle.local_addr(), "a 1 1\n").await;

    let found = timeout(Duration::from_secs(5), async {
        while let Some(line) = rx.recv().await {
            if line.starts_with("metric_relay.server.net 1 ") {
                return true;
            }
        }
        false
    })
    .await
    .unwrap();
    assert!(found);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_delivers_queued_lines() {
    let retry_dir = tempfile::tempdir().unwrap();
    let (address, mut rx) = fake_backend().await;
    let config = RelayConfig {
        send_interval: Duration::from_secs(60),
        ..relay_config(&address, retry_dir.path())
    };
    let handle = start(config).await;
    let stats = handle.stats();

    submit(handle.local_addr(), "late.metric 1 1500000000\n").await;
    while stats.server().snapshot().net == 0 {
        sleep(Duration::from_millis(10)).await;
    }
    handle.shutdown().await.unwrap();

    assert_eq!(
        receive_user_lines(&mut rx, 1).await,
        vec!["late.metric 1 1500000000"]
    );
}

#[tokio::test]
async fn outage_is_recovered_from_retry_file() {
    let retry_dir = tempfile::tempdir().unwrap();
    let address = unreachable_address().await;
    let backend = Backend::new(address.as_str());

    let handle = start(relay_config(&address, retry_dir.path())).await;
    let stats = handle.stats();
    submit(handle.local_addr(), "test.oleg.test 8 1500000000\n").await;
    timeout(Duration::from_secs(5), async {
        while stats.client(&backend).unwrap().snapshot().saved == 0 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    handle.shutdown().await.unwrap();

    let spool = RetrySpool::new(retry_dir.path(), &backend);
    let spilled: Vec<String> = spool
        .read()
        .await
        .unwrap()
        .into_iter()
        .filter(|line| !line.starts_with("metric_relay."))
        .collect();
    assert_eq!(spilled, vec!["test.oleg.test 8 1500000000"]);

    // the backend comes back under the same address
    let listener = TcpListener::bind(&address).await.unwrap();
    let handle = start(relay_config(&address, retry_dir.path())).await;
    let (stream, _) = timeout(Duration::from_secs(5), listener.accept())
        .await
        .unwrap()
        .unwrap();
    let first = BufReader::new(stream).lines().next_line().await.unwrap();
    assert_eq!(first.as_deref(), Some("test.oleg.test 8 1500000000"));

    handle.shutdown().await.unwrap();
}
