/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;

use g3_types::net::UpstreamAddr;
use g3fwd::serve::udp::{UdpForwardConfig, UdpForwardServer};

async fn spawn_echo_upstream() -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = [0u8; 2048];
        loop {
            let Ok((nr, peer)) = socket.recv_from(&mut buf).await else {
                break;
            };
            let _ = socket.send_to(&buf[..nr], peer).await;
        }
    });
    addr
}

async fn exchange(client: &UdpSocket, proxy: SocketAddr, tag: &str, count: usize) -> Vec<String> {
    let mut replies = Vec::with_capacity(count);
    let mut buf = [0u8; 2048];
    for i in 0..count {
        let payload = format!("{tag}-{i}");
        client.send_to(payload.as_bytes(), proxy).await.unwrap();
        let (nr, from) = tokio::time::timeout(Duration::from_secs(5), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(from, proxy);
        replies.push(String::from_utf8(buf[..nr].to_vec()).unwrap());
    }
    replies
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn routing_isolation() {
    let upstream = spawn_echo_upstream().await;
    let server = UdpForwardServer::bind(
        "127.0.0.1:0".parse().unwrap(),
        UdpForwardConfig::new(UpstreamAddr::from(upstream)),
    )
    .await
    .unwrap();
    let proxy = server.local_addr().unwrap();
    let table = server.session_table();
    tokio::spawn(server.run());

    let client_a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let client_b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr_a = client_a.local_addr().unwrap();
    let addr_b = client_b.local_addr().unwrap();

    let task_a = tokio::spawn(async move { exchange(&client_a, proxy, "alpha", 20).await });
    let task_b = tokio::spawn(async move { exchange(&client_b, proxy, "bravo", 20).await });
    let replies_a = task_a.await.unwrap();
    let replies_b = task_b.await.unwrap();

    assert!(replies_a.iter().all(|r| r.starts_with("alpha-")));
    assert!(replies_b.iter().all(|r| r.starts_with("bravo-")));
    assert_eq!(replies_a.len(), 20);
    assert_eq!(replies_b.len(), 20);

    assert_eq!(table.len(), 2);
    let session_a = table.get(&addr_a).unwrap();
    let session_b = table.get(&addr_b).unwrap();
    assert_eq!(session_a.client_addr(), addr_a);
    assert_eq!(session_b.client_addr(), addr_b);
    assert_ne!(
        session_a.local_addr().unwrap(),
        session_b.local_addr().unwrap()
    );
}

#[tokio::test]
async fn session_reused_per_client() {
    let upstream = spawn_echo_upstream().await;
    let server = UdpForwardServer::bind(
        "127.0.0.1:0".parse().unwrap(),
        UdpForwardConfig::new(UpstreamAddr::from(upstream)),
    )
    .await
    .unwrap();
    let proxy = server.local_addr().unwrap();
    let table = server.session_table();
    tokio::spawn(server.run());

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = client.local_addr().unwrap();
    exchange(&client, proxy, "first", 1).await;
    let session = table.get(&addr).unwrap();
    exchange(&client, proxy, "second", 3).await;
    assert!(std::sync::Arc::ptr_eq(&session, &table.get(&addr).unwrap()));
    assert_eq!(table.len(), 1);
}

#[tokio::test]
async fn idle_session_expire() {
    let upstream = spawn_echo_upstream().await;
    let mut config = UdpForwardConfig::new(UpstreamAddr::from(upstream));
    config.set_idle_timeout(Some(Duration::from_millis(100)));
    let server = UdpForwardServer::bind("127.0.0.1:0".parse().unwrap(), config)
        .await
        .unwrap();
    let proxy = server.local_addr().unwrap();
    let table = server.session_table();
    tokio::spawn(server.run());

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = client.local_addr().unwrap();
    exchange(&client, proxy, "once", 1).await;
    let session = table.get(&addr).unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(table.get(&addr).is_none());
    assert!(session.is_closed());

    // a new datagram creates a new session
    exchange(&client, proxy, "again", 1).await;
    let renewed = table.get(&addr).unwrap();
    assert!(!std::sync::Arc::ptr_eq(&session, &renewed));
}

#[tokio::test]
async fn upstream_refused_removes_session() {
    let closed = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let upstream = closed.local_addr().unwrap();
    drop(closed);

    let server = UdpForwardServer::bind(
        "127.0.0.1:0".parse().unwrap(),
        UdpForwardConfig::new(UpstreamAddr::from(upstream)),
    )
    .await
    .unwrap();
    let proxy = server.local_addr().unwrap();
    let table = server.session_table();
    tokio::spawn(server.run());

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = client.local_addr().unwrap();
    client.send_to(b"nobody home", proxy).await.unwrap();

    // the port unreachable reply fails the upstream read of the reverse task
    let mut removed = false;
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if table.is_empty() {
            removed = true;
            break;
        }
    }
    assert!(removed, "session for {addr} still in table");
}
