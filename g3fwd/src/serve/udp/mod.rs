/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::net::UdpSocket;

use g3_types::net::UpstreamAddr;

use crate::serve::ServerTaskResult;

mod table;
pub use table::UdpSessionTable;

mod session;
pub use session::UdpSession;
use session::UdpReverseTask;

const DEFAULT_PACKET_SIZE: usize = 65535;

#[derive(Clone, Debug)]
pub struct UdpForwardConfig {
    upstream: UpstreamAddr,
    packet_size: usize,
    idle_timeout: Option<Duration>,
}

impl UdpForwardConfig {
    pub fn new(upstream: UpstreamAddr) -> Self {
        UdpForwardConfig {
            upstream,
            packet_size: DEFAULT_PACKET_SIZE,
            idle_timeout: None,
        }
    }

    #[inline]
    pub fn upstream(&self) -> &UpstreamAddr {
        &self.upstream
    }

    /// Sessions never expire if no idle timeout is set.
    pub fn set_idle_timeout(&mut self, timeout: Option<Duration>) {
        self.idle_timeout = timeout.filter(|t| !t.is_zero());
    }

    #[inline]
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }
}

pub struct UdpForwardServer {
    socket: Arc<UdpSocket>,
    config: Arc<UdpForwardConfig>,
    table: Arc<UdpSessionTable<UdpSession>>,
}

impl UdpForwardServer {
    pub async fn bind(addr: SocketAddr, config: UdpForwardConfig) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(UdpForwardServer {
            socket: Arc::new(socket),
            config: Arc::new(config),
            table: Arc::new(UdpSessionTable::default()),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn session_table(&self) -> Arc<UdpSessionTable<UdpSession>> {
        self.table.clone()
    }

    /// Read datagrams forever, dispatching them in the order received.
    pub async fn run(self) {
        if let Ok(addr) = self.socket.local_addr() {
            info!("udp forwarder listening on {addr}, upstream {}", self.config.upstream);
        }

        let mut buf = vec![0u8; self.config.packet_size];
        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((nr, client_addr)) => self.dispatch(&buf[..nr], client_addr).await,
                Err(e) => warn!("udp recv failed: {e}"),
            }
        }
    }

    async fn dispatch(&self, packet: &[u8], client_addr: SocketAddr) {
        let session = match self.table.get(&client_addr) {
            Some(session) => session,
            None => match self.new_session(client_addr).await {
                Ok(session) => session,
                Err(e) => {
                    warn!(
                        "udp session {client_addr} -> {} not created: {} {e}",
                        self.config.upstream,
                        e.brief()
                    );
                    return;
                }
            },
        };

        if let Err(e) = session.send_to_upstream(packet).await {
            warn!(
                "udp session {client_addr} -> {} closed: {} {e}",
                session.upstream_addr(),
                e.brief()
            );
            if self.table.remove_if(&client_addr, &session) {
                debug!("udp session {client_addr} removed from table");
            }
            session.close();
        }
    }

    async fn new_session(&self, client_addr: SocketAddr) -> ServerTaskResult<Arc<UdpSession>> {
        let session = UdpSession::connect(client_addr, &self.config.upstream).await?;
        let (session, inserted) = self.table.insert_or_get(client_addr, Arc::new(session));
        if inserted {
            debug!(
                "udp session {client_addr} -> {} created",
                session.upstream_addr()
            );
            let task = UdpReverseTask::new(
                session.clone(),
                self.table.clone(),
                self.socket.clone(),
                self.config.packet_size,
                self.config.idle_timeout,
            );
            tokio::spawn(task.into_running());
        }
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn idle_timeout_config() {
        let mut config = UdpForwardConfig::new(UpstreamAddr::from(SocketAddr::from((
            Ipv4Addr::LOCALHOST,
            53,
        ))));
        assert!(config.idle_timeout().is_none());
        config.set_idle_timeout(Some(Duration::ZERO));
        assert!(config.idle_timeout().is_none());
        config.set_idle_timeout(Some(Duration::from_secs(30)));
        assert_eq!(config.idle_timeout(), Some(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn send_failure_removes_session() {
        let config = UdpForwardConfig::new(UpstreamAddr::from(SocketAddr::from((
            Ipv4Addr::LOCALHOST,
            9,
        ))));
        let server = UdpForwardServer::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)), config)
            .await
            .unwrap();
        let client_addr = SocketAddr::from((Ipv4Addr::LOCALHOST, 4000));

        // exceeds the maximum udp payload, so the upstream send always fails
        let oversized = vec![0u8; 70000];
        server.dispatch(&oversized, client_addr).await;
        assert!(server.session_table().get(&client_addr).is_none());
    }
}
