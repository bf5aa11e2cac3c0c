/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use g3_io_ext::OptionalInterval;
use g3_types::net::UpstreamAddr;

use super::UdpSessionTable;
use crate::serve::{ServerTaskError, ServerTaskResult};

/// The upstream side of one client address.
pub struct UdpSession {
    client_addr: SocketAddr,
    upstream_addr: SocketAddr,
    socket: UdpSocket,
    cancel: CancellationToken,
    active: AtomicBool,
}

impl UdpSession {
    /// Open a new socket connected to the resolved upstream.
    pub(super) async fn connect(
        client_addr: SocketAddr,
        upstream: &UpstreamAddr,
    ) -> ServerTaskResult<Self> {
        let addrs = crate::serve::resolve_upstream(upstream).await?;
        let Some(upstream_addr) = addrs.first().copied() else {
            return Err(ServerTaskError::UpstreamNotResolved(io::Error::new(
                io::ErrorKind::NotFound,
                "no address found",
            )));
        };
        let bind_ip = match upstream_addr {
            SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        let socket = UdpSocket::bind(SocketAddr::new(bind_ip, 0))
            .await
            .map_err(ServerTaskError::UpstreamUdpSetupFailed)?;
        socket
            .connect(upstream_addr)
            .await
            .map_err(ServerTaskError::UpstreamUdpSetupFailed)?;

        Ok(UdpSession {
            client_addr,
            upstream_addr,
            socket,
            cancel: CancellationToken::new(),
            active: AtomicBool::new(false),
        })
    }

    #[inline]
    pub fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    #[inline]
    pub fn upstream_addr(&self) -> SocketAddr {
        self.upstream_addr
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub(super) async fn send_to_upstream(&self, packet: &[u8]) -> ServerTaskResult<()> {
        self.socket
            .send(packet)
            .await
            .map_err(ServerTaskError::UpstreamUdpSendFailed)?;
        self.active.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Stop the reverse reader, the socket is released with the last reference.
    pub(super) fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    fn reset_active(&self) {
        self.active.store(false, Ordering::Relaxed);
    }
}

/// Relay datagrams from the upstream socket back to the client address.
pub(super) struct UdpReverseTask {
    session: Arc<UdpSession>,
    table: Arc<UdpSessionTable<UdpSession>>,
    listener: Arc<UdpSocket>,
    packet_size: usize,
    idle_timeout: Option<Duration>,
}

impl UdpReverseTask {
    pub(super) fn new(
        session: Arc<UdpSession>,
        table: Arc<UdpSessionTable<UdpSession>>,
        listener: Arc<UdpSocket>,
        packet_size: usize,
        idle_timeout: Option<Duration>,
    ) -> Self {
        UdpReverseTask {
            session,
            table,
            listener,
            packet_size,
            idle_timeout,
        }
    }

    pub(super) async fn into_running(self) {
        let e = self.run().await;

        let client_addr = self.session.client_addr;
        if self.table.remove_if(&client_addr, &self.session) {
            debug!("udp session {client_addr} removed from table");
        }
        self.session.close();

        match e {
            ServerTaskError::CanceledAsSessionRemoved | ServerTaskError::Idle(_) => info!(
                "udp session {client_addr} -> {} closed: {e}",
                self.session.upstream_addr
            ),
            e => warn!(
                "udp session {client_addr} -> {} closed: {} {e}",
                self.session.upstream_addr,
                e.brief()
            ),
        }
    }

    async fn run(&self) -> ServerTaskError {
        let session = &self.session;
        let mut buf = vec![0u8; self.packet_size];
        let mut idle_interval = OptionalInterval::new(self.idle_timeout);

        loop {
            tokio::select! {
                biased;

                _ = session.cancel.cancelled() => {
                    return ServerTaskError::CanceledAsSessionRemoved;
                }
                r = session.socket.recv(&mut buf) => {
                    let nr = match r {
                        Ok(nr) => nr,
                        Err(e) => return ServerTaskError::UpstreamUdpRecvFailed(e),
                    };
                    session.active.store(true, Ordering::Relaxed);
                    if let Err(e) = self.listener.send_to(&buf[..nr], session.client_addr).await {
                        return ServerTaskError::ClientUdpSendFailed(e);
                    }
                }
                _ = idle_interval.tick() => {
                    if session.is_active() {
                        session.reset_active();
                    } else {
                        return ServerTaskError::Idle(idle_interval.period().unwrap_or_default());
                    }
                }
            }
        }
    }
}
