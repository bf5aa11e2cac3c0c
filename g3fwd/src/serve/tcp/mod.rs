/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::net::TcpListener;

use g3_io_ext::StreamCopyConfig;
use g3_types::net::UpstreamAddr;

mod task;
use task::TcpForwardTask;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct TcpForwardConfig {
    upstream: UpstreamAddr,
    connect_timeout: Duration,
    copy: StreamCopyConfig,
}

impl TcpForwardConfig {
    pub fn new(upstream: UpstreamAddr) -> Self {
        TcpForwardConfig {
            upstream,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            copy: StreamCopyConfig::default(),
        }
    }

    #[inline]
    pub fn upstream(&self) -> &UpstreamAddr {
        &self.upstream
    }

    pub fn set_connect_timeout(&mut self, timeout: Duration) {
        self.connect_timeout = timeout;
    }

    #[inline]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}

pub struct TcpForwardServer {
    listener: TcpListener,
    config: Arc<TcpForwardConfig>,
}

impl TcpForwardServer {
    pub async fn bind(addr: SocketAddr, config: TcpForwardConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(TcpForwardServer {
            listener,
            config: Arc::new(config),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections forever, each one is relayed in its own task.
    pub async fn run(self) {
        if let Ok(addr) = self.listener.local_addr() {
            info!("tcp forwarder listening on {addr}, upstream {}", self.config.upstream);
        }

        loop {
            match self.listener.accept().await {
                Ok((stream, peer_addr)) => {
                    debug!("tcp connection accepted from {peer_addr}");
                    let task = TcpForwardTask::new(self.config.clone(), peer_addr);
                    tokio::spawn(task.into_running(stream));
                }
                Err(e) => {
                    warn!("tcp accept failed: {e}");
                }
            }
        }
    }
}
