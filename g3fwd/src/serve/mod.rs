/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;
use std::net::SocketAddr;

use anyhow::Context;
use log::info;

use g3_types::net::UpstreamAddr;

use crate::opts::ProcArgs;
use crate::target::Target;

mod error;
pub use error::{ServerTaskError, ServerTaskResult};

mod task;
pub use task::ServerTaskStage;

pub mod http;
pub mod tcp;
pub mod udp;

mod splice;

/// Resolve the upstream address, literal ips are returned as is.
pub(crate) async fn resolve_upstream(upstream: &UpstreamAddr) -> ServerTaskResult<Vec<SocketAddr>> {
    if let Some(addr) = upstream.ip_socket_addr() {
        return Ok(vec![addr]);
    }

    let addrs: Vec<SocketAddr> = tokio::net::lookup_host(upstream.to_string())
        .await
        .map_err(ServerTaskError::UpstreamNotResolved)?
        .collect();
    if addrs.is_empty() {
        Err(ServerTaskError::UpstreamNotResolved(io::Error::new(
            io::ErrorKind::NotFound,
            "no address found",
        )))
    } else {
        Ok(addrs)
    }
}

/// Bind the listener selected by the target and serve until the process is stopped.
pub async fn run(args: &ProcArgs) -> anyhow::Result<()> {
    info!(
        "forwarding {} {} -> {}",
        args.target.transport(),
        args.listen_addr,
        args.target
    );

    match &args.target {
        Target::Tcp(upstream) => {
            let config = tcp::TcpForwardConfig::new(upstream.clone());
            let server = tcp::TcpForwardServer::bind(args.listen_addr, config)
                .await
                .context(format!("failed to bind tcp listener {}", args.listen_addr))?;
            server.run().await;
        }
        Target::Udp(upstream) => {
            let mut config = udp::UdpForwardConfig::new(upstream.clone());
            config.set_idle_timeout(args.udp_idle_timeout);
            let server = udp::UdpForwardServer::bind(args.listen_addr, config)
                .await
                .context(format!("failed to bind udp socket {}", args.listen_addr))?;
            server.run().await;
        }
        Target::Http(target) => {
            let config = http::HttpForwardConfig::new(target.clone());
            let server = http::HttpForwardServer::bind(args.listen_addr, config)
                .await
                .context(format!("failed to bind http listener {}", args.listen_addr))?;
            server.run().await;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[tokio::test]
    async fn resolve_ip() {
        let upstream = UpstreamAddr::from_str("127.0.0.1:9").unwrap();
        let addrs = resolve_upstream(&upstream).await.unwrap();
        assert_eq!(addrs, vec![SocketAddr::from_str("127.0.0.1:9").unwrap()]);
    }

    #[tokio::test]
    async fn resolve_localhost() {
        let upstream = UpstreamAddr::from_str("localhost:9").unwrap();
        let addrs = resolve_upstream(&upstream).await.unwrap();
        assert!(addrs.iter().all(|a| a.ip().is_loopback() && a.port() == 9));
    }
}
