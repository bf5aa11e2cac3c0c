/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, info, trace, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use super::TcpForwardConfig;
use crate::serve::splice::Splice;
use crate::serve::{ServerTaskError, ServerTaskResult, ServerTaskStage};

pub(super) struct TcpForwardTask {
    config: Arc<TcpForwardConfig>,
    client_addr: SocketAddr,
    stage: ServerTaskStage,
    clt_to_ups: u64,
    ups_to_clt: u64,
}

impl TcpForwardTask {
    pub(super) fn new(config: Arc<TcpForwardConfig>, client_addr: SocketAddr) -> Self {
        TcpForwardTask {
            config,
            client_addr,
            stage: ServerTaskStage::Accepted,
            clt_to_ups: 0,
            ups_to_clt: 0,
        }
    }

    fn set_stage(&mut self, stage: ServerTaskStage) {
        trace!(
            "tcp session {}: {} -> {}",
            self.client_addr,
            self.stage.brief(),
            stage.brief()
        );
        self.stage = stage;
    }

    pub(super) async fn into_running(mut self, clt_stream: TcpStream) {
        let e = match self.run(clt_stream).await {
            Ok(_) => ServerTaskError::Finished,
            Err(e) => e,
        };
        let last_stage = self.stage;
        self.set_stage(ServerTaskStage::Closed);
        match e {
            ServerTaskError::Finished => info!(
                "tcp session {} -> {} finished, sent {} received {}",
                self.client_addr, self.config.upstream, self.clt_to_ups, self.ups_to_clt
            ),
            e => warn!(
                "tcp session {} -> {} closed at stage {}, sent {} received {}: {} {e}",
                self.client_addr,
                self.config.upstream,
                last_stage.brief(),
                self.clt_to_ups,
                self.ups_to_clt,
                e.brief()
            ),
        }
    }

    async fn run(&mut self, clt_stream: TcpStream) -> ServerTaskResult<()> {
        self.set_stage(ServerTaskStage::Connecting);
        let ups_stream = self.connect().await?;

        self.set_stage(ServerTaskStage::Relaying);
        let (clt_r, clt_w) = clt_stream.into_split();
        let (ups_r, ups_w) = ups_stream.into_split();
        self.relay(clt_r, clt_w, ups_r, ups_w).await
    }

    async fn connect(&self) -> ServerTaskResult<TcpStream> {
        let timeout = self.config.connect_timeout;
        let connect = async {
            let addrs = crate::serve::resolve_upstream(&self.config.upstream).await?;
            TcpStream::connect(&addrs[..])
                .await
                .map_err(ServerTaskError::UpstreamNotConnected)
        };
        match tokio::time::timeout(timeout, connect).await {
            Ok(Ok(stream)) => {
                debug!(
                    "tcp session {} connected to {}",
                    self.client_addr, self.config.upstream
                );
                Ok(stream)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ServerTaskError::UpstreamConnectTimeout(timeout)),
        }
    }

    async fn relay<CR, CW, UR, UW>(
        &mut self,
        clt_r: CR,
        clt_w: CW,
        ups_r: UR,
        ups_w: UW,
    ) -> ServerTaskResult<()>
    where
        CR: AsyncRead + Unpin,
        CW: AsyncWrite + Unpin,
        UR: AsyncRead + Unpin,
        UW: AsyncWrite + Unpin,
    {
        let splice = Splice::new("tcp", self.client_addr, &self.config.copy);
        let (r, size) = splice.run(clt_r, clt_w, ups_r, ups_w).await;
        self.clt_to_ups = size.clt_to_ups;
        self.ups_to_clt = size.ups_to_clt;
        r
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::str::FromStr;
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use g3_types::net::UpstreamAddr;

    fn new_task() -> TcpForwardTask {
        let upstream = UpstreamAddr::from_str("127.0.0.1:9").unwrap();
        TcpForwardTask::new(
            Arc::new(TcpForwardConfig::new(upstream)),
            SocketAddr::from_str("127.0.0.1:4000").unwrap(),
        )
    }

    #[tokio::test]
    async fn relay_half_close() {
        let (clt_inner, mut clt_outer) = tokio::io::duplex(1024);
        let (ups_inner, mut ups_outer) = tokio::io::duplex(1024);
        let (clt_r, clt_w) = tokio::io::split(clt_inner);
        let (ups_r, ups_w) = tokio::io::split(ups_inner);

        let client = tokio::spawn(async move {
            clt_outer.write_all(b"request").await.unwrap();
            clt_outer.shutdown().await.unwrap();
            let mut buf = Vec::new();
            clt_outer.read_to_end(&mut buf).await.unwrap();
            buf
        });
        let upstream = tokio::spawn(async move {
            let mut buf = Vec::new();
            ups_outer.read_to_end(&mut buf).await.unwrap();
            assert_eq!(buf, b"request");
            // the client already closed its write side, the reply must still arrive
            ups_outer.write_all(b"late response").await.unwrap();
            ups_outer.shutdown().await.unwrap();
        });

        let mut task = new_task();
        task.relay(clt_r, clt_w, ups_r, ups_w).await.unwrap();
        assert_eq!(task.clt_to_ups, 7);
        assert_eq!(task.ups_to_clt, 13);

        upstream.await.unwrap();
        assert_eq!(client.await.unwrap(), b"late response");
    }

    #[tokio::test]
    async fn relay_upstream_closes_first() {
        let (clt_inner, mut clt_outer) = tokio::io::duplex(1024);
        let (ups_inner, mut ups_outer) = tokio::io::duplex(1024);
        let (clt_r, clt_w) = tokio::io::split(clt_inner);
        let (ups_r, ups_w) = tokio::io::split(ups_inner);

        let upstream = tokio::spawn(async move {
            ups_outer.write_all(b"banner").await.unwrap();
            ups_outer.shutdown().await.unwrap();
            let mut buf = Vec::new();
            ups_outer.read_to_end(&mut buf).await.unwrap();
            buf
        });
        let client = tokio::spawn(async move {
            let mut buf = [0u8; 6];
            clt_outer.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"banner");
            let mut rest = Vec::new();
            clt_outer.read_to_end(&mut rest).await.unwrap();
            assert!(rest.is_empty());
            clt_outer.write_all(b"bye").await.unwrap();
            clt_outer.shutdown().await.unwrap();
        });

        let mut task = new_task();
        task.relay(clt_r, clt_w, ups_r, ups_w).await.unwrap();

        client.await.unwrap();
        assert_eq!(upstream.await.unwrap(), b"bye");
    }

    #[tokio::test]
    async fn relay_read_error_keeps_other_direction() {
        let clt_r = tokio_test::io::Builder::new()
            .read(b"abc")
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();
        let (clt_w, mut clt_outer) = tokio::io::duplex(1024);
        let (ups_inner, mut ups_outer) = tokio::io::duplex(1024);
        let (ups_r, ups_w) = tokio::io::split(ups_inner);

        let upstream = tokio::spawn(async move {
            let mut buf = Vec::new();
            ups_outer.read_to_end(&mut buf).await.unwrap();
            assert_eq!(buf, b"abc");
            ups_outer.write_all(b"still here").await.unwrap();
            ups_outer.shutdown().await.unwrap();
        });

        let mut task = new_task();
        let e = task.relay(clt_r, clt_w, ups_r, ups_w).await.unwrap_err();
        assert_eq!(e.brief(), "ClientTcpReadFailed");
        upstream.await.unwrap();

        let mut buf = Vec::new();
        clt_outer.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"still here");
    }

    #[tokio::test]
    async fn connect_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut config = TcpForwardConfig::new(UpstreamAddr::from(addr));
        config.set_connect_timeout(Duration::from_secs(2));
        let task = TcpForwardTask::new(
            Arc::new(config),
            SocketAddr::from_str("127.0.0.1:4000").unwrap(),
        );
        match task.connect().await {
            Err(ServerTaskError::UpstreamNotConnected(_) | ServerTaskError::UpstreamConnectTimeout(_)) => {}
            Err(e) => panic!("unexpected error {e}"),
            Ok(_) => panic!("connected to a closed port"),
        }
    }

    #[tokio::test]
    async fn stage_stops_at_connecting() {
        let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let upstream = closed.local_addr().unwrap();
        drop(closed);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy = listener.local_addr().unwrap();
        let client = tokio::spawn(async move { TcpStream::connect(proxy).await.unwrap() });
        let (clt_stream, client_addr) = listener.accept().await.unwrap();

        let mut config = TcpForwardConfig::new(UpstreamAddr::from(upstream));
        config.set_connect_timeout(Duration::from_secs(2));
        let mut task = TcpForwardTask::new(Arc::new(config), client_addr);
        assert_eq!(task.stage, ServerTaskStage::Accepted);

        assert!(task.run(clt_stream).await.is_err());
        assert_eq!(task.stage, ServerTaskStage::Connecting);
        task.set_stage(ServerTaskStage::Closed);
        assert_eq!(task.stage, ServerTaskStage::Closed);
        drop(client.await.unwrap());
    }
}
