/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::SocketAddr;

use log::debug;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use g3_io_ext::{StreamCopy, StreamCopyConfig, StreamCopyError};

use super::{ServerTaskError, ServerTaskResult};

/// Bytes copied in each direction of a finished splice.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) struct SpliceSize {
    pub(crate) clt_to_ups: u64,
    pub(crate) ups_to_clt: u64,
}

/// Relays `CR -> UW` and `UR -> CW` until both directions end.
pub(crate) struct Splice<'a> {
    name: &'static str,
    client_addr: SocketAddr,
    config: &'a StreamCopyConfig,
}

impl<'a> Splice<'a> {
    pub(crate) fn new(
        name: &'static str,
        client_addr: SocketAddr,
        config: &'a StreamCopyConfig,
    ) -> Self {
        Splice {
            name,
            client_addr,
            config,
        }
    }

    /// Shutdown the writer of a finished direction so the peer sees EOF.
    async fn finish_copy<W>(
        &self,
        r: Result<u64, StreamCopyError>,
        writer: &mut W,
        map_err: fn(StreamCopyError) -> ServerTaskError,
    ) -> ServerTaskResult<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        if let Err(e) = writer.shutdown().await {
            debug!(
                "{} session {}: shutdown writer failed: {e}",
                self.name, self.client_addr
            );
        }
        r.map(|_| ()).map_err(map_err)
    }

    pub(crate) async fn run<CR, CW, UR, UW>(
        &self,
        mut clt_r: CR,
        mut clt_w: CW,
        mut ups_r: UR,
        mut ups_w: UW,
    ) -> (ServerTaskResult<()>, SpliceSize)
    where
        CR: AsyncRead + Unpin,
        CW: AsyncWrite + Unpin,
        UR: AsyncRead + Unpin,
        UW: AsyncWrite + Unpin,
    {
        let mut clt_to_ups = StreamCopy::new(&mut clt_r, &mut ups_w, self.config);
        let mut ups_to_clt = StreamCopy::new(&mut ups_r, &mut clt_w, self.config);

        // the direction that ends first is half closed, the other one is drained to its own end
        let (first, second) = tokio::select! {
            r = &mut clt_to_ups => {
                let north = self
                    .finish_copy(r, clt_to_ups.writer(), ServerTaskError::from_north_copy)
                    .await;
                debug!("{} session {}: client side finished", self.name, self.client_addr);
                let r = (&mut ups_to_clt).await;
                let south = self
                    .finish_copy(r, ups_to_clt.writer(), ServerTaskError::from_south_copy)
                    .await;
                (north, south)
            }
            r = &mut ups_to_clt => {
                let south = self
                    .finish_copy(r, ups_to_clt.writer(), ServerTaskError::from_south_copy)
                    .await;
                debug!("{} session {}: upstream side finished", self.name, self.client_addr);
                let r = (&mut clt_to_ups).await;
                let north = self
                    .finish_copy(r, clt_to_ups.writer(), ServerTaskError::from_north_copy)
                    .await;
                (south, north)
            }
        };
        let size = SpliceSize {
            clt_to_ups: clt_to_ups.copied_size(),
            ups_to_clt: ups_to_clt.copied_size(),
        };

        let r = match (first, second) {
            (Ok(_), Ok(_)) => Ok(()),
            (Err(e), Ok(_)) | (Ok(_), Err(e)) => Err(e),
            (Err(e), Err(e2)) => {
                debug!(
                    "{} session {}: both directions failed, second error: {e2}",
                    self.name, self.client_addr
                );
                Err(e)
            }
        };
        (r, size)
    }
}
