/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;
use std::time::Duration;

use thiserror::Error;

use g3_io_ext::StreamCopyError;

#[derive(Error, Debug)]
pub enum ServerTaskError {
    #[error("upstream not resolved: {0:?}")]
    UpstreamNotResolved(io::Error),
    #[error("upstream not connected: {0:?}")]
    UpstreamNotConnected(io::Error),
    #[error("upstream connect timeout after {0:?}")]
    UpstreamConnectTimeout(Duration),
    #[error("tcp read from client: {0:?}")]
    ClientTcpReadFailed(io::Error),
    #[error("tcp write to client: {0:?}")]
    ClientTcpWriteFailed(io::Error),
    #[error("read from upstream: {0:?}")]
    UpstreamReadFailed(io::Error),
    #[error("write to upstream: {0:?}")]
    UpstreamWriteFailed(io::Error),
    #[error("udp send to client: {0:?}")]
    ClientUdpSendFailed(io::Error),
    #[error("udp recv from upstream: {0:?}")]
    UpstreamUdpRecvFailed(io::Error),
    #[error("udp send to upstream: {0:?}")]
    UpstreamUdpSendFailed(io::Error),
    #[error("udp setup socket: {0:?}")]
    UpstreamUdpSetupFailed(io::Error),
    #[error("canceled as session removed")]
    CanceledAsSessionRemoved,
    #[error("idle after {0:?}")]
    Idle(Duration),
    #[error("finished")]
    Finished, // this isn't an error, for log only
}

impl ServerTaskError {
    pub fn brief(&self) -> &'static str {
        match self {
            ServerTaskError::UpstreamNotResolved(_) => "UpstreamNotResolved",
            ServerTaskError::UpstreamNotConnected(_) => "UpstreamNotConnected",
            ServerTaskError::UpstreamConnectTimeout(_) => "UpstreamConnectTimeout",
            ServerTaskError::ClientTcpReadFailed(_) => "ClientTcpReadFailed",
            ServerTaskError::ClientTcpWriteFailed(_) => "ClientTcpWriteFailed",
            ServerTaskError::UpstreamReadFailed(_) => "UpstreamReadFailed",
            ServerTaskError::UpstreamWriteFailed(_) => "UpstreamWriteFailed",
            ServerTaskError::ClientUdpSendFailed(_) => "ClientUdpSendFailed",
            ServerTaskError::UpstreamUdpRecvFailed(_) => "UpstreamUdpRecvFailed",
            ServerTaskError::UpstreamUdpSendFailed(_) => "UpstreamUdpSendFailed",
            ServerTaskError::UpstreamUdpSetupFailed(_) => "UpstreamUdpSetupFailed",
            ServerTaskError::CanceledAsSessionRemoved => "CanceledAsSessionRemoved",
            ServerTaskError::Idle(_) => "Idle",
            ServerTaskError::Finished => "Finished",
        }
    }

    /// Map a copy error of the client to upstream direction.
    pub(crate) fn from_north_copy(e: StreamCopyError) -> Self {
        match e {
            StreamCopyError::ReadFailed(e) => ServerTaskError::ClientTcpReadFailed(e),
            StreamCopyError::WriteFailed(e) => ServerTaskError::UpstreamWriteFailed(e),
        }
    }

    /// Map a copy error of the upstream to client direction.
    pub(crate) fn from_south_copy(e: StreamCopyError) -> Self {
        match e {
            StreamCopyError::ReadFailed(e) => ServerTaskError::UpstreamReadFailed(e),
            StreamCopyError::WriteFailed(e) => ServerTaskError::ClientTcpWriteFailed(e),
        }
    }
}

pub type ServerTaskResult<T> = Result<T, ServerTaskError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_error_direction() {
        let e = ServerTaskError::from_north_copy(StreamCopyError::ReadFailed(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "reset",
        )));
        assert_eq!(e.brief(), "ClientTcpReadFailed");

        let e = ServerTaskError::from_north_copy(StreamCopyError::WriteFailed(io::Error::new(
            io::ErrorKind::BrokenPipe,
            "pipe",
        )));
        assert_eq!(e.brief(), "UpstreamWriteFailed");

        let e = ServerTaskError::from_south_copy(StreamCopyError::ReadFailed(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "reset",
        )));
        assert_eq!(e.brief(), "UpstreamReadFailed");

        let e = ServerTaskError::from_south_copy(StreamCopyError::WriteFailed(io::Error::new(
            io::ErrorKind::BrokenPipe,
            "pipe",
        )));
        assert_eq!(e.brief(), "ClientTcpWriteFailed");
    }
}
