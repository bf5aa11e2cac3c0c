/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;

use http::header::InvalidHeaderValue;
use http::uri::InvalidUri;
use thiserror::Error;

use crate::serve::ServerTaskError;

#[derive(Error, Debug)]
pub enum HttpForwardError {
    #[error("invalid upstream uri: {0}")]
    InvalidUpstreamUri(#[from] InvalidUri),
    #[error("invalid header value: {0}")]
    InvalidHeaderValue(#[from] InvalidHeaderValue),
    #[error("upstream connect: {0}")]
    UpstreamConnectFailed(#[from] ServerTaskError),
    #[error("upstream tls handshake failed: {0:?}")]
    UpstreamTlsHandshakeFailed(io::Error),
    #[error("upstream http handshake failed: {0}")]
    UpstreamHandshakeFailed(hyper::Error),
    #[error("upstream request failed: {0}")]
    UpstreamRequestFailed(hyper::Error),
    #[error("upstream switched to protocol {0:?} which was not requested")]
    UpstreamUpgradeMismatch(Option<String>),
}

impl HttpForwardError {
    pub fn brief(&self) -> &'static str {
        match self {
            HttpForwardError::InvalidUpstreamUri(_) => "InvalidUpstreamUri",
            HttpForwardError::InvalidHeaderValue(_) => "InvalidHeaderValue",
            HttpForwardError::UpstreamConnectFailed(e) => e.brief(),
            HttpForwardError::UpstreamTlsHandshakeFailed(_) => "UpstreamTlsHandshakeFailed",
            HttpForwardError::UpstreamHandshakeFailed(_) => "UpstreamHandshakeFailed",
            HttpForwardError::UpstreamRequestFailed(_) => "UpstreamRequestFailed",
            HttpForwardError::UpstreamUpgradeMismatch(_) => "UpstreamUpgradeMismatch",
        }
    }
}
