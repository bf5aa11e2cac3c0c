/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use url::Url;

use g3_types::net::{Host, UpstreamAddr};

const SCHEME_HTTP: &str = "http://";
const SCHEME_HTTPS: &str = "https://";
const SCHEME_TCP: &str = "tcp://";
const SCHEME_UDP: &str = "udp://";

#[derive(Error, Debug)]
pub enum TargetParseError {
    #[error("empty target")]
    Empty,
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("no host found in url")]
    NoHost,
    #[error("unsupported scheme in target {0}")]
    UnsupportedScheme(String),
    #[error("invalid upstream address: {0:?}")]
    InvalidAddress(anyhow::Error),
}

#[derive(Clone, Debug)]
pub struct HttpTarget {
    url: Url,
    upstream: UpstreamAddr,
    authority: String,
}

impl HttpTarget {
    fn parse(s: &str) -> Result<Self, TargetParseError> {
        let url = Url::parse(s)?;
        let host = url.host().ok_or(TargetParseError::NoHost)?;
        let host = Host::from(host.to_owned());
        let Some(port) = url.port_or_known_default() else {
            return Err(TargetParseError::NoHost);
        };

        let authority = match url.port() {
            Some(port) => format!("{}:{port}", host.to_authority_string()),
            None => host.to_authority_string(),
        };
        Ok(HttpTarget {
            url,
            upstream: UpstreamAddr::new(host, port),
            authority,
        })
    }

    #[inline]
    pub fn url(&self) -> &Url {
        &self.url
    }

    #[inline]
    pub fn is_secure(&self) -> bool {
        self.url.scheme() == "https"
    }

    /// The address to dial, with the default port filled in.
    #[inline]
    pub fn upstream(&self) -> &UpstreamAddr {
        &self.upstream
    }

    /// `host[:port]` as written in the target url.
    #[inline]
    pub fn authority(&self) -> &str {
        &self.authority
    }
}

#[derive(Clone, Debug)]
pub enum Target {
    Http(HttpTarget),
    Tcp(UpstreamAddr),
    Udp(UpstreamAddr),
}

impl Target {
    pub fn transport(&self) -> &'static str {
        match self {
            Target::Http(t) if t.is_secure() => "https",
            Target::Http(_) => "http",
            Target::Tcp(_) => "tcp",
            Target::Udp(_) => "udp",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Http(t) => write!(f, "{}", t.url),
            Target::Tcp(addr) => write!(f, "{SCHEME_TCP}{addr}"),
            Target::Udp(addr) => write!(f, "{SCHEME_UDP}{addr}"),
        }
    }
}

impl FromStr for Target {
    type Err = TargetParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(TargetParseError::Empty);
        }

        if s.starts_with(SCHEME_HTTP) || s.starts_with(SCHEME_HTTPS) {
            HttpTarget::parse(s).map(Target::Http)
        } else if let Some(addr) = s.strip_prefix(SCHEME_TCP) {
            UpstreamAddr::from_str(addr)
                .map(Target::Tcp)
                .map_err(TargetParseError::InvalidAddress)
        } else if let Some(addr) = s.strip_prefix(SCHEME_UDP) {
            UpstreamAddr::from_str(addr)
                .map(Target::Udp)
                .map_err(TargetParseError::InvalidAddress)
        } else {
            Err(TargetParseError::UnsupportedScheme(s.to_string()))
        }
    }
}
