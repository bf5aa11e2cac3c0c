/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use anyhow::{Context, anyhow};

use super::Host;

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct UpstreamAddr {
    host: Host,
    port: u16,
}

impl UpstreamAddr {
    pub fn new(host: Host, port: u16) -> Self {
        UpstreamAddr { host, port }
    }

    #[inline]
    pub fn host(&self) -> &Host {
        &self.host
    }

    #[inline]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get the socket address directly if the host is a literal ip.
    pub fn ip_socket_addr(&self) -> Option<SocketAddr> {
        match &self.host {
            Host::Ip(ip) => Some(SocketAddr::new(*ip, self.port)),
            Host::Domain(_) => None,
        }
    }
}

impl fmt::Display for UpstreamAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host.to_authority_string(), self.port)
    }
}

impl From<SocketAddr> for UpstreamAddr {
    fn from(addr: SocketAddr) -> Self {
        UpstreamAddr::new(Host::from(addr.ip()), addr.port())
    }
}

impl FromStr for UpstreamAddr {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = if s.starts_with('[') {
            let Some(pos) = s.find(']') else {
                return Err(anyhow!("unclosed square bracket"));
            };
            let port = s[pos + 1..]
                .strip_prefix(':')
                .ok_or_else(|| anyhow!("no port found"))?;
            (&s[..=pos], port)
        } else {
            let (host, port) = s.rsplit_once(':').ok_or_else(|| anyhow!("no port found"))?;
            if host.contains(':') {
                return Err(anyhow!("ipv6 address should be enclosed in square brackets"));
            }
            (host, port)
        };

        let port = u16::from_str(port).map_err(|e| anyhow!("invalid port {port}: {e}"))?;
        if port == 0 {
            return Err(anyhow!("port 0 is not allowed"));
        }
        let host = Host::from_str(host).context(format!("invalid host {host}"))?;
        Ok(UpstreamAddr { host, port })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

    #[test]
    fn parse_ip4() {
        let addr = UpstreamAddr::from_str("192.168.1.100:3306").unwrap();
        assert_eq!(addr.host(), &Host::Ip(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 100))));
        assert_eq!(addr.port(), 3306);
        assert_eq!(
            addr.ip_socket_addr(),
            Some(SocketAddr::from_str("192.168.1.100:3306").unwrap())
        );
        assert_eq!(addr.to_string(), "192.168.1.100:3306");
    }

    #[test]
    fn parse_ip6() {
        let addr = UpstreamAddr::from_str("[::1]:53").unwrap();
        assert_eq!(addr.host(), &Host::Ip(IpAddr::V6(Ipv6Addr::LOCALHOST)));
        assert_eq!(addr.port(), 53);
        assert_eq!(addr.to_string(), "[::1]:53");
    }

    #[test]
    fn parse_domain() {
        let addr = UpstreamAddr::from_str("db.example.net:5432").unwrap();
        assert_eq!(addr.host(), &Host::Domain("db.example.net".to_string()));
        assert!(addr.ip_socket_addr().is_none());
    }

    #[test]
    fn parse_invalid() {
        assert!(UpstreamAddr::from_str("").is_err());
        assert!(UpstreamAddr::from_str("example.net").is_err());
        assert!(UpstreamAddr::from_str("example.net:").is_err());
        assert!(UpstreamAddr::from_str("example.net:0").is_err());
        assert!(UpstreamAddr::from_str("example.net:65536").is_err());
        assert!(UpstreamAddr::from_str(":80").is_err());
        assert!(UpstreamAddr::from_str("::1:80").is_err());
        assert!(UpstreamAddr::from_str("[::1]80").is_err());
        assert!(UpstreamAddr::from_str("[::1:80").is_err());
    }
}
