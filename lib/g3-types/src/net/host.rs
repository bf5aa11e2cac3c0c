/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::fmt;
use std::net::{IpAddr, Ipv6Addr};
use std::str::FromStr;

use anyhow::anyhow;

/// The host part of an upstream address, either a literal ip or a domain name.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum Host {
    Ip(IpAddr),
    Domain(String),
}

impl Host {
    fn from_ip6(ip6: Ipv6Addr) -> Self {
        match ip6.to_ipv4_mapped() {
            Some(ip4) => Host::Ip(IpAddr::V4(ip4)),
            None => Host::Ip(IpAddr::V6(ip6)),
        }
    }

    fn from_domain(domain: &str) -> anyhow::Result<Self> {
        let domain = idna::domain_to_ascii(domain).map_err(|e| anyhow!("invalid domain: {e}"))?;
        if domain.is_empty() {
            return Err(anyhow!("empty domain"));
        }
        Ok(Host::Domain(domain))
    }

    /// Format the host for use in an authority component, with ipv6 in brackets.
    pub fn to_authority_string(&self) -> String {
        match self {
            Host::Ip(IpAddr::V6(ip6)) => format!("[{ip6}]"),
            Host::Ip(ip) => ip.to_string(),
            Host::Domain(domain) => domain.clone(),
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Host::Ip(ip) => write!(f, "{ip}"),
            Host::Domain(domain) => f.write_str(domain),
        }
    }
}

impl From<IpAddr> for Host {
    fn from(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => Host::Ip(ip),
            IpAddr::V6(ip6) => Host::from_ip6(ip6),
        }
    }
}

impl From<url::Host> for Host {
    fn from(v: url::Host) -> Self {
        match v {
            url::Host::Ipv4(ip4) => Host::Ip(IpAddr::V4(ip4)),
            url::Host::Ipv6(ip6) => Host::from_ip6(ip6),
            url::Host::Domain(domain) => Host::Domain(domain),
        }
    }
}

impl FromStr for Host {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(anyhow!("empty string"));
        }

        if let Some(inner) = s.strip_prefix('[') {
            let Some(ip6) = inner.strip_suffix(']') else {
                return Err(anyhow!("unclosed square bracket"));
            };
            return Ipv6Addr::from_str(ip6)
                .map(Host::from_ip6)
                .map_err(|_| anyhow!("invalid ipv6 address in square brackets"));
        }

        if let Ok(ip) = IpAddr::from_str(s) {
            return Ok(Host::from(ip));
        }
        if s.contains(':') {
            return Err(anyhow!("invalid ipv6 address"));
        }

        Host::from_domain(s)
    }
}
