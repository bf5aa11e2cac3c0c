/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use hyper::body::Incoming;
use hyper::client::conn::http1::{self, SendRequest};
use hyper_util::rt::TokioIo;
use log::debug;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use g3_types::net::UpstreamAddr;

use super::{HttpForwardConfig, HttpForwardError};
use crate::serve::ServerTaskError;

struct TlsUpstream {
    connector: TlsConnector,
    server_name: ServerName<'static>,
}

fn tls_client_config() -> anyhow::Result<ClientConfig> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let mut config =
        ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| anyhow!("failed to set tls protocol versions: {e}"))?
            .with_root_certificates(roots)
            .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(config)
}

async fn handshake<S>(stream: S) -> Result<SendRequest<Incoming>, HttpForwardError>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (sender, conn) = http1::handshake(TokioIo::new(stream))
        .await
        .map_err(HttpForwardError::UpstreamHandshakeFailed)?;
    tokio::spawn(async move {
        if let Err(e) = conn.with_upgrades().await {
            debug!("http upstream connection closed with error: {e}");
        }
    });
    Ok(sender)
}

/// Opens one fresh upstream connection per forwarded request.
pub(super) struct HttpUpstreamConnector {
    upstream: UpstreamAddr,
    connect_timeout: Duration,
    tls: Option<TlsUpstream>,
}

impl HttpUpstreamConnector {
    pub(super) fn new(config: &HttpForwardConfig) -> anyhow::Result<Self> {
        let upstream = config.target.upstream().clone();
        let tls = if config.target.is_secure() {
            let tls_config = tls_client_config()?;
            let server_name = ServerName::try_from(upstream.host().to_string())
                .map_err(|e| anyhow!("invalid tls server name {}: {e}", upstream.host()))?;
            Some(TlsUpstream {
                connector: TlsConnector::from(Arc::new(tls_config)),
                server_name,
            })
        } else {
            None
        };

        Ok(HttpUpstreamConnector {
            upstream,
            connect_timeout: config.connect_timeout,
            tls,
        })
    }

    pub(super) async fn connect(&self) -> Result<SendRequest<Incoming>, HttpForwardError> {
        let stream = match tokio::time::timeout(self.connect_timeout, self.connect_tcp()).await {
            Ok(r) => r?,
            Err(_) => {
                return Err(ServerTaskError::UpstreamConnectTimeout(self.connect_timeout).into());
            }
        };

        match &self.tls {
            Some(tls) => {
                let tls_stream = match tokio::time::timeout(
                    self.connect_timeout,
                    tls.connector.connect(tls.server_name.clone(), stream),
                )
                .await
                {
                    Ok(r) => r.map_err(HttpForwardError::UpstreamTlsHandshakeFailed)?,
                    Err(_) => {
                        return Err(HttpForwardError::UpstreamTlsHandshakeFailed(io::Error::new(
                            io::ErrorKind::TimedOut,
                            "tls handshake timeout",
                        )));
                    }
                };
                handshake(tls_stream).await
            }
            None => handshake(stream).await,
        }
    }

    async fn connect_tcp(&self) -> Result<TcpStream, ServerTaskError> {
        let addrs = crate::serve::resolve_upstream(&self.upstream).await?;
        TcpStream::connect(&addrs[..])
            .await
            .map_err(ServerTaskError::UpstreamNotConnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    use crate::target::Target;

    fn config(s: &str) -> HttpForwardConfig {
        match Target::from_str(s).unwrap() {
            Target::Http(t) => HttpForwardConfig::new(t),
            _ => panic!("not a http target"),
        }
    }

    #[test]
    fn build_tls_config() {
        let config = tls_client_config().unwrap();
        assert_eq!(config.alpn_protocols, vec![b"http/1.1".to_vec()]);
    }

    #[test]
    fn new_connector() {
        let connector = HttpUpstreamConnector::new(&config("http://127.0.0.1:8000")).unwrap();
        assert!(connector.tls.is_none());

        let connector = HttpUpstreamConnector::new(&config("https://example.com")).unwrap();
        let tls = connector.tls.unwrap();
        assert_eq!(
            tls.server_name,
            ServerName::try_from("example.com".to_string()).unwrap()
        );
        assert_eq!(connector.upstream.port(), 443);

        let connector = HttpUpstreamConnector::new(&config("https://[::1]:8443")).unwrap();
        assert!(connector.tls.is_some());
    }

    #[tokio::test]
    async fn connect_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let connector =
            HttpUpstreamConnector::new(&config(&format!("http://127.0.0.1:{port}"))).unwrap();
        let e = connector.connect().await.unwrap_err();
        assert_eq!(e.brief(), "UpstreamNotConnected");
    }
}
