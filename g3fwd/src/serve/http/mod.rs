/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{Request, Response, StatusCode, header};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use log::{debug, info, warn};
use tokio::net::{TcpListener, TcpStream};

use g3_io_ext::StreamCopyConfig;

use crate::serve::splice::Splice;
use crate::target::HttpTarget;

mod error;
pub use error::HttpForwardError;

mod connect;
use connect::HttpUpstreamConnector;

mod rewrite;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

pub type ForwardBody = BoxBody<Bytes, hyper::Error>;

#[derive(Clone, Debug)]
pub struct HttpForwardConfig {
    target: HttpTarget,
    connect_timeout: Duration,
    copy: StreamCopyConfig,
}

impl HttpForwardConfig {
    pub fn new(target: HttpTarget) -> Self {
        HttpForwardConfig {
            target,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            copy: StreamCopyConfig::default(),
        }
    }

    #[inline]
    pub fn target(&self) -> &HttpTarget {
        &self.target
    }

    /// The Host header is replaced by the target authority for https targets.
    #[inline]
    pub fn force_host(&self) -> bool {
        self.target.is_secure()
    }

    pub fn set_connect_timeout(&mut self, timeout: Duration) {
        self.connect_timeout = timeout;
    }
}

struct HttpForwardContext {
    config: HttpForwardConfig,
    connector: HttpUpstreamConnector,
}

impl HttpForwardContext {
    async fn forward(
        &self,
        req: Request<Incoming>,
        client_addr: SocketAddr,
    ) -> Response<ForwardBody> {
        let method = req.method().clone();
        let uri = req.uri().clone();
        match self.try_forward(req, client_addr).await {
            Ok(rsp) => {
                debug!(
                    "http {method} {uri} from {client_addr} -> {}",
                    rsp.status()
                );
                rsp
            }
            Err(e) => {
                warn!(
                    "http {method} {uri} from {client_addr} to {} failed: {} {e}",
                    self.config.target.url(),
                    e.brief()
                );
                bad_gateway()
            }
        }
    }

    async fn try_forward(
        &self,
        mut req: Request<Incoming>,
        client_addr: SocketAddr,
    ) -> Result<Response<ForwardBody>, HttpForwardError> {
        let upgrade = rewrite::upgrade_protocol(req.headers())
            .map(|protocol| (protocol, hyper::upgrade::on(&mut req)));

        let req = rewrite::rewrite_request(req, &self.config.target, client_addr.ip())?;
        let mut sender = self.connector.connect().await?;
        let mut rsp = sender
            .send_request(req)
            .await
            .map_err(HttpForwardError::UpstreamRequestFailed)?;

        if rsp.status() == StatusCode::SWITCHING_PROTOCOLS {
            let switched = rsp.headers().get(header::UPGRADE);
            let Some((protocol, clt_upgrade)) = upgrade.filter(|(protocol, _)| {
                switched.is_some_and(|v| v.as_bytes().eq_ignore_ascii_case(protocol.as_bytes()))
            }) else {
                let switched = switched
                    .and_then(|v| v.to_str().ok())
                    .map(|v| v.to_string());
                return Err(HttpForwardError::UpstreamUpgradeMismatch(switched));
            };

            let ups_upgrade = hyper::upgrade::on(&mut rsp);
            debug!("http upgrade from {client_addr} switched to {protocol:?}");
            tokio::spawn(splice_upgraded(
                clt_upgrade,
                ups_upgrade,
                client_addr,
                self.config.copy,
            ));
            // the switching response keeps its Connection and Upgrade headers
            let (parts, body) = rsp.into_parts();
            return Ok(Response::from_parts(parts, body.boxed()));
        }

        let (mut parts, body) = rsp.into_parts();
        rewrite::remove_hop_by_hop_headers(&mut parts.headers);
        Ok(Response::from_parts(parts, body.boxed()))
    }
}

/// Relay the raw streams of both sides once the upgrade completes.
async fn splice_upgraded(
    clt_upgrade: OnUpgrade,
    ups_upgrade: OnUpgrade,
    client_addr: SocketAddr,
    copy: StreamCopyConfig,
) {
    let (clt_io, ups_io) = match tokio::try_join!(clt_upgrade, ups_upgrade) {
        Ok(v) => v,
        Err(e) => {
            warn!("http upgrade from {client_addr} not completed: {e}");
            return;
        }
    };

    let (clt_r, clt_w) = tokio::io::split(TokioIo::new(clt_io));
    let (ups_r, ups_w) = tokio::io::split(TokioIo::new(ups_io));
    let splice = Splice::new("http upgrade", client_addr, &copy);
    let (r, size) = splice.run(clt_r, clt_w, ups_r, ups_w).await;
    match r {
        Ok(_) => info!(
            "http upgrade session {client_addr} finished, sent {} received {}",
            size.clt_to_ups, size.ups_to_clt
        ),
        Err(e) => warn!(
            "http upgrade session {client_addr} closed, sent {} received {}: {} {e}",
            size.clt_to_ups,
            size.ups_to_clt,
            e.brief()
        ),
    }
}

fn bad_gateway() -> Response<ForwardBody> {
    let body = Full::new(Bytes::from_static(b"Bad Gateway\n"))
        .map_err(|never| match never {})
        .boxed();
    let mut rsp = Response::new(body);
    *rsp.status_mut() = StatusCode::BAD_GATEWAY;
    rsp
}

pub struct HttpForwardServer {
    listener: TcpListener,
    ctx: Arc<HttpForwardContext>,
}

impl HttpForwardServer {
    pub async fn bind(addr: SocketAddr, config: HttpForwardConfig) -> anyhow::Result<Self> {
        let connector = HttpUpstreamConnector::new(&config)?;
        let listener = TcpListener::bind(addr).await?;
        Ok(HttpForwardServer {
            listener,
            ctx: Arc::new(HttpForwardContext { config, connector }),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(self) {
        if let Ok(addr) = self.listener.local_addr() {
            info!(
                "http forwarder listening on {addr}, target {}",
                self.ctx.config.target.url()
            );
        }

        loop {
            match self.listener.accept().await {
                Ok((stream, client_addr)) => {
                    tokio::spawn(serve_connection(stream, client_addr, self.ctx.clone()));
                }
                Err(e) => {
                    warn!("http accept failed: {e}");
                }
            }
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    client_addr: SocketAddr,
    ctx: Arc<HttpForwardContext>,
) {
    let service = service_fn(move |req: Request<Incoming>| {
        let ctx = ctx.clone();
        async move { Ok::<_, Infallible>(ctx.forward(req, client_addr).await) }
    });

    if let Err(e) = http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .with_upgrades()
        .await
    {
        debug!("http connection from {client_addr} closed with error: {e}");
    }
}
