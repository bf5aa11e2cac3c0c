/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::IpAddr;

use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::{Request, Uri, Version};
use url::Url;

use super::HttpForwardError;
use crate::target::HttpTarget;

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Join two url paths with exactly one slash between them.
pub(super) fn join_url_path(a: &str, b: &str) -> String {
    match (a.ends_with('/'), b.starts_with('/')) {
        (true, true) => format!("{a}{}", &b[1..]),
        (false, false) => format!("{a}/{b}"),
        _ => format!("{a}{b}"),
    }
}

pub(super) fn merge_query(target: Option<&str>, request: Option<&str>) -> Option<String> {
    let target = target.filter(|s| !s.is_empty());
    let request = request.filter(|s| !s.is_empty());
    match (target, request) {
        (Some(t), Some(r)) => Some(format!("{t}&{r}")),
        (Some(q), None) | (None, Some(q)) => Some(q.to_string()),
        (None, None) => None,
    }
}

/// The origin-form request target to send to the upstream.
pub(super) fn upstream_path_and_query(target: &Url, uri: &Uri) -> String {
    let path = join_url_path(target.path(), uri.path());
    match merge_query(target.query(), uri.query()) {
        Some(query) => format!("{path}?{query}"),
        None => path,
    }
}

pub(super) fn remove_hop_by_hop_headers(headers: &mut HeaderMap) {
    let listed: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();
    for name in &listed {
        headers.remove(name.as_str());
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(*name);
    }
}

pub(super) fn append_forwarded_for(
    headers: &mut HeaderMap,
    client_ip: IpAddr,
) -> Result<(), HttpForwardError> {
    let prior: Vec<&str> = headers
        .get_all(&X_FORWARDED_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    let value = if prior.is_empty() {
        client_ip.to_string()
    } else {
        format!("{}, {client_ip}", prior.join(", "))
    };
    headers.insert(X_FORWARDED_FOR, HeaderValue::from_str(&value)?);
    Ok(())
}

/// The protocol named in `Upgrade` when `Connection` asks for an upgrade.
pub(super) fn upgrade_protocol(headers: &HeaderMap) -> Option<HeaderValue> {
    let wanted = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
    if wanted {
        headers.get(header::UPGRADE).cloned()
    } else {
        None
    }
}

/// Turn an inbound request into the request to send to the target.
pub(super) fn rewrite_request<B>(
    req: Request<B>,
    target: &HttpTarget,
    client_ip: IpAddr,
) -> Result<Request<B>, HttpForwardError> {
    let (mut parts, body) = req.into_parts();

    // a request in absolute-form carries its host in the uri
    let inbound_authority = parts.uri.authority().map(|a| a.to_string());
    let path_and_query = if target.is_secure() {
        parts
            .uri
            .path_and_query()
            .map(|p| p.as_str())
            .unwrap_or("/")
            .to_string()
    } else {
        upstream_path_and_query(target.url(), &parts.uri)
    };
    parts.uri = Uri::try_from(path_and_query)?;
    parts.version = Version::HTTP_11;

    let upgrade = upgrade_protocol(&parts.headers);
    remove_hop_by_hop_headers(&mut parts.headers);
    if let Some(protocol) = upgrade {
        parts
            .headers
            .insert(header::CONNECTION, HeaderValue::from_static("upgrade"));
        parts.headers.insert(header::UPGRADE, protocol);
    }

    let host = if target.is_secure() {
        Some(target.authority().to_string())
    } else if parts.headers.contains_key(header::HOST) {
        None
    } else {
        Some(inbound_authority.unwrap_or_else(|| target.authority().to_string()))
    };
    if let Some(host) = host {
        parts
            .headers
            .insert(header::HOST, HeaderValue::from_str(&host)?);
    }

    append_forwarded_for(&mut parts.headers, client_ip)?;
    Ok(Request::from_parts(parts, body))
}
