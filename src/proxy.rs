use axum::body::{Body, HttpBody};
use axum::extract::{ConnectInfo, Request};
use axum::http::header::{
    CONNECTION, HOST, PROXY_AUTHENTICATE, PROXY_AUTHORIZATION, TE, TRAILER,
    TRANSFER_ENCODING, UPGRADE,
};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::TryStreamExt;
use log::{debug, warn};
use std::io;
use std::net::SocketAddr;
use thiserror::Error;

use crate::metrics::MeteredStream;
use crate::service::FsService;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("无效的虚拟主机地址: {0}")]
    InvalidTarget(String),
    #[error("上游请求失败: {0}")]
    Upstream(#[source] reqwest::Error),
}

impl ProxyError {
    fn status(&self) -> StatusCode {
        match self {
            ProxyError::InvalidTarget(_) => StatusCode::NOT_FOUND,
            ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    name == CONNECTION
        || name == TE
        || name == TRAILER
        || name == TRANSFER_ENCODING
        || name == UPGRADE
        || name == PROXY_AUTHENTICATE
        || name == PROXY_AUTHORIZATION
        || matches!(name.as_str(), "keep-alive" | "proxy-connection")
}

/// 去掉逐跳头，包括Connection里点名的头
fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let named: Vec<String> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
        .collect();

    let mut out = HeaderMap::new();
    for (name, value) in headers {
        if is_hop_by_hop(name) || named.iter().any(|n| n == name.as_str()) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

pub fn target_url(vhost: &str, path_and_query: &str) -> Result<reqwest::Url, ProxyError> {
    let target = format!("http://{}{}", vhost, path_and_query);
    let url = reqwest::Url::parse(&target).map_err(|_| ProxyError::InvalidTarget(target.clone()))?;
    if url.host_str().map_or(true, str::is_empty) {
        return Err(ProxyError::InvalidTarget(target));
    }
    Ok(url)
}

fn append_forwarded_for(headers: &mut HeaderMap, peer: Option<SocketAddr>) {
    let Some(peer) = peer else {
        return;
    };
    let peer_ip = peer.ip().to_string();
    let combined = match headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        Some(existing) if !existing.trim().is_empty() => format!("{}, {}", existing.trim(), peer_ip),
        _ => peer_ip,
    };
    if let Ok(value) = HeaderValue::from_str(&combined) {
        headers.insert(HeaderName::from_static("x-forwarded-for"), value);
    }
}

async fn relay(service: &FsService, vhost: &str, request: Request) -> Result<Response, ProxyError> {
    let (parts, body) = request.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|p| p.as_str())
        .unwrap_or("/");
    let url = target_url(vhost, path_and_query)?;
    debug!("转发到虚拟主机: {} {}", parts.method, url);

    let mut headers = strip_hop_by_hop(&parts.headers);
    match HeaderValue::from_str(vhost) {
        Ok(value) => {
            headers.insert(HOST, value);
        }
        Err(_) => return Err(ProxyError::InvalidTarget(vhost.to_string())),
    }
    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    append_forwarded_for(&mut headers, peer);

    // 请求体边读边转发，不在内存里攒整个body
    let mut builder = service.client.request(parts.method, url).headers(headers);
    if body.size_hint().exact() != Some(0) {
        builder = builder.body(reqwest::Body::wrap_stream(body.into_data_stream()));
    }
    let upstream = builder.send().await.map_err(ProxyError::Upstream)?;

    let status = upstream.status();
    let response_headers = strip_hop_by_hop(upstream.headers());
    let stream = upstream.bytes_stream().map_err(io::Error::other);
    let body = Body::from_stream(MeteredStream::new(stream, service.metrics.clone()));

    let mut response = (status, body).into_response();
    *response.headers_mut() = response_headers;
    Ok(response)
}

/// 把请求原样转发到 http://<vhost>，响应流式返回
pub async fn forward(service: &FsService, vhost: &str, request: Request) -> Response {
    match relay(service, vhost, request).await {
        Ok(response) => response,
        Err(e) => {
            warn!("虚拟主机 {} 转发失败: {}", vhost, e);
            service.metrics.record_served(0);
            e.status().into_response()
        }
    }
}
