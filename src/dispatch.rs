use axum::extract::{Request, State};
use axum::http::header::{USER_AGENT, VARY};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use futures::FutureExt;
use log::{error, log_enabled, trace, Level};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::proxy;
use crate::service::FsService;

const VHOST_PREFIX: &str = "Vhost/";

/// 请求的去向：本地API，或者转发到某个虚拟主机
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Api,
    ProxyTo(String),
}

impl Route {
    /// 从User-Agent里找 `Vhost/<token>`，token是紧随其后的一串非空白字符
    pub fn from_user_agent(ua: &str) -> Route {
        let Some(start) = ua.find(VHOST_PREFIX) else {
            return Route::Api;
        };
        let rest = &ua[start + VHOST_PREFIX.len()..];
        let token: &str = rest
            .split(char::is_whitespace)
            .next()
            .unwrap_or_default();
        if token.is_empty() {
            Route::Api
        } else {
            Route::ProxyTo(token.to_string())
        }
    }

    pub fn from_headers(headers: &HeaderMap) -> Route {
        match headers.get(USER_AGENT).map(|v| v.to_str()) {
            Some(Ok(ua)) => Route::from_user_agent(ua),
            _ => Route::Api,
        }
    }
}

fn dump_request(request: &Request) {
    if !log_enabled!(Level::Trace) {
        return;
    }
    let mut dump = format!("{} {} {:?}\n", request.method(), request.uri(), request.version());
    for (name, value) in request.headers() {
        dump.push_str(&format!("{}: {}\n", name, value.to_str().unwrap_or("<binary>")));
    }
    if request.method() == Method::POST {
        dump.push_str("<body omitted>");
    }
    trace!("请求内容:\n{}", dump);
}

/// 所有请求的入口：计数、分流、捕获处理函数里的panic
pub async fn top_vhost_filter(
    State(service): State<Arc<FsService>>,
    request: Request,
    next: Next,
) -> Response {
    service.metrics.record_received();
    let _task = service.metrics.track_task();
    dump_request(&request);

    let route = Route::from_headers(request.headers());
    let mut response = match &route {
        Route::Api => match AssertUnwindSafe(next.run(request)).catch_unwind().await {
            Ok(response) => response,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!("处理请求时发生panic: {}", message);
                service.metrics.record_served(0);
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        },
        Route::ProxyTo(vhost) => {
            let mut response = proxy::forward(&service, vhost, request).await;
            response
                .headers_mut()
                .append(VARY, HeaderValue::from_static("User-Agent"));
            response
        }
    };

    response
        .headers_mut()
        .append(VARY, HeaderValue::from_static("Session"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vhost_token_is_extracted() {
        assert_eq!(
            Route::from_user_agent("Vhost/app1"),
            Route::ProxyTo("app1".to_string())
        );
        assert_eq!(
            Route::from_user_agent("Mozilla/5.0 Vhost/wiki.local:8080 Safari"),
            Route::ProxyTo("wiki.local:8080".to_string())
        );
    }

    #[test]
    fn missing_or_empty_token_routes_to_api() {
        assert_eq!(Route::from_user_agent("Mozilla/5.0"), Route::Api);
        assert_eq!(Route::from_user_agent(""), Route::Api);
        assert_eq!(Route::from_user_agent("Vhost/ trailing"), Route::Api);
        assert_eq!(Route::from_user_agent("Vhost/"), Route::Api);
    }

    #[test]
    fn headers_without_user_agent_route_to_api() {
        let headers = HeaderMap::new();
        assert_eq!(Route::from_headers(&headers), Route::Api);

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("Vhost/app1"));
        assert_eq!(
            Route::from_headers(&headers),
            Route::ProxyTo("app1".to_string())
        );
    }
}
