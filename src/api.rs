use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use log::{debug, error, trace};
use serde_json::json;
use std::sync::Arc;
use std::time::SystemTime;

use crate::constants::CACHE_CONTROL_REVALIDATE;
use crate::metrics::Metrics;
use crate::service::FsService;
use crate::util::{access_log, http_date, query_param, query_unescape, sha1_etag, user_agent};

pub(crate) fn insert_header(headers: &mut HeaderMap, name: header::HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(e) => error!("响应头构建失败: {} = {} - {}", name, value, e),
    }
}

pub(crate) fn if_none_match(headers: &HeaderMap) -> &str {
    headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

/// 带ETag的JSON响应，If-None-Match完全相等时返回304
///
/// 返回状态码和实际发送的字节数，调用方用来写访问日志；计数器在这里更新。
pub(crate) fn cacheable_json(
    metrics: &Metrics,
    request_headers: &HeaderMap,
    json: String,
    last_modified: SystemTime,
) -> (StatusCode, u64, Response) {
    let etag = sha1_etag(json.as_bytes());
    let mut headers = HeaderMap::new();
    insert_header(&mut headers, header::ETAG, &etag);
    insert_header(&mut headers, header::CACHE_CONTROL, CACHE_CONTROL_REVALIDATE);

    let inm = if_none_match(request_headers);
    if inm == etag {
        debug!("If-None-Match匹配: {}", etag);
        metrics.record_served(0);
        return (
            StatusCode::NOT_MODIFIED,
            0,
            (StatusCode::NOT_MODIFIED, headers).into_response(),
        );
    }

    debug!("If-None-Match ({}) 与ETag {} 不匹配", inm, etag);
    let size = json.len() as u64;
    insert_header(&mut headers, header::CONTENT_LENGTH, &size.to_string());
    insert_header(&mut headers, header::LAST_MODIFIED, &http_date(last_modified));
    insert_header(&mut headers, header::CONTENT_TYPE, "application/json");
    metrics.record_served(size);
    (
        StatusCode::OK,
        size,
        (StatusCode::OK, headers, Body::from(json)).into_response(),
    )
}

fn not_found_response(metrics: &Metrics) -> Response {
    metrics.record_served(0);
    StatusCode::NOT_FOUND.into_response()
}

pub async fn serve_shares(State(service): State<Arc<FsService>>, headers: HeaderMap) -> Response {
    if let Err(e) = service.shares.rescan().await {
        // 扫描失败时继续返回上一次的结果
        error!("扫描共享失败: {:#}", e);
    }
    let list = service.shares.list();
    debug!("共享请求: {} 个共享", list.shares.len());

    let json = match service.shares.serialize() {
        Ok(json) => json,
        Err(e) => {
            error!("共享序列化失败: {}", e);
            return not_found_response(&service.metrics);
        }
    };
    trace!("共享JSON: {}", json);

    let (_, _, response) =
        cacheable_json(&service.metrics, &headers, json, list.last_checked.into());
    response
}

pub async fn apps_list(State(service): State<Arc<FsService>>, headers: HeaderMap) -> Response {
    let apps = match service.apps.list().await {
        Ok(apps) => apps,
        Err(e) => {
            debug!("枚举应用失败: {:#}", e);
            return not_found_response(&service.metrics);
        }
    };
    debug!("应用请求: {} 个应用", apps.apps.len());

    let json = match apps.to_json() {
        Ok(json) => json,
        Err(e) => {
            error!("应用序列化失败: {}", e);
            return not_found_response(&service.metrics);
        }
    };
    trace!("应用JSON: {}", json);

    let (_, _, response) = cacheable_json(&service.metrics, &headers, json, SystemTime::now());
    response
}

pub async fn get_metadata(
    State(service): State<Arc<FsService>>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    let filename = match query_unescape(&query_param(&uri, "f")) {
        Ok(filename) => filename,
        Err(e) => {
            debug!("解析元数据文件名失败: {}", e);
            return not_found_response(&service.metrics);
        }
    };
    let hint = match query_unescape(&query_param(&uri, "h")) {
        Ok(hint) => hint,
        Err(e) => {
            debug!("解析元数据提示失败: {}", e);
            return not_found_response(&service.metrics);
        }
    };
    trace!("元数据查询: {} ({})", filename, hint);

    let json = match service.metadata.get_metadata(&filename, &hint).await {
        Ok(json) => json,
        Err(e) => {
            debug!("元数据查询失败: {:#}", e);
            return not_found_response(&service.metrics);
        }
    };
    trace!("元数据JSON: {}", json);

    let (_, _, response) = cacheable_json(&service.metrics, &headers, json, SystemTime::now());
    response
}

/// 运行状态快照，只读取计数器，不更新
pub async fn hda_debug(State(service): State<Arc<FsService>>) -> Response {
    let relay = service.info.relay.state();
    let snapshot = service.metrics.snapshot();

    let last_request = match snapshot.last_served {
        Some(time) if snapshot.served != 0 => http_date(time),
        _ => String::new(),
    };

    let body = json!({
        "goroutines": snapshot.active_tasks,
        "connected": relay.connected,
        "last_request": last_request,
        "received": snapshot.received,
        "served": snapshot.served,
        "outstanding": snapshot.outstanding(),
        "bytes_served": snapshot.bytes_served,
    });

    let mut headers = HeaderMap::new();
    insert_header(&mut headers, header::CONTENT_TYPE, "application/json");
    insert_header(&mut headers, header::CACHE_CONTROL, "no-store");
    (StatusCode::OK, headers, body.to_string()).into_response()
}

pub async fn not_found(
    State(service): State<Arc<FsService>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    access_log(
        !service.config.disable_access_log,
        method.as_str(),
        &uri,
        StatusCode::NOT_FOUND.as_u16(),
        0,
        user_agent(&headers),
    );
    not_found_response(&service.metrics)
}

/// 路径存在但方法不支持，和其他响应一样计数并写访问日志
pub async fn method_not_allowed(
    State(service): State<Arc<FsService>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    debug!("不支持的方法: {} {}", method, uri.path());
    service.metrics.record_served(0);
    access_log(
        !service.config.disable_access_log,
        method.as_str(),
        &uri,
        StatusCode::METHOD_NOT_ALLOWED.as_u16(),
        0,
        user_agent(&headers),
    );
    StatusCode::METHOD_NOT_ALLOWED.into_response()
}
