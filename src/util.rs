use anyhow::{anyhow, Result};
use axum::http::{header, HeaderMap, Uri};
use log::info;
use percent_encoding::percent_decode_str;
use sha1::{Digest, Sha1};
use std::time::SystemTime;

// 带引号的sha1值，直接作为ETag使用
pub fn sha1_etag(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    format!("\"{}\"", hex::encode(hasher.finalize()))
}

// HTTP日期格式，例如 Sun, 06 Nov 1994 08:49:37 GMT
pub fn http_date(time: SystemTime) -> String {
    httpdate::fmt_http_date(time)
}

/// 访问日志里的请求路径：path[?query]
///
/// 片段不会随请求发送，`Uri`解析时也会丢弃，所以这里不处理
pub fn path_for_log(uri: &Uri) -> String {
    let mut buf = String::from(uri.path());
    if let Some(query) = uri.query() {
        if !query.is_empty() {
            buf.push('?');
            buf.push_str(query);
        }
    }
    buf
}

/// 取查询参数的第一个值，参数不存在时为空字符串
///
/// 重复的参数不算错误，后面的值被忽略。
pub fn query_param(uri: &Uri, key: &str) -> String {
    uri.query()
        .and_then(|query| {
            url::form_urlencoded::parse(query.as_bytes())
                .find(|(name, _)| name == key)
                .map(|(_, value)| value.into_owned())
        })
        .unwrap_or_default()
}

// 严格的查询参数解码，%后面不是两位十六进制时报错
pub fn query_unescape(value: &str) -> Result<String> {
    let bytes = value.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = i + 2 < bytes.len()
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit();
            if !valid {
                return Err(anyhow!("无效的转义序列: {}", value));
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    let replaced = value.replace('+', " ");
    Ok(percent_decode_str(&replaced).decode_utf8()?.into_owned())
}

pub fn user_agent(headers: &HeaderMap) -> &str {
    headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

pub fn access_log(enabled: bool, method: &str, uri: &Uri, status: u16, size: u64, ua: &str) {
    if enabled {
        info!(target: "access", "\"{} {}\" {} {} \"{}\"", method, path_for_log(uri), status, size, ua);
    }
}
