use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, State};
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use log::{debug, error, trace};
use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;

use crate::api::{cacheable_json, if_none_match, insert_header};
use crate::constants::{CACHE_CONTROL_REVALIDATE, UPLOAD_MEMORY_LIMIT};
use crate::metrics::MeteredStream;
use crate::resolver::full_path_to_file;
use crate::service::FsService;
use crate::types::DirectoryEntry;
use crate::util::{access_log, http_date, query_param, sha1_etag, user_agent};

/// 单个请求的上下文，负责写访问日志和更新计数器
struct Exchange<'a> {
    service: &'a FsService,
    method: &'static str,
    uri: &'a Uri,
    ua: &'a str,
}

impl Exchange<'_> {
    fn log(&self, status: StatusCode, size: u64) {
        access_log(
            !self.service.config.disable_access_log,
            self.method,
            self.uri,
            status.as_u16(),
            size,
            self.ua,
        );
    }

    // 没有响应体的结果，记0字节
    fn finish(&self, status: StatusCode) -> Response {
        self.service.metrics.record_served(0);
        self.log(status, 0);
        status.into_response()
    }
}

pub async fn serve_file(
    State(service): State<Arc<FsService>>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    let exchange = Exchange {
        service: &service,
        method: "GET",
        uri: &uri,
        ua: user_agent(&headers),
    };
    debug!("serve_file GET请求");
    let share = query_param(&uri, "s");
    let relative = query_param(&uri, "p");

    let full_path = match full_path_to_file(service.shares.as_ref(), &share, &relative) {
        Ok(path) => path,
        Err(e) => {
            debug!("文件不存在: {}", e);
            return exchange.finish(StatusCode::NOT_FOUND);
        }
    };

    let file = match File::open(&full_path).await {
        Ok(file) => file,
        Err(e) => {
            debug!("打开文件失败: {} - {}", full_path, e);
            return exchange.finish(StatusCode::NOT_FOUND);
        }
    };

    // 打开后的元数据已经跟随了符号链接
    let metadata = match file.metadata().await {
        Ok(metadata) => metadata,
        Err(e) => {
            debug!("读取文件元数据失败: {} - {}", full_path, e);
            return exchange.finish(StatusCode::NOT_FOUND);
        }
    };
    let modified = metadata.modified().unwrap_or(UNIX_EPOCH);

    if metadata.is_dir() {
        drop(file);
        let json = match dir_to_json(Path::new(&full_path)).await {
            Ok(json) => json,
            Err(e) => {
                debug!("目录转换JSON失败: {:#}", e);
                return exchange.finish(StatusCode::NOT_FOUND);
            }
        };
        trace!("{}", json);
        let (status, size, response) = cacheable_json(&service.metrics, &headers, json, modified);
        exchange.log(status, size);
        return response;
    }

    // 文件的ETag用相对路径加修改时间计算，避免每次读取整个文件
    let mtime = http_date(modified);
    let etag = sha1_etag(format!("{}{}", relative, mtime).as_bytes());

    let mut response_headers = HeaderMap::new();
    insert_header(&mut response_headers, header::ETAG, &etag);
    insert_header(&mut response_headers, header::CACHE_CONTROL, CACHE_CONTROL_REVALIDATE);

    if !preconditions_hold(&headers, &etag, modified) {
        debug!("If-Match/If-Unmodified-Since不满足: {}", etag);
        service.metrics.record_served(0);
        exchange.log(StatusCode::PRECONDITION_FAILED, 0);
        return (StatusCode::PRECONDITION_FAILED, response_headers).into_response();
    }

    let inm = if_none_match(&headers);
    if !inm.is_empty() && etag_list_matches(inm, &etag, false) {
        debug!("If-None-Match匹配: {}", etag);
        service.metrics.record_served(0);
        exchange.log(StatusCode::NOT_MODIFIED, 0);
        return (StatusCode::NOT_MODIFIED, response_headers).into_response();
    }

    // If-None-Match存在时忽略If-Modified-Since
    if inm.is_empty() && not_modified_since(&headers, modified) {
        service.metrics.record_served(0);
        exchange.log(StatusCode::NOT_MODIFIED, 0);
        return (StatusCode::NOT_MODIFIED, response_headers).into_response();
    }

    insert_header(&mut response_headers, header::LAST_MODIFIED, &mtime);
    insert_header(&mut response_headers, header::ACCEPT_RANGES, "bytes");
    let mime = mime_guess::from_path(&full_path).first_or_octet_stream();
    insert_header(&mut response_headers, header::CONTENT_TYPE, mime.essence_str());
    debug!("发送ETag: {}", etag);

    let file_size = metadata.len();
    let range = if if_range_matches(&headers, &etag, modified) {
        parse_range(headers.get(header::RANGE).and_then(|v| v.to_str().ok()), file_size)
    } else {
        ByteRange::Full
    };

    match range {
        ByteRange::Full => {
            insert_header(&mut response_headers, header::CONTENT_LENGTH, &file_size.to_string());
            let stream = MeteredStream::new(ReaderStream::new(file), service.metrics.clone());
            exchange.log(StatusCode::OK, file_size);
            (StatusCode::OK, response_headers, Body::from_stream(stream)).into_response()
        }
        ByteRange::Partial(start, end) => {
            let length = end - start + 1;
            let mut file = file;
            if let Err(e) = file.seek(SeekFrom::Start(start)).await {
                error!("文件定位失败: {} - {}", full_path, e);
                return exchange.finish(StatusCode::INTERNAL_SERVER_ERROR);
            }
            insert_header(
                &mut response_headers,
                header::CONTENT_RANGE,
                &format!("bytes {}-{}/{}", start, end, file_size),
            );
            insert_header(&mut response_headers, header::CONTENT_LENGTH, &length.to_string());
            let stream =
                MeteredStream::new(ReaderStream::new(file.take(length)), service.metrics.clone());
            exchange.log(StatusCode::PARTIAL_CONTENT, length);
            (StatusCode::PARTIAL_CONTENT, response_headers, Body::from_stream(stream)).into_response()
        }
        ByteRange::Unsatisfiable => {
            insert_header(
                &mut response_headers,
                header::CONTENT_RANGE,
                &format!("bytes */{}", file_size),
            );
            service.metrics.record_served(0);
            exchange.log(StatusCode::RANGE_NOT_SATISFIABLE, 0);
            (StatusCode::RANGE_NOT_SATISFIABLE, response_headers).into_response()
        }
    }
}

/// 目录内容转为JSON数组，按名称排序保证同样的内容得到同样的ETag
pub async fn dir_to_json(path: &Path) -> Result<String> {
    let mut entries = fs::read_dir(path)
        .await
        .with_context(|| format!("读取目录失败: {}", path.display()))?;

    let mut list = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        // 优先跟随符号链接，失效的链接退回链接本身
        let metadata = match fs::metadata(entry.path()).await {
            Ok(metadata) => metadata,
            Err(_) => entry.metadata().await?,
        };
        list.push(DirectoryEntry {
            name: entry.file_name().to_string_lossy().to_string(),
            size: metadata.len(),
            mtime: metadata.modified().map(http_date).unwrap_or_default(),
            is_dir: metadata.is_dir(),
        });
    }
    list.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(serde_json::to_string(&list)?)
}

fn unix_secs(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

fn header_date(headers: &HeaderMap, name: header::HeaderName) -> Option<SystemTime> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| httpdate::parse_http_date(v).ok())
}

// HTTP日期只精确到秒
fn not_modified_since(headers: &HeaderMap, modified: SystemTime) -> bool {
    match header_date(headers, header::IF_MODIFIED_SINCE) {
        Some(since) => unix_secs(modified) <= unix_secs(since),
        None => false,
    }
}

/// 逗号分隔的ETag列表里有没有匹配项，`*`匹配任何ETag
///
/// `strong`为true时弱ETag(`W/`)永远不匹配，否则忽略`W/`前缀比较。
pub fn etag_list_matches(list: &str, etag: &str, strong: bool) -> bool {
    let etag_weak = etag.starts_with("W/");
    let opaque = etag.trim_start_matches("W/");
    list.split(',').map(str::trim).any(|candidate| {
        if candidate == "*" {
            return true;
        }
        if strong {
            !etag_weak && !candidate.starts_with("W/") && candidate == etag
        } else {
            candidate.trim_start_matches("W/") == opaque
        }
    })
}

/// If-Match优先于If-Unmodified-Since，不满足时返回false
fn preconditions_hold(headers: &HeaderMap, etag: &str, modified: SystemTime) -> bool {
    if let Some(value) = headers.get(header::IF_MATCH).and_then(|v| v.to_str().ok()) {
        return etag_list_matches(value, etag, true);
    }
    match header_date(headers, header::IF_UNMODIFIED_SINCE) {
        Some(since) => unix_secs(modified) <= unix_secs(since),
        None => true,
    }
}

fn if_range_matches(headers: &HeaderMap, etag: &str, modified: SystemTime) -> bool {
    let Some(value) = headers.get(header::IF_RANGE).and_then(|v| v.to_str().ok()) else {
        return true;
    };
    // If-Range只接受强比较
    if value.starts_with('"') || value.starts_with("W/") {
        return !value.starts_with("W/") && value == etag;
    }
    match httpdate::parse_http_date(value) {
        Ok(date) => http_date(modified) == http_date(date),
        Err(_) => false,
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ByteRange {
    Full,
    Partial(u64, u64),
    Unsatisfiable,
}

/// 解析单个Range，多段Range按完整内容返回
pub fn parse_range(value: Option<&str>, file_size: u64) -> ByteRange {
    let Some(value) = value else {
        return ByteRange::Full;
    };
    let Some(range) = value.trim().strip_prefix("bytes=") else {
        return ByteRange::Unsatisfiable;
    };
    if range.contains(',') {
        return ByteRange::Full;
    }
    if file_size == 0 {
        return ByteRange::Unsatisfiable;
    }

    let Some((start_part, end_part)) = range.trim().split_once('-') else {
        return ByteRange::Unsatisfiable;
    };

    if start_part.is_empty() {
        // bytes=-N 表示最后N个字节
        let Ok(suffix) = end_part.parse::<u64>() else {
            return ByteRange::Unsatisfiable;
        };
        if suffix == 0 {
            return ByteRange::Unsatisfiable;
        }
        let start = file_size.saturating_sub(suffix);
        return ByteRange::Partial(start, file_size - 1);
    }

    let Ok(start) = start_part.parse::<u64>() else {
        return ByteRange::Unsatisfiable;
    };
    let end = if end_part.is_empty() {
        file_size - 1
    } else {
        match end_part.parse::<u64>() {
            Ok(end) => end.min(file_size - 1),
            Err(_) => return ByteRange::Unsatisfiable,
        }
    };

    if start >= file_size || start > end {
        return ByteRange::Unsatisfiable;
    }
    ByteRange::Partial(start, end)
}

pub async fn delete_file(
    State(service): State<Arc<FsService>>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    let exchange = Exchange {
        service: &service,
        method: "DELETE",
        uri: &uri,
        ua: user_agent(&headers),
    };
    debug!("delete_file DELETE请求");
    let share = query_param(&uri, "s");
    let relative = query_param(&uri, "p");

    let full_path = full_path_to_file(service.shares.as_ref(), &share, &relative);

    // 演示模式下直接返回成功，不删除任何文件
    if service.config.no_delete {
        match &full_path {
            Ok(path) => debug!("NOTICE: 运行在no-delete模式，本应删除: {}", path),
            Err(e) => debug!("NOTICE: 运行在no-delete模式，路径无效: {}", e),
        }
        return exchange.finish(StatusCode::OK);
    }

    let full_path = match full_path {
        Ok(path) => path,
        Err(e) => {
            debug!("文件不存在: {}", e);
            return exchange.finish(StatusCode::NOT_FOUND);
        }
    };

    if let Err(e) = fs::remove_file(&full_path).await {
        debug!("删除文件失败: {} - {}", full_path, e);
        return exchange.finish(StatusCode::EXPECTATION_FAILED);
    }

    exchange.finish(StatusCode::OK)
}

enum UploadBuffer {
    Memory(Vec<u8>),
    // 匿名临时文件，可读可写，关闭后由系统回收
    Spilled(File),
}

struct Upload {
    filename: String,
    buffer: UploadBuffer,
    size: u64,
}

impl Upload {
    async fn push(&mut self, chunk: &[u8], tmp_dir: &Path) -> Result<()> {
        self.size += chunk.len() as u64;
        if let UploadBuffer::Memory(data) = &mut self.buffer {
            if data.len() + chunk.len() <= UPLOAD_MEMORY_LIMIT {
                data.extend_from_slice(chunk);
                return Ok(());
            }

            fs::create_dir_all(tmp_dir).await?;
            debug!("上传超过内存上限，写入临时目录: {}", tmp_dir.display());
            let spill = tempfile::tempfile_in(tmp_dir)
                .with_context(|| format!("创建临时文件失败: {}", tmp_dir.display()))?;
            let mut spill = File::from_std(spill);
            spill.write_all(data).await?;
            self.buffer = UploadBuffer::Spilled(spill);
        }

        if let UploadBuffer::Spilled(spill) = &mut self.buffer {
            spill.write_all(chunk).await?;
        }
        Ok(())
    }

    async fn copy_to(self, dest: &mut File) -> Result<u64> {
        match self.buffer {
            UploadBuffer::Memory(data) => {
                dest.write_all(&data).await?;
            }
            UploadBuffer::Spilled(mut spill) => {
                spill.flush().await?;
                spill.seek(SeekFrom::Start(0)).await?;
                tokio::io::copy(&mut spill, dest).await?;
            }
        }
        dest.flush().await?;
        Ok(self.size)
    }
}

/// 读完整个multipart请求体，取出名为file的文件字段
async fn read_upload(multipart: &mut Multipart, tmp_dir: &Path) -> Result<Option<Upload>> {
    let mut upload: Option<Upload> = None;

    while let Some(mut field) = multipart.next_field().await? {
        let is_file = field.name() == Some("file") && field.file_name().is_some();
        if !is_file || upload.is_some() {
            while field.chunk().await?.is_some() {}
            continue;
        }

        let mut current = Upload {
            filename: field.file_name().unwrap_or_default().to_string(),
            buffer: UploadBuffer::Memory(Vec::new()),
            size: 0,
        };
        while let Some(chunk) = field.chunk().await? {
            current.push(&chunk, tmp_dir).await?;
        }
        upload = Some(current);
    }

    Ok(upload)
}

pub async fn upload_file(
    State(service): State<Arc<FsService>>,
    headers: HeaderMap,
    uri: Uri,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let exchange = Exchange {
        service: &service,
        method: "POST",
        uri: &uri,
        ua: user_agent(&headers),
    };
    debug!("upload_file POST请求");
    let share = query_param(&uri, "s");
    let dir = query_param(&uri, "p");

    if service.config.no_upload {
        debug!("NOTICE: 运行在no-upload模式");
        return exchange.finish(StatusCode::OK);
    }

    let mut multipart = match multipart {
        Ok(multipart) => multipart,
        Err(e) => {
            debug!("解析上传请求失败: {}", e);
            return exchange.finish(StatusCode::PRECONDITION_FAILED);
        }
    };

    let upload = match read_upload(&mut multipart, &service.config.tmp_dir).await {
        Ok(Some(upload)) => upload,
        Ok(None) => {
            debug!("上传请求中没有file字段");
            return exchange.finish(StatusCode::EXPECTATION_FAILED);
        }
        Err(e) => {
            debug!("解析上传请求失败: {:#}", e);
            return exchange.finish(StatusCode::PRECONDITION_FAILED);
        }
    };

    // FIXME: 文件名直接来自客户端，没有检查开头的斜杠或点
    let relative = format!("{}/{}", dir, upload.filename);
    let full_path = match full_path_to_file(service.shares.as_ref(), &share, &relative) {
        Ok(path) => path,
        Err(e) => {
            debug!("上传目标无效: {}", e);
            return exchange.finish(StatusCode::SERVICE_UNAVAILABLE);
        }
    };

    let mut dest = match File::create(&full_path).await {
        Ok(file) => file,
        Err(e) => {
            debug!("创建上传文件失败: {} - {}", full_path, e);
            return exchange.finish(StatusCode::SERVICE_UNAVAILABLE);
        }
    };

    match upload.copy_to(&mut dest).await {
        Ok(size) => {
            debug!("文件上传完成: {} ({} 字节)", full_path, size);
            exchange.finish(StatusCode::OK)
        }
        Err(e) => {
            error!("写入上传文件失败: {} - {:#}", full_path, e);
            // 不留下写了一半的文件
            drop(dest);
            if let Err(e) = fs::remove_file(&full_path).await {
                debug!("清理上传文件失败: {} - {}", full_path, e);
            }
            exchange.finish(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}
