#![allow(dead_code)]

use axum::body::{Body, Bytes};
use axum::http::{Method, Request, Response};
use axum::Router;
use hda_fs::config::Config;
use hda_fs::service::FsService;
use http_body_util::BodyExt;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

pub const BOUNDARY: &str = "hda-test-boundary";

pub struct TestEnv {
    pub root: TempDir,
    pub service: Arc<FsService>,
    pub router: Router,
}

impl TestEnv {
    pub fn share_path(&self, share: &str) -> std::path::PathBuf {
        self.root.path().join(share)
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible")
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.send(request(Method::GET, uri)).await
    }
}

pub fn request(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("valid request")
}

/// 共享根目录下放两个共享：Books带几个文件，Movies为空
pub async fn setup_with(configure: impl FnOnce(&mut Config)) -> TestEnv {
    let root = TempDir::new().expect("Failed to create temp directory");
    let books = root.path().join("Books");
    tokio::fs::create_dir_all(books.join("novels")).await.unwrap();
    tokio::fs::create_dir_all(root.path().join("Movies")).await.unwrap();
    tokio::fs::write(books.join("readme.txt"), b"hello, shares")
        .await
        .unwrap();
    tokio::fs::write(books.join("novels/dune.txt"), b"0123456789abcdefghij")
        .await
        .unwrap();

    let mut config = Config::with_root_dir(root.path());
    config.tmp_dir = root.path().join(".upload-tmp");
    configure(&mut config);

    let service = Arc::new(FsService::new("test", config).expect("service"));
    service.shares.rescan().await.expect("rescan");
    let router = service.create_router();

    TestEnv {
        root,
        service,
        router,
    }
}

pub async fn setup() -> TestEnv {
    setup_with(|_| {}).await
}

pub async fn body_bytes(response: Response<Body>) -> Bytes {
    response
        .into_body()
        .collect()
        .await
        .expect("Failed to read body")
        .to_bytes()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = body_bytes(response).await;
    serde_json::from_slice(&bytes).expect("valid json")
}

pub fn multipart_body(field: &str, filename: &str, content: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
            BOUNDARY, field, filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

pub fn upload_request(uri: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .expect("valid request")
}
