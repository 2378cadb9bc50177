mod common;

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, Method, Request, StatusCode, Uri};
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;
use common::{body_bytes, setup};
use hda_fs::dispatch::top_vhost_filter;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower::ServiceExt;

async fn spawn_upstream() -> SocketAddr {
    let app = Router::new()
        .route(
            "/hello",
            get(|headers: HeaderMap, uri: Uri| async move {
                let host = headers
                    .get(header::HOST)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                (
                    [("x-upstream", "yes")],
                    format!("host={};query={}", host, uri.query().unwrap_or_default()),
                )
            }),
        )
        .route(
            "/moved",
            get(|| async { (StatusCode::FOUND, [(header::LOCATION, "/hello")]) }),
        )
        .route(
            "/echo",
            post(|headers: HeaderMap, body: Bytes| async move {
                let length = headers
                    .get(header::CONTENT_LENGTH)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("none")
                    .to_string();
                ([("x-request-length", length)], body)
            }),
        );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn vhost_request(vhost: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::USER_AGENT, format!("Mozilla/5.0 Vhost/{} (X11)", vhost))
        .body(Body::empty())
        .unwrap()
}

fn vary_values(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(header::VARY)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn api_responses_vary_on_session() {
    let env = setup().await;
    let response = env.get("/shares").await;
    assert_eq!(vary_values(response.headers()), vec!["Session"]);
}

#[tokio::test]
async fn vhost_requests_are_proxied() {
    let env = setup().await;
    let upstream = spawn_upstream().await;

    let response = env
        .send(vhost_request(&upstream.to_string(), "/hello?x=1"))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-upstream"], "yes");
    let vary = vary_values(response.headers());
    assert!(vary.contains(&"User-Agent".to_string()));
    assert!(vary.contains(&"Session".to_string()));

    let body = body_bytes(response).await;
    assert_eq!(
        std::str::from_utf8(&body).unwrap(),
        format!("host={};query=x=1", upstream)
    );

    let snapshot = env.service.metrics.snapshot();
    assert_eq!(snapshot.received, 1);
    assert_eq!(snapshot.served, 1);
    assert_eq!(snapshot.bytes_served, body.len() as u64);
}

#[tokio::test]
async fn proxied_request_body_reaches_upstream() {
    let env = setup().await;
    let upstream = spawn_upstream().await;
    let payload: Vec<u8> = (0..256 * 1024).map(|i| (i % 97) as u8).collect();

    let response = env
        .send(
            Request::builder()
                .method(Method::POST)
                .uri("/echo")
                .header(
                    header::USER_AGENT,
                    format!("Mozilla/5.0 Vhost/{} (X11)", upstream),
                )
                .header(header::CONTENT_LENGTH, payload.len())
                .body(Body::from(payload.clone()))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["x-request-length"],
        payload.len().to_string().as_str()
    );
    let body = body_bytes(response).await;
    assert!(body[..] == payload[..]);

    let snapshot = env.service.metrics.snapshot();
    assert_eq!(snapshot.served, 1);
    assert_eq!(snapshot.bytes_served, payload.len() as u64);
}

#[tokio::test]
async fn proxied_redirects_are_not_followed() {
    let env = setup().await;
    let upstream = spawn_upstream().await;

    let response = env
        .send(vhost_request(&upstream.to_string(), "/moved"))
        .await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[header::LOCATION], "/hello");
}

#[tokio::test]
async fn unreachable_vhost_is_502() {
    let env = setup().await;
    let closed = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let response = env.send(vhost_request(&closed.to_string(), "/")).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert!(vary_values(response.headers()).contains(&"User-Agent".to_string()));
}

#[tokio::test]
async fn invalid_vhost_is_404() {
    let env = setup().await;
    let response = env.send(vhost_request("[::1", "/")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn empty_vhost_token_is_served_locally() {
    let env = setup().await;
    let response = env
        .send(
            Request::builder()
                .uri("/shares")
                .header(header::USER_AGENT, "Vhost/ something")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(vary_values(response.headers()), vec!["Session"]);
}

#[tokio::test]
async fn handler_panic_becomes_500() {
    let env = setup().await;
    let router = Router::new()
        .route(
            "/boom",
            get(|| async {
                panic!("handler exploded");
                #[allow(unreachable_code)]
                ""
            }),
        )
        .route("/ok", get(|| async { "fine" }))
        .layer(from_fn_with_state(env.service.clone(), top_vhost_filter))
        .with_state(env.service.clone());

    let response = router
        .clone()
        .oneshot(Request::builder().uri("/boom").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(vary_values(response.headers()), vec!["Session"]);

    // 后续请求不受影响
    let response = router
        .oneshot(Request::builder().uri("/ok").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let snapshot = env.service.metrics.snapshot();
    assert_eq!(snapshot.received, 2);
    assert_eq!(snapshot.served, 1);
    assert_eq!(snapshot.active_tasks, 0);
}

#[tokio::test]
async fn concurrent_requests_keep_counters_consistent() {
    let env = setup().await;
    let mut handles = Vec::new();
    for i in 0..32 {
        let router = env.router.clone();
        handles.push(tokio::spawn(async move {
            let uri = if i % 2 == 0 {
                "/files?s=Books&p=/readme.txt"
            } else {
                "/shares"
            };
            let response = router
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            body_bytes(response).await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let snapshot = env.service.metrics.snapshot();
    assert_eq!(snapshot.received, 32);
    assert_eq!(snapshot.served, 32);
    assert_eq!(snapshot.outstanding(), 0);
    assert_eq!(snapshot.active_tasks, 0);
}
