use anyhow::{anyhow, Result};
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::Router;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use log::{debug, error, info, warn};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tower::ServiceExt;

use crate::backoff::Backoff;
use crate::constants::MAX_ACCEPT_RETRIES;
use crate::error::TunnelLost;
use crate::service::FsService;

async fn handle(
    router: Router,
    mut req: Request<Incoming>,
    peer: Option<SocketAddr>,
) -> Result<axum::response::Response, Infallible> {
    if let Some(peer) = peer {
        req.extensions_mut().insert(ConnectInfo(peer));
    }
    router.oneshot(req.map(Body::new)).await
}

/// 局域网监听循环，每个连接一个任务，同时支持HTTP/1.1和HTTP/2
///
/// accept连续失败达到上限时返回错误，由调用方决定是否退出进程。
pub async fn serve_lan(service: Arc<FsService>, listener: TcpListener) -> Result<()> {
    let router = service.create_router();
    let mut backoff = Backoff::new(Some(MAX_ACCEPT_RETRIES));

    if let Ok(addr) = listener.local_addr() {
        info!("局域网服务监听于 {}", addr);
    }

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => {
                backoff.reset();
                accepted
            }
            Err(e) => match backoff.next_delay() {
                Some(delay) => {
                    warn!(
                        "接受连接失败: {}，{}ms后重试 (第{}次)",
                        e,
                        delay.as_millis(),
                        backoff.attempts()
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                None => {
                    error!("接受连接连续失败{}次，停止监听", MAX_ACCEPT_RETRIES);
                    return Err(anyhow!("接受连接失败: {}", e));
                }
            },
        };

        let router = router.clone();
        let metrics = service.metrics.clone();
        tokio::spawn(async move {
            let _task = metrics.track_task();
            let svc = service_fn(move |req| handle(router.clone(), req, Some(peer)));
            if let Err(e) = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                .serve_connection(TokioIo::new(stream), svc)
                .await
            {
                debug!("连接 {} 处理结束: {}", peer, e);
            }
        });
    }
}

/// 在已建立的双向流上提供HTTP/2服务，直到连接断开
///
/// 期间中继状态为已连接，返回时清除。一次调用只服务一条隧道。
pub async fn serve_tunnel<I>(service: Arc<FsService>, io: I, remote: String) -> TunnelLost
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let router = service.create_router();
    service.info.relay.attach(&remote);
    info!("中继隧道已建立: {}", remote);

    let svc = service_fn(move |req| handle(router.clone(), req, None));
    let result = hyper::server::conn::http2::Builder::new(TokioExecutor::new())
        .serve_connection(TokioIo::new(io), svc)
        .await;

    service.info.relay.detach();
    match &result {
        Ok(()) => info!("中继隧道已关闭: {}", remote),
        Err(e) => warn!("中继隧道异常断开: {} - {}", remote, e),
    }

    TunnelLost {
        remote,
        cause: result.err(),
    }
}
