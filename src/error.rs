use thiserror::Error;

/// 解析共享路径时的错误，对客户端统一表现为404
#[derive(Debug, Error)]
pub enum FsError {
    #[error("共享 {0} 不存在")]
    ShareNotFound(String),

    #[error("路径 {0} 包含 ..")]
    PathTraversal(String),
}

/// 隧道连接断开，调用方可以决定是否重连
#[derive(Debug, Error)]
#[error("与中继的隧道连接已断开 ({remote})")]
pub struct TunnelLost {
    pub remote: String,
    #[source]
    pub cause: Option<hyper::Error>,
}
