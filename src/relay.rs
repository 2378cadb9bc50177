use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time;

use crate::backoff::Backoff;
use crate::constants::DEFAULT_CONNECT_TIMEOUT;
use crate::server::serve_tunnel;
use crate::service::FsService;

/// 主动连接中继服务器，断开后按退避时间无限重连
#[derive(Debug)]
pub struct RelayConnector {
    addr: String,
    service: Arc<FsService>,
}

impl RelayConnector {
    pub fn new(addr: &str, service: Arc<FsService>) -> Self {
        RelayConnector {
            addr: addr.to_string(),
            service,
        }
    }

    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn connect(&self) -> Option<TcpStream> {
        match time::timeout(*DEFAULT_CONNECT_TIMEOUT, TcpStream::connect(&self.addr)).await {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("设置TCP_NODELAY失败: {}", e);
                }
                Some(stream)
            }
            Ok(Err(e)) => {
                error!("连接中继服务器 {} 失败: {}", self.addr, e);
                None
            }
            Err(_) => {
                error!("连接中继服务器 {} 超时", self.addr);
                None
            }
        }
    }

    async fn run(&self) {
        let mut backoff = Backoff::new(None);

        loop {
            info!("正在连接中继服务器: {}", self.addr);
            if let Some(stream) = self.connect().await {
                backoff.reset();
                let remote = stream
                    .peer_addr()
                    .map(|addr| addr.to_string())
                    .unwrap_or_else(|_| self.addr.clone());
                let lost = serve_tunnel(self.service.clone(), stream, remote).await;
                warn!("{}", lost);
            }

            if let Some(delay) = backoff.next_delay() {
                info!("{}ms后重新连接中继服务器", delay.as_millis());
                time::sleep(delay).await;
            }
        }
    }
}
