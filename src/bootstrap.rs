use anyhow::{anyhow, Context, Result};
use colored::Colorize;
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;

use crate::config::Config;
use crate::logger;
use crate::relay::RelayConnector;
use crate::server::serve_lan;
use crate::service::FsService;

pub async fn bootstrap(version: &str) -> Result<()> {
    // 打印启动信息
    println!("{}", format!("启动 hda-fs {}", version).green());

    if let Err(e) = Config::create_default_env_file() {
        warn!("创建.env模板失败: {}", e);
    }

    let config = Config::new()?;
    logger::init_logger(config.debug_log)?;

    if config.no_delete {
        info!("{}", "NOTICE: no-delete模式，删除请求不会真正执行".yellow());
    }
    if config.no_upload {
        info!("{}", "NOTICE: no-upload模式，上传请求不会真正执行".yellow());
    }

    let service = Arc::new(FsService::new(version, config.clone())?);

    // 先扫描一次共享目录，失败不影响启动
    match service.shares.rescan().await {
        Ok(()) => info!("发现 {} 个共享", service.shares.list().shares.len()),
        Err(e) => warn!("扫描共享目录失败: {:#}", e),
    }
    debug!("服务信息: {}", service.info.to_json());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("无法监听端口 {}", config.port))?;

    let lan_service = service.clone();
    let mut lan_handle = tokio::spawn(async move { serve_lan(lan_service, listener).await });

    let relay_handle = match &config.relay_addr {
        Some(relay_addr) => {
            info!("启用中继隧道: {}", relay_addr);
            Some(RelayConnector::new(relay_addr, service.clone()).start())
        }
        None => {
            info!("未配置中继服务器，只提供局域网服务");
            None
        }
    };

    info!("{}", format!("服务完成初始化，监听于 {}", addr).green());

    let result = tokio::select! {
        _ = signal::ctrl_c() => {
            info!("收到退出信号，正在关闭...");
            Ok(())
        }
        joined = &mut lan_handle => {
            match joined {
                Ok(Ok(())) => Err(anyhow!("局域网服务意外结束")),
                Ok(Err(e)) => {
                    error!("局域网服务出错: {:#}", e);
                    Err(e)
                }
                Err(e) => Err(anyhow!("局域网服务任务异常: {}", e)),
            }
        }
    };

    if let Some(handle) = relay_handle {
        handle.abort();
    }
    lan_handle.abort();

    result
}
