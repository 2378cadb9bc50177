use anyhow::Result;
use async_trait::async_trait;
use log::info;
use std::sync::Arc;

use crate::config::Config;
use crate::registry::apps::JsonFileApps;
use crate::registry::metadata::NoMetadata;
use crate::registry::shares::DirShares;
use crate::types::{AppList, Share, ShareList};

/// 共享目录来源，扫描结果整体替换，读者不会看到扫描到一半的集合
#[async_trait]
pub trait ShareRegistry: Send + Sync {
    async fn rescan(&self) -> Result<()>;

    fn list(&self) -> Arc<ShareList>;

    fn get(&self, name: &str) -> Option<Share> {
        self.list().get(name).cloned()
    }

    fn serialize(&self) -> Result<String> {
        Ok(self.list().to_json()?)
    }
}

/// 本地应用来源，每次请求都重新枚举
#[async_trait]
pub trait AppRegistry: Send + Sync {
    async fn list(&self) -> Result<AppList>;
}

/// 媒体元数据查询，返回的JSON原样透传给客户端
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    async fn get_metadata(&self, filename: &str, hint: &str) -> Result<String>;
}

pub fn get_share_registry(config: &Config) -> Arc<dyn ShareRegistry> {
    info!("使用目录共享: {}", config.root_dir.display());
    Arc::new(DirShares::new(config.root_dir.clone()))
}

pub fn get_app_registry(config: &Config) -> Arc<dyn AppRegistry> {
    match &config.apps_file {
        Some(path) => info!("使用应用列表文件: {}", path.display()),
        None => info!("未配置应用列表文件，/apps将返回404"),
    }
    Arc::new(JsonFileApps::new(config.apps_file.clone()))
}

pub fn get_metadata_provider(_config: &Config) -> Arc<dyn MetadataProvider> {
    Arc::new(NoMetadata)
}
