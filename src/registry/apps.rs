use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;

use crate::registry::base::AppRegistry;
use crate::types::{App, AppList};

/// 从JSON文件读取应用列表，不做缓存
pub struct JsonFileApps {
    path: Option<PathBuf>,
}

impl JsonFileApps {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

#[async_trait]
impl AppRegistry for JsonFileApps {
    async fn list(&self) -> Result<AppList> {
        let path = self
            .path
            .as_ref()
            .ok_or_else(|| anyhow!("未配置应用列表"))?;
        let content = fs::read(path)
            .await
            .with_context(|| format!("读取应用列表失败: {}", path.display()))?;
        let apps: Vec<App> = serde_json::from_slice(&content)
            .with_context(|| format!("应用列表格式错误: {}", path.display()))?;
        Ok(AppList { apps })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_apps_fresh_on_every_call() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("apps.json");
        std::fs::write(&path, r#"[{"name":"wiki","descriptor":{"vhost":"wiki"}}]"#).unwrap();

        let apps = JsonFileApps::new(Some(path.clone()));
        assert_eq!(apps.list().await.unwrap().apps.len(), 1);

        std::fs::write(&path, r#"[{"name":"wiki"},{"name":"photos"}]"#).unwrap();
        let list = apps.list().await.unwrap();
        assert_eq!(list.apps.len(), 2);
        assert_eq!(list.apps[1].name, "photos");
    }

    #[tokio::test]
    async fn missing_source_is_an_error() {
        assert!(JsonFileApps::new(None).list().await.is_err());
    }
}
