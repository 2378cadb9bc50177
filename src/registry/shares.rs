use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use log::{debug, warn};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tokio::fs;

use crate::registry::base::ShareRegistry;
use crate::types::{Share, ShareList};
use crate::util::http_date;

/// 根目录下的每个子目录就是一个共享
pub struct DirShares {
    root_dir: PathBuf,
    current: RwLock<Arc<ShareList>>,
}

impl DirShares {
    pub fn new(root_dir: PathBuf) -> Self {
        Self {
            root_dir,
            current: RwLock::new(Arc::new(ShareList::empty())),
        }
    }

    async fn scan(&self) -> Result<ShareList> {
        let mut entries = fs::read_dir(&self.root_dir)
            .await
            .with_context(|| format!("读取共享根目录失败: {}", self.root_dir.display()))?;

        let mut shares = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            // 跟随符号链接，链接到目录的也算共享
            let metadata = match fs::metadata(&path).await {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!("读取共享元数据失败: {} - {}", path.display(), e);
                    continue;
                }
            };
            if !metadata.is_dir() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }

            shares.push(Share {
                name,
                root_path: path.to_string_lossy().to_string(),
                mtime: metadata.modified().map(http_date).unwrap_or_default(),
            });
        }
        shares.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(ShareList {
            shares,
            last_checked: Utc::now(),
        })
    }
}

#[async_trait]
impl ShareRegistry for DirShares {
    async fn rescan(&self) -> Result<()> {
        let list = self.scan().await?;
        debug!("共享扫描完成: {} 个", list.shares.len());
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(list);
        Ok(())
    }

    fn list(&self) -> Arc<ShareList> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rescan_lists_subdirectories_only() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("Movies")).unwrap();
        std::fs::create_dir(root.path().join("Books")).unwrap();
        std::fs::create_dir(root.path().join(".hidden")).unwrap();
        std::fs::write(root.path().join("notes.txt"), b"x").unwrap();

        let shares = DirShares::new(root.path().to_path_buf());
        assert!(shares.list().shares.is_empty());

        shares.rescan().await.unwrap();
        let names: Vec<_> = shares.list().shares.iter().map(|s| s.name.clone()).collect();
        assert_eq!(names, vec!["Books", "Movies"]);

        let books = shares.get("Books").unwrap();
        assert_eq!(books.root_path, root.path().join("Books").to_string_lossy());
        assert!(shares.get("notes.txt").is_none());
    }

    #[tokio::test]
    async fn serialized_shares_hide_root_path() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("Photos")).unwrap();

        let shares = DirShares::new(root.path().to_path_buf());
        shares.rescan().await.unwrap();
        let json = shares.serialize().unwrap();
        assert!(json.contains("\"name\":\"Photos\""));
        assert!(!json.contains(&*root.path().to_string_lossy()));
    }

    #[tokio::test]
    async fn failed_rescan_keeps_previous_list() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("Music")).unwrap();
        let shares = DirShares::new(root.path().join("missing"));
        assert!(shares.rescan().await.is_err());
        assert!(shares.list().shares.is_empty());
    }
}
