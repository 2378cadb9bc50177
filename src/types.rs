use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 一个对外共享的目录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Share {
    pub name: String,
    #[serde(skip)]
    pub root_path: String,
    #[serde(default)]
    pub mtime: String,
}

/// 一次完整扫描得到的共享集合，只会整体替换
#[derive(Debug, Clone)]
pub struct ShareList {
    pub shares: Vec<Share>,
    pub last_checked: DateTime<Utc>,
}

impl ShareList {
    pub fn empty() -> Self {
        ShareList {
            shares: Vec::new(),
            last_checked: Utc::now(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Share> {
        self.shares.iter().find(|share| share.name == name)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.shares)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct App {
    pub name: String,
    #[serde(default)]
    pub descriptor: serde_json::Value,
}

#[derive(Debug, Clone, Default)]
pub struct AppList {
    pub apps: Vec<App>,
}

impl AppList {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.apps)
    }
}

/// 目录列表中的一项
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: String,
    pub size: u64,
    pub mtime: String,
    pub is_dir: bool,
}
