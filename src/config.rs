use anyhow::{anyhow, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::constants::{DEFAULT_ROOT_DIR, LOCAL_SERVER_PORT};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // 基本配置
    pub root_dir: PathBuf,
    pub port: u16,
    pub local_addr: String,

    // 中继隧道，未设置时只提供局域网服务
    pub relay_addr: Option<String>,

    // 应用列表来源
    pub apps_file: Option<PathBuf>,

    // 上传过大时的落盘目录
    pub tmp_dir: PathBuf,

    // 功能开关
    pub no_delete: bool,
    pub no_upload: bool,
    pub disable_access_log: bool,

    // 高级选项
    pub debug_log: bool,
}

fn env_flag(name: &str) -> bool {
    env::var(name).map(|v| v == "true" || v == "1").unwrap_or(false)
}

impl Config {
    // 创建默认的.env文件模板（如果不存在）
    pub fn create_default_env_file() -> Result<()> {
        let env_path = ".env";
        if !Path::new(env_path).exists() {
            let env_content =
                "# HDA文件服务配置\n\
                 # 共享目录的根目录，每个子目录是一个共享（可选，默认/var/hda/files）\n\
                 # HDA_ROOT_DIR=/var/hda/files\n\
                 # 局域网监听端口（可选，默认4563）\n\
                 # HDA_PORT=4563\n\
                 # 对外报告的本地地址（可选，默认127.0.0.1:端口）\n\
                 # HDA_LOCAL_ADDR=\n\
                 # 中继服务器地址，设置后通过隧道接收转发请求（可选）\n\
                 # HDA_RELAY_ADDR=relay.example.com:1443\n\
                 # 应用列表JSON文件（可选）\n\
                 # HDA_APPS_FILE=/var/hda/apps.json\n\
                 # 大文件上传的临时目录（可选）\n\
                 # HDA_TMP_DIR=\n\
                 # 演示模式：不真正删除/上传文件\n\
                 # NO_DELETE=false\n\
                 # NO_UPLOAD=false\n\
                 # 关闭访问日志\n\
                 # DISABLE_ACCESS_LOG=false\n\
                 # DEBUG_LOG=false\n";

            fs::write(env_path, env_content)?;
            info!("已创建.env文件模板，可按需修改配置项");
        }
        Ok(())
    }

    /// 使用默认值构建配置，只指定共享根目录
    pub fn with_root_dir<P: Into<PathBuf>>(root_dir: P) -> Self {
        Config {
            root_dir: root_dir.into(),
            port: LOCAL_SERVER_PORT,
            local_addr: format!("127.0.0.1:{}", LOCAL_SERVER_PORT),
            relay_addr: None,
            apps_file: None,
            tmp_dir: env::temp_dir().join("hda-fs"),
            no_delete: false,
            no_upload: false,
            disable_access_log: false,
            debug_log: false,
        }
    }

    pub fn new() -> Result<Self> {
        let root_dir = env::var("HDA_ROOT_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ROOT_DIR.to_string());

        let mut config = Config::with_root_dir(root_dir);

        if let Ok(port_str) = env::var("HDA_PORT") {
            config.port = port_str
                .trim()
                .parse::<u16>()
                .map_err(|_| anyhow!("HDA_PORT必须是有效的端口号: {}", port_str))?;
        }

        // 数据库查询本机地址的方式不再支持，只能手动指定
        config.local_addr = env::var("HDA_LOCAL_ADDR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| format!("127.0.0.1:{}", config.port));

        config.relay_addr = env::var("HDA_RELAY_ADDR")
            .ok()
            .filter(|v| !v.trim().is_empty());

        config.apps_file = env::var("HDA_APPS_FILE")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        if let Ok(tmp_dir) = env::var("HDA_TMP_DIR") {
            if !tmp_dir.trim().is_empty() {
                config.tmp_dir = PathBuf::from(tmp_dir);
            }
        }

        config.no_delete = env_flag("NO_DELETE");
        config.no_upload = env_flag("NO_UPLOAD");
        config.disable_access_log = env_flag("DISABLE_ACCESS_LOG");
        config.debug_log = env_flag("DEBUG_LOG");

        Ok(config)
    }
}
