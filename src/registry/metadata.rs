use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::registry::base::MetadataProvider;

/// 没有接入元数据库时使用，所有查询都失败
pub struct NoMetadata;

#[async_trait]
impl MetadataProvider for NoMetadata {
    async fn get_metadata(&self, filename: &str, _hint: &str) -> Result<String> {
        Err(anyhow!("没有可用的元数据库: {}", filename))
    }
}
