use log::debug;

use crate::error::FsError;
use crate::registry::ShareRegistry;

/// 拼出共享内文件的完整路径
///
/// 只拒绝包含`../`的相对路径，不做规范化，共享根目录和相对路径直接拼接。
pub fn full_path_to_file(
    shares: &dyn ShareRegistry,
    share_name: &str,
    relative_path: &str,
) -> Result<String, FsError> {
    let share = shares
        .get(share_name)
        .ok_or_else(|| FsError::ShareNotFound(share_name.to_string()))?;

    if relative_path.contains("../") {
        return Err(FsError::PathTraversal(relative_path.to_string()));
    }

    let path = format!("{}{}", share.root_path, relative_path);
    debug!("完整路径: {}", path);
    Ok(path)
}
