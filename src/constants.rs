use lazy_static::lazy_static;
use std::time::Duration;

pub const LOCAL_SERVER_PORT: u16 = 4563;
pub const DEFAULT_ROOT_DIR: &str = "/var/hda/files";

pub const DEFAULT_BACKOFF_FACTOR: u32 = 2;
pub const MAX_BACKOFF_SECONDS: u64 = 60;
// 连续accept失败达到该次数后放弃监听
pub const MAX_ACCEPT_RETRIES: u32 = 10;

// 上传时内存缓冲上限，超过后落盘到临时文件
pub const UPLOAD_MEMORY_LIMIT: usize = 32 << 20;

pub const CACHE_CONTROL_REVALIDATE: &str = "max-age=0, private, must-revalidate";

lazy_static! {
    pub static ref INITIAL_BACKOFF: Duration = Duration::from_millis(100);
    pub static ref DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
}
