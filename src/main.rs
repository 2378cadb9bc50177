use dotenv::dotenv;
use hda_fs::bootstrap::bootstrap;
use log::error;

#[tokio::main]
async fn main() {
    // 加载环境变量
    dotenv().ok();

    let version = env!("CARGO_PKG_VERSION");

    if let Err(e) = bootstrap(version).await {
        // 日志系统可能还没初始化
        eprintln!("启动错误: {:#}", e);
        error!("启动错误: {:#}", e);
        std::process::exit(1);
    }
}
