use anyhow::Result;
use chrono::Local;
use env_logger::fmt::Color;
use log::{Level, LevelFilter};
use std::fs::create_dir_all;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, SystemTime};

const LOG_DIR: &str = "logs";
const LOG_FILE_PREFIX: &str = "hda-fs";
const MAX_LOG_FILES: usize = 5;

// 用于控制清理线程的标志
static CLEANER_STARTED: AtomicBool = AtomicBool::new(false);

// 同时写入标准输出和文件
struct DualWriter {
    console: io::Stdout,
    file: Box<dyn Write + Send>,
}

impl Write for DualWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let console_result = self.console.write(buf);
        let _ = self.file.write(buf);
        console_result
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = self.console.flush();
        let _ = self.file.flush();
        Ok(())
    }
}

/// 初始化日志，RUST_LOG优先于默认级别
pub fn init_logger(debug_log: bool) -> Result<()> {
    let logs_dir = Path::new(LOG_DIR);
    if !logs_dir.exists() {
        create_dir_all(logs_dir)?;
    }

    // 按小时滚动的日志文件
    let file_appender = tracing_appender::rolling::hourly(logs_dir, format!("{}.log", LOG_FILE_PREFIX));
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    // guard被drop后不再写文件，进程存活期间一直保留
    Box::leak(Box::new(guard));

    let dual_writer = DualWriter {
        console: io::stdout(),
        file: Box::new(non_blocking),
    };

    let default_level = if debug_log {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::new()
        .format(|buf, record| {
            let mut style = buf.style();
            let level_color = match record.level() {
                Level::Error => Color::Red,
                Level::Warn => Color::Yellow,
                Level::Info => Color::Green,
                Level::Debug => Color::Blue,
                Level::Trace => Color::Cyan,
            };
            style.set_color(level_color);

            let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
            let level_str = style.value(format!("{:<5}", record.level()));

            writeln!(
                buf,
                "[{} {} {}] {}",
                timestamp,
                level_str,
                record.target(),
                record.args()
            )
        })
        .filter(None, default_level)
        // 连接层的调试日志太多
        .filter_module("hyper", LevelFilter::Info)
        .filter_module("h2", LevelFilter::Info)
        .parse_env("RUST_LOG")
        .target(env_logger::Target::Pipe(Box::new(dual_writer)))
        .try_init()?;

    // 后台定期清理，只保留最新的几个日志文件
    if !CLEANER_STARTED.swap(true, Ordering::SeqCst) {
        thread::spawn(|| loop {
            thread::sleep(Duration::from_secs(600));
            match clean_old_logs(Path::new(LOG_DIR), LOG_FILE_PREFIX, MAX_LOG_FILES) {
                Ok(removed) if removed > 0 => log::debug!("已清理 {} 个旧日志文件", removed),
                Ok(_) => (),
                Err(e) => log::error!("清理旧日志文件失败: {}", e),
            }
        });
    }

    log::info!("日志系统启动，日志文件保存在{}目录", LOG_DIR);
    log::info!("系统环境: RUST_LOG={}", std::env::var("RUST_LOG").unwrap_or_default());

    Ok(())
}

/// 删除多余的旧日志，返回删除的文件数
fn clean_old_logs(logs_dir: &Path, prefix: &str, keep: usize) -> Result<usize> {
    let mut log_files: Vec<(SystemTime, PathBuf)> = Vec::new();

    for entry in std::fs::read_dir(logs_dir)? {
        let path = entry?.path();
        let matches = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.starts_with(prefix))
            .unwrap_or(false);
        if !path.is_file() || !matches {
            continue;
        }
        if let Ok(metadata) = std::fs::metadata(&path) {
            let modified = metadata.modified().unwrap_or_else(|_| SystemTime::now());
            log_files.push((modified, path));
        }
    }

    // 最新的在前面
    log_files.sort_by(|a, b| b.0.cmp(&a.0));

    let mut removed = 0;
    for (_, path) in log_files.iter().skip(keep) {
        match std::fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => log::warn!("无法删除旧日志文件 {:?}: {}", path, e),
        }
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_newest_log_files() {
        let dir = tempfile::tempdir().unwrap();
        let base = SystemTime::now() - Duration::from_secs(3600);
        for i in 0..7u64 {
            let path = dir.path().join(format!("hda-fs.log.2024-01-01-{:02}", i));
            let file = std::fs::File::create(&path).unwrap();
            file.set_modified(base + Duration::from_secs(i * 60)).unwrap();
        }
        std::fs::write(dir.path().join("other.txt"), b"keep").unwrap();

        let removed = clean_old_logs(dir.path(), "hda-fs", 5).unwrap();
        assert_eq!(removed, 2);
        assert!(!dir.path().join("hda-fs.log.2024-01-01-00").exists());
        assert!(!dir.path().join("hda-fs.log.2024-01-01-01").exists());
        assert!(dir.path().join("hda-fs.log.2024-01-01-06").exists());
        assert!(dir.path().join("other.txt").exists());
    }
}
