use harbor_core::constants::logging::{DEFAULT_LOG_LEVEL, LOG_FILE_ENV};
use tracing_appender::non_blocking::WorkerGuard;

/// 设置日志记录系统
///
/// - 支持 RUST_LOG 环境变量控制日志级别，`-v` 时默认 debug
/// - 设置了 `HARBOR_LOG_FILE` 时输出到文件（定时任务由系统调度器触发，没有终端）
/// - 终端输出简洁格式，文件输出包含模块路径和行号
///
/// 返回的 guard 需要保持存活，否则文件日志可能丢失最后几条
pub fn setup_logging(verbose: bool) -> Option<WorkerGuard> {
    use tracing_subscriber::{EnvFilter, fmt};

    let default_level = if verbose { "debug" } else { DEFAULT_LOG_LEVEL };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if let Ok(log_file) = std::env::var(LOG_FILE_ENV) {
        let opened = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file);

        match opened {
            Ok(file) => {
                let (writer, guard) = tracing_appender::non_blocking(file);
                fmt()
                    .with_env_filter(env_filter)
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(true)
                    .with_thread_names(true)
                    .with_line_number(true)
                    .init();
                return Some(guard);
            }
            Err(e) => {
                // 无法写文件时退回终端输出
                eprintln!("无法打开日志文件 {log_file}: {e}，改为输出到终端");
            }
        }
    }

    fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_names(false)
        .with_line_number(false)
        .without_time()
        .compact()
        .init();
    None
}

/// 格式化文件大小
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    if bytes < 1024 {
        return format!("{bytes} B");
    }

    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.1} {}", UNITS[unit])
}
