use backup_core::OperationResult;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;

/// 日志文件环境变量
pub const LOG_FILE_ENV: &str = "BACKUP_LOG_FILE";

/// 初始化日志
///
/// - `-v, --verbose` 启用 DEBUG 级别，`RUST_LOG` 优先
/// - 设置 `BACKUP_LOG_FILE` 后日志写入文件（包含模块路径和行号），否则输出到终端
///
/// 写文件时返回的 guard 需要在 main 中持有到程序结束，否则缓冲中的日志会丢失。
pub fn setup_logging(verbose: bool) -> Option<WorkerGuard> {
    use tracing_subscriber::{EnvFilter, fmt};

    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if let Ok(log_file) = std::env::var(LOG_FILE_ENV) {
        let path = Path::new(&log_file);
        let directory = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let file_name = path.file_name().unwrap_or(path.as_os_str());
        let appender = tracing_appender::rolling::never(directory, file_name);
        let (writer, guard) = tracing_appender::non_blocking(appender);

        fmt()
            .with_env_filter(env_filter)
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
            .with_thread_names(true)
            .with_line_number(true)
            .init();
        Some(guard)
    } else {
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
}

/// 操作执行期间显示的等待动画
pub fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.green} {msg} [{elapsed}]") {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

/// 百分比进度条
pub fn percentage_bar() -> ProgressBar {
    let pb = ProgressBar::new(100);
    if let Ok(style) =
        ProgressStyle::with_template("{bar:40.cyan/blue} {pos:>3}% {wide_msg}")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb
}

/// 输出操作结果，失败时返回错误以便 main 设置退出码
pub fn report_result(result: &OperationResult) -> anyhow::Result<()> {
    if let Some(id) = &result.operation_id {
        info!("🆔 操作ID: {}", id);
    }

    if result.success {
        info!("✅ {}", result.message);
        Ok(())
    } else {
        anyhow::bail!("{}", result.message)
    }
}
