use crate::app::CliApp;
use crate::utils::{percentage_bar, report_result};
use backup_core::artifact::format_size;
use backup_core::progress::{OperationStatus, PollOutcome, ProgressRecord, poll_progress};
use tracing::{info, warn};

fn show_record(record: &ProgressRecord) {
    info!("📊 操作 {}", record.operation_id);
    info!("   类型:     {}", record.operation_type);
    info!("   状态:     {}", record.status.display_name());
    info!("   步骤:     {}", record.step);
    info!("   信息:     {}", record.message);
    match record.percentage {
        Some(p) => info!("   进度:     {}%", p),
        None => info!("   进度:     未知"),
    }
    info!(
        "   内存:     {} (峰值 {})",
        format_size(record.memory_usage),
        format_size(record.peak_memory)
    );
    info!(
        "   更新时间: {}",
        record.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
    );
    if let Some(error) = &record.error {
        info!("   错误:     {}", error);
    }
}

/// 查询一次进度
pub fn show_progress(app: &CliApp, operation_id: &str) -> anyhow::Result<()> {
    match app.orchestrator.get_progress(operation_id)? {
        Some(record) => {
            show_record(&record);
            Ok(())
        }
        None => anyhow::bail!("未找到操作: {operation_id}"),
    }
}

/// 轮询进度直到操作结束
pub async fn watch_progress(app: &CliApp, operation_id: &str) -> anyhow::Result<()> {
    let store = app.orchestrator.progress_store();
    let pb = percentage_bar();

    let outcome = poll_progress(
        store.as_ref(),
        operation_id,
        app.config.poll_interval(),
        app.config.progress.max_poll_attempts,
        |record| {
            if let Some(p) = record.percentage {
                pb.set_position(p as u64);
            }
            pb.set_message(format!("[{}] {}", record.step, record.message));
        },
    )
    .await?;

    match outcome {
        PollOutcome::Finished(record) => {
            pb.finish_and_clear();
            show_record(&record);
            if record.status == OperationStatus::Failed {
                anyhow::bail!("操作失败: {}", record.message);
            }
            Ok(())
        }
        PollOutcome::NotFound => {
            pb.abandon();
            anyhow::bail!("未找到操作: {operation_id}")
        }
        PollOutcome::TimedOut(record) => {
            pb.abandon();
            warn!("⏱️  已停止等待，操作仍在后台运行");
            show_record(&record);
            info!("💡 稍后可再次运行 'backup-cli progress {}' 查看", operation_id);
            Ok(())
        }
    }
}

/// 清理过期进度记录
pub fn run_cleanup_progress(app: &CliApp) -> anyhow::Result<()> {
    let removed = app.orchestrator.cleanup_old_progress()?;
    info!(
        "🧹 已清理 {} 条超过 {} 小时的进度记录",
        removed, app.config.progress.retention_hours
    );
    Ok(())
}

/// 请求取消操作
pub fn run_cancel(app: &CliApp, operation_id: &str) -> anyhow::Result<()> {
    let result = app.orchestrator.cancel_operation(operation_id);
    report_result(&result)
}
