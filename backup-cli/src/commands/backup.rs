use crate::app::CliApp;
use crate::utils::{report_result, spinner};
use backup_core::artifact::{ArtifactKind, format_size};
use tracing::info;

/// 导出数据库
pub async fn run_export_database(app: &CliApp) -> anyhow::Result<()> {
    info!("💾 导出数据库");
    info!("==============");
    info!(
        "数据库: {}@{}:{}/{}",
        app.config.database.user,
        app.config.database.host,
        app.config.database.port,
        app.config.database.name
    );

    let pb = spinner("正在导出数据库...");
    let result = app.orchestrator.export_database().await;
    pb.finish_and_clear();

    report_result(&result)
}

/// 归档文件目录
pub async fn run_export_files(app: &CliApp) -> anyhow::Result<()> {
    info!("📦 归档文件目录");
    info!("================");
    info!("文件目录: {}", app.config.backup.files_dir);

    let pb = spinner("正在归档文件...");
    let result = app.orchestrator.export_files().await;
    pb.finish_and_clear();

    report_result(&result)
}

/// 完整备份
pub async fn run_complete_backup(app: &CliApp) -> anyhow::Result<()> {
    info!("🗄️  完整备份");
    info!("============");

    let pb = spinner("正在执行完整备份...");
    let result = app.orchestrator.create_complete_backup().await;
    pb.finish_and_clear();

    for key in ["database", "files"] {
        if let Some(part) = result.details.get(key) {
            let label = if key == "database" { "数据库" } else { "文件" };
            match part.get("filename").and_then(|v| v.as_str()) {
                Some(filename) => info!("   ✅ {}: {}", label, filename),
                None => info!("   ❌ {}: 失败", label),
            }
        }
    }

    report_result(&result)
}

/// 列出所有备份
pub fn run_list_backups(app: &CliApp) -> anyhow::Result<()> {
    let backups = app.orchestrator.list_backups()?;

    if backups.is_empty() {
        info!("📦 暂无备份");
        info!("💡 使用以下命令创建备份:");
        info!("   backup-cli complete-backup");
        return Ok(());
    }

    info!("📦 备份列表 ({})", app.config.backup.storage_dir);
    info!("============");
    info!(
        "{:<4} {:<8} {:<20} {:<10} {}",
        "序号", "类型", "创建时间 (UTC)", "大小", "文件名"
    );
    info!("{}", "-".repeat(90));

    let mut total_size = 0u64;
    for (index, backup) in backups.iter().enumerate() {
        total_size += backup.size_bytes;
        info!(
            "{:<4} {:<8} {:<20} {:<10} {}",
            index + 1,
            backup.kind.display_name(),
            backup.created_at.format("%Y-%m-%d %H:%M:%S"),
            format_size(backup.size_bytes),
            backup.filename
        );
    }

    info!("{}", "-".repeat(90));
    let count = |kind: ArtifactKind| backups.iter().filter(|b| b.kind == kind).count();
    info!(
        "共 {} 个备份 (数据库 {}, 文件 {}, 完整 {})，合计 {}",
        backups.len(),
        count(ArtifactKind::Database),
        count(ArtifactKind::Files),
        count(ArtifactKind::Complete),
        format_size(total_size)
    );
    Ok(())
}

/// 列出推荐的备份组合
pub fn run_list_pairs(app: &CliApp) -> anyhow::Result<()> {
    let pairs = app.orchestrator.get_compatible_backup_pairs()?;

    if pairs.is_empty() {
        info!("🔗 没有时间上接近的数据库/文件备份组合");
        info!("💡 使用 'backup-cli complete-backup' 同时创建两种备份");
        return Ok(());
    }

    info!("🔗 推荐的备份组合");
    info!("==================");
    info!("{:<4} {:<8} {:<42} {}", "序号", "时间差", "数据库备份", "文件备份");
    info!("{}", "-".repeat(100));
    for (index, pair) in pairs.iter().enumerate() {
        info!(
            "{:<4} {:<8} {:<42} {}",
            index + 1,
            format!("{}s", pair.time_difference_secs),
            pair.database.filename,
            pair.files.filename
        );
    }

    if let Some(best) = pairs.first() {
        info!("");
        info!("💡 使用以下命令恢复:");
        info!(
            "   backup-cli restore --database {} --files {}",
            best.database.filename, best.files.filename
        );
    }
    Ok(())
}

/// 删除备份
pub async fn run_delete(app: &CliApp, filename: &str) -> anyhow::Result<()> {
    let result = app.orchestrator.delete_backup(filename).await;
    report_result(&result)
}
