use crate::app::CliApp;
use crate::utils::{report_result, spinner};
use backup_core::{OperationResult, RestoreOrder};
use tracing::{info, warn};

fn show_safety_snapshot(result: &OperationResult) {
    let snapshot = result
        .details
        .get("safety_snapshot")
        .or_else(|| result.details.get("files").and_then(|f| f.get("safety_snapshot")))
        .and_then(|v| v.as_str());
    if let Some(snapshot) = snapshot {
        info!("🛟 恢复前的目录已保留在: {}", snapshot);
        info!("   确认无误后可手动删除");
    }
}

/// 从数据库备份恢复
pub async fn run_restore_database(app: &CliApp, filename: &str) -> anyhow::Result<()> {
    info!("♻️  恢复数据库: {}", filename);
    warn!("⚠️  恢复会覆盖数据库 {} 中的现有数据", app.config.database.name);

    let pb = spinner("正在导入数据库...");
    let result = app.orchestrator.restore_database(filename).await;
    pb.finish_and_clear();

    report_result(&result)
}

/// 从文件备份恢复
pub async fn run_restore_files(app: &CliApp, filename: &str) -> anyhow::Result<()> {
    info!("♻️  恢复文件: {}", filename);
    info!("目标目录: {}", app.config.backup.files_dir);

    let pb = spinner("正在解压文件...");
    let result = app.orchestrator.restore_files(filename).await;
    pb.finish_and_clear();

    show_safety_snapshot(&result);
    report_result(&result)
}

/// 引导恢复
pub async fn run_guided_restore(
    app: &CliApp,
    database: &str,
    files: &str,
    order: RestoreOrder,
) -> anyhow::Result<()> {
    info!("🧭 引导恢复");
    info!("============");
    info!("数据库备份: {}", database);
    info!("文件备份:   {}", files);
    info!(
        "恢复顺序:   {}",
        match order {
            RestoreOrder::DatabaseFirst => "先数据库后文件",
            RestoreOrder::FilesFirst => "先文件后数据库",
        }
    );

    let pb = spinner("正在恢复...");
    let result = app
        .orchestrator
        .guided_restore(database, files, order)
        .await;
    pb.finish_and_clear();

    show_safety_snapshot(&result);
    report_result(&result)
}
