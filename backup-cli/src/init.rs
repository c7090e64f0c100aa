use backup_core::{config::AppConfig, constants::config, error::Result};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// 运行独立的初始化流程
pub fn run_init(config_path: Option<&Path>, force: bool) -> Result<()> {
    info!("🗄️  Backup CLI 初始化");
    info!("======================");

    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(config::CONFIG_FILE_NAME));

    info!("📋 步骤 1: 创建配置文件");
    let Some(config) = write_default_config(&path, force)? else {
        warn!("⚠️  检测到已存在的配置文件: {}", path.display());
        info!("如果您要重新初始化，请使用 --force 参数");
        info!("示例: backup-cli init --force");
        return Ok(());
    };
    info!("   ✅ 创建配置文件: {}", path.display());

    info!("📋 步骤 2: 创建目录结构");
    config.ensure_backup_dirs()?;
    info!("   ✅ 创建目录结构:");
    info!("      - {}          (备份存储目录)", config.backup.storage_dir);
    info!(
        "      - {} (进度记录目录)",
        config.get_progress_dir().display()
    );

    info!("🎉 初始化完成！");
    info!("");
    info!("📝 接下来的步骤:");
    info!("   1️⃣  编辑 {} 填写数据库连接和文件目录", path.display());
    info!("   2️⃣  运行 'backup-cli complete-backup' 创建第一份完整备份");
    info!("");
    info!("💡 提示:");
    info!("   - 数据库密码也可以通过环境变量 BACKUP_DB_PASSWORD 提供");
    info!("   - 使用 'backup-cli --help' 查看所有可用命令");

    Ok(())
}

/// 写入默认配置；文件已存在且未指定 force 时返回 None
fn write_default_config(path: &Path, force: bool) -> Result<Option<AppConfig>> {
    if !force && path.exists() {
        return Ok(None);
    }
    let config = AppConfig::default();
    config.save_to_file(path)?;
    Ok(Some(config))
}
