use backup_core::{BackupOrchestrator, config::AppConfig, error::Result};
use std::path::Path;

use crate::cli::Commands;
use crate::commands;

#[derive(Clone, Debug)]
pub struct CliApp {
    pub config: AppConfig,
    pub orchestrator: BackupOrchestrator,
}

impl CliApp {
    /// 加载配置并初始化；未指定路径时按默认文件名查找
    pub fn new(config_path: Option<&Path>) -> Result<Self> {
        let config = match config_path {
            Some(path) => AppConfig::load_from_file(path)?,
            None => AppConfig::find_and_load_config()?,
        };
        Self::from_config(config)
    }

    pub fn from_config(config: AppConfig) -> Result<Self> {
        let orchestrator = BackupOrchestrator::from_app_config(&config)?;
        Ok(Self {
            config,
            orchestrator,
        })
    }

    /// 运行应用命令
    pub async fn run(&self, command: Commands) -> anyhow::Result<()> {
        match command {
            Commands::Init { .. } => unreachable!(), // 已经在 main.rs 中处理
            Commands::ExportDatabase => commands::run_export_database(self).await,
            Commands::ExportFiles => commands::run_export_files(self).await,
            Commands::CompleteBackup => commands::run_complete_backup(self).await,
            Commands::List => commands::run_list_backups(self),
            Commands::Pairs => commands::run_list_pairs(self),
            Commands::RestoreDatabase { filename } => {
                commands::run_restore_database(self, &filename).await
            }
            Commands::RestoreFiles { filename } => {
                commands::run_restore_files(self, &filename).await
            }
            Commands::Restore {
                database,
                files,
                order,
            } => commands::run_guided_restore(self, &database, &files, order.into()).await,
            Commands::Delete { filename } => commands::run_delete(self, &filename).await,
            Commands::Progress {
                operation_id,
                watch,
            } => {
                if watch {
                    commands::watch_progress(self, &operation_id).await
                } else {
                    commands::show_progress(self, &operation_id)
                }
            }
            Commands::CleanupProgress => commands::run_cleanup_progress(self),
            Commands::Cancel { operation_id } => commands::run_cancel(self, &operation_id),
        }
    }
}
