use crate::project_info::{metadata, version_info};
use backup_core::RestoreOrder;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// 引导恢复顺序
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OrderArg {
    /// 先数据库后文件
    #[default]
    DatabaseFirst,
    /// 先文件后数据库
    FilesFirst,
}

impl From<OrderArg> for RestoreOrder {
    fn from(value: OrderArg) -> Self {
        match value {
            OrderArg::DatabaseFirst => RestoreOrder::DatabaseFirst,
            OrderArg::FilesFirst => RestoreOrder::FilesFirst,
        }
    }
}

/// Backup CLI - 数据库与文件存储备份恢复工具
#[derive(Parser, Debug)]
#[command(name = "backup-cli")]
#[command(about = metadata::PROJECT_DESCRIPTION)]
#[command(version = version_info::CLI_VERSION)]
#[command(long_about = metadata::display::DESCRIPTION_LONG)]
#[command(author = metadata::PROJECT_AUTHORS)]
pub struct Cli {
    /// 配置文件路径（默认按 backup.toml、.backup.toml 顺序查找）
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// 详细输出
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 生成默认配置文件并创建备份目录
    Init {
        /// 如果配置文件已存在，强制覆盖
        #[arg(long)]
        force: bool,
    },
    /// 导出数据库
    ExportDatabase,
    /// 归档文件存储目录
    ExportFiles,
    /// 完整备份（数据库 + 文件）
    CompleteBackup,
    /// 列出所有备份
    List,
    /// 推荐可一起恢复的数据库/文件备份组合
    Pairs,
    /// 从数据库备份恢复
    RestoreDatabase {
        /// 备份文件名，例如 database_backup_2024-01-01_12-00-00.sql
        filename: String,
    },
    /// 从文件备份恢复
    RestoreFiles {
        /// 备份文件名，例如 files_backup_2024-01-01_12-00-00.zip
        filename: String,
    },
    /// 引导恢复：依次恢复数据库和文件
    Restore {
        /// 数据库备份文件名
        #[arg(long)]
        database: String,
        /// 文件备份文件名
        #[arg(long)]
        files: String,
        /// 恢复顺序
        #[arg(long, value_enum, default_value_t = OrderArg::DatabaseFirst)]
        order: OrderArg,
    },
    /// 删除备份文件
    Delete {
        /// 备份文件名
        filename: String,
    },
    /// 查询操作进度
    Progress {
        /// 操作ID
        operation_id: String,
        /// 持续轮询直到操作结束
        #[arg(long)]
        watch: bool,
    },
    /// 清理过期的进度记录
    CleanupProgress,
    /// 请求取消操作
    Cancel {
        /// 操作ID
        operation_id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_guided_restore() {
        let cli = Cli::try_parse_from([
            "backup-cli",
            "restore",
            "--database",
            "database_backup_2024-01-01_12-00-00.sql",
            "--files",
            "files_backup_2024-01-01_12-01-00.zip",
            "--order",
            "files-first",
        ])
        .unwrap();

        match cli.command {
            Commands::Restore { order, .. } => {
                assert_eq!(RestoreOrder::from(order), RestoreOrder::FilesFirst)
            }
            other => panic!("意外的命令: {other:?}"),
        }
    }

    #[test]
    fn test_default_order_and_flags() {
        let cli = Cli::try_parse_from([
            "backup-cli",
            "-v",
            "--config",
            "custom.toml",
            "restore",
            "--database",
            "a.sql",
            "--files",
            "b.zip",
        ])
        .unwrap();

        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("custom.toml")));
        assert!(matches!(
            cli.command,
            Commands::Restore {
                order: OrderArg::DatabaseFirst,
                ..
            }
        ));
    }

    #[test]
    fn test_progress_watch() {
        let cli = Cli::try_parse_from(["backup-cli", "progress", "export_files_1", "--watch"])
            .unwrap();
        assert!(matches!(cli.command, Commands::Progress { watch: true, .. }));
    }
}
