use backup_cli::{Cli, CliApp, Commands, run_init, setup_logging};
use backup_core::BackupError;
use clap::Parser;
use tracing::{debug, error};

#[tokio::main]
async fn main() {
    // 解析命令行参数
    let cli = Cli::parse();

    // 写文件时需要持有 guard 直到退出
    let _log_guard = setup_logging(cli.verbose);
    debug!("{}", backup_cli::project_info::get_version_string());

    // `init` 命令是特例，它不需要预先加载配置
    if let Commands::Init { force } = cli.command {
        if let Err(e) = run_init(cli.config.as_deref(), force) {
            error!("❌ 初始化失败: {}", e);
            std::process::exit(1);
        }
        return;
    }

    let app = match CliApp::new(cli.config.as_deref()) {
        Ok(app) => app,
        Err(BackupError::ConfigNotFound) => {
            match &cli.config {
                Some(path) => error!("❌ 配置文件 '{}' 未找到。", path.display()),
                None => error!("❌ 未找到配置文件 (backup.toml 或 .backup.toml)。"),
            }
            error!("👉 请先运行 'backup-cli init' 命令来创建配置文件。");
            std::process::exit(1);
        }
        Err(e) => {
            error!("❌ 应用初始化失败: {}", e);
            std::process::exit(1);
        }
    };

    // 运行命令
    if let Err(e) = app.run(cli.command).await {
        error!("❌ 操作失败: {:#}", e);
        std::process::exit(1);
    }
}
