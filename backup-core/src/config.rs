use crate::constants::{backup, config, dump, progress};
use crate::error::{BackupError, Result};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 配置模板中的占位符，例如 `{db_host}`
static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([a-z_]+)\}").expect("占位符正则必须合法"));

/// 应用配置结构
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub backup: BackupConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
}

/// 数据库连接配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub name: String,
    /// 额外探测的导出程序路径（优先于内置列表）
    #[serde(default)]
    pub dump_candidates: Vec<PathBuf>,
    /// 额外探测的导入程序路径（优先于内置列表）
    #[serde(default)]
    pub restore_candidates: Vec<PathBuf>,
}

/// 备份相关配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BackupConfig {
    /// 备份文件与进度记录的存放目录
    pub storage_dir: String,
    /// 需要备份的文件存储目录
    pub files_dir: String,
    /// 完整备份成功后是否额外打包 complete_backup_*.zip
    #[serde(default)]
    pub bundle_complete: bool,
}

/// 进度记录相关配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProgressConfig {
    pub retention_hours: u64,
    pub poll_interval_ms: u64,
    pub max_poll_attempts: u32,
}

fn default_port() -> u16 {
    dump::DEFAULT_PORT
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            retention_hours: progress::DEFAULT_RETENTION_HOURS,
            poll_interval_ms: progress::DEFAULT_POLL_INTERVAL_MS,
            max_poll_attempts: progress::DEFAULT_MAX_POLL_ATTEMPTS,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                host: "127.0.0.1".to_string(),
                port: dump::DEFAULT_PORT,
                user: "root".to_string(),
                password: String::new(),
                name: "app".to_string(),
                dump_candidates: Vec::new(),
                restore_candidates: Vec::new(),
            },
            backup: BackupConfig {
                storage_dir: backup::get_default_storage_dir()
                    .to_string_lossy()
                    .to_string(),
                files_dir: backup::get_default_files_dir()
                    .to_string_lossy()
                    .to_string(),
                bundle_complete: false,
            },
            progress: ProgressConfig::default(),
        }
    }
}

impl AppConfig {
    /// 智能查找并加载配置文件
    /// 按优先级查找：backup.toml -> .backup.toml
    pub fn find_and_load_config() -> Result<Self> {
        for config_file in config::CONFIG_FILE_CANDIDATES {
            if Path::new(config_file).exists() {
                tracing::info!("找到配置文件: {}", config_file);
                return Self::load_from_file(config_file);
            }
        }

        Err(BackupError::ConfigNotFound)
    }

    /// 从指定文件加载配置
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        if !path.as_ref().exists() {
            return Err(BackupError::ConfigNotFound);
        }

        let content = fs::read_to_string(&path)?;
        let mut config: AppConfig = toml::from_str(&content)?;
        config.apply_env_overrides();

        Ok(config)
    }

    /// 环境变量中的密码优先于配置文件
    fn apply_env_overrides(&mut self) {
        if let Ok(password) = std::env::var(dump::PASSWORD_ENV) {
            tracing::debug!("使用环境变量 {} 中的数据库密码", dump::PASSWORD_ENV);
            self.database.password = password;
        }
    }

    /// 保存配置到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = self.to_toml_with_comments();
        fs::write(&path, content)?;
        Ok(())
    }

    /// 生成带注释的TOML配置
    fn to_toml_with_comments(&self) -> String {
        const TEMPLATE: &str = include_str!("../templates/config.toml.template");

        // 字符串值经过 toml 转义，避免路径或密码中的引号破坏格式
        let quote = |value: &str| toml::Value::String(value.to_string()).to_string();
        let paths = |values: &[PathBuf]| {
            toml::Value::Array(
                values
                    .iter()
                    .map(|p| toml::Value::String(p.to_string_lossy().to_string()))
                    .collect(),
            )
            .to_string()
        };

        let values: HashMap<&str, String> = HashMap::from([
            ("dump_candidates", paths(&self.database.dump_candidates)),
            ("restore_candidates", paths(&self.database.restore_candidates)),
            ("db_host", quote(&self.database.host)),
            ("db_port", self.database.port.to_string()),
            ("db_user", quote(&self.database.user)),
            ("db_password", quote(&self.database.password)),
            ("db_name", quote(&self.database.name)),
            ("storage_dir", quote(&self.backup.storage_dir)),
            ("files_dir", quote(&self.backup.files_dir)),
            ("bundle_complete", self.backup.bundle_complete.to_string()),
            ("retention_hours", self.progress.retention_hours.to_string()),
            ("poll_interval_ms", self.progress.poll_interval_ms.to_string()),
            ("max_poll_attempts", self.progress.max_poll_attempts.to_string()),
        ]);

        // 一次扫描完成替换，已填入的值不会再被当作占位符
        PLACEHOLDER
            .replace_all(TEMPLATE, |caps: &Captures| match values.get(&caps[1]) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            })
            .into_owned()
    }

    /// 确保备份目录存在
    pub fn ensure_backup_dirs(&self) -> Result<()> {
        fs::create_dir_all(self.get_backup_dir())?;
        fs::create_dir_all(self.get_progress_dir())?;
        Ok(())
    }

    /// 获取备份目录路径
    pub fn get_backup_dir(&self) -> PathBuf {
        PathBuf::from(&self.backup.storage_dir)
    }

    /// 获取待备份文件目录路径
    pub fn get_files_dir(&self) -> PathBuf {
        PathBuf::from(&self.backup.files_dir)
    }

    /// 获取进度记录目录路径
    pub fn get_progress_dir(&self) -> PathBuf {
        self.get_backup_dir().join(progress::PROGRESS_DIR_NAME)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.progress.retention_hours * 3600)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.progress.poll_interval_ms)
    }
}
