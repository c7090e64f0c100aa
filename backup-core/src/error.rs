use thiserror::Error;

pub type Result<T> = std::result::Result<T, BackupError>;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("配置错误: {0}")]
    Config(#[from] toml::de::Error),

    #[error("未找到可执行程序: {0}")]
    ExecutableNotFound(String),

    #[error("可执行程序无法运行: {path}: {reason}")]
    ExecutableNotRunnable { path: String, reason: String },

    #[error("外部进程执行失败 (退出码: {}): {output}", exit_code.map(|c| c.to_string()).unwrap_or_else(|| "无".to_string()))]
    ProcessExecutionFailed {
        exit_code: Option<i32>,
        output: String,
    },

    #[error("备份文件不存在或为空: {0}")]
    ArtifactMissingOrEmpty(String),

    #[error("无法打开归档文件: {0}")]
    ArchiveOpenFailed(String),

    #[error("解压归档失败: {0}")]
    ArchiveExtractFailed(String),

    #[error("恢复结果校验失败: {0}")]
    VerificationFailed(String),

    #[error("源目录不存在: {0}")]
    SourceMissing(String),

    #[error("无效的备份文件名: {0}")]
    InvalidArtifactName(String),

    #[error("文件系统错误: {0}")]
    Filesystem(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("任务执行错误: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("ZIP 文件错误: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("目录遍历错误: {0}")]
    WalkDir(#[from] walkdir::Error),

    #[error("路径错误: {0}")]
    StripPrefix(#[from] std::path::StripPrefixError),

    #[error("配置文件未找到")]
    ConfigNotFound,
}

impl BackupError {
    pub fn filesystem(msg: impl Into<String>) -> Self {
        Self::Filesystem(msg.into())
    }

    pub fn process_failed(exit_code: Option<i32>, output: impl Into<String>) -> Self {
        Self::ProcessExecutionFailed {
            exit_code,
            output: output.into(),
        }
    }

    /// 错误分类标识，写入进度记录的 error 字段
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ExecutableNotFound(_) => "executable_not_found",
            Self::ExecutableNotRunnable { .. } => "executable_not_runnable",
            Self::ProcessExecutionFailed { .. } => "process_execution_failed",
            Self::ArtifactMissingOrEmpty(_) => "artifact_missing_or_empty",
            Self::ArchiveOpenFailed(_) => "archive_open_failed",
            Self::ArchiveExtractFailed(_) => "archive_extract_failed",
            Self::VerificationFailed(_) => "verification_failed",
            Self::SourceMissing(_) => "source_missing",
            Self::InvalidArtifactName(_) => "invalid_artifact_name",
            Self::Config(_) | Self::ConfigNotFound => "config",
            _ => "filesystem_error",
        }
    }
}
