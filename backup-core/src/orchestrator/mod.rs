// 备份编排
//
// 把数据库导出/导入、目录归档/解压和进度记录组合成对外的备份恢复操作。
// 所有对外操作都返回 OperationResult，不会把错误抛给调用方；
// 内部错误会同时写成失败的进度记录。
//
// 主要组件：
// - BackupOrchestrator: 单步导出/恢复、完整备份、删除、进度查询
// - guided: 两阶段引导恢复（顺序可选，失败即中止）
// - pairs: 数据库与文件备份的配对建议

mod guided;
mod pairs;


pub use guided::RestoreOrder;
pub use pairs::{BackupPair, compatible_pairs};

use crate::archive::{self, ArchiveStats, ExtractReport, FileArchiver, ZipArchiver};
use crate::artifact::{self, ArtifactKind, BackupArtifact};
use crate::config::AppConfig;
use crate::constants::operation;
use crate::dump::{DatabaseBackend, MysqlDumper};
use crate::error::{BackupError, Result};
use crate::progress::{self, FileProgressStore, ProgressRecord, ProgressStore, ProgressTracker};
use chrono::Utc;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// 编排器配置
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// 备份文件存放目录
    pub backup_dir: PathBuf,
    /// 需要备份的文件存储目录
    pub files_dir: PathBuf,
    /// 完整备份成功后额外打包
    pub bundle_complete: bool,
    /// 进度记录保留时长
    pub progress_retention: Duration,
}

impl OrchestratorConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            backup_dir: config.get_backup_dir(),
            files_dir: config.get_files_dir(),
            bundle_complete: config.backup.bundle_complete,
            progress_retention: config.retention(),
        }
    }
}

/// 对外操作的结果，message 可直接展示给用户
#[derive(Debug, Clone, Serialize)]
pub struct OperationResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    pub details: BTreeMap<String, Value>,
}

impl OperationResult {
    pub fn succeeded(message: impl Into<String>, operation_id: Option<&str>) -> Self {
        Self {
            success: true,
            message: message.into(),
            operation_id: operation_id.map(str::to_string),
            details: BTreeMap::new(),
        }
    }

    pub fn failed(message: impl Into<String>, operation_id: Option<&str>) -> Self {
        Self {
            success: false,
            message: message.into(),
            operation_id: operation_id.map(str::to_string),
            details: BTreeMap::new(),
        }
    }

    pub fn with_details(mut self, details: BTreeMap<String, Value>) -> Self {
        self.details = details;
        self
    }
}

/// 阶段在整体进度中的区间
#[derive(Debug, Clone, Copy)]
pub(crate) struct PhaseRange {
    start: u8,
    end: u8,
}

impl PhaseRange {
    pub(crate) const FULL: PhaseRange = PhaseRange::new(0, 100);

    pub(crate) const fn new(start: u8, end: u8) -> Self {
        Self { start, end }
    }

    /// 阶段内百分比映射到整体百分比
    pub(crate) fn at(&self, percent: u8) -> u8 {
        let span = self.end.saturating_sub(self.start) as u16;
        self.start + (span * percent.min(100) as u16 / 100) as u8
    }
}

/// 固定的阶段检查点
const CHECKPOINTS: [(&str, u8); 5] = [
    ("initializing", 0),
    ("analyzing", 10),
    ("preparing", 25),
    ("executing", 40),
    ("verifying", 90),
];

fn checkpoint(tracker: &ProgressTracker, range: PhaseRange, index: usize, message: &str) {
    let (step, percent) = CHECKPOINTS[index];
    tracker.update_progress(step, message, Some(range.at(percent)), None);
}

fn error_value(err: &BackupError) -> Value {
    json!({
        "kind": err.kind(),
        "message": err.to_string(),
    })
}

fn object(details: &BTreeMap<String, Value>) -> Value {
    Value::Object(details.clone().into_iter().collect())
}

/// 写入完成记录并生成成功结果
fn complete(
    tracker: &ProgressTracker,
    message: String,
    details: BTreeMap<String, Value>,
) -> OperationResult {
    info!("操作完成 {}: {}", tracker.operation_id(), message);
    tracker.mark_completed(&message, object(&details));
    OperationResult::succeeded(message, Some(tracker.operation_id())).with_details(details)
}

/// 写入失败记录并生成失败结果
fn fail(
    tracker: &ProgressTracker,
    message: String,
    err: Option<&BackupError>,
    mut details: BTreeMap<String, Value>,
) -> OperationResult {
    error!("操作失败 {}: {}", tracker.operation_id(), message);
    let error = match err {
        Some(err) => error_value(err),
        None => json!({ "message": message }),
    };
    details.insert("error".to_string(), error.clone());
    tracker.mark_failed(&message, error);
    OperationResult::failed(message, Some(tracker.operation_id())).with_details(details)
}

/// 数据库导出结果
#[derive(Debug, Clone)]
pub(crate) struct DatabaseExport {
    pub filename: String,
    pub size_bytes: u64,
}

/// 文件导出结果
#[derive(Debug, Clone)]
pub(crate) struct FilesExport {
    pub filename: String,
    pub size_bytes: u64,
    pub stats: ArchiveStats,
}

/// 备份编排器
#[derive(Clone)]
pub struct BackupOrchestrator {
    config: OrchestratorConfig,
    database: Arc<dyn DatabaseBackend>,
    archiver: Arc<dyn FileArchiver>,
    progress: Arc<dyn ProgressStore>,
}

impl std::fmt::Debug for BackupOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupOrchestrator")
            .field("config", &self.config)
            .finish()
    }
}

impl BackupOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        database: Arc<dyn DatabaseBackend>,
        archiver: Arc<dyn FileArchiver>,
        progress: Arc<dyn ProgressStore>,
    ) -> Self {
        Self {
            config,
            database,
            archiver,
            progress,
        }
    }

    /// 使用 mysqldump、ZIP 归档和文件进度存储创建编排器
    pub fn from_app_config(config: &AppConfig) -> Result<Self> {
        config.ensure_backup_dirs()?;
        let progress = FileProgressStore::new(config.get_progress_dir())?;

        Ok(Self::new(
            OrchestratorConfig::from_app_config(config),
            Arc::new(MysqlDumper::new(config.database.clone())),
            Arc::new(ZipArchiver),
            Arc::new(progress),
        ))
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn progress_store(&self) -> Arc<dyn ProgressStore> {
        self.progress.clone()
    }

    fn tracker(&self, operation_type: &str) -> ProgressTracker {
        ProgressTracker::new(operation_type, self.progress.clone())
    }

    /// 文件目录的父目录和目录名，解压时以此为目标
    fn files_location(&self) -> Result<(PathBuf, String)> {
        let files_dir = &self.config.files_dir;
        let root_name = files_dir
            .file_name()
            .ok_or_else(|| {
                BackupError::filesystem(format!("无法获取目录名: {}", files_dir.display()))
            })?
            .to_string_lossy()
            .to_string();
        let parent = match files_dir.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Ok((parent, root_name))
    }

    /// 备份目录不能位于文件目录内，否则归档会收进其他备份，恢复时备份目录也会被移进安全快照
    fn check_layout(&self) -> Result<()> {
        if archive::is_inside(&self.config.backup_dir, &self.config.files_dir) {
            return Err(BackupError::filesystem(format!(
                "备份目录 {} 不能位于文件目录 {} 内",
                self.config.backup_dir.display(),
                self.config.files_dir.display()
            )));
        }
        Ok(())
    }

    /// 生成新的备份文件路径，同名文件已存在时拒绝覆盖
    fn new_artifact_path(&self, kind: ArtifactKind) -> Result<(String, PathBuf)> {
        let filename = artifact::artifact_filename(kind, Utc::now());
        let path = self.config.backup_dir.join(&filename);
        if path.exists() {
            return Err(BackupError::filesystem(format!("备份文件已存在: {filename}")));
        }
        Ok((filename, path))
    }

    /// 校验外部传入的备份文件名并确认文件存在且非空
    fn existing_artifact(&self, filename: &str, kind: ArtifactKind) -> Result<PathBuf> {
        let (_, path) =
            artifact::resolve_artifact_path(&self.config.backup_dir, filename, Some(kind))?;
        match std::fs::metadata(&path) {
            Ok(metadata) if metadata.is_file() && metadata.len() > 0 => Ok(path),
            _ => Err(BackupError::ArtifactMissingOrEmpty(filename.to_string())),
        }
    }

    pub(crate) async fn run_database_export(
        &self,
        tracker: &ProgressTracker,
        range: PhaseRange,
    ) -> Result<DatabaseExport> {
        checkpoint(tracker, range, 0, "准备导出数据库");
        checkpoint(tracker, range, 1, "检查备份目录");
        tokio::fs::create_dir_all(&self.config.backup_dir).await?;

        checkpoint(tracker, range, 2, "生成备份文件名");
        let (filename, path) = self.new_artifact_path(ArtifactKind::Database)?;

        checkpoint(tracker, range, 3, &format!("正在导出数据库到 {filename}"));
        let size_bytes = self.database.export_database(&path).await?;

        checkpoint(tracker, range, 4, "校验数据库备份文件");
        let actual = tokio::fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
        if actual == 0 {
            discard_artifact(&path).await;
            return Err(BackupError::ArtifactMissingOrEmpty(filename));
        }

        Ok(DatabaseExport {
            filename,
            size_bytes: size_bytes.max(actual),
        })
    }

    pub(crate) async fn run_files_export(
        &self,
        tracker: &ProgressTracker,
        range: PhaseRange,
    ) -> Result<FilesExport> {
        checkpoint(tracker, range, 0, "准备归档文件目录");
        checkpoint(
            tracker,
            range,
            1,
            &format!("检查文件目录 {}", self.config.files_dir.display()),
        );
        if !self.config.files_dir.is_dir() {
            return Err(BackupError::SourceMissing(
                self.config.files_dir.display().to_string(),
            ));
        }
        self.check_layout()?;
        tokio::fs::create_dir_all(&self.config.backup_dir).await?;

        checkpoint(tracker, range, 2, "生成备份文件名");
        let (filename, path) = self.new_artifact_path(ArtifactKind::Files)?;

        checkpoint(tracker, range, 3, &format!("正在归档文件到 {filename}"));
        let stats = self
            .archiver
            .build_archive(&self.config.files_dir, &path)
            .await?;

        checkpoint(tracker, range, 4, "校验文件归档");
        let size_bytes = tokio::fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
        if size_bytes == 0 {
            discard_artifact(&path).await;
            return Err(BackupError::ArtifactMissingOrEmpty(filename));
        }

        Ok(FilesExport {
            filename,
            size_bytes,
            stats,
        })
    }

    pub(crate) async fn run_database_restore(
        &self,
        tracker: &ProgressTracker,
        range: PhaseRange,
        path: &Path,
    ) -> Result<()> {
        checkpoint(tracker, range, 0, "准备恢复数据库");
        checkpoint(tracker, range, 1, "检查数据库备份文件");
        checkpoint(tracker, range, 2, "连接数据库");
        checkpoint(tracker, range, 3, "正在导入数据库");
        self.database.restore_database(path).await?;
        checkpoint(tracker, range, 4, "数据库导入完成");
        Ok(())
    }

    pub(crate) async fn run_files_restore(
        &self,
        tracker: &ProgressTracker,
        range: PhaseRange,
        path: &Path,
    ) -> Result<ExtractReport> {
        checkpoint(tracker, range, 0, "准备恢复文件");
        checkpoint(tracker, range, 1, "检查文件归档");
        self.check_layout()?;
        let (destination_parent, root_name) = self.files_location()?;

        checkpoint(
            tracker,
            range,
            2,
            &format!("将恢复到 {}", destination_parent.join(&root_name).display()),
        );
        checkpoint(tracker, range, 3, "正在解压文件归档");
        let report = self
            .archiver
            .extract_archive(path, &destination_parent, &root_name)
            .await?;

        checkpoint(
            tracker,
            range,
            4,
            &format!("已恢复 {} 个文件", report.restored_files),
        );
        Ok(report)
    }

    /// 导出数据库
    pub async fn export_database(&self) -> OperationResult {
        let tracker = self.tracker(operation::EXPORT_DATABASE);
        info!("💾 开始导出数据库: {}", tracker.operation_id());

        match self.run_database_export(&tracker, PhaseRange::FULL).await {
            Ok(export) => {
                let mut details = BTreeMap::new();
                details.insert("filename".to_string(), json!(export.filename));
                details.insert("size_bytes".to_string(), json!(export.size_bytes));
                complete(
                    &tracker,
                    format!(
                        "数据库备份成功: {} ({})",
                        export.filename,
                        artifact::format_size(export.size_bytes)
                    ),
                    details,
                )
            }
            Err(e) => fail(
                &tracker,
                format!("数据库备份失败: {e}"),
                Some(&e),
                BTreeMap::new(),
            ),
        }
    }

    /// 归档文件目录
    pub async fn export_files(&self) -> OperationResult {
        let tracker = self.tracker(operation::EXPORT_FILES);
        info!("📦 开始归档文件: {}", tracker.operation_id());

        match self.run_files_export(&tracker, PhaseRange::FULL).await {
            Ok(export) => {
                let details = files_export_details(&export);
                complete(
                    &tracker,
                    format!(
                        "文件备份成功: {} ({} 个文件, {})",
                        export.filename,
                        export.stats.files,
                        artifact::format_size(export.size_bytes)
                    ),
                    details,
                )
            }
            Err(e) => fail(
                &tracker,
                format!("文件备份失败: {e}"),
                Some(&e),
                BTreeMap::new(),
            ),
        }
    }

    /// 完整备份：先导出数据库，无论成败都继续归档文件
    pub async fn create_complete_backup(&self) -> OperationResult {
        let tracker = self.tracker(operation::COMPLETE_BACKUP);
        info!("🗄️  开始完整备份: {}", tracker.operation_id());
        tracker.update_progress("initializing", "开始完整备份", Some(0), None);

        let database = self
            .run_database_export(&tracker, PhaseRange::new(5, 50))
            .await;
        if let Err(e) = &database {
            warn!("数据库备份失败，继续备份文件: {}", e);
        }

        tracker.update_progress("files", "开始备份文件", Some(55), None);
        let files = self.run_files_export(&tracker, PhaseRange::new(55, 90)).await;

        let mut details = BTreeMap::new();
        details.insert(
            "database".to_string(),
            match &database {
                Ok(export) => json!({
                    "success": true,
                    "filename": export.filename,
                    "size_bytes": export.size_bytes,
                }),
                Err(e) => json!({ "success": false, "error": error_value(e) }),
            },
        );
        details.insert(
            "files".to_string(),
            match &files {
                Ok(export) => {
                    let mut value = object(&files_export_details(export));
                    value["success"] = json!(true);
                    value
                }
                Err(e) => json!({ "success": false, "error": error_value(e) }),
            },
        );

        match (&database, &files) {
            (Ok(db), Ok(fs_export)) => {
                let mut message = format!(
                    "完整备份成功: {} + {}",
                    db.filename, fs_export.filename
                );
                if self.config.bundle_complete {
                    tracker.update_progress("bundling", "打包完整备份", Some(92), None);
                    match self.bundle(&db.filename, &fs_export.filename).await {
                        Ok(bundle) => {
                            message.push_str(&format!("，已打包为 {bundle}"));
                            details.insert("bundle".to_string(), json!(bundle));
                        }
                        Err(e) => {
                            warn!("打包完整备份失败: {}", e);
                            message.push_str(&format!("（打包失败: {e}）"));
                            details.insert("bundle_error".to_string(), error_value(&e));
                        }
                    }
                }
                complete(&tracker, message, details)
            }
            (Err(db_err), Ok(_)) => fail(
                &tracker,
                format!("完整备份未完成: 数据库备份失败 ({db_err})，文件备份已保留"),
                None,
                details,
            ),
            (Ok(_), Err(files_err)) => fail(
                &tracker,
                format!("完整备份未完成: 文件备份失败 ({files_err})，数据库备份已保留"),
                None,
                details,
            ),
            (Err(db_err), Err(files_err)) => fail(
                &tracker,
                format!("完整备份失败: 数据库 ({db_err})；文件 ({files_err})"),
                None,
                details,
            ),
        }
    }

    async fn bundle(&self, database: &str, files: &str) -> Result<String> {
        let (filename, path) = self.new_artifact_path(ArtifactKind::Complete)?;
        let members = vec![
            self.config.backup_dir.join(database),
            self.config.backup_dir.join(files),
        ];
        tokio::task::spawn_blocking(move || archive::bundle_files(&path, &members)).await??;
        Ok(filename)
    }

    /// 从数据库备份恢复
    pub async fn restore_database(&self, filename: &str) -> OperationResult {
        let tracker = self.tracker(operation::RESTORE_DATABASE);
        info!("♻️  开始恢复数据库: {} ({})", filename, tracker.operation_id());

        let result = async {
            let path = self.existing_artifact(filename, ArtifactKind::Database)?;
            self.run_database_restore(&tracker, PhaseRange::FULL, &path)
                .await
        }
        .await;

        let mut details = BTreeMap::new();
        details.insert("filename".to_string(), json!(filename));
        match result {
            Ok(()) => complete(&tracker, format!("数据库已从 {filename} 恢复"), details),
            Err(e) => fail(&tracker, format!("数据库恢复失败: {e}"), Some(&e), details),
        }
    }

    /// 从文件归档恢复
    pub async fn restore_files(&self, filename: &str) -> OperationResult {
        let tracker = self.tracker(operation::RESTORE_FILES);
        info!("♻️  开始恢复文件: {} ({})", filename, tracker.operation_id());

        let result = async {
            let path = self.existing_artifact(filename, ArtifactKind::Files)?;
            self.run_files_restore(&tracker, PhaseRange::FULL, &path)
                .await
        }
        .await;

        let mut details = BTreeMap::new();
        details.insert("filename".to_string(), json!(filename));
        match result {
            Ok(report) => {
                details.extend(extract_details(&report));
                complete(
                    &tracker,
                    restore_files_message(filename, &report),
                    details,
                )
            }
            Err(e) => fail(&tracker, format!("文件恢复失败: {e}"), Some(&e), details),
        }
    }

    /// 列出备份文件，按时间从新到旧
    pub fn list_backups(&self) -> Result<Vec<BackupArtifact>> {
        artifact::list_artifacts(&self.config.backup_dir)
    }

    /// 删除备份文件
    pub async fn delete_backup(&self, filename: &str) -> OperationResult {
        let path = match artifact::resolve_artifact_path(&self.config.backup_dir, filename, None)
        {
            Ok((_, path)) => path,
            Err(e) => return OperationResult::failed(format!("删除失败: {e}"), None),
        };

        if !path.is_file() {
            return OperationResult::failed(format!("备份文件不存在: {filename}"), None);
        }

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!("🗑️  删除备份文件: {}", path.display());
                OperationResult::succeeded(format!("已删除备份: {filename}"), None)
            }
            Err(e) => {
                error!("删除备份文件失败 {}: {}", path.display(), e);
                OperationResult::failed(format!("删除备份失败: {filename}: {e}"), None)
            }
        }
    }

    /// 读取操作的最新进度
    pub fn get_progress(&self, operation_id: &str) -> Result<Option<ProgressRecord>> {
        self.progress.get(operation_id)
    }

    /// 清理过期进度记录，由维护任务调用
    pub fn cleanup_old_progress(&self) -> Result<usize> {
        progress::cleanup_old_progress(self.progress.as_ref(), self.config.progress_retention)
    }

    /// 取消请求：目前只做应答，不会中断正在运行的导出/解压
    // TODO: 通过取消令牌接入子进程等待与目录遍历后再支持真正的取消
    pub fn cancel_operation(&self, operation_id: &str) -> OperationResult {
        match self.progress.get(operation_id) {
            Ok(Some(record)) if record.status.is_terminal() => OperationResult::failed(
                format!(
                    "操作 {operation_id} 已结束 ({})，无需取消",
                    record.status.display_name()
                ),
                Some(operation_id),
            ),
            Ok(Some(_)) => {
                warn!("收到取消请求，但当前不支持取消: {}", operation_id);
                let mut details = BTreeMap::new();
                details.insert("cancel_supported".to_string(), json!(false));
                OperationResult::failed(
                    format!("暂不支持取消，操作 {operation_id} 将继续在后台运行直至结束"),
                    Some(operation_id),
                )
                .with_details(details)
            }
            Ok(None) => OperationResult::failed(format!("未找到操作: {operation_id}"), None),
            Err(e) => OperationResult::failed(format!("读取进度失败: {e}"), None),
        }
    }
}

/// 删除校验失败的备份文件
async fn discard_artifact(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("删除无效的备份文件失败 {}: {}", path.display(), e);
        }
    }
}

fn files_export_details(export: &FilesExport) -> BTreeMap<String, Value> {
    let mut details = BTreeMap::new();
    details.insert("filename".to_string(), json!(export.filename));
    details.insert("size_bytes".to_string(), json!(export.size_bytes));
    details.insert("file_count".to_string(), json!(export.stats.files));
    details.insert("directory_count".to_string(), json!(export.stats.directories));
    details
}

pub(crate) fn extract_details(report: &ExtractReport) -> BTreeMap<String, Value> {
    let mut details = BTreeMap::new();
    details.insert("restored_files".to_string(), json!(report.restored_files));
    details.insert(
        "restored_root".to_string(),
        json!(report.restored_root.display().to_string()),
    );
    details.insert(
        "safety_snapshot".to_string(),
        match &report.safety_snapshot {
            Some(path) => json!(path.display().to_string()),
            None => Value::Null,
        },
    );
    details
}

pub(crate) fn restore_files_message(filename: &str, report: &ExtractReport) -> String {
    match &report.safety_snapshot {
        Some(snapshot) => format!(
            "文件已从 {filename} 恢复 ({} 个文件)，原目录已保留在 {}",
            report.restored_files,
            snapshot.display()
        ),
        None => format!(
            "文件已从 {filename} 恢复 ({} 个文件)",
            report.restored_files
        ),
    }
}
