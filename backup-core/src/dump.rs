//! 数据库导出/导入
//!
//! 通过外部的 `mysqldump` / `mysql` 程序完成整库导出和导入，
//! 导出结果是可移植的 SQL 文本。

use crate::config::DatabaseConfig;
use crate::constants::dump::{
    DUMP_CANDIDATES, DUMP_FLAGS, DUMP_PROGRAM, MAX_CAPTURED_OUTPUT, RESTORE_CANDIDATES,
    RESTORE_FLAGS, RESTORE_PROGRAM,
};
use crate::error::{BackupError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// 数据库导出/导入后端
#[async_trait]
pub trait DatabaseBackend: Send + Sync {
    /// 导出整库到 `target`，成功时返回文件大小
    async fn export_database(&self, target: &Path) -> Result<u64>;

    /// 从 `source` 导入整库
    async fn restore_database(&self, source: &Path) -> Result<()>;
}

/// 外部程序的查找规则：先探测固定安装位置，再回退到 PATH
#[derive(Debug, Clone)]
pub struct ExecutableSpec {
    pub program: String,
    pub candidates: Vec<PathBuf>,
}

impl ExecutableSpec {
    pub fn new(program: impl Into<String>, candidates: Vec<PathBuf>) -> Self {
        Self {
            program: program.into(),
            candidates,
        }
    }

    /// 解析出可执行文件路径
    ///
    /// 存在但无法运行的候选会被跳过；全部不可用时优先报告最后一个不可运行的错误。
    pub fn resolve(&self) -> Result<PathBuf> {
        let mut not_runnable = None;

        for candidate in &self.candidates {
            if !candidate.is_file() {
                continue;
            }
            debug!("找到候选程序: {}", candidate.display());
            match check_runnable(candidate) {
                Ok(()) => return Ok(candidate.clone()),
                Err(e) => {
                    warn!("跳过无法运行的候选程序: {}", e);
                    not_runnable = Some(e);
                }
            }
        }

        if let Ok(path) = which::which(&self.program) {
            debug!("在 PATH 中找到程序: {}", path.display());
            match check_runnable(&path) {
                Ok(()) => return Ok(path),
                Err(e) => not_runnable = Some(e),
            }
        }

        Err(not_runnable.unwrap_or_else(|| {
            BackupError::ExecutableNotFound(format!(
                "{} (已探测 {} 个安装位置及 PATH)",
                self.program,
                self.candidates.len()
            ))
        }))
    }
}

#[cfg(unix)]
fn check_runnable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = std::fs::metadata(path).map_err(|e| BackupError::ExecutableNotRunnable {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    if metadata.permissions().mode() & 0o111 == 0 {
        return Err(BackupError::ExecutableNotRunnable {
            path: path.display().to_string(),
            reason: "缺少执行权限".to_string(),
        });
    }

    Ok(())
}

#[cfg(not(unix))]
fn check_runnable(_path: &Path) -> Result<()> {
    Ok(())
}

/// 基于 mysqldump / mysql 的导出导入实现
#[derive(Debug, Clone)]
pub struct MysqlDumper {
    config: DatabaseConfig,
    dump: ExecutableSpec,
    restore: ExecutableSpec,
}

impl MysqlDumper {
    /// 配置中的额外路径优先于内置安装位置
    pub fn new(config: DatabaseConfig) -> Self {
        let dump_candidates = config
            .dump_candidates
            .iter()
            .cloned()
            .chain(DUMP_CANDIDATES.iter().map(PathBuf::from))
            .collect();
        let restore_candidates = config
            .restore_candidates
            .iter()
            .cloned()
            .chain(RESTORE_CANDIDATES.iter().map(PathBuf::from))
            .collect();

        Self {
            config,
            dump: ExecutableSpec::new(DUMP_PROGRAM, dump_candidates),
            restore: ExecutableSpec::new(RESTORE_PROGRAM, restore_candidates),
        }
    }

    pub fn with_dump_executable(mut self, spec: ExecutableSpec) -> Self {
        self.dump = spec;
        self
    }

    pub fn with_restore_executable(mut self, spec: ExecutableSpec) -> Self {
        self.restore = spec;
        self
    }

    /// 连接参数，密码通过 MYSQL_PWD 环境变量传递，不出现在进程参数中
    fn connection_args(&self) -> Vec<String> {
        vec![
            format!("--host={}", self.config.host),
            format!("--port={}", self.config.port),
            format!("--user={}", self.config.user),
        ]
    }

    /// 导出参数
    pub fn dump_args(&self) -> Vec<String> {
        let mut args = self.connection_args();
        args.extend(DUMP_FLAGS.iter().map(|s| s.to_string()));
        args.push(self.config.name.clone());
        args
    }

    /// 导入参数
    pub fn restore_args(&self) -> Vec<String> {
        let mut args = self.connection_args();
        args.extend(RESTORE_FLAGS.iter().map(|s| s.to_string()));
        args.push(self.config.name.clone());
        args
    }

    fn command(&self, executable: &Path, args: &[String]) -> Command {
        let mut cmd = Command::new(executable);
        cmd.args(args).kill_on_drop(true);
        if !self.config.password.is_empty() {
            cmd.env("MYSQL_PWD", &self.config.password);
        }
        cmd
    }
}

/// 转义后的命令行，仅用于日志
pub fn render_command(executable: &Path, args: &[String]) -> String {
    let program = executable.to_string_lossy();
    std::iter::once(shell_words::quote(&program).into_owned())
        .chain(args.iter().map(|a| shell_words::quote(a).into_owned()))
        .collect::<Vec<_>>()
        .join(" ")
}

fn map_spawn_error(executable: &Path, err: std::io::Error) -> BackupError {
    match err.kind() {
        std::io::ErrorKind::NotFound => {
            BackupError::ExecutableNotFound(executable.display().to_string())
        }
        std::io::ErrorKind::PermissionDenied => BackupError::ExecutableNotRunnable {
            path: executable.display().to_string(),
            reason: err.to_string(),
        },
        _ => BackupError::Io(err),
    }
}

fn captured_output(stdout: &[u8], stderr: &[u8]) -> String {
    let stderr = String::from_utf8_lossy(stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(stdout).trim().to_string();
    let combined = match (stderr.is_empty(), stdout.is_empty()) {
        (true, true) => "无输出".to_string(),
        (false, true) => stderr,
        (true, false) => stdout,
        (false, false) => format!("{stderr}\n{stdout}"),
    };
    truncate_output(combined, MAX_CAPTURED_OUTPUT)
}

/// 按字符数截断，避免把大段输出写进错误和进度记录
fn truncate_output(text: String, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}…(输出已截断)", &text[..cut]),
        None => text,
    }
}

/// 删除导出失败时留下的文件
async fn remove_partial(target: &Path) {
    if target.exists() {
        match tokio::fs::remove_file(target).await {
            Ok(()) => info!("已删除不完整的导出文件: {}", target.display()),
            Err(e) => warn!("删除不完整的导出文件失败 {}: {}", target.display(), e),
        }
    }
}

impl MysqlDumper {
    async fn run_export(&self, target: &Path) -> Result<u64> {
        let executable = self.dump.resolve()?;
        let args = self.dump_args();
        info!("执行数据库导出: {}", render_command(&executable, &args));

        // output() 会把 stdout 改回管道，这里必须 spawn 后再等待
        let outfile = std::fs::File::create(target)?;
        let child = self
            .command(&executable, &args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(outfile))
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| map_spawn_error(&executable, e))?;
        let output = child.wait_with_output().await?;

        if !output.status.success() {
            return Err(BackupError::process_failed(
                output.status.code(),
                captured_output(&output.stdout, &output.stderr),
            ));
        }

        let size = match tokio::fs::metadata(target).await {
            Ok(metadata) => metadata.len(),
            Err(_) => 0,
        };
        if size == 0 {
            return Err(BackupError::ArtifactMissingOrEmpty(format!(
                "{} (导出程序未产生任何内容: {})",
                target.display(),
                captured_output(&output.stdout, &output.stderr)
            )));
        }

        Ok(size)
    }
}

#[async_trait]
impl DatabaseBackend for MysqlDumper {
    async fn export_database(&self, target: &Path) -> Result<u64> {
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        match self.run_export(target).await {
            Ok(size) => {
                info!("数据库导出完成: {} ({} 字节)", target.display(), size);
                Ok(size)
            }
            Err(e) => {
                warn!("数据库导出失败: {}", e);
                remove_partial(target).await;
                Err(e)
            }
        }
    }

    async fn restore_database(&self, source: &Path) -> Result<()> {
        let size = tokio::fs::metadata(source)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        if size == 0 {
            return Err(BackupError::ArtifactMissingOrEmpty(
                source.display().to_string(),
            ));
        }

        let executable = self.restore.resolve()?;
        let args = self.restore_args();
        info!(
            "执行数据库导入: {} < {}",
            render_command(&executable, &args),
            source.display()
        );

        let infile = std::fs::File::open(source)?;
        let child = self
            .command(&executable, &args)
            .stdin(Stdio::from(infile))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| map_spawn_error(&executable, e))?;
        let output = child.wait_with_output().await?;

        if !output.status.success() {
            return Err(BackupError::process_failed(
                output.status.code(),
                captured_output(&output.stdout, &output.stderr),
            ));
        }

        info!("数据库导入完成: {}", source.display());
        Ok(())
    }
}
