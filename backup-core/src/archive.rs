//! 目录归档与恢复
//!
//! 归档内的路径相对于源目录的**父目录**计算，因此归档包含源目录本身
//! （例如 `storage/`、`storage/a/b.txt`），解压到目标父目录即可还原原始布局。
//! 空目录以显式的目录条目保存。

use crate::constants::archive::{DIR_MODE, FILE_MODE, SAFETY_SNAPSHOT_INFIX};
use crate::constants::backup::TIMESTAMP_FORMAT;
use crate::error::{BackupError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// 归档统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveStats {
    pub files: usize,
    pub directories: usize,
}

/// 解压结果
#[derive(Debug, Clone)]
pub struct ExtractReport {
    /// 恢复后的目录
    pub restored_root: PathBuf,
    /// 恢复的文件数量
    pub restored_files: usize,
    /// 解压前被移走的原目录，不会自动删除
    pub safety_snapshot: Option<PathBuf>,
}

/// 文件归档后端
#[async_trait]
pub trait FileArchiver: Send + Sync {
    async fn build_archive(&self, source_dir: &Path, archive_path: &Path) -> Result<ArchiveStats>;

    async fn extract_archive(
        &self,
        archive_path: &Path,
        destination_parent: &Path,
        root_name: &str,
    ) -> Result<ExtractReport>;
}

/// ZIP 实现，实际工作放到阻塞线程池中执行
#[derive(Debug, Clone, Default)]
pub struct ZipArchiver;

#[async_trait]
impl FileArchiver for ZipArchiver {
    async fn build_archive(&self, source_dir: &Path, archive_path: &Path) -> Result<ArchiveStats> {
        let source_dir = source_dir.to_path_buf();
        let archive_path = archive_path.to_path_buf();
        tokio::task::spawn_blocking(move || build_archive(&source_dir, &archive_path)).await?
    }

    async fn extract_archive(
        &self,
        archive_path: &Path,
        destination_parent: &Path,
        root_name: &str,
    ) -> Result<ExtractReport> {
        let archive_path = archive_path.to_path_buf();
        let destination_parent = destination_parent.to_path_buf();
        let root_name = root_name.to_string();
        tokio::task::spawn_blocking(move || {
            extract_archive(&archive_path, &destination_parent, &root_name)
        })
        .await?
    }
}

/// 相对路径转换为归档内使用的正斜杠形式
fn archive_entry_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// 将 `source_dir` 整体（包含目录本身）写入 ZIP 归档
pub fn build_archive(source_dir: &Path, archive_path: &Path) -> Result<ArchiveStats> {
    if !source_dir.is_dir() {
        return Err(BackupError::SourceMissing(source_dir.display().to_string()));
    }

    let source_dir = normalize_source(source_dir)?;
    if is_inside(archive_path, &source_dir) {
        return Err(BackupError::filesystem(format!(
            "归档文件不能位于被归档的目录内: {} (目录: {})",
            archive_path.display(),
            source_dir.display()
        )));
    }
    if let Some(parent) = archive_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let result = write_archive(&source_dir, archive_path);
    if result.is_err() && archive_path.exists() {
        if let Err(e) = fs::remove_file(archive_path) {
            warn!("删除不完整的归档失败 {}: {}", archive_path.display(), e);
        }
    }
    result
}

/// 只规范化父目录，目录名保持原样，源目录本身可以是符号链接
fn normalize_source(source_dir: &Path) -> Result<PathBuf> {
    let Some(name) = source_dir.file_name() else {
        return Ok(source_dir.canonicalize()?);
    };
    let parent = match source_dir.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    Ok(parent.canonicalize()?.join(name))
}

/// `path` 解析符号链接后是否位于 `dir` 之内，`path` 可以尚不存在
pub(crate) fn is_inside(path: &Path, dir: &Path) -> bool {
    let Ok(dir) = dir.canonicalize() else {
        return false;
    };
    let Ok(absolute) = std::path::absolute(path) else {
        return false;
    };

    // 从最近的已存在祖先开始解析
    let mut existing = absolute.as_path();
    let mut missing = Vec::new();
    loop {
        if let Ok(resolved) = existing.canonicalize() {
            let full = missing
                .iter()
                .rev()
                .fold(resolved, |acc: PathBuf, part| acc.join(part));
            return full.starts_with(&dir);
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name);
                existing = parent;
            }
            _ => return false,
        }
    }
}

fn write_archive(source_dir: &Path, archive_path: &Path) -> Result<ArchiveStats> {
    let base = source_dir
        .parent()
        .ok_or_else(|| BackupError::filesystem(format!("无法获取父目录: {}", source_dir.display())))?
        .to_path_buf();

    let file = File::create(archive_path)?;
    let mut zip = ZipWriter::new(file);
    let dir_options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    let mut stats = ArchiveStats::default();

    info!(
        "开始归档目录: {} -> {}",
        source_dir.display(),
        archive_path.display()
    );

    for entry in WalkDir::new(source_dir).sort_by_file_name() {
        let entry = entry?;
        let path = entry.path();
        let name = archive_entry_name(path.strip_prefix(&base)?);

        // 根目录是符号链接时 file_type 报告为链接，但它已确认指向目录
        let file_type = entry.file_type();
        if file_type.is_dir() || entry.depth() == 0 {
            zip.add_directory(format!("{name}/"), dir_options)?;
            stats.directories += 1;
        } else if file_type.is_file() {
            let size = entry.metadata()?.len();
            let options = SimpleFileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .large_file(size >= u32::MAX as u64);
            zip.start_file(name, options)?;
            let mut reader = File::open(path)?;
            io::copy(&mut reader, &mut zip)?;
            stats.files += 1;
        } else {
            warn!("跳过非普通文件: {}", path.display());
        }
    }

    zip.finish()?;

    info!(
        "归档完成: {} 个文件, {} 个目录",
        stats.files, stats.directories
    );
    Ok(stats)
}

/// 将若干已有备份文件按文件名打包进一个归档
pub fn bundle_files(bundle_path: &Path, members: &[PathBuf]) -> Result<()> {
    let result = (|| -> Result<()> {
        let file = File::create(bundle_path)?;
        let mut zip = ZipWriter::new(file);

        for member in members {
            let name = member
                .file_name()
                .ok_or_else(|| BackupError::filesystem(format!("无法获取文件名: {}", member.display())))?
                .to_string_lossy()
                .to_string();
            let size = fs::metadata(member)?.len();
            let options = SimpleFileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .large_file(size >= u32::MAX as u64);
            zip.start_file(name, options)?;
            io::copy(&mut File::open(member)?, &mut zip)?;
        }

        zip.finish()?;
        Ok(())
    })();

    if result.is_err() && bundle_path.exists() {
        if let Err(e) = fs::remove_file(bundle_path) {
            warn!("删除不完整的合并归档失败 {}: {}", bundle_path.display(), e);
        }
    }
    result
}

/// 生成安全快照路径：{root}_safety_{timestamp}，同名时追加序号
fn safety_snapshot_path(destination_parent: &Path, root_name: &str) -> PathBuf {
    let base = format!(
        "{root_name}{SAFETY_SNAPSHOT_INFIX}{}",
        Utc::now().format(TIMESTAMP_FORMAT)
    );
    let mut candidate = destination_parent.join(&base);
    let mut counter = 1;
    while candidate.exists() {
        candidate = destination_parent.join(format!("{base}_{counter}"));
        counter += 1;
    }
    candidate
}

/// 解压归档到 `destination_parent`，期望得到 `destination_parent/root_name`
///
/// 目标目录已存在时先改名为安全快照；解压或校验失败会删除不完整的目录并把快照移回原位。
pub fn extract_archive(
    archive_path: &Path,
    destination_parent: &Path,
    root_name: &str,
) -> Result<ExtractReport> {
    // 先打开归档，打不开时不触碰目标目录
    let file = File::open(archive_path).map_err(|e| {
        BackupError::ArchiveOpenFailed(format!("{}: {e}", archive_path.display()))
    })?;
    let mut archive = ZipArchive::new(file).map_err(|e| {
        BackupError::ArchiveOpenFailed(format!("{}: {e}", archive_path.display()))
    })?;

    fs::create_dir_all(destination_parent)?;
    let target = destination_parent.join(root_name);

    let safety_snapshot = if target.exists() {
        let snapshot = safety_snapshot_path(destination_parent, root_name);
        fs::rename(&target, &snapshot).map_err(|e| {
            BackupError::filesystem(format!(
                "创建安全快照失败 {} -> {}: {e}",
                target.display(),
                snapshot.display()
            ))
        })?;
        info!("已将现有目录移至安全快照: {}", snapshot.display());
        Some(snapshot)
    } else {
        None
    };

    if let Err(e) = unpack(&mut archive, destination_parent, root_name) {
        error!("解压失败，开始回滚: {}", e);
        rollback(&target, safety_snapshot.as_deref());
        return Err(BackupError::ArchiveExtractFailed(e.to_string()));
    }

    if !target.is_dir() {
        rollback(&target, safety_snapshot.as_deref());
        return Err(BackupError::VerificationFailed(format!(
            "解压后未找到目录 {}，已回滚",
            target.display()
        )));
    }

    if let Err(e) = normalize_permissions(&target) {
        warn!("修正权限失败: {}", e);
    }

    let restored_files = count_files(&target)?;
    info!(
        "解压完成: {} ({} 个文件)",
        target.display(),
        restored_files
    );

    Ok(ExtractReport {
        restored_root: target,
        restored_files,
        safety_snapshot,
    })
}

fn unpack(archive: &mut ZipArchive<File>, destination_parent: &Path, root_name: &str) -> Result<()> {
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(BackupError::ArchiveExtractFailed(format!(
                "归档条目路径不安全: {}",
                entry.name()
            )));
        };

        let in_root = matches!(
            relative.components().next(),
            Some(Component::Normal(first)) if first == root_name
        );
        if !in_root {
            warn!("跳过不属于 {} 的归档条目: {}", root_name, entry.name());
            continue;
        }

        let out_path = destination_parent.join(&relative);
        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
        } else {
            if let Some(parent) = out_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut outfile = File::create(&out_path)?;
            io::copy(&mut entry, &mut outfile)?;
        }
    }
    Ok(())
}

/// 删除不完整的目录并把安全快照移回原位
fn rollback(target: &Path, safety_snapshot: Option<&Path>) {
    if target.exists() {
        if let Err(e) = fs::remove_dir_all(target) {
            error!("清理不完整的目录失败 {}: {}", target.display(), e);
        }
    }

    if let Some(snapshot) = safety_snapshot {
        match fs::rename(snapshot, target) {
            Ok(()) => info!("已从安全快照回滚: {}", target.display()),
            Err(e) => error!(
                "回滚失败，原数据仍保留在 {}: {}",
                snapshot.display(),
                e
            ),
        }
    }
}

/// 递归修正权限：目录可进入，文件可读写
fn normalize_permissions(root: &Path) -> Result<()> {
    for entry in WalkDir::new(root) {
        let entry = entry?;
        let mode = if entry.file_type().is_dir() {
            DIR_MODE
        } else {
            FILE_MODE
        };
        set_permission(entry.path(), mode)?;
    }
    Ok(())
}

fn set_permission(path: &Path, mode: u32) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    }

    #[cfg(not(unix))]
    {
        debug!("非 Unix 系统跳过权限设置: {} (mode: {:o})", path.display(), mode);
    }

    Ok(())
}

fn count_files(root: &Path) -> Result<usize> {
    let mut count = 0;
    for entry in WalkDir::new(root) {
        if entry?.file_type().is_file() {
            count += 1;
        }
    }
    debug!("统计到 {} 个文件: {}", count, root.display());
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    /// 创建测试目录树：3 个文件，5 个目录（含根目录和 2 个空目录）
    fn create_tree(parent: &Path) -> PathBuf {
        let root = parent.join("storage");
        fs::create_dir_all(root.join("docs/2024")).unwrap();
        fs::create_dir_all(root.join("empty")).unwrap();
        fs::create_dir_all(root.join("docs/empty-too")).unwrap();
        fs::write(root.join("readme.txt"), "hello").unwrap();
        fs::write(root.join("docs/a.pdf"), vec![0u8, 1, 2, 3, 255]).unwrap();
        fs::write(root.join("docs/2024/report.csv"), "id,name\n1,x\n").unwrap();
        root
    }

    fn snapshot_tree(root: &Path) -> (BTreeMap<PathBuf, Vec<u8>>, Vec<PathBuf>) {
        let mut files = BTreeMap::new();
        let mut dirs = Vec::new();
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry.unwrap();
            let rel = entry.path().strip_prefix(root).unwrap().to_path_buf();
            if entry.file_type().is_dir() {
                dirs.push(rel);
            } else {
                files.insert(rel, fs::read(entry.path()).unwrap());
            }
        }
        (files, dirs)
    }

    #[test]
    fn test_archive_contains_root_directory() {
        let dir = tempdir().unwrap();
        let root = create_tree(dir.path());
        let archive_path = dir.path().join("out/files_backup_2024-01-01_00-00-00.zip");

        let stats = build_archive(&root, &archive_path).unwrap();
        assert_eq!(stats.files, 3);
        assert_eq!(stats.directories, 5);

        let archive = ZipArchive::new(File::open(&archive_path).unwrap()).unwrap();
        let names: Vec<String> = archive.file_names().map(|n| n.to_string()).collect();
        assert!(names.iter().all(|n| n.starts_with("storage/")), "{names:?}");
        assert!(names.contains(&"storage/".to_string()));
        assert!(names.contains(&"storage/empty/".to_string()));
        assert!(names.contains(&"storage/docs/2024/report.csv".to_string()));
        assert!(names.iter().all(|n| !n.contains('\\')));
    }

    #[test]
    fn test_build_extract_roundtrip() {
        let dir = tempdir().unwrap();
        let root = create_tree(&dir.path().join("src"));
        let archive_path = dir.path().join("files.zip");
        build_archive(&root, &archive_path).unwrap();

        let dest_parent = dir.path().join("restore");
        let report = extract_archive(&archive_path, &dest_parent, "storage").unwrap();

        assert_eq!(report.restored_files, 3);
        assert!(report.safety_snapshot.is_none());
        assert_eq!(snapshot_tree(&root), snapshot_tree(&report.restored_root));
        assert!(dest_parent.join("storage/empty").is_dir());
        assert!(dest_parent.join("storage/docs/empty-too").is_dir());
    }

    #[test]
    fn test_extract_moves_existing_directory_aside() {
        let dir = tempdir().unwrap();
        let root = create_tree(dir.path());
        let archive_path = dir.path().join("files.zip");
        build_archive(&root, &archive_path).unwrap();

        // 模拟备份之后发生的修改
        fs::write(root.join("readme.txt"), "changed").unwrap();
        fs::write(root.join("new.txt"), "added later").unwrap();

        let report = extract_archive(&archive_path, dir.path(), "storage").unwrap();
        let snapshot = report.safety_snapshot.expect("应创建安全快照");

        assert!(snapshot.is_dir());
        assert!(
            snapshot
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("storage_safety_")
        );
        assert_eq!(fs::read_to_string(snapshot.join("readme.txt")).unwrap(), "changed");
        assert_eq!(fs::read_to_string(root.join("readme.txt")).unwrap(), "hello");
        assert!(!root.join("new.txt").exists());
    }

    #[test]
    fn test_unopenable_archive_leaves_destination_untouched() {
        let dir = tempdir().unwrap();
        let root = create_tree(dir.path());
        let before = snapshot_tree(&root);

        let bogus = dir.path().join("files_backup_2024-01-01_00-00-00.zip");
        fs::write(&bogus, "this is not a zip archive").unwrap();

        let err = extract_archive(&bogus, dir.path(), "storage").unwrap_err();
        assert!(matches!(err, BackupError::ArchiveOpenFailed(_)));
        assert_eq!(before, snapshot_tree(&root));

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains("_safety_"))
            .collect();
        assert!(leftovers.is_empty(), "打不开的归档不应创建安全快照");

        let missing = dir.path().join("missing.zip");
        assert!(matches!(
            extract_archive(&missing, dir.path(), "storage"),
            Err(BackupError::ArchiveOpenFailed(_))
        ));
    }

    #[test]
    fn test_verification_failure_rolls_back() {
        let dir = tempdir().unwrap();
        // 归档根目录是 other，而期望恢复的是 storage
        let other = dir.path().join("src").join("other");
        fs::create_dir_all(&other).unwrap();
        fs::write(other.join("x.txt"), "x").unwrap();
        let archive_path = dir.path().join("other.zip");
        build_archive(&other, &archive_path).unwrap();

        let root = create_tree(dir.path());
        let before = snapshot_tree(&root);

        let err = extract_archive(&archive_path, dir.path(), "storage").unwrap_err();
        assert!(matches!(err, BackupError::VerificationFailed(_)));
        assert_eq!(before, snapshot_tree(&root), "应回滚到原始内容");
        assert!(!dir.path().join("other").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_source_keeps_configured_name() {
        let dir = tempdir().unwrap();
        let real = create_tree(&dir.path().join("volumes")).with_file_name("data_v2");
        fs::rename(dir.path().join("volumes/storage"), &real).unwrap();
        let link = dir.path().join("storage");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let archive_path = dir.path().join("backups/files_backup_2024-01-01_00-00-00.zip");
        let stats = build_archive(&link, &archive_path).unwrap();
        assert_eq!(stats.files, 3);
        assert_eq!(stats.directories, 5);

        let archive = ZipArchive::new(File::open(&archive_path).unwrap()).unwrap();
        let names: Vec<String> = archive.file_names().map(|n| n.to_string()).collect();
        assert!(names.iter().all(|n| n.starts_with("storage/")), "{names:?}");

        let report = extract_archive(&archive_path, dir.path(), "storage").unwrap();
        assert!(report.safety_snapshot.is_some());
        assert_eq!(snapshot_tree(&real), snapshot_tree(&report.restored_root));
    }

    #[test]
    fn test_archive_inside_source_is_rejected() {
        let dir = tempdir().unwrap();
        let root = create_tree(dir.path());
        let archive_path = root.join("backups/files_backup_2024-01-01_00-00-00.zip");

        let err = build_archive(&root, &archive_path).unwrap_err();
        assert!(matches!(err, BackupError::Filesystem(_)));
        assert!(!root.join("backups").exists(), "被拒绝时不应创建任何目录");
    }

    #[test]
    fn test_build_missing_source() {
        let dir = tempdir().unwrap();
        let archive_path = dir.path().join("files.zip");
        let err = build_archive(&dir.path().join("nope"), &archive_path).unwrap_err();
        assert!(matches!(err, BackupError::SourceMissing(_)));
        assert!(!archive_path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_permissions_normalized() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let root = create_tree(&dir.path().join("src"));
        fs::set_permissions(root.join("readme.txt"), fs::Permissions::from_mode(0o600)).unwrap();
        let archive_path = dir.path().join("files.zip");
        build_archive(&root, &archive_path).unwrap();

        let dest = dir.path().join("restore");
        extract_archive(&archive_path, &dest, "storage").unwrap();

        let file_mode = fs::metadata(dest.join("storage/readme.txt"))
            .unwrap()
            .permissions()
            .mode();
        let dir_mode = fs::metadata(dest.join("storage/docs"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(file_mode & 0o777, 0o644);
        assert_eq!(dir_mode & 0o777, 0o755);
    }

    #[test]
    fn test_bundle_files() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("database_backup_2024-01-01_00-00-00.sql");
        let b = dir.path().join("files_backup_2024-01-01_00-00-00.zip");
        fs::write(&a, "sql").unwrap();
        fs::write(&b, "zip").unwrap();

        let bundle = dir.path().join("complete_backup_2024-01-01_00-00-00.zip");
        bundle_files(&bundle, &[a, b]).unwrap();

        let archive = ZipArchive::new(File::open(&bundle).unwrap()).unwrap();
        let mut names: Vec<&str> = archive.file_names().collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "database_backup_2024-01-01_00-00-00.sql",
                "files_backup_2024-01-01_00-00-00.zip"
            ]
        );
    }
}
