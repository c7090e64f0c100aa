use super::ProgressRecord;
use super::tracker::is_valid_operation_id;
use crate::constants::progress::{FILE_EXTENSION, FILE_PREFIX};
use crate::error::{BackupError, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// 进度记录存储
///
/// `put` 必须是整条记录的原子替换，读者只能看到完整的旧记录或完整的新记录。
pub trait ProgressStore: Send + Sync {
    fn put(&self, record: &ProgressRecord) -> Result<()>;

    fn get(&self, operation_id: &str) -> Result<Option<ProgressRecord>>;

    /// 删除时间戳早于 `cutoff` 的记录，返回删除数量
    fn sweep(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

/// 清理超过保留期的进度记录（不区分状态）
pub fn cleanup_old_progress(store: &dyn ProgressStore, retention: Duration) -> Result<usize> {
    let retention = ChronoDuration::from_std(retention)
        .map_err(|e| BackupError::filesystem(format!("保留时长无效: {e}")))?;
    let cutoff = Utc::now() - retention;
    let removed = store.sweep(cutoff)?;
    info!("清理过期进度记录: {} 条 (早于 {})", removed, cutoff);
    Ok(removed)
}

/// 每个操作一个 JSON 文件：{dir}/progress_{operation_id}.json
#[derive(Debug, Clone)]
pub struct FileProgressStore {
    dir: PathBuf,
}

impl FileProgressStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, operation_id: &str) -> PathBuf {
        self.dir
            .join(format!("{FILE_PREFIX}{operation_id}{FILE_EXTENSION}"))
    }

    fn is_record_file(name: &str) -> bool {
        name.starts_with(FILE_PREFIX) && name.ends_with(FILE_EXTENSION)
    }

    /// 解析失败的记录按文件修改时间判断是否过期
    fn record_time(path: &Path) -> Option<DateTime<Utc>> {
        if let Ok(content) = fs::read_to_string(path) {
            if let Ok(record) = serde_json::from_str::<ProgressRecord>(&content) {
                return Some(record.timestamp);
            }
        }
        fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .map(DateTime::<Utc>::from)
    }
}

impl ProgressStore for FileProgressStore {
    fn put(&self, record: &ProgressRecord) -> Result<()> {
        if !is_valid_operation_id(&record.operation_id) {
            return Err(BackupError::filesystem(format!(
                "无效的操作ID: {}",
                record.operation_id
            )));
        }

        // 先写临时文件再重命名，保证读者不会看到写了一半的记录
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        serde_json::to_writer_pretty(&mut tmp, record)?;
        tmp.flush()?;
        tmp.persist(self.path_for(&record.operation_id))
            .map_err(|e| BackupError::Io(e.error))?;
        Ok(())
    }

    fn get(&self, operation_id: &str) -> Result<Option<ProgressRecord>> {
        if !is_valid_operation_id(operation_id) {
            debug!("拒绝无效的操作ID: {}", operation_id);
            return Ok(None);
        }

        match fs::read_to_string(self.path_for(operation_id)) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn sweep(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut removed = 0;

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if !Self::is_record_file(&name) {
                continue;
            }

            let path = entry.path();
            match Self::record_time(&path) {
                Some(time) if time < cutoff => match fs::remove_file(&path) {
                    Ok(()) => {
                        debug!("删除过期进度记录: {}", name);
                        removed += 1;
                    }
                    Err(e) => warn!("删除进度记录失败 {}: {}", name, e),
                },
                Some(_) => {}
                None => warn!("无法确定进度记录时间: {}", name),
            }
        }

        Ok(removed)
    }
}

/// 内存实现，适合嵌入式使用和测试
#[derive(Debug, Default)]
pub struct MemoryProgressStore {
    records: DashMap<String, ProgressRecord>,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl ProgressStore for MemoryProgressStore {
    fn put(&self, record: &ProgressRecord) -> Result<()> {
        self.records
            .insert(record.operation_id.clone(), record.clone());
        Ok(())
    }

    fn get(&self, operation_id: &str) -> Result<Option<ProgressRecord>> {
        Ok(self.records.get(operation_id).map(|r| r.value().clone()))
    }

    fn sweep(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let before = self.records.len();
        self.records.retain(|_, record| record.timestamp >= cutoff);
        Ok(before - self.records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::OperationStatus;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn record(id: &str, age_hours: i64) -> ProgressRecord {
        ProgressRecord {
            operation_id: id.to_string(),
            operation_type: "export_files".to_string(),
            step: "executing".to_string(),
            message: "归档中".to_string(),
            percentage: Some(40),
            timestamp: Utc::now() - ChronoDuration::hours(age_hours),
            memory_usage: 1024,
            peak_memory: 2048,
            status: OperationStatus::Running,
            details: BTreeMap::new(),
            result: None,
            error: None,
        }
    }

    #[test]
    fn test_file_store_put_get_overwrite() {
        let dir = tempdir().unwrap();
        let store = FileProgressStore::new(dir.path().join("progress")).unwrap();

        let mut rec = record("export_files_0001", 0);
        store.put(&rec).unwrap();
        rec.step = "verifying".to_string();
        rec.percentage = Some(90);
        store.put(&rec).unwrap();

        let loaded = store.get("export_files_0001").unwrap().unwrap();
        assert_eq!(loaded.step, "verifying");
        assert_eq!(loaded.percentage, Some(90));

        // 只有一个记录文件，没有残留的临时文件
        let files: Vec<_> = fs::read_dir(store.dir()).unwrap().collect();
        assert_eq!(files.len(), 1);
        assert!(
            store
                .dir()
                .join("progress_export_files_0001.json")
                .exists()
        );
    }

    #[test]
    fn test_file_store_unknown_and_invalid_ids() {
        let dir = tempdir().unwrap();
        let store = FileProgressStore::new(dir.path()).unwrap();

        assert!(store.get("export_files_missing").unwrap().is_none());
        assert!(store.get("../../etc/passwd").unwrap().is_none());
        assert!(store.put(&record("../escape", 0)).is_err());
    }

    #[test]
    fn test_cleanup_removes_only_old_records() {
        let dir = tempdir().unwrap();
        let store = FileProgressStore::new(dir.path()).unwrap();

        store.put(&record("export_files_old", 30)).unwrap();
        store.put(&record("export_files_new", 1)).unwrap();
        let mut finished = record("export_files_done", 25);
        finished.status = OperationStatus::Completed;
        store.put(&finished).unwrap();
        fs::write(dir.path().join("unrelated.txt"), "keep me").unwrap();

        let removed =
            cleanup_old_progress(&store, Duration::from_secs(24 * 3600)).unwrap();

        assert_eq!(removed, 2);
        assert!(store.get("export_files_old").unwrap().is_none());
        assert!(store.get("export_files_done").unwrap().is_none());
        assert!(store.get("export_files_new").unwrap().is_some());
        assert!(dir.path().join("unrelated.txt").exists());
    }

    #[test]
    fn test_memory_store_sweep() {
        let store = MemoryProgressStore::new();
        store.put(&record("a_1", 48)).unwrap();
        store.put(&record("a_2", 2)).unwrap();

        let removed = cleanup_old_progress(&store, Duration::from_secs(24 * 3600)).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.len(), 1);
        assert!(store.get("a_2").unwrap().is_some());
    }
}
