use super::{OperationStatus, ProgressRecord, ProgressStore};
use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use sysinfo::System;
use tracing::{debug, warn};
use uuid::Uuid;

/// 操作ID只允许字母、数字、下划线和连字符，保证可以直接用作文件名
pub fn is_valid_operation_id(operation_id: &str) -> bool {
    !operation_id.is_empty()
        && operation_id.len() <= 128
        && operation_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

struct TrackerState {
    last_percentage: Option<u8>,
    peak_memory: u64,
    details: BTreeMap<String, Value>,
    finished: bool,
    system: System,
}

impl TrackerState {
    /// 采样当前进程内存并更新峰值
    fn sample_memory(&mut self) -> (u64, u64) {
        let current = match sysinfo::get_current_pid() {
            Ok(pid) => {
                self.system.refresh_process(pid);
                self.system.process(pid).map(|p| p.memory()).unwrap_or(0)
            }
            Err(_) => 0,
        };
        self.peak_memory = self.peak_memory.max(current);
        (current, self.peak_memory)
    }
}

/// 单个操作的进度写入者
///
/// 每个操作ID只有一个 tracker 写入。运行中的百分比不会回退，
/// 终态记录只写一次，之后的更新会被忽略。写入失败只记录日志，不影响操作本身。
pub struct ProgressTracker {
    operation_id: String,
    operation_type: String,
    store: Arc<dyn ProgressStore>,
    state: Mutex<TrackerState>,
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("operation_id", &self.operation_id)
            .field("operation_type", &self.operation_type)
            .finish()
    }
}

impl ProgressTracker {
    /// 生成操作ID：{operation_type}_{唯一后缀}
    pub fn new(operation_type: &str, store: Arc<dyn ProgressStore>) -> Self {
        let operation_id = format!("{}_{}", operation_type, Uuid::now_v7().simple());
        debug!("创建进度跟踪: {}", operation_id);

        Self {
            operation_id,
            operation_type: operation_type.to_string(),
            store,
            state: Mutex::new(TrackerState {
                last_percentage: None,
                peak_memory: 0,
                details: BTreeMap::new(),
                finished: false,
                system: System::new(),
            }),
        }
    }

    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }

    pub fn operation_type(&self) -> &str {
        &self.operation_type
    }

    /// 写入运行中的进度，整条替换之前的记录
    ///
    /// 未提供百分比时沿用上一次的值；`details` 为 None 时保留上一次的详情。
    pub fn update_progress(
        &self,
        step: &str,
        message: &str,
        percentage: Option<u8>,
        details: Option<BTreeMap<String, Value>>,
    ) {
        let Ok(mut state) = self.state.lock() else {
            warn!("进度状态锁已损坏: {}", self.operation_id);
            return;
        };
        if state.finished {
            warn!("操作 {} 已结束，忽略进度更新: {}", self.operation_id, step);
            return;
        }

        let percentage = match (percentage, state.last_percentage) {
            (Some(p), Some(last)) => Some(p.min(100).max(last)),
            (Some(p), None) => Some(p.min(100)),
            (None, last) => last,
        };
        state.last_percentage = percentage;
        if let Some(details) = details {
            state.details = details;
        }

        let (memory_usage, peak_memory) = state.sample_memory();
        let record = ProgressRecord {
            operation_id: self.operation_id.clone(),
            operation_type: self.operation_type.clone(),
            step: step.to_string(),
            message: message.to_string(),
            percentage,
            timestamp: Utc::now(),
            memory_usage,
            peak_memory,
            status: OperationStatus::Running,
            details: state.details.clone(),
            result: None,
            error: None,
        };
        self.write(&record);
    }

    /// 标记完成，百分比固定为 100
    pub fn mark_completed(&self, message: &str, result: Value) {
        self.finish(OperationStatus::Completed, message, Some(result), None);
    }

    /// 标记失败并附带错误信息
    pub fn mark_failed(&self, message: &str, error: Value) {
        self.finish(OperationStatus::Failed, message, None, Some(error));
    }

    pub fn is_finished(&self) -> bool {
        self.state.lock().map(|s| s.finished).unwrap_or(true)
    }

    fn finish(
        &self,
        status: OperationStatus,
        message: &str,
        result: Option<Value>,
        error: Option<Value>,
    ) {
        let Ok(mut state) = self.state.lock() else {
            warn!("进度状态锁已损坏: {}", self.operation_id);
            return;
        };
        if state.finished {
            warn!("操作 {} 的终态已写入，忽略重复的结束标记", self.operation_id);
            return;
        }
        state.finished = true;

        let percentage = match status {
            OperationStatus::Completed => Some(100),
            _ => state.last_percentage,
        };
        let step = match status {
            OperationStatus::Completed => "completed",
            _ => "failed",
        };

        let (memory_usage, peak_memory) = state.sample_memory();
        let record = ProgressRecord {
            operation_id: self.operation_id.clone(),
            operation_type: self.operation_type.clone(),
            step: step.to_string(),
            message: message.to_string(),
            percentage,
            timestamp: Utc::now(),
            memory_usage,
            peak_memory,
            status,
            details: state.details.clone(),
            result,
            error,
        };
        self.write(&record);
    }

    fn write(&self, record: &ProgressRecord) {
        if let Err(e) = self.store.put(record) {
            warn!("写入进度记录失败 {}: {}", self.operation_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{FileProgressStore, MemoryProgressStore};
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_operation_id_format() {
        let store = Arc::new(MemoryProgressStore::new());
        let a = ProgressTracker::new("export_database", store.clone());
        let b = ProgressTracker::new("export_database", store);

        assert!(a.operation_id().starts_with("export_database_"));
        assert_ne!(a.operation_id(), b.operation_id());
        assert!(is_valid_operation_id(a.operation_id()));
    }

    #[test]
    fn test_update_then_get() {
        let dir = tempdir().unwrap();
        let store: Arc<dyn ProgressStore> = Arc::new(FileProgressStore::new(dir.path()).unwrap());
        let tracker = ProgressTracker::new("export_files", store.clone());

        let mut details = BTreeMap::new();
        details.insert("files".to_string(), json!(12));
        tracker.update_progress("executing", "正在归档", Some(40), Some(details));

        let record = store.get(tracker.operation_id()).unwrap().unwrap();
        assert_eq!(record.step, "executing");
        assert_eq!(record.message, "正在归档");
        assert_eq!(record.percentage, Some(40));
        assert_eq!(record.status, OperationStatus::Running);
        assert_eq!(record.details.get("files"), Some(&json!(12)));
        assert!(record.peak_memory >= record.memory_usage);
    }

    #[test]
    fn test_completed_forces_full_percentage() {
        let store = Arc::new(MemoryProgressStore::new());
        let tracker = ProgressTracker::new("export_files", store.clone());

        tracker.update_progress("executing", "正在归档", Some(35), None);
        tracker.mark_completed("完成", json!({"filename": "files_backup_x.zip"}));

        let record = store.get(tracker.operation_id()).unwrap().unwrap();
        assert_eq!(record.status, OperationStatus::Completed);
        assert_eq!(record.percentage, Some(100));
        assert_eq!(record.result, Some(json!({"filename": "files_backup_x.zip"})));
        assert!(record.error.is_none());
    }

    #[test]
    fn test_percentage_never_decreases() {
        let store = Arc::new(MemoryProgressStore::new());
        let tracker = ProgressTracker::new("complete_backup", store.clone());

        tracker.update_progress("database", "导出数据库", Some(50), None);
        tracker.update_progress("files", "归档文件", Some(20), None);
        assert_eq!(
            store.get(tracker.operation_id()).unwrap().unwrap().percentage,
            Some(50)
        );

        tracker.update_progress("files", "仍在归档", None, None);
        assert_eq!(
            store.get(tracker.operation_id()).unwrap().unwrap().percentage,
            Some(50)
        );

        tracker.update_progress("files", "超出范围", Some(250), None);
        assert_eq!(
            store.get(tracker.operation_id()).unwrap().unwrap().percentage,
            Some(100)
        );
    }

    #[test]
    fn test_terminal_state_written_once() {
        let store = Arc::new(MemoryProgressStore::new());
        let tracker = ProgressTracker::new("restore_files", store.clone());

        tracker.update_progress("executing", "解压中", Some(60), None);
        tracker.mark_failed("解压失败", json!({"kind": "archive_open_failed"}));
        tracker.mark_completed("不应生效", json!({}));
        tracker.update_progress("executing", "不应生效", Some(90), None);

        let record = store.get(tracker.operation_id()).unwrap().unwrap();
        assert!(tracker.is_finished());
        assert_eq!(record.status, OperationStatus::Failed);
        assert_eq!(record.message, "解压失败");
        assert_eq!(record.percentage, Some(60));
        assert_eq!(record.error, Some(json!({"kind": "archive_open_failed"})));
    }
}
