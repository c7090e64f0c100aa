// 长时间操作的进度记录
//
// 每个操作一条“最新状态”记录，按操作ID整体覆盖写入，不保留历史。
// 客户端按固定间隔轮询读取，直到状态进入终态或达到轮询上限。
//
// 主要组件：
// - ProgressStore: 记录存储接口（put/get/sweep），文件和内存两种实现
// - ProgressTracker: 单个操作的唯一写入者
// - poll_progress: 客户端轮询

mod poll;
mod store;
mod tracker;

pub use poll::{PollOutcome, poll_progress};
pub use store::{FileProgressStore, MemoryProgressStore, ProgressStore, cleanup_old_progress};
pub use tracker::{ProgressTracker, is_valid_operation_id};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// 操作状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Running,
    Completed,
    Failed,
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OperationStatus::Running)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            OperationStatus::Running => "进行中",
            OperationStatus::Completed => "已完成",
            OperationStatus::Failed => "失败",
        }
    }
}

/// 进度记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressRecord {
    pub operation_id: String,
    pub operation_type: String,
    pub step: String,
    pub message: String,
    pub percentage: Option<u8>,
    pub timestamp: DateTime<Utc>,
    /// 当前进程内存占用（字节）
    pub memory_usage: u64,
    /// 本操作期间观察到的内存峰值（字节）
    pub peak_memory: u64,
    pub status: OperationStatus,
    #[serde(default)]
    pub details: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}
