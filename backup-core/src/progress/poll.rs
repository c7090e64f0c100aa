use super::{ProgressRecord, ProgressStore};
use crate::error::Result;
use std::time::Duration;
use tracing::debug;

/// 轮询结果
#[derive(Debug, Clone)]
pub enum PollOutcome {
    /// 操作已进入终态
    Finished(ProgressRecord),
    /// 轮询期间从未读到该操作的记录
    NotFound,
    /// 达到轮询上限，操作仍在后台运行，附带最后一次读到的记录
    TimedOut(ProgressRecord),
}

/// 按固定间隔轮询进度，直到终态或达到 `max_attempts`
///
/// 达到上限只是客户端停止等待，不会取消服务端的操作。
pub async fn poll_progress<F>(
    store: &dyn ProgressStore,
    operation_id: &str,
    interval: Duration,
    max_attempts: u32,
    mut on_update: F,
) -> Result<PollOutcome>
where
    F: FnMut(&ProgressRecord),
{
    let mut last: Option<ProgressRecord> = None;

    for attempt in 1..=max_attempts.max(1) {
        if let Some(record) = store.get(operation_id)? {
            on_update(&record);
            if record.status.is_terminal() {
                return Ok(PollOutcome::Finished(record));
            }
            last = Some(record);
        }

        debug!("轮询进度 {} 第 {}/{} 次", operation_id, attempt, max_attempts);
        if attempt < max_attempts {
            tokio::time::sleep(interval).await;
        }
    }

    Ok(match last {
        Some(record) => PollOutcome::TimedOut(record),
        None => PollOutcome::NotFound,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{MemoryProgressStore, OperationStatus, ProgressTracker};
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_poll_returns_terminal_record() {
        let store = Arc::new(MemoryProgressStore::new());
        let tracker = ProgressTracker::new("export_files", store.clone());
        tracker.update_progress("executing", "归档中", Some(40), None);

        let id = tracker.operation_id().to_string();
        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            tracker.mark_completed("完成", json!({}));
        });

        let mut seen = Vec::new();
        let outcome = poll_progress(
            store.as_ref(),
            &id,
            Duration::from_millis(10),
            200,
            |r| seen.push(r.percentage),
        )
        .await
        .unwrap();
        writer.await.unwrap();

        match outcome {
            PollOutcome::Finished(record) => {
                assert_eq!(record.status, OperationStatus::Completed);
                assert_eq!(record.percentage, Some(100));
            }
            other => panic!("意外的轮询结果: {other:?}"),
        }
        assert_eq!(seen.first(), Some(&Some(40)));
    }

    #[tokio::test]
    async fn test_poll_times_out_without_cancelling() {
        let store = Arc::new(MemoryProgressStore::new());
        let tracker = ProgressTracker::new("export_files", store.clone());
        tracker.update_progress("executing", "归档中", Some(10), None);

        let outcome = poll_progress(
            store.as_ref(),
            tracker.operation_id(),
            Duration::from_millis(1),
            3,
            |_| {},
        )
        .await
        .unwrap();

        assert!(matches!(outcome, PollOutcome::TimedOut(_)));
        // 客户端超时后操作仍可继续写入
        tracker.mark_completed("完成", json!({}));
        let record = store.get(tracker.operation_id()).unwrap().unwrap();
        assert_eq!(record.status, OperationStatus::Completed);
    }

    #[tokio::test]
    async fn test_poll_unknown_operation() {
        let store = MemoryProgressStore::new();
        let outcome = poll_progress(&store, "export_files_nope", Duration::from_millis(1), 2, |_| {})
            .await
            .unwrap();
        assert!(matches!(outcome, PollOutcome::NotFound));
    }
}
