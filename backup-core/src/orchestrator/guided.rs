use super::{
    BackupOrchestrator, OperationResult, PhaseRange, complete, error_value, extract_details, fail,
};
use crate::artifact::ArtifactKind;
use crate::constants::operation;
use crate::error::Result;
use crate::progress::ProgressTracker;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// 引导恢复的执行顺序
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreOrder {
    /// 先恢复数据库，再恢复文件
    #[default]
    DatabaseFirst,
    /// 先恢复文件，再恢复数据库
    FilesFirst,
}

impl fmt::Display for RestoreOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestoreOrder::DatabaseFirst => f.write_str("database_first"),
            RestoreOrder::FilesFirst => f.write_str("files_first"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum RestoreStep {
    Database,
    Files,
}

impl RestoreStep {
    fn label(&self) -> &'static str {
        match self {
            RestoreStep::Database => "数据库",
            RestoreStep::Files => "文件",
        }
    }

    fn key(&self) -> &'static str {
        match self {
            RestoreStep::Database => "database",
            RestoreStep::Files => "files",
        }
    }
}

const FIRST_RANGE: PhaseRange = PhaseRange::new(10, 50);
const SECOND_RANGE: PhaseRange = PhaseRange::new(55, 95);

impl BackupOrchestrator {
    /// 两阶段引导恢复
    ///
    /// 先校验两个备份文件都存在，然后按 `order` 依次恢复。
    /// 第一步失败时不会执行第二步；第二步失败时不会回滚第一步。
    pub async fn guided_restore(
        &self,
        database_filename: &str,
        files_filename: &str,
        order: RestoreOrder,
    ) -> OperationResult {
        let tracker = self.tracker(operation::GUIDED_RESTORE);
        info!(
            "🧭 开始引导恢复: 数据库={} 文件={} 顺序={} ({})",
            database_filename,
            files_filename,
            order,
            tracker.operation_id()
        );
        tracker.update_progress("initializing", "开始引导恢复", Some(0), None);

        let mut details = BTreeMap::new();
        details.insert("order".to_string(), json!(order.to_string()));
        details.insert("database_filename".to_string(), json!(database_filename));
        details.insert("files_filename".to_string(), json!(files_filename));

        tracker.update_progress("analyzing", "校验备份文件", Some(5), None);
        let database_path = match self.existing_artifact(database_filename, ArtifactKind::Database)
        {
            Ok(path) => path,
            Err(e) => {
                return fail(
                    &tracker,
                    format!("引导恢复未开始: 数据库备份无效: {e}"),
                    Some(&e),
                    details,
                );
            }
        };
        let files_path = match self.existing_artifact(files_filename, ArtifactKind::Files) {
            Ok(path) => path,
            Err(e) => {
                return fail(
                    &tracker,
                    format!("引导恢复未开始: 文件备份无效: {e}"),
                    Some(&e),
                    details,
                );
            }
        };

        let (first, second) = match order {
            RestoreOrder::DatabaseFirst => (RestoreStep::Database, RestoreStep::Files),
            RestoreOrder::FilesFirst => (RestoreStep::Files, RestoreStep::Database),
        };
        let path_for = |step: RestoreStep| -> PathBuf {
            match step {
                RestoreStep::Database => database_path.clone(),
                RestoreStep::Files => files_path.clone(),
            }
        };

        let first_path = path_for(first);
        match self.run_step(first, &tracker, FIRST_RANGE, &first_path).await {
            Ok(step_details) => {
                details.insert(first.key().to_string(), step_details);
            }
            Err(e) => {
                warn!("{}恢复失败，跳过{}恢复", first.label(), second.label());
                details.insert(
                    first.key().to_string(),
                    json!({ "success": false, "error": error_value(&e) }),
                );
                details.insert(
                    second.key().to_string(),
                    json!({ "success": false, "skipped": true }),
                );
                return fail(
                    &tracker,
                    format!(
                        "{}恢复失败: {e}。已跳过{}恢复，系统可能处于不一致状态，请检查后重新执行",
                        first.label(),
                        second.label()
                    ),
                    Some(&e),
                    details,
                );
            }
        }

        let second_path = path_for(second);
        match self
            .run_step(second, &tracker, SECOND_RANGE, &second_path)
            .await
        {
            Ok(step_details) => {
                details.insert(second.key().to_string(), step_details);
                complete(
                    &tracker,
                    format!(
                        "引导恢复成功: 数据库已从 {database_filename} 恢复，文件已从 {files_filename} 恢复"
                    ),
                    details,
                )
            }
            Err(e) => {
                details.insert(
                    second.key().to_string(),
                    json!({ "success": false, "error": error_value(&e) }),
                );
                fail(
                    &tracker,
                    format!(
                        "{}已恢复，但{}恢复失败: {e}。系统可能处于不一致状态，请单独重试{}恢复",
                        first.label(),
                        second.label(),
                        second.label()
                    ),
                    Some(&e),
                    details,
                )
            }
        }
    }

    async fn run_step(
        &self,
        step: RestoreStep,
        tracker: &ProgressTracker,
        range: PhaseRange,
        path: &Path,
    ) -> Result<Value> {
        match step {
            RestoreStep::Database => {
                self.run_database_restore(tracker, range, path).await?;
                Ok(json!({ "success": true }))
            }
            RestoreStep::Files => {
                let report = self.run_files_restore(tracker, range, path).await?;
                let mut value = Value::Object(extract_details(&report).into_iter().collect());
                value["success"] = json!(true);
                Ok(value)
            }
        }
    }
}
