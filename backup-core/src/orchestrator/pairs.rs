use super::BackupOrchestrator;
use crate::artifact::{ArtifactKind, BackupArtifact};
use crate::constants::backup::PAIR_TOLERANCE_SECS;
use crate::error::Result;
use serde::Serialize;

/// 时间上接近、适合一起恢复的数据库备份和文件备份
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackupPair {
    pub database: BackupArtifact,
    pub files: BackupArtifact,
    /// 两个备份创建时间之差的绝对值（秒）
    pub time_difference_secs: i64,
}

/// 找出创建时间相差不超过 `tolerance_secs` 的所有组合，按时间差从小到大排序
///
/// 同一个备份可以出现在多个组合中，这里只给出建议，不做一一匹配。
pub fn compatible_pairs(artifacts: &[BackupArtifact], tolerance_secs: i64) -> Vec<BackupPair> {
    let databases = artifacts
        .iter()
        .filter(|a| a.kind == ArtifactKind::Database);
    let files: Vec<&BackupArtifact> = artifacts
        .iter()
        .filter(|a| a.kind == ArtifactKind::Files)
        .collect();

    let mut pairs = Vec::new();
    for database in databases {
        for file in &files {
            let diff = (database.created_at - file.created_at).num_seconds().abs();
            if diff <= tolerance_secs {
                pairs.push(BackupPair {
                    database: database.clone(),
                    files: (*file).clone(),
                    time_difference_secs: diff,
                });
            }
        }
    }

    // 时间差相同时较新的组合在前
    pairs.sort_by(|a, b| {
        a.time_difference_secs
            .cmp(&b.time_difference_secs)
            .then_with(|| b.database.created_at.cmp(&a.database.created_at))
    });
    pairs
}

impl BackupOrchestrator {
    /// 推荐可以一起用于引导恢复的备份组合
    pub fn get_compatible_backup_pairs(&self) -> Result<Vec<BackupPair>> {
        let artifacts = self.list_backups()?;
        Ok(compatible_pairs(&artifacts, PAIR_TOLERANCE_SECS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn artifact(kind: ArtifactKind, offset_secs: i64) -> BackupArtifact {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap() + Duration::seconds(offset_secs);
        BackupArtifact {
            filename: crate::artifact::artifact_filename(kind, at),
            kind,
            size_bytes: 10,
            created_at: at,
        }
    }

    #[test]
    fn test_pairs_within_tolerance() {
        let artifacts = vec![
            artifact(ArtifactKind::Database, 0),
            artifact(ArtifactKind::Files, 200),
            artifact(ArtifactKind::Files, 400),
        ];

        let pairs = compatible_pairs(&artifacts, 300);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].time_difference_secs, 200);
        assert_eq!(pairs[0].files.created_at, artifacts[1].created_at);
    }

    #[test]
    fn test_pairs_tolerance_is_inclusive() {
        let artifacts = vec![
            artifact(ArtifactKind::Database, 0),
            artifact(ArtifactKind::Files, PAIR_TOLERANCE_SECS),
            artifact(ArtifactKind::Files, -(PAIR_TOLERANCE_SECS + 1)),
        ];

        let pairs = compatible_pairs(&artifacts, PAIR_TOLERANCE_SECS);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].time_difference_secs, 300);
        assert_eq!(pairs[0].files.created_at, artifacts[1].created_at);
    }

    #[test]
    fn test_pairs_sorted_and_shared() {
        let artifacts = vec![
            artifact(ArtifactKind::Database, 0),
            artifact(ArtifactKind::Database, 100),
            artifact(ArtifactKind::Files, 90),
            artifact(ArtifactKind::Complete, 95),
        ];

        let pairs = compatible_pairs(&artifacts, 300);
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].time_difference_secs, 10);
        assert_eq!(pairs[1].time_difference_secs, 90);
        // 同一个文件备份出现在两个组合中
        assert_eq!(pairs[0].files, pairs[1].files);
    }

    #[test]
    fn test_no_pairs_without_both_kinds() {
        let artifacts = vec![
            artifact(ArtifactKind::Files, 0),
            artifact(ArtifactKind::Files, 10),
        ];
        assert!(compatible_pairs(&artifacts, 300).is_empty());
        assert!(compatible_pairs(&[], 300).is_empty());
    }
}
