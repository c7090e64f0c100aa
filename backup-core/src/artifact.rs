//! 备份文件命名与枚举
//!
//! 文件名 `{kind}_backup_{yyyy-MM-dd_HH-mm-ss}.{ext}` 是备份文件的唯一标识，
//! 列表、类型判断和配对都从文件名反解析，格式不能随意改动。

use crate::constants::backup::{NAME_INFIX, SQL_EXTENSION, TIMESTAMP_FORMAT, ZIP_EXTENSION};
use crate::error::{BackupError, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

static ARTIFACT_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(database|files|complete)_backup_(\d{4}-\d{2}-\d{2}_\d{2}-\d{2}-\d{2})\.(sql|zip)$",
    )
    .expect("备份文件名正则无效")
});

/// 备份类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Database,
    Files,
    Complete,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Database => "database",
            ArtifactKind::Files => "files",
            ArtifactKind::Complete => "complete",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactKind::Database => SQL_EXTENSION,
            ArtifactKind::Files | ArtifactKind::Complete => ZIP_EXTENSION,
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "database" => Some(ArtifactKind::Database),
            "files" => Some(ArtifactKind::Files),
            "complete" => Some(ArtifactKind::Complete),
            _ => None,
        }
    }

    /// 用于界面显示的名称
    pub fn display_name(&self) -> &'static str {
        match self {
            ArtifactKind::Database => "数据库",
            ArtifactKind::Files => "文件",
            ArtifactKind::Complete => "完整",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 备份文件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackupArtifact {
    pub filename: String,
    pub kind: ArtifactKind,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

/// 生成备份文件名
pub fn artifact_filename(kind: ArtifactKind, at: DateTime<Utc>) -> String {
    format!(
        "{}{}{}.{}",
        kind.as_str(),
        NAME_INFIX,
        at.format(TIMESTAMP_FORMAT),
        kind.extension()
    )
}

/// 从文件名解析类型和时间戳，不符合命名规则时返回 None
pub fn parse_artifact_name(filename: &str) -> Option<(ArtifactKind, DateTime<Utc>)> {
    let caps = ARTIFACT_NAME.captures(filename)?;
    let kind = ArtifactKind::parse(caps.get(1)?.as_str())?;
    if caps.get(3)?.as_str() != kind.extension() {
        return None;
    }
    let naive = NaiveDateTime::parse_from_str(caps.get(2)?.as_str(), TIMESTAMP_FORMAT).ok()?;
    Some((kind, naive.and_utc()))
}

/// 校验外部传入的文件名并解析为备份目录下的路径
///
/// 只接受符合命名规则的文件名，因此不会出现路径穿越。
pub fn resolve_artifact_path(
    backup_dir: &Path,
    filename: &str,
    expected: Option<ArtifactKind>,
) -> Result<(ArtifactKind, PathBuf)> {
    let (kind, _) = parse_artifact_name(filename)
        .ok_or_else(|| BackupError::InvalidArtifactName(filename.to_string()))?;

    if let Some(expected) = expected {
        if kind != expected {
            return Err(BackupError::InvalidArtifactName(format!(
                "{filename} 不是{}备份",
                expected.display_name()
            )));
        }
    }

    Ok((kind, backup_dir.join(filename)))
}

/// 列出备份目录中的所有备份文件，按时间从新到旧排序
///
/// 不符合命名规则的文件（进度记录、安全快照等）会被忽略。
pub fn list_artifacts(backup_dir: &Path) -> Result<Vec<BackupArtifact>> {
    let mut artifacts = Vec::new();

    if !backup_dir.exists() {
        return Ok(artifacts);
    }

    for entry in std::fs::read_dir(backup_dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if !file_type.is_file() {
            continue;
        }

        let filename = entry.file_name().to_string_lossy().to_string();
        let Some((kind, created_at)) = parse_artifact_name(&filename) else {
            continue;
        };

        let size_bytes = entry.metadata()?.len();
        artifacts.push(BackupArtifact {
            filename,
            kind,
            size_bytes,
            created_at,
        });
    }

    artifacts.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.filename.cmp(&b.filename))
    });
    Ok(artifacts)
}

/// 人类可读的文件大小
pub fn format_size(size: u64) -> String {
    if size > 1024 * 1024 * 1024 {
        format!("{:.1}GB", size as f64 / (1024.0 * 1024.0 * 1024.0))
    } else if size > 1024 * 1024 {
        format!("{:.1}MB", size as f64 / (1024.0 * 1024.0))
    } else if size > 1024 {
        format!("{:.1}KB", size as f64 / 1024.0)
    } else {
        format!("{size}B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    #[test]
    fn test_filename_format() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(
            artifact_filename(ArtifactKind::Database, at),
            "database_backup_2024-03-09_07-05-01.sql"
        );
        assert_eq!(
            artifact_filename(ArtifactKind::Files, at),
            "files_backup_2024-03-09_07-05-01.zip"
        );
        assert_eq!(
            artifact_filename(ArtifactKind::Complete, at),
            "complete_backup_2024-03-09_07-05-01.zip"
        );

        let (kind, parsed) = parse_artifact_name("files_backup_2024-03-09_07-05-01.zip").unwrap();
        assert_eq!(kind, ArtifactKind::Files);
        assert_eq!(parsed, at);
    }

    #[test]
    fn test_rejects_foreign_names() {
        let cases = vec![
            "database_backup_2024-03-09_07-05-01.zip",
            "files_backup_2024-03-09_07-05-01.sql",
            "logs_backup_2024-03-09_07-05-01.zip",
            "database_backup_2024-13-09_07-05-01.sql",
            "../database_backup_2024-03-09_07-05-01.sql",
            "progress_export_files_0190.json",
        ];
        for name in cases {
            assert!(parse_artifact_name(name).is_none(), "{name} 不应被识别");
        }
    }

    #[test]
    fn test_resolve_checks_kind() {
        let dir = Path::new("/backups");
        let (kind, path) =
            resolve_artifact_path(dir, "database_backup_2024-03-09_07-05-01.sql", None).unwrap();
        assert_eq!(kind, ArtifactKind::Database);
        assert_eq!(path, dir.join("database_backup_2024-03-09_07-05-01.sql"));

        let err = resolve_artifact_path(
            dir,
            "database_backup_2024-03-09_07-05-01.sql",
            Some(ArtifactKind::Files),
        );
        assert!(matches!(err, Err(BackupError::InvalidArtifactName(_))));

        let err = resolve_artifact_path(dir, "../etc/passwd", None);
        assert!(matches!(err, Err(BackupError::InvalidArtifactName(_))));
    }

    #[test]
    fn test_list_artifacts_sorted_and_filtered() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("database_backup_2024-01-01_00-00-00.sql"),
            b"-- dump",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("files_backup_2024-02-01_00-00-00.zip"),
            b"PK",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();
        std::fs::create_dir(dir.path().join("progress")).unwrap();

        let artifacts = list_artifacts(dir.path()).unwrap();
        assert_eq!(artifacts.len(), 2);
        assert_eq!(artifacts[0].kind, ArtifactKind::Files);
        assert_eq!(artifacts[1].kind, ArtifactKind::Database);
        assert_eq!(artifacts[1].size_bytes, 7);
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512B");
        assert_eq!(format_size(2048), "2.0KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0MB");
    }
}
