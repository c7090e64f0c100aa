/// 备份相关常量
pub mod backup {
    use std::path::{Path, PathBuf};

    /// 备份目录名
    pub const BACKUP_DIR_NAME: &str = "backups";

    /// 默认的文件存储目录名
    pub const STORAGE_DIR_NAME: &str = "storage";

    /// 文件名中的时间戳格式，列表、分类和配对都依赖它解析
    pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

    /// 文件名中类型与时间戳之间的固定片段
    pub const NAME_INFIX: &str = "_backup_";

    /// 数据库备份扩展名
    pub const SQL_EXTENSION: &str = "sql";

    /// 归档扩展名
    pub const ZIP_EXTENSION: &str = "zip";

    /// 数据库与文件备份可配对的最大时间差（秒）
    pub const PAIR_TOLERANCE_SECS: i64 = 300;

    /// 获取默认备份存储目录（跨平台）
    pub fn get_default_storage_dir() -> PathBuf {
        Path::new(".").join(BACKUP_DIR_NAME)
    }

    /// 获取默认的待备份文件目录（跨平台）
    pub fn get_default_files_dir() -> PathBuf {
        Path::new(".").join(STORAGE_DIR_NAME)
    }
}

/// 数据库导出/导入相关常量
pub mod dump {
    /// 导出程序名
    pub const DUMP_PROGRAM: &str = "mysqldump";

    /// 导入程序名
    pub const RESTORE_PROGRAM: &str = "mysql";

    /// 导出程序的常见安装位置，按顺序探测，全部不存在时回退到 PATH
    pub const DUMP_CANDIDATES: &[&str] = &[
        "/usr/bin/mysqldump",
        "/usr/local/bin/mysqldump",
        "/usr/local/mysql/bin/mysqldump",
        "/opt/homebrew/bin/mysqldump",
        "/opt/lampp/bin/mysqldump",
        "C:\\xampp\\mysql\\bin\\mysqldump.exe",
        "C:\\Program Files\\MySQL\\MySQL Server 8.0\\bin\\mysqldump.exe",
    ];

    /// 导入程序的常见安装位置
    pub const RESTORE_CANDIDATES: &[&str] = &[
        "/usr/bin/mysql",
        "/usr/local/bin/mysql",
        "/usr/local/mysql/bin/mysql",
        "/opt/homebrew/bin/mysql",
        "/opt/lampp/bin/mysql",
        "C:\\xampp\\mysql\\bin\\mysql.exe",
        "C:\\Program Files\\MySQL\\MySQL Server 8.0\\bin\\mysql.exe",
    ];

    /// 写入错误信息的外部程序输出上限（字符数）
    pub const MAX_CAPTURED_OUTPUT: usize = 4096;

    /// 大库安全导出参数：一致性快照、不锁表、逐行读取、单行 INSERT
    pub const DUMP_FLAGS: &[&str] = &[
        "--single-transaction",
        "--skip-lock-tables",
        "--quick",
        "--skip-extended-insert",
        "--max-allowed-packet=512M",
        "--default-character-set=utf8mb4",
        "--routines",
        "--triggers",
    ];

    /// 导入时使用的参数
    pub const RESTORE_FLAGS: &[&str] = &[
        "--max-allowed-packet=512M",
        "--default-character-set=utf8mb4",
    ];

    /// 默认数据库端口
    pub const DEFAULT_PORT: u16 = 3306;

    /// 覆盖配置文件中数据库密码的环境变量
    pub const PASSWORD_ENV: &str = "BACKUP_DB_PASSWORD";
}

/// 归档相关常量
pub mod archive {
    /// 安全快照目录名片段：{root}_safety_{timestamp}
    pub const SAFETY_SNAPSHOT_INFIX: &str = "_safety_";

    /// 恢复后目录权限
    pub const DIR_MODE: u32 = 0o755;

    /// 恢复后文件权限
    pub const FILE_MODE: u32 = 0o644;
}

/// 进度记录相关常量
pub mod progress {
    /// 进度记录目录名（位于备份目录下）
    pub const PROGRESS_DIR_NAME: &str = "progress";

    /// 进度记录文件名前缀
    pub const FILE_PREFIX: &str = "progress_";

    /// 进度记录文件扩展名
    pub const FILE_EXTENSION: &str = ".json";

    /// 进度记录保留时间（小时）
    pub const DEFAULT_RETENTION_HOURS: u64 = 24;

    /// 客户端轮询间隔（毫秒）
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

    /// 客户端最大轮询次数
    pub const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 600;
}

/// 操作类型标识，同时作为操作ID前缀
pub mod operation {
    pub const EXPORT_DATABASE: &str = "export_database";
    pub const EXPORT_FILES: &str = "export_files";
    pub const COMPLETE_BACKUP: &str = "complete_backup";
    pub const RESTORE_DATABASE: &str = "restore_database";
    pub const RESTORE_FILES: &str = "restore_files";
    pub const GUIDED_RESTORE: &str = "guided_restore";
}

/// 应用配置相关常量
pub mod config {
    /// 默认配置文件名
    pub const CONFIG_FILE_NAME: &str = "backup.toml";

    /// 按优先级查找的配置文件
    pub const CONFIG_FILE_CANDIDATES: &[&str] = &["backup.toml", ".backup.toml"];
}

/// 技术版本信息常量
pub mod version {
    /// 核心库版本（自动同步）
    pub const CORE_VERSION: &str = env!("CARGO_PKG_VERSION");
}
