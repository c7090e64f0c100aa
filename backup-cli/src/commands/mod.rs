mod backup;
mod progress;
mod restore;

// Backup commands
pub use backup::{
    run_complete_backup, run_delete, run_export_database, run_export_files, run_list_backups,
    run_list_pairs,
};

// Restore commands
pub use restore::{run_guided_restore, run_restore_database, run_restore_files};

// Progress commands
pub use progress::{run_cancel, run_cleanup_progress, show_progress, watch_progress};
