mod apply;
mod backup_log;
mod catalog;
mod config;
mod error;
mod exif_reader;
mod fingerprint;
mod matcher;
mod planner;
mod session;
#[cfg(test)]
mod test_support;

pub use apply::{
    apply_plan, restore, ApplyResult, RenameEntryOutcome, RenameOutcome, RestoreEntryOutcome,
    RestoreOutcome, RestoreResult, RestoreScope,
};
pub use backup_log::{BackupLog, BackupLogEntry, SessionHeader, SessionWriter};
pub use catalog::{
    scan_candidates, CandidateSet, ExtensionSet, ImageKind, ImageRecord, ScanOptions, ScanStats,
    DEFAULT_JPG_EXTENSIONS, DEFAULT_RAW_EXTENSIONS,
};
pub use config::{
    app_paths, load_config, load_config_from, save_config, save_config_to, AppConfig, AppPaths,
    DEFAULT_SIMILARITY_THRESHOLD, MAX_HASH_SIZE,
};
pub use error::{Error, FingerprintError, RenameIoError, RestoreIoError, Result};
pub use fingerprint::{DHashProvider, Fingerprint, FingerprintProvider, DEFAULT_HASH_SIZE};
pub use matcher::{
    find_matches, find_matches_with_progress, FingerprintProgress, MatchReport, MatchResult,
    UnreadableImage,
};
pub use planner::{build_plan, EntryStatus, PlanStats, RenamePlan, RenamePlanEntry};
pub use session::{Activity, CancelToken, Engine};
