use crate::backup_log::{BackupLog, BackupLogEntry, SessionWriter};
use crate::error::{Error, RenameIoError, RestoreIoError, Result};
use crate::planner::{RenamePlan, RenamePlanEntry};
use crate::session::CancelToken;
use log::{debug, info, warn};
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

#[derive(Debug)]
pub enum RenameOutcome {
    Renamed,
    Failed(RenameIoError),
    Skipped,
    Cancelled,
}

#[derive(Debug)]
pub struct RenameEntryOutcome {
    pub source_path: PathBuf,
    pub target_path: PathBuf,
    pub outcome: RenameOutcome,
}

#[derive(Debug, Default)]
pub struct ApplyResult {
    /// Id of the backup-log session, `None` when nothing was logged.
    pub session: Option<String>,
    pub entries: Vec<RenameEntryOutcome>,
    pub renamed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
    /// Backup-log failure that stopped the run early.
    pub aborted: Option<Error>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestoreScope {
    #[default]
    LastSession,
    All,
}

#[derive(Debug)]
pub enum RestoreOutcome {
    Restored,
    AlreadyInPlace,
    Failed(RestoreIoError),
}

#[derive(Debug)]
pub struct RestoreEntryOutcome {
    pub entry: BackupLogEntry,
    pub outcome: RestoreOutcome,
}

#[derive(Debug, Default)]
pub struct RestoreResult {
    pub entries: Vec<RestoreEntryOutcome>,
    pub restored: usize,
    pub already_in_place: usize,
    pub failed: usize,
    pub remaining_in_log: usize,
}

/// Renames every entry of `plan` in order, logging each one before the
/// rename happens. A failed entry is reported and the run moves on.
///
/// A backup-log write failure stops the run: the error is kept in
/// [`ApplyResult::aborted`] and the entries not yet attempted are reported
/// as cancelled. Renames done up to that point are logged and restorable.
pub fn apply_plan(plan: &RenamePlan, log: &BackupLog, cancel: &CancelToken) -> Result<ApplyResult> {
    let mut writer = log.begin_session(&plan.raw_dir, &plan.jpg_dir)?;
    let mut result = ApplyResult::default();

    for entry in &plan.entries {
        let outcome = if !entry.needs_rename() {
            RenameOutcome::Skipped
        } else if cancel.is_cancelled() || result.aborted.is_some() {
            RenameOutcome::Cancelled
        } else if let Err(err) = precheck(entry) {
            RenameOutcome::Failed(err)
        } else {
            match writer.record_rename(&entry.source_path, &entry.target_path) {
                Ok(logged) => {
                    result.session = Some(logged.session.clone());
                    rename_logged(entry, &mut writer, logged.seq)
                }
                Err(err) => {
                    warn!("stopping before {}: {err}", entry.source_path.display());
                    result.aborted = Some(err);
                    RenameOutcome::Cancelled
                }
            }
        };

        match &outcome {
            RenameOutcome::Renamed => {
                debug!(
                    "renamed {} -> {}",
                    entry.source_path.display(),
                    entry.target_path.display()
                );
                result.renamed += 1;
            }
            RenameOutcome::Failed(err) => {
                warn!("{err}");
                result.failed += 1;
            }
            RenameOutcome::Skipped => result.skipped += 1,
            RenameOutcome::Cancelled => result.cancelled += 1,
        }
        result.entries.push(RenameEntryOutcome {
            source_path: entry.source_path.clone(),
            target_path: entry.target_path.clone(),
            outcome,
        });
    }

    if result.aborted.is_some() {
        warn!(
            "rename aborted: {} renamed before the backup log failed, {} not attempted",
            result.renamed, result.cancelled
        );
    } else {
        info!(
            "rename finished: {} renamed, {} failed, {} skipped, {} cancelled",
            result.renamed, result.failed, result.skipped, result.cancelled
        );
    }
    Ok(result)
}

fn rename_logged(entry: &RenamePlanEntry, writer: &mut SessionWriter, seq: u64) -> RenameOutcome {
    match fs::rename(&entry.source_path, &entry.target_path) {
        Ok(()) => RenameOutcome::Renamed,
        Err(source) => {
            let err = RenameIoError::Io {
                from: entry.source_path.clone(),
                to: entry.target_path.clone(),
                source,
            };
            if let Err(log_err) = writer.record_failure(seq, &err.to_string()) {
                warn!("could not mark entry {seq} as failed: {log_err}");
            }
            RenameOutcome::Failed(err)
        }
    }
}

fn precheck(entry: &RenamePlanEntry) -> std::result::Result<(), RenameIoError> {
    if !entry.source_path.exists() {
        return Err(RenameIoError::SourceMissing(entry.source_path.clone()));
    }
    if entry.target_path.exists() {
        return Err(RenameIoError::TargetExists(entry.target_path.clone()));
    }
    Ok(())
}

/// Undoes logged renames, newest first, and drops every entry that ends
/// up back in place from the log.
pub fn restore(log: &BackupLog, scope: RestoreScope) -> Result<RestoreResult> {
    let pending = log.pending_entries()?;
    let mut result = RestoreResult::default();
    if pending.is_empty() {
        info!("backup log has nothing to restore");
        return Ok(result);
    }

    let session = match scope {
        RestoreScope::LastSession => pending.last().map(|entry| entry.session.clone()),
        RestoreScope::All => None,
    };
    let selected = |entry: &BackupLogEntry| match &session {
        Some(session) => entry.session == *session,
        None => true,
    };

    let mut consumed = HashSet::<(String, u64)>::new();
    for entry in pending.iter().rev().filter(|&entry| selected(entry)) {
        let outcome = restore_entry(entry);
        match &outcome {
            RestoreOutcome::Restored => {
                debug!(
                    "restored {} -> {}",
                    entry.new_path.display(),
                    entry.original_path.display()
                );
                result.restored += 1;
                consumed.insert((entry.session.clone(), entry.seq));
            }
            RestoreOutcome::AlreadyInPlace => {
                result.already_in_place += 1;
                consumed.insert((entry.session.clone(), entry.seq));
            }
            RestoreOutcome::Failed(err) => {
                warn!("{err}");
                result.failed += 1;
            }
        }
        result.entries.push(RestoreEntryOutcome {
            entry: entry.clone(),
            outcome,
        });
    }

    let remaining: Vec<BackupLogEntry> = pending
        .into_iter()
        .filter(|entry| !consumed.contains(&(entry.session.clone(), entry.seq)))
        .collect();
    log.retain(&remaining)?;
    result.remaining_in_log = remaining.len();

    info!(
        "restore finished: {} restored, {} already in place, {} failed, {} left in log",
        result.restored, result.already_in_place, result.failed, result.remaining_in_log
    );
    Ok(result)
}

fn restore_entry(entry: &BackupLogEntry) -> RestoreOutcome {
    let renamed = entry.new_path.exists();
    let original = entry.original_path.exists();

    match (renamed, original) {
        (true, false) => match fs::rename(&entry.new_path, &entry.original_path) {
            Ok(()) => RestoreOutcome::Restored,
            Err(source) => RestoreOutcome::Failed(RestoreIoError::Io {
                from: entry.new_path.clone(),
                to: entry.original_path.clone(),
                source,
            }),
        },
        (true, true) => {
            RestoreOutcome::Failed(RestoreIoError::OriginalOccupied(entry.original_path.clone()))
        }
        (false, true) => RestoreOutcome::AlreadyInPlace,
        (false, false) => {
            RestoreOutcome::Failed(RestoreIoError::RenamedFileMissing(entry.new_path.clone()))
        }
    }
}
