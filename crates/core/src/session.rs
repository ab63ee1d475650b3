use crate::apply::{self, ApplyResult, RestoreResult, RestoreScope};
use crate::backup_log::{BackupLog, BackupLogEntry};
use crate::catalog::{scan_candidates, CandidateSet, ScanOptions};
use crate::error::{Error, Result};
use crate::fingerprint::FingerprintProvider;
use crate::matcher::{find_matches_with_progress, FingerprintProgress, MatchReport};
use crate::planner::{build_plan, RenamePlan};
use log::info;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Scanning,
    Matching,
    Renaming,
    Restoring,
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Activity::Scanning => "scanning",
            Activity::Matching => "matching",
            Activity::Renaming => "renaming",
            Activity::Restoring => "restoring",
        };
        f.write_str(label)
    }
}

/// Shared flag checked between rename entries.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Drives the scan -> match -> plan -> rename -> restore pipeline and
/// allows at most one of those steps to run at a time.
pub struct Engine<P> {
    provider: P,
    scan_options: ScanOptions,
    backup_log: BackupLog,
    active: Mutex<Option<Activity>>,
}

struct ActivityGuard<'a> {
    slot: &'a Mutex<Option<Activity>>,
}

impl Drop for ActivityGuard<'_> {
    fn drop(&mut self) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl<P: FingerprintProvider> Engine<P> {
    pub fn new(provider: P, scan_options: ScanOptions, backup_log: BackupLog) -> Self {
        Self {
            provider,
            scan_options,
            backup_log,
            active: Mutex::new(None),
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn scan_options(&self) -> &ScanOptions {
        &self.scan_options
    }

    pub fn backup_log(&self) -> &BackupLog {
        &self.backup_log
    }

    /// `None` while idle.
    pub fn activity(&self) -> Option<Activity> {
        *self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn scan(&self, raw_dir: &Path, jpg_dir: &Path) -> Result<CandidateSet> {
        let _guard = self.begin(Activity::Scanning)?;
        scan_candidates(raw_dir, jpg_dir, &self.scan_options)
    }

    pub fn find_pairs<F>(&self, candidates: &CandidateSet, threshold: u32, progress: F) -> Result<MatchReport>
    where
        F: FnMut(FingerprintProgress<'_>),
    {
        let _guard = self.begin(Activity::Matching)?;
        Ok(find_matches_with_progress(
            candidates,
            &self.provider,
            threshold,
            progress,
        ))
    }

    pub fn preview(&self, report: &MatchReport) -> RenamePlan {
        build_plan(report)
    }

    pub fn rename(&self, plan: &RenamePlan, cancel: &CancelToken) -> Result<ApplyResult> {
        let _guard = self.begin(Activity::Renaming)?;
        apply::apply_plan(plan, &self.backup_log, cancel)
    }

    pub fn restore(&self, scope: RestoreScope) -> Result<RestoreResult> {
        let _guard = self.begin(Activity::Restoring)?;
        apply::restore(&self.backup_log, scope)
    }

    pub fn pending_entries(&self) -> Result<Vec<BackupLogEntry>> {
        self.backup_log.pending_entries()
    }

    fn begin(&self, activity: Activity) -> Result<ActivityGuard<'_>> {
        let mut slot = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(active) = *slot {
            return Err(Error::Busy { active });
        }
        *slot = Some(activity);
        info!("{activity} started");
        Ok(ActivityGuard { slot: &self.active })
    }
}
