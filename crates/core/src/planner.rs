use crate::matcher::{MatchReport, MatchResult, UnreadableImage};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    CollisionResolved,
    /// The RAW already carries the target name.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenamePlanEntry {
    pub source_path: PathBuf,
    pub target_path: PathBuf,
    pub jpg_path: PathBuf,
    pub distance: u32,
    pub status: EntryStatus,
}

impl RenamePlanEntry {
    pub fn needs_rename(&self) -> bool {
        self.status != EntryStatus::Skipped
    }
}

/// `planned` counts entries that will be renamed, `collision_resolved`
/// included.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStats {
    pub planned: usize,
    pub collision_resolved: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RenamePlan {
    pub raw_dir: PathBuf,
    pub jpg_dir: PathBuf,
    pub threshold: u32,
    pub entries: Vec<RenamePlanEntry>,
    pub unmatched_raws: Vec<PathBuf>,
    pub unmatched_jpgs: Vec<PathBuf>,
    pub unreadable: Vec<UnreadableImage>,
    pub stats: PlanStats,
}

/// Turns matches into concrete (source, target) renames. Reads filesystem
/// metadata only.
pub fn build_plan(report: &MatchReport) -> RenamePlan {
    let mut planned_paths = HashSet::<PathBuf>::new();
    let mut stats = PlanStats::default();
    let mut entries = Vec::with_capacity(report.matches.len());

    for result in &report.matches {
        let Some(entry) = plan_entry(result, &mut planned_paths) else {
            warn!("cannot derive a target name for {}", result.raw.display());
            continue;
        };

        match entry.status {
            EntryStatus::Skipped => stats.skipped += 1,
            EntryStatus::CollisionResolved => {
                stats.collision_resolved += 1;
                stats.planned += 1;
            }
            EntryStatus::Pending => stats.planned += 1,
        }
        debug!(
            "plan {} -> {} ({:?})",
            entry.source_path.display(),
            entry.target_path.display(),
            entry.status
        );
        entries.push(entry);
    }

    info!(
        "plan: {} renames ({} with suffix), {} already named",
        stats.planned, stats.collision_resolved, stats.skipped
    );

    RenamePlan {
        raw_dir: report.raw_dir.clone(),
        jpg_dir: report.jpg_dir.clone(),
        threshold: report.threshold,
        entries,
        unmatched_raws: report.unmatched_raws.clone(),
        unmatched_jpgs: report.unmatched_jpgs.clone(),
        unreadable: report.unreadable.clone(),
        stats,
    }
}

fn plan_entry(result: &MatchResult, planned_paths: &mut HashSet<PathBuf>) -> Option<RenamePlanEntry> {
    let parent = result.raw.parent().unwrap_or_else(|| Path::new(""));
    let stem = result.jpg.file_stem()?;
    let extension = result.raw.extension();

    let (target_path, status) =
        resolve_collision(&result.raw, parent, stem, extension, planned_paths);

    Some(RenamePlanEntry {
        source_path: result.raw.clone(),
        target_path,
        jpg_path: result.jpg.clone(),
        distance: result.distance,
        status,
    })
}

fn resolve_collision(
    source: &Path,
    parent: &Path,
    stem: &OsStr,
    extension: Option<&OsStr>,
    planned_paths: &mut HashSet<PathBuf>,
) -> (PathBuf, EntryStatus) {
    let mut candidate = parent.join(file_name(stem, None, extension));
    let mut status = EntryStatus::Pending;
    let mut n = 0usize;

    loop {
        if candidate == source && !planned_paths.contains(&candidate) {
            planned_paths.insert(candidate.clone());
            return (candidate, EntryStatus::Skipped);
        }
        if is_available(&candidate, planned_paths) {
            planned_paths.insert(candidate.clone());
            return (candidate, status);
        }
        n += 1;
        status = EntryStatus::CollisionResolved;
        candidate = parent.join(file_name(stem, Some(n), extension));
    }
}

fn is_available(candidate: &Path, planned_paths: &HashSet<PathBuf>) -> bool {
    !planned_paths.contains(candidate) && !candidate.exists()
}

fn file_name(stem: &OsStr, suffix: Option<usize>, extension: Option<&OsStr>) -> OsString {
    let mut name = stem.to_os_string();
    if let Some(n) = suffix {
        name.push(format!("_{n}"));
    }
    if let Some(ext) = extension {
        name.push(".");
        name.push(ext);
    }
    name
}
