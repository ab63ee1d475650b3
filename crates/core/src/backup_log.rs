use crate::error::{Error, Result};
use chrono::{DateTime, Local};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Header written once per rename session, before its first entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHeader {
    pub session: String,
    pub started_at: DateTime<Local>,
    pub raw_dir: PathBuf,
    pub jpg_dir: PathBuf,
}

/// One rename intent. Written and synced before the rename itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupLogEntry {
    pub session: String,
    pub seq: u64,
    pub timestamp: DateTime<Local>,
    pub original_path: PathBuf,
    pub new_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct FailureRecord {
    session: String,
    seq: u64,
    error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum LogRecord {
    Session(SessionHeader),
    Rename(BackupLogEntry),
    Failed(FailureRecord),
}

/// Append-only JSON-lines journal of renames.
#[derive(Debug, Clone)]
pub struct BackupLog {
    path: PathBuf,
}

impl BackupLog {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Starts a session. Nothing touches the disk until the first
    /// [`SessionWriter::record_rename`].
    pub fn begin_session(&self, raw_dir: &Path, jpg_dir: &Path) -> Result<SessionWriter> {
        let taken: HashSet<String> = self
            .sessions()?
            .into_iter()
            .map(|header| header.session)
            .collect();

        let started_at = Local::now();
        let base = started_at.format("%Y%m%dT%H%M%S%.6f").to_string();
        let mut session = base.clone();
        let mut n = 1usize;
        while taken.contains(&session) {
            session = format!("{base}-{n}");
            n += 1;
        }

        Ok(SessionWriter {
            path: self.path.clone(),
            file: None,
            header: Some(SessionHeader {
                session,
                started_at,
                raw_dir: raw_dir.to_path_buf(),
                jpg_dir: jpg_dir.to_path_buf(),
            }),
            next_seq: 1,
        })
    }

    /// Rename entries without a failure marker, in file order.
    pub fn pending_entries(&self) -> Result<Vec<BackupLogEntry>> {
        let records = self.read_records()?;
        let failed: HashSet<(String, u64)> = records
            .iter()
            .filter_map(|record| match record {
                LogRecord::Failed(f) => Some((f.session.clone(), f.seq)),
                _ => None,
            })
            .collect();

        Ok(records
            .into_iter()
            .filter_map(|record| match record {
                LogRecord::Rename(entry) => Some(entry),
                _ => None,
            })
            .filter(|entry| !failed.contains(&(entry.session.clone(), entry.seq)))
            .collect())
    }

    pub fn sessions(&self) -> Result<Vec<SessionHeader>> {
        Ok(self
            .read_records()?
            .into_iter()
            .filter_map(|record| match record {
                LogRecord::Session(header) => Some(header),
                _ => None,
            })
            .collect())
    }

    /// Rewrites the log so it holds only `keep` and their session headers.
    /// The file is removed when nothing is left.
    pub fn retain(&self, keep: &[BackupLogEntry]) -> Result<()> {
        let records = self.read_records()?;
        let keep_keys: HashSet<(&str, u64)> =
            keep.iter().map(|e| (e.session.as_str(), e.seq)).collect();
        let keep_sessions: HashSet<&str> = keep.iter().map(|e| e.session.as_str()).collect();

        let kept: Vec<&LogRecord> = records
            .iter()
            .filter(|record| match record {
                LogRecord::Session(h) => keep_sessions.contains(h.session.as_str()),
                LogRecord::Rename(e) => keep_keys.contains(&(e.session.as_str(), e.seq)),
                LogRecord::Failed(_) => false,
            })
            .collect();

        if !kept.iter().any(|record| matches!(record, LogRecord::Rename(_))) {
            return match fs::remove_file(&self.path) {
                Ok(()) => {
                    debug!("backup log emptied, removed {}", self.path.display());
                    Ok(())
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(source) => Err(self.io_error(source)),
            };
        }

        let tmp = self.temp_path();
        self.write_atomically(&tmp, &kept)
            .map_err(|source| self.io_error(source))
    }

    fn write_atomically(&self, tmp: &Path, records: &[&LogRecord]) -> io::Result<()> {
        let mut file = File::create(tmp)?;
        for record in records {
            write_record(&mut file, record)?;
        }
        file.sync_all()?;
        drop(file);
        fs::rename(tmp, &self.path)
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn read_records(&self) -> Result<Vec<LogRecord>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(self.io_error(source)),
        };

        let lines: Vec<&str> = raw.split('\n').collect();
        let last = lines.len().saturating_sub(1);
        let mut records = Vec::with_capacity(lines.len());

        for (index, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LogRecord>(line) {
                Ok(record) => records.push(record),
                // No trailing newline: the process died mid-append, before
                // the matching rename could run.
                Err(err) if index == last => {
                    warn!(
                        "ignoring torn last line {} of {}: {err}",
                        index + 1,
                        self.path.display()
                    );
                }
                Err(source) => {
                    return Err(Error::CorruptBackupLog {
                        path: self.path.clone(),
                        line: index + 1,
                        source,
                    })
                }
            }
        }

        Ok(records)
    }

    fn io_error(&self, source: io::Error) -> Error {
        Error::BackupLog {
            path: self.path.clone(),
            source,
        }
    }
}

/// Appends the records of one rename session.
#[derive(Debug)]
pub struct SessionWriter {
    path: PathBuf,
    file: Option<File>,
    header: Option<SessionHeader>,
    next_seq: u64,
}

impl SessionWriter {
    pub fn session(&self) -> Option<&str> {
        self.header.as_ref().map(|h| h.session.as_str())
    }

    /// Appends a rename record and syncs it to disk. Returns its seq.
    pub fn record_rename(&mut self, original: &Path, new: &Path) -> Result<BackupLogEntry> {
        let entry = BackupLogEntry {
            session: self.session_id().to_string(),
            seq: self.next_seq,
            timestamp: Local::now(),
            original_path: original.to_path_buf(),
            new_path: new.to_path_buf(),
        };
        self.append(&LogRecord::Rename(entry.clone()))?;
        self.next_seq += 1;
        Ok(entry)
    }

    /// Marks a logged rename as not performed.
    pub fn record_failure(&mut self, seq: u64, error: &str) -> Result<()> {
        let record = LogRecord::Failed(FailureRecord {
            session: self.session_id().to_string(),
            seq,
            error: error.to_string(),
        });
        self.append(&record)
    }

    fn session_id(&self) -> &str {
        self.header
            .as_ref()
            .map(|h| h.session.as_str())
            .unwrap_or_default()
    }

    fn append(&mut self, record: &LogRecord) -> Result<()> {
        let path = self.path.clone();
        let wrap = |source| Error::BackupLog {
            path: path.clone(),
            source,
        };

        if self.file.is_none() {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(wrap)?;
            }
            trim_torn_tail(&self.path).map_err(wrap)?;
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .map_err(wrap)?;
            if let Some(header) = self.header.clone() {
                write_record(&mut file, &LogRecord::Session(header)).map_err(wrap)?;
            }
            self.file = Some(file);
        }

        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };
        write_record(file, record).map_err(wrap)?;
        file.flush().map_err(wrap)?;
        file.sync_data().map_err(wrap)
    }
}

/// Cuts a half-written last record left by a crash, so the next record
/// starts on a line of its own.
fn trim_torn_tail(path: &Path) -> io::Result<()> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err),
    };
    if matches!(data.last(), None | Some(b'\n')) {
        return Ok(());
    }

    let keep = data.iter().rposition(|&b| b == b'\n').map_or(0, |i| i + 1);
    warn!(
        "dropping {} bytes of torn record at the end of {}",
        data.len() - keep,
        path.display()
    );
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_len(keep as u64)?;
    file.sync_data()
}

fn write_record(out: &mut impl Write, record: &LogRecord) -> io::Result<()> {
    let mut line = serde_json::to_vec(record).map_err(io::Error::from)?;
    line.push(b'\n');
    out.write_all(&line)
}
