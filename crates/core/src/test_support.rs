use crate::catalog::{CandidateSet, ImageKind, ImageRecord, ScanStats};
use crate::error::FingerprintError;
use crate::fingerprint::{Fingerprint, FingerprintProvider};
use std::cell::Cell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Provider backed by a fixed path -> fingerprint table. Paths missing from
/// the table are reported as unreadable.
#[derive(Default)]
pub(crate) struct FakeProvider {
    prints: HashMap<PathBuf, Fingerprint>,
    calls: Cell<usize>,
}

impl FakeProvider {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with(mut self, path: impl Into<PathBuf>, bits: u64) -> Self {
        self.prints.insert(path.into(), fingerprint(bits));
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl FingerprintProvider for FakeProvider {
    fn fingerprint(&self, path: &Path) -> Result<Fingerprint, FingerprintError> {
        self.calls.set(self.calls.get() + 1);
        self.prints
            .get(path)
            .cloned()
            .ok_or_else(|| FingerprintError::NoPreview(path.to_path_buf()))
    }
}

pub(crate) fn fingerprint(bits: u64) -> Fingerprint {
    Fingerprint::from_bytes(bits.to_be_bytes().to_vec())
}

/// A value whose Hamming distance from zero is `n`.
pub(crate) fn ones(n: u32) -> u64 {
    if n >= 64 {
        u64::MAX
    } else {
        (1u64 << n) - 1
    }
}

pub(crate) fn candidates(raw_dir: &Path, raws: &[&str], jpg_dir: &Path, jpgs: &[&str]) -> CandidateSet {
    CandidateSet {
        raw_dir: raw_dir.to_path_buf(),
        jpg_dir: jpg_dir.to_path_buf(),
        raws: raws
            .iter()
            .map(|name| ImageRecord::new(raw_dir.join(name), ImageKind::Raw))
            .collect(),
        jpgs: jpgs
            .iter()
            .map(|name| ImageRecord::new(jpg_dir.join(name), ImageKind::Jpg))
            .collect(),
        stats: ScanStats::default(),
    }
}
