use crate::catalog::{CandidateSet, ImageKind, ImageRecord};
use crate::fingerprint::{Fingerprint, FingerprintProvider};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    pub raw: PathBuf,
    pub jpg: PathBuf,
    pub distance: u32,
}

/// A candidate that could not be fingerprinted and took no part in matching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadableImage {
    pub path: PathBuf,
    pub kind: ImageKind,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchReport {
    pub raw_dir: PathBuf,
    pub jpg_dir: PathBuf,
    pub threshold: u32,
    pub matches: Vec<MatchResult>,
    /// Every RAW without a partner, unreadable ones included.
    pub unmatched_raws: Vec<PathBuf>,
    pub unmatched_jpgs: Vec<PathBuf>,
    pub unreadable: Vec<UnreadableImage>,
}

#[derive(Debug, Clone, Copy)]
pub struct FingerprintProgress<'a> {
    pub path: &'a Path,
    pub done: usize,
    pub total: usize,
    pub failed: bool,
}

pub fn find_matches<P>(candidates: &CandidateSet, provider: &P, threshold: u32) -> MatchReport
where
    P: FingerprintProvider + ?Sized,
{
    find_matches_with_progress(candidates, provider, threshold, |_| {})
}

/// Greedy one-to-one assignment over all (raw, jpg) pairs within
/// `threshold`, closest first. Equal distances are ordered by raw path and
/// then jpg path, compared as plain strings (`a-b.CR2` before `a/c.CR2`),
/// so the result is fully deterministic.
pub fn find_matches_with_progress<P, F>(
    candidates: &CandidateSet,
    provider: &P,
    threshold: u32,
    mut progress: F,
) -> MatchReport
where
    P: FingerprintProvider + ?Sized,
    F: FnMut(FingerprintProgress<'_>),
{
    let total = candidates.raws.len() + candidates.jpgs.len();
    let mut done = 0usize;
    let mut unreadable = Vec::new();
    let raws = fingerprint_side(
        &candidates.raws,
        provider,
        total,
        &mut done,
        &mut progress,
        &mut unreadable,
    );
    let jpgs = fingerprint_side(
        &candidates.jpgs,
        provider,
        total,
        &mut done,
        &mut progress,
        &mut unreadable,
    );

    let mut pairs: Vec<(u32, &Path, &Path)> = Vec::new();
    for &(raw_path, raw_fp) in &raws {
        for &(jpg_path, jpg_fp) in &jpgs {
            let distance = provider.distance(raw_fp, jpg_fp);
            if distance <= threshold {
                pairs.push((distance, raw_path, jpg_path));
            }
        }
    }
    pairs.sort_by(|a, b| {
        (a.0, a.1.as_os_str(), a.2.as_os_str()).cmp(&(b.0, b.1.as_os_str(), b.2.as_os_str()))
    });

    let mut taken_raws = HashSet::<&Path>::new();
    let mut taken_jpgs = HashSet::<&Path>::new();
    let mut matches = Vec::new();
    for (distance, raw, jpg) in pairs {
        if taken_raws.contains(raw) || taken_jpgs.contains(jpg) {
            continue;
        }
        taken_raws.insert(raw);
        taken_jpgs.insert(jpg);
        debug!("paired {} with {} (distance {distance})", raw.display(), jpg.display());
        matches.push(MatchResult {
            raw: raw.to_path_buf(),
            jpg: jpg.to_path_buf(),
            distance,
        });
    }

    let unmatched = |records: &[ImageRecord], taken: &HashSet<&Path>| -> Vec<PathBuf> {
        records
            .iter()
            .map(ImageRecord::path)
            .filter(|path| !taken.contains(path))
            .map(Path::to_path_buf)
            .collect()
    };
    let unmatched_raws = unmatched(&candidates.raws, &taken_raws);
    let unmatched_jpgs = unmatched(&candidates.jpgs, &taken_jpgs);

    info!(
        "threshold {threshold}: {} matches, {} unmatched RAW, {} unmatched JPG, {} unreadable",
        matches.len(),
        unmatched_raws.len(),
        unmatched_jpgs.len(),
        unreadable.len()
    );

    MatchReport {
        raw_dir: candidates.raw_dir.clone(),
        jpg_dir: candidates.jpg_dir.clone(),
        threshold,
        matches,
        unmatched_raws,
        unmatched_jpgs,
        unreadable,
    }
}

fn fingerprint_side<'a, P, F>(
    records: &'a [ImageRecord],
    provider: &P,
    total: usize,
    done: &mut usize,
    progress: &mut F,
    unreadable: &mut Vec<UnreadableImage>,
) -> Vec<(&'a Path, &'a Fingerprint)>
where
    P: FingerprintProvider + ?Sized,
    F: FnMut(FingerprintProgress<'_>),
{
    let mut readable = Vec::with_capacity(records.len());
    for record in records {
        let outcome = record.fingerprint(provider);
        *done += 1;
        progress(FingerprintProgress {
            path: record.path(),
            done: *done,
            total,
            failed: outcome.is_err(),
        });
        match outcome {
            Ok(fingerprint) => readable.push((record.path(), fingerprint)),
            Err(err) => {
                warn!("{err}");
                unreadable.push(UnreadableImage {
                    path: record.path().to_path_buf(),
                    kind: record.kind(),
                    reason: err.to_string(),
                });
            }
        }
    }
    readable
}

#[cfg(test)]
mod tests {
    use super::{find_matches, find_matches_with_progress, MatchResult};
    use crate::catalog::ImageKind;
    use crate::test_support::{candidates, ones, FakeProvider};
    use std::collections::HashSet;
    use std::path::{Path, PathBuf};

    fn pairs(results: &[MatchResult]) -> Vec<(String, String, u32)> {
        results
            .iter()
            .map(|m| {
                (
                    m.raw.file_name().unwrap().to_string_lossy().to_string(),
                    m.jpg.file_name().unwrap().to_string_lossy().to_string(),
                    m.distance,
                )
            })
            .collect()
    }

    #[test]
    fn closest_jpg_within_threshold_wins() {
        let raw = Path::new("/raw");
        let jpg = Path::new("/jpg");
        let set = candidates(raw, &["raw1.CR2"], jpg, &["jpg1.JPG", "jpg2.JPG"]);
        let provider = FakeProvider::new()
            .with(raw.join("raw1.CR2"), 0)
            .with(jpg.join("jpg1.JPG"), ones(3))
            .with(jpg.join("jpg2.JPG"), ones(8));

        let report = find_matches(&set, &provider, 5);
        assert_eq!(pairs(&report.matches), vec![("raw1.CR2".into(), "jpg1.JPG".into(), 3)]);
        assert!(report.unmatched_raws.is_empty());
        assert_eq!(report.unmatched_jpgs, vec![jpg.join("jpg2.JPG")]);
        assert_eq!(report.threshold, 5);
    }

    #[test]
    fn ties_break_by_path_and_stay_stable() {
        let raw = Path::new("/raw");
        let jpg = Path::new("/jpg");
        let set = candidates(raw, &["b.CR2", "a.CR2"], jpg, &["y.JPG", "x.JPG"]);
        let provider = FakeProvider::new()
            .with(raw.join("a.CR2"), 7)
            .with(raw.join("b.CR2"), 7)
            .with(jpg.join("x.JPG"), 7)
            .with(jpg.join("y.JPG"), 7);

        let first = find_matches(&set, &provider, 0);
        let second = find_matches(&set, &provider, 0);
        assert_eq!(
            pairs(&first.matches),
            vec![
                ("a.CR2".into(), "x.JPG".into(), 0),
                ("b.CR2".into(), "y.JPG".into(), 0)
            ]
        );
        assert_eq!(first.matches, second.matches);
    }

    #[test]
    fn ties_compare_paths_as_strings() {
        let raw = Path::new("/raw");
        let jpg = Path::new("/jpg");
        let set = candidates(raw, &["a/c.CR2", "a-b.CR2"], jpg, &["x.JPG"]);
        let provider = FakeProvider::new()
            .with(raw.join("a/c.CR2"), 1)
            .with(raw.join("a-b.CR2"), 1)
            .with(jpg.join("x.JPG"), 1);

        let report = find_matches(&set, &provider, 0);
        assert_eq!(pairs(&report.matches), vec![("a-b.CR2".into(), "x.JPG".into(), 0)]);
        assert_eq!(report.unmatched_raws, vec![raw.join("a/c.CR2")]);
    }

    #[test]
    fn assignment_is_one_to_one() {
        let raw = Path::new("/raw");
        let jpg = Path::new("/jpg");
        let set = candidates(raw, &["a.CR2", "b.CR2", "c.CR2"], jpg, &["x.JPG", "y.JPG"]);
        let provider = FakeProvider::new()
            .with(raw.join("a.CR2"), 0)
            .with(raw.join("b.CR2"), 0)
            .with(raw.join("c.CR2"), 0)
            .with(jpg.join("x.JPG"), ones(1))
            .with(jpg.join("y.JPG"), ones(2));

        let report = find_matches(&set, &provider, 64);
        let raws: HashSet<&PathBuf> = report.matches.iter().map(|m| &m.raw).collect();
        let jpgs: HashSet<&PathBuf> = report.matches.iter().map(|m| &m.jpg).collect();
        assert_eq!(report.matches.len(), 2);
        assert_eq!(raws.len(), 2);
        assert_eq!(jpgs.len(), 2);
        assert_eq!(
            pairs(&report.matches),
            vec![
                ("a.CR2".into(), "x.JPG".into(), 1),
                ("b.CR2".into(), "y.JPG".into(), 2)
            ]
        );
        assert_eq!(report.unmatched_raws, vec![raw.join("c.CR2")]);
    }

    #[test]
    fn raising_threshold_keeps_earlier_matches() {
        let raw = Path::new("/raw");
        let jpg = Path::new("/jpg");
        let raws = ["r1.NEF", "r2.NEF", "r3.NEF", "r4.NEF"];
        let jpgs = ["j1.jpg", "j2.jpg", "j3.jpg", "j4.jpg"];
        let set = candidates(raw, &raws, jpg, &jpgs);
        let provider = FakeProvider::new()
            .with(raw.join("r1.NEF"), 0b0000_0000)
            .with(raw.join("r2.NEF"), 0b1111_0000)
            .with(raw.join("r3.NEF"), 0b1010_1010)
            .with(raw.join("r4.NEF"), 0b0011_1100)
            .with(jpg.join("j1.jpg"), 0b0000_0001)
            .with(jpg.join("j2.jpg"), 0b1110_0000)
            .with(jpg.join("j3.jpg"), 0b1010_0000)
            .with(jpg.join("j4.jpg"), 0b1111_1111);

        let mut previous: Vec<MatchResult> = Vec::new();
        for threshold in 0..=8 {
            let report = find_matches(&set, &provider, threshold);
            for earlier in &previous {
                assert!(
                    report.matches.contains(earlier),
                    "match {earlier:?} lost when threshold rose to {threshold}"
                );
            }
            previous = report.matches;
        }
        assert_eq!(previous.len(), 4);
    }

    #[test]
    fn zero_threshold_requires_identical_fingerprints() {
        let raw = Path::new("/raw");
        let jpg = Path::new("/jpg");
        let set = candidates(raw, &["a.CR2", "b.CR2"], jpg, &["a.JPG", "b.JPG"]);
        let provider = FakeProvider::new()
            .with(raw.join("a.CR2"), 42)
            .with(raw.join("b.CR2"), 99)
            .with(jpg.join("a.JPG"), 42)
            .with(jpg.join("b.JPG"), 98);

        let report = find_matches(&set, &provider, 0);
        assert_eq!(pairs(&report.matches), vec![("a.CR2".into(), "a.JPG".into(), 0)]);
        assert_eq!(report.unmatched_raws, vec![raw.join("b.CR2")]);
        assert_eq!(report.unmatched_jpgs, vec![jpg.join("b.JPG")]);
    }

    #[test]
    fn unreadable_files_are_reported_and_skipped() {
        let raw = Path::new("/raw");
        let jpg = Path::new("/jpg");
        let set = candidates(raw, &["broken.CR2", "ok.CR2"], jpg, &["ok.JPG"]);
        let provider = FakeProvider::new()
            .with(raw.join("ok.CR2"), 1)
            .with(jpg.join("ok.JPG"), 1);

        let report = find_matches(&set, &provider, 5);
        assert_eq!(report.matches.len(), 1);
        assert_eq!(report.unreadable.len(), 1);
        assert_eq!(report.unreadable[0].path, raw.join("broken.CR2"));
        assert_eq!(report.unreadable[0].kind, ImageKind::Raw);
        assert_eq!(report.unmatched_raws, vec![raw.join("broken.CR2")]);
    }

    #[test]
    fn empty_sets_give_empty_report() {
        let set = candidates(Path::new("/raw"), &[], Path::new("/jpg"), &[]);
        let report = find_matches(&set, &FakeProvider::new(), 5);
        assert!(report.matches.is_empty());
        assert!(report.unmatched_raws.is_empty());
        assert!(report.unmatched_jpgs.is_empty());
        assert!(report.unreadable.is_empty());
    }

    #[test]
    fn rematching_reuses_cached_fingerprints() {
        let raw = Path::new("/raw");
        let jpg = Path::new("/jpg");
        let set = candidates(raw, &["a.CR2"], jpg, &["a.JPG", "b.JPG"]);
        let provider = FakeProvider::new()
            .with(raw.join("a.CR2"), 0)
            .with(jpg.join("a.JPG"), ones(4))
            .with(jpg.join("b.JPG"), ones(9));

        let mut events = Vec::new();
        let tight = find_matches_with_progress(&set, &provider, 3, |p| {
            events.push((p.done, p.total, p.failed))
        });
        let loose = find_matches(&set, &provider, 10);

        assert!(tight.matches.is_empty());
        assert_eq!(pairs(&loose.matches), vec![("a.CR2".into(), "a.JPG".into(), 4)]);
        assert_eq!(provider.calls(), 3);
        assert_eq!(events, vec![(1, 3, false), (2, 3, false), (3, 3, false)]);
    }
}
