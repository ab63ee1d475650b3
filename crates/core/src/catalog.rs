use crate::error::{Error, FingerprintError, Result};
use crate::fingerprint::{Fingerprint, FingerprintProvider};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::cell::OnceCell;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const DEFAULT_RAW_EXTENSIONS: &[&str] = &[
    "cr2", "nef", "arw", "dng", "raf", "orf", "rw2", "pef", "srw",
];
pub const DEFAULT_JPG_EXTENSIONS: &[&str] = &["jpg", "jpeg"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageKind {
    Raw,
    Jpg,
}

/// Allow-list that decides which files are RAW and which are JPG.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionSet {
    raw: Vec<String>,
    jpg: Vec<String>,
}

impl ExtensionSet {
    /// Extensions are compared case-insensitively; a leading dot is optional.
    pub fn new<R, J, S>(raw: R, jpg: J) -> Result<Self>
    where
        R: IntoIterator<Item = S>,
        J: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let raw = normalize_extensions(raw);
        let jpg = normalize_extensions(jpg);

        if raw.is_empty() {
            return Err(Error::InvalidConfig("RAW extension list is empty".into()));
        }
        if jpg.is_empty() {
            return Err(Error::InvalidConfig("JPG extension list is empty".into()));
        }
        if let Some(shared) = raw.iter().find(|ext| jpg.contains(ext)) {
            return Err(Error::InvalidConfig(format!(
                "extension .{shared} is listed as both RAW and JPG"
            )));
        }

        Ok(Self { raw, jpg })
    }

    pub fn raw(&self) -> &[String] {
        &self.raw
    }

    pub fn jpg(&self) -> &[String] {
        &self.jpg
    }

    pub fn classify(&self, path: &Path) -> Option<ImageKind> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        if self.raw.contains(&ext) {
            Some(ImageKind::Raw)
        } else if self.jpg.contains(&ext) {
            Some(ImageKind::Jpg)
        } else {
            None
        }
    }
}

impl Default for ExtensionSet {
    fn default() -> Self {
        Self {
            raw: normalize_extensions(DEFAULT_RAW_EXTENSIONS),
            jpg: normalize_extensions(DEFAULT_JPG_EXTENSIONS),
        }
    }
}

fn normalize_extensions<I, S>(input: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    input
        .into_iter()
        .map(|ext| ext.as_ref().trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
        .filter(|ext| seen.insert(ext.clone()))
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pub extensions: ExtensionSet,
    pub recursive: bool,
    pub include_hidden: bool,
}

/// One candidate file. The fingerprint is computed on first request and
/// then reused for the lifetime of the record.
#[derive(Debug)]
pub struct ImageRecord {
    path: PathBuf,
    kind: ImageKind,
    fingerprint: OnceCell<Fingerprint>,
}

impl ImageRecord {
    pub fn new(path: impl Into<PathBuf>, kind: ImageKind) -> Self {
        Self {
            path: path.into(),
            kind,
            fingerprint: OnceCell::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> ImageKind {
        self.kind
    }

    pub fn cached_fingerprint(&self) -> Option<&Fingerprint> {
        self.fingerprint.get()
    }

    pub fn fingerprint<P>(&self, provider: &P) -> std::result::Result<&Fingerprint, FingerprintError>
    where
        P: FingerprintProvider + ?Sized,
    {
        if let Some(fingerprint) = self.fingerprint.get() {
            return Ok(fingerprint);
        }
        let computed = provider.fingerprint(&self.path)?;
        Ok(self.fingerprint.get_or_init(|| computed))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanStats {
    pub scanned_files: usize,
    pub raw_files: usize,
    pub jpg_files: usize,
    pub skipped_other: usize,
    pub skipped_hidden: usize,
    pub skipped_unreadable_entries: usize,
}

/// Result of one scan. Replaced wholesale by the next scan.
#[derive(Debug)]
pub struct CandidateSet {
    pub raw_dir: PathBuf,
    pub jpg_dir: PathBuf,
    pub raws: Vec<ImageRecord>,
    pub jpgs: Vec<ImageRecord>,
    pub stats: ScanStats,
}

impl CandidateSet {
    pub fn is_empty(&self) -> bool {
        self.raws.is_empty() && self.jpgs.is_empty()
    }
}

pub fn scan_candidates(raw_dir: &Path, jpg_dir: &Path, options: &ScanOptions) -> Result<CandidateSet> {
    ensure_directory(raw_dir)?;
    ensure_directory(jpg_dir)?;

    let mut stats = ScanStats::default();
    let mut raws = Vec::new();
    let mut jpgs = Vec::new();

    let mut sort_into = |path: PathBuf, wanted: Option<ImageKind>, stats: &mut ScanStats| {
        match options.extensions.classify(&path) {
            Some(ImageKind::Raw) if wanted != Some(ImageKind::Jpg) => raws.push(path),
            Some(ImageKind::Jpg) if wanted != Some(ImageKind::Raw) => jpgs.push(path),
            _ => stats.skipped_other += 1,
        }
    };

    if same_directory(raw_dir, jpg_dir) {
        for path in list_files(raw_dir, options, &mut stats) {
            sort_into(path, None, &mut stats);
        }
    } else {
        for path in list_files(raw_dir, options, &mut stats) {
            sort_into(path, Some(ImageKind::Raw), &mut stats);
        }
        for path in list_files(jpg_dir, options, &mut stats) {
            sort_into(path, Some(ImageKind::Jpg), &mut stats);
        }
    }

    raws.sort();
    jpgs.sort();
    stats.raw_files = raws.len();
    stats.jpg_files = jpgs.len();

    info!(
        "scan found {} RAW and {} JPG files ({} scanned)",
        stats.raw_files, stats.jpg_files, stats.scanned_files
    );

    Ok(CandidateSet {
        raw_dir: raw_dir.to_path_buf(),
        jpg_dir: jpg_dir.to_path_buf(),
        raws: raws
            .into_iter()
            .map(|path| ImageRecord::new(path, ImageKind::Raw))
            .collect(),
        jpgs: jpgs
            .into_iter()
            .map(|path| ImageRecord::new(path, ImageKind::Jpg))
            .collect(),
        stats,
    })
}

fn ensure_directory(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(Error::DirectoryNotFound(path.to_path_buf()));
    }
    if !path.is_dir() {
        return Err(Error::NotADirectory(path.to_path_buf()));
    }
    Ok(())
}

fn same_directory(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

fn list_files(root: &Path, options: &ScanOptions, stats: &mut ScanStats) -> Vec<PathBuf> {
    let max_depth = if options.recursive { usize::MAX } else { 1 };
    let mut out = Vec::new();

    let walker = WalkDir::new(root)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            options.include_hidden
                || entry.depth() == 0
                || entry.file_type().is_file()
                || !is_hidden(entry.path())
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("skipping unreadable entry under {}: {err}", root.display());
                stats.skipped_unreadable_entries += 1;
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        stats.scanned_files += 1;

        if is_hidden(entry.path()) && !options.include_hidden {
            stats.skipped_hidden += 1;
            continue;
        }
        out.push(entry.into_path());
    }

    out
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().starts_with('.'))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::{scan_candidates, ExtensionSet, ImageKind, ImageRecord, ScanOptions};
    use crate::error::{Error, FingerprintError};
    use crate::fingerprint::{Fingerprint, FingerprintProvider};
    use std::cell::Cell;
    use std::fs::{self, File};
    use std::path::{Path, PathBuf};
    use tempfile::tempdir;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("parent dirs must be creatable");
        }
        File::create(path).expect("file must be creatable");
    }

    fn names(paths: impl Iterator<Item = PathBuf>) -> Vec<String> {
        paths
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn classify_is_case_insensitive() {
        let set = ExtensionSet::default();
        assert_eq!(set.classify(Path::new("a/IMG_1.CR2")), Some(ImageKind::Raw));
        assert_eq!(set.classify(Path::new("a/IMG_1.nef")), Some(ImageKind::Raw));
        assert_eq!(set.classify(Path::new("a/IMG_1.JPeG")), Some(ImageKind::Jpg));
        assert_eq!(set.classify(Path::new("a/IMG_1.xmp")), None);
        assert_eq!(set.classify(Path::new("a/README")), None);
    }

    #[test]
    fn extension_set_normalizes_input() {
        let set = ExtensionSet::new([".CR3", "cr3", " nef "], ["JPG"]).expect("valid set");
        assert_eq!(set.raw(), ["cr3".to_string(), "nef".to_string()]);
        assert_eq!(set.jpg(), ["jpg".to_string()]);
    }

    #[test]
    fn extension_set_rejects_overlap_and_empty_lists() {
        assert!(matches!(
            ExtensionSet::new(["cr2", "jpg"], ["jpg"]),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            ExtensionSet::new(Vec::<String>::new(), vec!["jpg".to_string()]),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            ExtensionSet::new(["cr2"], [" . "]),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn scan_splits_and_sorts_candidates() {
        let temp = tempdir().expect("tempdir");
        let raw_dir = temp.path().join("raw");
        let jpg_dir = temp.path().join("jpg");
        touch(&raw_dir.join("b.CR2"));
        touch(&raw_dir.join("a.nef"));
        touch(&raw_dir.join("notes.txt"));
        touch(&raw_dir.join("stray.jpg"));
        touch(&jpg_dir.join("z.JPG"));
        touch(&jpg_dir.join("y.jpeg"));
        touch(&jpg_dir.join("sidecar.xmp"));

        let set = scan_candidates(&raw_dir, &jpg_dir, &ScanOptions::default()).expect("scan");
        assert_eq!(
            names(set.raws.iter().map(|r| r.path().to_path_buf())),
            vec!["a.nef", "b.CR2"]
        );
        assert_eq!(
            names(set.jpgs.iter().map(|r| r.path().to_path_buf())),
            vec!["y.jpeg", "z.JPG"]
        );
        assert!(set.raws.iter().all(|r| r.kind() == ImageKind::Raw));
        assert_eq!(set.stats.scanned_files, 7);
        assert_eq!(set.stats.skipped_other, 3);
    }

    #[test]
    fn scan_accepts_one_folder_for_both_kinds() {
        let temp = tempdir().expect("tempdir");
        touch(&temp.path().join("IMG_1.CR2"));
        touch(&temp.path().join("IMG_1.JPG"));

        let set = scan_candidates(temp.path(), temp.path(), &ScanOptions::default()).expect("scan");
        assert_eq!(set.raws.len(), 1);
        assert_eq!(set.jpgs.len(), 1);
        assert_eq!(set.stats.scanned_files, 2);
    }

    #[test]
    fn scan_skips_hidden_and_nested_unless_asked() {
        let temp = tempdir().expect("tempdir");
        let raw_dir = temp.path().join("raw");
        let jpg_dir = temp.path().join("jpg");
        touch(&raw_dir.join(".hidden.CR2"));
        touch(&raw_dir.join("day1/IMG_2.CR2"));
        touch(&raw_dir.join(".cache/IMG_3.CR2"));
        touch(&jpg_dir.join("IMG_2.JPG"));

        let flat = scan_candidates(&raw_dir, &jpg_dir, &ScanOptions::default()).expect("scan");
        assert!(flat.raws.is_empty());
        assert_eq!(flat.stats.skipped_hidden, 1);

        let recursive = ScanOptions {
            recursive: true,
            ..ScanOptions::default()
        };
        let nested = scan_candidates(&raw_dir, &jpg_dir, &recursive).expect("scan");
        assert_eq!(
            names(nested.raws.iter().map(|r| r.path().to_path_buf())),
            vec!["IMG_2.CR2"]
        );

        let everything = ScanOptions {
            recursive: true,
            include_hidden: true,
            ..ScanOptions::default()
        };
        let all = scan_candidates(&raw_dir, &jpg_dir, &everything).expect("scan");
        assert_eq!(all.raws.len(), 3);
    }

    #[test]
    fn scan_rejects_missing_or_file_paths() {
        let temp = tempdir().expect("tempdir");
        let file = temp.path().join("file.txt");
        touch(&file);

        assert!(matches!(
            scan_candidates(&temp.path().join("nope"), temp.path(), &ScanOptions::default()),
            Err(Error::DirectoryNotFound(_))
        ));
        assert!(matches!(
            scan_candidates(temp.path(), &file, &ScanOptions::default()),
            Err(Error::NotADirectory(_))
        ));
    }

    #[test]
    fn scan_of_empty_folders_is_not_an_error() {
        let temp = tempdir().expect("tempdir");
        let set = scan_candidates(temp.path(), temp.path(), &ScanOptions::default()).expect("scan");
        assert!(set.is_empty());
    }

    struct CountingProvider {
        calls: Cell<usize>,
    }

    impl FingerprintProvider for CountingProvider {
        fn fingerprint(&self, _path: &Path) -> Result<Fingerprint, FingerprintError> {
            self.calls.set(self.calls.get() + 1);
            Ok(Fingerprint::from_bytes(vec![0x5A]))
        }
    }

    #[test]
    fn record_computes_fingerprint_once() {
        let provider = CountingProvider {
            calls: Cell::new(0),
        };
        let record = ImageRecord::new("x.CR2", ImageKind::Raw);
        assert!(record.cached_fingerprint().is_none());

        let first = record.fingerprint(&provider).expect("fingerprint").clone();
        let second = record.fingerprint(&provider).expect("fingerprint").clone();
        assert_eq!(first, second);
        assert_eq!(provider.calls.get(), 1);
        assert!(record.cached_fingerprint().is_some());
    }
}
