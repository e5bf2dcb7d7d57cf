//! Resolving an upload source into the list of files to ingest.
//!
//! All functions here do blocking filesystem work; async callers run them
//! through `tokio::task::spawn_blocking`.

use std::fs;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use lorekeep_core::file_safety::{extension_of, is_supported, sanitize_relative_path};
use lorekeep_core::paths::distinct_folders;
use lorekeep_core::{
    defaults, Error, FolderStructure, JobOptions, Result, ScanIssue, UploadSource,
};

/// A file accepted for ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestFile {
    /// Absolute location on disk.
    pub path: PathBuf,
    /// `/`-separated path relative to the upload root.
    pub relative_path: String,
    pub size_bytes: u64,
}

/// Limits applied while scanning.
#[derive(Debug, Clone, Copy)]
pub struct ScanLimits {
    pub max_file_size_bytes: u64,
    pub max_files: usize,
    pub skip_unsupported: bool,
    /// Total bytes an archive may expand to.
    pub max_unpacked_bytes: u64,
}

impl ScanLimits {
    pub fn from_options(options: &JobOptions, max_files: usize) -> Self {
        Self {
            max_file_size_bytes: options.max_file_size_bytes(),
            max_files: max_files.max(1),
            skip_unsupported: options.skip_unsupported,
            max_unpacked_bytes: defaults::MAX_ARCHIVE_UNPACKED_MB * 1024 * 1024,
        }
    }
}

/// Result of resolving a source: the files plus the structure snapshot.
#[derive(Debug, Clone)]
pub struct FileSet {
    pub root: PathBuf,
    pub files: Vec<IngestFile>,
    pub structure: FolderStructure,
}

impl FileSet {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }
}

fn is_hidden_name(name: &str) -> bool {
    name.starts_with('.') || name.starts_with('~')
}

/// `/`-joined path of `path` below `root`.
fn relative_string(path: &Path, root: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<&str> = rel
        .components()
        .map(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .collect::<Option<_>>()?;
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Accumulates accepted files and scan issues under the limits.
struct Collector<'a> {
    root: PathBuf,
    limits: &'a ScanLimits,
    files: Vec<IngestFile>,
    structure: FolderStructure,
}

impl<'a> Collector<'a> {
    fn new(root: &Path, limits: &'a ScanLimits) -> Self {
        Self {
            root: root.to_path_buf(),
            limits,
            files: Vec::new(),
            structure: FolderStructure {
                root: root.display().to_string(),
                ..Default::default()
            },
        }
    }

    fn issue(&mut self, file: impl Into<String>, reason: impl Into<String>) {
        self.structure.errors.push(ScanIssue {
            file: file.into(),
            reason: reason.into(),
        });
    }

    /// Offer one file. Returns false once the file cap stops the scan.
    fn offer(&mut self, path: PathBuf, relative_path: String, size_bytes: u64) -> bool {
        if self.files.len() >= self.limits.max_files {
            let reason = format!(
                "File limit of {} reached; remaining files skipped",
                self.limits.max_files
            );
            self.issue(relative_path, reason);
            return false;
        }

        if size_bytes > self.limits.max_file_size_bytes {
            let reason = Error::FileTooLarge {
                size: size_bytes,
                limit: self.limits.max_file_size_bytes,
            }
            .to_string();
            self.issue(relative_path, reason);
            return true;
        }

        if !is_supported(&relative_path) {
            self.issue(relative_path.clone(), "Unsupported file type");
            if self.limits.skip_unsupported {
                return true;
            }
        }

        let ext = extension_of(&relative_path)
            .map(|e| format!(".{}", e))
            .unwrap_or_else(|| "(none)".to_string());
        *self.structure.file_types.entry(ext).or_insert(0) += 1;
        self.structure.total_size += size_bytes;
        self.files.push(IngestFile {
            path,
            relative_path,
            size_bytes,
        });
        true
    }

    fn finish(mut self) -> FileSet {
        self.structure.folders = distinct_folders(self.files.iter().map(|f| f.relative_path.as_str()));
        FileSet {
            root: self.root,
            files: self.files,
            structure: self.structure,
        }
    }
}

/// Walk a folder in name order, collecting supported files.
///
/// Hidden (`.`) and editor-temp (`~`) entries are skipped, directories
/// included. Symlinks are not followed.
pub fn scan_folder(root: &Path, limits: &ScanLimits) -> Result<FileSet> {
    if !root.is_dir() {
        return Err(Error::InvalidInput(format!(
            "Not a directory: {}",
            root.display()
        )));
    }

    let mut collector = Collector::new(root, limits);
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0 || !e.file_name().to_str().map_or(true, is_hidden_name)
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let file = e
                    .path()
                    .and_then(|p| relative_string(p, root))
                    .unwrap_or_default();
                collector.issue(file, e.to_string());
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(relative_path) = relative_string(entry.path(), root) else {
            continue;
        };
        let size = match entry.metadata() {
            Ok(m) => m.len(),
            Err(e) => {
                collector.issue(relative_path, e.to_string());
                continue;
            }
        };
        if !collector.offer(entry.path().to_path_buf(), relative_path, size) {
            break;
        }
    }

    let set = collector.finish();
    info!(
        subsystem = "jobs",
        component = "scan",
        root = %root.display(),
        files = set.files.len(),
        folders = set.structure.folders.len(),
        issues = set.structure.errors.len(),
        "Folder scanned"
    );
    Ok(set)
}

/// Unpack a ZIP archive into `dest` and return the directory to scan.
///
/// Entries escaping `dest` and `__MACOSX` metadata are skipped. An archive
/// inflating past `max_unpacked_bytes` is rejected outright. When the
/// archive holds exactly one top-level directory named after the archive
/// (`docs.zip` holding `docs/`), that directory is the scan root so the
/// wrapper does not become a folder node.
pub fn unpack_zip(archive: &Path, dest: &Path, limits: &ScanLimits) -> Result<(PathBuf, Vec<ScanIssue>)> {
    let file = fs::File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file)
        .map_err(|e| Error::InvalidInput(format!("Invalid ZIP archive: {}", e)))?;
    fs::create_dir_all(dest)?;

    let mut issues = Vec::new();
    let mut extracted = 0usize;
    let mut unpacked = 0u64;
    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|e| Error::Extraction(format!("ZIP entry {}: {}", i, e)))?;
        let Some(rel) = entry.enclosed_name() else {
            warn!(entry = entry.name(), "Skipping ZIP entry outside the archive root");
            continue;
        };
        if rel.components().any(|c| c.as_os_str() == "__MACOSX") {
            continue;
        }

        let out = dest.join(&rel);
        if entry.is_dir() {
            fs::create_dir_all(&out)?;
            continue;
        }
        // One past the cap lets the scan report the limit
        if extracted > limits.max_files {
            break;
        }
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut outfile = fs::File::create(&out)?;
        let limit = limits.max_file_size_bytes;
        let remaining = limits.max_unpacked_bytes.saturating_sub(unpacked);
        let budget = limit.min(remaining).saturating_add(1);
        let copied = std::io::copy(&mut (&mut entry).take(budget), &mut outfile)?;
        drop(outfile);
        // Bytes of skipped oversize entries count too: they were inflated.
        if copied > remaining {
            fs::remove_file(&out)?;
            return Err(Error::InvalidInput(format!(
                "ZIP archive expands beyond {} bytes",
                limits.max_unpacked_bytes
            )));
        }
        unpacked += copied;
        if copied > limit {
            fs::remove_file(&out)?;
            issues.push(ScanIssue {
                file: rel.to_string_lossy().replace('\\', "/"),
                reason: Error::FileTooLarge {
                    size: entry.size().max(copied),
                    limit,
                }
                .to_string(),
            });
            continue;
        }
        extracted += 1;
    }
    debug!(archive = %archive.display(), extracted, unpacked, "ZIP unpacked");

    let stem = archive
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let root = single_top_level_dir(dest)?
        .filter(|dir| dir.file_name().is_some_and(|n| n.to_string_lossy() == stem))
        .unwrap_or_else(|| dest.to_path_buf());
    Ok((root, issues))
}

fn single_top_level_dir(dest: &Path) -> Result<Option<PathBuf>> {
    let mut visible = Vec::new();
    for entry in fs::read_dir(dest)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if is_hidden_name(&name) || name == "__MACOSX" {
            continue;
        }
        visible.push(entry);
    }
    if let [only] = visible.as_slice() {
        if only.file_type()?.is_dir() {
            return Ok(Some(only.path()));
        }
    }
    Ok(None)
}

/// Collect an explicit list of staged files below `root`.
pub fn collect_listed(root: &Path, files: &[String], limits: &ScanLimits) -> Result<FileSet> {
    let mut collector = Collector::new(root, limits);
    for listed in files {
        let Some(relative_path) = sanitize_relative_path(listed) else {
            collector.issue(listed.clone(), "Invalid relative path");
            continue;
        };
        let path = root.join(&relative_path);
        let size = match fs::metadata(&path) {
            Ok(m) if m.is_file() => m.len(),
            Ok(_) => {
                collector.issue(relative_path, "Not a regular file");
                continue;
            }
            Err(e) => {
                collector.issue(relative_path, e.to_string());
                continue;
            }
        };
        if !collector.offer(path, relative_path, size) {
            break;
        }
    }
    Ok(collector.finish())
}

/// Resolve a job's source into its file set.
///
/// ZIP archives are unpacked into `extract_dir`, which the caller owns and
/// removes when the job ends.
pub fn resolve_source(
    source: &UploadSource,
    options: &JobOptions,
    extract_dir: &Path,
    max_files: usize,
) -> Result<FileSet> {
    let limits = ScanLimits::from_options(options, max_files);
    match source {
        UploadSource::Zip { archive_path } => {
            let (root, issues) = unpack_zip(Path::new(archive_path), extract_dir, &limits)?;
            let mut set = scan_folder(&root, &limits)?;
            set.structure.root = archive_path.clone();
            set.structure.errors.splice(0..0, issues);
            Ok(set)
        }
        UploadSource::Folder { path } => scan_folder(Path::new(path), &limits),
        UploadSource::Files { root, files } => collect_listed(Path::new(root), files, &limits),
    }
}
