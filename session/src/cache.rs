//! Shadow files mirroring open editor documents.
//!
//! The tool reads sources from disk, so unsaved edits are copied into a
//! private per-session directory and handed to the tool as `--map-file`
//! pairs (see [`ShadowFileCache::file_map`]).

use std::collections::{BTreeMap, HashSet};
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::TempDir;

use crate::host::{DocumentHost, OpenDocument};
use crate::types::FileMap;

/// Content version last written to a mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Revision {
    /// The editor's own revision counter.
    Counter(u64),
    /// SHA-256 of the contents, for documents without a counter.
    Digest([u8; 32]),
}

impl Revision {
    fn of(document: &OpenDocument) -> Self {
        match document.revision() {
            Some(counter) => Self::Counter(counter),
            None => Self::Digest(Sha256::digest(document.contents()).into()),
        }
    }
}

#[derive(Debug)]
struct Mirror {
    shadow: PathBuf,
    written: Revision,
}

/// What one [`ShadowFileCache::update`] changed on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheUpdate {
    /// Mirrors (re)written with new content.
    pub written: usize,
    /// Mirrors deleted because their document was closed.
    pub removed: usize,
}

/// Per-session set of mirror files. The directory and everything in it is
/// deleted when the cache is dropped.
#[derive(Debug)]
pub struct ShadowFileCache {
    root: PathBuf,
    dir: TempDir,
    mirrors: BTreeMap<PathBuf, Mirror>,
}

impl ShadowFileCache {
    /// Create an empty cache for documents under `root` (every document when
    /// `root` is empty). The mirror directory is named `<prefix>-<random>`.
    pub fn new(prefix: &str, root: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("{prefix}-"))
            .tempdir()?;
        Ok(Self {
            root: root.into(),
            dir,
            mirrors: BTreeMap::new(),
        })
    }

    /// Directory holding the mirror files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Snapshot of `original → mirror` for every tracked document.
    #[must_use]
    pub fn file_map(&self) -> FileMap {
        self.mirrors
            .iter()
            .map(|(original, mirror)| (original.clone(), mirror.shadow.clone()))
            .collect()
    }

    fn covers(&self, path: &Path) -> bool {
        self.root.as_os_str().is_empty() || path.starts_with(&self.root)
    }

    /// Bring the mirrors in line with the host's open documents.
    ///
    /// Content is written only when a document's revision differs from the
    /// one last written, so a second call with nothing changed writes
    /// nothing. Mirrors of documents that are no longer open are deleted.
    pub fn update(&mut self, host: &dyn DocumentHost) -> CacheUpdate {
        self.apply(host.open_documents(), host)
    }

    /// [`update`](Self::update) with `documents` already fetched from `host`.
    pub fn apply(&mut self, documents: Vec<OpenDocument>, host: &dyn DocumentHost) -> CacheUpdate {
        let mut stats = CacheUpdate::default();
        let mut open = HashSet::new();

        for document in documents {
            if !self.covers(document.path()) {
                continue;
            }
            open.insert(document.path().to_path_buf());
            if self.sync_document(host, &document) {
                stats.written += 1;
            }
        }

        self.mirrors.retain(|original, mirror| {
            if open.contains(original) {
                return true;
            }
            match std::fs::remove_file(&mirror.shadow) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => tracing::debug!(
                    "Failed to remove mirror {}: {e}",
                    mirror.shadow.display()
                ),
            }
            stats.removed += 1;
            false
        });

        if stats != CacheUpdate::default() {
            tracing::debug!(
                "Shadow files updated: {} written, {} removed",
                stats.written,
                stats.removed
            );
        }
        stats
    }

    /// Write `document` to its mirror if needed. Returns whether it wrote.
    fn sync_document(&mut self, host: &dyn DocumentHost, document: &OpenDocument) -> bool {
        let revision = Revision::of(document);

        if let Some(mirror) = self.mirrors.get_mut(document.path()) {
            if mirror.written == revision {
                return false;
            }
            return match host.write_file(&mirror.shadow, document.contents()) {
                Ok(()) => {
                    mirror.written = revision;
                    true
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to update mirror of {}: {e}",
                        document.path().display()
                    );
                    false
                }
            };
        }

        let shadow = match self.create_mirror(document.path()) {
            Ok(shadow) => shadow,
            Err(e) => {
                tracing::warn!(
                    "Failed to create mirror of {}: {e}",
                    document.path().display()
                );
                return false;
            }
        };
        if let Err(e) = host.write_file(&shadow, document.contents()) {
            tracing::warn!(
                "Failed to write mirror of {}: {e}",
                document.path().display()
            );
            // Never map the tool onto an empty file.
            let _ = std::fs::remove_file(&shadow);
            return false;
        }
        self.mirrors.insert(
            document.path().to_path_buf(),
            Mirror {
                shadow,
                written: revision,
            },
        );
        true
    }

    /// Reserve `<random>-<file name>` in the mirror directory. The original
    /// file name is kept so the tool's messages stay readable.
    fn create_mirror(&self, original: &Path) -> io::Result<PathBuf> {
        let mut suffix = OsString::from("-");
        suffix.push(
            original
                .file_name()
                .unwrap_or_else(|| std::ffi::OsStr::new("document")),
        );
        let file = tempfile::Builder::new()
            .prefix("")
            .rand_bytes(6)
            .suffix(&suffix)
            .tempfile_in(self.dir.path())?;
        Ok(file.into_temp_path().keep()?)
    }
}
