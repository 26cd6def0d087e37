//! SessionRegistry: one query queue per project root, shared by every
//! consumer and dropped once nobody holds it.
//!
//! The registry keeps only weak references. A session lives as long as its
//! longest holder; an expired entry is replaced at the next lookup of its
//! root.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

use crate::config::ToolSettings;
use crate::host::DocumentHost;
use crate::queue::QueryQueue;
use crate::tool::normalize_path;
use crate::types::ToolConfig;

/// Compile root marker patterns. Invalid patterns are logged and skipped so
/// one typo doesn't disable root detection entirely.
fn build_markers(patterns: &[String]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let mut glob = GlobBuilder::new(pat);
        glob.literal_separator(true);
        if cfg!(windows) {
            glob.case_insensitive(true);
        }
        match glob.build() {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(e) => tracing::warn!("Ignoring invalid root marker '{pat}': {e}"),
        }
    }
    builder.build().unwrap_or_else(|e| {
        tracing::warn!("Invalid root marker set: {e}");
        GlobSet::empty()
    })
}

fn contains_marker(dir: &Path, markers: &GlobSet) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    entries.flatten().any(|entry| {
        entry.file_type().is_ok_and(|t| !t.is_dir()) && markers.is_match(entry.file_name())
    })
}

/// Nearest directory at or above `path` containing a file that matches
/// `markers`. Starts at `path` itself when it is a directory, otherwise at
/// its parent.
#[must_use]
pub fn find_project_root(path: &Path, markers: &GlobSet) -> Option<PathBuf> {
    let absolute = std::path::absolute(path).ok()?;
    let absolute = normalize_path(&absolute);
    let mut dir = if absolute.is_dir() {
        absolute.as_path()
    } else {
        absolute.parent()?
    };
    loop {
        if contains_marker(dir, markers) {
            return Some(dir.to_path_buf());
        }
        dir = dir.parent()?;
    }
}

/// Hands out shared [`QueryQueue`]s keyed by project root.
pub struct SessionRegistry {
    settings: Arc<ToolSettings>,
    host: Arc<dyn DocumentHost>,
    markers: GlobSet,
    sessions: Mutex<HashMap<PathBuf, Weak<QueryQueue>>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new(config: ToolConfig, host: Arc<dyn DocumentHost>) -> Self {
        let markers = build_markers(&config.root_markers);
        Self {
            settings: Arc::new(ToolSettings::new(config)),
            host,
            markers,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, Weak<QueryQueue>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Settings shared by every session of this registry.
    #[must_use]
    pub fn settings(&self) -> &Arc<ToolSettings> {
        &self.settings
    }

    /// Use `executable` from now on. Running sessions restart their process
    /// with it on their next query.
    pub fn set_executable(&self, executable: impl Into<PathBuf>) {
        self.settings.set_executable(executable);
    }

    /// Root key for `path`: its project root, or an empty path when it
    /// belongs to no project.
    #[must_use]
    pub fn project_root(&self, path: &Path) -> PathBuf {
        find_project_root(path, &self.markers).unwrap_or_default()
    }

    /// The session serving `path`, created on first use.
    pub fn session_for(&self, path: &Path) -> io::Result<Arc<QueryQueue>> {
        let root = self.project_root(path);
        let mut sessions = self.lock();

        if let Some(live) = sessions.get(&root).and_then(Weak::upgrade) {
            return Ok(live);
        }

        let queue = Arc::new(QueryQueue::new(
            root.clone(),
            Arc::clone(&self.settings),
            Arc::clone(&self.host),
        )?);
        tracing::info!("Created session for {}", root.display());
        sessions.insert(root, Arc::downgrade(&queue));
        Ok(queue)
    }

    /// Number of sessions still held by someone.
    #[must_use]
    pub fn live_sessions(&self) -> usize {
        self.lock()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Forget expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|_, weak| weak.strong_count() > 0);
        before - sessions.len()
    }
}
