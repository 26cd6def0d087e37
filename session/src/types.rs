//! Public types consumed by editor integrations.
//!
//! These types define the interface between `modquery-session` and its
//! consumers. Consumers construct a [`ToolConfig`], submit [`Query`]s through
//! a session, and read [`SymbolInfo`] / type strings or a [`ToolError`] back.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Original document path → shadow file the tool should read instead.
///
/// Ordered so the `--map-file` arguments and map comparisons are stable.
pub type FileMap = BTreeMap<PathBuf, PathBuf>;

/// Configuration for the analysis tool and its sessions.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Executable to launch (e.g. "stack"). Resolved through `PATH`.
    pub executable: PathBuf,
    /// Arguments placed before the `--map-file` list.
    pub prefix_args: Vec<String>,
    /// Final argument selecting the line-based interactive mode.
    pub mode_arg: String,
    /// File name globs marking a project root (e.g. `["stack.yaml", "*.cabal"]`).
    pub root_markers: Vec<String>,
    /// Hard limit for one query round-trip, in milliseconds.
    pub query_timeout_ms: u64,
    /// How long a stopping process may take before it is killed, in milliseconds.
    pub shutdown_grace_ms: u64,
    /// Prefix for the per-session shadow file directory.
    pub cache_prefix: String,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("stack"),
            prefix_args: vec!["exec".into(), "ghc-mod".into(), "--".into()],
            mode_arg: "legacy-interactive".into(),
            root_markers: vec!["stack.yaml".into(), "*.cabal".into()],
            query_timeout_ms: 10_000,
            shutdown_grace_ms: 300,
            cache_prefix: "haskell".into(),
        }
    }
}

impl ToolConfig {
    #[must_use]
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Why a query produced no result.
///
/// `FailedToStart` is kept apart from the other kinds so a UI can point the
/// user at the executable setting instead of reporting a generic failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    /// The configured executable could not be launched.
    #[error("failed to start {}: {details}", executable.display())]
    FailedToStart { executable: PathBuf, details: String },
    /// The tool did not answer with an `OK`-terminated response.
    #[error("protocol failure: {0}")]
    Protocol(String),
    /// The tool answered, but not in the expected shape.
    #[error("unexpected response: {0}")]
    Parse(String),
}

impl ToolError {
    #[must_use]
    pub fn is_failed_to_start(&self) -> bool {
        matches!(self, Self::FailedToStart { .. })
    }
}

/// A query against the tool. Immutable once enqueued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// Look up `symbol` in the context of `file`.
    FindSymbol { file: PathBuf, symbol: String },
    /// Type of the expression at `line` (1-based) and `col` (0-based).
    TypeAt { file: PathBuf, line: u32, col: u32 },
}

/// Result of a symbol lookup.
///
/// Fields are filled by the response parser only; consumers read through
/// accessors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolInfo {
    pub(crate) definition: Vec<String>,
    pub(crate) additional_info: Vec<String>,
    pub(crate) file: Option<PathBuf>,
    pub(crate) line: Option<u32>,
    pub(crate) col: Option<u32>,
    pub(crate) module: Option<String>,
}

impl SymbolInfo {
    /// Definition lines as the tool printed them (it may wrap long signatures).
    #[must_use]
    pub fn definition(&self) -> &[String] {
        &self.definition
    }

    #[must_use]
    pub fn definition_text(&self) -> String {
        self.definition.join("\n")
    }

    /// Lines following the definition (instances, fixity, ...).
    #[must_use]
    pub fn additional_info(&self) -> &[String] {
        &self.additional_info
    }

    /// Defining file, relative to the project root unless the tool printed an
    /// absolute path.
    #[must_use]
    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    /// 1-based line of the definition.
    #[must_use]
    pub fn line(&self) -> Option<u32> {
        self.line
    }

    /// 1-based column of the definition.
    #[must_use]
    pub fn col(&self) -> Option<u32> {
        self.col
    }

    /// Defining module, for symbols that come from a dependency.
    #[must_use]
    pub fn module(&self) -> Option<&str> {
        self.module.as_deref()
    }

    /// Trailer describing where the symbol is defined:
    /// `-- path:line:col` or `-- Module "M"`.
    #[must_use]
    pub fn location_label(&self) -> Option<String> {
        if let Some(file) = &self.file {
            let mut label = format!("-- {}", file.display());
            if let Some(line) = self.line {
                label.push_str(&format!(":{line}"));
                if let Some(col) = self.col {
                    label.push_str(&format!(":{col}"));
                }
            }
            return Some(label);
        }
        self.module
            .as_ref()
            .map(|module| format!("-- Module \"{module}\""))
    }

    /// Jump target for "follow symbol": the defining file resolved against the
    /// session root, with its 1-based line and 0-based column.
    #[must_use]
    pub fn target_in(&self, root: &Path) -> Option<(PathBuf, u32, u32)> {
        let file = self.file.as_ref()?;
        let line = self.line.unwrap_or(1);
        let col = self.col.map_or(0, |col| col.saturating_sub(1));
        Some((root.join(file), line, col))
    }
}

/// Plain-text hover content: `:: <type>` followed by the symbol's definition,
/// location and additional info. Empty when there is nothing to show.
#[must_use]
pub fn format_hover(type_string: Option<&str>, info: Option<&SymbolInfo>) -> String {
    let mut sections = Vec::new();
    if let Some(ty) = type_string.filter(|ty| !ty.is_empty()) {
        sections.push(format!(":: {ty}"));
    }
    if let Some(info) = info.filter(|info| !info.definition.is_empty()) {
        sections.push(info.definition_text());
        if let Some(label) = info.location_label() {
            sections.push(label);
        }
        if !info.additional_info.is_empty() {
            sections.push(info.additional_info.join("\n"));
        }
    }
    sections.join("\n")
}
