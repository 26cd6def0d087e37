//! Tool session: owns one child process and runs one query at a time.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::codec::{CommandWriter, ResponseReader};
use crate::config::ToolSettings;
use crate::protocol::{self, map_file_args};
use crate::types::{FileMap, Query, SymbolInfo, ToolConfig, ToolError};

/// Lexically resolve `.` and `..` without touching the filesystem.
pub(crate) fn normalize_path(path: &Path) -> PathBuf {
    let mut out = Vec::new();
    for c in path.components() {
        match c {
            std::path::Component::ParentDir => {
                out.pop();
            }
            std::path::Component::CurDir => {}
            other => out.push(other),
        }
    }
    out.iter().collect()
}

/// `PATH` with `dir` in front, so helpers next to the executable are found
/// first.
fn search_path_with(dir: &Path) -> Option<OsString> {
    let mut paths = vec![dir.to_path_buf()];
    if let Some(existing) = std::env::var_os("PATH") {
        paths.extend(std::env::split_paths(&existing));
    }
    std::env::join_paths(paths).ok()
}

struct RunningTool {
    /// Resolved and normalized executable, used to detect configuration
    /// changes.
    executable: PathBuf,
    child: Child,
    writer: CommandWriter<ChildStdin>,
    reader: ResponseReader<ChildStdout>,
}

impl RunningTool {
    fn spawn(
        config: &ToolConfig,
        resolved: &Path,
        root: &Path,
        file_map: &FileMap,
    ) -> Result<Self> {
        let mut cmd = Command::new(resolved);
        cmd.args(&config.prefix_args)
            .args(map_file_args(file_map))
            .arg(&config.mode_arg)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if !root.as_os_str().is_empty() {
            cmd.current_dir(root);
        }
        if let Some(path) = resolved.parent().and_then(search_path_with) {
            cmd.env("PATH", path);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning {}", resolved.display()))?;

        // Spawning is synchronous, so a child that is already gone never came up.
        if let Some(status) = child.try_wait().context("polling new process")? {
            bail!("exited immediately with {status}");
        }

        let stdin = child.stdin.take().context("no stdin from child")?;
        let stdout = child.stdout.take().context("no stdout from child")?;

        Ok(Self {
            executable: normalize_path(resolved),
            child,
            writer: CommandWriter::new(stdin),
            reader: ResponseReader::new(stdout),
        })
    }

    async fn round_trip(&mut self, command: &str) -> Result<Vec<u8>> {
        self.writer.write_command(command).await?;
        self.reader
            .read_response()
            .await?
            .context("tool closed its output")
    }

    /// Close stdin, give the process `grace` to exit, then kill it.
    async fn stop(self, grace: std::time::Duration) {
        let Self {
            mut child,
            writer,
            reader,
            ..
        } = self;
        drop(writer.into_inner());
        drop(reader);

        if tokio::time::timeout(grace, child.wait()).await.is_err() {
            tracing::debug!("Tool process didn't exit in time, killing");
            let _ = child.kill().await;
        }
    }
}

/// One lazily started tool process rooted at a project directory.
///
/// Only the owning queue's worker touches a session, so nothing here is
/// synchronized. At most one process is alive; between queries it is idle
/// and ready to read the next command.
pub struct ToolSession {
    root: PathBuf,
    settings: Arc<ToolSettings>,
    file_map: FileMap,
    process: Option<RunningTool>,
}

impl ToolSession {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, settings: Arc<ToolSettings>) -> Self {
        Self {
            root: root.into(),
            settings,
            file_map: FileMap::new(),
            process: None,
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether a process is currently running (it may still have died since
    /// the last query).
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.process.is_some()
    }

    /// Replace the shadow file mapping. The mapping is passed on the command
    /// line, so a change stops the process and the next query restarts it.
    pub async fn set_file_map(&mut self, map: FileMap) {
        if map == self.file_map {
            return;
        }
        tracing::debug!(
            "File map changed ({} -> {} entries), restarting tool",
            self.file_map.len(),
            map.len()
        );
        self.file_map = map;
        self.shutdown().await;
    }

    async fn ensure_started(&mut self) -> Result<&mut RunningTool, ToolError> {
        let config = self.settings.snapshot();

        let resolved = match which::which(&config.executable) {
            Ok(resolved) => resolved,
            Err(e) => {
                // The running process belongs to an executable no longer configured.
                self.shutdown().await;
                return Err(ToolError::FailedToStart {
                    executable: config.executable.clone(),
                    details: e.to_string(),
                });
            }
        };

        let stale = match self.process.as_mut() {
            Some(running) if running.executable != normalize_path(&resolved) => {
                tracing::info!(
                    "Tool executable changed to {}, restarting",
                    resolved.display()
                );
                true
            }
            Some(running) => !matches!(running.child.try_wait(), Ok(None)),
            None => false,
        };
        if stale {
            self.shutdown().await;
        }

        if self.process.is_none() {
            let running = RunningTool::spawn(&config, &resolved, &self.root, &self.file_map)
                .map_err(|e| ToolError::FailedToStart {
                    executable: config.executable.clone(),
                    details: format!("{e:#}"),
                })?;
            tracing::info!(
                "Started {} for {} ({} mapped file(s))",
                resolved.display(),
                self.root.display(),
                self.file_map.len()
            );
            return Ok(self.process.insert(running));
        }

        self.process
            .as_mut()
            .ok_or_else(|| ToolError::Protocol("tool process vanished".to_string()))
    }

    /// Send one command and return the raw response payload.
    ///
    /// Any failure after the command was sent (timeout, EOF, I/O) leaves the
    /// protocol out of step, so the process is stopped and the next query
    /// starts a fresh one.
    pub async fn run_query(&mut self, command: &str) -> Result<Vec<u8>, ToolError> {
        let timeout = self.settings.snapshot().query_timeout();
        let running = self.ensure_started().await?;

        let failure = match tokio::time::timeout(timeout, running.round_trip(command)).await {
            Ok(Ok(payload)) => return Ok(payload),
            Ok(Err(e)) => format!("{e:#}"),
            Err(_) => format!("no response within {}ms", timeout.as_millis()),
        };

        tracing::warn!("Query failed, stopping tool: {failure}");
        self.shutdown().await;
        Err(ToolError::Protocol(failure))
    }

    pub async fn find_symbol(
        &mut self,
        file: &Path,
        symbol: &str,
    ) -> Result<SymbolInfo, ToolError> {
        let query = Query::FindSymbol {
            file: file.to_path_buf(),
            symbol: symbol.to_string(),
        };
        let payload = self.run_query(&query.command()).await?;
        protocol::parse_symbol_info(&payload)
    }

    pub async fn type_info(
        &mut self,
        file: &Path,
        line: u32,
        col: u32,
    ) -> Result<String, ToolError> {
        let query = Query::TypeAt {
            file: file.to_path_buf(),
            line,
            col,
        };
        let payload = self.run_query(&query.command()).await?;
        protocol::parse_type_info(&payload)
    }

    /// Stop the process, if any. Always safe to call.
    pub async fn shutdown(&mut self) {
        if let Some(running) = self.process.take() {
            running.stop(self.settings.snapshot().shutdown_grace()).await;
        }
    }
}
