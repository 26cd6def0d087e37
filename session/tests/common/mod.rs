//! Shared test utilities and fixtures
//!
//! [`StubTool`] writes a small POSIX shell script that speaks the tool's
//! line protocol and logs what it was started with and asked.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use modquery_session::{ToolConfig, ToolSettings};
use tempfile::TempDir;

/// Replies:
/// - `info <file> hang` never answers
/// - `info <file> slow` answers after a second
/// - `info <file> <sym>` answers `<sym> :: Int -- Defined at src/A.hs:10:5`
/// - `type <file> <line> <col>` answers with a span whose type is
///   `<file>:<line>:<col>`
/// - `quit` exits without answering
const SCRIPT: &str = r#"log='@LOG@'
echo "start $*" >> "$log"
while IFS= read -r line; do
  echo "cmd $line" >> "$log"
  set -- $line
  case "$1" in
    info)
      case "$3" in
        hang) continue ;;
        slow) sleep 1 ;;
      esac
      printf '%s :: Int -- Defined at src/A.hs:10:5\nOK\n' "$3"
      ;;
    type)
      printf '1 1 1 5 "%s:%s:%s"\nOK\n' "$2" "$3" "$4"
      ;;
    quit)
      exit 0
      ;;
    *)
      printf 'OK\n'
      ;;
  esac
done
"#;

pub struct StubTool {
    dir: TempDir,
    script: PathBuf,
    log: PathBuf,
}

impl StubTool {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("stub.log");
        let script = dir.path().join("ghc-mod-stub.sh");
        std::fs::write(&script, SCRIPT.replace("@LOG@", &log.display().to_string())).unwrap();
        std::fs::write(&log, "").unwrap();

        let project = dir.path().join("proj");
        std::fs::create_dir_all(project.join("src")).unwrap();
        std::fs::write(project.join("stack.yaml"), "resolver: lts-22.0\n").unwrap();
        std::fs::write(project.join("src/A.hs"), "module A where\n").unwrap();

        Self { dir, script, log }
    }

    /// Project directory containing `stack.yaml` and `src/A.hs`.
    pub fn project(&self) -> PathBuf {
        self.dir.path().join("proj")
    }

    pub fn source(&self) -> PathBuf {
        self.project().join("src/A.hs")
    }

    pub fn config(&self) -> ToolConfig {
        ToolConfig {
            executable: PathBuf::from("/bin/sh"),
            prefix_args: vec![self.script.display().to_string()],
            query_timeout_ms: 3_000,
            shutdown_grace_ms: 200,
            cache_prefix: "modquery-test".to_string(),
            ..ToolConfig::default()
        }
    }

    pub fn settings(&self) -> Arc<ToolSettings> {
        Arc::new(ToolSettings::new(self.config()))
    }

    /// A second name for `/bin/sh`, for switching executables.
    #[cfg(unix)]
    pub fn alternate_shell(&self) -> PathBuf {
        let link = self.dir.path().join("sh-alt");
        if !link.exists() {
            std::os::unix::fs::symlink("/bin/sh", &link).unwrap();
        }
        link
    }

    fn lines(&self, prefix: &str) -> Vec<String> {
        std::fs::read_to_string(&self.log)
            .unwrap()
            .lines()
            .filter_map(|line| line.strip_prefix(prefix))
            .map(str::to_string)
            .collect()
    }

    /// Argument lists the stub was started with, one per process.
    pub fn starts(&self) -> Vec<String> {
        self.lines("start ")
    }

    /// Commands the stub received, across all processes.
    pub fn commands(&self) -> Vec<String> {
        self.lines("cmd ")
    }
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

pub fn path_str(path: &Path) -> String {
    path.display().to_string()
}
