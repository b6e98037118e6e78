use crate::pl::pidfile::PidFile;
use std::io::Write;
use std::path::Path;

pub const EXIT_UPGRADE_FAILED: i32 = 2;
pub const EXIT_UPGRADE_AVAILABLE: i32 = 4;

/// How this platform turns an upgrade path into a running new binary.
pub trait UpgradeStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Apply the upgrade. Returns the exit code to use when the process survives.
    fn apply(&self, path: &Path, pid_file: Option<&mut PidFile>) -> i32;
}

pub fn detect() -> Box<dyn UpgradeStrategy> {
    if ExecReplace::supported() {
        Box::new(ExecReplace)
    } else {
        Box::new(StdoutMarker)
    }
}

/// Replace the process image in place. The new binary is started with no arguments.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecReplace;

impl ExecReplace {
    pub fn supported() -> bool {
        cfg!(unix)
    }
}

impl UpgradeStrategy for ExecReplace {
    fn name(&self) -> &'static str {
        "exec"
    }

    fn apply(&self, path: &Path, pid_file: Option<&mut PidFile>) -> i32 {
        if path.as_os_str().is_empty() {
            log::error!(target: "upgrade", "unable to execute update at (unknown path)");
            return EXIT_UPGRADE_FAILED;
        }
        // The new image writes its own pid file; ours must not outlive the exec.
        if let Some(pf) = pid_file {
            pf.remove();
        }
        log::info!(target: "upgrade", "executing {}", path.display());
        let err = exec_replace(path);
        log::error!(
            target: "upgrade",
            "abnormal termination: unable to execute update at {}: {err}",
            path.display()
        );
        EXIT_UPGRADE_FAILED
    }
}

#[cfg(unix)]
fn exec_replace(path: &Path) -> std::io::Error {
    use std::os::unix::process::CommandExt;
    std::process::Command::new(path).exec()
}

#[cfg(not(unix))]
fn exec_replace(_path: &Path) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "in-place process replacement is not available on this platform",
    )
}

/// Announce the update on stdout and leave the swap to an outer service wrapper.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutMarker;

impl StdoutMarker {
    pub fn marker_line(path: &Path) -> String {
        format!("[[[ UPDATE AVAILABLE: \"{}\" ]]]", path.display())
    }

    pub fn write_marker<W: Write>(&self, out: &mut W, path: &Path) -> i32 {
        if path.as_os_str().is_empty() {
            return EXIT_UPGRADE_FAILED;
        }
        // The watcher parses stdout line by line and expects CRLF on every platform.
        if let Err(e) = write!(out, "{}\r\n", Self::marker_line(path)).and_then(|_| out.flush()) {
            log::error!(target: "upgrade", "unable to announce update: {e}");
            return EXIT_UPGRADE_FAILED;
        }
        EXIT_UPGRADE_AVAILABLE
    }
}

impl UpgradeStrategy for StdoutMarker {
    fn name(&self) -> &'static str {
        "stdout-marker"
    }

    fn apply(&self, path: &Path, _pid_file: Option<&mut PidFile>) -> i32 {
        let stdout = std::io::stdout();
        let mut lock = stdout.lock();
        self.write_marker(&mut lock, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn marker_line_quotes_path() {
        let p = PathBuf::from("/var/lib/peerlink/updates.d/peerlink-1.2.3");
        assert_eq!(
            StdoutMarker::marker_line(&p),
            "[[[ UPDATE AVAILABLE: \"/var/lib/peerlink/updates.d/peerlink-1.2.3\" ]]]"
        );
    }

    #[test]
    fn marker_strategy_exits_four() {
        let mut out = Vec::new();
        let code = StdoutMarker.write_marker(&mut out, Path::new("/tmp/new"));
        assert_eq!(code, EXIT_UPGRADE_AVAILABLE);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "[[[ UPDATE AVAILABLE: \"/tmp/new\" ]]]\r\n"
        );
    }

    #[test]
    fn marker_strategy_without_path_fails() {
        let mut out = Vec::new();
        assert_eq!(
            StdoutMarker.write_marker(&mut out, Path::new("")),
            EXIT_UPGRADE_FAILED
        );
        assert!(out.is_empty());
    }

    #[test]
    fn exec_of_missing_binary_fails_with_two_and_removes_pid_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut pf = PidFile::create(dir.path()).unwrap();
        let code = ExecReplace.apply(&dir.path().join("does-not-exist"), Some(&mut pf));
        assert_eq!(code, EXIT_UPGRADE_FAILED);
        assert!(!dir.path().join("service.pid").exists());
    }

    #[test]
    fn detection_matches_platform() {
        let s = detect();
        if cfg!(unix) {
            assert_eq!(s.name(), "exec");
        } else {
            assert_eq!(s.name(), "stdout-marker");
        }
    }
}
