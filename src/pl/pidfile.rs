use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const PID_FILE_NAME: &str = "service.pid";

pub fn pid_path(home: &Path) -> PathBuf {
    home.join(PID_FILE_NAME)
}

#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    removed: bool,
}

impl PidFile {
    pub fn create(home: &Path) -> io::Result<Self> {
        Self::create_with_pid(home, std::process::id())
    }

    pub fn create_with_pid(home: &Path, pid: u32) -> io::Result<Self> {
        let path = pid_path(home);
        fs::write(&path, pid.to_string())?;
        log::debug!(target: "pid", "wrote pid={pid} path={}", path.display());
        Ok(Self { path, removed: false })
    }

    pub fn create_best_effort(home: &Path) -> Option<Self> {
        match Self::create(home) {
            Ok(pf) => Some(pf),
            Err(e) => {
                log::warn!(
                    target: "pid",
                    "unable to write {}: {e}",
                    pid_path(home).display()
                );
                None
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn remove(&mut self) {
        if self.removed {
            return;
        }
        self.removed = true;
        match fs::remove_file(&self.path) {
            Ok(()) => log::debug!(target: "pid", "removed {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log::warn!(target: "pid", "unable to remove {}: {e}", self.path.display()),
        }
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        self.remove();
    }
}

/// Read a pid file left behind by a previous run, if any.
pub fn read_pid(home: &Path) -> Option<u32> {
    fs::read_to_string(pid_path(home))
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_writes_current_pid() {
        let dir = tempfile::tempdir().unwrap();
        let pf = PidFile::create(dir.path()).unwrap();
        assert_eq!(pf.path(), dir.path().join("service.pid"));
        assert_eq!(read_pid(dir.path()), Some(std::process::id()));
    }

    #[test]
    fn drop_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        {
            let _pf = PidFile::create_with_pid(dir.path(), 4242).unwrap();
            assert_eq!(read_pid(dir.path()), Some(4242));
        }
        assert!(!pid_path(dir.path()).exists());
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut pf = PidFile::create(dir.path()).unwrap();
        pf.remove();
        assert!(!pf.path().exists());
        // A later writer may reuse the path; our second remove must not touch it.
        fs::write(pf.path(), "1").unwrap();
        pf.remove();
        drop(pf);
        assert!(pid_path(dir.path()).exists());
    }

    #[test]
    fn best_effort_tolerates_missing_home() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(PidFile::create_best_effort(&missing).is_none());
    }
}
