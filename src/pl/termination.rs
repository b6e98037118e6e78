//! Why (and whether) the service should stop.
//!
//! A single [`TerminationState`] exists per service process. It starts at
//! [`TerminationReason::Running`] and moves to exactly one terminal reason;
//! later attempts are ignored.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    Running,
    NormalTermination,
    UnrecoverableError(String),
    RestartForUpgrade(PathBuf),
}

impl TerminationReason {
    pub fn is_running(&self) -> bool {
        matches!(self, TerminationReason::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::Running => "running",
            TerminationReason::NormalTermination => "normal_termination",
            TerminationReason::UnrecoverableError(_) => "unrecoverable_error",
            TerminationReason::RestartForUpgrade(_) => "restart_for_upgrade",
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::UnrecoverableError(msg) => write!(f, "{} ({msg})", self.as_str()),
            TerminationReason::RestartForUpgrade(path) => {
                write!(f, "{} ({})", self.as_str(), path.display())
            }
            _ => f.write_str(self.as_str()),
        }
    }
}

#[derive(Debug)]
pub struct TerminationState {
    tx: watch::Sender<TerminationReason>,
}

impl TerminationState {
    pub fn new() -> Arc<Self> {
        let (tx, _rx) = watch::channel(TerminationReason::Running);
        Arc::new(Self { tx })
    }

    /// Record `reason` if nothing has been recorded yet.
    ///
    /// Returns `true` when this call performed the transition. `Running` is never accepted.
    pub fn terminate(&self, reason: TerminationReason) -> bool {
        if reason.is_running() {
            return false;
        }
        let mut reason = Some(reason);
        self.tx.send_if_modified(|current| {
            if !current.is_running() {
                return false;
            }
            match reason.take() {
                Some(r) => {
                    *current = r;
                    true
                }
                None => false,
            }
        })
    }

    pub fn current(&self) -> TerminationReason {
        self.tx.borrow().clone()
    }

    pub fn is_terminated(&self) -> bool {
        !self.tx.borrow().is_running()
    }

    /// Resolve once a terminal reason has been recorded.
    pub async fn wait(&self) -> TerminationReason {
        let mut rx = self.tx.subscribe();
        let reason = match rx.wait_for(|r| !r.is_running()).await {
            Ok(r) => r.clone(),
            // The sender lives in `self`, so the channel cannot close while we hold it.
            Err(_) => self.current(),
        };
        reason
    }
}
