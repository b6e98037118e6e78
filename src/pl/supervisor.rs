//! Service-role lifecycle: privilege check, pid file, termination handling,
//! and the mapping from a [`TerminationReason`] to an exit code.

use crate::pl::config::ServiceConfig;
use crate::pl::pidfile::PidFile;
use crate::pl::privilege;
use crate::pl::service::Service;
use crate::pl::signals;
use crate::pl::termination::{TerminationReason, TerminationState};
use crate::pl::upgrade::{self, UpgradeStrategy};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

pub use crate::pl::upgrade::{EXIT_UPGRADE_AVAILABLE, EXIT_UPGRADE_FAILED};

pub const EXIT_NORMAL: i32 = 0;
pub const EXIT_PRIVILEGE: i32 = 1;
/// Bad switches or config file; shares its code with a missing privilege.
pub const EXIT_CONFIG: i32 = 1;
pub const EXIT_UNRECOVERABLE: i32 = 3;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("{}", privilege::REQUIREMENT)]
    Privilege,
    #[error("unable to start service: {0:#}")]
    Construct(anyhow::Error),
    #[error("internal fault: {0}")]
    Fault(String),
    #[error("internal fault: service returned while still running")]
    ContractViolation,
}

impl SupervisorError {
    pub fn exit_code(&self) -> i32 {
        match self {
            SupervisorError::Privilege => EXIT_PRIVILEGE,
            _ => EXIT_UNRECOVERABLE,
        }
    }
}

/// What the supervisor does with a terminal reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Exit(i32),
    Upgrade(PathBuf),
}

pub fn disposition(reason: &TerminationReason) -> Result<Disposition, SupervisorError> {
    match reason {
        TerminationReason::Running => Err(SupervisorError::ContractViolation),
        TerminationReason::NormalTermination => Ok(Disposition::Exit(EXIT_NORMAL)),
        TerminationReason::UnrecoverableError(_) => Ok(Disposition::Exit(EXIT_UNRECOVERABLE)),
        TerminationReason::RestartForUpgrade(path) => Ok(Disposition::Upgrade(path.clone())),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub struct Supervisor {
    program: String,
    cfg: ServiceConfig,
    termination: Arc<TerminationState>,
    upgrade: Box<dyn UpgradeStrategy>,
    require_privilege: bool,
    install_signals: bool,
}

impl Supervisor {
    pub fn new(program: impl Into<String>, cfg: ServiceConfig) -> Self {
        Self {
            program: program.into(),
            cfg,
            termination: TerminationState::new(),
            upgrade: upgrade::detect(),
            require_privilege: true,
            install_signals: true,
        }
    }

    pub fn with_upgrade_strategy(mut self, strategy: Box<dyn UpgradeStrategy>) -> Self {
        self.upgrade = strategy;
        self
    }

    pub fn require_privilege(mut self, required: bool) -> Self {
        self.require_privilege = required;
        self
    }

    pub fn install_signal_handlers(mut self, install: bool) -> Self {
        self.install_signals = install;
        self
    }

    pub fn termination(&self) -> Arc<TerminationState> {
        Arc::clone(&self.termination)
    }

    /// Run the service built by `build` to completion and return the process exit code.
    ///
    /// The pid file exists from just before construction until this returns
    /// (or until an upgrade exec replaces the process).
    pub fn run<S, F>(self, build: F) -> i32
    where
        S: Service,
        F: FnOnce(&ServiceConfig, Arc<TerminationState>) -> anyhow::Result<S>,
    {
        if self.require_privilege && !privilege::is_privileged() {
            eprintln!("{}: {}", self.program, SupervisorError::Privilege);
            return SupervisorError::Privilege.exit_code();
        }

        if self.install_signals {
            if let Err(e) = signals::spawn_listener(Arc::clone(&self.termination)) {
                log::warn!(target: "signal", "unable to install termination handlers: {e}");
            }
        }

        if let Err(e) = std::fs::create_dir_all(&self.cfg.home) {
            log::warn!(
                target: "boot",
                "unable to create home directory {}: {e}",
                self.cfg.home.display()
            );
        }
        let mut pid_file = PidFile::create_best_effort(&self.cfg.home);

        let code = match self.start_and_wait(build) {
            Ok(reason) => self.finish(reason, pid_file.as_mut()),
            Err(e) => {
                eprintln!("{}: abnormal termination: {e}", self.program);
                e.exit_code()
            }
        };

        if let Some(pf) = pid_file.as_mut() {
            pf.remove();
        }
        log::info!(target: "shutdown", "exit code={code}");
        code
    }

    fn start_and_wait<S, F>(&self, build: F) -> Result<TerminationReason, SupervisorError>
    where
        S: Service,
        F: FnOnce(&ServiceConfig, Arc<TerminationState>) -> anyhow::Result<S>,
    {
        if self.termination.is_terminated() {
            log::info!(target: "boot", "terminated before service start");
            return Ok(self.termination.current());
        }

        let cfg = &self.cfg;
        let termination = Arc::clone(&self.termination);
        let outcome = panic::catch_unwind(AssertUnwindSafe(move || {
            let mut svc = build(cfg, termination).map_err(SupervisorError::Construct)?;
            log::info!(target: "boot", "service started home={}", cfg.home.display());
            Ok(svc.start_and_wait())
        }));

        match outcome {
            Ok(result) => result,
            Err(payload) => Err(SupervisorError::Fault(panic_message(payload.as_ref()))),
        }
    }

    fn finish(&self, reason: TerminationReason, pid_file: Option<&mut PidFile>) -> i32 {
        let disposition = match disposition(&reason) {
            Ok(d) => d,
            Err(e) => {
                eprintln!("{}: abnormal termination: {e}", self.program);
                return e.exit_code();
            }
        };
        match disposition {
            Disposition::Exit(code) => {
                if let TerminationReason::UnrecoverableError(msg) = &reason {
                    let msg = if msg.is_empty() { "(unknown reason)" } else { msg.as_str() };
                    eprintln!("{}: abnormal termination: {msg}", self.program);
                }
                code
            }
            Disposition::Upgrade(path) => {
                log::info!(
                    target: "upgrade",
                    "restart for upgrade path={} strategy={}",
                    path.display(),
                    self.upgrade.name()
                );
                self.upgrade.apply(&path, pid_file)
            }
        }
    }
}
