//! OS termination notifications.
//!
//! Notifications are received on a dedicated thread with its own small
//! runtime, never in signal-handler context. The only thing that crosses over
//! is a `NormalTermination` transition on the shared [`TerminationState`].

use crate::pl::termination::{TerminationReason, TerminationState};
use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Register the handlers, then watch them on a `signal` thread.
///
/// Handlers are installed before this returns, so a notification sent right
/// after it can no longer take the default (fatal) action.
pub fn spawn_listener(state: Arc<TerminationState>) -> io::Result<JoinHandle<()>> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let sources = {
        let _guard = rt.enter();
        Sources::register()?
    };
    std::thread::Builder::new()
        .name("signal".to_string())
        .spawn(move || rt.block_on(sources.listen(&state)))
}

#[cfg(unix)]
struct Sources {
    term: tokio::signal::unix::Signal,
    int: tokio::signal::unix::Signal,
    quit: tokio::signal::unix::Signal,
    // Registered only so their default action (terminate) no longer applies.
    hup: tokio::signal::unix::Signal,
    usr1: tokio::signal::unix::Signal,
    usr2: tokio::signal::unix::Signal,
    alrm: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Sources {
    fn register() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            term: signal(SignalKind::terminate())?,
            int: signal(SignalKind::interrupt())?,
            quit: signal(SignalKind::quit())?,
            hup: signal(SignalKind::hangup())?,
            usr1: signal(SignalKind::user_defined1())?,
            usr2: signal(SignalKind::user_defined2())?,
            alrm: signal(SignalKind::alarm())?,
        })
    }

    async fn listen(mut self, state: &TerminationState) {
        loop {
            let name = tokio::select! {
                _ = self.term.recv() => "SIGTERM",
                _ = self.int.recv() => "SIGINT",
                _ = self.quit.recv() => "SIGQUIT",
                _ = self.hup.recv() => { log::debug!(target: "signal", "ignoring SIGHUP"); continue; }
                _ = self.usr1.recv() => { log::debug!(target: "signal", "ignoring SIGUSR1"); continue; }
                _ = self.usr2.recv() => { log::debug!(target: "signal", "ignoring SIGUSR2"); continue; }
                _ = self.alrm.recv() => { log::debug!(target: "signal", "ignoring SIGALRM"); continue; }
            };
            notify(state, name);
        }
    }
}

#[cfg(windows)]
struct Sources {
    c: tokio::signal::windows::CtrlC,
    brk: tokio::signal::windows::CtrlBreak,
    close: tokio::signal::windows::CtrlClose,
    shutdown: tokio::signal::windows::CtrlShutdown,
}

#[cfg(windows)]
impl Sources {
    fn register() -> io::Result<Self> {
        use tokio::signal::windows;

        Ok(Self {
            c: windows::ctrl_c()?,
            brk: windows::ctrl_break()?,
            close: windows::ctrl_close()?,
            shutdown: windows::ctrl_shutdown()?,
        })
    }

    async fn listen(mut self, state: &TerminationState) {
        loop {
            let name = tokio::select! {
                _ = self.c.recv() => "CTRL_C",
                _ = self.brk.recv() => "CTRL_BREAK",
                _ = self.close.recv() => "CTRL_CLOSE",
                _ = self.shutdown.recv() => "CTRL_SHUTDOWN",
            };
            notify(state, name);
        }
    }
}

#[cfg(not(any(unix, windows)))]
struct Sources;

#[cfg(not(any(unix, windows)))]
impl Sources {
    fn register() -> io::Result<Self> {
        Ok(Self)
    }

    async fn listen(self, _state: &TerminationState) {}
}

fn notify(state: &TerminationState, name: &str) {
    if state.terminate(TerminationReason::NormalTermination) {
        log::info!(target: "signal", "{name} received; terminating");
    } else {
        log::debug!(target: "signal", "{name} received; already terminating");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notify_records_normal_termination_once() {
        let st = TerminationState::new();
        notify(&st, "SIGTERM");
        assert_eq!(st.current(), TerminationReason::NormalTermination);
        st.terminate(TerminationReason::UnrecoverableError("late".into()));
        notify(&st, "SIGINT");
        assert_eq!(st.current(), TerminationReason::NormalTermination);
    }

    #[cfg(unix)]
    #[test]
    fn sigterm_records_normal_termination() {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;
        use std::time::{Duration, Instant};

        let st = TerminationState::new();
        spawn_listener(Arc::clone(&st)).unwrap();
        kill(Pid::this(), Signal::SIGTERM).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !st.is_terminated() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(st.current(), TerminationReason::NormalTermination);
    }

    #[cfg(unix)]
    #[test]
    fn ignored_signals_do_not_kill_the_process() {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;
        use std::time::Duration;

        let st = TerminationState::new();
        spawn_listener(Arc::clone(&st)).unwrap();
        kill(Pid::this(), Signal::SIGHUP).unwrap();
        kill(Pid::this(), Signal::SIGUSR1).unwrap();
        // Reaching the end of the test means the default action did not run.
        std::thread::sleep(Duration::from_millis(100));
    }
}
