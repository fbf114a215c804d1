//! Signal forwarding and background reaping.
//!
//! Handlers cannot reach the shell's state, so [`JobControl`](crate::job::JobControl)
//! mirrors the foreground process group into [`FOREGROUND_PGID`]. Nothing else
//! writes it. Everything that runs inside a handler or a freshly forked child
//! sticks to async-signal-safe calls.

use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal};
use nix::unistd::Pid;
use std::os::raw::c_int;
use std::sync::atomic::{AtomicI32, Ordering};

/// Process group of the foreground job, or 0 when there is none.
static FOREGROUND_PGID: AtomicI32 = AtomicI32::new(0);

pub(crate) fn publish_foreground(pgid: Option<Pid>) {
    FOREGROUND_PGID.store(pgid.map_or(0, Pid::as_raw), Ordering::SeqCst);
}

/// Writes raw bytes to a file descriptor, ignoring errors.
pub(crate) fn write_raw(fd: c_int, bytes: &[u8]) {
    unsafe {
        libc::write(fd, bytes.as_ptr().cast(), bytes.len());
    }
}

extern "C" fn on_sigint(_: c_int) {
    let saved = Errno::last_raw();
    match FOREGROUND_PGID.load(Ordering::SeqCst) {
        0 => write_raw(libc::STDOUT_FILENO, b"\n"),
        pgid => unsafe {
            libc::kill(-pgid, libc::SIGINT);
        },
    }
    Errno::set_raw(saved);
}

extern "C" fn on_sigtstp(_: c_int) {
    let saved = Errno::last_raw();
    let pgid = FOREGROUND_PGID.load(Ordering::SeqCst);
    if pgid > 0 {
        unsafe {
            libc::kill(-pgid, libc::SIGTSTP);
        }
    }
    Errno::set_raw(saved);
}

extern "C" fn on_sigchld(_: c_int) {
    let saved = Errno::last_raw();
    reap_orphans();
    Errno::set_raw(saved);
}

/// Reaps exited children that do not belong to the foreground job.
///
/// Children are peeked with `WNOWAIT` first; the loop stops at the first one
/// in the foreground group, which the executor waits for explicitly.
fn reap_orphans() {
    let foreground = FOREGROUND_PGID.load(Ordering::SeqCst);
    loop {
        let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
        let rc = unsafe {
            libc::waitid(
                libc::P_ALL,
                0,
                &mut info,
                libc::WEXITED | libc::WNOHANG | libc::WNOWAIT,
            )
        };
        if rc != 0 {
            break;
        }
        let pid = unsafe { info.si_pid() };
        if pid == 0 {
            break;
        }
        if foreground > 0 && unsafe { libc::getpgid(pid) } == foreground {
            break;
        }
        unsafe {
            libc::waitpid(pid, std::ptr::null_mut(), libc::WNOHANG);
        }
    }
}

fn install_handler(sig: Signal, handler: extern "C" fn(c_int)) -> Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(handler),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    unsafe { signal::sigaction(sig, &action) }
        .with_context(|| format!("cannot install {sig} handler"))?;
    Ok(())
}

/// Installs the shell's handlers for SIGINT, SIGTSTP and SIGCHLD.
///
/// With `terminal` set the shell also ignores SIGTTOU so it can take the
/// terminal back from a finished job.
pub fn install(terminal: bool) -> Result<()> {
    install_handler(Signal::SIGINT, on_sigint)?;
    install_handler(Signal::SIGTSTP, on_sigtstp)?;
    install_handler(Signal::SIGCHLD, on_sigchld)?;
    if terminal {
        unsafe { signal::signal(Signal::SIGTTOU, SigHandler::SigIgn) }
            .context("cannot ignore SIGTTOU")?;
    }
    log::debug!("signal handlers installed (terminal: {terminal})");
    Ok(())
}

/// Restores default dispositions and the signal mask in a forked child.
///
/// Called between `fork` and `exec`; only async-signal-safe calls.
pub(crate) fn reset_for_child() {
    for sig in [
        Signal::SIGINT,
        Signal::SIGTSTP,
        Signal::SIGTTOU,
        Signal::SIGTTIN,
        Signal::SIGQUIT,
        Signal::SIGCHLD,
    ] {
        let _ = unsafe { signal::signal(sig, SigHandler::SigDfl) };
    }
    let _ = signal::sigprocmask(SigmaskHow::SIG_SETMASK, Some(&SigSet::empty()), None);
}

/// Keeps SIGCHLD blocked while a job is launched and waited for.
///
/// Without it the reaper could run before the new job is published and
/// collect its leader.
pub(crate) struct ChildSignalGuard {
    set: SigSet,
}

impl ChildSignalGuard {
    pub(crate) fn block() -> Result<Self> {
        let mut set = SigSet::empty();
        set.add(Signal::SIGCHLD);
        set.thread_block().context("cannot block SIGCHLD")?;
        Ok(Self { set })
    }
}

impl Drop for ChildSignalGuard {
    fn drop(&mut self) {
        if let Err(e) = self.set.thread_unblock() {
            log::warn!("cannot unblock SIGCHLD: {e}");
        }
    }
}
