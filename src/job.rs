//! Foreground job tracking.

use crate::command::{ExitCode, JobResult};
use crate::signals;
use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::{Pid, getpgrp, setpgid, tcsetpgrp};

/// The processes launched for one pipeline, grouped under the first one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pgid: Pid,
    members: Vec<Pid>,
}

impl Job {
    /// Process group id; also the pid of the first launched stage.
    pub fn pgid(&self) -> Pid {
        self.pgid
    }

    pub fn members(&self) -> &[Pid] {
        &self.members
    }
}

enum Waited {
    Finished(ExitCode),
    Stopped,
}

/// Owner of the foreground job and of jobs that were stopped.
///
/// At most one job is in the foreground. Its process group is published to
/// the signal handlers while it is tracked.
#[derive(Debug, Default)]
pub struct JobControl {
    foreground: Option<Job>,
    suspended: Vec<Job>,
    terminal: bool,
}

impl JobControl {
    /// `terminal` says whether stdin is a terminal that jobs should be given.
    pub fn new(terminal: bool) -> Self {
        Self {
            foreground: None,
            suspended: Vec::new(),
            terminal,
        }
    }

    pub fn terminal(&self) -> bool {
        self.terminal
    }

    /// Process group of the foreground job, if one is tracked.
    pub fn foreground(&self) -> Option<Pid> {
        self.foreground.as_ref().map(Job::pgid)
    }

    /// Jobs that were stopped and have not exited yet.
    pub fn suspended(&self) -> &[Job] {
        &self.suspended
    }

    /// Registers a freshly forked stage and returns the job's process group.
    ///
    /// The first stage starts the job and leads its process group; later
    /// stages join it. The child makes the same `setpgid` call, so whichever
    /// side runs first wins and the other may see `EACCES` or `ESRCH`.
    pub(crate) fn add_member(&mut self, pid: Pid) -> Pid {
        match &mut self.foreground {
            Some(job) => {
                if let Err(e) = setpgid(pid, job.pgid) {
                    log::debug!("setpgid({pid}, {}) from parent: {e}", job.pgid);
                }
                job.members.push(pid);
                job.pgid
            }
            None => {
                if let Err(e) = setpgid(pid, pid) {
                    log::debug!("setpgid({pid}, {pid}) from parent: {e}");
                }
                self.foreground = Some(Job {
                    pgid: pid,
                    members: vec![pid],
                });
                signals::publish_foreground(Some(pid));
                self.hand_terminal_to(pid);
                log::debug!("job {pid} started");
                pid
            }
        }
    }

    /// Stops tracking the foreground job without waiting for it.
    pub fn untrack(&mut self) -> Option<Job> {
        let job = self.foreground.take();
        if job.is_some() {
            signals::publish_foreground(None);
            self.take_terminal_back();
        }
        job
    }

    /// Blocks until the foreground job finishes or stops, then clears it.
    ///
    /// The leader is waited for first, then the other stages in launch order.
    /// Returns `None` when no job was started.
    pub fn wait_foreground(&mut self) -> Result<Option<JobResult>> {
        let Some(job) = self.foreground.clone() else {
            return Ok(None);
        };

        let mut status = 0;
        for (i, &pid) in job.members.iter().enumerate() {
            match wait_for(pid) {
                Ok(Waited::Finished(code)) => status = code,
                Ok(Waited::Stopped) => {
                    let remaining = Job {
                        pgid: job.pgid,
                        members: job.members[i..].to_vec(),
                    };
                    self.untrack();
                    println!("\nStopped: {}", job.pgid);
                    log::info!("job {} stopped", job.pgid);
                    self.suspended.push(remaining);
                    return Ok(Some(JobResult::Stopped { pid: job.pgid }));
                }
                Err(e) => {
                    self.untrack();
                    return Err(e);
                }
            }
        }

        self.untrack();
        log::debug!("job {} finished with status {status}", job.pgid);
        Ok(Some(JobResult::Completed(status)))
    }

    /// Forgets suspended jobs whose process group no longer exists.
    pub fn prune_suspended(&mut self) {
        self.suspended.retain(|job| {
            let alive = killpg(job.pgid, None).is_ok();
            if !alive {
                log::info!("suspended job {} is gone", job.pgid);
            }
            alive
        });
    }

    /// Hangs up every suspended job. Called once when the shell exits.
    pub fn shutdown(&mut self) {
        for job in self.suspended.drain(..) {
            log::debug!("hanging up suspended job {}", job.pgid);
            let _ = killpg(job.pgid, Signal::SIGHUP);
            let _ = killpg(job.pgid, Signal::SIGCONT);
        }
    }

    fn hand_terminal_to(&self, pgid: Pid) {
        if self.terminal {
            if let Err(e) = tcsetpgrp(std::io::stdin(), pgid) {
                log::debug!("cannot give terminal to {pgid}: {e}");
            }
        }
    }

    fn take_terminal_back(&self) {
        if self.terminal {
            if let Err(e) = tcsetpgrp(std::io::stdin(), getpgrp()) {
                log::warn!("cannot take the terminal back: {e}");
            }
        }
    }
}

/// Waits for one specific child, retrying on interruption.
fn wait_for(pid: Pid) -> Result<Waited> {
    loop {
        match waitpid(pid, Some(WaitPidFlag::WUNTRACED)) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(Waited::Finished(code)),
            Ok(WaitStatus::Signaled(_, sig, _)) => {
                log::debug!("{pid} killed by {sig}");
                return Ok(Waited::Finished(128 + sig as i32));
            }
            Ok(WaitStatus::Stopped(..)) => return Ok(Waited::Stopped),
            Ok(other) => log::debug!("ignoring wait status {other:?}"),
            Err(Errno::EINTR) => continue,
            Err(Errno::ECHILD) => {
                log::warn!("{pid} was reaped elsewhere; assuming success");
                return Ok(Waited::Finished(0));
            }
            Err(e) => return Err(e).with_context(|| format!("waitpid({pid}) failed")),
        }
    }
}
