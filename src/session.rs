//! Shell session state: who owns the controlling terminal and which terminal
//! modes to put back when the shell takes it again.

use crate::error::ShellError;
use crate::signal;
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::sys::termios::{tcgetattr, tcsetattr, SetArg, Termios};
use nix::unistd::{getpgrp, getpid, setpgid, tcgetpgrp, tcsetpgrp, Pid};
use std::io::{self, IsTerminal};
use std::os::fd::{AsRawFd, BorrowedFd, RawFd};
use tracing::{debug, warn};

/// State captured once at startup and consulted for every pipeline.
#[derive(Debug)]
pub struct Session {
    interactive: bool,
    terminal: RawFd,
    shell_pgid: Pid,
    saved_modes: Option<Termios>,
}

impl Session {
    /// Sets up the session for the current process.
    ///
    /// When `job_control` is on and standard input is a terminal, the shell
    /// waits until its process group is in the foreground (stopping itself
    /// with `SIGTTIN` until then), ignores the job-control signals, puts
    /// itself in its own process group, takes the terminal, and saves the
    /// terminal modes. Otherwise the session is detached: no process groups,
    /// no terminal handoff.
    pub fn init(job_control: bool) -> Result<Session, ShellError> {
        let stdin = io::stdin();
        if !job_control || !stdin.is_terminal() {
            debug!("starting detached session");
            return Ok(Session::detached());
        }
        let terminal = stdin.as_raw_fd();
        let fd = borrow(terminal);

        loop {
            let pgrp = getpgrp();
            let foreground = tcgetpgrp(fd).map_err(ShellError::Terminal)?;
            if foreground == pgrp {
                break;
            }
            debug!(%pgrp, %foreground, "shell is in the background, stopping");
            killpg(pgrp, Signal::SIGTTIN).map_err(ShellError::Terminal)?;
        }

        signal::ignore_job_control();

        // A session leader already leads its own group.
        match setpgid(getpid(), getpid()) {
            Ok(()) | Err(Errno::EPERM) => {}
            Err(err) => return Err(ShellError::Terminal(err)),
        }
        let shell_pgid = getpgrp();
        tcsetpgrp(fd, shell_pgid).map_err(ShellError::Terminal)?;
        let saved_modes = tcgetattr(fd).map_err(ShellError::Terminal)?;
        debug!(%shell_pgid, terminal, "took the controlling terminal");

        Ok(Session {
            interactive: true,
            terminal,
            shell_pgid,
            saved_modes: Some(saved_modes),
        })
    }

    /// A session without job control; pipelines stay in the shell's group.
    pub fn detached() -> Session {
        Session {
            interactive: false,
            terminal: libc::STDIN_FILENO,
            shell_pgid: getpgrp(),
            saved_modes: None,
        }
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    pub fn shell_pgid(&self) -> Pid {
        self.shell_pgid
    }

    /// The terminal descriptor, when the session controls one.
    pub fn terminal(&self) -> Option<RawFd> {
        self.interactive.then_some(self.terminal)
    }

    /// Makes `pgid` the terminal's foreground process group.
    pub fn give_terminal_to(&self, pgid: Pid) -> Result<(), ShellError> {
        if !self.interactive {
            return Ok(());
        }
        debug!(%pgid, "handing terminal to job");
        tcsetpgrp(borrow(self.terminal), pgid).map_err(ShellError::Terminal)
    }

    /// Puts the shell back in the foreground and restores the saved modes.
    pub fn reclaim_terminal(&self) -> Result<(), ShellError> {
        if !self.interactive {
            return Ok(());
        }
        let fd = borrow(self.terminal);
        tcsetpgrp(fd, self.shell_pgid).map_err(ShellError::Terminal)?;
        if let Some(modes) = &self.saved_modes {
            tcsetattr(fd, SetArg::TCSADRAIN, modes).map_err(ShellError::Terminal)?;
        }
        Ok(())
    }

    /// Final step before the shell exits.
    pub fn restore(&self) {
        if let Err(err) = self.reclaim_terminal() {
            warn!(%err, "could not restore the terminal");
        }
    }
}

fn borrow(fd: RawFd) -> BorrowedFd<'static> {
    // SAFETY: the terminal is the process's standard input, which stays open
    // for the life of the process.
    unsafe { BorrowedFd::borrow_raw(fd) }
}
