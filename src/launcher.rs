//! Starting one external pipeline stage as a child process.

use crate::error::ShellError;
use crate::external::Program;
use crate::signal;
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::unistd::{dup2, execve, fork, getpid, setpgid, tcsetpgrp, write, ForkResult, Pid};
use std::os::fd::{AsRawFd, BorrowedFd, IntoRawFd, OwnedFd, RawFd};
use tracing::debug;

/// Exit status of a child whose `execve` failed.
pub const EXIT_EXEC_FAILED: i32 = 126;
/// Status recorded for a stage that was never started.
pub const EXIT_NOT_FOUND: i32 = 127;

/// Where a stage's standard input or output comes from.
///
/// Descriptors are owned: passing one to [`spawn`] moves it, and the shell's
/// copy is closed as soon as the child exists.
#[derive(Debug, Default)]
pub enum StageIo {
    /// Keep the shell's own stream.
    #[default]
    Inherit,
    /// One end of a pipe between two stages.
    Pipe(OwnedFd),
    /// A redirection target.
    File(OwnedFd),
}

impl StageIo {
    /// Makes this the child's descriptor `target`. Runs in the child only.
    fn install(self, target: RawFd) -> nix::Result<()> {
        let fd = match self {
            StageIo::Inherit => return Ok(()),
            StageIo::Pipe(fd) | StageIo::File(fd) => fd,
        };
        if fd.as_raw_fd() == target {
            // Already in place; it only has to survive exec.
            fcntl(fd.into_raw_fd(), FcntlArg::F_SETFD(FdFlag::empty()))?;
            return Ok(());
        }
        dup2(fd.as_raw_fd(), target)?;
        drop(fd);
        Ok(())
    }
}

/// Process-group placement of a new child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessGroup {
    /// Stay in the shell's group (no job control).
    Inherit,
    /// Start a new group led by the child. With `foreground`, the child also
    /// takes that terminal.
    Lead { foreground: Option<RawFd> },
    /// Join the group of an earlier stage.
    Join(Pid),
}

impl ProcessGroup {
    fn target(self) -> Option<Pid> {
        match self {
            ProcessGroup::Inherit => None,
            ProcessGroup::Lead { .. } => Some(Pid::from_raw(0)),
            ProcessGroup::Join(pgid) => Some(pgid),
        }
    }
}

/// Forks and replaces the child with `program`.
///
/// The parent returns the child's pid immediately. `stdin` and `stdout` are
/// consumed either way, so their descriptors are closed in the shell when
/// this returns.
pub fn spawn(
    program: &Program,
    stdin: StageIo,
    stdout: StageIo,
    group: ProcessGroup,
) -> Result<Pid, ShellError> {
    // SAFETY: the child only calls async-signal-safe functions on data that
    // was prepared before the fork, then execs or exits.
    match unsafe { fork() }.map_err(ShellError::Spawn)? {
        ForkResult::Child => exec_child(program, stdin, stdout, group),
        ForkResult::Parent { child } => {
            if let Some(pgid) = group.target() {
                let pgid = if pgid.as_raw() == 0 { child } else { pgid };
                // The child may have exec'd already and the call then fails
                // with EACCES; it set its own group before that.
                match setpgid(child, pgid) {
                    Ok(()) | Err(Errno::EACCES) | Err(Errno::ESRCH) => {}
                    Err(err) => debug!(%child, %err, "setpgid failed in parent"),
                }
            }
            debug!(%child, program = %program.name, ?group, "spawned");
            Ok(child)
        }
    }
}

fn exec_child(program: &Program, stdin: StageIo, stdout: StageIo, group: ProcessGroup) -> ! {
    if let Some(pgid) = group.target() {
        let _ = setpgid(Pid::from_raw(0), pgid);
    }
    if let ProcessGroup::Lead {
        foreground: Some(terminal),
    } = group
    {
        // SAFETY: the terminal descriptor is inherited from the shell and open.
        let _ = tcsetpgrp(unsafe { BorrowedFd::borrow_raw(terminal) }, getpid());
    }
    if group != ProcessGroup::Inherit {
        signal::restore_defaults();
    }
    signal::restore_pipe_default();

    if stdin.install(libc::STDIN_FILENO).is_err() || stdout.install(libc::STDOUT_FILENO).is_err() {
        exit_child(EXIT_EXEC_FAILED);
    }

    let _ = execve(&program.path, &program.argv, &program.envp);
    let _ = write(std::io::stderr(), &program.exec_failure_message);
    exit_child(EXIT_EXEC_FAILED)
}

fn exit_child(code: i32) -> ! {
    // SAFETY: `_exit` skips atexit handlers and stdio flushing, which belong
    // to the shell's image, not to the forked copy.
    unsafe { libc::_exit(code) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;
    use crate::env::Environment;
    use nix::sys::wait::{waitpid, WaitStatus};
    use nix::fcntl::OFlag;
    use nix::unistd::pipe2;
    use std::fs::File;
    use std::io::Read;

    fn prepare(command: Command) -> Program {
        Program::prepare(&command, &Environment::new()).unwrap()
    }

    #[test]
    fn test_spawn_returns_without_waiting() {
        let program = prepare(Command::new("sh").args(&["-c", "exit 3"]));
        let pid = spawn(&program, StageIo::Inherit, StageIo::Inherit, ProcessGroup::Inherit)
            .unwrap();
        assert_eq!(waitpid(pid, None).unwrap(), WaitStatus::Exited(pid, 3));
    }

    #[test]
    fn test_stdout_goes_to_pipe() {
        let (read_end, write_end) = pipe2(OFlag::O_CLOEXEC).unwrap();
        let program = prepare(Command::new("printf").arg("from child"));
        let pid = spawn(
            &program,
            StageIo::Inherit,
            StageIo::Pipe(write_end),
            ProcessGroup::Inherit,
        )
        .unwrap();

        // The shell's write end is gone, so this read sees end-of-file once
        // the child exits.
        let mut output = String::new();
        File::from(read_end).read_to_string(&mut output).unwrap();
        assert_eq!(output, "from child");
        assert_eq!(waitpid(pid, None).unwrap(), WaitStatus::Exited(pid, 0));
    }

    #[test]
    fn test_new_process_group_is_led_by_child() {
        let program = prepare(Command::new("sleep").arg("0.2"));
        let pid = spawn(
            &program,
            StageIo::Inherit,
            StageIo::Inherit,
            ProcessGroup::Lead { foreground: None },
        )
        .unwrap();
        assert_eq!(nix::unistd::getpgid(Some(pid)).unwrap(), pid);
        assert_eq!(waitpid(pid, None).unwrap(), WaitStatus::Exited(pid, 0));
    }

    #[test]
    fn test_exec_failure_exits_with_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("not-executable");
        std::fs::write(&script, "#!/bin/sh\n").unwrap();

        let program = prepare(Command::new(script.to_str().unwrap()));
        let pid = spawn(&program, StageIo::Inherit, StageIo::Inherit, ProcessGroup::Inherit)
            .unwrap();
        assert_eq!(
            waitpid(pid, None).unwrap(),
            WaitStatus::Exited(pid, EXIT_EXEC_FAILED)
        );
    }

    #[test]
    fn test_child_gets_default_sigpipe() {
        // The writer ignores its write errors; only SIGPIPE can end it.
        let (read_end, write_end) = pipe2(OFlag::O_CLOEXEC).unwrap();
        drop(read_end);
        let writer = "while :; do echo y 2>/dev/null; done";
        let program = prepare(Command::new("sh").args(&["-c", writer]));
        let pid = spawn(
            &program,
            StageIo::Inherit,
            StageIo::Pipe(write_end),
            ProcessGroup::Inherit,
        )
        .unwrap();
        assert_eq!(
            waitpid(pid, None).unwrap(),
            WaitStatus::Signaled(pid, nix::sys::signal::Signal::SIGPIPE, false)
        );
    }
}
