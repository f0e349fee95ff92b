//! Running a whole pipeline: pipes between stages, one process group, and
//! collecting every stage's exit status.

use crate::command::{ExitCode, Pipeline, RedirectKind};
use crate::env::Environment;
use crate::error::ShellError;
use crate::external::Program;
use crate::launcher::{self, ProcessGroup, StageIo, EXIT_NOT_FOUND};
use crate::redirect;
use crate::session::Session;
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::signal::{killpg, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{pipe2, Pid};
use std::fmt;
use std::os::fd::OwnedFd;
use tracing::{debug, warn};

/// Completion state of one launched process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Running,
    Exited(i32),
    Signaled(Signal),
    Stopped(Signal),
}

impl ProcessStatus {
    fn from_wait(status: WaitStatus) -> Option<(Pid, ProcessStatus)> {
        match status {
            WaitStatus::Exited(pid, code) => Some((pid, ProcessStatus::Exited(code))),
            WaitStatus::Signaled(pid, sig, _) => Some((pid, ProcessStatus::Signaled(sig))),
            WaitStatus::Stopped(pid, sig) => Some((pid, ProcessStatus::Stopped(sig))),
            WaitStatus::Continued(pid) => Some((pid, ProcessStatus::Running)),
            _ => None,
        }
    }

    pub fn is_finished(self) -> bool {
        matches!(self, ProcessStatus::Exited(_) | ProcessStatus::Signaled(_))
    }

    /// Shell-style exit code: the exit status, or 128 plus the signal number.
    pub fn code(self) -> Option<ExitCode> {
        match self {
            ProcessStatus::Exited(code) => Some(code),
            ProcessStatus::Signaled(sig) => Some(128 + sig as i32),
            ProcessStatus::Running | ProcessStatus::Stopped(_) => None,
        }
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessStatus::Running => write!(f, "running"),
            ProcessStatus::Exited(code) => write!(f, "exited with status {code}"),
            ProcessStatus::Signaled(sig) => write!(f, "terminated by {sig}"),
            ProcessStatus::Stopped(sig) => write!(f, "stopped by {sig}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchedProcess {
    pub pid: Pid,
    pub program: String,
    pub status: ProcessStatus,
}

/// What happened to one stage of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    Launched(LaunchedProcess),
    /// Never started; carries the status reported for it.
    Rejected(ExitCode),
}

impl Stage {
    pub fn code(&self) -> Option<ExitCode> {
        match self {
            Stage::Launched(process) => process.status.code(),
            Stage::Rejected(code) => Some(*code),
        }
    }
}

/// The processes of one pipeline, in stage order.
#[derive(Debug)]
pub struct Job {
    pgid: Option<Pid>,
    job_control: bool,
    stages: Vec<Stage>,
    /// Stage-level failures that did not stop the rest of the pipeline.
    errors: Vec<ShellError>,
    /// The error that stopped the launch or the wait, if any.
    failure: Option<ShellError>,
    stopped: bool,
}

impl Job {
    fn new(size_hint: usize, job_control: bool) -> Job {
        Job {
            pgid: None,
            job_control,
            stages: Vec::with_capacity(size_hint),
            errors: Vec::new(),
            failure: None,
            stopped: false,
        }
    }

    pub fn pgid(&self) -> Option<Pid> {
        self.pgid
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn processes(&self) -> impl Iterator<Item = &LaunchedProcess> {
        self.stages.iter().filter_map(|stage| match stage {
            Stage::Launched(process) => Some(process),
            Stage::Rejected(_) => None,
        })
    }

    /// Stage-level failures, such as a program that was not found.
    pub fn errors(&self) -> &[ShellError] {
        &self.errors
    }

    pub fn take_errors(&mut self) -> Vec<ShellError> {
        std::mem::take(&mut self.errors)
    }

    /// The error that aborted the pipeline. Stages launched before it were
    /// still reaped, and [`Job::errors`] still holds the earlier stage failures.
    pub fn failure(&self) -> Option<&ShellError> {
        self.failure.as_ref()
    }

    pub fn take_failure(&mut self) -> Option<ShellError> {
        self.failure.take()
    }

    /// Whether a stage was stopped and the job was terminated because of it.
    pub fn was_stopped(&self) -> bool {
        self.stopped
    }

    /// The pipeline's outcome: the last stage's exit code.
    pub fn status(&self) -> ExitCode {
        self.stages.last().and_then(Stage::code).unwrap_or(EXIT_NOT_FOUND)
    }

    fn group_for_next(&self, session: &Session) -> ProcessGroup {
        if !self.job_control {
            return ProcessGroup::Inherit;
        }
        match self.pgid {
            None => ProcessGroup::Lead {
                foreground: session.terminal(),
            },
            Some(pgid) => ProcessGroup::Join(pgid),
        }
    }

    fn reject(&mut self, err: ShellError) {
        debug!(%err, "stage rejected");
        self.errors.push(err);
        self.stages.push(Stage::Rejected(EXIT_NOT_FOUND));
    }

    fn launch(
        &mut self,
        program: &Program,
        stdin: StageIo,
        stdout: StageIo,
        session: &Session,
    ) -> Result<(), ShellError> {
        let pid = launcher::spawn(program, stdin, stdout, self.group_for_next(session))?;
        if self.job_control && self.pgid.is_none() {
            self.pgid = Some(pid);
        }
        self.stages.push(Stage::Launched(LaunchedProcess {
            pid,
            program: program.name.clone(),
            status: ProcessStatus::Running,
        }));
        Ok(())
    }

    /// Starts every stage, left to right, without waiting on any of them.
    ///
    /// The pipe feeding stage `i + 1` is created right before stage `i` is
    /// launched. Each end is moved into the launch that uses it, so the
    /// shell holds no pipe descriptor once both neighbours are running.
    fn launch_all(
        &mut self,
        pipeline: &Pipeline,
        env: &Environment,
        session: &Session,
    ) -> Result<(), ShellError> {
        let commands = pipeline.commands();
        let mut pipe_stdin: Option<OwnedFd> = None;

        for (i, command) in commands.iter().enumerate() {
            let is_last = i + 1 == commands.len();
            let (pipe_read, pipe_write) = if is_last {
                (None, None)
            } else {
                let (read, write) = pipe2(OFlag::O_CLOEXEC).map_err(ShellError::Pipe)?;
                debug!(stage = i, "created pipe");
                (Some(read), Some(write))
            };

            let stdin = match command.redirect(RedirectKind::Input) {
                Some(path) => StageIo::File(redirect::open(RedirectKind::Input, path)?),
                None => pipe_stdin.take().map(StageIo::Pipe).unwrap_or_default(),
            };
            let stdout = match command.redirect(RedirectKind::Output) {
                Some(path) => StageIo::File(redirect::open(RedirectKind::Output, path)?),
                None => pipe_write.map(StageIo::Pipe).unwrap_or_default(),
            };

            match Program::prepare(command, env) {
                Ok(program) => self.launch(&program, stdin, stdout, session)?,
                // Dropping this stage's descriptors gives its neighbours
                // end-of-file and a closed pipe.
                Err(err) => self.reject(err),
            }

            pipe_stdin = pipe_read;
        }
        Ok(())
    }

    fn record(&mut self, pid: Pid, status: ProcessStatus) {
        for stage in &mut self.stages {
            if let Stage::Launched(process) = stage {
                if process.pid == pid {
                    debug!(%pid, program = %process.program, %status, "stage changed state");
                    process.status = status;
                    return;
                }
            }
        }
        warn!(%pid, "wait returned an unknown child");
    }

    fn next_running(&self) -> Option<Pid> {
        self.processes()
            .find(|p| !p.status.is_finished())
            .map(|p| p.pid)
    }

    /// Terminates a job that a stage stopped; there is no job table to park it in.
    fn terminate_stopped(&mut self) {
        let Some(pgid) = self.pgid else {
            return;
        };
        if !self.stopped {
            warn!(%pgid, "pipeline stopped, terminating it");
            self.stopped = true;
        }
        let _ = killpg(pgid, Signal::SIGTERM);
        let _ = killpg(pgid, Signal::SIGCONT);
    }

    /// Waits until every launched stage has terminated, in whatever order
    /// they finish.
    fn wait_all(&mut self) -> Result<(), ShellError> {
        while let Some(pid) = self.next_running() {
            let result = match self.pgid {
                Some(pgid) => waitpid(Pid::from_raw(-pgid.as_raw()), Some(WaitPidFlag::WUNTRACED)),
                None => waitpid(pid, None),
            };
            match result {
                Ok(status) => {
                    if let Some((pid, status)) = ProcessStatus::from_wait(status) {
                        self.record(pid, status);
                        if let ProcessStatus::Stopped(_) = status {
                            self.terminate_stopped();
                        }
                    }
                }
                Err(Errno::EINTR) => continue,
                Err(Errno::ECHILD) => {
                    warn!("children vanished before they were reaped");
                    break;
                }
                Err(err) => return Err(ShellError::Wait(err)),
            }
        }
        Ok(())
    }
}

/// Runs `pipeline` to completion.
///
/// All stages are launched before any is waited on, so they run
/// concurrently. In an interactive session the job gets its own process
/// group and the terminal for as long as it runs. A failure to create a pipe,
/// open a redirection, or fork stops further launches, but the stages
/// already running are still reaped. That error is kept as the job's
/// [`failure`](Job::failure), next to the stage errors collected before it.
pub fn run(pipeline: &Pipeline, env: &Environment, session: &Session) -> Job {
    let mut job = Job::new(pipeline.len(), session.is_interactive());

    let launched = job.launch_all(pipeline, env, session);
    if let Some(pgid) = job.pgid {
        if let Err(err) = session.give_terminal_to(pgid) {
            warn!(%pgid, %err, "job runs without the terminal");
        }
    }
    let waited = job.wait_all();
    let reclaimed = session.reclaim_terminal();

    job.failure = launched.and(waited).and(reclaimed).err();
    match &job.failure {
        Some(err) => debug!(%err, "pipeline aborted"),
        None => debug!(status = job.status(), "pipeline finished"),
    }
    job
}
