use nix::sys::signal::{signal, SigHandler, Signal};

/// Signals delivered by the terminal driver for job control.
const JOB_CONTROL_SIGNALS: [Signal; 5] = [
    Signal::SIGINT,
    Signal::SIGQUIT,
    Signal::SIGTSTP,
    Signal::SIGTTIN,
    Signal::SIGTTOU,
];

fn set_all(handler: SigHandler) {
    for sig in JOB_CONTROL_SIGNALS {
        // SAFETY: only SIG_DFL and SIG_IGN are installed, no handler code runs.
        let _ = unsafe { signal(sig, handler) };
    }
}

/// Used by an interactive shell so keyboard signals only hit the foreground job.
pub(crate) fn ignore_job_control() {
    set_all(SigHandler::SigIgn);
}

/// Used in a forked child before `execve`; dispositions set to ignore survive exec.
pub(crate) fn restore_defaults() {
    set_all(SigHandler::SigDfl);
}

/// Used in every forked child before `execve`; the Rust runtime starts the
/// shell with `SIGPIPE` ignored.
pub(crate) fn restore_pipe_default() {
    // SAFETY: SIG_DFL runs no handler code.
    let _ = unsafe { signal(Signal::SIGPIPE, SigHandler::SigDfl) };
}
