use crate::builtin::Dispatcher;
use crate::command::{ExitCode, Pipeline};
use crate::config::Config;
use crate::env::Environment;
use crate::error::ShellError;
use crate::job::{self, Stage};
use crate::lexer::split_into_tokens;
use crate::parser::parse_pipeline;
use crate::session::Session;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::io::{self, BufRead, IsTerminal, Write};
use tracing::{debug, warn};

/// The read/dispatch loop of the shell.
///
/// Each line is tokenized, parsed into a [`Pipeline`] and either handed to a
/// builtin (single-stage pipelines only) or run as a job of external
/// programs. Errors never leave the loop: they are printed and the next line
/// is read.
///
/// The terminal is given back to the shell's state at startup when the
/// interpreter is dropped.
pub struct Interpreter {
    env: Environment,
    session: Session,
    config: Config,
    builtins: Dispatcher,
    prompting: bool,
    line_num: usize,
}

impl Interpreter {
    /// Creates an interpreter for the current process, taking the terminal
    /// if the session is interactive and `config.job_control` is on.
    pub fn new(config: Config) -> Result<Self, ShellError> {
        let session = Session::init(config.job_control)?;
        let mut sh = Self::with_session(config, session);
        sh.prompting = io::stdin().is_terminal();
        Ok(sh)
    }

    /// Creates an interpreter that uses an existing `session`. It never prompts.
    pub fn with_session(config: Config, session: Session) -> Self {
        Self {
            env: Environment::new(),
            session,
            config,
            builtins: Dispatcher::default(),
            prompting: false,
            line_num: 0,
        }
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn env_mut(&mut self) -> &mut Environment {
        &mut self.env
    }

    pub fn should_exit(&self) -> bool {
        self.env.should_exit
    }

    /// Executes one input line.
    ///
    /// Returns `Ok(None)` for a blank line, otherwise the status of the
    /// builtin or of the pipeline's last stage. Builtin output, and the
    /// report of a program that failed, are written to `stdout`. Errors of
    /// single stages (a program that was not found) are printed to stderr
    /// and do not fail the line.
    pub fn execute_line(
        &mut self,
        line: &str,
        stdout: &mut dyn Write,
    ) -> Result<Option<ExitCode>, ShellError> {
        let limits = self.config.limits();
        limits.check_line(line)?;
        let tokens = split_into_tokens(line)?;
        if tokens.is_empty() {
            return Ok(None);
        }
        let pipeline = parse_pipeline(&tokens, &limits)?;

        if let Some(name) = self.builtin_name(&pipeline) {
            if !pipeline.is_single() {
                return Err(ShellError::BuiltinInPipeline { name });
            }
            return Ok(Some(self.run_builtin(&pipeline, stdout)));
        }

        let mut job = job::run(&pipeline, &self.env, &self.session);
        for err in job.take_errors() {
            eprintln!("ish: {err}");
        }
        if let Some(err) = job.take_failure() {
            return Err(err);
        }
        if job.was_stopped() {
            report(stdout, format_args!("ish: job stopped and terminated"));
        }
        let status = job.status();
        if let Some(Stage::Launched(last)) = job.stages().last() {
            if status != 0 {
                report(stdout, format_args!("ish: {}: {}", last.program, last.status));
            }
        }
        Ok(Some(status))
    }

    /// Executes `line` and prints any error, as the loop does for each line.
    pub fn run_command(&mut self, line: &str) -> Option<ExitCode> {
        let mut stdout = io::stdout();
        let result = self.execute_line(line, &mut stdout);
        if let Err(err) = stdout.flush() {
            warn!(%err, "failed to flush stdout");
        }
        match result {
            Ok(code) => code,
            Err(err) => {
                debug!(kind = ?err.kind(), "line failed");
                eprintln!("ish: {err}");
                None
            }
        }
    }

    /// Reads and executes lines until `exit` or end of input.
    ///
    /// With a terminal on stdin, lines are read with an editor and each one
    /// is prompted for with the line counter. Otherwise lines are read from
    /// stdin as they come, without a prompt.
    pub fn repl(&mut self) -> anyhow::Result<()> {
        if self.prompting {
            self.repl_interactive()
        } else {
            self.repl_script();
            Ok(())
        }
    }

    fn repl_interactive(&mut self) -> anyhow::Result<()> {
        let mut editor = DefaultEditor::new()?;
        while !self.should_exit() {
            let prompt = format!("{}: ", self.line_num);
            match editor.readline(&prompt) {
                Ok(line) => {
                    self.line_num += 1;
                    if !line.trim().is_empty() {
                        if let Err(err) = editor.add_history_entry(line.as_str()) {
                            debug!(%err, "history entry dropped");
                        }
                    }
                    self.run_command(&line);
                }
                Err(ReadlineError::Interrupted) => {
                    self.line_num += 1;
                }
                Err(ReadlineError::Eof) => break,
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    fn repl_script(&mut self) {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    warn!(%err, "stopped reading input");
                    break;
                }
            };
            self.line_num += 1;
            self.run_command(&line);
            if self.should_exit() {
                break;
            }
        }
    }

    fn builtin_name(&self, pipeline: &Pipeline) -> Option<String> {
        pipeline
            .commands()
            .iter()
            .filter_map(|cmd| cmd.program())
            .find(|name| self.builtins.is_builtin(name))
            .map(str::to_owned)
    }

    fn run_builtin(&mut self, pipeline: &Pipeline, stdout: &mut dyn Write) -> ExitCode {
        let command = pipeline.first();
        if command.has_redirects() {
            warn!(program = ?command.program(), "redirections are ignored for builtins");
        }
        match self.builtins.dispatch(&command.argv, stdout, &mut self.env) {
            Some(Ok(code)) => code,
            Some(Err(err)) => {
                warn!(%err, "builtin could not write its output");
                1
            }
            None => 1,
        }
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        self.session.restore();
    }
}

fn report(stdout: &mut dyn Write, message: std::fmt::Arguments<'_>) {
    if let Err(err) = writeln!(stdout, "{message}") {
        warn!(%err, "failed to write report");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::lock_current_dir;
    use std::env;
    use std::fs;

    fn shell() -> Interpreter {
        Interpreter::with_session(Config::default(), Session::detached())
    }

    fn exec(sh: &mut Interpreter, line: &str) -> (Result<Option<ExitCode>, ShellError>, String) {
        let mut out = Vec::new();
        let result = sh.execute_line(line, &mut out);
        (result, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_blank_line_does_nothing() {
        let mut sh = shell();
        for line in ["", "   ", "\t\n"] {
            let (result, out) = exec(&mut sh, line);
            assert_eq!(result.unwrap(), None);
            assert!(out.is_empty());
        }
    }

    #[test]
    fn test_parse_error_is_returned() {
        let mut sh = shell();
        let (result, _) = exec(&mut sh, "cat <");
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Parse);

        let (result, _) = exec(&mut sh, "echo 'open");
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Parse);
    }

    #[test]
    fn test_overlong_line_is_rejected() {
        let mut sh = shell();
        let line = format!("true {}", "x".repeat(Config::default().max_line_len));
        let (result, _) = exec(&mut sh, &line);
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Parse);
    }

    #[test]
    fn test_builtin_in_pipeline_is_rejected() {
        let mut sh = shell();
        let (result, out) = exec(&mut sh, "pwd | cat");
        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Builtin);
        assert!(matches!(err, ShellError::BuiltinInPipeline { ref name } if name == "pwd"));
        assert!(out.is_empty());

        let (result, _) = exec(&mut sh, "true | cd /");
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Builtin);
    }

    #[test]
    fn test_builtin_ignores_redirections() {
        let _lock = lock_current_dir();
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("never");
        let mut sh = shell();

        let (result, out) = exec(&mut sh, &format!("pwd > '{}'", target.display()));
        assert_eq!(result.unwrap(), Some(0));
        assert_eq!(out, format!("{}\n", sh.env().current_dir.display()));
        assert!(!target.exists());
    }

    #[test]
    fn test_exit_sets_flag() {
        let mut sh = shell();
        assert!(!sh.should_exit());
        let (result, _) = exec(&mut sh, "exit");
        assert_eq!(result.unwrap(), Some(0));
        assert!(sh.should_exit());
    }

    #[test]
    fn test_failed_program_is_reported() {
        let mut sh = shell();
        let (result, out) = exec(&mut sh, "sh -c 'exit 4'");
        assert_eq!(result.unwrap(), Some(4));
        assert_eq!(out, "ish: sh: exited with status 4\n");

        let (result, out) = exec(&mut sh, "true");
        assert_eq!(result.unwrap(), Some(0));
        assert!(out.is_empty());
    }

    #[test]
    fn test_failed_redirect_fails_line() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("missing").join("out");
        let mut sh = shell();
        let line = format!("definitely-not-a-program-ish | cat > '{}'", bad.display());
        let (result, _) = exec(&mut sh, &line);
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Resource);
    }

    #[test]
    fn test_missing_program_does_not_fail_line() {
        let mut sh = shell();
        let (result, out) = exec(&mut sh, "definitely-not-a-program-ish");
        assert_eq!(result.unwrap(), Some(127));
        assert!(out.is_empty());
    }

    #[test]
    fn test_cd_is_seen_by_later_programs() {
        let _lock = lock_current_dir();
        let orig = env::current_dir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let canonical = fs::canonicalize(dir.path()).unwrap();
        let out_file = canonical.join("where");
        let mut sh = shell();

        let (cd, _) = exec(&mut sh, &format!("cd '{}'", canonical.display()));
        let (pwd, _) = exec(&mut sh, "sh -c pwd > where");
        env::set_current_dir(&orig).unwrap();

        assert_eq!(cd.unwrap(), Some(0));
        assert_eq!(pwd.unwrap(), Some(0));
        assert_eq!(fs::read_to_string(&out_file).unwrap(), format!("{}\n", canonical.display()));
    }

    #[test]
    fn test_failed_cd_keeps_directory() {
        let _lock = lock_current_dir();
        let orig = env::current_dir().unwrap();
        let mut sh = shell();

        let (result, out) = exec(&mut sh, "cd /definitely/not/a/dir/ish");
        assert_eq!(result.unwrap(), Some(1));
        assert!(out.contains("failed to change directory"));
        assert_eq!(env::current_dir().unwrap(), orig);
    }

    #[test]
    fn test_children_see_shell_variables() {
        let dir = tempfile::tempdir().unwrap();
        let out_file = dir.path().join("var");
        let mut sh = shell();
        sh.env_mut().set_var("ISH_TEST_VALUE", "from the shell");

        let line = format!(r#"sh -c 'printf "%s" "$ISH_TEST_VALUE"' > '{}'"#, out_file.display());
        let (result, _) = exec(&mut sh, &line);
        assert_eq!(result.unwrap(), Some(0));
        assert_eq!(fs::read_to_string(&out_file).unwrap(), "from the shell");
    }
}
