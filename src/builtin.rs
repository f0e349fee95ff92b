use crate::command::ExitCode;
use crate::env::Environment;
use anyhow::{Context, Result};
use argh::{EarlyExit, FromArgs};
use std::env;
use std::fs;
use std::io::Write;
use std::marker::PhantomData;
use std::path::PathBuf;

/// Built-in commands known to the shell at compile time.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and executed directly
/// in the shell process, against the shell's own working directory and standard
/// output. They never fork and never take part in a pipeline.
pub(crate) trait BuiltinCommand: Sized + FromArgs {
    /// Canonical name of the command, e.g. "cd".
    fn name() -> &'static str;

    /// One-line description shown by `?`.
    fn about() -> &'static str;

    /// Return value should follow shell conventions: 0 for success, non-zero for error.
    fn execute(self, stdout: &mut dyn Write, ctx: &mut BuiltinContext<'_>) -> Result<ExitCode>;
}

/// Shell state a builtin may read or change.
pub(crate) struct BuiltinContext<'a> {
    pub env: &'a mut Environment,
    pub builtins: &'a Dispatcher,
}

/// Object-safe form of a parsed builtin, ready to run.
pub(crate) trait ExecutableBuiltin {
    fn execute(
        self: Box<Self>,
        stdout: &mut dyn Write,
        ctx: &mut BuiltinContext<'_>,
    ) -> Result<ExitCode>;
}

impl<T: BuiltinCommand> ExecutableBuiltin for T {
    fn execute(
        self: Box<Self>,
        stdout: &mut dyn Write,
        ctx: &mut BuiltinContext<'_>,
    ) -> Result<ExitCode> {
        match <T as BuiltinCommand>::execute(*self, stdout, ctx) {
            Ok(x) => Ok(x),
            Err(e) => {
                writeln!(stdout, "{e:#}")?;
                Ok(1)
            }
        }
    }
}

struct InvalidArgs {
    output: String,
    is_error: bool,
}

impl ExecutableBuiltin for InvalidArgs {
    fn execute(
        self: Box<Self>,
        stdout: &mut dyn Write,
        _ctx: &mut BuiltinContext<'_>,
    ) -> Result<ExitCode> {
        writeln!(stdout, "{}", self.output)?;
        Ok(if self.is_error { 1 } else { 0 })
    }
}

/// Factory that recognizes one builtin by name and parses its arguments.
pub(crate) trait BuiltinFactory {
    fn name(&self) -> &'static str;

    fn about(&self) -> &'static str;

    /// Returns `None` when `name` is not this builtin.
    fn try_create(&self, name: &str, args: &[&str]) -> Option<Box<dyn ExecutableBuiltin>>;
}

pub(crate) struct Factory<T> {
    _phantom: PhantomData<T>,
}

impl<T> Default for Factory<T> {
    fn default() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<T: BuiltinCommand + 'static> BuiltinFactory for Factory<T> {
    fn name(&self) -> &'static str {
        T::name()
    }

    fn about(&self) -> &'static str {
        T::about()
    }

    fn try_create(&self, name: &str, args: &[&str]) -> Option<Box<dyn ExecutableBuiltin>> {
        if name == T::name() {
            Some(match T::from_args(&[name], args) {
                Ok(cmd) => Box::new(cmd),
                Err(EarlyExit { output, status }) => Box::new(InvalidArgs {
                    output,
                    is_error: status.is_err(),
                }),
            })
        } else {
            None
        }
    }
}

/// The table of builtins, looked up by a line's leading word.
pub(crate) struct Dispatcher {
    builtins: Vec<Box<dyn BuiltinFactory>>,
}

impl Dispatcher {
    pub fn is_builtin(&self, name: &str) -> bool {
        self.builtins.iter().any(|b| b.name() == name)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&'static str, &'static str)> + '_ {
        self.builtins.iter().map(|b| (b.name(), b.about()))
    }

    /// Runs `argv` as a builtin, or returns `None` if `argv[0]` is not one.
    pub fn dispatch(
        &self,
        argv: &[String],
        stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Option<Result<ExitCode>> {
        let (name, args) = argv.split_first()?;
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let cmd = self.builtins.iter().find_map(|b| b.try_create(name, &args))?;
        let mut ctx = BuiltinContext {
            env,
            builtins: self,
        };
        Some(cmd.execute(stdout, &mut ctx))
    }
}

impl Default for Dispatcher {
    /// `?`, `exit`, `pwd` and `cd`.
    fn default() -> Self {
        Self {
            builtins: vec![
                Box::new(Factory::<Help>::default()),
                Box::new(Factory::<Exit>::default()),
                Box::new(Factory::<Pwd>::default()),
                Box::new(Factory::<Cd>::default()),
            ],
        }
    }
}

#[derive(FromArgs)]
/// Show the available builtin commands.
pub struct Help {}

impl BuiltinCommand for Help {
    fn name() -> &'static str {
        "?"
    }

    fn about() -> &'static str {
        "show this help menu"
    }

    fn execute(self, stdout: &mut dyn Write, ctx: &mut BuiltinContext<'_>) -> Result<ExitCode> {
        for (name, about) in ctx.builtins.entries() {
            writeln!(stdout, "{name} - {about}")?;
        }
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Exit the shell.
pub struct Exit {
    #[argh(positional, greedy, arg_name = "args")]
    /// ignored; the shell always exits with status 0
    pub _args: Vec<String>,
}

impl BuiltinCommand for Exit {
    fn name() -> &'static str {
        "exit"
    }

    fn about() -> &'static str {
        "exit the command shell"
    }

    fn execute(self, _stdout: &mut dyn Write, ctx: &mut BuiltinContext<'_>) -> Result<ExitCode> {
        ctx.env.should_exit = true;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Print the current working directory to standard output.
pub struct Pwd {}

impl BuiltinCommand for Pwd {
    fn name() -> &'static str {
        "pwd"
    }

    fn about() -> &'static str {
        "print current directory"
    }

    fn execute(self, stdout: &mut dyn Write, ctx: &mut BuiltinContext<'_>) -> Result<ExitCode> {
        writeln!(stdout, "{}", ctx.env.current_dir.to_string_lossy())?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Change the current working directory.
/// If no target is provided, changes to the directory specified by the HOME environment variable.
pub struct Cd {
    #[argh(positional)]
    /// directory to switch to; absolute or relative to the current directory.
    /// Defaults to $HOME when omitted.
    pub target: Option<String>,
}

impl BuiltinCommand for Cd {
    fn name() -> &'static str {
        "cd"
    }

    fn about() -> &'static str {
        "change working directory"
    }

    fn execute(self, _stdout: &mut dyn Write, ctx: &mut BuiltinContext<'_>) -> Result<ExitCode> {
        let env = &mut *ctx.env;
        let target = match &self.target {
            Some(t) if !t.is_empty() => PathBuf::from(t),
            _ => match env.get_var("HOME") {
                Some(home) => PathBuf::from(home),
                None => return Err(anyhow::anyhow!("cd: no target and HOME not set")),
            },
        };

        let new_dir = if target.is_absolute() {
            target
        } else {
            env.current_dir.join(target)
        };

        let canonical = fs::canonicalize(&new_dir)
            .with_context(|| format!("cd: failed to change directory to {}", new_dir.display()))?;

        env::set_current_dir(&canonical)
            .with_context(|| format!("cd: failed to change directory to {}", canonical.display()))?;
        env.current_dir = canonical;
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::lock_current_dir;
    use std::collections::HashMap;
    use std::env as stdenv;

    fn test_env() -> Environment {
        Environment {
            vars: HashMap::new(),
            current_dir: stdenv::current_dir().unwrap(),
            should_exit: false,
        }
    }

    fn run(env: &mut Environment, line: &[&str]) -> (Option<ExitCode>, String) {
        let argv: Vec<String> = line.iter().map(|s| s.to_string()).collect();
        let mut out = Vec::new();
        let code = Dispatcher::default()
            .dispatch(&argv, &mut out, env)
            .map(|r| r.unwrap());
        (code, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_pwd_prints_current_dir() {
        let _lock = lock_current_dir();
        let mut env = test_env();
        let expected = format!("{}\n", env.current_dir.to_string_lossy());

        let (code, out) = run(&mut env, &["pwd"]);

        assert_eq!(code, Some(0));
        assert_eq!(out, expected);
    }

    #[test]
    fn test_cd_to_absolute_path() {
        let _lock = lock_current_dir();
        let temp = tempfile::tempdir().expect("failed to create temp dir");
        let canonical_temp = fs::canonicalize(temp.path()).expect("canonicalize failed");

        // save original cwd to restore later
        let orig = stdenv::current_dir().unwrap();
        let mut env = test_env();

        let (code, _) = run(&mut env, &["cd", canonical_temp.to_str().unwrap()]);
        let new_cwd = stdenv::current_dir().unwrap();
        stdenv::set_current_dir(&orig).expect("failed to restore cwd");

        assert_eq!(code, Some(0));
        assert_eq!(fs::canonicalize(new_cwd).unwrap(), canonical_temp);
        assert_eq!(env.current_dir, canonical_temp);
    }

    #[test]
    fn test_cd_relative_then_pwd() {
        let _lock = lock_current_dir();
        let temp = tempfile::tempdir().unwrap();
        fs::create_dir(temp.path().join("sub")).unwrap();
        let canonical_sub = fs::canonicalize(temp.path().join("sub")).unwrap();

        let orig = stdenv::current_dir().unwrap();
        let mut env = test_env();
        env.current_dir = fs::canonicalize(temp.path()).unwrap();

        let (code, _) = run(&mut env, &["cd", "sub"]);
        let (_, out) = run(&mut env, &["pwd"]);
        stdenv::set_current_dir(&orig).expect("failed to restore cwd");

        assert_eq!(code, Some(0));
        assert_eq!(out, format!("{}\n", canonical_sub.display()));
    }

    #[test]
    fn test_cd_to_home_when_none() {
        let _lock = lock_current_dir();
        let temp = tempfile::tempdir().expect("failed to create temp dir");
        let canonical_temp = fs::canonicalize(temp.path()).expect("canonicalize failed");

        let orig = stdenv::current_dir().unwrap();
        let mut env = test_env();
        env.set_var("HOME", canonical_temp.to_string_lossy().to_string());

        let (code, _) = run(&mut env, &["cd"]);
        let new_cwd = stdenv::current_dir().unwrap();
        stdenv::set_current_dir(&orig).expect("failed to restore cwd");

        assert_eq!(code, Some(0));
        assert_eq!(fs::canonicalize(new_cwd).unwrap(), canonical_temp);
        assert_eq!(env.current_dir, canonical_temp);
    }

    #[test]
    fn test_cd_nonexistent_path_reports_failure() {
        let _lock = lock_current_dir();
        let orig = stdenv::current_dir().unwrap();
        let mut env = test_env();

        let name = format!("nonexistent_dir_for_ish_test_{}", std::process::id());
        let (code, out) = run(&mut env, &["cd", &name]);

        assert_eq!(code, Some(1));
        assert!(out.contains("failed to change directory"), "got {out:?}");
        assert_eq!(stdenv::current_dir().unwrap(), orig);
        assert_eq!(env.current_dir, orig);
    }

    #[test]
    fn test_cd_without_home_fails() {
        let mut env = test_env();
        let (code, out) = run(&mut env, &["cd"]);
        assert_eq!(code, Some(1));
        assert!(out.contains("HOME not set"));
    }

    #[test]
    fn test_exit_sets_flag() {
        let mut env = test_env();
        let (code, _) = run(&mut env, &["exit"]);
        assert_eq!(code, Some(0));
        assert!(env.should_exit);
    }

    #[test]
    fn test_exit_ignores_arguments() {
        let mut env = test_env();
        let (code, out) = run(&mut env, &["exit", "3", "now"]);
        assert_eq!(code, Some(0));
        assert!(out.is_empty());
        assert!(env.should_exit);
    }

    #[test]
    fn test_help_lists_every_builtin() {
        let mut env = test_env();
        let (code, out) = run(&mut env, &["?"]);
        assert_eq!(code, Some(0));
        for name in ["?", "exit", "pwd", "cd"] {
            assert!(
                out.lines().any(|l| l.starts_with(&format!("{name} - "))),
                "{name} missing from {out:?}"
            );
        }
    }

    #[test]
    fn test_invalid_args_print_usage() {
        let mut env = test_env();
        let (code, out) = run(&mut env, &["pwd", "--bogus"]);
        assert_eq!(code, Some(1));
        assert!(!out.is_empty());

        let (code, out) = run(&mut env, &["cd", "--help"]);
        assert_eq!(code, Some(0));
        assert!(out.contains("Usage"));
    }

    #[test]
    fn test_unknown_name_is_not_dispatched() {
        let mut env = test_env();
        let dispatcher = Dispatcher::default();
        assert!(!dispatcher.is_builtin("ls"));
        assert!(dispatcher.is_builtin("cd"));
        let (code, out) = run(&mut env, &["ls", "-la"]);
        assert_eq!(code, None);
        assert!(out.is_empty());
        assert!(Dispatcher::default().dispatch(&[], &mut Vec::new(), &mut env).is_none());
    }
}
