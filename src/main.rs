use argh::FromArgs;
use ish::{Config, Interpreter};
use tracing_subscriber::EnvFilter;

#[derive(FromArgs)]
/// A small interactive shell with pipelines, redirections and job control.
struct Args {
    #[argh(option, short = 'c')]
    /// execute this line and exit
    command: Option<String>,

    #[argh(switch)]
    /// keep children in the shell's process group and never hand off the terminal
    no_job_control: bool,

    #[argh(switch, short = 'v')]
    /// log at debug level (overridden by ISH_LOG)
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("ISH_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let args: Args = argh::from_env();
    init_logging(args.verbose);

    let config = Config::default().with_job_control(!args.no_job_control);
    let mut sh = Interpreter::new(config)?;
    match args.command {
        Some(line) => {
            sh.run_command(&line);
        }
        None => sh.repl()?,
    }
    Ok(())
}
