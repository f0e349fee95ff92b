use crate::parser::Limits;

/// Line length accepted from the read loop, in bytes.
pub const DEFAULT_MAX_LINE_LEN: usize = 4096;
/// Commands accepted in one pipeline.
pub const DEFAULT_MAX_STAGES: usize = 64;
/// Words accepted in one command, program name included.
pub const DEFAULT_MAX_ARGS: usize = 256;

/// Shell-wide settings, fixed for the lifetime of an [`Interpreter`](crate::Interpreter).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub max_line_len: usize,
    pub max_stages: usize,
    pub max_args: usize,
    /// Take the terminal and run pipelines in their own process groups when
    /// standard input is a terminal.
    pub job_control: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_line_len: DEFAULT_MAX_LINE_LEN,
            max_stages: DEFAULT_MAX_STAGES,
            max_args: DEFAULT_MAX_ARGS,
            job_control: true,
        }
    }
}

impl Config {
    pub fn with_job_control(mut self, enabled: bool) -> Self {
        self.job_control = enabled;
        self
    }

    pub fn limits(&self) -> Limits {
        Limits {
            max_line_len: self.max_line_len,
            max_stages: self.max_stages,
            max_args: self.max_args,
        }
    }
}
