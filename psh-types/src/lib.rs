use libc::{STDERR_FILENO, STDIN_FILENO, STDOUT_FILENO};
use std::fmt;
use std::os::unix::io::RawFd;
use thiserror::Error;

/// Which direction a redirection points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectKind {
    Input,
    Output,
}

impl fmt::Display for RedirectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RedirectKind::Input => f.write_str("input"),
            RedirectKind::Output => f.write_str("output"),
        }
    }
}

/// Everything the shell reports to the user as `Error: <message>`.
///
/// All of these are recoverable: the command is discarded and the main loop
/// keeps running. The one exception is `MonitorLost`, which means the child
/// monitor thread is gone and no further completions can ever be observed.
#[derive(Error, Debug)]
pub enum ShellError {
    #[error("invalid command line")]
    InvalidSyntax,

    #[error("no redirection target")]
    MissingRedirectTarget,

    #[error("cannot open redirection file: {0}")]
    RedirectOpenFailed(#[source] std::io::Error),

    #[error("mislocated {0} redirection")]
    ConflictingRedirection(RedirectKind),

    #[error("cannot spawn process: {0}")]
    SpawnFailed(nix::Error),

    #[error("cannot cd into directory")]
    NoSuchDirectory,

    #[error("invalid argument")]
    InvalidArgument,

    #[error("active jobs still running")]
    ActiveJobs,

    #[error("child monitor terminated")]
    MonitorLost,
}

impl ShellError {
    /// `true` for conditions the shell cannot continue after.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ShellError::MonitorLost)
    }
}

/// Exit state a builtin reports back to the dispatcher.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ExitStatus {
    ExitedWith(i32),
}

/// The descriptors a launched stage inherits when neither a pipe nor an
/// explicit redirection overrides them.
#[derive(Debug, Clone)]
pub struct Context {
    pub infile: RawFd,
    pub outfile: RawFd,
    pub errfile: RawFd,
}

impl Context {
    pub fn new() -> Self {
        Context {
            infile: STDIN_FILENO,
            outfile: STDOUT_FILENO,
            errfile: STDERR_FILENO,
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Context::new()
    }
}
