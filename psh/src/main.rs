mod history;
mod input;
mod parser;
mod process;
mod prompt;
mod reaper;
mod redirect;
mod repl;
mod shell;

use clap::Parser;
use nix::unistd::isatty;
use psh_types::Context;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "psh",
    about = "A small interactive shell with asynchronous job tracking"
)]
struct Cli {
    /// Run a single command line and exit
    #[arg(short = 'c', long = "command")]
    command: Option<String>,
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let events = match reaper::start() {
        Ok(events) => events,
        Err(err) => {
            eprintln!("psh: {err:#}");
            return ExitCode::FAILURE;
        }
    };

    let interactive = isatty(libc::STDIN_FILENO).unwrap_or(false);
    let ctx = Context::new();
    let mut shell = shell::Shell::new(events);
    shell.set_signals();

    let result = if let Some(command) = cli.command.as_deref() {
        repl::run_once(&ctx, &mut shell, command)
    } else if interactive {
        repl::run_interactive(&ctx, &mut shell)
    } else {
        repl::run_pipe_mode(&ctx, &mut shell)
    };

    if let Err(err) = result {
        eprintln!("psh: {err:#}");
        return ExitCode::FAILURE;
    }
    // Child exit statuses never become the shell's own exit code.
    ExitCode::SUCCESS
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_env("PSH_LOG"))
        .with_writer(std::io::stderr)
        .try_init();
}
