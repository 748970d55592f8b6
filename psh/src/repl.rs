use crate::history::History;
use crate::input::{LineEditor, ReadOutcome};
use crate::prompt;
use crate::shell::{RunOutcome, Shell};
use anyhow::Result;
use psh_types::Context;
use std::io::{self, BufRead};
use tracing::debug;

/// The interactive main loop: report finished jobs, prompt, read, run.
pub fn run_interactive(ctx: &Context, shell: &mut Shell) -> Result<()> {
    let mut editor = LineEditor::new();
    let mut history = History::new();

    loop {
        shell.check_completed_jobs();
        prompt::print_preprompt(&mut io::stdout());

        match editor.read_line(&mut history)? {
            ReadOutcome::Line(line) => {
                let line = line.trim().to_string();
                if line.is_empty() {
                    continue;
                }
                history.add(&line);
                debug!("accepted line {line:?}");
                if shell.run_command(ctx, &line) == RunOutcome::ExitRequested && shell.try_exit() {
                    break;
                }
            }
            ReadOutcome::Eof => {
                if shell.try_exit() {
                    break;
                }
            }
        }
    }
    Ok(())
}

/// Reads plain lines when stdin is not a terminal. Runs every line, then
/// waits for whatever is still outstanding before returning.
pub fn run_pipe_mode(ctx: &Context, shell: &mut Shell) -> Result<()> {
    for line in io::stdin().lock().lines() {
        let line = line?;
        shell.check_completed_jobs();
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if shell.run_command(ctx, line) == RunOutcome::ExitRequested && shell.try_exit() {
            break;
        }
    }
    shell.wait_for_jobs();
    Ok(())
}

/// One-shot `-c` mode.
pub fn run_once(ctx: &Context, shell: &mut Shell, command: &str) -> Result<()> {
    shell.run_command(ctx, command.trim());
    shell.wait_for_jobs();
    Ok(())
}
