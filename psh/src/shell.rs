use crate::parser;
use crate::process::{self, Job, JobTable};
use crate::reaper::ChildEvent;
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use psh_builtin::ShellProxy;
use psh_types::{Context, ShellError};
use std::env;
use std::sync::mpsc::Receiver;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Continue,
    ExitRequested,
}

/// The control side of the shell: owns the process table, consumes the
/// reaper's events, dispatches builtins, and prints completion notices.
pub struct Shell {
    jobs: JobTable,
    events: Receiver<ChildEvent>,
    exit_requested: bool,
    monitor_lost: bool,
}

impl Shell {
    pub fn new(events: Receiver<ChildEvent>) -> Self {
        Shell {
            jobs: JobTable::new(),
            events,
            exit_requested: false,
            monitor_lost: false,
        }
    }

    /// The shell ignores the job-control signals so a Ctrl-C aimed at a
    /// foreground child never kills the shell itself. Children restore the
    /// default dispositions before exec.
    pub fn set_signals(&self) {
        let action = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
        for sig in [
            Signal::SIGINT,
            Signal::SIGQUIT,
            Signal::SIGTSTP,
            Signal::SIGTTIN,
            Signal::SIGTTOU,
        ] {
            unsafe {
                if let Err(err) = sigaction(sig, &action) {
                    warn!("failed to ignore {sig}: {err}");
                }
            }
        }
    }

    /// Runs one accepted command line to the point where the loop can show
    /// the next prompt. Recoverable errors are reported here and swallowed.
    pub fn run_command(&mut self, ctx: &Context, line: &str) -> RunOutcome {
        if let Err(err) = self.eval(ctx, line) {
            eprintln!("Error: {err}");
            if err.is_fatal() {
                self.monitor_lost = true;
                self.exit_requested = true;
            }
        }
        if self.take_exit_request() {
            RunOutcome::ExitRequested
        } else {
            RunOutcome::Continue
        }
    }

    fn eval(&mut self, ctx: &Context, line: &str) -> Result<(), ShellError> {
        let pipeline = parser::parse(line)?;
        if pipeline.is_empty() {
            return Ok(());
        }
        debug!("eval {:?}", pipeline.line);

        // Builtins run inside the shell and only ever stand alone; a
        // builtin name inside a multi-stage pipeline goes to exec like any
        // other program (and fails there).
        if pipeline.stage_count() == 1 {
            let name = pipeline.stages[0].tokens[0].clone();
            if let Some(cmd) = psh_builtin::get_command(&name) {
                let mut stages = pipeline.stages;
                let _ = cmd(ctx, stages.remove(0).tokens, self);
                return Ok(());
            }
        }

        process::launch(ctx, &mut self.jobs, &self.events, pipeline)
    }

    /// The job reporter: applies every pending completion event and prints
    /// one notice per fully finished pipeline. Called once per loop
    /// iteration and again whenever exit is requested.
    pub fn check_completed_jobs(&mut self) {
        process::drain_events(&mut self.jobs, &self.events);
        for job in self.jobs.reap_finished() {
            println!("{}", completion_banner(&job));
        }
    }

    pub fn outstanding_jobs(&self) -> usize {
        self.jobs.outstanding()
    }

    /// Whether an exit request is honored. Refused while jobs are still
    /// outstanding; the refusal does not stick, a later request re-checks
    /// from scratch. Once the reaper thread is gone, outstanding jobs can
    /// never complete, so the refusal must not keep the shell alive.
    pub fn try_exit(&mut self) -> bool {
        self.check_completed_jobs();
        if self.monitor_lost {
            return true;
        }
        if self.jobs.outstanding() > 0 {
            eprintln!("Error: {}", ShellError::ActiveJobs);
            return false;
        }
        true
    }

    /// Blocks until every outstanding job has been reported. Used on the
    /// non-interactive paths, where there is no next prompt to wait behind.
    pub fn wait_for_jobs(&mut self) {
        loop {
            self.check_completed_jobs();
            if self.jobs.outstanding() == 0 {
                return;
            }
            match self.events.recv() {
                Ok(ev) => self.jobs.mark_done(ev.pid, ev.status),
                Err(_) => {
                    warn!("completion monitor gone with jobs outstanding");
                    return;
                }
            }
        }
    }

    fn take_exit_request(&mut self) -> bool {
        std::mem::take(&mut self.exit_requested)
    }
}

impl ShellProxy for Shell {
    fn exit_shell(&mut self) {
        self.exit_requested = true;
    }

    fn changepwd(&mut self, dir: &str) -> Result<(), ShellError> {
        env::set_current_dir(dir).map_err(|_| ShellError::NoSuchDirectory)?;
        if let Ok(cwd) = env::current_dir() {
            unsafe { env::set_var("PWD", cwd) };
        }
        Ok(())
    }
}

fn completion_banner(job: &Job) -> String {
    let statuses: Vec<String> = job.statuses().iter().map(|s| format!("[{s}]")).collect();
    format!("+ completed '{}' {}", job.cmd, statuses.join(" "))
}
