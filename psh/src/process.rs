use crate::parser::Pipeline;
use crate::reaper::ChildEvent;
use crate::redirect::{self, StageIo};
use libc::{STDERR_FILENO, STDIN_FILENO, STDOUT_FILENO};
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use nix::unistd::{ForkResult, Pid, close, dup2, execvp, fork, pipe};
use psh_types::{Context, RedirectKind, ShellError};
use std::ffi::CString;
use std::os::unix::io::RawFd;
use std::sync::mpsc::Receiver;
use tracing::{debug, warn};

/// Exit status a child reports when it cannot exec its program. The parent
/// does not distinguish this from the program's own nonzero exit.
pub const EXEC_FAIL_STATUS: i32 = 127;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Completed(i32),
}

/// One spawned pipeline stage. Stages of the same pipeline form a singly
/// linked chain owned by their top-level `Job`; a stage is never reachable
/// except through that chain.
#[derive(Debug)]
pub struct Process {
    pub argv: Vec<String>,
    pub pid: Option<Pid>,
    pub state: ProcessState,
    pub next: Option<Box<Process>>,
}

impl Process {
    pub fn new(argv: Vec<String>) -> Self {
        Process {
            argv,
            pid: None,
            state: ProcessState::Running,
            next: None,
        }
    }

    pub fn link(&mut self, process: Process) {
        match self.next {
            Some(ref mut p) => p.link(process),
            None => self.next = Some(Box::new(process)),
        }
    }
}

/// A top-level process table entry: one pipeline, reportable as a unit.
#[derive(Debug)]
pub struct Job {
    pub job_id: usize,
    pub cmd: String,
    pub stage_count: usize,
    pub process: Option<Box<Process>>,
}

impl Job {
    /// The chain-completion rule: reportable only once every spawned stage
    /// has finished and the whole chain was actually spawned.
    pub fn is_completed(&self) -> bool {
        let mut len = 0;
        let mut cur = self.process.as_deref();
        while let Some(p) = cur {
            if p.state == ProcessState::Running {
                return false;
            }
            len += 1;
            cur = p.next.as_deref();
        }
        len > 0 && len == self.stage_count
    }

    /// Per-stage exit statuses in chain order. Only meaningful once
    /// `is_completed` holds.
    pub fn statuses(&self) -> Vec<i32> {
        let mut out = Vec::with_capacity(self.stage_count);
        let mut cur = self.process.as_deref();
        while let Some(p) = cur {
            out.push(match p.state {
                ProcessState::Completed(status) => status,
                ProcessState::Running => 0,
            });
            cur = p.next.as_deref();
        }
        out
    }

    fn spawned_stages(&self) -> usize {
        let mut len = 0;
        let mut cur = self.process.as_deref();
        while let Some(p) = cur {
            len += 1;
            cur = p.next.as_deref();
        }
        len
    }
}

/// The process table: every pipeline the shell has launched and not yet
/// reported. Owned exclusively by the control thread; the reaper only ever
/// feeds it indirectly through the event channel.
#[derive(Debug, Default)]
pub struct JobTable {
    jobs: Vec<Job>,
    next_job_id: usize,
}

impl JobTable {
    pub fn new() -> Self {
        JobTable {
            jobs: Vec::new(),
            next_job_id: 1,
        }
    }

    /// Creates the top-level entry for a pipeline about to launch. Stages
    /// are attached one by one as they are spawned.
    pub fn register(&mut self, cmd: &str, stage_count: usize) -> usize {
        let job_id = self.next_job_id;
        self.next_job_id += 1;
        debug!("register job {job_id} '{cmd}' stages:{stage_count}");
        self.jobs.push(Job {
            job_id,
            cmd: cmd.to_string(),
            stage_count,
            process: None,
        });
        job_id
    }

    /// Links a freshly spawned stage at the end of the job's chain.
    pub fn attach_stage(&mut self, job_id: usize, process: Process) {
        let Some(job) = self.job_mut(job_id) else {
            warn!("attach_stage: job {job_id} not found");
            return;
        };
        match job.process {
            Some(ref mut head) => head.link(process),
            None => job.process = Some(Box::new(process)),
        }
    }

    /// Marks the running entry with a matching pid as finished. Finished
    /// entries are skipped: the OS recycles pids, and an unreported entry
    /// must not swallow a notification meant for its successor. Silently
    /// ignores pids the table does not know.
    pub fn mark_done(&mut self, pid: Pid, status: i32) {
        for job in &mut self.jobs {
            let mut cur = job.process.as_deref_mut();
            while let Some(p) = cur {
                if p.pid == Some(pid) && p.state == ProcessState::Running {
                    debug!("job {} pid {pid} done status {status}", job.job_id);
                    p.state = ProcessState::Completed(status);
                    return;
                }
                cur = p.next.as_deref_mut();
            }
        }
        debug!("mark_done: pid {pid} not running in table, ignored");
    }

    /// Whether the stage spawned with `pid` has finished. Only a still
    /// running entry holds a waiter; unknown pids count as finished so a
    /// waiter can never hang on a reclaimed entry.
    pub fn is_done(&self, pid: Pid) -> bool {
        for job in &self.jobs {
            let mut cur = job.process.as_deref();
            while let Some(p) = cur {
                if p.pid == Some(pid) && p.state == ProcessState::Running {
                    return false;
                }
                cur = p.next.as_deref();
            }
        }
        true
    }

    /// Yields, and removes, every fully finished top-level entry in
    /// insertion order. The caller takes ownership and reports them.
    pub fn reap_finished(&mut self) -> Vec<Job> {
        let mut finished = Vec::new();
        let mut i = 0;
        while i < self.jobs.len() {
            if self.jobs[i].is_completed() {
                finished.push(self.jobs.remove(i));
            } else {
                i += 1;
            }
        }
        finished
    }

    /// Number of not-yet-reported top-level entries.
    pub fn outstanding(&self) -> usize {
        self.jobs.len()
    }

    /// Called when a pipeline launch stops early: stages already running
    /// are left to finish and will be reported; an entry that never spawned
    /// anything is dropped outright.
    pub fn abort_spawn(&mut self, job_id: usize) {
        let Some(pos) = self.jobs.iter().position(|j| j.job_id == job_id) else {
            return;
        };
        let spawned = self.jobs[pos].spawned_stages();
        if spawned == 0 {
            self.jobs.remove(pos);
        } else {
            self.jobs[pos].stage_count = spawned;
        }
    }

    fn job_mut(&mut self, job_id: usize) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|j| j.job_id == job_id)
    }
}

/// Applies every already-delivered completion event without blocking.
pub fn drain_events(table: &mut JobTable, events: &Receiver<ChildEvent>) {
    while let Ok(ev) = events.try_recv() {
        table.mark_done(ev.pid, ev.status);
    }
}

/// Blocks until the stage spawned as `pid` has finished, applying every
/// completion event that arrives in the meantime. All reaping happens on
/// the reaper thread; this only consumes its notifications.
fn wait_stage(
    table: &mut JobTable,
    events: &Receiver<ChildEvent>,
    pid: Pid,
) -> Result<(), ShellError> {
    while !table.is_done(pid) {
        match events.recv() {
            Ok(ev) => table.mark_done(ev.pid, ev.status),
            Err(_) => return Err(ShellError::MonitorLost),
        }
    }
    Ok(())
}

struct ResolvedStage {
    argv: Vec<String>,
    io: StageIo,
}

fn close_resolved(stages: &mut [ResolvedStage]) {
    for stage in stages {
        stage.io.close_all();
    }
}

/// Resolves every stage's redirections and validates cross-stage legality
/// before anything is spawned: input redirection is legal only on the first
/// stage, output redirection only on the last, everything else conflicts
/// with the pipe already providing that direction.
fn resolve_stages(pipeline: Pipeline) -> Result<Vec<ResolvedStage>, ShellError> {
    let stage_count = pipeline.stage_count();
    let mut resolved: Vec<ResolvedStage> = Vec::with_capacity(stage_count);

    for (i, stage) in pipeline.stages.into_iter().enumerate() {
        let mut tokens = stage.tokens;
        let io = match redirect::resolve(&mut tokens) {
            Ok(io) => io,
            Err(err) => {
                close_resolved(&mut resolved);
                return Err(err);
            }
        };

        let misplaced = if io.stdin.is_some() && i > 0 {
            Some(RedirectKind::Input)
        } else if io.stdout.is_some() && i + 1 < stage_count {
            Some(RedirectKind::Output)
        } else {
            None
        };

        let mut io = io;
        if let Some(kind) = misplaced {
            io.close_all();
            close_resolved(&mut resolved);
            return Err(ShellError::ConflictingRedirection(kind));
        }
        // Nothing left to exec once the redirections are stripped.
        if tokens.is_empty() {
            io.close_all();
            close_resolved(&mut resolved);
            return Err(ShellError::InvalidSyntax);
        }

        resolved.push(ResolvedStage { argv: tokens, io });
    }

    Ok(resolved)
}

/// Launches a parsed pipeline: one pipe per adjacent stage boundary created
/// strictly before the stage that writes into it, one forked child per
/// stage, spawned left to right. Foreground pipelines block per stage;
/// background pipelines only poll and leave completion to the reaper.
pub fn launch(
    ctx: &Context,
    table: &mut JobTable,
    events: &Receiver<ChildEvent>,
    pipeline: Pipeline,
) -> Result<(), ShellError> {
    let foreground = !pipeline.background;
    let line = pipeline.line.clone();
    let mut stages = resolve_stages(pipeline)?;
    let stage_count = stages.len();

    let job_id = table.register(&line, stage_count);
    let mut prev_read: Option<RawFd> = None;

    for i in 0..stage_count {
        let pipe_pair = if i + 1 < stage_count {
            match pipe() {
                Ok(pair) => Some(pair),
                Err(err) => {
                    if let Some(fd) = prev_read.take() {
                        close(fd).ok();
                    }
                    close_resolved(&mut stages[i..]);
                    table.abort_spawn(job_id);
                    return Err(ShellError::SpawnFailed(err));
                }
            }
        } else {
            None
        };

        let stdin_fd = stages[i]
            .io
            .stdin
            .take()
            .or(prev_read.take())
            .unwrap_or(ctx.infile);
        let stdout_fd = stages[i]
            .io
            .stdout
            .take()
            .or(pipe_pair.map(|p| p.1))
            .unwrap_or(ctx.outfile);

        match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                exec_stage(
                    &stages[i].argv,
                    stdin_fd,
                    stdout_fd,
                    ctx.errfile,
                    pipe_pair.map(|p| p.0),
                );
            }
            Ok(ForkResult::Parent { child }) => {
                debug!(
                    "spawned stage {i} of job {job_id} pid:{child} in:{stdin_fd} out:{stdout_fd}"
                );
                if stdin_fd != ctx.infile {
                    close(stdin_fd).ok();
                }
                if stdout_fd != ctx.outfile {
                    close(stdout_fd).ok();
                }

                let mut process = Process::new(stages[i].argv.clone());
                process.pid = Some(child);
                table.attach_stage(job_id, process);

                prev_read = pipe_pair.map(|p| p.0);

                if foreground {
                    if let Err(err) = wait_stage(table, events, child) {
                        if let Some(fd) = prev_read.take() {
                            close(fd).ok();
                        }
                        close_resolved(&mut stages[i + 1..]);
                        return Err(err);
                    }
                } else {
                    drain_events(table, events);
                }
            }
            Err(err) => {
                warn!("fork failed for stage {i} of job {job_id}: {err}");
                if let Some((pout, _)) = pipe_pair {
                    close(pout).ok();
                }
                if stdin_fd != ctx.infile {
                    close(stdin_fd).ok();
                }
                if stdout_fd != ctx.outfile {
                    close(stdout_fd).ok();
                }
                close_resolved(&mut stages[i + 1..]);
                table.abort_spawn(job_id);
                return Err(ShellError::SpawnFailed(err));
            }
        }
    }

    Ok(())
}

fn copy_fd(src: RawFd, dst: RawFd) -> nix::Result<()> {
    if src != dst {
        dup2(src, dst)?;
        close(src)?;
    }
    Ok(())
}

fn restore_default_signals() {
    let action = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    for sig in [
        Signal::SIGINT,
        Signal::SIGQUIT,
        Signal::SIGTSTP,
        Signal::SIGTTIN,
        Signal::SIGTTOU,
        Signal::SIGCHLD,
    ] {
        unsafe {
            sigaction(sig, &action).ok();
        }
    }
}

/// Child-side of a stage spawn: wire the descriptors, drop the pipe end the
/// stage must not hold, and replace the process image. Never returns.
fn exec_stage(
    argv: &[String],
    stdin_fd: RawFd,
    stdout_fd: RawFd,
    stderr_fd: RawFd,
    drop_fd: Option<RawFd>,
) -> ! {
    if let Some(fd) = drop_fd {
        close(fd).ok();
    }
    restore_default_signals();

    if copy_fd(stdin_fd, STDIN_FILENO).is_err()
        || copy_fd(stdout_fd, STDOUT_FILENO).is_err()
        || copy_fd(stderr_fd, STDERR_FILENO).is_err()
    {
        unsafe { libc::_exit(EXEC_FAIL_STATUS) }
    }

    if let Ok(cargv) = argv
        .iter()
        .map(|a| CString::new(a.as_str()))
        .collect::<Result<Vec<CString>, _>>()
    {
        let _ = execvp(&cargv[0], &cargv);
        eprintln!("Error: command not found");
    }
    unsafe { libc::_exit(EXEC_FAIL_STATUS) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(raw: i32) -> Pid {
        Pid::from_raw(raw)
    }

    fn stage(table: &mut JobTable, job_id: usize, raw_pid: i32, name: &str) {
        let mut p = Process::new(vec![name.to_string()]);
        p.pid = Some(pid(raw_pid));
        table.attach_stage(job_id, p);
    }

    #[test]
    fn mark_done_on_unknown_pid_is_a_noop() {
        let mut table = JobTable::new();
        let job_id = table.register("sleep 1", 1);
        stage(&mut table, job_id, 100, "sleep");

        table.mark_done(pid(9999), 0);
        assert_eq!(table.outstanding(), 1);
        assert!(table.reap_finished().is_empty());
    }

    #[test]
    fn single_stage_is_reportable_once_done() {
        let mut table = JobTable::new();
        let job_id = table.register("sleep 1", 1);
        stage(&mut table, job_id, 100, "sleep");

        assert!(table.reap_finished().is_empty());
        table.mark_done(pid(100), 0);

        let finished = table.reap_finished();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].cmd, "sleep 1");
        assert_eq!(finished[0].statuses(), vec![0]);
        assert_eq!(table.outstanding(), 0);
    }

    #[test]
    fn chain_is_reportable_only_when_every_stage_finished() {
        let mut table = JobTable::new();
        let job_id = table.register("printf abc|cat|wc -c", 3);
        stage(&mut table, job_id, 10, "printf");
        stage(&mut table, job_id, 11, "cat");
        stage(&mut table, job_id, 12, "wc");

        table.mark_done(pid(10), 0);
        table.mark_done(pid(12), 1);
        assert!(table.reap_finished().is_empty(), "one stage still running");

        table.mark_done(pid(11), 0);
        let finished = table.reap_finished();
        assert_eq!(finished.len(), 1);
        // Chain order, the last entry being the last stage's status.
        assert_eq!(finished[0].statuses(), vec![0, 0, 1]);
    }

    #[test]
    fn chain_is_not_reportable_before_all_stages_spawned() {
        let mut table = JobTable::new();
        let job_id = table.register("a|b", 2);
        stage(&mut table, job_id, 20, "a");
        table.mark_done(pid(20), 0);

        // Only one of two stages exists yet.
        assert!(table.reap_finished().is_empty());

        stage(&mut table, job_id, 21, "b");
        table.mark_done(pid(21), 0);
        assert_eq!(table.reap_finished().len(), 1);
    }

    #[test]
    fn reap_preserves_insertion_order() {
        let mut table = JobTable::new();
        let first = table.register("first", 1);
        let second = table.register("second", 1);
        stage(&mut table, first, 30, "first");
        stage(&mut table, second, 31, "second");

        table.mark_done(pid(31), 0);
        table.mark_done(pid(30), 0);

        let finished = table.reap_finished();
        let cmds: Vec<&str> = finished.iter().map(|j| j.cmd.as_str()).collect();
        assert_eq!(cmds, ["first", "second"]);
    }

    #[test]
    fn duplicate_notifications_keep_the_first_status() {
        let mut table = JobTable::new();
        let job_id = table.register("false", 1);
        stage(&mut table, job_id, 40, "false");

        table.mark_done(pid(40), 1);
        // The entry is already finished; the duplicate finds no running
        // match and is dropped.
        table.mark_done(pid(40), 0);
        let finished = table.reap_finished();
        assert_eq!(finished[0].statuses(), vec![1]);
    }

    #[test]
    fn recycled_pid_lands_on_the_running_entry() {
        let mut table = JobTable::new();
        let old = table.register("first", 1);
        stage(&mut table, old, 40, "first");
        table.mark_done(pid(40), 7);

        // The OS hands the same pid to a later job while the finished one
        // is still awaiting its report.
        let new = table.register("second", 1);
        stage(&mut table, new, 40, "second");
        assert!(!table.is_done(pid(40)));

        table.mark_done(pid(40), 0);
        let finished = table.reap_finished();
        assert_eq!(finished.len(), 2);
        assert_eq!(finished[0].statuses(), vec![7]);
        assert_eq!(finished[1].statuses(), vec![0]);
    }

    #[test]
    fn abort_before_any_spawn_drops_the_entry() {
        let mut table = JobTable::new();
        let job_id = table.register("a|b", 2);
        table.abort_spawn(job_id);
        assert_eq!(table.outstanding(), 0);
    }

    #[test]
    fn abort_after_partial_spawn_truncates_the_chain() {
        let mut table = JobTable::new();
        let job_id = table.register("a|b|c", 3);
        stage(&mut table, job_id, 50, "a");
        stage(&mut table, job_id, 51, "b");
        table.abort_spawn(job_id);

        table.mark_done(pid(50), 0);
        table.mark_done(pid(51), 0);
        let finished = table.reap_finished();
        assert_eq!(finished.len(), 1, "spawned stages still get reported");
        assert_eq!(finished[0].statuses(), vec![0, 0]);
    }

    #[test]
    fn unknown_pid_counts_as_done() {
        let table = JobTable::new();
        assert!(table.is_done(pid(123)));
    }

    #[test]
    fn mislocated_redirections_are_rejected_before_spawn() {
        use crate::parser;

        let p = parser::parse("a>out|b").unwrap();
        assert!(matches!(
            resolve_stages(p),
            Err(ShellError::ConflictingRedirection(RedirectKind::Output))
        ));

        let p = parser::parse("a|b<in").unwrap();
        assert!(matches!(
            resolve_stages(p),
            Err(ShellError::ConflictingRedirection(RedirectKind::Input))
        ));
    }

    #[test]
    fn stage_reduced_to_nothing_is_invalid() {
        use crate::parser;

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("in");
        std::fs::write(&target, "x").unwrap();

        let p = parser::parse(&format!("a | < {}", target.display())).unwrap();
        assert!(matches!(resolve_stages(p), Err(_)));
    }
}
