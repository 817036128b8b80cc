//! Runs planned jobs on a pool of worker threads, respecting dependency
//! order, the parallelism limits and the system load.

use crate::context::Context;
use crate::fs::{create_parent_dir, remove_file};
use crate::graph::{Action, Graph, Job, JobId};
use crate::plan::Plan;
use crate::process::{run_command, Termination};
use crate::progress::{Level, Progress, TaskResult};
use crate::{signal, trace};
use anyhow::{anyhow, bail};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::thread::Scope;
use std::time::{Duration, Instant};

/// How long an idle worker waits for work before considering retirement.
const POLL: Duration = Duration::from_millis(10);

/// How long to back off while the load average is above the ceiling.
const LOAD_BACKOFF: Duration = Duration::from_secs(1);

/// The 1-minute load average, or 0 where unavailable.
#[cfg(unix)]
pub fn load_average() -> f64 {
    let mut loads = [0f64; 3];
    // Safety: getloadavg writes at most the requested number of samples.
    let n = unsafe { libc::getloadavg(loads.as_mut_ptr(), 1) };
    if n < 1 {
        return 0.0;
    }
    loads[0]
}

#[cfg(not(unix))]
pub fn load_average() -> f64 {
    0.0
}

/// Ready jobs ordered by priority, then by arrival.
#[derive(Default)]
struct Ready {
    heap: BinaryHeap<Reverse<(i64, u64, JobId)>>,
    /// Arrival counter, breaking priority ties first come first served.
    seq: u64,
}

impl Ready {
    fn push(&mut self, priority: i64, id: JobId) {
        self.heap.push(Reverse((priority, self.seq, id)));
        self.seq += 1;
    }

    fn pop(&mut self) -> Option<JobId> {
        self.heap.pop().map(|Reverse((_, _, id))| id)
    }
}

/// A queue of ready jobs that hands out the lowest priority value first.
struct Queue {
    items: Mutex<Ready>,
    cond: Condvar,
}

impl Queue {
    fn new() -> Self {
        Queue {
            items: Mutex::new(Ready::default()),
            cond: Condvar::new(),
        }
    }

    fn push(&self, priority: i64, id: JobId) {
        self.items.lock().unwrap().push(priority, id);
        self.cond.notify_one();
    }

    fn pop(&self) -> Option<JobId> {
        self.items.lock().unwrap().pop()
    }

    fn pop_timeout(&self, timeout: Duration) -> Option<JobId> {
        let items = self.items.lock().unwrap();
        let (mut items, _) = self
            .cond
            .wait_timeout_while(items, timeout, |items| items.heap.is_empty())
            .unwrap();
        items.pop()
    }

    fn is_empty(&self) -> bool {
        self.items.lock().unwrap().heap.is_empty()
    }
}

/// A counting semaphore that never blocks.
struct Permits(AtomicUsize);

impl Permits {
    fn try_acquire(&self) -> bool {
        self.0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn release(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// A held serial permit, given back when dropped even if the job panics.
struct Permit<'a>(&'a Permits);

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// Makes a panic payload printable.
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

struct Pool<'a> {
    ctx: &'a Context,
    graph: &'a Graph,
    plan: &'a Plan,
    progress: &'a dyn Progress,

    queue: Queue,
    serial_queue: Queue,
    serial_permits: Permits,

    /// Live workers.  Spawning and retiring both happen under this lock.
    n_threads: Mutex<usize>,
    /// Trace track of the next worker.
    next_tid: AtomicUsize,
    /// Jobs currently executing an action.
    n_running: AtomicUsize,
    /// Jobs whose action ran.
    n_executed: AtomicUsize,

    /// Once set, workers take no new jobs.
    abort: AtomicBool,
    first_error: Mutex<Option<anyhow::Error>>,
    /// Failures under keep-going, reported at the end.
    deferred: Mutex<Vec<(JobId, anyhow::Error)>>,
}

impl<'a> Pool<'a> {
    fn new(ctx: &'a Context, graph: &'a Graph, plan: &'a Plan, progress: &'a dyn Progress) -> Self {
        Pool {
            ctx,
            graph,
            plan,
            progress,
            queue: Queue::new(),
            serial_queue: Queue::new(),
            serial_permits: Permits(AtomicUsize::new(ctx.options.n_serial)),
            n_threads: Mutex::new(0),
            next_tid: AtomicUsize::new(1),
            n_running: AtomicUsize::new(0),
            n_executed: AtomicUsize::new(0),
            abort: AtomicBool::new(false),
            first_error: Mutex::new(None),
            deferred: Mutex::new(Vec::new()),
        }
    }

    fn aborted(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    fn load_ok(&self) -> bool {
        let ceiling = self.ctx.options.load_average;
        ceiling.is_infinite() || load_average() <= ceiling
    }

    fn enqueue(&self, id: JobId) {
        let job = self.graph.job(id);
        if job.is_serial() {
            self.serial_queue.push(job.priority, id);
        } else {
            self.queue.push(job.priority, id);
        }
    }

    /// Starts another worker if there are none, or if there is room and the
    /// machine isn't overloaded.
    fn maybe_spawn<'s>(&'s self, s: &'s Scope<'s, '_>) {
        let mut n_threads = self.n_threads.lock().unwrap();
        if *n_threads < 1 || (*n_threads < self.ctx.options.jobs && self.load_ok()) {
            *n_threads += 1;
            let tid = self.next_tid.fetch_add(1, Ordering::SeqCst);
            self.progress
                .log(Level::Debug, &format!("starting worker {} of {}", tid, *n_threads));
            s.spawn(move || self.worker(s, tid));
        }
    }

    fn push_job<'s>(&'s self, s: &'s Scope<'s, '_>, id: JobId) {
        self.enqueue(id);
        self.maybe_spawn(s);
    }

    /// Queues the initial jobs.  All but the last `jobs` of them are queued
    /// without spawning, since the workers started for the rest will get to
    /// them.
    fn push_jobs<'s>(&'s self, s: &'s Scope<'s, '_>, ids: &[JobId]) {
        let n_pre = ids.len().saturating_sub(self.ctx.options.jobs);
        for &id in &ids[..n_pre] {
            self.enqueue(id);
        }
        for &id in &ids[n_pre..] {
            self.push_job(s, id);
        }
    }

    /// Takes the next job, preferring serial jobs when a permit is free.
    /// Returns whether a permit was taken alongside.
    fn pop(&self) -> Option<(JobId, bool)> {
        if self.serial_permits.try_acquire() {
            if let Some(id) = self.serial_queue.pop() {
                return Some((id, true));
            }
            self.serial_permits.release();
        }
        self.queue.pop_timeout(POLL).map(|id| (id, false))
    }

    fn fail(&self, err: anyhow::Error) {
        let mut first_error = self.first_error.lock().unwrap();
        if first_error.is_none() {
            *first_error = Some(err);
        } else {
            self.progress.log(Level::Error, &format!("{:#}", err));
        }
        self.abort.store(true, Ordering::SeqCst);
    }

    fn worker<'s>(&'s self, s: &'s Scope<'s, '_>, tid: usize) {
        loop {
            if signal::interrupted() && !self.aborted() {
                self.fail(anyhow!("interrupted by user"));
            }
            let next = if self.aborted() { None } else { self.pop() };
            match next {
                Some((id, serial)) => self.process(s, id, serial, tid),
                None => {
                    let mut n_threads = self.n_threads.lock().unwrap();
                    if self.aborted() || (self.queue.is_empty() && self.serial_queue.is_empty()) {
                        *n_threads -= 1;
                        self.progress.log(
                            Level::Debug,
                            &format!("worker {} retiring, {} left", tid, *n_threads),
                        );
                        return;
                    }
                }
            }
        }
    }

    fn process<'s>(&'s self, s: &'s Scope<'s, '_>, id: JobId, serial: bool, tid: usize) {
        let permit = serial.then(|| Permit(&self.serial_permits));
        let job = self.graph.job(id);
        job.state().set_done();

        let result = if job.state().upstream_failed() {
            self.progress
                .log(Level::Warning, &format!("skipping {}: a dependency failed", job));
            Ok(false)
        } else {
            self.run_if_stale(id, job, tid)
        };
        drop(permit);

        let failed = job.state().upstream_failed();
        match result {
            Ok(need_update) => self.complete(s, job, need_update, failed),
            Err(err) => {
                self.rm_targets(job);
                if self.ctx.options.keep_going {
                    self.deferred.lock().unwrap().push((id, err));
                    self.complete(s, job, true, true);
                } else {
                    self.fail(err);
                }
            }
        }
    }

    /// Runs a job if it needs to.  Returns whether it needed to.
    fn run_if_stale(&self, id: JobId, job: &Job, tid: usize) -> anyhow::Result<bool> {
        let need_update = self.ctx.staleness.need_update(job)?;
        if !need_update {
            self.progress
                .log(Level::Debug, &format!("up to date: {}", job.unique_targets.join(" ")));
            return Ok(false);
        }
        if let Action::Nothing = job.action {
            if job.is_source() {
                bail!("no rule to make {}", job.unique_targets.join(" "));
            }
            return Ok(true);
        }
        if self.ctx.options.dry_run {
            self.progress.dry_run(job);
            self.n_executed.fetch_add(1, Ordering::SeqCst);
            return Ok(true);
        }

        while self.n_running.load(Ordering::SeqCst) > 0 && !self.load_ok() && !self.aborted() {
            self.progress.log(Level::Debug, "load average too high, waiting");
            std::thread::sleep(LOAD_BACKOFF);
        }

        self.n_running.fetch_add(1, Ordering::SeqCst);
        let start = Instant::now();
        let result = self.execute(id, job);
        trace::event(&job.message(), tid, start, Instant::now());
        self.n_running.fetch_sub(1, Ordering::SeqCst);
        result?;
        self.n_executed.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    fn execute(&self, id: JobId, job: &Job) -> anyhow::Result<()> {
        let root = self.ctx.root();
        self.progress.task_started(id, job);
        match &job.action {
            Action::Nothing => Ok(()),
            Action::Command(cmdline) => {
                for target in &job.unique_targets {
                    create_parent_dir(&root.join(target))
                        .map_err(|err| anyhow!("mkdir for {}: {}", target, err))?;
                }
                let (termination, output) = run_command(cmdline, root)?;
                self.progress
                    .task_finished(id, job, &TaskResult { termination, output });
                if termination != Termination::Success {
                    bail!("command failed: {}", job.message());
                }
                Ok(())
            }
            Action::Func(f) => {
                let result = match std::panic::catch_unwind(AssertUnwindSafe(|| f(job))) {
                    Ok(result) => result,
                    Err(payload) => Err(anyhow!("action panicked: {}", panic_message(&*payload))),
                };
                let termination = match result {
                    Ok(()) => Termination::Success,
                    Err(_) => Termination::Failure,
                };
                self.progress.task_finished(
                    id,
                    job,
                    &TaskResult {
                        termination,
                        output: Vec::new(),
                    },
                );
                result
            }
        }
    }

    /// Removes what a failed job may have partially written.
    fn rm_targets(&self, job: &Job) {
        if job.is_phony() || job.is_source() || self.ctx.options.dry_run {
            return;
        }
        for target in &job.unique_targets {
            if let Err(err) = remove_file(&self.ctx.root().join(target)) {
                self.progress
                    .log(Level::Warning, &format!("failed to remove {}: {}", target, err));
            }
        }
    }

    /// Notifies the dependents of a finished job, queueing those that have
    /// nothing left to wait for.
    fn complete<'s>(&'s self, s: &'s Scope<'s, '_>, job: &Job, need_update: bool, failed: bool) {
        let dry_run = need_update && self.ctx.options.dry_run;
        for target in &job.unique_targets {
            let dependents = match self.plan.dependents.get(target) {
                Some(dependents) => dependents,
                None => continue,
            };
            for &dependent in dependents {
                let state = self.graph.job(dependent).state();
                state.set_dry_run_or(dry_run);
                state.set_upstream_failed_or(failed);
                if state.dec_n_rest() {
                    self.push_job(s, dependent);
                }
            }
        }
    }

    /// Logs the failures collected while keeping going.  Returns whether
    /// there were any.
    fn report_deferred(&self) -> bool {
        let deferred = std::mem::take(&mut *self.deferred.lock().unwrap());
        for (id, err) in &deferred {
            let job = self.graph.job(*id);
            self.progress.log(
                Level::Error,
                &format!(
                    "{:#}\n  targets: {}\n  deps: {}",
                    err,
                    job.unique_targets.join(" "),
                    job.unique_deps.join(" ")
                ),
            );
        }
        !deferred.is_empty()
    }

    /// The outcome of a finished pool.  Failures collected while keeping
    /// going are reported even when the run was then aborted.
    fn finish(self) -> anyhow::Result<usize> {
        let had_deferred = self.report_deferred();
        let first_error = self.first_error.lock().unwrap().take();
        if let Some(err) = first_error {
            return Err(err);
        }
        if had_deferred {
            bail!("execution failed");
        }
        let undone = self
            .plan
            .wanted
            .iter()
            .filter(|&&id| self.graph.job(id).state().n_rest() != -1)
            .count();
        if undone > 0 {
            bail!("internal error: {} jobs were never run", undone);
        }
        Ok(self.n_executed.load(Ordering::SeqCst))
    }
}

/// Runs every job in the plan, leaves first.  Returns the number of jobs
/// whose action ran (or would have, in a dry run).
pub fn run(ctx: &Context, graph: &Graph, plan: &Plan, progress: &dyn Progress) -> anyhow::Result<usize> {
    ctx.staleness.clear();
    let pool = Pool::new(ctx, graph, plan, progress);
    std::thread::scope(|s| pool.push_jobs(s, &plan.leaves));
    pool.finish()
}
