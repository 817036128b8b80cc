//! The job graph: jobs, the targets they produce and the dependencies they
//! consume.

use crate::canon::canon_path;
use anyhow::bail;
use rustc_hash::{FxHashMap, FxHashSet};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct JobId(usize);
impl JobId {
    pub fn index(&self) -> usize {
        self.0
    }
}
impl From<usize> for JobId {
    fn from(u: usize) -> JobId {
        JobId(u)
    }
}

/// Where a job was declared, for error messages.
#[derive(Debug, Clone)]
pub struct FileLoc {
    pub filename: Arc<PathBuf>,
    pub line: usize,
}
impl std::fmt::Display for FileLoc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "{}:{}", self.filename.display(), self.line)
    }
}

/// Signature of in-process job actions.
pub type ActionFn = dyn Fn(&Job) -> anyhow::Result<()> + Send + Sync;

/// What executing a job does.
#[derive(Clone)]
pub enum Action {
    /// Nothing to run.  For a file job this marks a source file that no rule
    /// produces.
    Nothing,
    /// A shell command line.
    Command(String),
    /// A caller supplied function, for driving the scheduler as a library.
    Func(Arc<ActionFn>),
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Nothing => write!(f, "Nothing"),
            Action::Command(cmd) => f.debug_tuple("Command").field(cmd).finish(),
            Action::Func(_) => write!(f, "Func(..)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// An alias for its dependencies; has no artifact and always runs.
    Phony,
    File {
        /// Serial jobs run exclusively to each other, e.g. jobs needing a GPU
        /// or a large amount of memory.
        serial: bool,
        /// Whether to use content hashes in addition to mtimes.  None means
        /// the run-wide default.
        use_hash: Option<bool>,
    },
}

/// The mutable part of a job, touched by worker threads during a run.
#[derive(Debug)]
pub struct JobState {
    /// Dependencies not yet completed; -1 once the job is dispatched.
    n_rest: Mutex<isize>,
    /// Set when an upstream job would have run during a dry run.
    dry_run: AtomicBool,
    /// Set when an upstream job failed while keeping going.
    upstream_failed: AtomicBool,
}

impl JobState {
    fn new() -> Self {
        JobState {
            n_rest: Mutex::new(0),
            dry_run: AtomicBool::new(false),
            upstream_failed: AtomicBool::new(false),
        }
    }

    pub(crate) fn reset(&self, n_rest: usize) {
        *self.n_rest.lock().unwrap() = n_rest as isize;
        self.dry_run.store(false, Ordering::SeqCst);
        self.upstream_failed.store(false, Ordering::SeqCst);
    }

    pub fn n_rest(&self) -> isize {
        *self.n_rest.lock().unwrap()
    }

    /// Decrements the remaining count.  Returns true only for the call that
    /// brings it to zero, so exactly one completing dependency enqueues us.
    pub(crate) fn dec_n_rest(&self) -> bool {
        let mut n_rest = self.n_rest.lock().unwrap();
        if *n_rest <= 0 {
            panic!("dependency count underflow ({})", *n_rest);
        }
        *n_rest -= 1;
        *n_rest == 0
    }

    /// Marks the job as dispatched.
    pub(crate) fn set_done(&self) {
        let mut n_rest = self.n_rest.lock().unwrap();
        if *n_rest != 0 {
            panic!("dispatching job with n_rest {}", *n_rest);
        }
        *n_rest = -1;
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run.load(Ordering::SeqCst)
    }

    pub(crate) fn set_dry_run_or(&self, x: bool) {
        if x {
            self.dry_run.store(true, Ordering::SeqCst);
        }
    }

    pub fn upstream_failed(&self) -> bool {
        self.upstream_failed.load(Ordering::SeqCst)
    }

    pub(crate) fn set_upstream_failed_or(&self, x: bool) {
        if x {
            self.upstream_failed.store(true, Ordering::SeqCst);
        }
    }
}

/// Deduplicates, keeping the first occurrence of each item.
fn unique_of(xs: &[String]) -> Vec<String> {
    let mut seen = FxHashSet::default();
    xs.iter().filter(|x| seen.insert(x.as_str())).cloned().collect()
}

/// Abbreviates a long list for display.
fn cdotify(xs: &[String]) -> String {
    if xs.len() > 4 {
        format!("[{}, …]", xs[..3].join(", "))
    } else {
        format!("[{}]", xs.join(", "))
    }
}

/// One buildable unit: produces `targets` from `deps`.
#[derive(Debug)]
pub struct Job {
    pub location: Option<FileLoc>,
    pub kind: JobKind,
    pub action: Action,
    pub targets: Vec<String>,
    pub unique_targets: Vec<String>,
    pub deps: Vec<String>,
    pub unique_deps: Vec<String>,
    pub descs: Vec<String>,
    /// Among ready jobs, lower values are dispatched first.
    pub priority: i64,
    pub(crate) visited: bool,
    state: JobState,
}

impl Job {
    fn new<T: Into<String>, D: Into<String>>(
        kind: JobKind,
        targets: impl IntoIterator<Item = T>,
        deps: impl IntoIterator<Item = D>,
    ) -> Self {
        let targets: Vec<String> = targets.into_iter().map(|t| canon_path(t.into())).collect();
        let deps: Vec<String> = deps.into_iter().map(|d| canon_path(d.into())).collect();
        Job {
            location: None,
            kind,
            action: Action::Nothing,
            unique_targets: unique_of(&targets),
            targets,
            unique_deps: unique_of(&deps),
            deps,
            descs: Vec::new(),
            priority: 0,
            visited: false,
            state: JobState::new(),
        }
    }

    /// A job producing files.
    pub fn file<T: Into<String>, D: Into<String>>(
        targets: impl IntoIterator<Item = T>,
        deps: impl IntoIterator<Item = D>,
    ) -> Self {
        Job::new(
            JobKind::File {
                serial: false,
                use_hash: None,
            },
            targets,
            deps,
        )
    }

    /// A job grouping its dependencies under one name.
    pub fn phony<D: Into<String>>(target: impl Into<String>, deps: impl IntoIterator<Item = D>) -> Self {
        Job::new(JobKind::Phony, [target.into()], deps)
    }

    pub fn command(mut self, cmdline: impl Into<String>) -> Self {
        self.action = Action::Command(cmdline.into());
        self
    }

    pub fn action(mut self, f: impl Fn(&Job) -> anyhow::Result<()> + Send + Sync + 'static) -> Self {
        self.action = Action::Func(Arc::new(f));
        self
    }

    pub fn desc(mut self, desc: impl Into<String>) -> Self {
        self.descs.push(desc.into());
        self
    }

    pub fn priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// Ignored for phony jobs.
    pub fn serial(mut self, serial: bool) -> Self {
        if let JobKind::File { use_hash, .. } = self.kind {
            self.kind = JobKind::File { serial, use_hash };
        }
        self
    }

    /// Ignored for phony jobs.
    pub fn use_hash(mut self, use_hash: bool) -> Self {
        if let JobKind::File { serial, .. } = self.kind {
            self.kind = JobKind::File {
                serial,
                use_hash: Some(use_hash),
            };
        }
        self
    }

    pub fn at(mut self, location: FileLoc) -> Self {
        self.location = Some(location);
        self
    }

    pub fn is_phony(&self) -> bool {
        self.kind == JobKind::Phony
    }

    pub fn is_serial(&self) -> bool {
        matches!(self.kind, JobKind::File { serial: true, .. })
    }

    /// A file nothing knows how to make; it must already exist on disk.
    pub fn is_source(&self) -> bool {
        !self.is_phony() && matches!(self.action, Action::Nothing)
    }

    pub fn state(&self) -> &JobState {
        &self.state
    }

    /// The line shown to the user when the job starts.
    pub fn message(&self) -> String {
        let desc = self.descs.iter().find(|d| !d.is_empty());
        match (desc, &self.action) {
            (Some(desc), _) => desc.clone(),
            (None, Action::Command(cmdline)) => cmdline.clone(),
            (None, _) => self.unique_targets.join(" "),
        }
    }

    /// Writes targets, then tab-indented dependencies.
    pub fn write(&self, w: &mut dyn Write) -> std::io::Result<()> {
        for t in &self.unique_targets {
            writeln!(w, "{}", t)?;
        }
        for d in &self.unique_deps {
            writeln!(w, "\t{}", d)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            JobKind::Phony => write!(
                f,
                "PhonyJob({}, {})",
                cdotify(&self.unique_targets),
                cdotify(&self.unique_deps)
            ),
            JobKind::File { serial, .. } => write!(
                f,
                "FileJob({}, {}, serial={})",
                cdotify(&self.unique_targets),
                cdotify(&self.unique_deps),
                serial
            ),
        }
    }
}

/// Registry of jobs, indexed by the targets they produce.
#[derive(Debug, Default)]
pub struct Graph {
    jobs: Vec<Job>,
    job_of_target: FxHashMap<String, JobId>,
}

impl Graph {
    pub fn new() -> Graph {
        Graph::default()
    }

    /// Registers a job.  Every target must be produced by exactly one job.
    pub fn add_job(&mut self, job: Job) -> anyhow::Result<JobId> {
        if job.unique_targets.is_empty() {
            bail!("job without targets: {}", job);
        }
        if job.is_phony() && job.unique_targets.len() != 1 {
            bail!("phony job with multiple targets is not supported: {}", job);
        }
        for target in &job.unique_targets {
            if let Some(&other) = self.job_of_target.get(target) {
                let mut msg = format!("multiple rules generate {}", target);
                for loc in [&self.job(other).location, &job.location].into_iter().flatten() {
                    msg.push_str(&format!("\n  declared at {}", loc));
                }
                bail!(msg);
            }
        }
        let id = JobId(self.jobs.len());
        for target in &job.unique_targets {
            self.job_of_target.insert(target.clone(), id);
        }
        self.jobs.push(job);
        Ok(id)
    }

    pub fn job(&self, id: JobId) -> &Job {
        &self.jobs[id.index()]
    }

    pub(crate) fn job_mut(&mut self, id: JobId) -> &mut Job {
        &mut self.jobs[id.index()]
    }

    /// Looks up the job producing a target, after canonicalizing the name.
    pub fn lookup(&self, target: &str) -> Option<JobId> {
        self.job_of_target.get(&canon_path(target)).copied()
    }

    pub fn jobs(&self) -> impl Iterator<Item = (JobId, &Job)> {
        self.jobs.iter().enumerate().map(|(i, job)| (JobId(i), job))
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
