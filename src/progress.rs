//! Run progress reporting and diagnostics, for the purpose of display to the
//! user.

use crate::graph::{Action, Job, JobId};
use crate::process::Termination;
use anyhow::bail;
use std::io::Write;
use std::sync::Mutex;

/// Severity of a diagnostic line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl Level {
    pub fn name(&self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warning => "warning",
            Level::Error => "error",
            Level::Critical => "critical",
        }
    }
}

impl std::str::FromStr for Level {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> anyhow::Result<Level> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "debug" => Level::Debug,
            "info" => Level::Info,
            "warning" | "warn" => Level::Warning,
            "error" => Level::Error,
            "critical" => Level::Critical,
            _ => bail!("unknown log level {:?}", s),
        })
    }
}

/// How a job ended, as far as progress display cares.
pub struct TaskResult {
    pub termination: Termination,
    pub output: Vec<u8>,
}

/// Trait for run progress notifications.  Called from worker threads.
pub trait Progress: Sync {
    /// Called when a job's action starts.
    fn task_started(&self, id: JobId, job: &Job);

    /// Called when a job's action completes.
    fn task_finished(&self, id: JobId, job: &Job, result: &TaskResult);

    /// Called instead of running a job in a dry run.
    fn dry_run(&self, job: &Job);

    /// Log a diagnostic line.
    fn log(&self, level: Level, msg: &str);
}

/// Progress implementation for a console, without any overprinting.
pub struct ConsoleProgress {
    /// Whether to print command lines of started programs.
    verbose: bool,

    /// Diagnostics below this level are dropped.
    level: Level,

    /// The id of the last job printed, used to avoid printing it twice
    /// when its output immediately follows.  The lock also keeps lines from
    /// different workers from interleaving.
    last_started: Mutex<Option<JobId>>,
}

impl ConsoleProgress {
    pub fn new(verbose: bool, level: Level) -> Self {
        ConsoleProgress {
            verbose,
            level,
            last_started: Mutex::new(None),
        }
    }

    fn message(&self, job: &Job) -> String {
        match (&job.action, self.verbose) {
            (Action::Command(cmdline), true) => cmdline.clone(),
            _ => job.message(),
        }
    }
}

impl Progress for ConsoleProgress {
    fn task_started(&self, id: JobId, job: &Job) {
        let mut last_started = self.last_started.lock().unwrap();
        println!("{}", self.message(job));
        *last_started = Some(id);
    }

    fn task_finished(&self, id: JobId, job: &Job, result: &TaskResult) {
        let mut last_started = self.last_started.lock().unwrap();
        match result.termination {
            Termination::Success => {
                if result.output.is_empty() || *last_started == Some(id) {
                    // Output is empty, or we just printed the job, don't print it again.
                } else {
                    println!("{}", self.message(job));
                }
            }
            Termination::Interrupted => println!("interrupted: {}", self.message(job)),
            Termination::Failure => println!("failed: {}", self.message(job)),
        };
        if !result.output.is_empty() {
            let mut stdout = std::io::stdout().lock();
            let _ = stdout.write_all(&result.output);
            if !result.output.ends_with(b"\n") {
                let _ = stdout.write_all(b"\n");
            }
        }
        *last_started = None;
    }

    fn dry_run(&self, job: &Job) {
        let _lock = self.last_started.lock().unwrap();
        let mut stdout = std::io::stdout().lock();
        let _ = job.write(&mut stdout);
        let _ = writeln!(stdout);
    }

    fn log(&self, level: Level, msg: &str) {
        if level < self.level {
            return;
        }
        let _lock = self.last_started.lock().unwrap();
        println!("kiln: {}: {}", level.name(), msg);
    }
}
