//! Run-wide options and the state shared by one run.

use crate::hashcache::HashCache;
use crate::staleness::Staleness;
use anyhow::{anyhow, bail};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Options {
    /// Maximum number of jobs running at once.
    pub jobs: usize,
    /// Maximum number of serial jobs running at once.
    pub n_serial: usize,
    /// No new workers start, and no job starts while others run, when the
    /// 1-minute load average is above this.
    pub load_average: f64,
    /// Continue independent branches after a failure.
    pub keep_going: bool,
    /// Print what would run instead of running it.
    pub dry_run: bool,
    /// Hash dependencies of file jobs that don't choose for themselves.
    pub use_hash: bool,
    /// Hash record directory, relative to the root unless absolute.
    pub cache_dir: PathBuf,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            jobs: std::thread::available_parallelism()
                .map(usize::from)
                .unwrap_or(1),
            n_serial: 1,
            load_average: f64::INFINITY,
            keep_going: false,
            dry_run: false,
            use_hash: false,
            cache_dir: PathBuf::from(".kiln/hash"),
        }
    }
}

impl Options {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.jobs == 0 {
            bail!("jobs must be > 0");
        }
        if self.n_serial == 0 {
            bail!("n_serial must be > 0");
        }
        if self.load_average.is_nan() || self.load_average <= 0.0 {
            bail!("load average must be > 0, got {}", self.load_average);
        }
        Ok(())
    }
}

/// Everything one run shares between its workers.  Build a fresh one per
/// run; nothing here is global.
pub struct Context {
    pub options: Options,
    pub staleness: Staleness,
}

impl Context {
    /// `root` is the directory target names are relative to and commands
    /// run in.
    pub fn new(root: &Path, options: Options) -> anyhow::Result<Context> {
        options.validate()?;
        let root = if root.is_absolute() {
            root.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(|err| anyhow!("getcwd: {}", err))?
                .join(root)
        };
        // Drops "." components, e.g. from a root of ".".
        let root: PathBuf = root.components().collect();
        let hashes = HashCache::new(root.join(&options.cache_dir));
        let staleness = Staleness::new(root, hashes, options.use_hash);
        Ok(Context { options, staleness })
    }

    pub fn root(&self) -> &Path {
        self.staleness.root()
    }
}
