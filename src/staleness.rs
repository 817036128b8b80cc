//! Decides whether a job's targets are out of date with respect to its
//! dependencies.

use crate::fs::{stat, MTime};
use crate::graph::{Job, JobKind};
use crate::hashcache::HashCache;
use anyhow::anyhow;
use dashmap::DashMap;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// One memo slot; its lock is held while the time is computed, so each
/// dependency is stat()ed and hashed at most once per run.
type Slot = Arc<Mutex<Option<f64>>>;

pub struct Staleness {
    root: PathBuf,
    hashes: HashCache,
    /// Default for file jobs that don't choose.
    use_hash: bool,
    memo: DashMap<(String, bool), Slot>,
}

impl Staleness {
    pub fn new(root: impl Into<PathBuf>, hashes: HashCache, use_hash: bool) -> Self {
        Staleness {
            root: root.into(),
            hashes,
            use_hash,
            memo: DashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Forgets memoized times, e.g. between two runs sharing a context.
    pub fn clear(&self) {
        self.memo.clear();
    }

    fn compute(&self, dep: &str, use_hash: bool) -> anyhow::Result<f64> {
        let path = self.root.join(dep);
        let mtime = match stat(&path).map_err(|err| anyhow!("stat {}: {}", dep, err))? {
            MTime::Missing => return Ok(f64::INFINITY),
            MTime::Stamp(mtime) => mtime,
        };
        if use_hash && !path.is_dir() {
            self.hashes.time_of(&path, mtime)
        } else {
            Ok(mtime)
        }
    }

    /// The effective time of a dependency.  A dependency that doesn't exist
    /// on disk is infinitely new.
    pub fn dep_time(&self, dep: &str, use_hash: bool) -> anyhow::Result<f64> {
        // Clone the slot out so the map's shard lock isn't held while
        // computing.
        let slot = self
            .memo
            .entry((dep.to_owned(), use_hash))
            .or_default()
            .clone();
        let mut slot = slot.lock().unwrap();
        if let Some(time) = *slot {
            return Ok(time);
        }
        let time = self.compute(dep, use_hash)?;
        *slot = Some(time);
        Ok(time)
    }

    /// Whether a job must run.
    pub fn need_update(&self, job: &Job) -> anyhow::Result<bool> {
        let use_hash = match job.kind {
            JobKind::Phony => return Ok(true),
            JobKind::File { use_hash, .. } => use_hash.unwrap_or(self.use_hash),
        };
        if job.state().dry_run() {
            return Ok(true);
        }

        // Dep times go first even if a target is missing, to prime the hash
        // records.
        let max_dep = job
            .unique_deps
            .par_iter()
            .map(|dep| self.dep_time(dep, use_hash))
            .collect::<anyhow::Result<Vec<f64>>>()?
            .into_iter()
            .fold(f64::NEG_INFINITY, f64::max);

        let mut min_target = f64::INFINITY;
        for target in &job.unique_targets {
            match stat(&self.root.join(target)).map_err(|err| anyhow!("stat {}: {}", target, err))? {
                MTime::Missing => return Ok(true),
                MTime::Stamp(mtime) => min_target = min_target.min(mtime),
            }
        }
        Ok(max_dep > min_target)
    }
}
