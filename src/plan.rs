//! Resolves requested targets into the jobs that must be considered, the
//! reverse dependency edges between them, and the leaves to start from.

use crate::canon::canon_path;
use crate::fs::lexists;
use crate::graph::{Graph, Job, JobId};
use anyhow::bail;
use rustc_hash::FxHashMap;
use std::path::Path;

/// The result of planning a run.
#[derive(Debug, Default)]
pub struct Plan {
    /// For each target, the jobs that list it as a dependency.
    pub dependents: FxHashMap<String, Vec<JobId>>,
    /// Reachable jobs without dependencies; the scheduler starts from these.
    pub leaves: Vec<JobId>,
    /// Every job reachable from the requested targets, in visit order.
    pub wanted: Vec<JobId>,
}

/// The targets currently being visited, innermost first.
enum Chain<'a> {
    Nil,
    Cons(&'a str, JobId, &'a Chain<'a>),
}

impl<'a> Chain<'a> {
    fn contains(&self, id: JobId) -> bool {
        let mut chain = self;
        while let Chain::Cons(_, other, parent) = chain {
            if *other == id {
                return true;
            }
            chain = parent;
        }
        false
    }

    /// Outermost first, e.g. "a -> b -> a".
    fn render(&self, last: &str) -> String {
        let mut names = vec![last];
        let mut chain = self;
        while let Chain::Cons(name, _, parent) = chain {
            names.push(name);
            chain = parent;
        }
        names.reverse();
        names.join(" -> ")
    }
}

/// Picks what to build: the requested targets, else the build file's
/// defaults, else "all".
pub fn targets_or_default(requested: &[String], default: &[String]) -> Vec<String> {
    if !requested.is_empty() {
        requested.to_vec()
    } else if !default.is_empty() {
        default.to_vec()
    } else {
        vec!["all".to_owned()]
    }
}

struct Planner<'a> {
    graph: &'a mut Graph,
    root: &'a Path,
    plan: Plan,
}

impl<'a> Planner<'a> {
    /// Finds the job producing a target, synthesizing a source job for a file
    /// that exists on disk without a rule.
    fn job_for(&mut self, target: &str, chain: &Chain) -> anyhow::Result<JobId> {
        if let Some(id) = self.graph.lookup(target) {
            return Ok(id);
        }
        if lexists(&self.root.join(target)) {
            return self
                .graph
                .add_job(Job::file([target], Vec::<String>::new()));
        }
        match chain {
            Chain::Nil => bail!("no rule to make {}", target),
            Chain::Cons(parent, _, _) => bail!("no rule to make {}, needed by {}", target, parent),
        }
    }

    fn visit(&mut self, target: &str, chain: &Chain) -> anyhow::Result<()> {
        let id = self.job_for(target, chain)?;
        if chain.contains(id) {
            bail!("circular dependency detected: {}", chain.render(target));
        }
        let job = self.graph.job_mut(id);
        if job.visited {
            return Ok(());
        }
        job.visited = true;
        job.state().reset(job.unique_deps.len());
        let deps = job.unique_deps.clone();
        self.plan.wanted.push(id);

        for dep in &deps {
            self.plan.dependents.entry(dep.clone()).or_default().push(id);
        }
        let chain = Chain::Cons(target, id, chain);
        for dep in &deps {
            self.visit(dep, &chain)?;
        }
        if deps.is_empty() {
            self.plan.leaves.push(id);
        }
        Ok(())
    }
}

/// Visits every job reachable from `targets`, whose names are relative to
/// `root`.  Fails on unknown targets and circular dependencies before
/// anything runs.
pub fn build(graph: &mut Graph, root: &Path, targets: &[String]) -> anyhow::Result<Plan> {
    let ids: Vec<JobId> = graph.jobs().map(|(id, _)| id).collect();
    for id in ids {
        graph.job_mut(id).visited = false;
    }
    let mut planner = Planner {
        graph,
        root,
        plan: Plan::default(),
    };
    for target in targets {
        planner.visit(&canon_path(target), &Chain::Nil)?;
    }
    Ok(planner.plan)
}
