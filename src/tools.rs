//! Printers for inspecting a loaded graph without running it: descriptions,
//! dependency lists, Graphviz DOT and JSON.

use crate::graph::{Graph, Job};
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::io::Write;

/// Jobs in a deterministic order, by their targets.
fn sorted_jobs(graph: &Graph) -> Vec<&Job> {
    let mut jobs: Vec<&Job> = graph.jobs().map(|(_, job)| job).collect();
    jobs.sort_by(|a, b| a.unique_targets.cmp(&b.unique_targets));
    jobs
}

/// Each target followed by its job's descriptions, one line per tab-indented
/// line of description.
pub fn write_descriptions(graph: &Graph, w: &mut dyn Write) -> std::io::Result<()> {
    let mut entries: Vec<(&str, &Job)> = graph
        .jobs()
        .flat_map(|(_, job)| job.unique_targets.iter().map(move |t| (t.as_str(), job)))
        .collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    for (target, job) in entries {
        writeln!(w, "{}", target)?;
        for desc in &job.descs {
            for line in desc.split('\n') {
                writeln!(w, "\t{}", line)?;
            }
        }
    }
    Ok(())
}

/// Each job as its targets, then its deps indented by a tab.
pub fn write_dependencies(graph: &Graph, w: &mut dyn Write) -> std::io::Result<()> {
    for job in sorted_jobs(graph) {
        job.write(w)?;
        writeln!(w)?;
    }
    Ok(())
}

#[derive(Serialize)]
struct JobDeps<'a> {
    deps: &'a [String],
    targets: &'a [String],
}

pub fn write_json(graph: &Graph, w: &mut dyn Write) -> anyhow::Result<()> {
    let jobs: Vec<JobDeps> = sorted_jobs(graph)
        .into_iter()
        .map(|job| JobDeps {
            deps: &job.unique_deps,
            targets: &job.unique_targets,
        })
        .collect();
    serde_json::to_writer(&mut *w, &jobs)?;
    writeln!(w)?;
    Ok(())
}

fn escape(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Assigns DOT node names.
#[derive(Default)]
struct Nodes {
    of_name: FxHashMap<String, String>,
    count: usize,
}

impl Nodes {
    fn fresh(&mut self) -> String {
        self.count += 1;
        format!("n{}", self.count)
    }

    fn of(&mut self, name: &str) -> String {
        if let Some(node) = self.of_name.get(name) {
            return node.clone();
        }
        let node = self.fresh();
        self.of_name.insert(name.to_owned(), node.clone());
        node
    }
}

/// The graph in Graphviz format: each job is a small action node pointed to
/// by its targets and pointing to its deps, e.g.
/// `kiln -Q | dot -Tpdf -Grankdir=LR -Nshape=plaintext > graph.pdf`.
pub fn write_dot(graph: &Graph, w: &mut dyn Write) -> std::io::Result<()> {
    let mut nodes = Nodes::default();
    writeln!(w, "digraph G{{")?;
    for (i, job) in sorted_jobs(graph).into_iter().enumerate() {
        let action = nodes.fresh();
        writeln!(w, "{}[label=\"○\"]", action)?;
        let mut targets: Vec<&String> = job.unique_targets.iter().collect();
        targets.sort();
        for name in &targets {
            let node = nodes.of(name);
            writeln!(w, "{}[label={}]", node, escape(name))?;
            writeln!(w, "{} -> {}", node, action)?;
        }
        if targets.len() > 1 {
            writeln!(w, "subgraph cluster_{}{{", i + 1)?;
            for name in &targets {
                writeln!(w, "{}", nodes.of(name))?;
            }
            writeln!(w, "}}")?;
        }
        let mut deps: Vec<&String> = job.unique_deps.iter().collect();
        deps.sort();
        for name in deps {
            let node = nodes.of(name);
            writeln!(w, "{}[label={}]", node, escape(name))?;
            writeln!(w, "{} -> {}", action, node)?;
        }
    }
    writeln!(w, "}}")
}
