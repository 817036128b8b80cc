//! Graph loading: runs build.kiln parsing and constructs the job graph from it.

use crate::canon::canon_path;
use crate::eval::{EvalString, Vars};
use crate::graph::{FileLoc, Graph, Job};
use crate::parse::{Decl, DeclKind, Statement};
use crate::smallmap::SmallMap;
use crate::{parse, trace};
use anyhow::{anyhow, bail};
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Phony declarations of one target, merged across the file.
struct PhonyDecl {
    location: FileLoc,
    deps: Vec<String>,
    descs: Vec<String>,
    command: Option<String>,
    priority: Option<i64>,
}

/// Internal state used while loading.
#[derive(Default)]
struct Loader {
    graph: Graph,
    default: Vec<String>,
    phonies: FxHashMap<String, PhonyDecl>,
    /// Phony targets in order of first declaration.
    phony_order: Vec<String>,
}

impl parse::Loader for Loader {
    type Path = String;
    fn path(&mut self, path: &mut String) -> Self::Path {
        canon_path(path.as_str())
    }
}

fn parse_bool(key: &str, val: &str) -> anyhow::Result<bool> {
    match val {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => bail!("{}: expected true or false, got {:?}", key, val),
    }
}

fn parse_priority(val: &str) -> anyhow::Result<i64> {
    val.trim()
        .parse()
        .map_err(|_| anyhow!("priority: expected an integer, got {:?}", val))
}

/// Expands a declaration's attributes, with $in and $out bound to the job's
/// unique deps and targets.
struct Attrs<'a> {
    vars: &'a SmallMap<String, EvalString<String>>,
    implicit: SmallMap<&'static str, String>,
    top: &'a Vars,
}

impl<'a> Attrs<'a> {
    fn new(vars: &'a SmallMap<String, EvalString<String>>, top: &'a Vars, job: &Job) -> Self {
        let mut implicit = SmallMap::new();
        implicit.insert("in", job.unique_deps.join(" "));
        implicit.insert("out", job.unique_targets.join(" "));
        Attrs {
            vars,
            implicit,
            top,
        }
    }

    fn get(&self, key: &str) -> Option<String> {
        self.vars
            .get(key)
            .map(|val| val.evaluate(&[&self.implicit, self.top]))
    }
}

impl Loader {
    fn add_decl(&mut self, filename: &Arc<PathBuf>, top: &Vars, decl: Decl<String>) -> anyhow::Result<()> {
        let location = FileLoc {
            filename: filename.clone(),
            line: decl.line,
        };
        for (key, _) in decl.vars.iter() {
            match (decl.kind, key.as_str()) {
                (_, "command" | "desc" | "priority") | (DeclKind::File, "serial" | "hash") => {}
                _ => bail!("{}: unknown attribute {:?}", location, key),
            }
        }
        match decl.kind {
            DeclKind::File => {
                let mut job = Job::file(decl.targets, decl.deps).at(location);
                let attrs = Attrs::new(&decl.vars, top, &job);
                let command = attrs.get("command");
                let desc = attrs.get("desc");
                let serial = attrs.get("serial");
                let hash = attrs.get("hash");
                let priority = attrs.get("priority");
                if let Some(command) = command {
                    job = job.command(command);
                }
                if let Some(desc) = desc {
                    job = job.desc(desc);
                }
                if let Some(serial) = serial {
                    job = job.serial(parse_bool("serial", &serial)?);
                }
                if let Some(hash) = hash {
                    job = job.use_hash(parse_bool("hash", &hash)?);
                }
                if let Some(priority) = priority {
                    job = job.priority(parse_priority(&priority)?);
                }
                self.graph.add_job(job)?;
            }
            DeclKind::Phony => {
                if decl.targets.len() != 1 {
                    bail!(
                        "{}: phony job with multiple targets is not supported: {}",
                        location,
                        decl.targets.join(" ")
                    );
                }
                let job = Job::phony(decl.targets[0].clone(), decl.deps.iter().cloned());
                let attrs = Attrs::new(&decl.vars, top, &job);
                let command = attrs.get("command");
                let desc = attrs.get("desc");
                let priority = attrs.get("priority").map(|p| parse_priority(&p)).transpose()?;
                let target = job.unique_targets[0].clone();
                if !self.phonies.contains_key(&target) {
                    self.phony_order.push(target.clone());
                }
                let merged = self
                    .phonies
                    .entry(target.clone())
                    .or_insert_with(|| PhonyDecl {
                        location: location.clone(),
                        deps: Vec::new(),
                        descs: Vec::new(),
                        command: None,
                        priority: None,
                    });
                merged.deps.extend(job.deps);
                merged.descs.extend(desc);
                if let Some(command) = command {
                    if merged.command.is_some() {
                        bail!("{}: multiple commands for phony {}", location, target);
                    }
                    merged.command = Some(command);
                }
                if let Some(priority) = priority {
                    if merged.priority.is_some() {
                        bail!("{}: multiple priorities for phony {}", location, target);
                    }
                    merged.priority = Some(priority);
                }
            }
        }
        Ok(())
    }

    fn finish_phonies(&mut self) -> anyhow::Result<()> {
        for target in std::mem::take(&mut self.phony_order) {
            let decl = match self.phonies.remove(&target) {
                Some(decl) => decl,
                None => continue,
            };
            let mut job = Job::phony(target, decl.deps).at(decl.location);
            for desc in decl.descs {
                job = job.desc(desc);
            }
            if let Some(command) = decl.command {
                job = job.command(command);
            }
            if let Some(priority) = decl.priority {
                job = job.priority(priority);
            }
            self.graph.add_job(job)?;
        }
        Ok(())
    }

    fn parse(&mut self, path: PathBuf, text: &str) -> anyhow::Result<()> {
        let filename = Arc::new(path);
        let mut buf = String::with_capacity(text.len() + 1);
        buf.push_str(text);
        buf.push('\0');

        let mut parser = parse::Parser::new(&buf);
        loop {
            let stmt = match parser
                .read(self)
                .map_err(|err| anyhow!(parser.format_parse_error(&filename, err)))?
            {
                None => break,
                Some(s) => s,
            };
            match stmt {
                Statement::Default(defaults) => self.default.extend(defaults),
                Statement::Decl(decl) => self.add_decl(&filename, &parser.vars, decl)?,
            }
        }
        self.finish_phonies()
    }
}

/// State loaded by read().
pub struct State {
    pub graph: Graph,
    pub default: Vec<String>,
}

/// Loads a build file and returns the job graph it declares.
pub fn read(build_filename: &Path) -> anyhow::Result<State> {
    let bytes = trace::scope("fs::read", || std::fs::read(build_filename))
        .map_err(|err| anyhow!("read {}: {}", build_filename.display(), err))?;
    let text = String::from_utf8(bytes)
        .map_err(|_| anyhow!("{}: not valid UTF-8", build_filename.display()))?;
    parse(build_filename, &text)
}

/// Parses a build file's content.
pub fn parse(name: &Path, text: &str) -> anyhow::Result<State> {
    let mut loader = Loader::default();
    trace::scope("loader.parse", || loader.parse(name.to_path_buf(), text))?;
    Ok(State {
        graph: loader.graph,
        default: loader.default,
    })
}
