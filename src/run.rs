use anyhow::anyhow;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::context::{Context, Options};
use crate::progress::{ConsoleProgress, Level};
use crate::{load, plan, signal, tools, trace, work};

#[derive(argh::FromArgs)]
/// kiln, a parallel make-style build scheduler
struct Args {
    /// chdir before running
    #[argh(option, short = 'C')]
    chdir: Option<PathBuf>,

    /// input build file [default=build.kiln]
    #[argh(option, short = 'f', default = "PathBuf::from(\"build.kiln\")")]
    build_file: PathBuf,

    /// debugging tools, use -d list to list
    #[argh(option, short = 'd')]
    debug: Option<String>,

    /// parallelism [default uses system thread count]
    #[argh(option, short = 'j')]
    jobs: Option<usize>,

    /// maximum number of serial jobs running at once [default=1]
    #[argh(option, default = "1")]
    n_serial: usize,

    /// don't start new jobs while the load average is above this
    #[argh(option, short = 'l')]
    load_average: Option<f64>,

    /// keep going past failures, building what doesn't depend on them
    #[argh(switch, short = 'k')]
    keep_going: bool,

    /// print the jobs that would run instead of running them
    #[argh(switch, short = 'n')]
    dry_run: bool,

    /// compare content hashes as well as mtimes of dependencies
    #[argh(switch)]
    use_hash: bool,

    /// hash record directory [default=.kiln/hash]
    #[argh(option)]
    cache_dir: Option<PathBuf>,

    /// diagnostics level: debug, info, warning, error or critical [default=warning]
    #[argh(option, default = "Level::Warning")]
    log: Level,

    /// print executed command lines
    #[argh(switch, short = 'v')]
    verbose: bool,

    /// print the descriptions of targets, then exit
    #[argh(switch, short = 'D')]
    descriptions: bool,

    /// print the dependencies of jobs, then exit
    #[argh(switch, short = 'P')]
    dependencies: bool,

    /// print the dependencies in Graphviz DOT format, then exit
    #[argh(switch, short = 'Q')]
    dependencies_dot: bool,

    /// print the dependencies as JSON, then exit
    #[argh(switch, short = 'J')]
    dependencies_json: bool,

    /// targets to build
    #[argh(positional)]
    targets: Vec<String>,
}

impl Args {
    fn options(&self) -> Options {
        let mut options = Options {
            n_serial: self.n_serial,
            keep_going: self.keep_going,
            dry_run: self.dry_run,
            use_hash: self.use_hash,
            ..Options::default()
        };
        if let Some(jobs) = self.jobs {
            options.jobs = jobs;
        }
        if let Some(load_average) = self.load_average {
            options.load_average = load_average;
        }
        if let Some(cache_dir) = &self.cache_dir {
            options.cache_dir = cache_dir.clone();
        }
        options
    }
}

/// Handles the flags that print the graph instead of running it.  Returns
/// false if none was given.
fn print_graph(args: &Args, state: &load::State) -> anyhow::Result<bool> {
    let stdout = std::io::stdout();
    let mut w = stdout.lock();
    if args.descriptions {
        tools::write_descriptions(&state.graph, &mut w)?;
    } else if args.dependencies {
        tools::write_dependencies(&state.graph, &mut w)?;
    } else if args.dependencies_dot {
        tools::write_dot(&state.graph, &mut w)?;
    } else if args.dependencies_json {
        tools::write_json(&state.graph, &mut w)?;
    } else {
        return Ok(false);
    }
    w.flush()?;
    Ok(true)
}

fn run_impl() -> anyhow::Result<i32> {
    let args: Args = argh::from_env();

    if let Some(debug) = &args.debug {
        match debug.as_str() {
            "list" => {
                println!("debug tools:");
                println!("  trace  generate json performance trace");
                return Ok(1);
            }
            "trace" => trace::open("trace.json")?,
            _ => anyhow::bail!("unknown -d {:?}, use -d list to list", debug),
        }
    }

    if let Some(dir) = &args.chdir {
        std::env::set_current_dir(dir).map_err(|err| anyhow!("chdir {:?}: {}", dir, err))?;
    }

    let options = args.options();
    options.validate()?;

    let mut state = trace::scope("load", || load::read(&args.build_file))?;
    if print_graph(&args, &state)? {
        return Ok(0);
    }

    signal::register_sigint();
    let ctx = Context::new(Path::new("."), options)?;
    let targets = plan::targets_or_default(&args.targets, &state.default);
    let plan = trace::scope("plan", || plan::build(&mut state.graph, ctx.root(), &targets))?;

    let progress = ConsoleProgress::new(args.verbose, args.log);
    let n = trace::scope("work", || work::run(&ctx, &state.graph, &plan, &progress))?;
    match n {
        // Special case: don't print numbers when no work done.
        0 => println!("kiln: no work to do"),
        n if ctx.options.dry_run => println!("kiln: dry run, {} jobs would run", n),
        n => println!("kiln: ran {} jobs, now up to date", n),
    }
    Ok(0)
}

pub fn run() -> anyhow::Result<i32> {
    let res = run_impl();
    let closed = trace::close().map_err(|err| anyhow!("trace: {}", err));
    let code = res?;
    closed?;
    Ok(code)
}
