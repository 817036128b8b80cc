pub mod canon;
pub mod context;
mod eval;
pub mod fs;
pub mod graph;
pub mod hashcache;
pub mod load;
pub mod parse;
pub mod plan;
pub mod process;
pub mod progress;
pub mod run;
pub mod scanner;
mod signal;
mod smallmap;
pub mod staleness;
pub mod tools;
pub mod trace;
pub mod work;

#[cfg(not(any(windows, target_arch = "wasm32")))]
use jemallocator::Jemalloc;

#[cfg(not(any(windows, target_arch = "wasm32")))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;
