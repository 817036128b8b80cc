//! Chrome trace output.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::Mutex;
use std::time::Instant;

static TRACE: Mutex<Option<Trace>> = Mutex::new(None);

struct Trace {
    start: Instant,
    w: BufWriter<File>,
}

impl Trace {
    fn new(path: &str) -> std::io::Result<Self> {
        let mut w = BufWriter::new(File::create(path)?);
        writeln!(w, "[")?;
        Ok(Trace {
            start: Instant::now(),
            w,
        })
    }

    /// Writes a complete ("X") event on the given track.
    fn write_complete(&mut self, name: &str, tid: usize, start: Instant, end: Instant) -> std::io::Result<()> {
        write!(
            self.w,
            "{{ \"pid\": 0, \"tid\": {}, \"name\": {:?}, \"ts\": {}, \"ph\": \"X\", \"dur\": {} }}",
            tid,
            name,
            start.duration_since(self.start).as_micros(),
            end.duration_since(start).as_micros()
        )
    }

    fn write(&mut self, name: &str, tid: usize, start: Instant, end: Instant) -> std::io::Result<()> {
        self.write_complete(name, tid, start, end)?;
        writeln!(self.w, ",")
    }

    fn close(&mut self) -> std::io::Result<()> {
        let start = self.start;
        self.write_complete("main", 0, start, Instant::now())?;
        writeln!(self.w, "]")?;
        self.w.flush()
    }
}

pub fn open(path: &str) -> std::io::Result<()> {
    let trace = Trace::new(path)?;
    *TRACE.lock().unwrap() = Some(trace);
    Ok(())
}

pub fn enabled() -> bool {
    TRACE.lock().unwrap().is_some()
}

/// Runs `f`, recording it as an event on the main track.
#[inline]
pub fn scope<T>(name: &'static str, f: impl FnOnce() -> T) -> T {
    if !enabled() {
        return f();
    }
    let start = Instant::now();
    let result = f();
    event(name, 0, start, Instant::now());
    result
}

/// Records an event that already happened, e.g. one job on a worker's track.
pub fn event(name: &str, tid: usize, start: Instant, end: Instant) {
    if let Some(t) = TRACE.lock().unwrap().as_mut() {
        // Tracing is best effort; a failed write shows up at close().
        let _ = t.write(name, tid, start, end);
    }
}

pub fn close() -> std::io::Result<()> {
    match TRACE.lock().unwrap().take() {
        Some(mut t) => t.close(),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_json_array() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("trace.json");
        open(path.to_str().unwrap())?;
        let n = scope("work", || {
            let now = Instant::now();
            event("cc \"lib\"", 2, now, now);
            3
        });
        assert_eq!(n, 3);
        close()?;
        let text = std::fs::read_to_string(&path)?;
        assert!(text.starts_with("[\n"));
        assert!(text.trim_end().ends_with("}\n]"));
        assert!(text.contains("\"tid\": 2, \"name\": \"cc \\\"lib\\\"\""));
        assert!(text.contains("\"name\": \"work\""));
        assert!(!enabled());
        Ok(())
    }
}
