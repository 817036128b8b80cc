//! Support code for e2e tests, which run kiln as a binary.

mod basic;
mod failures;
mod missing;
mod tools;

pub fn kiln_binary() -> std::path::PathBuf {
    std::env::current_exe()
        .expect("test binary path")
        .parent()
        .expect("test binary directory")
        .parent()
        .expect("binary directory")
        .join(format!("kiln{}", std::env::consts::EXE_SUFFIX))
}

pub fn kiln_command(args: Vec<&str>) -> std::process::Command {
    let mut cmd = std::process::Command::new(kiln_binary());
    cmd.args(args);
    cmd
}

fn print_output(out: &std::process::Output) {
    // Gross: use print! instead of writing to stdout so Rust test
    // framework can capture it.
    print!("{}", std::str::from_utf8(&out.stdout).unwrap());
    print!("{}", std::str::from_utf8(&out.stderr).unwrap());
}

pub fn assert_output_contains(out: &std::process::Output, text: &str) {
    let out = std::str::from_utf8(&out.stdout).unwrap();
    if !out.contains(text) {
        panic!(
            "assertion failed; expected output to contain {:?} but got:\n{}",
            text, out
        );
    }
}

pub fn assert_output_not_contains(out: &std::process::Output, text: &str) {
    let out = std::str::from_utf8(&out.stdout).unwrap();
    if out.contains(text) {
        panic!(
            "assertion failed; expected output to not contain {:?} but got:\n{}",
            text, out
        );
    }
}

/// Manages a temporary directory for invoking kiln.
pub struct TestSpace {
    dir: tempfile::TempDir,
}
impl TestSpace {
    pub fn new() -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        Ok(TestSpace { dir })
    }

    pub fn path(&self) -> &std::path::Path {
        self.dir.path()
    }

    /// Write a file into the working space.
    pub fn write(&self, path: &str, content: &str) -> std::io::Result<()> {
        std::fs::write(self.dir.path().join(path), content)
    }

    /// Read a file from the working space.
    pub fn read(&self, path: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.dir.path().join(path))
    }

    pub fn mkdir(&self, path: &str) -> std::io::Result<()> {
        std::fs::create_dir_all(self.dir.path().join(path))
    }

    pub fn exists(&self, path: &str) -> bool {
        self.dir.path().join(path).exists()
    }

    /// Pin a file's mtime, in seconds since the epoch.
    pub fn set_mtime(&self, path: &str, secs: i64) -> std::io::Result<()> {
        filetime::set_file_mtime(
            self.dir.path().join(path),
            filetime::FileTime::from_unix_time(secs, 0),
        )
    }

    /// Invoke kiln, returning process output.
    pub fn run(&self, cmd: &mut std::process::Command) -> std::io::Result<std::process::Output> {
        cmd.current_dir(self.dir.path()).output()
    }

    /// Like run, but also print output if the build failed.
    pub fn run_expect(
        &self,
        cmd: &mut std::process::Command,
    ) -> anyhow::Result<std::process::Output> {
        let out = self.run(cmd)?;
        if !out.status.success() {
            print_output(&out);
            anyhow::bail!("build failed, status {}", out.status);
        }
        Ok(out)
    }

    /// Persist the temp dir locally and abort the test.  Debugging helper.
    #[allow(dead_code)]
    pub fn eject(self) -> ! {
        panic!("ejected at {:?}", self.dir.into_path());
    }
}

/// A file job touching its targets, with a description that is the same on
/// every platform.
#[cfg(unix)]
pub fn touch(decl: &str) -> String {
    format!("file {}\n  command = touch $out\n  desc = touch $out\n", decl)
}

#[cfg(windows)]
pub fn touch(decl: &str) -> String {
    format!(
        "file {}\n  command = cmd /c type nul > $out\n  desc = touch $out\n",
        decl
    )
}
