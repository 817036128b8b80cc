//! Runs job command lines as subprocesses.

use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Success,
    Interrupted,
    Failure,
}

/// Runs a command line through the shell in `dir`, returning how it ended and
/// its stdout followed by its stderr.  Returns an Err() only if the process
/// could not be run at all.
pub fn run_command(cmdline: &str, dir: &Path) -> anyhow::Result<(Termination, Vec<u8>)> {
    let mut cmd = shell(cmdline).current_dir(dir).output()?;
    let mut output = Vec::new();
    output.append(&mut cmd.stdout);
    output.append(&mut cmd.stderr);

    let mut termination = Termination::Success;
    if !cmd.status.success() {
        termination = Termination::Failure;
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(sig) = cmd.status.signal() {
                match sig {
                    libc::SIGINT => {
                        write!(output, "interrupted")?;
                        termination = Termination::Interrupted;
                    }
                    _ => write!(output, "signal {}", sig)?,
                }
            }
        }
        if let (Termination::Failure, Some(code)) = (termination, cmd.status.code()) {
            if output.is_empty() {
                write!(output, "exit status {}", code)?;
            }
        }
    }
    Ok((termination, output))
}

#[cfg(unix)]
fn shell(cmdline: &str) -> std::process::Command {
    let mut cmd = std::process::Command::new("/bin/sh");
    cmd.arg("-c").arg(cmdline);
    cmd
}

#[cfg(windows)]
fn shell(cmdline: &str) -> std::process::Command {
    let mut cmd = std::process::Command::new("cmd");
    cmd.arg("/c").arg(cmdline);
    cmd
}
