use std::ffi::OsStr;
use std::io;
use std::path::Path;
use std::process::Command;

use tracing::debug;

/// Captured result of one invocation of the version-control tool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs the external version-control tool inside a repository.
///
/// A non-zero exit code is part of the returned [`CommandOutput`], never an error.
/// Only a failure to start the process at all is reported as `Err`. Arguments are
/// OS strings so paths reach the process byte for byte.
pub trait CommandRunner {
    fn run<S: AsRef<OsStr>>(&self, workdir: &Path, args: &[S]) -> io::Result<CommandOutput>;
}

/// Production runner that shells out to `git`.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: String,
}

impl GitCli {
    pub fn new() -> Self {
        Self {
            program: "git".to_string(),
        }
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for GitCli {
    fn default() -> Self {
        GitCli::new()
    }
}

impl CommandRunner for GitCli {
    fn run<S: AsRef<OsStr>>(&self, workdir: &Path, args: &[S]) -> io::Result<CommandOutput> {
        debug!(
            program = %self.program,
            args = %display_args(args),
            workdir = %workdir.display(),
            "spawn"
        );

        // The parsers match English phrases, so pin the message locale.
        let output = Command::new(&self.program)
            .args(args)
            .current_dir(workdir)
            .env("LC_ALL", "C")
            .output()?;

        let exit_code = output.status.code().unwrap_or(-1);
        debug!(exit_code, "exited");

        Ok(CommandOutput {
            exit_code,
            stdout: split_lines(&output.stdout),
            stderr: split_lines(&output.stderr),
        })
    }
}

/// Space-joined arguments for logs and error context.
pub fn display_args<S: AsRef<OsStr>>(args: &[S]) -> String {
    args.iter()
        .map(|arg| arg.as_ref().to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}

fn split_lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
        .collect()
}
