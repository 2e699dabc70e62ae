//! The injected command runner: the only gateway to the system shell.
//!
//! Run-command actions are the single non-transactional part of a run;
//! everything else stages through the VFS. The engine talks to the shell
//! exclusively through [`CommandRunner`] so tests can substitute a
//! recording fake.

use crate::error::{ArchitechError, Result};
use std::{
    io::Read,
    path::PathBuf,
    process::{Command, Stdio},
    thread,
    time::{Duration, Instant},
};

/// Default deadline for a single command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct ExecOptions {
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
}

impl ExecOptions {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self { cwd: cwd.into(), env: Vec::new(), timeout: DEFAULT_COMMAND_TIMEOUT }
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Executes a shell command and reports its outcome. A non-zero exit is an
/// `Ok` with the code set; only failures to run at all (or a timeout) are
/// `Err`.
pub trait CommandRunner: Send + Sync {
    fn exec(&self, command: &str, opts: &ExecOptions) -> Result<ExecOutput>;
}

/// Runs commands through the platform shell.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn exec(&self, command: &str, opts: &ExecOptions) -> Result<ExecOutput> {
        debug!(command, cwd = %opts.cwd.display(), "spawning command");
        let mut cmd = if cfg!(windows) {
            let mut cmd = Command::new("cmd");
            cmd.args(["/C", command]);
            cmd
        } else {
            let mut cmd = Command::new("sh");
            cmd.args(["-c", command]);
            cmd
        };
        cmd.current_dir(&opts.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in &opts.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|err| ArchitechError::io(err, &opts.cwd))?;
        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        // drain both pipes off-thread so a chatty child never blocks on a
        // full pipe while we poll for exit
        let stdout_handle = thread::spawn(move || drain(stdout_pipe));
        let stderr_handle = thread::spawn(move || drain(stderr_pipe));

        let deadline = Instant::now() + opts.timeout;
        let status = loop {
            match child.try_wait().map_err(|err| ArchitechError::io(err, &opts.cwd))? {
                Some(status) => break status,
                None if Instant::now() >= deadline => {
                    warn!(command, timeout_secs = opts.timeout.as_secs(), "command timed out");
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(ArchitechError::CommandTimeout {
                        command: command.to_string(),
                        timeout_secs: opts.timeout.as_secs(),
                    });
                }
                None => thread::sleep(Duration::from_millis(25)),
            }
        };

        let stdout = stdout_handle.join().unwrap_or_default();
        let stderr = stderr_handle.join().unwrap_or_default();
        let code = status.code().unwrap_or(-1);
        trace!(command, code, "command finished");
        Ok(ExecOutput { code, stdout, stderr })
    }
}

fn drain(pipe: Option<impl Read>) -> String {
    let mut buffer = String::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_string(&mut buffer);
    }
    buffer
}
