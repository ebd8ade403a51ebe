//! Long-running encoder processes.
//!
//! An [`EncoderProcess`] owns exactly one child. Releasing it goes through
//! [`EncoderProcess::terminate`]: SIGTERM, a bounded grace period, then
//! SIGKILL. The child is also spawned with `kill_on_drop`, so a handle that is
//! dropped without being terminated still takes its process down.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::{Error, Result};

/// How an encoder process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// The process exited on its own before any signal was sent.
    Exited(ExitStatus),
    /// The process exited within the grace period after SIGTERM.
    Terminated,
    /// The process ignored SIGTERM and was killed.
    Killed,
}

/// Builder for an encoder invocation.
#[derive(Debug, Clone)]
pub struct EncoderCommand {
    program: PathBuf,
    args: Vec<String>,
    pipe_stdin: bool,
    pipe_stdout: bool,
}

impl EncoderCommand {
    /// Create a new command for the given program path.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            pipe_stdin: false,
            pipe_stdout: false,
        }
    }

    /// Append a single argument.
    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Give the child a writable stdin pipe.
    pub fn pipe_stdin(&mut self) -> &mut Self {
        self.pipe_stdin = true;
        self
    }

    /// Capture the child's stdout.
    pub fn pipe_stdout(&mut self) -> &mut Self {
        self.pipe_stdout = true;
        self
    }

    /// The arguments accumulated so far.
    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Spawn the process.
    ///
    /// `label` tags the forwarded stderr lines in the log.
    pub fn spawn(&self, label: impl Into<String>) -> Result<EncoderProcess> {
        let label = label.into();
        let program_name = self
            .program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string());

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(if self.pipe_stdin {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(if self.pipe_stdout {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::tool_not_found(program_name.clone())
            } else {
                Error::tool_failed(program_name.clone(), format!("failed to spawn: {e}"))
            }
        })?;

        let pid = child.id();
        tracing::debug!(encoder = %label, pid, program = %program_name, "Spawned encoder");

        if let Some(stderr) = child.stderr.take() {
            let label = label.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(encoder = %label, "{}", line);
                }
            });
        }

        Ok(EncoderProcess { child, pid, label })
    }
}

/// An owned, running encoder process.
#[derive(Debug)]
pub struct EncoderProcess {
    child: Child,
    pid: Option<u32>,
    label: String,
}

impl EncoderProcess {
    /// OS process id, if the process was running when spawned.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Log label for this process.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Take the stdin pipe (only present with [`EncoderCommand::pipe_stdin`]).
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    /// Take the stdout pipe (only present with [`EncoderCommand::pipe_stdout`]).
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Wait for the process to exit on its own.
    ///
    /// Cancel safe: dropping the future leaves the process running.
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        Ok(self.child.wait().await?)
    }

    /// Stop the process: SIGTERM, wait up to `grace`, then SIGKILL.
    ///
    /// Returns once the process has been reaped.
    pub async fn terminate(&mut self, grace: Duration) -> ExitOutcome {
        if let Ok(Some(status)) = self.child.try_wait() {
            return ExitOutcome::Exited(status);
        }

        if self.send_sigterm() {
            match tokio::time::timeout(grace, self.child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::debug!(encoder = %self.label, pid = self.pid, %status, "Encoder exited after SIGTERM");
                    return ExitOutcome::Terminated;
                }
                Ok(Err(e)) => {
                    tracing::warn!(encoder = %self.label, error = %e, "Failed waiting for encoder");
                }
                Err(_) => {
                    tracing::debug!(encoder = %self.label, pid = self.pid, ?grace, "Encoder ignored SIGTERM");
                }
            }
        }

        if let Err(e) = self.child.start_kill() {
            tracing::debug!(encoder = %self.label, error = %e, "SIGKILL failed");
        }
        if let Err(e) = self.child.wait().await {
            tracing::warn!(encoder = %self.label, error = %e, "Failed reaping encoder");
        }
        ExitOutcome::Killed
    }

    #[cfg(unix)]
    fn send_sigterm(&self) -> bool {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.pid else {
            return false;
        };
        match i32::try_from(pid) {
            Ok(raw) => kill(Pid::from_raw(raw), Signal::SIGTERM).is_ok(),
            Err(_) => false,
        }
    }

    #[cfg(not(unix))]
    fn send_sigterm(&self) -> bool {
        false
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    fn is_gone(pid: u32) -> bool {
        kill(Pid::from_raw(pid as i32), None) == Err(Errno::ESRCH)
    }

    #[tokio::test]
    async fn test_terminate_cooperative_process() {
        let mut process = EncoderCommand::new("sleep").arg("30").spawn("test").unwrap();
        let pid = process.pid().unwrap();

        let outcome = process.terminate(Duration::from_secs(5)).await;
        assert_eq!(outcome, ExitOutcome::Terminated);
        assert!(is_gone(pid));
    }

    #[tokio::test]
    async fn test_terminate_escalates_to_kill() {
        let mut process = EncoderCommand::new("sh")
            .args(["-c", "trap '' TERM; while :; do sleep 0.1; done"])
            .spawn("stubborn")
            .unwrap();
        let pid = process.pid().unwrap();
        // Give the shell time to install the trap.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let started = std::time::Instant::now();
        let outcome = process.terminate(Duration::from_millis(300)).await;
        assert_eq!(outcome, ExitOutcome::Killed);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(is_gone(pid));
    }

    #[tokio::test]
    async fn test_terminate_after_natural_exit() {
        let mut process = EncoderCommand::new("sh")
            .args(["-c", "exit 3"])
            .spawn("quick")
            .unwrap();
        let status = process.wait().await.unwrap();
        assert_eq!(status.code(), Some(3));

        let outcome = process.terminate(Duration::from_secs(1)).await;
        assert_matches!(outcome, ExitOutcome::Exited(status) if status.code() == Some(3));
    }

    #[tokio::test]
    async fn test_spawn_missing_program() {
        let result = EncoderCommand::new("nonexistent_encoder_12345").spawn("missing");
        assert_matches!(result, Err(Error::ToolNotFound { .. }));
    }

    #[tokio::test]
    async fn test_pipes_are_available_when_requested() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let mut process = EncoderCommand::new("cat")
            .pipe_stdin()
            .pipe_stdout()
            .spawn("cat")
            .unwrap();
        let mut stdin = process.take_stdin().unwrap();
        let mut stdout = process.take_stdout().unwrap();

        stdin.write_all(b"hello").await.unwrap();
        drop(stdin);

        let mut buf = Vec::new();
        stdout.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"hello");
        assert!(process.wait().await.unwrap().success());
    }
}
