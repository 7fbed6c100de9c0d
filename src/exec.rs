//! Bounded-time script execution.
use std::io::Read as _;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::ScriptError;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Result of a script execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecResult {
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Whether the script exited with status 0.
    pub success: bool,
    /// Exit code, `None` when killed by a signal or on timeout.
    pub code: Option<i32>,
    /// Whether the script was killed for exceeding its timeout.
    pub timed_out: bool,
}

impl ExecResult {
    /// A successful result with the given stdout.
    #[must_use]
    pub fn ok(stdout: &str) -> Self {
        Self {
            stdout: stdout.to_string(),
            success: true,
            code: Some(0),
            ..Self::default()
        }
    }

    /// A failed result with the given exit code and stderr.
    #[must_use]
    pub fn failed(code: i32, stderr: &str) -> Self {
        Self {
            stderr: stderr.to_string(),
            code: Some(code),
            ..Self::default()
        }
    }

    /// Stdout followed by stderr.
    #[must_use]
    pub fn combined(&self) -> String {
        match (self.stdout.trim_end(), self.stderr.trim_end()) {
            ("", err) => err.to_string(),
            (out, "") => out.to_string(),
            (out, err) => format!("{out}\n{err}"),
        }
    }

    /// Convert a non-success result into the matching [`ScriptError`].
    ///
    /// # Errors
    ///
    /// Returns [`ScriptError::TimedOut`] or [`ScriptError::Failed`] unless the
    /// script succeeded.
    pub fn into_checked(self, script: &str, timeout: Duration) -> Result<Self, ScriptError> {
        if self.timed_out {
            return Err(ScriptError::TimedOut {
                script: script.to_string(),
                timeout,
            });
        }
        if !self.success {
            return Err(ScriptError::Failed {
                script: script.to_string(),
                code: self.code,
                output: self.combined(),
            });
        }
        Ok(self)
    }
}

/// Trait for running module scripts, enabling test doubles.
#[cfg_attr(test, mockall::automock)]
pub trait Executor: Send + Sync {
    /// Run `sh <script>` in `dir` with `env` added to the inherited
    /// environment.  Stdin is inherited so scripts may prompt; stdout and
    /// stderr are captured.  Once `timeout` elapses the script and every
    /// process it started are killed.
    ///
    /// A non-zero exit or timeout is reported through the returned
    /// [`ExecResult`], not as an error.
    ///
    /// # Errors
    ///
    /// Returns [`ScriptError::Spawn`] if the process cannot be started or
    /// waited on.
    fn run_script(
        &self,
        script: &Path,
        dir: &Path,
        env: &[(String, String)],
        timeout: Duration,
    ) -> Result<ExecResult, ScriptError>;

    /// Check if a program is available on `PATH`.
    fn which(&self, program: &str) -> bool;
}

/// Executor backed by real subprocesses.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemExecutor;

impl Executor for SystemExecutor {
    fn run_script(
        &self,
        script: &Path,
        dir: &Path,
        env: &[(String, String)],
        timeout: Duration,
    ) -> Result<ExecResult, ScriptError> {
        let label = script_label(script);
        let spawn_err = |source| ScriptError::Spawn {
            script: label.clone(),
            source,
        };

        let mut command = Command::new("sh");
        command
            .arg(script)
            .current_dir(dir)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        process_group::isolate(&mut command);
        let mut child = command.spawn().map_err(spawn_err)?;
        #[cfg(unix)]
        let foreground = process_group::Foreground::hand_to(&child);

        let stdout = capture(child.stdout.take());
        let stderr = capture(child.stderr.take());

        let deadline = Instant::now() + timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break Some(status),
                Ok(None) if Instant::now() >= deadline => {
                    kill(&mut child);
                    break None;
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(source) => {
                    kill(&mut child);
                    return Err(spawn_err(source));
                }
            }
        };

        #[cfg(unix)]
        {
            drop(foreground);
            if let Some(status) = status {
                process_group::forward_interrupt(status);
            }
        }

        // Readers finish once the pipes close.  After a timeout a grandchild
        // may still hold them open, so take what was captured without joining.
        let finished = status.is_some();
        let result = ExecResult {
            stdout: stdout.collect(finished),
            stderr: stderr.collect(finished),
            success: status.is_some_and(|s| s.success()),
            code: status.and_then(|s| s.code()),
            timed_out: !finished,
        };
        tracing::debug!(
            "{label} exited: success={} code={:?} timed_out={}",
            result.success,
            result.code,
            result.timed_out
        );
        Ok(result)
    }

    fn which(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }
}

/// File name of a script, for messages.
#[must_use]
pub fn script_label(script: &Path) -> String {
    script.file_name().map_or_else(
        || script.display().to_string(),
        |n| n.to_string_lossy().into_owned(),
    )
}

/// Kill the script and, on unix, everything it started.
fn kill(child: &mut Child) {
    #[cfg(unix)]
    process_group::kill(child);
    child.kill().ok();
    child.wait().ok();
}

/// Each script runs as the leader of its own process group.
///
/// A timeout then stops the whole group, not only `sh`.  When stdin is a
/// terminal the group is made the terminal's foreground group while it runs
/// so scripts can still prompt.
#[cfg(unix)]
mod process_group {
    use std::io::IsTerminal as _;
    use std::os::unix::process::{CommandExt as _, ExitStatusExt as _};
    use std::process::{Child, Command, ExitStatus};

    use nix::sys::signal::{SigSet, SigmaskHow, Signal, killpg, pthread_sigmask, raise};
    use nix::unistd::{Pid, getpgrp, tcgetpgrp, tcsetpgrp};

    pub(super) fn isolate(command: &mut Command) {
        command.process_group(0);
    }

    fn group_of(child: &Child) -> Option<Pid> {
        i32::try_from(child.id()).ok().map(Pid::from_raw)
    }

    pub(super) fn kill(child: &Child) {
        if let Some(group) = group_of(child) {
            killpg(group, Signal::SIGKILL).ok();
        }
    }

    /// Ctrl-C reaches only the foreground group; pass it on to this process
    /// so the interrupt handler still sees it.
    pub(super) fn forward_interrupt(status: ExitStatus) {
        if status.signal() == Some(Signal::SIGINT as i32) {
            raise(Signal::SIGINT).ok();
        }
    }

    /// Terminal foreground handed to a script's group, returned on drop.
    #[derive(Debug)]
    pub(super) struct Foreground {
        previous: Option<Pid>,
    }

    impl Foreground {
        pub(super) fn hand_to(child: &Child) -> Self {
            let stdin = std::io::stdin();
            let previous = group_of(child).filter(|_| stdin.is_terminal()).and_then(|group| {
                let owner = tcgetpgrp(&stdin).ok().filter(|&owner| owner == getpgrp())?;
                tcsetpgrp(&stdin, group).ok()?;
                // the script may already have stopped on SIGTTIN
                killpg(group, Signal::SIGCONT).ok();
                Some(owner)
            });
            Self { previous }
        }
    }

    impl Drop for Foreground {
        fn drop(&mut self) {
            let Some(owner) = self.previous else {
                return;
            };
            // a background group may only take the terminal with SIGTTOU blocked
            let mut ttou = SigSet::empty();
            ttou.add(Signal::SIGTTOU);
            let mut saved = SigSet::empty();
            if pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&ttou), Some(&mut saved)).is_ok() {
                tcsetpgrp(std::io::stdin(), owner).ok();
                saved.thread_set_mask().ok();
            }
        }
    }
}

/// Output pipe drained on a background thread.
struct Capture {
    buffer: Arc<Mutex<Vec<u8>>>,
    handle: Option<thread::JoinHandle<()>>,
}

fn capture<R: std::io::Read + Send + 'static>(pipe: Option<R>) -> Capture {
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let handle = pipe.map(|mut pipe| {
        let sink = Arc::clone(&buffer);
        thread::spawn(move || {
            let mut chunk = [0u8; 4096];
            while let Ok(n) = pipe.read(&mut chunk) {
                if n == 0 {
                    break;
                }
                if let Ok(mut buf) = sink.lock()
                    && let Some(bytes) = chunk.get(..n)
                {
                    buf.extend_from_slice(bytes);
                }
            }
        })
    });
    Capture { buffer, handle }
}

impl Capture {
    fn collect(self, join: bool) -> String {
        if join && let Some(handle) = self.handle {
            let _ = handle.join();
        }
        let bytes = self
            .buffer
            .lock()
            .map(|b| b.clone())
            .unwrap_or_default();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}
