use crate::input::Input;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Return code of a target killed by SIGSEGV (negated signal number).
pub const SEGV_RETURN_CODE: i32 = -11;

/// Flag passed to the target ahead of the input path.
pub const TARGET_INPUT_FLAG: &str = "-x";

const TIMEOUT_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    /// The target terminated on its own. Killed-by-signal is encoded as the
    /// negated signal number.
    Exited { return_code: i32 },
    /// The target outlived the configured timeout and was killed.
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub crashed: bool,
}

impl ExecutionResult {
    pub fn from_return_code(return_code: i32) -> Self {
        Self {
            status: ExecutionStatus::Exited { return_code },
            crashed: classify(return_code),
        }
    }

    pub fn timed_out() -> Self {
        Self {
            status: ExecutionStatus::Timeout,
            crashed: false,
        }
    }
}

/// Only a segmentation violation counts as a crash. Other signals and
/// non-zero exit codes do not.
pub fn classify(return_code: i32) -> bool {
    return_code == SEGV_RETURN_CODE
}

/// Collapses an [`ExitStatus`] into a single signed return code: the exit code
/// for a normal exit, or the negated signal number on Unix.
pub fn return_code(status: &ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    status.code().unwrap_or(-1)
}

#[derive(Error, Debug)]
pub enum ExecutorError {
    /// The target could not be started (missing, not executable, ...).
    #[error("Failed to spawn target {target:?}: {source}")]
    Spawn {
        target: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A bare target name matched no executable on `PATH`.
    #[error("Target {target:?} was not found on PATH: {source}")]
    NotFound {
        target: PathBuf,
        #[source]
        source: which::Error,
    },

    /// The target path exists but is not something that can be executed.
    #[error("Target {0:?} is not an executable file")]
    NotExecutable(PathBuf),

    /// The per-case input file could not be created or written.
    #[error("Failed to stage input for case {case_id} in {dir:?}: {source}")]
    Scratch {
        case_id: u64,
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Waiting on, or killing, the target failed.
    #[error("Failed to wait on target for case {case_id}: {source}")]
    Wait {
        case_id: u64,
        #[source]
        source: std::io::Error,
    },
}

/// Runs the target once against one input.
///
/// Implementations must be shareable across worker threads: the pool calls
/// `execute_sync` concurrently from up to `max_workers` threads.
pub trait Executor<I: Input>: Send + Sync {
    fn execute_sync(&self, input: &I, case_id: u64) -> Result<ExecutionResult, ExecutorError>;
}

#[derive(Debug, Clone)]
pub struct CommandExecutorConfig {
    pub target: PathBuf,
    /// Directory holding the per-case input files.
    pub scratch_dir: PathBuf,
    /// `None` waits for the target forever.
    pub timeout: Option<Duration>,
}

/// Runs an external target as `<target> -x <input-file>` in its own process.
#[derive(Debug)]
pub struct CommandExecutor {
    config: CommandExecutorConfig,
}

impl CommandExecutor {
    pub fn new(config: CommandExecutorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CommandExecutorConfig {
        &self.config
    }

    /// Checks that the target can plausibly be executed. Bare command names
    /// must resolve to an executable on `PATH`.
    pub fn preflight(&self) -> Result<(), ExecutorError> {
        let target = &self.config.target;
        if !has_directory_part(target) {
            let resolved = which::which(target).map_err(|e| ExecutorError::NotFound {
                target: target.clone(),
                source: e,
            })?;
            log::debug!("Target {target:?} resolves to {resolved:?}");
            return Ok(());
        }
        let metadata = fs::metadata(target).map_err(|e| ExecutorError::Spawn {
            target: target.clone(),
            source: e,
        })?;
        if !metadata.is_file() {
            return Err(ExecutorError::NotExecutable(target.clone()));
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if metadata.permissions().mode() & 0o111 == 0 {
                return Err(ExecutorError::NotExecutable(target.clone()));
            }
        }
        Ok(())
    }

    fn wait_with_timeout(
        &self,
        mut child: Child,
        timeout: Duration,
        case_id: u64,
    ) -> Result<ExecutionResult, ExecutorError> {
        let start_time = Instant::now();
        let wait_error = |e| ExecutorError::Wait {
            case_id,
            source: e,
        };

        loop {
            match child.try_wait().map_err(wait_error)? {
                Some(status) => return Ok(ExecutionResult::from_return_code(return_code(&status))),
                None => {
                    if start_time.elapsed() > timeout {
                        log::warn!("Case {case_id} timed out after {timeout:?}, killing target");
                        kill_and_reap(&mut child).map_err(wait_error)?;
                        return Ok(ExecutionResult::timed_out());
                    }
                    std::thread::sleep(TIMEOUT_POLL_INTERVAL);
                }
            }
        }
    }
}

/// Kills `child` and waits for it. If the kill itself fails the child is
/// still reaped when it has already exited.
fn kill_and_reap(child: &mut Child) -> std::io::Result<()> {
    if let Err(e) = child.kill() {
        if let Err(reap_err) = child.try_wait() {
            log::debug!("Could not reap target after failed kill: {reap_err}");
        }
        return Err(e);
    }
    child.wait().map(|_| ())
}

fn has_directory_part(path: &Path) -> bool {
    path.parent().is_some_and(|p| !p.as_os_str().is_empty())
}

impl<I: Input> Executor<I> for CommandExecutor {
    fn execute_sync(&self, input: &I, case_id: u64) -> Result<ExecutionResult, ExecutorError> {
        let scratch_error = |e| ExecutorError::Scratch {
            case_id,
            dir: self.config.scratch_dir.clone(),
            source: e,
        };

        let mut scratch_file = tempfile::Builder::new()
            .prefix(&format!("rupture-case{case_id}-"))
            .tempfile_in(&self.config.scratch_dir)
            .map_err(scratch_error)?;
        scratch_file
            .write_all(input.as_bytes())
            .and_then(|_| scratch_file.flush())
            .map_err(scratch_error)?;
        // Closes the handle; the file itself is removed when `input_path` drops,
        // on every return path below.
        let input_path = scratch_file.into_temp_path();

        let child = Command::new(&self.config.target)
            .arg(TARGET_INPUT_FLAG)
            .arg(&*input_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| ExecutorError::Spawn {
                target: self.config.target.clone(),
                source: e,
            })?;

        let result = match self.config.timeout {
            Some(timeout) => self.wait_with_timeout(child, timeout, case_id)?,
            None => {
                let mut child = child;
                let status = child.wait().map_err(|e| ExecutorError::Wait {
                    case_id,
                    source: e,
                })?;
                ExecutionResult::from_return_code(return_code(&status))
            }
        };

        if let Err(e) = input_path.close() {
            log::warn!("Failed to remove input file for case {case_id}: {e}");
        }
        Ok(result)
    }
}
