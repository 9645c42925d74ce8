//! OpenOCD bridge lifecycle
//!
//! Spawns the probe bridge with its output redirected to a log file, and
//! tears it down with a graceful-then-forced shutdown so a wedged probe
//! never outlives the session.

use log::{debug, info, warn};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::probe::profile::{ProbeProfile, SCRIPT_SEARCH_PATH};

/// How long a graceful termination request may take before escalation
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// Poll interval while waiting for the child to exit
const WAIT_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to create probe log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to launch `{program}`: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("probe process error: {0}")]
    Io(#[from] std::io::Error),
}

/// Command line for the probe bridge, derived from a profile
#[derive(Debug, Clone)]
pub struct ProbeCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ProbeCommand {
    /// OpenOCD invocation for `profile`
    pub fn from_profile(profile: &ProbeProfile) -> Self {
        Self {
            program: "openocd".to_string(),
            args: vec![
                "-s".to_string(),
                SCRIPT_SEARCH_PATH.to_string(),
                "-f".to_string(),
                profile.interface_cfg.clone(),
                "-f".to_string(),
                profile.target_cfg.clone(),
                "-c".to_string(),
                format!("adapter speed {}", profile.adapter_speed_khz),
            ],
        }
    }

    /// Launch the bridge with stdout and stderr redirected to `log_path`.
    ///
    /// The log file is created or truncated; its parent directory must
    /// exist. Launch failure is fatal to the caller. Once running, the
    /// process is only observed through the log file and the serial link.
    pub fn spawn(&self, log_path: &Path) -> Result<ProbeHandle, ProbeError> {
        let log = File::create(log_path).map_err(|source| ProbeError::LogFile {
            path: log_path.to_path_buf(),
            source,
        })?;
        let stderr_log = log.try_clone().map_err(|source| ProbeError::LogFile {
            path: log_path.to_path_buf(),
            source,
        })?;

        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(stderr_log))
            .spawn()
            .map_err(|source| ProbeError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        info!(
            "started {} (pid {}), logging to {}",
            self.program,
            child.id(),
            log_path.display()
        );

        Ok(ProbeHandle {
            child,
            program: self.program.clone(),
            shut_down: false,
        })
    }
}

/// A running probe bridge.
///
/// [`shutdown`](Self::shutdown) runs once, after the serial channel is
/// closed. `Drop` force-kills anything still running as a backstop for
/// early-return paths.
#[derive(Debug)]
pub struct ProbeHandle {
    child: Child,
    program: String,
    shut_down: bool,
}

impl ProbeHandle {
    /// Process id of the bridge
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Graceful-then-forced termination.
    ///
    /// Requests termination, waits up to [`SHUTDOWN_GRACE`] for the
    /// process to exit, then kills it. Escalation is logged, not an error.
    pub fn shutdown(mut self) -> Result<ExitStatus, ProbeError> {
        self.shutdown_with_grace(SHUTDOWN_GRACE)
    }

    fn shutdown_with_grace(&mut self, grace: Duration) -> Result<ExitStatus, ProbeError> {
        self.shut_down = true;

        if let Some(status) = self.child.try_wait()? {
            debug!("{} already exited: {}", self.program, status);
            return Ok(status);
        }

        self.request_terminate();

        let deadline = Instant::now() + grace;
        loop {
            if let Some(status) = self.child.try_wait()? {
                debug!("{} exited after terminate: {}", self.program, status);
                return Ok(status);
            }
            if Instant::now() >= deadline {
                break;
            }
            thread::sleep(WAIT_POLL);
        }

        warn!(
            "{} ignored termination for {:?}, killing",
            self.program, grace
        );
        self.child.kill()?;
        Ok(self.child.wait()?)
    }

    #[cfg(unix)]
    fn request_terminate(&mut self) {
        let pid = self.child.id() as libc::pid_t;
        if unsafe { libc::kill(pid, libc::SIGTERM) } != 0 {
            warn!(
                "SIGTERM to pid {} failed: {}",
                pid,
                std::io::Error::last_os_error()
            );
        }
    }

    #[cfg(not(unix))]
    fn request_terminate(&mut self) {
        // No termination signal on this platform; the grace loop still
        // gives the process a chance to exit before the kill applies.
    }
}

impl Drop for ProbeHandle {
    fn drop(&mut self) {
        if self.shut_down {
            return;
        }
        if self.child.try_wait().ok().flatten().is_none() {
            warn!("{} still running at drop, killing", self.program);
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
