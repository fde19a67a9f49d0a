//! Server process handle

use crate::runtime::relay::{OutputRelay, StdioRelay};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};

/// Server executable names looked up in the base directory, in order
pub const SERVER_EXECUTABLES: [&str; 2] = ["AssettoServer.exe", "AssettoServer"];

/// Application directory inside the docker image
pub const DOCKER_APP_DIR: &str = "/app";

/// Flag telling the server to load plugins from its working directory
pub const PLUGINS_FROM_WORKDIR_ARG: &str = "--plugins-from-workdir";

/// How long an exited child's output may take to flush
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Command line for a server instance
pub fn server_args(preset: Option<&str>, docker: bool) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(preset) = preset.map(str::trim).filter(|p| !p.is_empty()) {
        args.push(format!("--preset={}", preset));
    }
    if docker {
        args.push(PLUGINS_FROM_WORKDIR_ARG.to_string());
    }
    args
}

/// Find the server executable for the given mode
pub fn locate_executable(base: &Path, docker: bool) -> Result<PathBuf, ProcessError> {
    let dir = if docker { Path::new(DOCKER_APP_DIR) } else { base };
    let searched: Vec<PathBuf> = SERVER_EXECUTABLES.iter().map(|name| dir.join(name)).collect();

    searched
        .iter()
        .find(|path| path.is_file())
        .cloned()
        .ok_or(ProcessError::ExecutableNotFound { searched })
}

/// How a server instance is launched
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    pub executable: PathBuf,
    pub working_dir: PathBuf,
    pub docker: bool,
}

/// Bounded termination: signal, wait `interval`, repeat up to `attempts` times
#[derive(Debug, Clone)]
pub struct StopPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for StopPolicy {
    fn default() -> Self {
        Self {
            attempts: 30,
            interval: Duration::from_millis(500),
        }
    }
}

/// Observed process state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Running,
    Exited(Option<i32>),
}

/// The running server instance
///
/// Replaced, never reused: a restart stops this handle and spawns a new one.
pub struct ServerProcess {
    preset: Option<String>,
    args: Vec<String>,
    pid: u32,
    child: Child,
    output: Option<OutputRelay>,
    relay: Option<StdioRelay>,
}

impl ServerProcess {
    /// Launch the server with `preset`, relaying stdio when `relay` is given
    pub async fn spawn(
        config: &ProcessConfig,
        preset: Option<String>,
        relay: Option<&StdioRelay>,
    ) -> Result<Self, ProcessError> {
        let args = server_args(preset.as_deref(), config.docker);
        log::info!(
            "Starting server: {} {}",
            config.executable.display(),
            args.join(" ")
        );

        let mut cmd = Command::new(&config.executable);
        cmd.args(&args)
            .current_dir(&config.working_dir)
            .kill_on_drop(true);

        if relay.is_some() {
            cmd.stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());
        } else {
            cmd.stdin(Stdio::null());
        }

        let mut child = cmd.spawn().map_err(|e| ProcessError::SpawnFailed {
            executable: config.executable.clone(),
            source: e,
        })?;
        let pid = child.id().unwrap_or(0);

        let output = match relay {
            Some(relay) => Some(relay.attach(&mut child).await),
            None => None,
        };

        Ok(Self {
            preset,
            args,
            pid,
            child,
            output,
            relay: relay.cloned(),
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn preset(&self) -> Option<&str> {
        self.preset.as_deref()
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Non-blocking exit check
    pub fn status(&mut self) -> ProcessStatus {
        match self.child.try_wait() {
            Ok(Some(status)) => ProcessStatus::Exited(status.code()),
            Ok(None) => ProcessStatus::Running,
            Err(e) => {
                log::error!("Error checking server (PID {}) status: {}", self.pid, e);
                ProcessStatus::Running
            }
        }
    }

    /// Terminate the server, retrying until it exits or the policy is exhausted
    pub async fn stop(mut self, policy: &StopPolicy) -> Result<Option<i32>, ProcessError> {
        log::info!("Stopping server (PID {})...", self.pid);
        let attempts = policy.attempts.max(1);

        for attempt in 1..=attempts {
            match self.child.try_wait() {
                Ok(Some(status)) => return Ok(self.finish(status).await),
                Ok(None) => {}
                Err(e) => {
                    return Err(ProcessError::Wait {
                        pid: self.pid,
                        source: e,
                    })
                }
            }

            self.request_termination(attempt);

            match tokio::time::timeout(policy.interval, self.child.wait()).await {
                Ok(Ok(status)) => return Ok(self.finish(status).await),
                Ok(Err(e)) => {
                    return Err(ProcessError::Wait {
                        pid: self.pid,
                        source: e,
                    })
                }
                Err(_) => log::debug!(
                    "Server (PID {}) still running after attempt {}/{}",
                    self.pid,
                    attempt,
                    attempts
                ),
            }
        }

        log::error!(
            "Server (PID {}) did not exit after {} termination attempts",
            self.pid,
            attempts
        );
        Err(ProcessError::StopTimeout {
            pid: self.pid,
            attempts,
        })
    }

    /// SIGTERM first on unix, forceful kill afterwards
    fn request_termination(&mut self, attempt: u32) {
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if attempt == 1 && kill(Pid::from_raw(self.pid as i32), Signal::SIGTERM).is_ok() {
                return;
            }
        }

        #[cfg(not(unix))]
        let _ = attempt;

        if let Err(e) = self.child.start_kill() {
            log::debug!("Kill request for PID {} failed: {}", self.pid, e);
        }
    }

    async fn finish(&mut self, status: ExitStatus) -> Option<i32> {
        if let Some(relay) = &self.relay {
            relay.detach().await;
        }
        if let Some(output) = self.output.take() {
            output.drain(OUTPUT_DRAIN_TIMEOUT).await;
        }

        let code = status.code();
        log::info!("Server (PID {}) exited with code: {:?}", self.pid, code);
        code
    }
}

/// Errors that can occur with the server process
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Server executable not found (searched: {})", display_paths(.searched))]
    ExecutableNotFound { searched: Vec<PathBuf> },

    #[error("Failed to spawn '{}': {source}", .executable.display())]
    SpawnFailed {
        executable: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Server (PID {pid}) still running after {attempts} termination attempts")]
    StopTimeout { pid: u32, attempts: u32 },

    #[error("Error waiting for server (PID {pid}): {source}")]
    Wait {
        pid: u32,
        #[source]
        source: std::io::Error,
    },
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
