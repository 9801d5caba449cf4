//! Start and stop the servers under test.
//!
//! The servers are external processes driven by two shell commands. The start command
//! is fired and forgotten: the servers are expected to keep running until the stop
//! command brings them down. Scenario options reach the servers as environment
//! variables, see [`server_environment`].

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

use crate::config::ScenarioOptions;
use crate::StampedeError;

/// Children spawned by each application pool member.
pub const POOL_CHILDREN_VAR: &str = "PHP_FCGI_CHILDREN";
/// Requests served by a child before it is recycled.
pub const POOL_MAX_REQUESTS_VAR: &str = "PHP_FCGI_MAX_REQUESTS";
/// The configured response delay, comma separated when it is a list.
pub const RESPONSE_DELAY_VAR: &str = "RESPONSE_DELAY_SECONDS";

/// Lifecycle of the servers under test.
#[async_trait]
pub trait ProcessControl: Send + Sync {
    /// Launch the servers with `env` added to their environment.
    async fn start(&self, env: &[(String, String)]) -> Result<(), StampedeError>;

    /// Bring the servers down.
    async fn stop(&self) -> Result<(), StampedeError>;

    /// Remove the logs left by earlier runs.
    async fn clean_logs(&self) -> Result<(), StampedeError>;
}

/// The environment variables passed to the start command for a scenario.
pub fn server_environment(options: &ScenarioOptions) -> Vec<(String, String)> {
    vec![
        (
            POOL_CHILDREN_VAR.to_string(),
            options.pool_children.to_string(),
        ),
        (
            POOL_MAX_REQUESTS_VAR.to_string(),
            options.pool_max_requests.to_string(),
        ),
        (
            RESPONSE_DELAY_VAR.to_string(),
            options.response_delay.to_string(),
        ),
    ]
}

/// Runs the configured start and stop commands from a working directory.
#[derive(Clone, Debug)]
pub struct ShellProcessControl {
    start_command: String,
    stop_command: String,
    work_dir: PathBuf,
    log_dir: PathBuf,
}

impl ShellProcessControl {
    pub fn new(
        start_command: &str,
        stop_command: &str,
        work_dir: impl Into<PathBuf>,
        log_dir: impl Into<PathBuf>,
    ) -> Self {
        ShellProcessControl {
            start_command: start_command.to_string(),
            stop_command: stop_command.to_string(),
            work_dir: work_dir.into(),
            log_dir: log_dir.into(),
        }
    }

    fn command(&self, command_line: &str) -> Result<Command, StampedeError> {
        let mut parts = command_line.split_whitespace();
        let program = parts.next().ok_or_else(|| StampedeError::Process {
            command: command_line.to_string(),
            detail: "empty command".to_string(),
        })?;

        let mut command = Command::new(program);
        command.args(parts).current_dir(&self.work_dir);
        Ok(command)
    }
}

#[async_trait]
impl ProcessControl for ShellProcessControl {
    async fn start(&self, env: &[(String, String)]) -> Result<(), StampedeError> {
        let mut command = self.command(&self.start_command)?;
        command
            .envs(env.iter().map(|(key, value)| (key, value)))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let mut child = command.spawn().map_err(|e| StampedeError::Process {
            command: self.start_command.clone(),
            detail: e.to_string(),
        })?;
        info!("started servers: {}", self.start_command);

        // Reap the start command whenever it exits.
        let start_command = self.start_command.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => debug!("{} exited", start_command),
                Ok(status) => warn!("{} exited with {}", start_command, status),
                Err(e) => warn!("failed to wait for {}: {}", start_command, e),
            }
        });

        Ok(())
    }

    async fn stop(&self) -> Result<(), StampedeError> {
        let output = self
            .command(&self.stop_command)?
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| StampedeError::Process {
                command: self.stop_command.clone(),
                detail: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(StampedeError::Process {
                command: self.stop_command.clone(),
                detail: format!(
                    "{}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        info!("stopped servers: {}", self.stop_command);

        Ok(())
    }

    async fn clean_logs(&self) -> Result<(), StampedeError> {
        let log_dir = self.work_dir.join(&self.log_dir);
        let mut entries = match tokio::fs::read_dir(&log_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no log directory at {}", log_dir.display());
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                tokio::fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }
        debug!("removed {} log files from {}", removed, log_dir.display());

        Ok(())
    }
}
