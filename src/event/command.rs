//! Runs an external command when the inactivity timeout is reached.

use async_trait::async_trait;
use serde::Deserialize;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{Event, EventHandler};
use crate::config::decode_section;
use crate::error::HandlerError;

const SECTION: &str = "inactivetimeout";

#[derive(Debug, Deserialize)]
struct InactiveTimeoutSection {
    command: Option<CommandSection>,
}

#[derive(Debug, Deserialize)]
struct CommandSection {
    command: Option<String>,
    #[serde(default)]
    parameters: Vec<String>,
    /// Seconds the command may run before it is killed.
    timeout: Option<u64>,
}

/// Spawns `command parameters...` with the daemon's own stdout and stderr,
/// and waits for it to finish.
#[derive(Debug, Default)]
pub struct CommandHandler {
    command: String,
    parameters: Vec<String>,
    timeout: Option<Duration>,
}

impl CommandHandler {
    pub fn new() -> Self {
        Self::default()
    }

    fn build_command(&self) -> Command {
        let mut command = Command::new(&self.command);
        command
            .args(&self.parameters)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        command
    }

    async fn run(&self) -> Result<(), HandlerError> {
        let started = Instant::now();
        info!(command = %self.command, args = ?self.parameters, "Running inactivity command");

        let mut child = self.build_command().spawn().map_err(|source| HandlerError::Spawn {
            command: self.command.clone(),
            source,
        })?;

        let status = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    if let Err(e) = child.kill().await {
                        warn!(command = %self.command, "Failed to kill timed out command: {}", e);
                    }
                    return Err(HandlerError::Timeout {
                        command: self.command.clone(),
                        timeout: limit,
                    });
                }
            },
            None => child.wait().await?,
        };

        info!(
            command = %self.command,
            exit_code = ?status.code(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Inactivity command completed"
        );

        if status.success() {
            Ok(())
        } else {
            Err(HandlerError::ExitStatus {
                command: self.command.clone(),
                status,
            })
        }
    }
}

#[async_trait]
impl EventHandler for CommandHandler {
    fn name(&self) -> &str {
        "command"
    }

    fn configure(&mut self, eventhandler: &toml::Table) -> bool {
        let section: InactiveTimeoutSection = match decode_section(eventhandler, SECTION) {
            Ok(section) => section,
            Err(e) => {
                debug!("Command handler disabled: {}", e);
                return false;
            }
        };

        let Some(command) = section.command else {
            debug!("No '{}.command' section found", SECTION);
            return false;
        };

        match command.command {
            Some(program) if !program.trim().is_empty() => {
                self.command = program;
                self.parameters = command.parameters;
                self.timeout = command.timeout.filter(|s| *s > 0).map(Duration::from_secs);
                info!(
                    "command handler config: command={}, parameters={:?}, timeout={:?}",
                    self.command, self.parameters, self.timeout
                );
                true
            }
            _ => {
                warn!("'{}.command' has no command, handler disabled", SECTION);
                false
            }
        }
    }

    async fn handle(&mut self, event: &Event) -> Result<(), HandlerError> {
        match event {
            Event::InactiveTimeout { .. } => self.run().await,
            Event::ActivityResumed { .. } => Ok(()),
        }
    }
}
