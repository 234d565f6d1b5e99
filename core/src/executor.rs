use std::path::PathBuf;
use std::process::Stdio;

use privd_protocol::BrokerError;
use tokio::process::Command;
use tracing::debug;
use tracing::warn;

use crate::validator::is_valid_command;

/// Outcome of one command run. The executor never returns an error: every
/// spawn or IO failure is encoded here, with `exit_code` -1 and the
/// underlying message in `stderr`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandResult {
    fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: error.into(),
            exit_code: -1,
        }
    }

    /// The message a client should see on failure: the captured stderr, or a
    /// generic exit-code note when the command produced none.
    pub fn error_message(&self) -> String {
        if self.stderr.is_empty() {
            format!("command failed with exit code {}", self.exit_code)
        } else {
            self.stderr.clone()
        }
    }
}

/// Runs commands, either directly or through the configured elevation
/// helper. Elevation is fully delegated: the daemon itself never changes
/// privilege, it hands the validated command text to the helper as one
/// opaque argument.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    helper: PathBuf,
}

impl CommandExecutor {
    pub fn new(helper: PathBuf) -> Self {
        Self { helper }
    }

    /// Runs a command without elevation. The line is split with shell-style
    /// word rules and spawned directly, not through a shell.
    pub async fn execute(&self, command: &str) -> CommandResult {
        let Some(words) = shlex::split(command) else {
            return CommandResult::failure("unparsable command line");
        };
        let Some((program, args)) = words.split_first() else {
            return CommandResult::failure("empty command");
        };
        run_captured(PathBuf::from(program.as_str()), args).await
    }

    /// Validates the command and runs it through the elevation helper as
    /// `<helper> -c <command>`, the command as a single argument so it is
    /// never reassembled by a second shell. Fails closed on validation.
    pub async fn execute_elevated(&self, command: &str) -> CommandResult {
        if !is_valid_command(command) {
            warn!("rejected command: {command:?}");
            return CommandResult::failure(BrokerError::InvalidCommand.to_string());
        }
        debug!("elevating: {command:?}");
        run_captured(self.helper.clone(), &["-c".to_string(), command.to_string()]).await
    }

    /// Probes whether the helper actually grants uid 0.
    pub async fn elevation_available(&self) -> bool {
        let result = run_captured(
            self.helper.clone(),
            &["-c".to_string(), "id".to_string()],
        )
        .await;
        result.success && result.stdout.contains("uid=0")
    }
}

async fn run_captured(program: PathBuf, args: &[String]) -> CommandResult {
    let output = Command::new(&program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await;
    match output {
        Ok(output) => {
            let exit_code = output.status.code().unwrap_or(-1);
            CommandResult {
                success: output.status.success(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                exit_code,
            }
        }
        Err(err) => {
            warn!("failed to spawn {}: {err}", program.display());
            CommandResult::failure(err.to_string())
        }
    }
}
