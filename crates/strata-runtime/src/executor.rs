use std::path::Path;
use std::process::Stdio;

use crate::process::ProcessError;

/// Captured output of a command that exited successfully.
///
/// Tools such as pip report degraded runs (an unreachable index, skipped
/// upgrades) on stderr while still exiting 0, so stderr is kept too.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Abstraction over external command execution for testability.
///
/// Production code uses [`RealExecutor`], tests use mockall-generated mocks.
#[allow(async_fn_in_trait)]
pub trait CommandExecutor: Send + Sync {
    /// Execute a command in `cwd` and capture its output.
    async fn exec(
        &self,
        program: &str,
        args: &[String],
        cwd: &Path,
    ) -> Result<CommandOutput, ProcessError>;
}

/// Real process executor.
pub struct RealExecutor;

impl CommandExecutor for RealExecutor {
    async fn exec(
        &self,
        program: &str,
        args: &[String],
        cwd: &Path,
    ) -> Result<CommandOutput, ProcessError> {
        tracing::debug!(program, ?args, cwd = %cwd.display(), "exec");

        let output = tokio::process::Command::new(program)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ProcessError::NotFound {
                program: program.to_owned(),
                source: e,
            })?;

        if output.status.success() {
            let stdout = String::from_utf8(output.stdout).map_err(|e| ProcessError::InvalidUtf8 {
                program: program.to_owned(),
                source: e,
            })?;
            Ok(CommandOutput {
                stdout,
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            Err(ProcessError::CommandFailed {
                program: program.to_owned(),
                args: args.to_vec(),
                status: output.status.to_string(),
                stderr,
            })
        }
    }
}
