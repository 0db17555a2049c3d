//! Subprocess plumbing shared by the oc, git, jq and docker collaborators

use anyhow::{Context, Result};
use std::path::Path;
use tokio::process::Command as AsyncCommand;
use tracing::debug;

use crate::error::XrError;

/// Trimmed output of a successful command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Run `program args...` to completion.
///
/// A non-zero exit becomes [`XrError::Collaborator`] carrying the captured
/// stderr; failing to spawn the program at all is reported with context.
pub async fn run(program: &str, args: &[&str], cwd: Option<&Path>) -> Result<CommandOutput> {
    let operation = match args.first() {
        Some(sub) => format!("{} {}", program, sub),
        None => program.to_string(),
    };
    debug!("Running {} {:?}", program, args);

    let mut command = AsyncCommand::new(program);
    command.args(args);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    let output = command
        .output()
        .await
        .with_context(|| format!("Failed to execute {}", program))?;

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

    if !output.status.success() {
        let stderr = if stderr.is_empty() {
            format!("exited with {}", output.status)
        } else {
            stderr
        };
        return Err(XrError::Collaborator { operation, stderr }.into());
    }

    Ok(CommandOutput { stdout, stderr })
}
