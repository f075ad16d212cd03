//! Shared child-process plumbing for the CLI-scraping strategies.

use tokio::process::Command;

use crate::error::CollectError;

/// Run a command and return its stdout as UTF-8 (lossy).
pub async fn run_command(program: &str, args: &[&str]) -> Result<String, CollectError> {
    let command = display(program, args);
    let output = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| CollectError::Command {
            command: command.clone(),
            source,
        })?;
    if !output.status.success() {
        return Err(CollectError::CommandFailed {
            command,
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Like [`run_command`], but a missing binary is `Ok(None)` instead of
/// an error (vtysh is optional on most targets).
pub async fn run_optional_command(
    program: &str,
    args: &[&str],
) -> Result<Option<String>, CollectError> {
    match run_command(program, args).await {
        Ok(stdout) => Ok(Some(stdout)),
        Err(CollectError::Command { ref source, .. })
            if source.kind() == std::io::ErrorKind::NotFound =>
        {
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn display(program: &str, args: &[&str]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{program} {}", args.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_binary_is_none_for_optional_commands() {
        let result = run_optional_command("definitely-not-a-real-binary-xyz", &[])
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn missing_binary_is_an_error_for_required_commands() {
        let err = run_command("definitely-not-a-real-binary-xyz", &["arg"])
            .await
            .unwrap_err();
        assert!(matches!(err, CollectError::Command { .. }));
    }
}
