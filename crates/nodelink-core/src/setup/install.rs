//! External install command

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, instrument};

use crate::config::InstallConfig;
use crate::error::SetupError;

/// Lines of stderr kept when the install command fails
const STDERR_TAIL_LINES: usize = 20;

/// Install command resolved against `PATH`
#[derive(Debug, Clone)]
pub struct InstallCommand {
    program: PathBuf,
    args: Vec<String>,
    command_line: String,
}

impl InstallCommand {
    /// Resolve the configured command, failing if it is not installed
    pub fn resolve(config: &InstallConfig) -> Result<Self, SetupError> {
        let program = which::which(&config.command)
            .map_err(|_| SetupError::CommandNotFound(config.command.clone()))?;
        debug!(command = %config.command, program = %program.display(), "resolved install command");
        Ok(Self {
            program,
            args: config.args.clone(),
            command_line: config.command_line(),
        })
    }

    /// The command line as configured, for display
    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    /// Run the command in `dir` and wait for it to exit
    #[instrument(skip(self), fields(command = %self.command_line))]
    pub async fn run(&self, dir: &Path) -> Result<(), SetupError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| SetupError::SpawnFailed {
                command: self.command_line.clone(),
                dir: dir.to_path_buf(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(SetupError::CommandFailed {
                command: self.command_line.clone(),
                dir: dir.to_path_buf(),
                code: output.status.code().unwrap_or(-1),
                stderr: stderr_tail(&output.stderr, STDERR_TAIL_LINES),
            });
        }

        debug!(dir = %dir.display(), "install command finished");
        Ok(())
    }
}

/// Last `lines` lines of a process's stderr
fn stderr_tail(stderr: &[u8], lines: usize) -> String {
    let text = String::from_utf8_lossy(stderr);
    let all: Vec<&str> = text.trim_end().lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stderr_tail() {
        assert_eq!(stderr_tail(b"one\ntwo\nthree\n", 2), "two\nthree");
        assert_eq!(stderr_tail(b"only", 5), "only");
        assert_eq!(stderr_tail(b"", 5), "");
    }

    #[test]
    fn test_unknown_command_not_found() {
        let config = InstallConfig {
            command: "nodelink-no-such-installer".to_string(),
            ..InstallConfig::default()
        };
        let err = InstallCommand::resolve(&config).unwrap_err();
        assert!(matches!(err, SetupError::CommandNotFound(name) if name == "nodelink-no-such-installer"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_reports_exit_code_and_stderr() {
        let temp = tempfile::TempDir::new().unwrap();
        let config = InstallConfig {
            enabled: true,
            command: "sh".to_string(),
            args: vec!["-c".to_string(), "echo broken >&2; exit 3".to_string()],
        };
        let command = InstallCommand::resolve(&config).unwrap();

        match command.run(temp.path()).await.unwrap_err() {
            SetupError::CommandFailed { code, stderr, .. } => {
                assert_eq!(code, 3);
                assert_eq!(stderr, "broken");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_in_package_dir() {
        let temp = tempfile::TempDir::new().unwrap();
        let config = InstallConfig {
            enabled: true,
            command: "sh".to_string(),
            args: vec!["-c".to_string(), "touch installed".to_string()],
        };
        let command = InstallCommand::resolve(&config).unwrap();

        command.run(temp.path()).await.unwrap();
        assert!(temp.path().join("installed").is_file());
    }
}
