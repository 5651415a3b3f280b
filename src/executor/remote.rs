use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use crate::config::types::SshSettings;
use crate::error::RemoteError;
use crate::resource::descriptor::Server;

/// Output of a remote command.
#[derive(Debug, Clone, Default)]
pub struct RemoteOutput {
    pub exit_code: i32,
    pub stdout_lines: Vec<String>,
    pub stderr_lines: Vec<String>,
}

impl RemoteOutput {
    pub fn stdout(&self) -> String {
        self.stdout_lines.join("\n")
    }

    /// Extract a human-readable error message from the output.
    pub fn error_message(&self) -> String {
        let stderr = self.stderr_lines.join("\n");
        if !stderr.trim().is_empty() {
            return stderr;
        }

        let meaningful: Vec<&str> = self
            .stdout_lines
            .iter()
            .map(|l| l.as_str())
            .filter(|l| !l.trim().is_empty())
            .collect();
        if !meaningful.is_empty() {
            let start = meaningful.len().saturating_sub(5);
            return meaningful[start..].join("\n");
        }

        format!("exit code {}", self.exit_code)
    }
}

/// Runs shell commands on a server.
#[async_trait]
pub trait RemoteExec: Send + Sync {
    /// Run `commands` in order, stopping at the first failure. `interactive`
    /// requests a TTY.
    async fn execute(
        &self,
        commands: &[String],
        server: &Server,
        interactive: bool,
    ) -> Result<RemoteOutput, RemoteError>;
}

/// `RemoteExec` over the system `ssh` client.
pub struct SshExecutor {
    settings: SshSettings,
}

impl SshExecutor {
    pub fn new(settings: SshSettings) -> Self {
        Self { settings }
    }

    /// Arguments passed to `ssh`, excluding the binary.
    pub fn ssh_args(&self, script: &str, server: &Server, interactive: bool) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.settings.connect_timeout_secs),
            "-o".to_string(),
            format!(
                "StrictHostKeyChecking={}",
                if self.settings.strict_host_key_checking {
                    "yes"
                } else {
                    "no"
                }
            ),
            "-p".to_string(),
            server.port.to_string(),
        ];
        if let Some(key) = &server.private_key_path {
            args.push("-i".to_string());
            args.push(key.to_string_lossy().to_string());
        }
        if interactive {
            args.push("-tt".to_string());
        }
        args.push(format!("{}@{}", server.user, server.ip));
        args.push(script.to_string());
        args
    }
}

#[async_trait]
impl RemoteExec for SshExecutor {
    async fn execute(
        &self,
        commands: &[String],
        server: &Server,
        interactive: bool,
    ) -> Result<RemoteOutput, RemoteError> {
        let script = commands.join(" && ");
        let binary = &self.settings.binary;
        tracing::info!(server = %server.name, ip = %server.ip, commands = commands.len(), "Running remote command");

        let mut cmd = Command::new(binary);
        cmd.args(self.ssh_args(&script, server, interactive))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| RemoteError::Spawn {
            server: server.name.clone(),
            source,
        })?;

        let stdout_handle = child.stdout.take().map(|s| tokio::spawn(read_lines(s, "stdout")));
        let stderr_handle = child.stderr.take().map(|s| tokio::spawn(read_lines(s, "stderr")));

        let stdout_lines = match stdout_handle {
            Some(handle) => handle.await.unwrap_or_default(),
            None => vec![],
        };
        let stderr_lines = match stderr_handle {
            Some(handle) => handle.await.unwrap_or_default(),
            None => vec![],
        };

        let status = child.wait().await.map_err(|source| RemoteError::Io {
            server: server.name.clone(),
            source,
        })?;
        let output = RemoteOutput {
            exit_code: status.code().unwrap_or(-1),
            stdout_lines,
            stderr_lines,
        };

        tracing::info!(server = %server.name, exit_code = output.exit_code, "Remote command completed");

        if output.exit_code != 0 {
            return Err(RemoteError::CommandFailed {
                server: server.name.clone(),
                command: redact_command(&script),
                exit_code: output.exit_code,
                message: output.error_message(),
            });
        }
        Ok(output)
    }
}

/// Mask bearer tokens so a failed command can be kept in an error.
pub fn redact_command(command: &str) -> String {
    const BEARER: &str = "Bearer ";

    let mut out = String::with_capacity(command.len());
    let mut rest = command;
    while let Some(idx) = rest.find(BEARER) {
        let (head, tail) = rest.split_at(idx + BEARER.len());
        out.push_str(head);
        out.push_str("***");
        let end = tail
            .find(|c: char| c.is_whitespace() || c == '"' || c == '\'')
            .unwrap_or(tail.len());
        rest = &tail[end..];
    }
    out.push_str(rest);
    out
}

async fn read_lines<R>(reader: R, stream: &'static str) -> Vec<String>
where
    R: AsyncRead + Unpin,
{
    let mut lines = Vec::new();
    let mut reader = BufReader::new(reader).lines();
    while let Ok(Some(line)) = reader.next_line().await {
        tracing::trace!(stream = stream, "{}", line);
        lines.push(line);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn server() -> Server {
        let mut server = Server::new("edge-1", "203.0.113.7");
        server.port = 2222;
        server.user = "deploy".to_string();
        server
    }

    #[test]
    fn test_ssh_args_basic() {
        let exec = SshExecutor::new(SshSettings::default());
        let args = exec.ssh_args("docker ps", &server(), false);
        assert_eq!(args.last().unwrap(), "docker ps");
        assert_eq!(args[args.len() - 2], "deploy@203.0.113.7");
        assert!(args.contains(&"2222".to_string()));
        assert!(args.contains(&"StrictHostKeyChecking=no".to_string()));
        assert!(!args.contains(&"-tt".to_string()));
        assert!(!args.contains(&"-i".to_string()));
    }

    #[test]
    fn test_ssh_args_interactive_with_key() {
        let exec = SshExecutor::new(SshSettings::default());
        let mut server = server();
        server.private_key_path = Some(PathBuf::from("/keys/edge-1"));
        let args = exec.ssh_args("true", &server, true);
        assert!(args.contains(&"-tt".to_string()));
        let key_idx = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[key_idx + 1], "/keys/edge-1");
    }

    #[test]
    fn test_redact_command_masks_bearer_token() {
        let command = "docker exec agent sh -c 'curl -H \"Authorization: Bearer s3cret\" http://localhost:8888/api'";
        let redacted = redact_command(command);
        assert!(!redacted.contains("s3cret"));
        assert_eq!(
            redacted,
            "docker exec agent sh -c 'curl -H \"Authorization: Bearer ***\" http://localhost:8888/api'"
        );

        assert_eq!(
            redact_command("a Bearer one && b Bearer two"),
            "a Bearer *** && b Bearer ***"
        );
        assert_eq!(redact_command("docker volume rm -f 'v1'"), "docker volume rm -f 'v1'");
    }

    #[test]
    fn test_error_message_prefers_stderr() {
        let output = RemoteOutput {
            exit_code: 1,
            stdout_lines: vec!["partial".to_string()],
            stderr_lines: vec!["Error: No such volume".to_string()],
        };
        assert_eq!(output.error_message(), "Error: No such volume");

        let output = RemoteOutput {
            exit_code: 3,
            ..Default::default()
        };
        assert_eq!(output.error_message(), "exit code 3");
    }
}
