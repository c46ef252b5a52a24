// SPDX-FileCopyrightText: 2025 Caution SEZC
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Commercial

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use russh::ChannelMsg;
use serde::Serialize;

use crate::errors::DeployError;

const SSH_PORT: u16 = 22;
const SSH_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandLog {
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_status: Option<u32>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SshTarget {
    pub host: String,
    pub username: String,
    pub private_key: String,
}

/// One command executed on an already-established remote session.
#[async_trait]
pub trait RemoteShell: Send {
    async fn exec(&mut self, command: &str) -> Result<CommandOutput, DeployError>;
}

/// A transport-level failure mid-sequence, together with the logs of the
/// commands that did complete. Callers persist those logs; the failure alone
/// does not erase what already ran.
#[derive(Debug)]
pub struct SequenceError {
    pub error: DeployError,
    pub completed: Vec<CommandLog>,
}

impl SequenceError {
    fn before_start(error: DeployError) -> Self {
        Self {
            error,
            completed: Vec::new(),
        }
    }
}

/// Runs the commands serially, in order, without short-circuiting: a command
/// that writes to stderr (or exits non-zero) is logged and the sequence
/// continues. Only a transport-level failure aborts. Command contents are not
/// logged here; a bootstrap command can carry a repository token.
pub async fn run_sequence<S: RemoteShell>(
    shell: &mut S,
    commands: &[String],
) -> Result<Vec<CommandLog>, SequenceError> {
    let mut logs = Vec::with_capacity(commands.len());

    for (idx, command) in commands.iter().enumerate() {
        tracing::info!("Running remote command {}/{}", idx + 1, commands.len());

        let out = match shell.exec(command).await {
            Ok(out) => out,
            Err(error) => {
                return Err(SequenceError {
                    error,
                    completed: logs,
                })
            }
        };

        if !out.stderr.is_empty() {
            tracing::error!(
                "Remote command {}/{} wrote {} bytes to stderr (exit={:?}); continuing",
                idx + 1,
                commands.len(),
                out.stderr.len(),
                out.exit_status
            );
        }

        logs.push(CommandLog {
            command: command.clone(),
            stdout: out.stdout,
            stderr: out.stderr,
            exit_status: out.exit_status,
            timestamp: Utc::now(),
        });
    }

    Ok(logs)
}

/// Opens one SSH session per invocation and runs the sequence over it. The
/// session is closed after the last command regardless of outcome.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, target: &SshTarget, commands: &[String]) -> Result<Vec<CommandLog>, SequenceError>;
}

pub struct SshRunner;

struct AcceptingClient;

#[async_trait]
impl russh::client::Handler for AcceptingClient {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        // Freshly provisioned hosts cannot have a known_hosts entry yet.
        Ok(true)
    }
}

struct SshShell {
    handle: russh::client::Handle<AcceptingClient>,
}

#[async_trait]
impl RemoteShell for SshShell {
    async fn exec(&mut self, command: &str) -> Result<CommandOutput, DeployError> {
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| DeployError::Remote(format!("failed to open channel: {}", e)))?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| DeployError::Remote(format!("failed to send exec request: {}", e)))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_status = None;

        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, ext } if ext == 1 => {
                    stderr.extend_from_slice(data)
                }
                ChannelMsg::ExitStatus { exit_status: code } => exit_status = Some(code),
                _ => {}
            }
        }

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_status,
        })
    }
}

#[async_trait]
impl CommandRunner for SshRunner {
    async fn run(&self, target: &SshTarget, commands: &[String]) -> Result<Vec<CommandLog>, SequenceError> {
        let config = Arc::new(russh::client::Config::default());

        tracing::info!("Opening SSH session to {}@{}", target.username, target.host);

        let mut handle = tokio::time::timeout(
            SSH_CONNECT_TIMEOUT,
            russh::client::connect(config, (target.host.as_str(), SSH_PORT), AcceptingClient),
        )
        .await
        .map_err(|_| {
            SequenceError::before_start(DeployError::Remote(format!(
                "SSH connect to {} timed out",
                target.host
            )))
        })?
        .map_err(|e| {
            SequenceError::before_start(DeployError::Remote(format!(
                "SSH connect to {} failed: {}",
                target.host, e
            )))
        })?;

        let key = russh_keys::decode_secret_key(&target.private_key, None).map_err(|e| {
            SequenceError::before_start(DeployError::Remote(format!("invalid SSH private key: {}", e)))
        })?;

        let authenticated = handle
            .authenticate_publickey(&target.username, Arc::new(key))
            .await
            .map_err(|e| {
                SequenceError::before_start(DeployError::Remote(format!("SSH authentication failed: {}", e)))
            })?;

        if !authenticated {
            return Err(SequenceError::before_start(DeployError::Remote(format!(
                "SSH public key rejected for {}@{}",
                target.username, target.host
            ))));
        }

        let mut shell = SshShell { handle };
        let result = run_sequence(&mut shell, commands).await;

        if let Err(e) = shell
            .handle
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await
        {
            tracing::debug!("SSH disconnect error (ignored): {}", e);
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct ScriptedShell {
        outputs: VecDeque<Result<CommandOutput, DeployError>>,
        executed: Vec<String>,
    }

    impl ScriptedShell {
        fn new(outputs: Vec<Result<CommandOutput, DeployError>>) -> Self {
            Self {
                outputs: outputs.into(),
                executed: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl RemoteShell for ScriptedShell {
        async fn exec(&mut self, command: &str) -> Result<CommandOutput, DeployError> {
            self.executed.push(command.to_string());
            self.outputs.pop_front().expect("more commands than scripted outputs")
        }
    }

    fn ok(stdout: &str, stderr: &str, exit: u32) -> Result<CommandOutput, DeployError> {
        Ok(CommandOutput {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            exit_status: Some(exit),
        })
    }

    fn commands(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("command-{}", i)).collect()
    }

    #[tokio::test]
    async fn test_continues_after_stderr() {
        let mut shell = ScriptedShell::new(vec![
            ok("installed", "", 0),
            ok("", "permission denied", 1),
            ok("cloned", "", 0),
            ok("started", "", 0),
        ]);

        let logs = run_sequence(&mut shell, &commands(4)).await.unwrap();

        // command 3 and 4 still ran even though command 2 failed
        assert_eq!(shell.executed, vec!["command-1", "command-2", "command-3", "command-4"]);
        assert_eq!(logs.len(), 4);
        assert_eq!(logs[1].stderr, "permission denied");
        assert_eq!(logs[3].command, "command-4");
        assert_eq!(logs[3].stdout, "started");
    }

    #[tokio::test]
    async fn test_preserves_order() {
        let mut shell = ScriptedShell::new(vec![ok("a", "", 0), ok("b", "", 0), ok("c", "", 0)]);

        let logs = run_sequence(&mut shell, &commands(3)).await.unwrap();

        let ran: Vec<&str> = logs.iter().map(|l| l.command.as_str()).collect();
        assert_eq!(ran, vec!["command-1", "command-2", "command-3"]);
        assert!(logs[0].timestamp <= logs[2].timestamp);
    }

    #[tokio::test]
    async fn test_transport_error_aborts() {
        let mut shell = ScriptedShell::new(vec![
            ok("fine", "", 0),
            Err(DeployError::Remote("connection reset".to_string())),
        ]);

        let err = run_sequence(&mut shell, &commands(3)).await.unwrap_err();

        assert_eq!(err.error.code(), "remote_error");
        // the third command never executed
        assert_eq!(shell.executed.len(), 2);
    }

    #[tokio::test]
    async fn test_transport_error_keeps_completed_logs() {
        let mut shell = ScriptedShell::new(vec![
            ok("pulled", "", 0),
            ok("stopped", "warning: orphan container", 0),
            Err(DeployError::Remote("broken pipe".to_string())),
        ]);

        let err = run_sequence(&mut shell, &commands(3)).await.unwrap_err();

        // the first two commands' logs survive the failure
        assert_eq!(err.completed.len(), 2);
        assert_eq!(err.completed[0].stdout, "pulled");
        assert_eq!(err.completed[1].command, "command-2");
        assert_eq!(err.completed[1].stderr, "warning: orphan container");
    }

    #[tokio::test]
    async fn test_empty_sequence() {
        let mut shell = ScriptedShell::new(vec![]);
        let logs = run_sequence(&mut shell, &[]).await.unwrap();
        assert!(logs.is_empty());
    }
}
