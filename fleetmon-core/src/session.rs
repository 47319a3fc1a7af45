//! Scoped SSH sessions for fetching one log line per instance
//!
//! Each poll attempt opens one connection, runs one bounded read-only
//! command, and closes. Sessions are never pooled or reused across
//! instances or cycles.
//!
//! The transport is OpenSSH in ControlMaster mode: [`RemoteSession::open`]
//! authenticates a master connection (`ssh -M -S <socket> -N -f`), so auth
//! and host-key failures surface at open time; [`RemoteSession::run`]
//! multiplexes one command over it; `close`/`Drop` send `-O exit`, which
//! releases the connection on every exit path. Password authentication uses
//! `sshpass -e` with the `SSHPASS` environment variable.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use tokio::process::Command;

use crate::models::InstanceDescriptor;

/// How the poller authenticates to instances; selected by configuration,
/// never per instance
#[derive(Debug, Clone)]
pub enum SshCredential {
    /// Private-key authentication
    KeyBased {
        /// Remote username
        username: String,
        /// Path to the private key; `~` is expanded
        identity_file: String,
    },
    /// Username/password authentication via `sshpass`
    PasswordBased {
        /// Remote username
        username: String,
        /// The password, kept out of debug output and argv
        password: SecretString,
    },
}

impl SshCredential {
    /// The remote username this credential logs in as
    #[must_use]
    pub fn username(&self) -> &str {
        match self {
            Self::KeyBased { username, .. } | Self::PasswordBased { username, .. } => username,
        }
    }
}

/// Timeouts applied to session operations
#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    /// Maximum time to establish and authenticate the connection
    pub connect_timeout: Duration,
    /// Maximum time for one remote command to complete
    pub exec_timeout: Duration,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            exec_timeout: Duration::from_secs(15),
        }
    }
}

/// Errors establishing a session
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    /// The connection did not complete within the timeout
    #[error("connection to {host} timed out after {secs}s")]
    Timeout {
        /// The unreachable host
        host: String,
        /// The timeout that elapsed
        secs: u64,
    },
    /// The server rejected the credential
    #[error("authentication to {host} failed: {reason}")]
    AuthFailure {
        /// The rejecting host
        host: String,
        /// ssh's own diagnostic
        reason: String,
    },
    /// The server's host key changed since it was first recorded
    #[error("host key mismatch for {host}: {reason}")]
    HostKeyMismatch {
        /// The offending host
        host: String,
        /// ssh's own diagnostic
        reason: String,
    },
    /// The host could not be reached at all
    #[error("{host} is unreachable: {reason}")]
    Unreachable {
        /// The unreachable host
        host: String,
        /// ssh's own diagnostic
        reason: String,
    },
    /// The local ssh binary could not be started
    #[error("failed to spawn ssh: {0}")]
    Spawn(String),
}

/// Errors running a command over an open session
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecError {
    /// The multiplexed channel failed or the remote command errored
    #[error("remote command failed: {0}")]
    ChannelClosed(String),
    /// The command did not complete within the timeout
    #[error("remote command timed out after {secs}s")]
    Timeout {
        /// The timeout that elapsed
        secs: u64,
    },
}

/// One authenticated SSH connection to a single instance
#[derive(Debug)]
pub struct RemoteSession {
    destination: String,
    control_path: PathBuf,
    exec_timeout: Duration,
    closed: bool,
}

impl RemoteSession {
    /// Opens and authenticates a master connection to the instance.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError`] classified from ssh's stderr and exit
    /// status. The spawned master is killed if the open times out, so no
    /// half-open connection is leaked.
    pub async fn open(
        descriptor: &InstanceDescriptor,
        credential: &SshCredential,
        limits: SessionLimits,
    ) -> Result<Self, ConnectError> {
        let destination = format!("{}@{}", credential.username(), descriptor.host);
        let control_path = std::env::temp_dir().join(format!(
            "fleetmon-{}-{}.ctl",
            std::process::id(),
            descriptor.id
        ));

        let mut cmd = match credential {
            SshCredential::KeyBased { identity_file, .. } => {
                let mut cmd = Command::new("ssh");
                cmd.arg("-o").arg("BatchMode=yes");
                cmd.arg("-i")
                    .arg(shellexpand::tilde(identity_file).into_owned());
                cmd
            }
            SshCredential::PasswordBased { password, .. } => {
                // sshpass reads the password from SSHPASS with -e, keeping
                // it out of argv
                let mut cmd = Command::new("sshpass");
                cmd.arg("-e").arg("ssh");
                cmd.env("SSHPASS", password.expose_secret());
                cmd
            }
        };

        // accept-new records unseen keys but still fails on changed ones,
        // so a mismatch is observable instead of silently accepted
        cmd.arg("-o").arg("StrictHostKeyChecking=accept-new");
        cmd.arg("-o")
            .arg(format!("ConnectTimeout={}", limits.connect_timeout.as_secs()));
        cmd.arg("-p").arg(descriptor.port.to_string());
        cmd.arg("-S").arg(&control_path);
        cmd.arg("-M").arg("-N").arg("-f");
        cmd.arg(&destination);

        cmd.stdin(std::process::Stdio::null());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);

        // Small grace over ssh's own ConnectTimeout so its error message
        // wins when the TCP connect is what stalls
        let budget = limits.connect_timeout + Duration::from_secs(2);

        match tokio::time::timeout(budget, cmd.output()).await {
            Err(_) => Err(ConnectError::Timeout {
                host: descriptor.host.clone(),
                secs: limits.connect_timeout.as_secs(),
            }),
            Ok(Err(e)) => Err(ConnectError::Spawn(e.to_string())),
            Ok(Ok(output)) if output.status.success() => Ok(Self {
                destination,
                control_path,
                exec_timeout: limits.exec_timeout,
                closed: false,
            }),
            Ok(Ok(output)) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(classify_connect_failure(
                    &descriptor.host,
                    stderr.trim(),
                    limits.connect_timeout.as_secs(),
                ))
            }
        }
    }

    /// Runs one command over the established master connection, truncating
    /// output at `max_bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::Timeout`] when the command exceeds the exec
    /// timeout and [`ExecError::ChannelClosed`] for every other failure.
    pub async fn run(&self, command: &str, max_bytes: usize) -> Result<String, ExecError> {
        let mut cmd = Command::new("ssh");
        cmd.arg("-o").arg("BatchMode=yes");
        cmd.arg("-S").arg(&self.control_path);
        cmd.arg(&self.destination);
        cmd.arg(command);
        cmd.stdin(std::process::Stdio::null());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);

        match tokio::time::timeout(self.exec_timeout, cmd.output()).await {
            Err(_) => Err(ExecError::Timeout {
                secs: self.exec_timeout.as_secs(),
            }),
            Ok(Err(e)) => Err(ExecError::ChannelClosed(format!("failed to spawn ssh: {e}"))),
            Ok(Ok(output)) if output.status.success() => {
                Ok(truncate_output(&output.stdout, max_bytes))
            }
            Ok(Ok(output)) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(ExecError::ChannelClosed(format!(
                    "exit {}: {}",
                    output.status,
                    stderr.trim()
                )))
            }
        }
    }

    /// Tears down the master connection.
    ///
    /// Failure to exit cleanly is ignored; the master also dies with its
    /// ConnectTimeout-scoped process if the remote end is already gone.
    pub async fn close(mut self) {
        self.closed = true;
        let _ = Command::new("ssh")
            .arg("-S")
            .arg(&self.control_path)
            .arg("-O")
            .arg("exit")
            .arg(&self.destination)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .output()
            .await;
    }
}

impl Drop for RemoteSession {
    fn drop(&mut self) {
        // Covers error propagation and task aborts; close() already ran on
        // the happy path
        if !self.closed {
            let _ = std::process::Command::new("ssh")
                .arg("-S")
                .arg(&self.control_path)
                .arg("-O")
                .arg("exit")
                .arg(&self.destination)
                .stdin(std::process::Stdio::null())
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null())
                .spawn();
        }
    }
}

/// Maps ssh stderr to a [`ConnectError`] variant; `timeout_secs` is the
/// configured connect timeout, reported when ssh's own timer fired
fn classify_connect_failure(host: &str, stderr: &str, timeout_secs: u64) -> ConnectError {
    let reason = if stderr.is_empty() {
        "ssh exited without diagnostics".to_string()
    } else {
        stderr.to_string()
    };

    if stderr.contains("Permission denied") || stderr.contains("Authentication failed") {
        ConnectError::AuthFailure {
            host: host.to_string(),
            reason,
        }
    } else if stderr.contains("REMOTE HOST IDENTIFICATION HAS CHANGED")
        || stderr.contains("Host key verification failed")
    {
        ConnectError::HostKeyMismatch {
            host: host.to_string(),
            reason,
        }
    } else if stderr.contains("timed out") {
        ConnectError::Timeout {
            host: host.to_string(),
            secs: timeout_secs,
        }
    } else {
        ConnectError::Unreachable {
            host: host.to_string(),
            reason,
        }
    }
}

/// Truncates raw command output to `max_bytes` and decodes it lossily
fn truncate_output(stdout: &[u8], max_bytes: usize) -> String {
    let capped = if stdout.len() > max_bytes {
        &stdout[..max_bytes]
    } else {
        stdout
    };
    String::from_utf8_lossy(capped).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_auth_failure() {
        let err = classify_connect_failure("h1", "root@h1: Permission denied (publickey).", 10);
        assert!(matches!(err, ConnectError::AuthFailure { .. }));
    }

    #[test]
    fn test_classify_host_key_mismatch() {
        let err = classify_connect_failure(
            "h1",
            "@ WARNING: REMOTE HOST IDENTIFICATION HAS CHANGED! @",
            10,
        );
        assert!(matches!(err, ConnectError::HostKeyMismatch { .. }));
        let err = classify_connect_failure("h1", "Host key verification failed.", 10);
        assert!(matches!(err, ConnectError::HostKeyMismatch { .. }));
    }

    #[test]
    fn test_classify_connect_timeout_reports_configured_secs() {
        let err = classify_connect_failure(
            "h1",
            "ssh: connect to host h1 port 22: Connection timed out",
            10,
        );
        assert!(matches!(err, ConnectError::Timeout { secs: 10, .. }));
        // the message names the real timeout, not a placeholder
        assert!(err.to_string().contains("after 10s"));
    }

    #[test]
    fn test_classify_refused_is_unreachable() {
        let err = classify_connect_failure(
            "h1",
            "ssh: connect to host h1 port 22: Connection refused",
            10,
        );
        assert!(matches!(err, ConnectError::Unreachable { .. }));
    }

    #[test]
    fn test_classify_empty_stderr() {
        let err = classify_connect_failure("h1", "", 10);
        match err {
            ConnectError::Unreachable { reason, .. } => {
                assert!(reason.contains("without diagnostics"));
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn test_truncate_output_caps_bytes() {
        let data = b"0123456789";
        assert_eq!(truncate_output(data, 4), "0123");
        assert_eq!(truncate_output(data, 100), "0123456789");
    }

    #[test]
    fn test_truncate_output_lossy_on_split_utf8() {
        // Truncation may split a multi-byte sequence; decoding must not panic
        let data = "héllo".as_bytes();
        let out = truncate_output(data, 2);
        assert!(out.starts_with('h'));
    }

    #[test]
    fn test_credential_username() {
        let key = SshCredential::KeyBased {
            username: "root".into(),
            identity_file: "~/.ssh/id_ed25519".into(),
        };
        assert_eq!(key.username(), "root");
        let pw = SshCredential::PasswordBased {
            username: "admin".into(),
            password: SecretString::from("hunter2"),
        };
        assert_eq!(pw.username(), "admin");
    }

    #[test]
    fn test_password_not_in_debug_output() {
        let pw = SshCredential::PasswordBased {
            username: "admin".into(),
            password: SecretString::from("hunter2"),
        };
        let debug = format!("{pw:?}");
        assert!(!debug.contains("hunter2"));
    }
}
