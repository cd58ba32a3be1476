use crate::error::{Error, Result};
use crate::session::{Auth, Session};
use crate::utils::shell;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};

enum ClientAuth {
    /// Key material from the session, written to a private temp file that
    /// lives as long as the client.
    IdentityFile(NamedTempFile),
    Password(String),
    Agent(PathBuf),
}

pub struct SshClient {
    pub host: String,
    pub user: String,
    pub port: u16,
    auth: ClientAuth,
    /// When true, all commands run locally instead of over SSH.
    /// Set automatically when the host is localhost/127.0.0.1/::1.
    pub is_local: bool,
}

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub exit_code: i32,
}

impl CommandOutput {
    fn failed(stderr: String) -> Self {
        Self {
            stdout: String::new(),
            stderr,
            success: false,
            exit_code: -1,
        }
    }

    fn from_output(out: std::process::Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&out.stdout).to_string(),
            stderr: String::from_utf8_lossy(&out.stderr).to_string(),
            success: out.status.success(),
            exit_code: out.status.code().unwrap_or(-1),
        }
    }
}

#[derive(Clone, Copy)]
enum StdinSource<'a> {
    File(&'a Path),
    Bytes(&'a [u8]),
}

impl SshClient {
    pub fn for_session(session: &Session) -> Result<Self> {
        let auth = match session.auth() {
            Auth::Pem(key) => {
                let mut file = NamedTempFile::new().map_err(|e| {
                    Error::internal_io(e.to_string(), Some("create identity file".to_string()))
                })?;
                file.write_all(key.as_bytes()).map_err(|e| {
                    Error::internal_io(e.to_string(), Some("write identity file".to_string()))
                })?;
                ClientAuth::IdentityFile(file)
            }
            Auth::Password(password) => ClientAuth::Password(password.clone()),
            Auth::Agent(sock) => ClientAuth::Agent(sock.clone()),
        };

        let is_local = is_local_host(session.host());
        if is_local {
            log_status!("ssh", "Host '{}' is localhost, using local execution", session.host());
        }

        Ok(Self {
            host: session.host().to_string(),
            user: session.username().to_string(),
            port: session.port(),
            auth,
            is_local,
        })
    }

    fn build_ssh_args(&self, command: &str) -> Vec<String> {
        let mut args = Vec::new();

        if let ClientAuth::IdentityFile(file) = &self.auth {
            args.push("-i".to_string());
            args.push(file.path().to_string_lossy().to_string());
            args.extend(["-o".to_string(), "IdentitiesOnly=yes".to_string()]);
        }

        if self.port != 22 {
            args.push("-p".to_string());
            args.push(self.port.to_string());
        }

        // Password auth needs the prompt that BatchMode would suppress.
        if !matches!(self.auth, ClientAuth::Password(_)) {
            args.extend(["-o".to_string(), "BatchMode=yes".to_string()]);
        }

        args.extend([
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            "ConnectTimeout=10".to_string(),
            "-o".to_string(),
            "ServerAliveInterval=15".to_string(),
            "-o".to_string(),
            "ServerAliveCountMax=3".to_string(),
        ]);

        args.push(format!("{}@{}", self.user, self.host));
        args.push(command.to_string());

        args
    }

    fn command(&self, command: &str) -> Command {
        if self.is_local {
            return local_shell(command);
        }

        let args = self.build_ssh_args(command);
        let mut cmd = match &self.auth {
            ClientAuth::Password(password) => {
                let mut cmd = Command::new("sshpass");
                cmd.arg("-e").arg("ssh").env("SSHPASS", password);
                cmd
            }
            ClientAuth::Agent(sock) => {
                let mut cmd = Command::new("ssh");
                cmd.env("SSH_AUTH_SOCK", sock);
                cmd
            }
            ClientAuth::IdentityFile(_) => Command::new("ssh"),
        };
        cmd.args(&args);
        cmd
    }

    pub async fn execute(&self, command: &str) -> CommandOutput {
        self.execute_with_retry(command, None, 3).await
    }

    /// Stream a local file into `remote_path`.
    pub async fn upload_file(
        &self,
        local_path: &Path,
        remote_path: &str,
        progress: bool,
    ) -> CommandOutput {
        if progress {
            let size = std::fs::metadata(local_path).map(|m| m.len()).unwrap_or(0);
            log_status!(
                "upload",
                "[{}] {} -> {} ({} bytes)",
                self.host,
                local_path.display(),
                remote_path,
                size
            );
        }

        let remote_command = format!("cat > {}", shell::quote_path(remote_path));
        let output = self
            .execute_with_retry(&remote_command, Some(StdinSource::File(local_path)), 3)
            .await;

        if progress && output.success {
            log_status!("upload", "[{}] upload complete", self.host);
        }
        output
    }

    /// Write `content` to `remote_path`, through sudo.
    pub async fn write_file(&self, remote_path: &str, content: &str) -> CommandOutput {
        let remote_command = format!("sudo tee {} > /dev/null", shell::quote_path(remote_path));
        self.execute_with_retry(
            &remote_command,
            Some(StdinSource::Bytes(content.as_bytes())),
            3,
        )
        .await
    }

    /// Start a long-running command with piped stdout/stderr.
    /// The child is killed when dropped.
    pub fn spawn_streaming(&self, command: &str) -> Result<Child> {
        let mut cmd = self.command(command);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        cmd.spawn()
            .map_err(|e| Error::ssh_connect_failed(&self.host, e.to_string()))
    }

    async fn execute_with_retry(
        &self,
        command: &str,
        stdin: Option<StdinSource<'_>>,
        max_attempts: u32,
    ) -> CommandOutput {
        let backoff_secs = [0, 2, 5]; // delays before retry 1, 2, 3

        let mut attempt = 0;
        loop {
            let result = self.execute_once(command, stdin).await;
            attempt += 1;

            // Only retry on transient connection errors, not command failures
            if result.success || attempt >= max_attempts || !is_transient_ssh_error(&result) {
                return result;
            }

            let delay = backoff_secs.get(attempt as usize).copied().unwrap_or(5);
            log_status!(
                "ssh",
                "[{}] Connection failed (attempt {}/{}), retrying in {}s...",
                self.host,
                attempt,
                max_attempts,
                delay
            );
            tokio::time::sleep(Duration::from_secs(delay)).await;
        }
    }

    async fn execute_once(&self, command: &str, stdin: Option<StdinSource<'_>>) -> CommandOutput {
        let mut cmd = self.command(command);
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

        match stdin {
            None => {
                cmd.stdin(Stdio::null());
            }
            Some(StdinSource::File(path)) => match std::fs::File::open(path) {
                Ok(file) => {
                    cmd.stdin(Stdio::from(file));
                }
                Err(err) => {
                    return CommandOutput::failed(format!("Failed to open stdin file: {}", err));
                }
            },
            Some(StdinSource::Bytes(_)) => {
                cmd.stdin(Stdio::piped());
            }
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return CommandOutput::failed(format!("SSH error: {}", e)),
        };

        if let Some(StdinSource::Bytes(bytes)) = stdin {
            if let Some(mut pipe) = child.stdin.take() {
                if let Err(e) = pipe.write_all(bytes).await {
                    return CommandOutput::failed(format!("Failed to write stdin: {}", e));
                }
                // Dropping the pipe sends EOF.
            }
        }

        match child.wait_with_output().await {
            Ok(out) => CommandOutput::from_output(out),
            Err(e) => CommandOutput::failed(format!("SSH error: {}", e)),
        }
    }
}

fn local_shell(command: &str) -> Command {
    #[cfg(windows)]
    let cmd = {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", command]);
        cmd
    };

    #[cfg(not(windows))]
    let cmd = {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", command]);
        cmd
    };

    cmd
}

/// Check if a host address refers to the local machine.
pub fn is_local_host(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "::1")
}

/// Check if an SSH failure is a transient connection error worth retrying.
fn is_transient_ssh_error(output: &CommandOutput) -> bool {
    let stderr = output.stderr.to_lowercase();
    // SSH exit code 255 = connection error (not a remote command failure)
    let is_connection_exit = output.exit_code == 255;

    let transient_patterns = [
        "connection refused",
        "connection reset",
        "connection timed out",
        "no route to host",
        "network is unreachable",
        "temporary failure in name resolution",
        "broken pipe",
        "ssh_exchange_identification",
        "connection closed by remote host",
    ];

    is_connection_exit || transient_patterns.iter().any(|p| stderr.contains(p))
}
