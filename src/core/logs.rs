//! Remote log tailing.
//!
//! Each session gets a long-running `tail` whose stdout and stderr lines are
//! relayed, prefixed with `[host] `, to the local stdout and stderr. The
//! relay runs until the remote command ends or the [`LogTail`] is closed.

use crate::error::{Error, Result};
use crate::ssh::SshClient;
use crate::tasks::linux;
use crate::utils::shell;
use futures::future::join_all;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Remote tail command for `os`. Unknown OS tags are rejected here too,
/// independent of the check done when the orchestrator was built.
pub fn tail_command(os: &str, app_name: &str, tail_options: &[String]) -> Result<String> {
    match os {
        linux::OS => {
            let mut command = "sudo tail".to_string();
            if !tail_options.is_empty() {
                command.push(' ');
                command.push_str(&shell::quote_args(tail_options));
            }
            command.push(' ');
            command.push_str(&shell::quote_path(&linux::log_file(app_name)));
            Ok(command)
        }
        other => Err(Error::config_unsupported_os(other, vec![linux::OS.to_string()])),
    }
}

/// Copy lines from `reader` to `writer`, each prefixed, until EOF or
/// cancellation. Returns the number of lines forwarded.
pub async fn forward_lines<R, W>(
    reader: R,
    prefix: &str,
    mut writer: W,
    token: &CancellationToken,
) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut forwarded = 0;

    loop {
        let line = tokio::select! {
            _ = token.cancelled() => break,
            line = lines.next_line() => line?,
        };

        let Some(line) = line else { break };
        writer
            .write_all(format!("{}{}\n", prefix, line).as_bytes())
            .await?;
        writer.flush().await?;
        forwarded += 1;
    }

    Ok(forwarded)
}

/// A set of running tails. Dropping it leaves the relays running until
/// the remote commands end; call [`LogTail::close`] to stop them.
pub struct LogTail {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Default for LogTail {
    fn default() -> Self {
        Self::new()
    }
}

impl LogTail {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            handles: Vec::new(),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Relay a spawned remote tail. `client` is kept alive with the child
    /// so its key file outlives the connection.
    pub fn attach(&mut self, prefix: String, client: SshClient, mut child: Child) {
        let token = self.token.clone();

        self.handles.push(tokio::spawn(async move {
            let _client = client;
            let stdout = child.stdout.take();
            let stderr = child.stderr.take();

            let out = async {
                if let Some(stdout) = stdout {
                    let _ = forward_lines(stdout, &prefix, tokio::io::stdout(), &token).await;
                }
            };
            let err = async {
                if let Some(stderr) = stderr {
                    let _ = forward_lines(stderr, &prefix, tokio::io::stderr(), &token).await;
                }
            };
            tokio::join!(out, err);

            if token.is_cancelled() {
                let _ = child.kill().await;
            } else {
                let _ = child.wait().await;
            }
            log_status!("logs", "{}stream closed", prefix);
        }));
    }

    /// Stop every relay and kill the remote tails.
    pub fn close(&self) {
        self.token.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait for every relay to finish.
    pub async fn wait(self) {
        join_all(self.handles).await;
    }
}
