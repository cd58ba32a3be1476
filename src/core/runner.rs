//! Executes task lists against sessions.

use crate::error::{Error, RemoteCommandFailedDetails, TargetDetails};
use crate::session::Session;
use crate::ssh::{CommandOutput, SshClient};
use crate::summary::{StepRecord, Summary, SummaryMap};
use crate::task::{SessionMode, Task, TaskList};
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;

/// Runs one task list over a set of sessions.
///
/// Completion is the returned map: one entry per session, holding either
/// success or the first failure for that session.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, tasks: &TaskList, sessions: &[Arc<Session>]) -> SummaryMap;
}

/// Runs steps through the `ssh` binary.
#[derive(Debug, Default, Clone)]
pub struct SshTaskRunner;

#[async_trait]
impl TaskRunner for SshTaskRunner {
    async fn run(&self, tasks: &TaskList, sessions: &[Arc<Session>]) -> SummaryMap {
        log_status!(
            "run",
            "{} on {} host(s) ({:?})",
            tasks.name,
            sessions.len(),
            tasks.mode
        );

        match tasks.mode {
            SessionMode::Parallel => join_all(sessions.iter().map(|session| async move {
                (
                    session.roster_index(),
                    session.host().to_string(),
                    run_session(tasks, session).await,
                )
            }))
            .await
            .into_iter()
            .collect(),
            SessionMode::Sequential => {
                let mut summaries = SummaryMap::new();
                for session in sessions {
                    summaries.insert(
                        session.roster_index(),
                        session.host(),
                        run_session(tasks, session).await,
                    );
                }
                summaries
            }
        }
    }
}

async fn run_session(tasks: &TaskList, session: &Session) -> Summary {
    let client = match SshClient::for_session(session) {
        Ok(client) => client,
        Err(err) => return Summary::failed(err, Vec::new()),
    };

    let prefix = session.output_prefix();
    let mut steps = Vec::with_capacity(tasks.tasks.len());

    for task in &tasks.tasks {
        log_status!("run", "{}{}", prefix, task.title());

        let output = match task {
            Task::Execute { command, .. } => client.execute(command).await,
            Task::Upload {
                local,
                remote,
                progress,
                ..
            } => client.upload_file(local, remote, *progress).await,
            Task::WriteFile {
                remote, content, ..
            } => client.write_file(remote, content).await,
        };

        steps.push(StepRecord {
            title: task.title().to_string(),
            success: output.success,
            exit_code: Some(output.exit_code),
        });

        if !output.success {
            log_status!("run", "{}{}: failed (exit {})", prefix, task.title(), output.exit_code);
            return Summary::failed(step_error(task, session, output), steps);
        }
    }

    log_status!("run", "{}{}: done", prefix, tasks.name);
    Summary::succeeded(steps)
}

fn step_error(task: &Task, session: &Session, output: CommandOutput) -> Error {
    // 255 is ssh itself failing, not the remote command.
    let retryable = output.exit_code == 255;

    Error::remote_command_failed(RemoteCommandFailedDetails {
        step: task.title().to_string(),
        exit_code: output.exit_code,
        stdout: output.stdout,
        stderr: output.stderr,
        target: TargetDetails {
            host: session.host().to_string(),
            os: Some(session.os().to_string()),
        },
    })
    .with_retryable(retryable)
}
