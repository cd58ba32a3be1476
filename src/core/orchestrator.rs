//! Roster grouping and operation dispatch.
//!
//! Sessions are grouped by OS tag, each group paired with the producer for
//! its OS. `setup`, `restart`, `stop` and `start` go to every group at
//! once; `deploy` and `reconfig` walk the roster one host at a time. Every
//! dispatching operation ends in an [`OperationReport`].

use crate::build::{BuildLocation, BuildStage, TarballBuilder};
use crate::config::Config;
use crate::env;
use crate::error::{Error, Result};
use crate::logs::{self, LogTail};
use crate::report::OperationReport;
use crate::runner::{SshTaskRunner, TaskRunner};
use crate::session::Session;
use crate::ssh::SshClient;
use crate::summary::SummaryMap;
use crate::task::{DeployTaskArgs, Operation, TaskList, TaskProducer};
use crate::tasks::ProducerRegistry;
use futures::future::join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Sessions sharing one OS tag and the producer for that OS.
pub struct ExecutionGroup {
    os: String,
    producer: Arc<dyn TaskProducer>,
    sessions: Vec<Arc<Session>>,
}

impl ExecutionGroup {
    pub fn os(&self) -> &str {
        &self.os
    }

    /// In roster order.
    pub fn sessions(&self) -> &[Arc<Session>] {
        &self.sessions
    }

    pub fn producer(&self) -> &dyn TaskProducer {
        self.producer.as_ref()
    }
}

pub struct Orchestrator {
    config: Config,
    /// In order of first appearance of each OS tag.
    groups: Vec<ExecutionGroup>,
    runner: Arc<dyn TaskRunner>,
    builder: Arc<dyn BuildStage>,
    build_root: PathBuf,
}

impl Orchestrator {
    /// Group the roster. Fails on the first server whose OS has no
    /// producer or whose credentials cannot be resolved; nothing is run.
    pub fn new(
        config: Config,
        cwd: &Path,
        registry: &ProducerRegistry,
        runner: Arc<dyn TaskRunner>,
        builder: Arc<dyn BuildStage>,
    ) -> Result<Self> {
        let mut groups: Vec<ExecutionGroup> = Vec::new();

        for (index, server) in config.servers.iter().enumerate() {
            let session = Session::from_server(index, server, cwd)?;

            let position = match groups.iter().position(|g| g.os == server.os) {
                Some(position) => position,
                None => {
                    groups.push(ExecutionGroup {
                        os: server.os.clone(),
                        producer: registry.get(&server.os)?,
                        sessions: Vec::new(),
                    });
                    groups.len() - 1
                }
            };
            groups[position].sessions.push(Arc::new(session));
        }

        log_status!(
            "dispatch",
            "{} session(s) in {} group(s)",
            config.servers.len(),
            groups.len()
        );

        Ok(Self {
            config,
            groups,
            runner,
            builder,
            build_root: std::env::temp_dir(),
        })
    }

    /// Built-in producers, ssh runner and tarball builder.
    pub fn with_defaults(config: Config, cwd: &Path) -> Result<Self> {
        Self::new(
            config,
            cwd,
            &ProducerRegistry::default(),
            Arc::new(SshTaskRunner),
            Arc::new(TarballBuilder),
        )
    }

    /// Directory under which per-deploy build directories are created.
    pub fn with_build_root(mut self, build_root: impl Into<PathBuf>) -> Self {
        self.build_root = build_root.into();
        self
    }

    pub fn groups(&self) -> &[ExecutionGroup] {
        &self.groups
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn setup(&self) -> OperationReport {
        self.dispatch_groups(Operation::Setup, |p| p.setup(&self.config))
            .await
    }

    pub async fn restart(&self) -> OperationReport {
        self.dispatch_groups(Operation::Restart, |p| p.restart(&self.config.app_name))
            .await
    }

    pub async fn stop(&self) -> OperationReport {
        self.dispatch_groups(Operation::Stop, |p| p.stop(&self.config.app_name))
            .await
    }

    pub async fn start(&self) -> OperationReport {
        self.dispatch_groups(Operation::Start, |p| p.start(&self.config.app_name))
            .await
    }

    /// Same task list to every group concurrently. Waits for all groups;
    /// one failing group does not stop the others.
    async fn dispatch_groups<F>(&self, operation: Operation, make: F) -> OperationReport
    where
        F: Fn(&dyn TaskProducer) -> TaskList,
    {
        log_status!("dispatch", "{} on {} group(s)", operation, self.groups.len());

        let handles: Vec<_> = self
            .groups
            .iter()
            .map(|group| {
                let tasks = make(group.producer.as_ref());
                let runner = Arc::clone(&self.runner);
                let sessions = group.sessions.clone();
                tokio::spawn(async move { runner.run(&tasks, &sessions).await })
            })
            .collect();

        let mut top_level: Option<Error> = None;
        let mut summaries = Vec::with_capacity(handles.len());

        for joined in join_all(handles).await {
            match joined {
                Ok(summary) => summaries.push(summary),
                Err(join_err) => {
                    top_level.get_or_insert_with(|| {
                        Error::dispatch_failed(operation.as_str(), join_err.to_string())
                    });
                }
            }
        }

        OperationReport::reduce(operation, top_level, summaries)
    }

    /// Every session paired with its group's producer, in roster order.
    fn roster(&self) -> Vec<(Arc<Session>, Arc<dyn TaskProducer>)> {
        let mut pairs: Vec<_> = self
            .groups
            .iter()
            .flat_map(|group| {
                group
                    .sessions
                    .iter()
                    .map(move |session| (Arc::clone(session), Arc::clone(&group.producer)))
            })
            .collect();
        pairs.sort_by_key(|(session, _)| session.roster_index());
        pairs
    }

    /// Build once, then deploy host by host in roster order.
    ///
    /// A build failure is returned as `Err` before any host is touched. A
    /// failing host is recorded and the next host is still deployed. The
    /// build directory is removed in every case.
    pub async fn deploy(&self) -> Result<OperationReport> {
        let mut location = BuildLocation::new(&self.build_root);

        if let Err(err) = self
            .builder
            .build(&self.config.app, location.dir(), location.bundle_path())
            .await
        {
            log_status!("build", "{}", err.message);
            if let Err(cleanup_err) = location.cleanup() {
                log_status!("build", "{}", cleanup_err.message);
            }
            return Err(err);
        }

        let mut summaries: Vec<SummaryMap> = Vec::new();
        for (session, producer) in self.roster() {
            log_status!("deploy", "{}deploying", session.output_prefix());

            let args = DeployTaskArgs {
                bundle_path: location.bundle_path().to_path_buf(),
                env: env::merge(&self.config.env, session.env()),
                deploy_check_wait_time: self.config.deploy_check_wait_time,
                app_name: self.config.app_name.clone(),
                enable_upload_progress_bar: self.config.enable_upload_progress_bar,
            };
            let tasks = producer.deploy(&args);
            summaries.push(self.runner.run(&tasks, std::slice::from_ref(&session)).await);
        }

        location.cleanup()?;
        Ok(OperationReport::reduce(Operation::Deploy, None, summaries))
    }

    /// Push merged env and restart, host by host in roster order.
    pub async fn reconfig(&self) -> OperationReport {
        let mut summaries: Vec<SummaryMap> = Vec::new();

        for (session, producer) in self.roster() {
            let merged = env::merge(&self.config.env, session.env());
            let tasks = producer.reconfig(&merged, &self.config.app_name);
            summaries.push(self.runner.run(&tasks, std::slice::from_ref(&session)).await);
        }

        OperationReport::reduce(Operation::Reconfig, None, summaries)
    }

    /// Start tailing the app log on every host.
    ///
    /// All tail commands are resolved before any connection is opened.
    pub fn logs(&self, tail_options: &[String]) -> Result<LogTail> {
        let commands = self
            .groups
            .iter()
            .map(|group| logs::tail_command(&group.os, &self.config.app_name, tail_options))
            .collect::<Result<Vec<_>>>()?;

        let mut tail = LogTail::new();
        for (group, command) in self.groups.iter().zip(commands) {
            for session in &group.sessions {
                let opened = SshClient::for_session(session).and_then(|client| {
                    let child = client.spawn_streaming(&command)?;
                    Ok((client, child))
                });

                match opened {
                    Ok((client, child)) => tail.attach(session.output_prefix(), client, child),
                    Err(err) => {
                        tail.close();
                        return Err(err);
                    }
                }
            }
        }

        log_status!("dispatch", "{} on {} host(s)", Operation::Logs, tail.len());
        Ok(tail)
    }
}
