//! Operations, task lists and the per-OS producer capability.
//!
//! A [`TaskProducer`] turns an operation and its arguments into a
//! [`TaskList`]: an ordered set of remote steps plus the rule for how the
//! sessions it is run against are scheduled. The orchestrator never looks
//! inside the steps; a [`crate::runner::TaskRunner`] executes them.

use crate::config::{Config, EnvMap};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Setup,
    Deploy,
    Reconfig,
    Restart,
    Stop,
    Start,
    Logs,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Setup => "setup",
            Operation::Deploy => "deploy",
            Operation::Reconfig => "reconfig",
            Operation::Restart => "restart",
            Operation::Stop => "stop",
            Operation::Start => "start",
            Operation::Logs => "logs",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a runner schedules the sessions one task list is run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Parallel,
    Sequential,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    Execute {
        title: String,
        command: String,
    },
    Upload {
        title: String,
        local: PathBuf,
        remote: String,
        progress: bool,
    },
    WriteFile {
        title: String,
        remote: String,
        content: String,
    },
}

impl Task {
    pub fn title(&self) -> &str {
        match self {
            Task::Execute { title, .. } | Task::Upload { title, .. } | Task::WriteFile { title, .. } => {
                title
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskList {
    pub name: String,
    pub mode: SessionMode,
    pub tasks: Vec<Task>,
}

impl TaskList {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mode: SessionMode::Parallel,
            tasks: Vec::new(),
        }
    }

    pub fn sequential(mut self) -> Self {
        self.mode = SessionMode::Sequential;
        self
    }

    pub fn execute(mut self, title: impl Into<String>, command: impl Into<String>) -> Self {
        self.tasks.push(Task::Execute {
            title: title.into(),
            command: command.into(),
        });
        self
    }

    pub fn upload(
        mut self,
        title: impl Into<String>,
        local: impl Into<PathBuf>,
        remote: impl Into<String>,
        progress: bool,
    ) -> Self {
        self.tasks.push(Task::Upload {
            title: title.into(),
            local: local.into(),
            remote: remote.into(),
            progress,
        });
        self
    }

    pub fn write_file(
        mut self,
        title: impl Into<String>,
        remote: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        self.tasks.push(Task::WriteFile {
            title: title.into(),
            remote: remote.into(),
            content: content.into(),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Arguments of one host's deploy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployTaskArgs {
    pub bundle_path: PathBuf,
    /// Global env already overlaid with the host's env.
    pub env: EnvMap,
    pub deploy_check_wait_time: u64,
    pub app_name: String,
    pub enable_upload_progress_bar: bool,
}

/// OS-specific factory for task lists.
pub trait TaskProducer: Send + Sync {
    fn os(&self) -> &str;

    fn setup(&self, config: &Config) -> TaskList;

    fn deploy(&self, args: &DeployTaskArgs) -> TaskList;

    fn reconfig(&self, env: &EnvMap, app_name: &str) -> TaskList;

    fn restart(&self, app_name: &str) -> TaskList;

    fn stop(&self, app_name: &str) -> TaskList;

    fn start(&self, app_name: &str) -> TaskList;
}
