//! Reduction of collected summaries into one verdict.
//!
//! The verdict is binary: any top-level dispatch error, or any errored
//! entry in any summary map, fails the whole invocation. The report also
//! keeps which host failed at which step, for the CLI's JSON output.

use crate::error::Error;
use crate::summary::{SessionSummary, StepRecord, SummaryMap};
use crate::task::Operation;
use serde::Serialize;

/// Flat OR over the top-level error and every summary entry.
/// No summaries at all (no hosts) is a success.
pub fn has_failures(top_level: Option<&Error>, summaries: &[SummaryMap]) -> bool {
    top_level.is_some() || summaries.iter().any(SummaryMap::has_errors)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostOutcome {
    pub roster_index: usize,
    pub host: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub steps: Vec<StepRecord>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationReport {
    pub operation: Operation,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub hosts: Vec<HostOutcome>,
    pub finished_at: String,
}

impl OperationReport {
    pub fn reduce(operation: Operation, top_level: Option<Error>, summaries: Vec<SummaryMap>) -> Self {
        let success = !has_failures(top_level.as_ref(), &summaries);

        let hosts = summaries
            .into_iter()
            .flatten()
            .map(|(roster_index, SessionSummary { host, summary })| HostOutcome {
                roster_index,
                host,
                success: summary.error.is_none(),
                error_code: summary.error.as_ref().map(|e| e.code.as_str().to_string()),
                error: summary.error.map(|e| e.message),
                steps: summary.steps,
            })
            .collect();

        Self {
            operation,
            success,
            error: top_level.map(|e| e.message),
            hosts,
            finished_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn exit_code(&self) -> i32 {
        if self.success {
            0
        } else {
            1
        }
    }

    pub fn failed_hosts(&self) -> impl Iterator<Item = &str> {
        self.hosts
            .iter()
            .filter(|h| !h.success)
            .map(|h| h.host.as_str())
    }
}
