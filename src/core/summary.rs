//! Per-session results of one task-list run.

use crate::error::Error;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub title: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

/// Outcome for one session: the steps that ran, and the first failure if any.
#[derive(Debug, Clone, Default)]
pub struct Summary {
    pub error: Option<Error>,
    pub steps: Vec<StepRecord>,
}

impl Summary {
    pub fn succeeded(steps: Vec<StepRecord>) -> Self {
        Self { error: None, steps }
    }

    pub fn failed(error: Error, steps: Vec<StepRecord>) -> Self {
        Self {
            error: Some(error),
            steps,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// One session's entry in a [`SummaryMap`].
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub host: String,
    pub summary: Summary,
}

/// Summaries of one runner call, keyed by roster index. Two roster entries
/// for the same host (different user or port) keep separate entries.
#[derive(Debug, Clone, Default)]
pub struct SummaryMap {
    entries: BTreeMap<usize, SessionSummary>,
}

impl SummaryMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, roster_index: usize, host: impl Into<String>, summary: Summary) {
        self.entries.insert(
            roster_index,
            SessionSummary {
                host: host.into(),
                summary,
            },
        );
    }

    pub fn get(&self, roster_index: usize) -> Option<&Summary> {
        self.entries.get(&roster_index).map(|entry| &entry.summary)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &SessionSummary)> {
        self.entries.iter().map(|(index, entry)| (*index, entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        self.entries.values().any(|entry| entry.summary.error.is_some())
    }
}

impl FromIterator<(usize, String, Summary)> for SummaryMap {
    fn from_iter<I: IntoIterator<Item = (usize, String, Summary)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (roster_index, host, summary) in iter {
            map.insert(roster_index, host, summary);
        }
        map
    }
}

impl IntoIterator for SummaryMap {
    type Item = (usize, SessionSummary);
    type IntoIter = std::collections::btree_map::IntoIter<usize, SessionSummary>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
