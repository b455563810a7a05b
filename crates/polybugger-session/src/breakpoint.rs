//! Breakpoint table: user intent per source file.
//!
//! DAP replaces the whole breakpoint set of a source on every
//! `setBreakpoints` call and re-assigns ids, so the table stores intent
//! (path, line, condition) and re-maps adapter ids from each response.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use polybugger_dap::protocol::BreakpointInfo;

/// What the user asked for at one line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakpointSpec {
    /// 1-based source line.
    pub line: i64,
    /// Optional condition expression.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Optional hit-count expression.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hit_condition: Option<String>,
}

impl BreakpointSpec {
    /// A plain breakpoint at `line`.
    pub fn at_line(line: i64) -> Self {
        Self {
            line,
            condition: None,
            hit_condition: None,
        }
    }
}

/// A spec plus the adapter's latest verdict on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakpointView {
    /// The requested line.
    pub line: i64,
    /// Whether the adapter verified the breakpoint.
    pub verified: bool,
    /// Adapter-assigned id, valid until the next `setBreakpoints`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adapter_id: Option<i64>,
    /// Adapter message (e.g. why it is unverified).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone)]
struct Record {
    spec: BreakpointSpec,
    verified: bool,
    adapter_id: Option<i64>,
    message: Option<String>,
}

/// Per-session breakpoint table keyed by source path.
#[derive(Debug, Default)]
pub struct BreakpointTable {
    files: HashMap<PathBuf, Vec<Record>>,
}

impl BreakpointTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the full set for `path`. An empty `specs` removes the file.
    pub fn replace(&mut self, path: &Path, specs: Vec<BreakpointSpec>) {
        if specs.is_empty() {
            self.files.remove(path);
            return;
        }
        let records = specs
            .into_iter()
            .map(|spec| Record {
                spec,
                verified: false,
                adapter_id: None,
                message: None,
            })
            .collect();
        self.files.insert(path.to_path_buf(), records);
    }

    /// Apply a `setBreakpoints` response; entries correlate by position.
    pub fn apply_response(&mut self, path: &Path, infos: &[BreakpointInfo]) {
        if let Some(records) = self.files.get_mut(path) {
            for (record, info) in records.iter_mut().zip(infos) {
                record.verified = info.verified;
                record.adapter_id = info.id;
                record.message = info.message.clone();
            }
        }
    }

    /// The current view for `path`, in line order of the last replace.
    pub fn view(&self, path: &Path) -> Vec<BreakpointView> {
        self.files
            .get(path)
            .map(|records| {
                records
                    .iter()
                    .map(|r| BreakpointView {
                        line: r.spec.line,
                        verified: r.verified,
                        adapter_id: r.adapter_id,
                        message: r.message.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Stored specs for `path`, as sent to the adapter.
    pub fn specs(&self, path: &Path) -> Vec<BreakpointSpec> {
        self.files
            .get(path)
            .map(|records| records.iter().map(|r| r.spec.clone()).collect())
            .unwrap_or_default()
    }

    /// All files with at least one breakpoint.
    pub fn files(&self) -> Vec<PathBuf> {
        self.files.keys().cloned().collect()
    }

    /// Remove one file's set (or everything). Returns how many breakpoints
    /// were dropped.
    pub fn clear(&mut self, path: Option<&Path>) -> usize {
        match path {
            Some(path) => self.files.remove(path).map_or(0, |v| v.len()),
            None => {
                let count = self.files.values().map(Vec::len).sum();
                self.files.clear();
                count
            }
        }
    }

    /// Total number of breakpoints.
    pub fn len(&self) -> usize {
        self.files.values().map(Vec::len).sum()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Intent in canonical order, for persistence.
    pub fn intent(&self) -> BTreeMap<String, Vec<BreakpointSpec>> {
        self.files
            .iter()
            .map(|(path, records)| {
                (
                    path.to_string_lossy().into_owned(),
                    records.iter().map(|r| r.spec.clone()).collect(),
                )
            })
            .collect()
    }
}
