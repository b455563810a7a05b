//! Watch expressions.
//!
//! A watch is a user-supplied expression re-evaluated on demand (or on
//! every stop). Results are cached per watch so `list` can show the last
//! known value alongside the expression.

use serde::{Deserialize, Serialize};

/// One watch expression with its last result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Watch {
    /// Stable id within the session ("w1", "w2", ...).
    pub id: String,
    /// The expression source text.
    pub expression: String,
    /// Last successful value, if any.
    pub last_value: Option<String>,
    /// Last evaluation error, if any.
    pub last_error: Option<String>,
    /// Frame the last evaluation ran in.
    pub last_frame_id: Option<i64>,
}

/// Ordered list of watches for one session.
#[derive(Debug, Default)]
pub struct WatchList {
    watches: Vec<Watch>,
    next_id: u64,
}

impl WatchList {
    /// Empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an expression. Re-adding an identical expression returns the
    /// existing watch's id instead of duplicating it.
    pub fn add(&mut self, expression: impl Into<String>) -> String {
        let expression = expression.into();
        if let Some(existing) = self.watches.iter().find(|w| w.expression == expression) {
            return existing.id.clone();
        }
        self.next_id += 1;
        let id = format!("w{}", self.next_id);
        self.watches.push(Watch {
            id: id.clone(),
            expression,
            last_value: None,
            last_error: None,
            last_frame_id: None,
        });
        id
    }

    /// Remove by id. Returns `true` when a watch was removed.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.watches.len();
        self.watches.retain(|w| w.id != id);
        self.watches.len() != before
    }

    /// All watches, in insertion order.
    pub fn list(&self) -> &[Watch] {
        &self.watches
    }

    /// Record an evaluation result for one watch.
    pub fn record(
        &mut self,
        id: &str,
        frame_id: Option<i64>,
        result: Result<String, String>,
    ) -> bool {
        let Some(watch) = self.watches.iter_mut().find(|w| w.id == id) else {
            return false;
        };
        match result {
            Ok(value) => {
                watch.last_value = Some(value);
                watch.last_error = None;
            }
            Err(error) => {
                watch.last_value = None;
                watch.last_error = Some(error);
            }
        }
        watch.last_frame_id = frame_id;
        true
    }

    /// Expression texts, for persistence.
    pub fn expressions(&self) -> Vec<String> {
        self.watches.iter().map(|w| w.expression.clone()).collect()
    }

    /// Restore expressions from a persisted snapshot.
    pub fn restore(&mut self, expressions: &[String]) {
        for expression in expressions {
            self.add(expression.clone());
        }
    }

    /// Number of watches.
    pub fn len(&self) -> usize {
        self.watches.len()
    }

    /// Whether there are no watches.
    pub fn is_empty(&self) -> bool {
        self.watches.is_empty()
    }
}
