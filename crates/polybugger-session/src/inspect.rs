//! Smart inspector — structure-aware previews of DAP variable trees.
//!
//! Classifies a value by type name and presentation hints, then renders a
//! compact text preview: schema tables for tabular frames, bounded element
//! previews for arrays and sequences, sorted key/value pairs for mappings.
//! Child fetches are lazy and bounded; variable graphs can be cyclic, so
//! the walker tracks visited references and a depth cap. Exhausting the
//! fetch budget produces a truncation notice, never an error.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use polybugger_dap::protocol::Variable;

use crate::error::SessionError;

/// Bounds for one inspect call.
#[derive(Debug, Clone)]
pub struct InspectOptions {
    /// Maximum `variables` fetches per call.
    pub child_fetch_budget: usize,
    /// Maximum recursion depth into nested references.
    pub max_depth: usize,
    /// Elements previewed per axis of an N-D array.
    pub preview_per_axis: usize,
    /// Entries shown for mappings and sequences.
    pub max_entries: usize,
    /// Character cap for entry values.
    pub entry_value_cap: usize,
    /// Character cap for scalar passthrough.
    pub scalar_cap: usize,
}

impl Default for InspectOptions {
    fn default() -> Self {
        Self {
            child_fetch_budget: 64,
            max_depth: 3,
            preview_per_axis: 6,
            max_entries: 20,
            entry_value_cap: 80,
            scalar_cap: 256,
        }
    }
}

/// How the inspector classified the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InspectKind {
    /// Tabular frame (DataFrame, Table, RecordBatch, ...).
    Tabular,
    /// N-dimensional array (shape/dtype children present).
    NdArray,
    /// Key/value mapping.
    Mapping,
    /// Indexed sequence.
    Sequence,
    /// Scalar or unclassified value.
    Scalar,
}

/// The result of a smart inspect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inspection {
    /// Classification.
    pub kind: InspectKind,
    /// Compact text rendering.
    pub rendered: String,
    /// Whether any bound cut the rendering short.
    pub truncated: bool,
    /// Child fetches spent.
    pub fetches_used: usize,
}

/// Source of variable children; the session backs this with DAP
/// `variables` requests, tests script it.
pub trait VariableFetcher: Sync {
    /// Fetch the children of `reference`.
    fn children(
        &self,
        reference: i64,
    ) -> impl std::future::Future<Output = Result<Vec<Variable>, SessionError>> + Send;
}

/// Inspect the value behind `reference`.
///
/// `value` and `value_type` come from the variable or evaluate result that
/// produced the reference; `reference == 0` means the value has no
/// children and passes through as a scalar.
pub async fn inspect_reference<F: VariableFetcher>(
    fetcher: &F,
    name: &str,
    value: &str,
    value_type: Option<&str>,
    reference: i64,
    options: &InspectOptions,
) -> Result<Inspection, SessionError> {
    let mut walker = Walker {
        fetcher,
        options,
        fetches_used: 0,
        truncated: false,
        visited: HashSet::new(),
    };
    walker.inspect_root(name, value, value_type, reference).await
}

struct Walker<'a, F: VariableFetcher> {
    fetcher: &'a F,
    options: &'a InspectOptions,
    fetches_used: usize,
    truncated: bool,
    visited: HashSet<i64>,
}

impl<'a, F: VariableFetcher> Walker<'a, F> {
    async fn inspect_root(
        &mut self,
        name: &str,
        value: &str,
        value_type: Option<&str>,
        reference: i64,
    ) -> Result<Inspection, SessionError> {
        if reference <= 0 {
            return Ok(self.scalar(name, value, value_type));
        }

        let Some(children) = self.fetch(reference).await? else {
            return Ok(self.scalar(name, value, value_type));
        };

        let type_name = value_type.unwrap_or_default();
        let kind = classify(type_name, &children);
        let rendered = match kind {
            InspectKind::Tabular => self.render_tabular(name, type_name, &children).await?,
            InspectKind::NdArray => self.render_nd_array(name, type_name, &children).await?,
            InspectKind::Mapping => self.render_mapping(name, type_name, &children),
            InspectKind::Sequence => self.render_sequence(name, type_name, &children),
            InspectKind::Scalar => return Ok(self.scalar(name, value, value_type)),
        };

        let mut rendered = rendered;
        if self.truncated {
            rendered.push_str("\n… truncated (fetch budget or size bound reached)");
        }
        Ok(Inspection {
            kind,
            rendered,
            truncated: self.truncated,
            fetches_used: self.fetches_used,
        })
    }

    fn scalar(&self, name: &str, value: &str, value_type: Option<&str>) -> Inspection {
        let shown = truncate(value, self.options.scalar_cap);
        let truncated = shown.len() != value.len();
        let rendered = match value_type {
            Some(t) if !t.is_empty() => format!("{name}: {t} = {shown}"),
            _ => format!("{name} = {shown}"),
        };
        Inspection {
            kind: InspectKind::Scalar,
            rendered,
            truncated: truncated || self.truncated,
            fetches_used: self.fetches_used,
        }
    }

    /// Fetch children of `reference`, spending budget. `None` means the
    /// budget is gone or the reference was already visited (cycle).
    async fn fetch(&mut self, reference: i64) -> Result<Option<Vec<Variable>>, SessionError> {
        if !self.visited.insert(reference) {
            self.truncated = true;
            return Ok(None);
        }
        if self.fetches_used >= self.options.child_fetch_budget {
            self.truncated = true;
            return Ok(None);
        }
        self.fetches_used += 1;
        let children = self.fetcher.children(reference).await?;
        Ok(Some(children))
    }

    async fn render_tabular(
        &mut self,
        name: &str,
        type_name: &str,
        children: &[Variable],
    ) -> Result<String, SessionError> {
        let shape = child_value(children, &["shape"]);
        let memory = child_value(children, &["memory usage", "memory", "nbytes"]);

        let mut header = format!("{name}: {type_name}");
        if let Some(shape) = &shape {
            header.push_str(&format!(" shape={shape}"));
        }
        if let Some(memory) = &memory {
            header.push_str(&format!(" memory={memory}"));
        }

        let mut lines = vec![header, format!("{:<24} {:<16} nulls", "name", "type")];
        let columns: Vec<&Variable> = children
            .iter()
            .filter(|c| !is_meta_child(c))
            .take(self.options.max_entries)
            .collect();
        let hidden = children.iter().filter(|c| !is_meta_child(c)).count() - columns.len();

        for column in columns {
            // One bounded fetch per column looks for a null-count child;
            // rows themselves are never fetched here.
            let nulls = match column.variables_reference.filter(|r| *r > 0) {
                Some(reference) => match self.fetch(reference).await? {
                    Some(grandchildren) => {
                        child_value(&grandchildren, &["null_count", "nulls", "isna"])
                            .unwrap_or_else(|| "-".into())
                    }
                    None => "-".into(),
                },
                None => "-".into(),
            };
            let type_label = column.variable_type.as_deref().unwrap_or("-");
            lines.push(format!(
                "{:<24} {:<16} {}",
                truncate(&column.name, 24),
                truncate(type_label, 16),
                nulls
            ));
        }
        if hidden > 0 {
            self.truncated = true;
            lines.push(format!("… {hidden} more columns"));
        }
        Ok(lines.join("\n"))
    }

    async fn render_nd_array(
        &mut self,
        name: &str,
        type_name: &str,
        children: &[Variable],
    ) -> Result<String, SessionError> {
        let shape = child_value(children, &["shape"]).unwrap_or_else(|| "?".into());
        let dtype = child_value(children, &["dtype"]).unwrap_or_else(|| "?".into());
        let memory = child_value(children, &["nbytes", "memory"]);

        let mut header = format!("{name}: {type_name} shape={shape} dtype={dtype}");
        if let Some(memory) = memory {
            header.push_str(&format!(" memory={memory}"));
        }

        let mut preview = Vec::new();
        self.flatten_preview(children, 0, &mut preview).await?;
        let mut rendered = header;
        if !preview.is_empty() {
            rendered.push_str("\npreview: [");
            rendered.push_str(&preview.join(", "));
            rendered.push(']');
        }
        Ok(rendered)
    }

    /// Depth-first element preview: first N indexed children per axis.
    fn flatten_preview<'b>(
        &'b mut self,
        children: &'b [Variable],
        depth: usize,
        out: &'b mut Vec<String>,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<(), SessionError>> + Send + 'b>,
    > {
        Box::pin(async move {
            if depth >= self.options.max_depth {
                self.truncated = true;
                return Ok(());
            }
            let elements: Vec<&Variable> = children.iter().filter(|c| is_indexed(c)).collect();
            let shown = elements.len().min(self.options.preview_per_axis);
            if elements.len() > shown {
                self.truncated = true;
            }
            for element in &elements[..shown] {
                match element.variables_reference.filter(|r| *r > 0) {
                    Some(reference) => match self.fetch(reference).await? {
                        Some(grandchildren) => {
                            self.flatten_preview(&grandchildren, depth + 1, out).await?;
                        }
                        None => return Ok(()),
                    },
                    None => out.push(truncate(&element.value, self.options.entry_value_cap)),
                }
            }
            Ok(())
        })
    }

    fn render_mapping(&mut self, name: &str, type_name: &str, children: &[Variable]) -> String {
        let mut entries: Vec<&Variable> = children.iter().filter(|c| !is_meta_child(c)).collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        let shown = entries.len().min(self.options.max_entries);
        let mut lines = vec![format!("{name}: {type_name} ({} entries)", entries.len())];
        for entry in &entries[..shown] {
            lines.push(format!(
                "  {} → {}",
                entry.name,
                truncate(&entry.value, self.options.entry_value_cap)
            ));
        }
        if entries.len() > shown {
            self.truncated = true;
            lines.push(format!("  … {} more", entries.len() - shown));
        }
        lines.join("\n")
    }

    fn render_sequence(&mut self, name: &str, type_name: &str, children: &[Variable]) -> String {
        let elements: Vec<&Variable> = children.iter().filter(|c| !is_meta_child(c)).collect();
        let shown = elements.len().min(self.options.max_entries);

        let mut lines = vec![format!("{name}: {type_name} ({} elements)", elements.len())];
        for (index, element) in elements[..shown].iter().enumerate() {
            lines.push(format!(
                "  [{index}] {}",
                truncate(&element.value, self.options.entry_value_cap)
            ));
        }
        if elements.len() > shown {
            self.truncated = true;
            lines.push(format!("  … {} more", elements.len() - shown));
        }
        lines.join("\n")
    }
}

fn classify(type_name: &str, children: &[Variable]) -> InspectKind {
    let lowered = type_name.to_ascii_lowercase();
    if ["dataframe", "table", "recordbatch"]
        .iter()
        .any(|t| lowered.contains(t))
    {
        return InspectKind::Tabular;
    }
    let has_shape = children.iter().any(|c| c.name == "shape");
    let has_dtype = children.iter().any(|c| c.name == "dtype");
    if has_shape && has_dtype {
        return InspectKind::NdArray;
    }
    if ["dict", "map", "mapping", "counter", "defaultdict"]
        .iter()
        .any(|t| lowered.contains(t))
    {
        return InspectKind::Mapping;
    }
    if ["list", "tuple", "set", "vec", "array", "deque"]
        .iter()
        .any(|t| lowered.contains(t))
    {
        return InspectKind::Sequence;
    }
    if children.is_empty() {
        return InspectKind::Scalar;
    }
    // Untyped fallback: indexed children read as a sequence, named ones as
    // a mapping.
    if children.iter().any(is_indexed) {
        InspectKind::Sequence
    } else {
        InspectKind::Mapping
    }
}

fn is_indexed(variable: &Variable) -> bool {
    let name = variable.name.trim_start_matches('[').trim_end_matches(']');
    name.parse::<usize>().is_ok()
}

fn is_meta_child(variable: &Variable) -> bool {
    const META: &[&str] = &[
        "shape",
        "dtype",
        "dtypes",
        "memory usage",
        "memory",
        "nbytes",
        "len()",
        "size",
        "ndim",
        "T",
        "special variables",
        "function variables",
    ];
    META.contains(&variable.name.as_str())
        || variable
            .presentation_hint
            .as_ref()
            .and_then(|h| h.kind.as_deref())
            .is_some_and(|k| k == "method" || k == "class")
}

fn child_value(children: &[Variable], names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| {
        children
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
            .map(|c| c.value.clone())
    })
}

fn truncate(s: &str, cap: usize) -> String {
    if s.chars().count() <= cap {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(cap).collect();
        out.push('…');
        out
    }
}
