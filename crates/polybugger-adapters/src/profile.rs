//! The adapter profile trait and the configs it consumes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use polybugger_dap::client::ReverseRequestPolicy;
use polybugger_dap::protocol::InitializeRequestArguments;
use polybugger_dap::transport::TransportEndpoint;

use crate::delve::DelveProfile;
use crate::error::AdapterError;
use crate::lldb::LldbProfile;
use crate::node::NodeProfile;
use crate::python::PythonProfile;

/// Languages the broker can debug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// Python via debugpy.
    Py,
    /// JavaScript / TypeScript via the Node inspector bridge.
    Js,
    /// Go via Delve.
    Go,
    /// Rust via LLDB.
    Rust,
    /// C / C++ via LLDB.
    Native,
}

impl Language {
    /// Canonical short tag ("py", "js", "go", "rust", "native").
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Py => "py",
            Language::Js => "js",
            Language::Go => "go",
            Language::Rust => "rust",
            Language::Native => "native",
        }
    }

    /// Parse a language tag; accepts a few common aliases.
    pub fn parse(tag: &str) -> Result<Self, AdapterError> {
        match tag.to_ascii_lowercase().as_str() {
            "py" | "python" => Ok(Language::Py),
            "js" | "javascript" | "typescript" | "ts" => Ok(Language::Js),
            "go" | "golang" => Ok(Language::Go),
            "rust" => Ok(Language::Rust),
            "native" | "c" | "cpp" | "c++" => Ok(Language::Native),
            other => Err(AdapterError::UnsupportedLanguage(other.to_string())),
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A local/remote source-root pair for adapters running elsewhere
/// (containers, remote attach).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathMapping {
    /// Root on the broker host.
    pub local_root: String,
    /// Root as the debuggee sees it.
    pub remote_root: String,
}

/// Normalised launch configuration, before profile translation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LaunchConfig {
    /// Program path to run. Exactly one of `program` / `module` is set.
    pub program: Option<PathBuf>,
    /// Module to run (Python `-m`); only meaningful for py.
    pub module: Option<String>,
    /// Command-line arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory for the debuggee.
    pub cwd: Option<PathBuf>,
    /// Extra environment variables.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Stop at the first line.
    #[serde(default)]
    pub stop_on_entry: bool,
    /// Break on uncaught exceptions.
    #[serde(default = "default_stop_on_exception")]
    pub stop_on_exception: bool,
}

fn default_stop_on_exception() -> bool {
    true
}

/// Normalised attach configuration, before profile translation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttachConfig {
    /// Host the debug stub listens on.
    pub host: Option<String>,
    /// Port the debug stub listens on.
    pub port: Option<u16>,
    /// Process to attach to (local attach).
    pub process_id: Option<i64>,
    /// Source-root translations.
    #[serde(default)]
    pub path_mappings: Vec<PathMapping>,
}

/// Per-language strategy: how to reach the backend and how to phrase
/// launch/attach for it.
pub trait AdapterProfile: Send + Sync {
    /// The language this profile serves.
    fn language(&self) -> Language;

    /// The adapter id reported in `initialize`.
    fn adapter_id(&self) -> &'static str;

    /// Transport for launching a program under this backend.
    fn launch_endpoint(&self, project_root: &Path) -> TransportEndpoint;

    /// Transport for attaching. The default spawns the same adapter as for
    /// launches; profiles whose stub *is* the DAP server (debugpy) connect
    /// to it instead.
    fn attach_endpoint(
        &self,
        project_root: &Path,
        config: &AttachConfig,
    ) -> Result<TransportEndpoint, AdapterError> {
        let _ = config;
        Ok(self.launch_endpoint(project_root))
    }

    /// Build the `launch` request arguments.
    fn launch_arguments(
        &self,
        project_root: &Path,
        config: &LaunchConfig,
    ) -> Result<Value, AdapterError>;

    /// Build the `attach` request arguments.
    fn attach_arguments(&self, config: &AttachConfig) -> Result<Value, AdapterError>;

    /// Arguments for the `initialize` handshake. Identical across backends
    /// apart from the adapter id.
    fn initialize_arguments(&self) -> InitializeRequestArguments {
        InitializeRequestArguments {
            client_id: Some("polybugger".into()),
            client_name: Some("polybugger broker".into()),
            adapter_id: self.adapter_id().to_string(),
            locale: Some("en-US".into()),
            lines_start_at1: Some(true),
            columns_start_at1: Some(true),
            path_format: Some("path".into()),
            supports_variable_type: Some(true),
            supports_variable_paging: Some(true),
            supports_run_in_terminal_request: Some(false),
        }
    }

    /// Exception filter ids to enable, given the launch flag.
    fn exception_filters(&self, stop_on_exception: bool) -> Vec<String> {
        let _ = stop_on_exception;
        Vec::new()
    }

    /// Deadline for ordinary requests.
    fn request_timeout(&self) -> Duration {
        Duration::from_secs(10)
    }

    /// Deadline for the launch/attach handshake.
    fn launch_timeout(&self) -> Duration {
        Duration::from_secs(30)
    }

    /// Treat the adapter as supporting `configurationDone` even when the
    /// initialize response does not advertise it.
    fn force_configuration_done(&self) -> bool {
        false
    }

    /// Whether `stop_on_entry` is honoured; profiles that return false drop
    /// the flag silently.
    fn supports_stop_on_entry(&self) -> bool {
        false
    }

    /// How to answer reverse requests from this backend.
    fn reverse_request_policy(&self) -> ReverseRequestPolicy {
        ReverseRequestPolicy::default()
    }
}

/// All languages with a profile, in presentation order.
pub fn supported_languages() -> &'static [Language] {
    &[
        Language::Py,
        Language::Js,
        Language::Go,
        Language::Rust,
        Language::Native,
    ]
}

/// Look up the profile for a language.
pub fn profile_for(language: Language) -> Box<dyn AdapterProfile> {
    match language {
        Language::Py => Box::new(PythonProfile::new()),
        Language::Js => Box::new(NodeProfile::new()),
        Language::Go => Box::new(DelveProfile::new()),
        Language::Rust | Language::Native => Box::new(LldbProfile::new(language)),
    }
}
