//! Rust / native profile — LLDB's DAP adapter.

use std::path::Path;

use serde_json::{json, Map, Value};

use polybugger_dap::transport::{ChildSpec, TransportEndpoint};

use crate::error::AdapterError;
use crate::profile::{AdapterProfile, AttachConfig, Language, LaunchConfig};

/// Profile for debugging Rust, C, and C++ with `lldb-dap`.
#[derive(Debug, Clone)]
pub struct LldbProfile {
    language: Language,
}

impl LldbProfile {
    /// Create the profile for `Language::Rust` or `Language::Native`.
    pub fn new(language: Language) -> Self {
        debug_assert!(matches!(language, Language::Rust | Language::Native));
        Self { language }
    }
}

impl AdapterProfile for LldbProfile {
    fn language(&self) -> Language {
        self.language
    }

    fn adapter_id(&self) -> &'static str {
        "lldb-dap"
    }

    fn launch_endpoint(&self, project_root: &Path) -> TransportEndpoint {
        TransportEndpoint::ChildStdio(ChildSpec {
            command: "lldb-dap".into(),
            args: Vec::new(),
            cwd: Some(project_root.to_path_buf()),
            env: Default::default(),
        })
    }

    fn launch_arguments(
        &self,
        project_root: &Path,
        config: &LaunchConfig,
    ) -> Result<Value, AdapterError> {
        let program = config
            .program
            .as_ref()
            .ok_or_else(|| AdapterError::InvalidLaunch("program is required".into()))?;

        let cwd = config.cwd.as_deref().unwrap_or(project_root);
        let mut args = Map::new();
        args.insert("program".into(), json!(program.to_string_lossy()));
        args.insert("args".into(), json!(config.args));
        args.insert("cwd".into(), json!(cwd.to_string_lossy()));
        if !config.env.is_empty() {
            let env: Vec<String> = config
                .env
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            args.insert("env".into(), json!(env));
        }
        // lldb-dap ignores stopOnEntry; breakpoints drive the first stop.
        Ok(Value::Object(args))
    }

    fn attach_arguments(&self, config: &AttachConfig) -> Result<Value, AdapterError> {
        let pid = config
            .process_id
            .ok_or_else(|| AdapterError::InvalidAttach("lldb attach requires a pid".into()))?;
        Ok(json!({"pid": pid}))
    }

    fn exception_filters(&self, _stop_on_exception: bool) -> Vec<String> {
        // No exception filters for native targets.
        Vec::new()
    }
}
