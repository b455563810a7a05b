//! Go profile — Delve in DAP mode.

use std::path::Path;

use serde_json::{json, Map, Value};

use polybugger_dap::transport::{ChildSpec, TransportEndpoint};

use crate::error::AdapterError;
use crate::profile::{AdapterProfile, AttachConfig, Language, LaunchConfig};

/// Profile for debugging Go with `dlv dap`.
#[derive(Debug, Clone, Default)]
pub struct DelveProfile;

impl DelveProfile {
    /// Create the profile.
    pub fn new() -> Self {
        Self
    }
}

impl AdapterProfile for DelveProfile {
    fn language(&self) -> Language {
        Language::Go
    }

    fn adapter_id(&self) -> &'static str {
        "go"
    }

    fn launch_endpoint(&self, project_root: &Path) -> TransportEndpoint {
        TransportEndpoint::ChildStdio(ChildSpec {
            command: "dlv".into(),
            args: vec!["dap".into()],
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
            .ok_or_else(|| AdapterError::InvalidLaunch("program (package) is required".into()))?;

        let cwd = config.cwd.as_deref().unwrap_or(project_root);
        let mut args = Map::new();
        args.insert("mode".into(), json!("debug"));
        args.insert("program".into(), json!(program.to_string_lossy()));
        args.insert("args".into(), json!(config.args));
        args.insert("cwd".into(), json!(cwd.to_string_lossy()));
        if !config.env.is_empty() {
            args.insert("env".into(), json!(config.env));
        }
        args.insert("buildFlags".into(), json!(""));
        // Delve silently ignores stopOnEntry; the flag is dropped here.
        Ok(Value::Object(args))
    }

    fn attach_arguments(&self, config: &AttachConfig) -> Result<Value, AdapterError> {
        let process_id = config.process_id.ok_or_else(|| {
            AdapterError::InvalidAttach("delve attach requires a process id".into())
        })?;

        let mut args = Map::new();
        args.insert("mode".into(), json!("local"));
        args.insert("processId".into(), json!(process_id));
        if !config.path_mappings.is_empty() {
            // Delve resolves module paths through substitutePath pairs.
            let pairs: Vec<Value> = config
                .path_mappings
                .iter()
                .map(|m| json!({"from": m.remote_root, "to": m.local_root}))
                .collect();
            args.insert("substitutePath".into(), json!(pairs));
        }
        Ok(Value::Object(args))
    }

    fn force_configuration_done(&self) -> bool {
        true
    }
}
