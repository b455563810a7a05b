//! Python profile — debugpy.

use std::path::Path;

use serde_json::{json, Map, Value};

use polybugger_dap::client::ReverseRequestPolicy;
use polybugger_dap::transport::{ChildSpec, TransportEndpoint};

use crate::error::AdapterError;
use crate::profile::{AdapterProfile, AttachConfig, Language, LaunchConfig};

/// The debugpy filter id for uncaught exceptions.
const UNCAUGHT_FILTER: &str = "uncaught";

/// Profile for debugging Python with debugpy.
#[derive(Debug, Clone)]
pub struct PythonProfile {
    /// Interpreter used to host the adapter (and the debuggee).
    python: String,
}

impl PythonProfile {
    /// Profile using the system `python3`.
    pub fn new() -> Self {
        Self {
            python: "python3".into(),
        }
    }

    /// Profile using a specific interpreter (e.g. a venv's python).
    pub fn with_interpreter(python: impl Into<String>) -> Self {
        Self {
            python: python.into(),
        }
    }
}

impl Default for PythonProfile {
    fn default() -> Self {
        Self::new()
    }
}

impl AdapterProfile for PythonProfile {
    fn language(&self) -> Language {
        Language::Py
    }

    fn adapter_id(&self) -> &'static str {
        "debugpy"
    }

    fn launch_endpoint(&self, project_root: &Path) -> TransportEndpoint {
        TransportEndpoint::ChildStdio(ChildSpec {
            command: self.python.clone(),
            args: vec!["-m".into(), "debugpy.adapter".into()],
            cwd: Some(project_root.to_path_buf()),
            env: Default::default(),
        })
    }

    fn attach_endpoint(
        &self,
        _project_root: &Path,
        config: &AttachConfig,
    ) -> Result<TransportEndpoint, AdapterError> {
        // debugpy's listen stub is itself the DAP server.
        let host = config.host.clone().unwrap_or_else(|| "127.0.0.1".into());
        let port = config
            .port
            .ok_or_else(|| AdapterError::InvalidAttach("debugpy attach requires a port".into()))?;
        Ok(TransportEndpoint::Tcp { host, port })
    }

    fn launch_arguments(
        &self,
        project_root: &Path,
        config: &LaunchConfig,
    ) -> Result<Value, AdapterError> {
        if config.program.is_none() && config.module.is_none() {
            return Err(AdapterError::InvalidLaunch(
                "either program or module must be specified".into(),
            ));
        }
        if config.program.is_some() && config.module.is_some() {
            return Err(AdapterError::InvalidLaunch(
                "program and module are mutually exclusive".into(),
            ));
        }

        let mut args = Map::new();
        if let Some(program) = &config.program {
            args.insert("program".into(), json!(program.to_string_lossy()));
        }
        if let Some(module) = &config.module {
            args.insert("module".into(), json!(module));
        }
        args.insert("args".into(), json!(config.args));
        let cwd = config.cwd.as_deref().unwrap_or(project_root);
        args.insert("cwd".into(), json!(cwd.to_string_lossy()));
        if !config.env.is_empty() {
            args.insert("env".into(), json!(config.env));
        }
        args.insert("console".into(), json!("internalConsole"));
        args.insert("justMyCode".into(), json!(true));
        if config.stop_on_entry {
            args.insert("stopOnEntry".into(), json!(true));
        }
        Ok(Value::Object(args))
    }

    fn attach_arguments(&self, config: &AttachConfig) -> Result<Value, AdapterError> {
        let host = config.host.clone().unwrap_or_else(|| "127.0.0.1".into());
        let port = config
            .port
            .ok_or_else(|| AdapterError::InvalidAttach("debugpy attach requires a port".into()))?;

        let mut args = Map::new();
        args.insert("host".into(), json!(host));
        args.insert("port".into(), json!(port));
        if !config.path_mappings.is_empty() {
            let mappings: Vec<Value> = config
                .path_mappings
                .iter()
                .map(|m| json!({"localRoot": m.local_root, "remoteRoot": m.remote_root}))
                .collect();
            args.insert("pathMappings".into(), json!(mappings));
        }
        Ok(Value::Object(args))
    }

    fn exception_filters(&self, stop_on_exception: bool) -> Vec<String> {
        if stop_on_exception {
            vec![UNCAUGHT_FILTER.to_string()]
        } else {
            Vec::new()
        }
    }

    fn supports_stop_on_entry(&self) -> bool {
        true
    }

    fn reverse_request_policy(&self) -> ReverseRequestPolicy {
        // debugpy's runInTerminal is ignored; launches use internalConsole.
        ReverseRequestPolicy {
            reply: false,
            synthetic_process_id: 0,
        }
    }
}
