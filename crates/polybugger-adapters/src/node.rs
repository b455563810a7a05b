//! JavaScript / TypeScript profile — Node inspector via js-debug.

use std::path::Path;

use serde_json::{json, Map, Value};

use polybugger_dap::transport::{ChildSpec, TransportEndpoint};

use crate::error::AdapterError;
use crate::profile::{AdapterProfile, AttachConfig, Language, LaunchConfig};

/// Profile for debugging JavaScript/TypeScript with the js-debug adapter.
#[derive(Debug, Clone, Default)]
pub struct NodeProfile;

impl NodeProfile {
    /// Create the profile.
    pub fn new() -> Self {
        Self
    }
}

impl AdapterProfile for NodeProfile {
    fn language(&self) -> Language {
        Language::Js
    }

    fn adapter_id(&self) -> &'static str {
        "pwa-node"
    }

    fn launch_endpoint(&self, project_root: &Path) -> TransportEndpoint {
        TransportEndpoint::ChildStdio(ChildSpec {
            command: "js-debug-adapter".into(),
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
        args.insert("type".into(), json!("pwa-node"));
        args.insert("program".into(), json!(program.to_string_lossy()));
        args.insert("args".into(), json!(config.args));
        args.insert("cwd".into(), json!(cwd.to_string_lossy()));
        if !config.env.is_empty() {
            args.insert("env".into(), json!(config.env));
        }
        args.insert("runtimeExecutable".into(), json!("node"));
        // Source-map resolution for transpiled TypeScript.
        args.insert(
            "outFiles".into(),
            json!([format!("{}/**/*.js", cwd.to_string_lossy())]),
        );
        args.insert("smartStep".into(), json!(true));
        if config.stop_on_entry {
            args.insert("stopOnEntry".into(), json!(true));
        }
        Ok(Value::Object(args))
    }

    fn attach_arguments(&self, config: &AttachConfig) -> Result<Value, AdapterError> {
        let port = config.port.ok_or_else(|| {
            AdapterError::InvalidAttach("node inspector attach requires a port".into())
        })?;
        Ok(json!({"type": "pwa-node", "port": port}))
    }

    fn supports_stop_on_entry(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn node_launch_shape() {
        let profile = NodeProfile::new();
        let config = LaunchConfig {
            program: Some(PathBuf::from("/srv/app/index.js")),
            args: vec!["--port".into(), "0".into()],
            ..Default::default()
        };
        let args = profile.launch_arguments(Path::new("/srv/app"), &config).unwrap();
        assert_eq!(args["program"], "/srv/app/index.js");
        assert_eq!(args["runtimeExecutable"], "node");
        assert_eq!(args["smartStep"], true);
        assert_eq!(args["outFiles"][0], "/srv/app/**/*.js");
    }

    #[test]
    fn node_launch_requires_program() {
        let profile = NodeProfile::new();
        let err = profile
            .launch_arguments(Path::new("/srv/app"), &LaunchConfig::default())
            .unwrap_err();
        assert!(matches!(err, AdapterError::InvalidLaunch(_)));
    }

    #[test]
    fn node_attach_shape_is_port_only() {
        let profile = NodeProfile::new();
        let config = AttachConfig {
            port: Some(9229),
            ..Default::default()
        };
        let args = profile.attach_arguments(&config).unwrap();
        assert_eq!(args["port"], 9229);
        assert!(args.get("host").is_none());
    }

    #[test]
    fn node_attach_requires_port() {
        let profile = NodeProfile::new();
        let err = profile.attach_arguments(&AttachConfig::default()).unwrap_err();
        assert!(matches!(err, AdapterError::InvalidAttach(_)));
    }

    #[test]
    fn node_honours_stop_on_entry() {
        let profile = NodeProfile::new();
        let config = LaunchConfig {
            program: Some(PathBuf::from("/srv/app/index.js")),
            stop_on_entry: true,
            ..Default::default()
        };
        let args = profile.launch_arguments(Path::new("/srv/app"), &config).unwrap();
        assert_eq!(args["stopOnEntry"], true);
    }
}
