//! Kubernetes runtime adapter (kubectl).

use std::time::Duration;

use crate::bridge::PortForward;
use crate::error::ContainerError;
use crate::runtime::{run_cli, ExecResult, CLI_TIMEOUT};

/// Deadline for stub installation (pip may download).
const INSTALL_TIMEOUT: Duration = Duration::from_secs(60);

/// kubectl adapter. The "container" identifier is a pod name; a specific
/// container within the pod can be selected with [`in_container`].
///
/// [`in_container`]: KubernetesRuntime::with_container
#[derive(Debug, Clone, Default)]
pub struct KubernetesRuntime {
    namespace: String,
    container: Option<String>,
}

impl KubernetesRuntime {
    /// Adapter for the `default` namespace.
    pub fn new() -> Self {
        Self {
            namespace: "default".into(),
            container: None,
        }
    }

    /// Select a namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Select a container within multi-container pods.
    pub fn with_container(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }

    /// The CLI binary name.
    pub fn cli(&self) -> &str {
        "kubectl"
    }

    /// Whether kubectl is present.
    pub async fn is_available(&self) -> bool {
        run_cli("kubectl", &["version", "--client"], Duration::from_secs(5))
            .await
            .map(|r| r.success())
            .unwrap_or(false)
    }

    /// Run a command inside the pod.
    pub async fn exec(
        &self,
        pod: &str,
        command: &[&str],
        detach: bool,
    ) -> Result<ExecResult, ContainerError> {
        let args = self.exec_args(pod, command, detach);
        let borrowed: Vec<&str> = args.iter().map(String::as_str).collect();
        let result = run_cli("kubectl", &borrowed, CLI_TIMEOUT).await?;
        if !result.success() && result.stderr.to_lowercase().contains("not found") {
            return Err(ContainerError::ContainerNotFound(pod.to_string()));
        }
        Ok(result)
    }

    /// Argument vector for `exec` (separated for testability). Detached
    /// commands are backgrounded through `sh` since kubectl has no `-d`.
    pub fn exec_args(&self, pod: &str, command: &[&str], detach: bool) -> Vec<String> {
        let mut args = vec![
            "exec".to_string(),
            "-n".to_string(),
            self.namespace.clone(),
        ];
        if let Some(container) = &self.container {
            args.push("-c".to_string());
            args.push(container.clone());
        }
        args.push(pod.to_string());
        args.push("--".to_string());
        if detach {
            let joined = command
                .iter()
                .map(|part| shell_quote(part))
                .collect::<Vec<_>>()
                .join(" ");
            args.extend([
                "sh".to_string(),
                "-c".to_string(),
                format!("nohup {joined} >/dev/null 2>&1 &"),
            ]);
        } else {
            args.extend(command.iter().map(|s| s.to_string()));
        }
        args
    }

    /// Probe for debugpy in the pod and install it on demand, exactly as
    /// the docker adapter does before injecting.
    pub async fn ensure_debugpy(&self, pod: &str) -> Result<(), ContainerError> {
        let probe = self
            .exec(pod, &["python", "-c", "import debugpy"], false)
            .await?;
        if probe.success() {
            return Ok(());
        }

        for installer in [
            vec!["pip", "install", "--quiet", "debugpy"],
            vec!["pip3", "install", "--quiet", "debugpy"],
            vec!["python", "-m", "pip", "install", "--quiet", "debugpy"],
        ] {
            let args = self.exec_args(pod, &installer, false);
            let borrowed: Vec<&str> = args.iter().map(String::as_str).collect();
            let result = run_cli("kubectl", &borrowed, INSTALL_TIMEOUT).await?;
            if result.success() {
                tracing::info!(pod, "installed debugpy");
                return Ok(());
            }
        }
        Err(ContainerError::InjectionFailed {
            stderr: "debugpy is not installed and pip install failed".into(),
        })
    }

    /// Forward a local port to the pod with `kubectl port-forward`.
    pub async fn forward_port(
        &self,
        pod: &str,
        local_port: u16,
        remote_port: u16,
    ) -> Result<PortForward, ContainerError> {
        PortForward::kubectl(&self.namespace, pod, local_port, remote_port).await
    }
}

fn shell_quote(part: &str) -> String {
    if part
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_./:=".contains(c))
    {
        part.to_string()
    } else {
        format!("'{}'", part.replace('\'', "'\\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kubernetes_exec_args_default_namespace() {
        let runtime = KubernetesRuntime::new();
        let args = runtime.exec_args("api-7d9f", &["ps", "aux"], false);
        assert_eq!(
            args,
            vec!["exec", "-n", "default", "api-7d9f", "--", "ps", "aux"]
        );
    }

    #[test]
    fn kubernetes_exec_args_with_namespace_and_container() {
        let runtime = KubernetesRuntime::new()
            .with_namespace("staging")
            .with_container("app");
        let args = runtime.exec_args("api-7d9f", &["ls"], false);
        assert_eq!(
            args,
            vec!["exec", "-n", "staging", "-c", "app", "api-7d9f", "--", "ls"]
        );
    }

    #[test]
    fn kubernetes_detached_command_backgrounds_through_sh() {
        let runtime = KubernetesRuntime::new();
        let args = runtime.exec_args("api", &["python", "-m", "debugpy"], true);
        let script = args.last().unwrap();
        assert!(script.starts_with("nohup python -m debugpy"));
        assert!(script.ends_with("&"));
        assert_eq!(args[args.len() - 3], "sh");
    }

    #[test]
    fn kubernetes_shell_quote_escapes_specials() {
        assert_eq!(shell_quote("plain-arg.py"), "plain-arg.py");
        assert_eq!(shell_quote("has space"), "'has space'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }

    #[tokio::test]
    async fn kubernetes_unavailable_without_kubectl() {
        // In environments without kubectl this is false; with kubectl it
        // is true. Either way the call must not error.
        let _ = KubernetesRuntime::new().is_available().await;
    }
}
