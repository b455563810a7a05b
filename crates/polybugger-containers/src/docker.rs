//! Docker runtime adapter (also drives Podman through its compatible CLI).

use std::time::Duration;

use crate::bridge::PortForward;
use crate::error::ContainerError;
use crate::runtime::{run_cli, ExecResult, CLI_TIMEOUT};

/// Deadline for stub installation (pip may download).
const INSTALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Docker CLI adapter.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    cli: String,
}

impl DockerRuntime {
    /// Adapter over the given CLI binary ("docker" or "podman").
    pub fn new(cli: impl Into<String>) -> Self {
        Self { cli: cli.into() }
    }

    /// The CLI binary name.
    pub fn cli(&self) -> &str {
        &self.cli
    }

    /// Whether the daemon answers.
    pub async fn is_available(&self) -> bool {
        run_cli(
            &self.cli,
            &["version", "--format", "{{.Server.Version}}"],
            Duration::from_secs(5),
        )
        .await
        .map(|r| r.success())
        .unwrap_or(false)
    }

    /// The container's reported state ("running", "exited", ...).
    pub async fn container_state(&self, container: &str) -> Result<String, ContainerError> {
        let result = run_cli(
            &self.cli,
            &["inspect", "--format", "{{.State.Status}}", container],
            CLI_TIMEOUT,
        )
        .await?;
        if !result.success() {
            let stderr = result.stderr.to_lowercase();
            if stderr.contains("no such") || stderr.contains("not found") {
                return Err(ContainerError::ContainerNotFound(container.to_string()));
            }
            return Err(ContainerError::ExecFailed {
                command: format!("{} inspect {container}", self.cli),
                exit_code: result.exit_code,
                stderr: result.stderr,
            });
        }
        Ok(result.stdout.trim().to_string())
    }

    /// The container's primary network address.
    pub async fn container_address(&self, container: &str) -> Result<String, ContainerError> {
        let result = run_cli(
            &self.cli,
            &[
                "inspect",
                "--format",
                "{{range .NetworkSettings.Networks}}{{.IPAddress}}{{break}}{{end}}",
                container,
            ],
            CLI_TIMEOUT,
        )
        .await?;
        let address = result.stdout.trim().to_string();
        if !result.success() || address.is_empty() {
            return Err(ContainerError::ExecFailed {
                command: format!("{} inspect {container}", self.cli),
                exit_code: result.exit_code,
                stderr: if result.stderr.is_empty() {
                    "container has no network address".into()
                } else {
                    result.stderr
                },
            });
        }
        Ok(address)
    }

    /// Run a command inside the container.
    pub async fn exec(
        &self,
        container: &str,
        command: &[&str],
        detach: bool,
    ) -> Result<ExecResult, ContainerError> {
        let state = self.container_state(container).await?;
        if state != "running" {
            return Err(ContainerError::ContainerNotRunning {
                container: container.to_string(),
                state,
            });
        }

        let args = Self::exec_args(container, command, detach);
        let borrowed: Vec<&str> = args.iter().map(String::as_str).collect();
        run_cli(&self.cli, &borrowed, CLI_TIMEOUT).await
    }

    /// Argument vector for `exec` (separated for testability).
    pub fn exec_args(container: &str, command: &[&str], detach: bool) -> Vec<String> {
        let mut args = vec!["exec".to_string()];
        if detach {
            args.push("-d".to_string());
        }
        args.push(container.to_string());
        args.extend(command.iter().map(|s| s.to_string()));
        args
    }

    /// Inject debugpy into a running Python process. Installs debugpy on
    /// demand and escalates ptrace denials to a dedicated error with
    /// remediation steps.
    pub async fn inject_python_stub(
        &self,
        container: &str,
        pid: i64,
        port: u16,
    ) -> Result<(), ContainerError> {
        self.ensure_debugpy(container).await?;

        let listen = format!("0.0.0.0:{port}");
        let pid_str = pid.to_string();
        let result = self
            .exec(
                container,
                &[
                    "python", "-m", "debugpy", "--listen", &listen, "--pid", &pid_str,
                ],
                false,
            )
            .await?;

        if !result.success() {
            let lowered = result.stderr.to_lowercase();
            if lowered.contains("operation not permitted")
                || lowered.contains("ptrace")
                || lowered.contains("eperm")
            {
                return Err(ContainerError::PtraceDenied {
                    stderr: result.stderr,
                    instructions: vec![
                        "The container lacks the SYS_PTRACE capability required for injection."
                            .into(),
                        format!("Restart it with: {} run --cap-add=SYS_PTRACE ...", self.cli),
                        "Or launch a fresh debuggable process with launch_in_container.".into(),
                        "For docker-compose add `cap_add: [SYS_PTRACE]` to the service.".into(),
                    ],
                });
            }
            return Err(ContainerError::InjectionFailed {
                stderr: result.stderr,
            });
        }
        tracing::info!(container, pid, port, "injected debugpy");
        Ok(())
    }

    /// Start a program under debugpy (detached), listening on `port` and
    /// waiting for the client.
    pub async fn launch_python_stub(
        &self,
        container: &str,
        program: &str,
        args: &[String],
        port: u16,
    ) -> Result<(), ContainerError> {
        self.ensure_debugpy(container).await?;

        let listen = format!("0.0.0.0:{port}");
        let mut command = vec![
            "python",
            "-m",
            "debugpy",
            "--listen",
            &listen,
            "--wait-for-client",
            program,
        ];
        command.extend(args.iter().map(String::as_str));

        let result = self.exec(container, &command, true).await?;
        if !result.success() {
            return Err(ContainerError::InjectionFailed {
                stderr: result.stderr,
            });
        }
        tracing::info!(container, program, port, "launched program under debugpy");
        Ok(())
    }

    /// Forward `local_port` on the host loopback to `remote_port` in the
    /// container by relaying to its network address.
    pub async fn forward_port(
        &self,
        container: &str,
        local_port: u16,
        remote_port: u16,
    ) -> Result<PortForward, ContainerError> {
        let address = self.container_address(container).await?;
        PortForward::relay(local_port, address, remote_port).await
    }

    async fn ensure_debugpy(&self, container: &str) -> Result<(), ContainerError> {
        let probe = self
            .exec(container, &["python", "-c", "import debugpy"], false)
            .await?;
        if probe.success() {
            return Ok(());
        }

        for installer in [
            vec!["pip", "install", "--quiet", "debugpy"],
            vec!["pip3", "install", "--quiet", "debugpy"],
            vec!["python", "-m", "pip", "install", "--quiet", "debugpy"],
        ] {
            let state = self.container_state(container).await?;
            if state != "running" {
                return Err(ContainerError::ContainerNotRunning {
                    container: container.to_string(),
                    state,
                });
            }
            let args = Self::exec_args(container, &installer, false);
            let borrowed: Vec<&str> = args.iter().map(String::as_str).collect();
            let result = run_cli(&self.cli, &borrowed, INSTALL_TIMEOUT).await?;
            if result.success() {
                tracing::info!(container, "installed debugpy");
                return Ok(());
            }
        }
        Err(ContainerError::InjectionFailed {
            stderr: "debugpy is not installed and pip install failed".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn docker_exec_args_plain() {
        let args = DockerRuntime::exec_args("api", &["ps", "aux"], false);
        assert_eq!(args, vec!["exec", "api", "ps", "aux"]);
    }

    #[test]
    fn docker_exec_args_detached() {
        let args = DockerRuntime::exec_args("api", &["python", "-m", "debugpy"], true);
        assert_eq!(args[..2], ["exec", "-d"]);
        assert_eq!(args[2], "api");
    }

    #[test]
    fn docker_cli_override_for_podman() {
        let runtime = DockerRuntime::new("podman");
        assert_eq!(runtime.cli(), "podman");
    }

    #[tokio::test]
    async fn docker_unavailable_cli_reports_false() {
        let runtime = DockerRuntime::new("definitely-not-docker-xyz");
        assert!(!runtime.is_available().await);
    }
}
