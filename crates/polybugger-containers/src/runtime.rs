//! Container runtime abstraction.
//!
//! Runtimes are driven through their CLIs and judged purely on exit codes
//! and output; nothing here links against runtime APIs. Docker and Podman
//! share one adapter (Podman keeps Docker CLI compatibility), Kubernetes
//! gets its own.

use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::Command;

use polybugger_adapters::Language;

use crate::docker::DockerRuntime;
use crate::error::ContainerError;
use crate::kubernetes::KubernetesRuntime;

/// Default deadline for runtime CLI commands.
pub(crate) const CLI_TIMEOUT: Duration = Duration::from_secs(30);

/// Which container runtime to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    /// Docker CLI.
    Docker,
    /// Podman via its Docker-compatible CLI.
    Podman,
    /// Kubernetes via kubectl.
    Kubernetes,
}

impl RuntimeKind {
    /// Parse a runtime tag.
    pub fn parse(tag: &str) -> Result<Self, ContainerError> {
        match tag.to_ascii_lowercase().as_str() {
            "docker" => Ok(RuntimeKind::Docker),
            "podman" => Ok(RuntimeKind::Podman),
            "kubernetes" | "k8s" => Ok(RuntimeKind::Kubernetes),
            other => Err(ContainerError::RuntimeUnavailable(other.to_string())),
        }
    }

    /// The CLI binary for this runtime.
    pub fn cli(&self) -> &'static str {
        match self {
            RuntimeKind::Docker => "docker",
            RuntimeKind::Podman => "podman",
            RuntimeKind::Kubernetes => "kubectl",
        }
    }
}

/// A runtime adapter instance.
#[derive(Debug, Clone)]
pub enum ContainerRuntime {
    /// Docker or Podman.
    Cli(DockerRuntime),
    /// Kubernetes.
    Kube(KubernetesRuntime),
}

/// Build the adapter for a runtime kind.
pub fn runtime_for(kind: RuntimeKind) -> ContainerRuntime {
    match kind {
        RuntimeKind::Docker => ContainerRuntime::Cli(DockerRuntime::new("docker")),
        RuntimeKind::Podman => ContainerRuntime::Cli(DockerRuntime::new("podman")),
        RuntimeKind::Kubernetes => ContainerRuntime::Kube(KubernetesRuntime::new()),
    }
}

impl ContainerRuntime {
    /// Whether the CLI answers at all.
    pub async fn is_available(&self) -> bool {
        match self {
            ContainerRuntime::Cli(rt) => rt.is_available().await,
            ContainerRuntime::Kube(rt) => rt.is_available().await,
        }
    }

    /// The CLI binary name, for error messages.
    pub fn cli(&self) -> &str {
        match self {
            ContainerRuntime::Cli(rt) => rt.cli(),
            ContainerRuntime::Kube(rt) => rt.cli(),
        }
    }

    /// Run a command inside the container.
    pub async fn exec(
        &self,
        container: &str,
        command: &[&str],
        detach: bool,
    ) -> Result<ExecResult, ContainerError> {
        match self {
            ContainerRuntime::Cli(rt) => rt.exec(container, command, detach).await,
            ContainerRuntime::Kube(rt) => rt.exec(container, command, detach).await,
        }
    }

    /// List processes inside the container, flagging language candidates.
    pub async fn list_processes(
        &self,
        container: &str,
        language: Language,
    ) -> Result<Vec<ProcessInfo>, ContainerError> {
        let result = self.exec(container, &["ps", "aux"], false).await;
        let result = match result {
            Ok(r) if r.success() => r,
            // Minimal images often lack ps; walk /proc instead.
            _ => {
                self.exec(
                    container,
                    &[
                        "sh",
                        "-c",
                        "for p in /proc/[0-9]*; do \
                         printf '%s %s\\n' \"${p#/proc/}\" \
                         \"$(tr '\\0' ' ' < $p/cmdline 2>/dev/null)\"; done",
                    ],
                    false,
                )
                .await?
            }
        };

        if !result.success() {
            return Err(ContainerError::ExecFailed {
                command: "ps aux".into(),
                exit_code: result.exit_code,
                stderr: result.stderr,
            });
        }

        let mut processes = Vec::new();
        for line in result.stdout.lines().skip_while(|l| l.starts_with("USER")) {
            if let Some(process) = ProcessInfo::from_ps_line(line, language) {
                processes.push(process);
            }
        }
        Ok(processes)
    }

    /// Establish a forward from a local port to `remote_port` inside the
    /// container. Implementation differs per runtime; see the adapters.
    pub async fn forward_port(
        &self,
        container: &str,
        local_port: u16,
        remote_port: u16,
    ) -> Result<crate::bridge::PortForward, ContainerError> {
        match self {
            ContainerRuntime::Cli(rt) => rt.forward_port(container, local_port, remote_port).await,
            ContainerRuntime::Kube(rt) => rt.forward_port(container, local_port, remote_port).await,
        }
    }
}

/// Outcome of one CLI command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    /// Process exit code (-1 when killed or unstartable).
    pub exit_code: i32,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
    /// Whether the deadline killed it.
    pub timed_out: bool,
}

impl ExecResult {
    /// Exit code zero and not timed out.
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

/// One process inside a container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInfo {
    /// Process id inside the container's pid namespace.
    pub pid: i64,
    /// Full command line.
    pub command: String,
    /// Owning user, when `ps` reports one.
    pub user: Option<String>,
    /// Whether the command looks like a debuggee for the target language.
    pub is_language_candidate: bool,
}

impl ProcessInfo {
    /// Parse one `ps aux` line (or a `/proc` fallback line: "pid cmdline").
    pub fn from_ps_line(line: &str, language: Language) -> Option<Self> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 2 {
            return None;
        }

        // `ps aux`: USER PID %CPU %MEM VSZ RSS TTY STAT START TIME COMMAND…
        // `/proc` fallback: PID COMMAND…
        let (pid, user, command_start) = if let Ok(pid) = fields[0].parse::<i64>() {
            (pid, None, 1)
        } else if fields.len() >= 11 {
            let pid = fields[1].parse::<i64>().ok()?;
            (pid, Some(fields[0].to_string()), 10)
        } else {
            return None;
        };

        let command = fields[command_start..].join(" ");
        if command.is_empty() {
            return None;
        }
        let is_language_candidate = is_candidate(&command, language);
        Some(Self {
            pid,
            command,
            user,
            is_language_candidate,
        })
    }
}

fn is_candidate(command: &str, language: Language) -> bool {
    let lowered = command.to_ascii_lowercase();
    match language {
        Language::Py => lowered.contains("python"),
        Language::Js => lowered.contains("node") || lowered.contains("deno"),
        Language::Go => lowered.contains("go run") || lowered.contains("/go/bin"),
        // Native binaries are indistinguishable from a command line.
        Language::Rust | Language::Native => false,
    }
}

/// Run a CLI command with a deadline; a timeout kills the process.
pub(crate) async fn run_cli(
    program: &str,
    args: &[&str],
    deadline: Duration,
) -> Result<ExecResult, ContainerError> {
    tracing::debug!(program, ?args, "running container CLI");
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    // Drain pipes while waiting so a chatty command cannot fill them and
    // stall the child.
    let drained = async { tokio::join!(read_all(stdout), read_all(stderr)) };
    match tokio::time::timeout(deadline, async { tokio::join!(child.wait(), drained) }).await {
        Ok((status, (stdout, stderr))) => {
            let status = status?;
            Ok(ExecResult {
                exit_code: status.code().unwrap_or(-1),
                stdout,
                stderr,
                timed_out: false,
            })
        }
        Err(_) => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            Ok(ExecResult {
                exit_code: -1,
                stdout: String::new(),
                stderr: "command timed out".into(),
                timed_out: true,
            })
        }
    }
}

async fn read_all<R: tokio::io::AsyncRead + Unpin>(reader: Option<R>) -> String {
    use tokio::io::AsyncReadExt;
    let Some(mut reader) = reader else {
        return String::new();
    };
    let mut buf = Vec::new();
    let _ = reader.read_to_end(&mut buf).await;
    String::from_utf8_lossy(&buf).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_kind_parse() {
        assert_eq!(RuntimeKind::parse("docker").unwrap(), RuntimeKind::Docker);
        assert_eq!(RuntimeKind::parse("PODMAN").unwrap(), RuntimeKind::Podman);
        assert_eq!(
            RuntimeKind::parse("kubernetes").unwrap(),
            RuntimeKind::Kubernetes
        );
        assert_eq!(RuntimeKind::parse("k8s").unwrap(), RuntimeKind::Kubernetes);
        assert!(RuntimeKind::parse("lxc").is_err());
    }

    #[test]
    fn runtime_kind_cli_names() {
        assert_eq!(RuntimeKind::Docker.cli(), "docker");
        assert_eq!(RuntimeKind::Podman.cli(), "podman");
        assert_eq!(RuntimeKind::Kubernetes.cli(), "kubectl");
    }

    #[test]
    fn process_from_ps_aux_line() {
        let line = "app 42 0.1 1.2 123456 7890 ? Ssl 10:00 0:01 python -m gunicorn app:api";
        let process = ProcessInfo::from_ps_line(line, Language::Py).unwrap();
        assert_eq!(process.pid, 42);
        assert_eq!(process.user.as_deref(), Some("app"));
        assert!(process.command.starts_with("python -m gunicorn"));
        assert!(process.is_language_candidate);
    }

    #[test]
    fn process_from_proc_fallback_line() {
        let process = ProcessInfo::from_ps_line("17 node server.js", Language::Js).unwrap();
        assert_eq!(process.pid, 17);
        assert!(process.user.is_none());
        assert!(process.is_language_candidate);
    }

    #[test]
    fn process_non_candidate_flagged_false() {
        let process = ProcessInfo::from_ps_line("9 nginx -g daemon off;", Language::Py).unwrap();
        assert!(!process.is_language_candidate);
    }

    #[test]
    fn process_garbage_lines_skipped() {
        assert!(ProcessInfo::from_ps_line("", Language::Py).is_none());
        assert!(ProcessInfo::from_ps_line("justoneword", Language::Py).is_none());
        assert!(ProcessInfo::from_ps_line("notapid cmdline", Language::Py).is_none());
    }

    #[test]
    fn candidate_detection_per_language() {
        assert!(is_candidate("python3 app.py", Language::Py));
        assert!(is_candidate("/usr/bin/node index.js", Language::Js));
        assert!(is_candidate("go run ./cmd/srv", Language::Go));
        assert!(!is_candidate("./srv", Language::Rust));
        assert!(!is_candidate("nginx", Language::Py));
    }

    #[test]
    fn exec_result_success() {
        let ok = ExecResult {
            exit_code: 0,
            stdout: "x".into(),
            stderr: String::new(),
            timed_out: false,
        };
        assert!(ok.success());
        let failed = ExecResult {
            exit_code: 1,
            ..ok.clone()
        };
        assert!(!failed.success());
        let timed_out = ExecResult {
            exit_code: 0,
            timed_out: true,
            ..ok
        };
        assert!(!timed_out.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_cli_captures_output_and_exit_code() {
        let result = run_cli("sh", &["-c", "echo out; echo err >&2; exit 3"], CLI_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.stdout.trim(), "out");
        assert_eq!(result.stderr.trim(), "err");
        assert!(!result.timed_out);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_cli_times_out() {
        let result = run_cli("sh", &["-c", "sleep 5"], Duration::from_millis(100))
            .await
            .unwrap();
        assert!(result.timed_out);
        assert_eq!(result.exit_code, -1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_cli_missing_binary_is_io_error() {
        let err = run_cli("definitely-not-a-cli-xyz", &[], CLI_TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, ContainerError::Io(_)));
    }
}
