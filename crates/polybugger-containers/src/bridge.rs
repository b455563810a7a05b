//! Attach/launch orchestration for containerised debuggees.
//!
//! The attach path: resolve the target pid, inject the language's debug
//! stub, allocate a free local port, forward it into the container, and
//! hand back a loopback TCP endpoint for the session's transport. The
//! forward is owned by the caller (ultimately the session) and torn down
//! on terminate.

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use polybugger_adapters::Language;

use crate::error::ContainerError;
use crate::runtime::{ContainerRuntime, ProcessInfo};

/// Default port the injected stub listens on inside the container.
pub const DEFAULT_STUB_PORT: u16 = 5678;

/// Everything a session needs to attach to a containerised process.
#[derive(Debug)]
pub struct AttachPlan {
    /// Host to connect to (always loopback).
    pub host: String,
    /// The forwarded local port.
    pub port: u16,
    /// The pid that was injected, when attaching to an existing process.
    pub pid: Option<i64>,
    /// The live forward; drop or `stop` to tear it down.
    pub forward: PortForward,
}

/// Host-side command line that runs a DAP stub inside the container with
/// inherited stdio (`launch_in_container` mode).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubCommand {
    /// The runtime CLI binary.
    pub command: String,
    /// Its arguments.
    pub args: Vec<String>,
}

/// A live port forward from the host loopback into a container.
#[derive(Debug)]
pub struct PortForward {
    local_port: u16,
    inner: ForwardInner,
}

#[derive(Debug)]
enum ForwardInner {
    /// In-process TCP relay to the container's address (docker/podman).
    Relay { shutdown: watch::Sender<bool> },
    /// A `kubectl port-forward` child.
    Child { child: tokio::process::Child },
}

impl PortForward {
    /// The bound local port.
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Start an in-process relay: accept on `127.0.0.1:local_port`
    /// (0 picks a free port) and pipe each connection to
    /// `remote_host:remote_port`.
    pub async fn relay(
        local_port: u16,
        remote_host: String,
        remote_port: u16,
    ) -> Result<Self, ContainerError> {
        let listener = TcpListener::bind(("127.0.0.1", local_port))
            .await
            .map_err(|e| ContainerError::PortAllocationFailed(e.to_string()))?;
        let local_port = listener
            .local_addr()
            .map_err(|e| ContainerError::PortAllocationFailed(e.to_string()))?
            .port();

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    a = listener.accept() => a,
                    _ = shutdown_rx.changed() => break,
                };
                let Ok((mut inbound, _)) = accepted else { break };
                let remote_host = remote_host.clone();
                tokio::spawn(async move {
                    match TcpStream::connect((remote_host.as_str(), remote_port)).await {
                        Ok(mut outbound) => {
                            let _ =
                                tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await;
                        }
                        Err(e) => {
                            tracing::warn!("relay connect to {remote_host}:{remote_port}: {e}")
                        }
                    }
                });
            }
        });

        Ok(Self {
            local_port,
            inner: ForwardInner::Relay { shutdown },
        })
    }

    /// Spawn `kubectl port-forward` for the pod.
    pub async fn kubectl(
        namespace: &str,
        pod: &str,
        local_port: u16,
        remote_port: u16,
    ) -> Result<Self, ContainerError> {
        let local_port = if local_port == 0 {
            allocate_local_port().await?
        } else {
            local_port
        };

        let child = tokio::process::Command::new("kubectl")
            .args([
                "port-forward",
                "-n",
                namespace,
                &format!("pod/{pod}"),
                &format!("{local_port}:{remote_port}"),
            ])
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ContainerError::PortAllocationFailed(format!("kubectl: {e}")))?;

        Ok(Self {
            local_port,
            inner: ForwardInner::Child { child },
        })
    }

    /// Tear the forward down. Dropping the guard has the same effect.
    pub async fn stop(mut self) {
        match &mut self.inner {
            ForwardInner::Relay { shutdown } => {
                let _ = shutdown.send(true);
            }
            ForwardInner::Child { child } => {
                let _ = child.start_kill();
                let _ = child.wait().await;
            }
        }
    }
}

impl Drop for PortForward {
    fn drop(&mut self) {
        if let ForwardInner::Relay { shutdown } = &self.inner {
            let _ = shutdown.send(true);
        }
        // kubectl children are killed by kill_on_drop.
    }
}

/// Bind an ephemeral loopback port and release it for immediate reuse.
pub async fn allocate_local_port() -> Result<u16, ContainerError> {
    let listener = TcpListener::bind(("127.0.0.1", 0))
        .await
        .map_err(|e| ContainerError::PortAllocationFailed(e.to_string()))?;
    let port = listener
        .local_addr()
        .map_err(|e| ContainerError::PortAllocationFailed(e.to_string()))?
        .port();
    Ok(port)
}

/// Attach to a process inside a container: inject the stub, forward a
/// port, and return the endpoint to dial.
pub async fn attach_in_container(
    runtime: &ContainerRuntime,
    container: &str,
    pid: Option<i64>,
    process_name: Option<&str>,
    language: Language,
    stub_port: u16,
) -> Result<AttachPlan, ContainerError> {
    if !runtime.is_available().await {
        return Err(ContainerError::RuntimeUnavailable(runtime.cli().to_string()));
    }

    let pid = match pid {
        Some(pid) => pid,
        None => pick_candidate(runtime, container, process_name, language).await?,
    };

    inject_stub(runtime, container, pid, language, stub_port).await?;

    let forward = runtime.forward_port(container, 0, stub_port).await?;
    let port = forward.local_port();
    Ok(AttachPlan {
        host: "127.0.0.1".into(),
        port,
        pid: Some(pid),
        forward,
    })
}

/// Launch a program under the language's stub inside the container, then
/// forward a port to it.
pub async fn launch_in_container(
    runtime: &ContainerRuntime,
    container: &str,
    program: &str,
    args: &[String],
    language: Language,
    stub_port: u16,
) -> Result<AttachPlan, ContainerError> {
    if !runtime.is_available().await {
        return Err(ContainerError::RuntimeUnavailable(runtime.cli().to_string()));
    }
    if language != Language::Py {
        return Err(ContainerError::InjectionFailed {
            stderr: format!("no in-container launch stub for language '{language}'"),
        });
    }

    match runtime {
        ContainerRuntime::Cli(rt) => {
            rt.launch_python_stub(container, program, args, stub_port)
                .await?
        }
        ContainerRuntime::Kube(rt) => {
            rt.ensure_debugpy(container).await?;
            let listen = format!("0.0.0.0:{stub_port}");
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
            let result = rt.exec(container, &command, true).await?;
            if !result.success() {
                return Err(ContainerError::InjectionFailed {
                    stderr: result.stderr,
                });
            }
        }
    }

    let forward = runtime.forward_port(container, 0, stub_port).await?;
    let port = forward.local_port();
    Ok(AttachPlan {
        host: "127.0.0.1".into(),
        port,
        pid: None,
        forward,
    })
}

async fn pick_candidate(
    runtime: &ContainerRuntime,
    container: &str,
    process_name: Option<&str>,
    language: Language,
) -> Result<i64, ContainerError> {
    let processes = runtime.list_processes(container, language).await?;
    let candidates: Vec<&ProcessInfo> = processes
        .iter()
        .filter(|p| p.is_language_candidate)
        .filter(|p| {
            process_name.map_or(true, |name| {
                p.command.to_lowercase().contains(&name.to_lowercase())
            })
        })
        .collect();
    match candidates.len() {
        0 => Err(ContainerError::NoProcess(format!(
            "no {language} process in container '{container}'"
        ))),
        1 => Ok(candidates[0].pid),
        n => Err(ContainerError::AmbiguousProcess {
            count: n,
            candidates: candidates
                .iter()
                .map(|p| (p.pid, p.command.clone()))
                .collect(),
        }),
    }
}

async fn inject_stub(
    runtime: &ContainerRuntime,
    container: &str,
    pid: i64,
    language: Language,
    stub_port: u16,
) -> Result<(), ContainerError> {
    match (runtime, language) {
        (ContainerRuntime::Cli(rt), Language::Py) => {
            rt.inject_python_stub(container, pid, stub_port).await
        }
        (ContainerRuntime::Kube(rt), Language::Py) => {
            rt.ensure_debugpy(container).await?;
            let listen = format!("0.0.0.0:{stub_port}");
            let pid_str = pid.to_string();
            let result = rt
                .exec(
                    container,
                    &[
                        "python", "-m", "debugpy", "--listen", &listen, "--pid", &pid_str,
                    ],
                    false,
                )
                .await?;
            if result.success() {
                Ok(())
            } else {
                let lowered = result.stderr.to_lowercase();
                if lowered.contains("ptrace") || lowered.contains("operation not permitted") {
                    Err(ContainerError::PtraceDenied {
                        stderr: result.stderr,
                        instructions: vec![
                            "The pod needs SYS_PTRACE; add it to the container securityContext."
                                .into(),
                        ],
                    })
                } else {
                    Err(ContainerError::InjectionFailed {
                        stderr: result.stderr,
                    })
                }
            }
        }
        (_, other) => Err(ContainerError::InjectionFailed {
            stderr: format!("no injectable debug stub for language '{other}'"),
        }),
    }
}

/// Host-side stdio command for running a DAP adapter inside the
/// container (`docker exec -i ... python -m debugpy.adapter`).
pub fn stdio_stub_command(
    runtime: &ContainerRuntime,
    container: &str,
    language: Language,
) -> Result<StubCommand, ContainerError> {
    let stub: Vec<String> = match language {
        Language::Py => vec!["python".into(), "-m".into(), "debugpy.adapter".into()],
        other => {
            return Err(ContainerError::InjectionFailed {
                stderr: format!("no stdio debug stub for language '{other}'"),
            })
        }
    };

    match runtime {
        ContainerRuntime::Cli(rt) => {
            let mut args = vec!["exec".to_string(), "-i".to_string(), container.to_string()];
            args.extend(stub);
            Ok(StubCommand {
                command: rt.cli().to_string(),
                args,
            })
        }
        ContainerRuntime::Kube(_) => {
            let mut args = vec![
                "exec".to_string(),
                "-i".to_string(),
                container.to_string(),
                "--".to_string(),
            ];
            args.extend(stub);
            Ok(StubCommand {
                command: "kubectl".to_string(),
                args,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker::DockerRuntime;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn bridge_allocate_local_port_is_usable() {
        let port = allocate_local_port().await.unwrap();
        assert!(port > 0);
        // The port is free again after allocation.
        let listener = TcpListener::bind(("127.0.0.1", port)).await;
        assert!(listener.is_ok());
    }

    #[tokio::test]
    async fn bridge_relay_pipes_both_directions() {
        // Remote end: an echo server.
        let remote = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let remote_port = remote.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = remote.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let n = socket.read(&mut buf).await.unwrap();
            socket.write_all(&buf[..n]).await.unwrap();
        });

        let forward = PortForward::relay(0, "127.0.0.1".into(), remote_port)
            .await
            .unwrap();
        let mut client = TcpStream::connect(("127.0.0.1", forward.local_port()))
            .await
            .unwrap();
        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        forward.stop().await;
    }

    #[tokio::test]
    async fn bridge_relay_stop_frees_the_port() {
        let remote = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let remote_port = remote.local_addr().unwrap().port();

        let forward = PortForward::relay(0, "127.0.0.1".into(), remote_port)
            .await
            .unwrap();
        let port = forward.local_port();
        forward.stop().await;

        // Give the accept loop a beat to exit, then the port is free.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(TcpListener::bind(("127.0.0.1", port)).await.is_ok());
    }

    #[tokio::test]
    async fn bridge_attach_unavailable_runtime() {
        let runtime = ContainerRuntime::Cli(DockerRuntime::new("definitely-not-docker-xyz"));
        let err = attach_in_container(
            &runtime,
            "api",
            Some(1),
            None,
            Language::Py,
            DEFAULT_STUB_PORT,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ContainerError::RuntimeUnavailable(_)));
    }

    #[test]
    fn bridge_stdio_stub_command_docker() {
        let runtime = ContainerRuntime::Cli(DockerRuntime::new("docker"));
        let stub = stdio_stub_command(&runtime, "api", Language::Py).unwrap();
        assert_eq!(stub.command, "docker");
        assert_eq!(
            stub.args,
            vec!["exec", "-i", "api", "python", "-m", "debugpy.adapter"]
        );
    }

    #[test]
    fn bridge_stdio_stub_command_rejects_unsupported_language() {
        let runtime = ContainerRuntime::Cli(DockerRuntime::new("docker"));
        let err = stdio_stub_command(&runtime, "api", Language::Go).unwrap_err();
        assert!(matches!(err, ContainerError::InjectionFailed { .. }));
    }
}
