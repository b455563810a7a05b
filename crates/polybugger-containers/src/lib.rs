//! polybugger-containers — debugging processes inside container runtimes.
//!
//! Wraps the docker/podman/kubectl CLIs: list candidate processes, inject
//! the language's debug stub, forward a local port, and hand a TCP
//! endpoint back to the session layer. The runtimes are driven strictly
//! at the command/exit-code level.

pub mod bridge;
pub mod docker;
pub mod error;
pub mod kubernetes;
pub mod runtime;

pub use bridge::{
    allocate_local_port, attach_in_container, launch_in_container, stdio_stub_command, AttachPlan,
    PortForward, StubCommand, DEFAULT_STUB_PORT,
};
pub use docker::DockerRuntime;
pub use error::ContainerError;
pub use kubernetes::KubernetesRuntime;
pub use runtime::{
    runtime_for, ContainerRuntime, ExecResult, ProcessInfo, RuntimeKind,
};
