//! The uniform broker surface.
//!
//! One facade mapping the tool-level operations onto registry + session
//! calls, shared by the external fronts (tool-call RPC and HTTP). Every
//! state-changing operation writes through to the session store so
//! sessions can be re-announced after a restart.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use polybugger_adapters::{
    profile_for, supported_languages, AttachConfig, Language, LaunchConfig,
};
use polybugger_containers::{
    attach_in_container, launch_in_container, runtime_for, ProcessInfo, RuntimeKind,
    DEFAULT_STUB_PORT,
};
use polybugger_session::{
    BreakpointSpec, BreakpointView, CallChainFrame, EvaluateView, EventPage, FrameView,
    InspectTarget, Inspection, OutputPage, OutputStream, ScopeView, Session, SessionConfig,
    SessionSnapshot, StepMode, VariableView, Watch, WatchEvalView,
};

use crate::error::BrokerError;
use crate::persist::{PersistedSession, SessionStore};
use crate::registry::{Registry, RegistryConfig};

/// Broker construction parameters.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Root of the persistence layer (`<data_dir>/sessions/*.json`).
    pub data_dir: PathBuf,
    /// Registry limits.
    pub registry: RegistryConfig,
}

/// Request to create a session.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateSessionRequest {
    /// Language tag ("py", "js", "go", "rust", "native" or an alias).
    pub language: String,
    /// Absolute project root.
    pub project_root: PathBuf,
    /// Optional human-readable name.
    #[serde(default)]
    pub name: Option<String>,
}

/// One supported language.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LanguageInfo {
    /// The language tag.
    pub language: Language,
    /// The backing adapter.
    pub backend: &'static str,
}

/// A session recoverable from a previous broker run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoverableSession {
    /// Session id.
    pub id: String,
    /// Optional name.
    pub name: Option<String>,
    /// Language tag.
    pub language: Language,
    /// Project root.
    pub project_root: PathBuf,
    /// When the snapshot was written.
    pub saved_at: DateTime<Utc>,
    /// Persisted breakpoints.
    pub breakpoint_count: usize,
    /// Persisted watches.
    pub watch_count: usize,
}

/// Request to attach to a process inside a container.
#[derive(Debug, Clone, Deserialize)]
pub struct ContainerAttachRequest {
    /// Session to attach (must be CREATED).
    pub session_id: String,
    /// Runtime tag ("docker", "podman", "kubernetes").
    pub runtime: String,
    /// Container id/name (pod name for Kubernetes).
    pub container: String,
    /// Target pid; resolved from the process list when omitted.
    #[serde(default)]
    pub pid: Option<i64>,
    /// Narrow the candidate processes by command-line substring when no
    /// pid is given.
    #[serde(default)]
    pub process_name: Option<String>,
    /// Port the injected stub listens on (default 5678).
    #[serde(default)]
    pub stub_port: Option<u16>,
}

/// Request to launch a program inside a container.
#[derive(Debug, Clone, Deserialize)]
pub struct ContainerLaunchRequest {
    /// Session to attach (must be CREATED).
    pub session_id: String,
    /// Runtime tag.
    pub runtime: String,
    /// Container id/name.
    pub container: String,
    /// Program path inside the container.
    pub program: String,
    /// Program arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Port the stub listens on (default 5678).
    #[serde(default)]
    pub stub_port: Option<u16>,
}

/// The broker: registry + store + the operation surface.
pub struct Broker {
    registry: Arc<Registry>,
    store: SessionStore,
}

impl Broker {
    /// Open the store and build an empty registry.
    pub fn new(config: BrokerConfig) -> Result<Self, BrokerError> {
        let store = SessionStore::open(&config.data_dir)?;
        Ok(Self {
            registry: Arc::new(Registry::new(config.registry)),
            store,
        })
    }

    /// The registry, for spawning the idle sweeper.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The session store.
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    // -- session lifecycle --------------------------------------------------

    /// Create a session and persist its descriptor.
    pub fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<SessionSnapshot, BrokerError> {
        let language = Language::parse(&request.language)
            .map_err(|e| BrokerError::InvalidArgument(e.to_string()))?;
        if !request.project_root.is_absolute() {
            return Err(BrokerError::InvalidArgument(format!(
                "project_root must be absolute: {}",
                request.project_root.display()
            )));
        }

        let session = Session::new(SessionConfig {
            id: format!("dbg-{}", uuid::Uuid::new_v4()),
            name: request.name,
            language,
            project_root: request.project_root,
        });
        let session = self.registry.insert(session)?;
        self.persist(&session);
        Ok(session.snapshot())
    }

    /// Snapshot of all sessions.
    pub fn list_sessions(&self) -> Vec<SessionSnapshot> {
        self.registry.list().iter().map(|s| s.snapshot()).collect()
    }

    /// One session's snapshot.
    pub fn get_session(&self, id: &str) -> Result<SessionSnapshot, BrokerError> {
        Ok(self.registry.get(id)?.snapshot())
    }

    /// Terminate a session, drop it from the registry, and remove its
    /// snapshot. Idempotent for already-terminated sessions.
    pub async fn terminate_session(&self, id: &str) -> Result<(), BrokerError> {
        let session = self.registry.get(id)?;
        session.terminate().await?;
        self.registry.remove(id);
        self.store.remove(id)?;
        Ok(())
    }

    /// The supported languages and their backends.
    pub fn list_languages(&self) -> Vec<LanguageInfo> {
        supported_languages()
            .iter()
            .map(|&language| LanguageInfo {
                language,
                backend: profile_for(language).adapter_id(),
            })
            .collect()
    }

    // -- breakpoints --------------------------------------------------------

    /// Replace the breakpoint set for a file.
    pub async fn set_breakpoints(
        &self,
        id: &str,
        path: &Path,
        specs: Vec<BreakpointSpec>,
    ) -> Result<Vec<BreakpointView>, BrokerError> {
        let session = self.registry.get(id)?;
        let views = session.set_breakpoints(path, specs).await?;
        self.persist(&session);
        Ok(views)
    }

    /// The stored breakpoint intent for a session.
    pub fn get_breakpoints(
        &self,
        id: &str,
    ) -> Result<std::collections::BTreeMap<String, Vec<BreakpointSpec>>, BrokerError> {
        Ok(self.registry.get(id)?.breakpoints_intent())
    }

    /// Clear breakpoints for one file, or all.
    pub async fn clear_breakpoints(
        &self,
        id: &str,
        path: Option<&Path>,
    ) -> Result<usize, BrokerError> {
        let session = self.registry.get(id)?;
        let count = session.clear_breakpoints(path).await?;
        self.persist(&session);
        Ok(count)
    }

    // -- execution ----------------------------------------------------------

    /// Launch the session's program.
    pub async fn launch(&self, id: &str, config: LaunchConfig) -> Result<(), BrokerError> {
        let session = self.registry.get(id)?;
        let result = session.launch(config).await;
        self.persist(&session);
        Ok(result?)
    }

    /// Attach the session to a running process or stub.
    pub async fn attach(&self, id: &str, config: AttachConfig) -> Result<(), BrokerError> {
        let session = self.registry.get(id)?;
        let result = session.attach(config).await;
        self.persist(&session);
        Ok(result?)
    }

    /// Continue execution.
    pub async fn continue_(&self, id: &str, thread_id: Option<i64>) -> Result<(), BrokerError> {
        Ok(self.registry.get(id)?.continue_(thread_id).await?)
    }

    /// Step.
    pub async fn step(
        &self,
        id: &str,
        mode: &str,
        thread_id: Option<i64>,
    ) -> Result<(), BrokerError> {
        let mode = StepMode::parse(mode)?;
        Ok(self.registry.get(id)?.step(mode, thread_id).await?)
    }

    /// Pause.
    pub async fn pause(&self, id: &str, thread_id: Option<i64>) -> Result<(), BrokerError> {
        Ok(self.registry.get(id)?.pause(thread_id).await?)
    }

    // -- inspection ---------------------------------------------------------

    /// Stack frames.
    pub async fn stacktrace(
        &self,
        id: &str,
        thread_id: Option<i64>,
        start_frame: Option<i64>,
        levels: Option<i64>,
    ) -> Result<Vec<FrameView>, BrokerError> {
        Ok(self
            .registry
            .get(id)?
            .stacktrace(thread_id, start_frame, levels)
            .await?)
    }

    /// Scopes of a frame.
    pub async fn scopes(&self, id: &str, frame_id: i64) -> Result<Vec<ScopeView>, BrokerError> {
        Ok(self.registry.get(id)?.scopes(frame_id).await?)
    }

    /// Children of a variables reference.
    pub async fn variables(
        &self,
        id: &str,
        variables_reference: i64,
        filter: Option<&str>,
        start: Option<i64>,
        count: Option<i64>,
    ) -> Result<Vec<VariableView>, BrokerError> {
        Ok(self
            .registry
            .get(id)?
            .variables(variables_reference, filter, start, count)
            .await?)
    }

    /// Evaluate an expression.
    pub async fn evaluate(
        &self,
        id: &str,
        expression: &str,
        frame_id: Option<i64>,
        context: Option<&str>,
    ) -> Result<EvaluateView, BrokerError> {
        Ok(self
            .registry
            .get(id)?
            .evaluate(expression, frame_id, context.unwrap_or("repl"))
            .await?)
    }

    /// Smart-inspect a reference or expression.
    pub async fn smart_inspect(
        &self,
        id: &str,
        target: InspectTarget,
        frame_id: Option<i64>,
    ) -> Result<Inspection, BrokerError> {
        Ok(self.registry.get(id)?.smart_inspect(target, frame_id).await?)
    }

    /// Call chain with inline source context.
    pub async fn call_chain(
        &self,
        id: &str,
        thread_id: Option<i64>,
        max_frames: Option<i64>,
    ) -> Result<Vec<CallChainFrame>, BrokerError> {
        Ok(self
            .registry
            .get(id)?
            .call_chain(thread_id, max_frames)
            .await?)
    }

    // -- watches ------------------------------------------------------------

    /// Add a watch; returns its id.
    pub fn watch_add(&self, id: &str, expression: &str) -> Result<String, BrokerError> {
        let session = self.registry.get(id)?;
        let watch_id = session.watch_add(expression)?;
        self.persist(&session);
        Ok(watch_id)
    }

    /// Remove a watch.
    pub fn watch_remove(&self, id: &str, watch_id: &str) -> Result<(), BrokerError> {
        let session = self.registry.get(id)?;
        session.watch_remove(watch_id)?;
        self.persist(&session);
        Ok(())
    }

    /// All watches with last results.
    pub fn watch_list(&self, id: &str) -> Result<Vec<Watch>, BrokerError> {
        Ok(self.registry.get(id)?.watch_list())
    }

    /// Evaluate every watch in a frame.
    pub async fn watch_eval_all(
        &self,
        id: &str,
        frame_id: Option<i64>,
    ) -> Result<Vec<WatchEvalView>, BrokerError> {
        Ok(self.registry.get(id)?.watch_eval_all(frame_id).await?)
    }

    // -- events and output --------------------------------------------------

    /// Poll debugger events.
    pub async fn poll_events(
        &self,
        id: &str,
        since_offset: u64,
        max: usize,
        wait_ms: Option<u64>,
    ) -> Result<EventPage, BrokerError> {
        let session = self.registry.get(id)?;
        let wait = wait_ms.filter(|ms| *ms > 0).map(Duration::from_millis);
        Ok(session.poll_events(since_offset, max, wait).await)
    }

    /// Read buffered output.
    pub fn get_output(
        &self,
        id: &str,
        stream: Option<OutputStream>,
        since_offset: u64,
        max: usize,
    ) -> Result<OutputPage, BrokerError> {
        Ok(self.registry.get(id)?.get_output(stream, since_offset, max))
    }

    // -- recovery -----------------------------------------------------------

    /// Snapshots recoverable from a previous broker run: persisted
    /// sessions that are not currently live.
    pub fn list_recoverable(&self) -> Result<Vec<RecoverableSession>, BrokerError> {
        let live: std::collections::HashSet<String> = self
            .registry
            .list()
            .iter()
            .map(|s| s.id().to_string())
            .collect();
        Ok(self
            .store
            .list()?
            .into_iter()
            .filter(|s| !live.contains(&s.id))
            .map(|s| RecoverableSession {
                breakpoint_count: s.breakpoint_count(),
                watch_count: s.watch_expressions.len(),
                id: s.id,
                name: s.name,
                language: s.language,
                project_root: s.project_root,
                saved_at: s.saved_at,
            })
            .collect())
    }

    /// Re-instantiate a persisted session in CREATED with its breakpoints
    /// and watches. Recovery reconstructs intent, never a live wire; the
    /// caller re-launches or re-attaches.
    pub fn recover_session(&self, id: &str) -> Result<SessionSnapshot, BrokerError> {
        if self.registry.get(id).is_ok() {
            return Err(BrokerError::InvalidArgument(format!(
                "session {id} is already live"
            )));
        }
        let persisted = self.store.load(id)?;

        let session = Session::new(SessionConfig {
            id: persisted.id.clone(),
            name: persisted.name.clone(),
            language: persisted.language,
            project_root: persisted.project_root.clone(),
        });
        let intent: Vec<(PathBuf, Vec<BreakpointSpec>)> = persisted
            .breakpoints
            .iter()
            .map(|(path, specs)| (PathBuf::from(path), specs.clone()))
            .collect();
        session.restore_breakpoints(&intent);
        session.restore_watches(&persisted.watch_expressions);

        let session = self.registry.insert(session)?;
        self.persist(&session);
        Ok(session.snapshot())
    }

    // -- container bridge ---------------------------------------------------

    /// List processes inside a container, flagging candidates for the
    /// given language.
    pub async fn container_list_processes(
        &self,
        runtime: &str,
        container: &str,
        language: &str,
    ) -> Result<Vec<ProcessInfo>, BrokerError> {
        let kind = RuntimeKind::parse(runtime)?;
        let language = Language::parse(language)
            .map_err(|e| BrokerError::InvalidArgument(e.to_string()))?;
        let runtime = runtime_for(kind);
        if !runtime.is_available().await {
            return Err(
                polybugger_containers::ContainerError::RuntimeUnavailable(
                    runtime.cli().to_string(),
                )
                .into(),
            );
        }
        Ok(runtime.list_processes(container, language).await?)
    }

    /// Attach a CREATED session to a process inside a container: inject
    /// the stub, forward a port, and attach over the forwarded endpoint.
    /// The forward is torn down when the session terminates.
    pub async fn container_attach(
        &self,
        request: ContainerAttachRequest,
    ) -> Result<SessionSnapshot, BrokerError> {
        let session = self.registry.get(&request.session_id)?;
        let kind = RuntimeKind::parse(&request.runtime)?;
        let runtime = runtime_for(kind);
        let stub_port = request.stub_port.unwrap_or(DEFAULT_STUB_PORT);

        let plan = attach_in_container(
            &runtime,
            &request.container,
            request.pid,
            request.process_name.as_deref(),
            session.language(),
            stub_port,
        )
        .await?;

        self.finish_container_attach(&session, plan).await
    }

    /// Launch a program under the debug stub inside a container and
    /// attach a CREATED session to it.
    pub async fn container_launch(
        &self,
        request: ContainerLaunchRequest,
    ) -> Result<SessionSnapshot, BrokerError> {
        let session = self.registry.get(&request.session_id)?;
        let kind = RuntimeKind::parse(&request.runtime)?;
        let runtime = runtime_for(kind);
        let stub_port = request.stub_port.unwrap_or(DEFAULT_STUB_PORT);

        let plan = launch_in_container(
            &runtime,
            &request.container,
            &request.program,
            &request.args,
            session.language(),
            stub_port,
        )
        .await?;

        self.finish_container_attach(&session, plan).await
    }

    async fn finish_container_attach(
        &self,
        session: &Arc<Session>,
        plan: polybugger_containers::AttachPlan,
    ) -> Result<SessionSnapshot, BrokerError> {
        let local_port = plan.port;
        let config = AttachConfig {
            host: Some(plan.host.clone()),
            port: Some(local_port),
            process_id: plan.pid,
            path_mappings: Vec::new(),
        };

        session.set_forwarded_port(local_port);
        let forward = plan.forward;
        session.add_cleanup(Box::new(move || drop(forward)));

        let result = session.attach(config).await;
        self.persist(session);
        result?;
        Ok(session.snapshot())
    }

    fn persist(&self, session: &Arc<Session>) {
        let snapshot = PersistedSession::capture(session);
        if let Err(e) = self.store.save(&snapshot) {
            tracing::warn!(session = session.id(), "failed to persist session: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broker_with(dir: &Path, max_sessions: usize) -> Broker {
        Broker::new(BrokerConfig {
            data_dir: dir.to_path_buf(),
            registry: RegistryConfig {
                max_sessions,
                ..Default::default()
            },
        })
        .unwrap()
    }

    fn create_request() -> CreateSessionRequest {
        CreateSessionRequest {
            language: "py".into(),
            project_root: PathBuf::from("/tmp/p"),
            name: Some("t".into()),
        }
    }

    #[test]
    fn api_create_and_get_session() {
        let dir = tempfile::TempDir::new().unwrap();
        let broker = broker_with(dir.path(), 10);

        let created = broker.create_session(create_request()).unwrap();
        assert!(created.id.starts_with("dbg-"));
        assert_eq!(created.language, Language::Py);

        let fetched = broker.get_session(&created.id).unwrap();
        assert_eq!(fetched.id, created.id);

        // The descriptor is persisted immediately.
        assert!(dir
            .path()
            .join("sessions")
            .join(format!("{}.json", created.id))
            .exists());
    }

    #[test]
    fn api_create_rejects_unknown_language() {
        let dir = tempfile::TempDir::new().unwrap();
        let broker = broker_with(dir.path(), 10);
        let err = broker
            .create_session(CreateSessionRequest {
                language: "cobol".into(),
                project_root: PathBuf::from("/tmp/p"),
                name: None,
            })
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");
    }

    #[test]
    fn api_create_rejects_relative_root() {
        let dir = tempfile::TempDir::new().unwrap();
        let broker = broker_with(dir.path(), 10);
        let err = broker
            .create_session(CreateSessionRequest {
                language: "py".into(),
                project_root: PathBuf::from("relative/dir"),
                name: None,
            })
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");
    }

    #[test]
    fn api_capacity_exceeded_on_third_of_two() {
        let dir = tempfile::TempDir::new().unwrap();
        let broker = broker_with(dir.path(), 2);
        broker.create_session(create_request()).unwrap();
        broker.create_session(create_request()).unwrap();
        let err = broker.create_session(create_request()).unwrap_err();
        assert_eq!(err.kind(), "capacity_exceeded");
        assert_eq!(broker.list_sessions().len(), 2);
    }

    #[tokio::test]
    async fn api_terminate_removes_session_and_snapshot() {
        let dir = tempfile::TempDir::new().unwrap();
        let broker = broker_with(dir.path(), 10);
        let created = broker.create_session(create_request()).unwrap();

        broker.terminate_session(&created.id).await.unwrap();
        assert!(broker.get_session(&created.id).is_err());
        assert!(!dir
            .path()
            .join("sessions")
            .join(format!("{}.json", created.id))
            .exists());
    }

    #[tokio::test]
    async fn api_breakpoints_persist_through_recovery() {
        let dir = tempfile::TempDir::new().unwrap();
        let id = {
            let broker = broker_with(dir.path(), 10);
            let created = broker.create_session(create_request()).unwrap();
            broker
                .set_breakpoints(
                    &created.id,
                    Path::new("/tmp/p/s.py"),
                    vec![BreakpointSpec {
                        line: 3,
                        condition: Some("x > 1".into()),
                        hit_condition: None,
                    }],
                )
                .await
                .unwrap();
            broker.watch_add(&created.id, "x + 1").unwrap();
            created.id
            // Broker dropped without terminating: the crash case.
        };

        let broker = broker_with(dir.path(), 10);
        let recoverable = broker.list_recoverable().unwrap();
        assert_eq!(recoverable.len(), 1);
        assert_eq!(recoverable[0].id, id);
        assert_eq!(recoverable[0].breakpoint_count, 1);
        assert_eq!(recoverable[0].watch_count, 1);

        let recovered = broker.recover_session(&id).unwrap();
        assert_eq!(recovered.state, polybugger_session::SessionState::Created);

        let breakpoints = broker.get_breakpoints(&id).unwrap();
        let specs = breakpoints.get("/tmp/p/s.py").unwrap();
        assert_eq!(specs[0].line, 3);
        assert_eq!(specs[0].condition.as_deref(), Some("x > 1"));

        let watches = broker.watch_list(&id).unwrap();
        assert_eq!(watches.len(), 1);
        assert_eq!(watches[0].expression, "x + 1");
    }

    #[test]
    fn api_recover_two_sessions_after_crash() {
        let dir = tempfile::TempDir::new().unwrap();
        let (first, second) = {
            let broker = broker_with(dir.path(), 10);
            let a = broker.create_session(create_request()).unwrap();
            let b = broker.create_session(create_request()).unwrap();
            (a.id, b.id)
        };

        let broker = broker_with(dir.path(), 10);
        let recoverable = broker.list_recoverable().unwrap();
        let ids: Vec<&str> = recoverable.iter().map(|r| r.id.as_str()).collect();
        assert!(ids.contains(&first.as_str()));
        assert!(ids.contains(&second.as_str()));

        broker.recover_session(&first).unwrap();
        // Recovered sessions stop being listed as recoverable.
        let recoverable = broker.list_recoverable().unwrap();
        assert_eq!(recoverable.len(), 1);
        assert_eq!(recoverable[0].id, second);
    }

    #[test]
    fn api_recover_unknown_id() {
        let dir = tempfile::TempDir::new().unwrap();
        let broker = broker_with(dir.path(), 10);
        let err = broker.recover_session("dbg-missing").unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn api_recover_live_session_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let broker = broker_with(dir.path(), 10);
        let created = broker.create_session(create_request()).unwrap();
        let err = broker.recover_session(&created.id).unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");
    }

    #[test]
    fn api_list_languages_covers_all_profiles() {
        let dir = tempfile::TempDir::new().unwrap();
        let broker = broker_with(dir.path(), 10);
        let languages = broker.list_languages();
        assert_eq!(languages.len(), 5);
        assert!(languages
            .iter()
            .any(|l| l.language == Language::Py && l.backend == "debugpy"));
        assert!(languages
            .iter()
            .any(|l| l.language == Language::Go && l.backend == "go"));
    }

    #[tokio::test]
    async fn api_operations_on_unknown_session() {
        let dir = tempfile::TempDir::new().unwrap();
        let broker = broker_with(dir.path(), 10);
        assert!(matches!(
            broker.get_session("nope").unwrap_err(),
            BrokerError::SessionNotFound(_)
        ));
        assert!(broker.continue_("nope", None).await.is_err());
        assert!(broker.poll_events("nope", 0, 10, None).await.is_err());
        assert!(broker.watch_list("nope").is_err());
    }

    #[tokio::test]
    async fn api_step_mode_validated() {
        let dir = tempfile::TempDir::new().unwrap();
        let broker = broker_with(dir.path(), 10);
        let created = broker.create_session(create_request()).unwrap();
        let err = broker.step(&created.id, "sideways", None).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");
    }

    #[tokio::test]
    async fn api_container_attach_unknown_runtime() {
        let dir = tempfile::TempDir::new().unwrap();
        let broker = broker_with(dir.path(), 10);
        let created = broker.create_session(create_request()).unwrap();
        let err = broker
            .container_attach(ContainerAttachRequest {
                session_id: created.id,
                runtime: "lxc".into(),
                container: "api".into(),
                pid: Some(1),
                process_name: None,
                stub_port: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "runtime_unavailable");
    }

    #[tokio::test]
    async fn api_container_list_processes_requires_live_runtime() {
        // Runtime tag parses but the CLI is absent (or the daemon down) in
        // most test environments; either a process list or a runtime
        // error is acceptable, but never a panic.
        let dir = tempfile::TempDir::new().unwrap();
        let broker = broker_with(dir.path(), 10);
        let _ = broker
            .container_list_processes("docker", "no-such-container", "py")
            .await;
    }
}
