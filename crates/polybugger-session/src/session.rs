//! The debug session.
//!
//! A session owns one adapter conversation end to end: transport, DAP
//! client, state machine, breakpoint table, watch list, output ring and
//! event queue. All public operations are request-initiated; the reader
//! side (event pump) is the sole writer of buffers and stop context, and
//! no lock is ever held across a DAP request.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Notify};

use polybugger_adapters::{profile_for, AdapterProfile, AttachConfig, Language, LaunchConfig};
use polybugger_dap::capabilities::AdapterCapabilities;
use polybugger_dap::client::{DapClient, InboundEvent};
use polybugger_dap::error::DapError;
use polybugger_dap::protocol::{
    Capabilities, ContinuedEventBody, ExitedEventBody, OutputEventBody, ScopesResponseBody,
    SetBreakpointsArguments, SetBreakpointsResponseBody, Source, SourceBreakpoint,
    StackTraceResponseBody, StoppedEventBody, ThreadsResponseBody, VariablesResponseBody,
};
use polybugger_dap::transport::{Transport, TransportEvent};

use crate::breakpoint::{BreakpointSpec, BreakpointTable, BreakpointView};
use crate::error::SessionError;
use crate::events::{EventKind, EventPage, EventQueue};
use crate::inspect::{inspect_reference, InspectOptions, Inspection, VariableFetcher};
use crate::output::{OutputBuffer, OutputPage, OutputStream};
use crate::state::{SessionState, StateMachine, StopContext, StopReason};
use crate::watch::{Watch, WatchList};

/// Maximum characters of a variable value preview.
const VALUE_PREVIEW_CAP: usize = 256;

/// Deadline for the best-effort disconnect during terminate.
const TERMINATE_TIMEOUT: Duration = Duration::from_secs(5);

/// Immutable facts needed to create a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Opaque unique id.
    pub id: String,
    /// Optional human-readable name.
    pub name: Option<String>,
    /// Language tag selecting the adapter profile.
    pub language: Language,
    /// Absolute project root.
    pub project_root: PathBuf,
}

/// Step granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepMode {
    /// Next line in the current frame.
    Over,
    /// Descend into calls.
    Into,
    /// Finish the current frame.
    Out,
}

impl StepMode {
    /// Parse the wire tag.
    pub fn parse(mode: &str) -> Result<Self, SessionError> {
        match mode {
            "over" => Ok(StepMode::Over),
            "into" => Ok(StepMode::Into),
            "out" => Ok(StepMode::Out),
            other => Err(SessionError::InvalidArgument(format!(
                "invalid step mode '{other}', use over|into|out"
            ))),
        }
    }

    fn command(&self) -> &'static str {
        match self {
            StepMode::Over => "next",
            StepMode::Into => "stepIn",
            StepMode::Out => "stepOut",
        }
    }
}

/// One stack frame as returned to fronts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameView {
    /// Frame id, valid while stopped.
    pub id: i64,
    /// Function name.
    pub name: String,
    /// Absolute source path, when known.
    pub path: Option<String>,
    /// 1-based line.
    pub line: i64,
    /// 1-based column.
    pub column: i64,
    /// Adapter rendering hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presentation_hint: Option<String>,
}

/// One scope of a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeView {
    /// Scope name ("Locals", "Globals").
    pub name: String,
    /// Handle for `variables`.
    pub variables_reference: i64,
    /// Whether expanding is expensive.
    pub expensive: bool,
}

/// One variable with a bounded value preview.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableView {
    /// Variable name.
    pub name: String,
    /// Value preview, capped at 256 characters.
    pub value: String,
    /// Type name, when reported.
    #[serde(rename = "type")]
    pub variable_type: Option<String>,
    /// Handle for children; 0 when the value is atomic.
    pub variables_reference: i64,
    /// Adapter rendering hint kind.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presentation_hint: Option<String>,
}

/// Result of an `evaluate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluateView {
    /// Rendered result.
    pub result: String,
    /// Handle for children; 0 when atomic.
    pub variables_reference: i64,
    /// Type name, when reported.
    #[serde(rename = "type")]
    pub result_type: Option<String>,
}

/// One line of source context around a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceContextLine {
    /// 1-based line number.
    pub line: i64,
    /// The line text.
    pub text: String,
    /// Whether this is the frame's current line.
    pub current: bool,
}

/// One frame in a call chain, with inline source context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallChainFrame {
    /// Depth from the top (0 = innermost).
    pub depth: usize,
    /// The frame itself.
    pub frame: FrameView,
    /// ±2 lines of source around the frame's line, when readable.
    pub context: Vec<SourceContextLine>,
}

/// Per-watch evaluation outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchEvalView {
    /// Watch id.
    pub id: String,
    /// The expression.
    pub expression: String,
    /// Value on success.
    pub value: Option<String>,
    /// Error on failure (adapter message, verbatim).
    pub error: Option<String>,
}

/// What to smart-inspect.
#[derive(Debug, Clone, PartialEq)]
pub enum InspectTarget {
    /// An existing variables reference.
    Reference(i64),
    /// An expression to evaluate first.
    Expression(String),
}

/// Point-in-time descriptor of a session, for list/get surfaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Session id.
    pub id: String,
    /// Optional name.
    pub name: Option<String>,
    /// Language tag.
    pub language: Language,
    /// Project root.
    pub project_root: PathBuf,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last public operation time.
    pub last_activity: DateTime<Utc>,
    /// Current state.
    pub state: SessionState,
    /// Stop reason when stopped.
    pub stop_reason: Option<String>,
    /// Stopped thread when stopped.
    pub stop_thread_id: Option<i64>,
    /// Attached process id, when attached.
    pub attached_pid: Option<i64>,
    /// Locally forwarded port, for container attaches.
    pub forwarded_port: Option<u16>,
}

struct Core {
    machine: StateMachine,
    breakpoints: BreakpointTable,
    watches: WatchList,
    last_activity: DateTime<Utc>,
    launch_record: Option<LaunchConfig>,
    attach_record: Option<AttachConfig>,
    attached_pid: Option<i64>,
    forwarded_port: Option<u16>,
}

struct Shared {
    core: StdMutex<Core>,
    output: OutputBuffer,
    events: EventQueue,
}

/// Gate the launch sequence parks on until the `initialized` event.
#[derive(Default)]
struct InitGate {
    seen: StdMutex<bool>,
    notify: Notify,
}

impl InitGate {
    fn mark(&self) {
        *self.seen.lock().expect("init gate poisoned") = true;
        self.notify.notify_waiters();
    }

    async fn wait(&self, deadline: Duration) -> bool {
        loop {
            let notified = self.notify.notified();
            if *self.seen.lock().expect("init gate poisoned") {
                return true;
            }
            if tokio::time::timeout(deadline, notified).await.is_err() {
                return *self.seen.lock().expect("init gate poisoned");
            }
        }
    }
}

struct Conn {
    client: Arc<DapClient>,
    capabilities: AdapterCapabilities,
    init: Arc<InitGate>,
}

/// One debugging conversation with one adapter.
pub struct Session {
    id: String,
    name: Option<String>,
    language: Language,
    project_root: PathBuf,
    created_at: DateTime<Utc>,
    profile: Box<dyn AdapterProfile>,
    shared: Arc<Shared>,
    conn: StdMutex<Option<Conn>>,
    cleanups: StdMutex<Vec<Box<dyn FnOnce() + Send>>>,
}

impl Session {
    /// Create a session in CREATED with the profile for its language.
    pub fn new(config: SessionConfig) -> Self {
        let profile = profile_for(config.language);
        Self {
            id: config.id,
            name: config.name,
            language: config.language,
            project_root: config.project_root,
            created_at: Utc::now(),
            profile,
            shared: Arc::new(Shared {
                core: StdMutex::new(Core {
                    machine: StateMachine::new(),
                    breakpoints: BreakpointTable::new(),
                    watches: WatchList::new(),
                    last_activity: Utc::now(),
                    launch_record: None,
                    attach_record: None,
                    attached_pid: None,
                    forwarded_port: None,
                }),
                output: OutputBuffer::new(),
                events: EventQueue::new(),
            }),
            conn: StdMutex::new(None),
            cleanups: StdMutex::new(Vec::new()),
        }
    }

    /// Session id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Language tag.
    pub fn language(&self) -> Language {
        self.language
    }

    /// Project root.
    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.core(|core| core.machine.state())
    }

    /// Current stop context, when stopped.
    pub fn stop_context(&self) -> Option<StopContext> {
        self.core(|core| core.machine.stop_context().cloned())
    }

    /// The adapter's resolved capabilities, once the handshake ran.
    pub fn adapter_capabilities(&self) -> Option<AdapterCapabilities> {
        self.conn
            .lock()
            .expect("session conn poisoned")
            .as_ref()
            .map(|c| c.capabilities.clone())
    }

    /// Last public operation time, for the idle sweeper.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.core(|core| core.last_activity)
    }

    /// Point-in-time descriptor.
    pub fn snapshot(&self) -> SessionSnapshot {
        let core = self.shared.core.lock().expect("session core poisoned");
        SessionSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            language: self.language,
            project_root: self.project_root.clone(),
            created_at: self.created_at,
            last_activity: core.last_activity,
            state: core.machine.state(),
            stop_reason: core
                .machine
                .stop_context()
                .map(|c| c.reason.as_str().to_string()),
            stop_thread_id: core.machine.stop_context().map(|c| c.thread_id),
            attached_pid: core.attached_pid,
            forwarded_port: core.forwarded_port,
        }
    }

    /// Register teardown (e.g. a container port forward) to run on
    /// terminate.
    pub fn add_cleanup(&self, cleanup: Box<dyn FnOnce() + Send>) {
        self.cleanups
            .lock()
            .expect("cleanups poisoned")
            .push(cleanup);
    }

    /// Record the locally forwarded port a container attach uses.
    pub fn set_forwarded_port(&self, port: u16) {
        self.core_mut(|core| core.forwarded_port = Some(port));
    }

    // -- breakpoints --------------------------------------------------------

    /// Replace the breakpoint set for `path`.
    ///
    /// Valid in any non-terminal state; while connected, the new set is
    /// forwarded immediately and adapter ids re-mapped from the response.
    pub async fn set_breakpoints(
        &self,
        path: &Path,
        specs: Vec<BreakpointSpec>,
    ) -> Result<Vec<BreakpointView>, SessionError> {
        if !path.is_absolute() {
            return Err(SessionError::InvalidArgument(format!(
                "source path must be absolute: {}",
                path.display()
            )));
        }
        self.touch();
        let client = {
            let mut core = self.shared.core.lock().expect("session core poisoned");
            core.machine.require_not_terminal("set_breakpoints")?;
            core.breakpoints.replace(path, specs);
            // Before the configuration phase the set is intent only; the
            // launch/attach handshake forwards it.
            if matches!(
                core.machine.state(),
                SessionState::Running | SessionState::Stopped
            ) {
                self.client_if_connected()
            } else {
                None
            }
        };

        if let Some(client) = client {
            let specs = self.core(|core| core.breakpoints.specs(path));
            let body = self.send_breakpoints(&client, path, &specs).await?;
            self.core_mut(|core| core.breakpoints.apply_response(path, &body.breakpoints));
        }
        Ok(self.core(|core| core.breakpoints.view(path)))
    }

    /// Clear breakpoints for one path, or all. Returns how many were
    /// removed.
    pub async fn clear_breakpoints(&self, path: Option<&Path>) -> Result<usize, SessionError> {
        self.touch();
        let (count, affected, client) = {
            let mut core = self.shared.core.lock().expect("session core poisoned");
            core.machine.require_not_terminal("clear_breakpoints")?;
            let affected = match path {
                Some(p) => vec![p.to_path_buf()],
                None => core.breakpoints.files(),
            };
            let count = core.breakpoints.clear(path);
            let client = if matches!(
                core.machine.state(),
                SessionState::Running | SessionState::Stopped
            ) {
                self.client_if_connected()
            } else {
                None
            };
            (count, affected, client)
        };

        if let Some(client) = client {
            for path in affected {
                let _ = self.send_breakpoints(&client, &path, &[]).await;
            }
        }
        Ok(count)
    }

    /// Stored breakpoint intent, keyed by path.
    pub fn breakpoints_intent(
        &self,
    ) -> std::collections::BTreeMap<String, Vec<BreakpointSpec>> {
        self.core(|core| core.breakpoints.intent())
    }

    /// Restore persisted breakpoint intent (recovery).
    pub fn restore_breakpoints(&self, intent: &[(PathBuf, Vec<BreakpointSpec>)]) {
        self.core_mut(|core| {
            for (path, specs) in intent {
                core.breakpoints.replace(path, specs.clone());
            }
        });
    }

    // -- launch / attach ----------------------------------------------------

    /// Launch a program under the debugger. Valid only in CREATED; blocks
    /// until RUNNING or fails (and the session is FAILED on handshake
    /// errors).
    pub async fn launch(&self, config: LaunchConfig) -> Result<(), SessionError> {
        self.touch();
        let mut effective = config.clone();
        if effective.stop_on_entry && !self.profile.supports_stop_on_entry() {
            effective.stop_on_entry = false;
        }
        // Validate before any state change.
        let arguments = self
            .profile
            .launch_arguments(&self.project_root, &effective)?;

        self.core_mut(|core| core.machine.begin_launch("launch"))?;

        let endpoint = self.profile.launch_endpoint(&self.project_root);
        match self.handshake("launch", arguments, &endpoint, effective.stop_on_exception).await {
            Ok(()) => {
                self.core_mut(|core| {
                    core.launch_record = Some(config);
                    core.machine.finish_launch();
                });
                Ok(())
            }
            Err(e) => {
                self.core_mut(|core| core.machine.fail());
                Err(e)
            }
        }
    }

    /// Attach to a running process or remote stub. Valid only in CREATED.
    pub async fn attach(&self, config: AttachConfig) -> Result<(), SessionError> {
        self.touch();
        let arguments = self.profile.attach_arguments(&config)?;
        let endpoint = self
            .profile
            .attach_endpoint(&self.project_root, &config)?;

        self.core_mut(|core| core.machine.begin_launch("attach"))?;

        match self.handshake("attach", arguments, &endpoint, true).await {
            Ok(()) => {
                self.core_mut(|core| {
                    core.attached_pid = config.process_id;
                    core.attach_record = Some(config);
                    core.machine.finish_launch();
                });
                Ok(())
            }
            Err(e) => {
                self.core_mut(|core| core.machine.fail());
                Err(e)
            }
        }
    }

    /// The launch configuration, once launched (for persistence).
    pub fn launch_record(&self) -> Option<LaunchConfig> {
        self.core(|core| core.launch_record.clone())
    }

    /// The attach configuration, once attached (for persistence).
    pub fn attach_record(&self) -> Option<AttachConfig> {
        self.core(|core| core.attach_record.clone())
    }

    // -- flow control -------------------------------------------------------

    /// Resume execution. Requires STOPPED.
    pub async fn continue_(&self, thread_id: Option<i64>) -> Result<(), SessionError> {
        self.touch();
        let (client, thread_id, saved) = self.begin_resume("continue", thread_id)?;
        let result = client
            .request(
                "continue",
                Some(json!({"threadId": thread_id})),
                Some(self.profile.request_timeout()),
            )
            .await;
        self.settle_resume(result.map(|_| ()), saved)
    }

    /// Step the given thread. Requires STOPPED; a `stopped` event follows
    /// when the step lands (the program may also terminate instead).
    pub async fn step(&self, mode: StepMode, thread_id: Option<i64>) -> Result<(), SessionError> {
        self.touch();

        // An explicitly named thread must exist; the adapter's own error
        // for unknown threads is not uniform across backends.
        if let Some(explicit) = thread_id {
            let client = self.stopped_client("step")?;
            let threads: ThreadsResponseBody = client
                .request_as("threads", None, Some(self.profile.request_timeout()))
                .await?;
            if !threads.threads.iter().any(|t| t.id == explicit) {
                return Err(SessionError::NotFound(format!("thread {explicit}")));
            }
        }

        let (client, resolved, saved) = self.begin_resume("step", thread_id)?;
        let result = client
            .request(
                mode.command(),
                Some(json!({"threadId": resolved})),
                Some(self.profile.request_timeout()),
            )
            .await;
        self.settle_resume(result.map(|_| ()), saved)
    }

    /// Ask the debuggee to pause. Requires RUNNING; a `stopped` event with
    /// reason `pause` follows.
    pub async fn pause(&self, thread_id: Option<i64>) -> Result<(), SessionError> {
        self.touch();
        let client = {
            let core = self.shared.core.lock().expect("session core poisoned");
            core.machine.require("pause", SessionState::Running, "RUNNING")?;
            self.client_if_connected()
                .ok_or(SessionError::Disconnected)?
        };

        let thread_id = match thread_id {
            Some(id) => id,
            None => {
                let threads: ThreadsResponseBody = client
                    .request_as("threads", None, Some(self.profile.request_timeout()))
                    .await?;
                threads
                    .threads
                    .first()
                    .map(|t| t.id)
                    .ok_or_else(|| SessionError::InvalidArgument("no threads to pause".into()))?
            }
        };

        client
            .request(
                "pause",
                Some(json!({"threadId": thread_id})),
                Some(self.profile.request_timeout()),
            )
            .await?;
        Ok(())
    }

    // -- inspection ---------------------------------------------------------

    /// Fetch stack frames. Requires STOPPED.
    pub async fn stacktrace(
        &self,
        thread_id: Option<i64>,
        start_frame: Option<i64>,
        levels: Option<i64>,
    ) -> Result<Vec<FrameView>, SessionError> {
        self.touch();
        let (client, thread_id) = self.stopped_thread("stacktrace", thread_id)?;
        let body: StackTraceResponseBody = client
            .request_as(
                "stackTrace",
                Some(json!({
                    "threadId": thread_id,
                    "startFrame": start_frame.unwrap_or(0),
                    "levels": levels.unwrap_or(20),
                })),
                Some(self.profile.request_timeout()),
            )
            .await?;

        let frames: Vec<FrameView> = body
            .stack_frames
            .iter()
            .map(|f| FrameView {
                id: f.id,
                name: f.name.clone(),
                path: f.source.as_ref().and_then(|s| s.path.clone()),
                line: f.line,
                column: f.column,
                presentation_hint: f.presentation_hint.clone(),
            })
            .collect();

        if start_frame.unwrap_or(0) == 0 {
            if let Some(top) = frames.first() {
                let top_id = top.id;
                self.core_mut(|core| {
                    if let Some(ctx) = core.machine.stop_context_mut() {
                        ctx.top_frame_id = Some(top_id);
                    }
                });
            }
        }
        Ok(frames)
    }

    /// Fetch the scopes of a frame. Requires STOPPED.
    pub async fn scopes(&self, frame_id: i64) -> Result<Vec<ScopeView>, SessionError> {
        self.touch();
        let client = self.stopped_client("scopes")?;
        let body: ScopesResponseBody = client
            .request_as(
                "scopes",
                Some(json!({"frameId": frame_id})),
                Some(self.profile.request_timeout()),
            )
            .await?;
        Ok(body
            .scopes
            .into_iter()
            .map(|s| ScopeView {
                name: s.name,
                variables_reference: s.variables_reference,
                expensive: s.expensive.unwrap_or(false),
            })
            .collect())
    }

    /// Fetch children of a variables reference. Requires STOPPED.
    pub async fn variables(
        &self,
        variables_reference: i64,
        filter: Option<&str>,
        start: Option<i64>,
        count: Option<i64>,
    ) -> Result<Vec<VariableView>, SessionError> {
        self.touch();
        let client = self.stopped_client("variables")?;

        let mut arguments = json!({"variablesReference": variables_reference});
        if let Some(filter) = filter {
            if filter != "indexed" && filter != "named" {
                return Err(SessionError::InvalidArgument(format!(
                    "invalid variables filter '{filter}'"
                )));
            }
            arguments["filter"] = json!(filter);
        }
        if let Some(start) = start {
            arguments["start"] = json!(start);
        }
        if let Some(count) = count {
            arguments["count"] = json!(count);
        }

        let body: VariablesResponseBody = client
            .request_as(
                "variables",
                Some(arguments),
                Some(self.profile.request_timeout()),
            )
            .await?;
        Ok(body
            .variables
            .into_iter()
            .map(|v| VariableView {
                name: v.name,
                value: truncate_preview(&v.value),
                variable_type: v.variable_type,
                variables_reference: v.variables_reference.unwrap_or(0),
                presentation_hint: v.presentation_hint.and_then(|h| h.kind),
            })
            .collect())
    }

    /// Evaluate an expression. Requires STOPPED.
    pub async fn evaluate(
        &self,
        expression: &str,
        frame_id: Option<i64>,
        context: &str,
    ) -> Result<EvaluateView, SessionError> {
        self.touch();
        if !matches!(context, "watch" | "repl" | "hover") {
            return Err(SessionError::InvalidArgument(format!(
                "invalid evaluate context '{context}', use watch|repl|hover"
            )));
        }
        let client = self.stopped_client("evaluate")?;
        self.evaluate_with(&client, expression, frame_id, context)
            .await
    }

    /// Smart-inspect a reference or expression. Requires STOPPED.
    pub async fn smart_inspect(
        &self,
        target: InspectTarget,
        frame_id: Option<i64>,
    ) -> Result<Inspection, SessionError> {
        self.touch();
        let client = self.stopped_client("smart_inspect")?;

        let (name, value, value_type, reference) = match target {
            InspectTarget::Reference(reference) => {
                ("<ref>".to_string(), String::new(), None, reference)
            }
            InspectTarget::Expression(expression) => {
                let result = self
                    .evaluate_with(&client, &expression, frame_id, "watch")
                    .await?;
                (
                    expression,
                    result.result,
                    result.result_type,
                    result.variables_reference,
                )
            }
        };

        let fetcher = ClientFetcher {
            client: &client,
            timeout: self.profile.request_timeout(),
        };
        inspect_reference(
            &fetcher,
            &name,
            &value,
            value_type.as_deref(),
            reference,
            &InspectOptions::default(),
        )
        .await
    }

    /// Stack frames plus inline source context. Requires STOPPED.
    pub async fn call_chain(
        &self,
        thread_id: Option<i64>,
        max_frames: Option<i64>,
    ) -> Result<Vec<CallChainFrame>, SessionError> {
        let frames = self
            .stacktrace(thread_id, None, Some(max_frames.unwrap_or(20)))
            .await?;
        Ok(frames
            .into_iter()
            .enumerate()
            .map(|(depth, frame)| {
                let context = frame
                    .path
                    .as_deref()
                    .map(|p| source_context(Path::new(p), frame.line, 2))
                    .unwrap_or_default();
                CallChainFrame {
                    depth,
                    frame,
                    context,
                }
            })
            .collect())
    }

    // -- watches ------------------------------------------------------------

    /// Add a watch expression; returns its id.
    pub fn watch_add(&self, expression: &str) -> Result<String, SessionError> {
        if expression.trim().is_empty() {
            return Err(SessionError::InvalidArgument(
                "watch expression is empty".into(),
            ));
        }
        self.touch();
        Ok(self.core_mut(|core| core.watches.add(expression)))
    }

    /// Remove a watch by id.
    pub fn watch_remove(&self, id: &str) -> Result<(), SessionError> {
        self.touch();
        if self.core_mut(|core| core.watches.remove(id)) {
            Ok(())
        } else {
            Err(SessionError::NotFound(format!("watch {id}")))
        }
    }

    /// All watches with their last results.
    pub fn watch_list(&self) -> Vec<Watch> {
        self.core(|core| core.watches.list().to_vec())
    }

    /// Watch expressions only (for persistence).
    pub fn watch_expressions(&self) -> Vec<String> {
        self.core(|core| core.watches.expressions())
    }

    /// Restore persisted watch expressions (recovery).
    pub fn restore_watches(&self, expressions: &[String]) {
        self.core_mut(|core| core.watches.restore(expressions));
    }

    /// Evaluate every watch in the given frame. Requires STOPPED; adapter
    /// errors are captured per watch, not propagated.
    pub async fn watch_eval_all(
        &self,
        frame_id: Option<i64>,
    ) -> Result<Vec<WatchEvalView>, SessionError> {
        self.touch();
        let client = self.stopped_client("watch_eval_all")?;
        let watches = self.watch_list();

        let mut results = Vec::with_capacity(watches.len());
        for watch in watches {
            let outcome = self
                .evaluate_with(&client, &watch.expression, frame_id, "watch")
                .await;
            let view = match outcome {
                Ok(eval) => {
                    self.core_mut(|core| {
                        core.watches
                            .record(&watch.id, frame_id, Ok(eval.result.clone()))
                    });
                    WatchEvalView {
                        id: watch.id,
                        expression: watch.expression,
                        value: Some(eval.result),
                        error: None,
                    }
                }
                Err(SessionError::AdapterError { message, .. }) => {
                    self.core_mut(|core| {
                        core.watches
                            .record(&watch.id, frame_id, Err(message.clone()))
                    });
                    WatchEvalView {
                        id: watch.id,
                        expression: watch.expression,
                        value: None,
                        error: Some(message),
                    }
                }
                Err(other) => return Err(other),
            };
            results.push(view);
        }
        Ok(results)
    }

    // -- events and output --------------------------------------------------

    /// Poll the event queue; blocks up to `wait` for the first record.
    pub async fn poll_events(
        &self,
        since_offset: u64,
        max: usize,
        wait: Option<Duration>,
    ) -> EventPage {
        self.touch();
        self.shared.events.poll(since_offset, max, wait).await
    }

    /// Read buffered output.
    pub fn get_output(
        &self,
        stream: Option<OutputStream>,
        since_offset: u64,
        max: usize,
    ) -> OutputPage {
        self.touch();
        self.shared.output.page(stream, since_offset, max)
    }

    // -- terminate ----------------------------------------------------------

    /// Terminate the session. Idempotent; the state is TERMINATED
    /// afterwards regardless of what the adapter answered.
    pub async fn terminate(&self) -> Result<(), SessionError> {
        self.touch();
        let already_terminated = self.state() == SessionState::Terminated;
        let conn = self.conn.lock().expect("session conn poisoned").take();

        if let Some(conn) = conn {
            let _ = conn
                .client
                .request(
                    "disconnect",
                    Some(json!({"terminateDebuggee": true})),
                    Some(TERMINATE_TIMEOUT),
                )
                .await;
            conn.client.shutdown().await;
        }

        self.core_mut(|core| core.machine.on_terminated());
        if !already_terminated {
            self.shared.events.push(
                EventKind::Terminated,
                json!({"reason": "terminate requested"}),
            );
        }

        let cleanups: Vec<Box<dyn FnOnce() + Send>> =
            std::mem::take(&mut *self.cleanups.lock().expect("cleanups poisoned"));
        for cleanup in cleanups {
            cleanup();
        }
        Ok(())
    }

    // -- internals ----------------------------------------------------------

    fn core<R>(&self, f: impl FnOnce(&Core) -> R) -> R {
        let core = self.shared.core.lock().expect("session core poisoned");
        f(&core)
    }

    fn core_mut<R>(&self, f: impl FnOnce(&mut Core) -> R) -> R {
        let mut core = self.shared.core.lock().expect("session core poisoned");
        f(&mut core)
    }

    fn touch(&self) {
        self.core_mut(|core| core.last_activity = Utc::now());
    }

    fn client_if_connected(&self) -> Option<Arc<DapClient>> {
        self.conn
            .lock()
            .expect("session conn poisoned")
            .as_ref()
            .map(|c| c.client.clone())
    }

    /// Resolve the client plus a thread id for a STOPPED-only operation.
    fn stopped_thread(
        &self,
        operation: &'static str,
        thread_id: Option<i64>,
    ) -> Result<(Arc<DapClient>, i64), SessionError> {
        let core = self.shared.core.lock().expect("session core poisoned");
        core.machine
            .require(operation, SessionState::Stopped, "STOPPED")?;
        let resolved = thread_id
            .or_else(|| core.machine.stop_context().map(|c| c.thread_id))
            .ok_or_else(|| SessionError::InvalidArgument("thread id required".into()))?;
        drop(core);
        let client = self
            .client_if_connected()
            .ok_or(SessionError::Disconnected)?;
        Ok((client, resolved))
    }

    /// Begin a continue/step: validate STOPPED and transition to RUNNING
    /// before the request goes out, so the next `stopped` event (which can
    /// outrun the response) lands on a RUNNING machine. The displaced stop
    /// context is returned for rollback.
    fn begin_resume(
        &self,
        operation: &'static str,
        thread_id: Option<i64>,
    ) -> Result<(Arc<DapClient>, i64, StopContext), SessionError> {
        let mut core = self.shared.core.lock().expect("session core poisoned");
        core.machine
            .require(operation, SessionState::Stopped, "STOPPED")?;
        let saved = core
            .machine
            .stop_context()
            .cloned()
            .ok_or_else(|| SessionError::InvalidArgument("thread id required".into()))?;
        let resolved = thread_id.unwrap_or(saved.thread_id);
        core.machine.on_resumed();
        drop(core);
        let client = self
            .client_if_connected()
            .ok_or(SessionError::Disconnected)?;
        Ok((client, resolved, saved))
    }

    /// Finish a continue/step: a rejected request rolls the optimistic
    /// RUNNING transition back (unless a genuine stop already landed).
    fn settle_resume(
        &self,
        result: Result<(), DapError>,
        saved: StopContext,
    ) -> Result<(), SessionError> {
        match result {
            Ok(()) => Ok(()),
            Err(e) => {
                self.core_mut(|core| {
                    if core.machine.state() == SessionState::Running {
                        core.machine.on_stopped(saved);
                    }
                });
                Err(e.into())
            }
        }
    }

    fn stopped_client(&self, operation: &'static str) -> Result<Arc<DapClient>, SessionError> {
        {
            let core = self.shared.core.lock().expect("session core poisoned");
            core.machine
                .require(operation, SessionState::Stopped, "STOPPED")?;
        }
        self.client_if_connected()
            .ok_or(SessionError::Disconnected)
    }

    async fn evaluate_with(
        &self,
        client: &Arc<DapClient>,
        expression: &str,
        frame_id: Option<i64>,
        context: &str,
    ) -> Result<EvaluateView, SessionError> {
        let mut arguments = json!({"expression": expression, "context": context});
        let frame_id = frame_id.or_else(|| {
            self.core(|core| core.machine.stop_context().and_then(|c| c.top_frame_id))
        });
        if let Some(frame_id) = frame_id {
            arguments["frameId"] = json!(frame_id);
        }
        let body: polybugger_dap::protocol::EvaluateResponseBody = client
            .request_as(
                "evaluate",
                Some(arguments),
                Some(self.profile.request_timeout()),
            )
            .await?;
        Ok(EvaluateView {
            result: truncate_preview(&body.result),
            variables_reference: body.variables_reference.unwrap_or(0),
            result_type: body.result_type,
        })
    }

    async fn send_breakpoints(
        &self,
        client: &Arc<DapClient>,
        path: &Path,
        specs: &[BreakpointSpec],
    ) -> Result<SetBreakpointsResponseBody, SessionError> {
        let arguments = SetBreakpointsArguments {
            source: Source::from_path(path),
            breakpoints: Some(
                specs
                    .iter()
                    .map(|s| SourceBreakpoint {
                        line: s.line,
                        condition: s.condition.clone(),
                        hit_condition: s.hit_condition.clone(),
                    })
                    .collect(),
            ),
        };
        let body = client
            .request_as(
                "setBreakpoints",
                Some(serde_json::to_value(arguments).expect("breakpoint args serialize")),
                Some(self.profile.request_timeout()),
            )
            .await?;
        Ok(body)
    }

    /// Establish the connection (unless one was injected), run the
    /// initialize/launch-or-attach/configurationDone sequence, and wait
    /// for the adapter to accept.
    async fn handshake(
        &self,
        command: &'static str,
        arguments: Value,
        endpoint: &polybugger_dap::transport::TransportEndpoint,
        stop_on_exception: bool,
    ) -> Result<(), SessionError> {
        let conn_exists = self.conn.lock().expect("session conn poisoned").is_some();
        if !conn_exists {
            let (transport, events) = Transport::connect(endpoint).await?;
            self.install_conn(transport, events);
        }

        let (client, init) = {
            let conn = self.conn.lock().expect("session conn poisoned");
            let conn = conn.as_ref().ok_or(SessionError::Disconnected)?;
            (conn.client.clone(), conn.init.clone())
        };

        // initialize → capabilities.
        let capabilities: Capabilities = client
            .request_as(
                "initialize",
                Some(
                    serde_json::to_value(self.profile.initialize_arguments())
                        .expect("initialize args serialize"),
                ),
                Some(self.profile.request_timeout()),
            )
            .await?;
        let mut resolved = AdapterCapabilities::from_initialize_response(&capabilities);
        if self.profile.force_configuration_done() {
            resolved.supports_configuration_done_request = true;
        }
        if let Some(conn) = self.conn.lock().expect("session conn poisoned").as_mut() {
            conn.capabilities = resolved.clone();
        }

        // Send launch/attach; its response usually arrives only after
        // configurationDone, so await it at the end.
        let pending = {
            let client = client.clone();
            let deadline = self.profile.launch_timeout();
            tokio::spawn(async move {
                client
                    .request(command, Some(arguments), Some(deadline))
                    .await
            })
        };

        if !init.wait(self.profile.launch_timeout()).await {
            pending.abort();
            return Err(SessionError::Timeout {
                command: "initialized".into(),
            });
        }

        // Configuration phase: known breakpoints, exception filters, done.
        let files = self.core(|core| core.breakpoints.files());
        for path in files {
            let specs = self.core(|core| core.breakpoints.specs(&path));
            match self.send_breakpoints(&client, &path, &specs).await {
                Ok(body) => self.core_mut(|core| {
                    core.breakpoints.apply_response(&path, &body.breakpoints)
                }),
                Err(e) => {
                    tracing::warn!(path = %path.display(), "setBreakpoints during {command} failed: {e}")
                }
            }
        }

        let filters = self.profile.exception_filters(stop_on_exception);
        client
            .request(
                "setExceptionBreakpoints",
                Some(json!({"filters": filters})),
                Some(self.profile.request_timeout()),
            )
            .await?;

        if resolved.supports_configuration_done_request {
            client
                .request("configurationDone", None, Some(self.profile.request_timeout()))
                .await?;
        }

        match pending.await {
            Ok(result) => {
                result?;
                Ok(())
            }
            Err(_) => Err(SessionError::Cancelled),
        }
    }

    /// Wire a client and event pump over a pre-built transport. Used by
    /// the real connect path and by embedders/tests that script the
    /// adapter end.
    pub fn install_conn(
        &self,
        transport: Transport,
        events: mpsc::Receiver<TransportEvent>,
    ) {
        let (inbound_tx, inbound_rx) = mpsc::channel(256);
        let client = Arc::new(DapClient::new(
            transport,
            events,
            inbound_tx,
            self.profile.reverse_request_policy(),
            self.profile.request_timeout(),
        ));
        let init = Arc::new(InitGate::default());

        tokio::spawn(pump(
            self.shared.clone(),
            client.clone(),
            init.clone(),
            inbound_rx,
        ));

        *self.conn.lock().expect("session conn poisoned") = Some(Conn {
            client,
            capabilities: AdapterCapabilities::default(),
            init,
        });
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("language", &self.language)
            .field("state", &self.state())
            .finish()
    }
}

/// The event pump: sole consumer of the client's inbound stream, sole
/// writer of buffers and stop context.
async fn pump(
    shared: Arc<Shared>,
    client: Arc<DapClient>,
    init: Arc<InitGate>,
    mut inbound: mpsc::Receiver<InboundEvent>,
) {
    while let Some(event) = inbound.recv().await {
        match event {
            InboundEvent::Event { name, body } => {
                handle_adapter_event(&shared, &client, &init, &name, body).await;
            }
            InboundEvent::Stderr(line) => {
                shared.output.push(OutputStream::AdapterStderr, line);
                shared.events.mark_output_available();
            }
            InboundEvent::Malformed(message) => {
                tracing::warn!("adapter wire violation: {message}");
                let mut core = shared.core.lock().expect("session core poisoned");
                core.machine.fail();
                drop(core);
                shared
                    .events
                    .push(EventKind::Failure, json!({"message": message}));
            }
            InboundEvent::Disconnected => {
                let mut core = shared.core.lock().expect("session core poisoned");
                match core.machine.state() {
                    SessionState::Running | SessionState::Stopped => {
                        core.machine.on_terminated();
                        drop(core);
                        // Synthetic terminated event so pollers find out.
                        shared.events.push(
                            EventKind::Terminated,
                            json!({"reason": "adapter disconnected"}),
                        );
                    }
                    SessionState::Launching => {
                        core.machine.fail();
                        drop(core);
                        shared.events.push(
                            EventKind::Failure,
                            json!({"message": "adapter exited during launch"}),
                        );
                    }
                    _ => {}
                }
            }
        }
    }
}

async fn handle_adapter_event(
    shared: &Arc<Shared>,
    client: &Arc<DapClient>,
    init: &Arc<InitGate>,
    name: &str,
    body: Option<Value>,
) {
    match name {
        "initialized" => init.mark(),
        "stopped" => {
            let parsed: Option<StoppedEventBody> =
                body.clone().and_then(|b| serde_json::from_value(b).ok());
            let Some(parsed) = parsed else {
                tracing::warn!("dropping stopped event with unparseable body");
                return;
            };
            let reason = StopReason::from_dap(&parsed.reason);
            let context = StopContext {
                thread_id: parsed.thread_id.unwrap_or(1),
                reason,
                description: parsed.description.clone(),
                top_frame_id: None,
                hit_breakpoint_ids: parsed.hit_breakpoint_ids.clone().unwrap_or_default(),
            };
            // Queue first, transition second: anyone who observes STOPPED
            // must already find the event when polling.
            shared.events.push(
                EventKind::Stopped,
                json!({
                    "reason": reason.as_str(),
                    "threadId": parsed.thread_id,
                    "hitBreakpointIds": parsed.hit_breakpoint_ids,
                    "description": parsed.description,
                    "text": parsed.text,
                }),
            );
            let mut core = shared.core.lock().expect("session core poisoned");
            core.machine.on_stopped(context);
        }
        "continued" => {
            let parsed: Option<ContinuedEventBody> =
                body.clone().and_then(|b| serde_json::from_value(b).ok());
            {
                let mut core = shared.core.lock().expect("session core poisoned");
                core.machine.on_resumed();
            }
            shared.events.push(
                EventKind::Continued,
                json!({"threadId": parsed.map(|p| p.thread_id)}),
            );
        }
        "output" => {
            let parsed: Option<OutputEventBody> =
                body.and_then(|b| serde_json::from_value(b).ok());
            let Some(parsed) = parsed else { return };
            let stream = OutputStream::from_category(parsed.category.as_deref());
            shared.output.push(stream, parsed.output);
            shared.events.mark_output_available();
        }
        "terminated" => {
            {
                let mut core = shared.core.lock().expect("session core poisoned");
                core.machine.on_terminated();
            }
            shared
                .events
                .push(EventKind::Terminated, json!({"reason": "terminated event"}));
            client.shutdown().await;
        }
        "exited" => {
            let exit_code = body
                .and_then(|b| serde_json::from_value::<ExitedEventBody>(b).ok())
                .map(|b| b.exit_code);
            shared
                .events
                .push(EventKind::Exited, json!({"exitCode": exit_code}));
            {
                let mut core = shared.core.lock().expect("session core poisoned");
                core.machine.on_terminated();
            }
            client.shutdown().await;
        }
        "thread" => {
            shared
                .events
                .push(EventKind::Thread, body.unwrap_or(Value::Null));
        }
        "breakpoint" => {
            shared
                .events
                .push(EventKind::BreakpointChanged, body.unwrap_or(Value::Null));
        }
        "module" => {
            shared
                .events
                .push(EventKind::Module, body.unwrap_or(Value::Null));
        }
        other => {
            tracing::debug!(event = other, "ignoring adapter event");
        }
    }
}

/// Inspector fetcher backed by the live client.
struct ClientFetcher<'a> {
    client: &'a Arc<DapClient>,
    timeout: Duration,
}

impl VariableFetcher for ClientFetcher<'_> {
    async fn children(
        &self,
        reference: i64,
    ) -> Result<Vec<polybugger_dap::protocol::Variable>, SessionError> {
        let body: VariablesResponseBody = self
            .client
            .request_as(
                "variables",
                Some(json!({"variablesReference": reference})),
                Some(self.timeout),
            )
            .await?;
        Ok(body.variables)
    }
}

fn truncate_preview(value: &str) -> String {
    if value.chars().count() <= VALUE_PREVIEW_CAP {
        value.to_string()
    } else {
        let mut out: String = value.chars().take(VALUE_PREVIEW_CAP).collect();
        out.push('…');
        out
    }
}

/// Read ±`radius` lines of source around `line` (1-based). Unreadable
/// files yield an empty context rather than an error.
fn source_context(path: &Path, line: i64, radius: i64) -> Vec<SourceContextLine> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    let start = (line - radius).max(1);
    let end = line + radius;
    content
        .lines()
        .enumerate()
        .filter_map(|(index, text)| {
            let number = index as i64 + 1;
            (number >= start && number <= end).then(|| SourceContextLine {
                line: number,
                text: text.to_string(),
                current: number == line,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use polybugger_dap::codec::{encode_frame, FrameDecoder};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Run a scripted adapter over a duplex pipe and install it on the
    /// session. The script gets each request frame and returns frames to
    /// send back.
    fn install_scripted_adapter<F>(session: &Session, mut script: F)
    where
        F: FnMut(Value) -> Vec<Value> + Send + 'static,
    {
        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        tokio::spawn(async move {
            let (mut read, mut write) = tokio::io::split(theirs);
            let mut decoder = FrameDecoder::new();
            let mut buf = [0u8; 8192];
            loop {
                let n = match read.read(&mut buf).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => n,
                };
                decoder.extend(&buf[..n]);
                while let Ok(Some(frame)) = decoder.next_frame() {
                    for reply in script(frame) {
                        if write.write_all(&encode_frame(&reply)).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });
        let (read, write) = tokio::io::split(ours);
        let (transport, events) = Transport::from_streams(write, read);
        session.install_conn(transport, events);
    }

    fn ok_response(request: &Value, body: Value) -> Value {
        json!({
            "seq": 0,
            "type": "response",
            "request_seq": request["seq"],
            "success": true,
            "command": request["command"],
            "body": body,
        })
    }

    fn err_response(request: &Value, message: &str) -> Value {
        json!({
            "seq": 0,
            "type": "response",
            "request_seq": request["seq"],
            "success": false,
            "command": request["command"],
            "message": message,
        })
    }

    fn event(name: &str, body: Value) -> Value {
        json!({"seq": 0, "type": "event", "event": name, "body": body})
    }

    fn py_session() -> Session {
        Session::new(SessionConfig {
            id: "s-test".into(),
            name: Some("test".into()),
            language: Language::Py,
            project_root: PathBuf::from("/tmp/p"),
        })
    }

    /// Script for a well-behaved debugpy-alike: handshake, one verified
    /// breakpoint, a stop at it, stack/evaluate support, an exception stop
    /// after continue, and clean disconnect.
    fn div_by_zero_script() -> impl FnMut(Value) -> Vec<Value> + Send + 'static {
        move |req: Value| {
            let command = req["command"].as_str().unwrap_or_default().to_string();
            match command.as_str() {
                "initialize" => vec![ok_response(
                    &req,
                    json!({"supportsConfigurationDoneRequest": true,
                           "supportsConditionalBreakpoints": true,
                           "exceptionBreakpointFilters": [
                               {"filter": "uncaught", "label": "Uncaught Exceptions"}]}),
                )],
                "launch" => vec![event("initialized", json!({}))],
                "setBreakpoints" => {
                    let lines: Vec<i64> = req["arguments"]["breakpoints"]
                        .as_array()
                        .map(|bps| {
                            bps.iter()
                                .filter_map(|b| b["line"].as_i64())
                                .collect()
                        })
                        .unwrap_or_default();
                    let infos: Vec<Value> = lines
                        .iter()
                        .enumerate()
                        .map(|(i, line)| {
                            json!({"id": i as i64 + 1, "verified": true, "line": line})
                        })
                        .collect();
                    vec![ok_response(&req, json!({"breakpoints": infos}))]
                }
                "setExceptionBreakpoints" => vec![ok_response(&req, json!({}))],
                "configurationDone" => vec![
                    ok_response(&req, json!({})),
                    // The launch response follows configurationDone.
                    json!({"seq": 0, "type": "response", "request_seq": 2,
                           "success": true, "command": "launch"}),
                    event("output", json!({"category": "stdout", "output": "starting\n"})),
                    event(
                        "stopped",
                        json!({"reason": "breakpoint", "threadId": 1,
                               "hitBreakpointIds": [1], "allThreadsStopped": true}),
                    ),
                ],
                "stackTrace" => vec![ok_response(
                    &req,
                    json!({"stackFrames": [
                        {"id": 100, "name": "main", "line": 3, "column": 1,
                         "source": {"name": "s.py", "path": "/tmp/p/s.py"}}],
                        "totalFrames": 1}),
                )],
                "evaluate" => {
                    let expr = req["arguments"]["expression"].as_str().unwrap_or_default();
                    if expr == "1/0" {
                        vec![err_response(&req, "ZeroDivisionError: division by zero")]
                    } else {
                        vec![ok_response(
                            &req,
                            json!({"result": "2", "type": "int", "variablesReference": 0}),
                        )]
                    }
                }
                "continue" => vec![
                    ok_response(&req, json!({})),
                    event(
                        "stopped",
                        json!({"reason": "exception", "threadId": 1,
                               "text": "ZeroDivisionError"}),
                    ),
                ],
                "threads" => vec![ok_response(
                    &req,
                    json!({"threads": [{"id": 1, "name": "MainThread"}]}),
                )],
                "next" => vec![
                    ok_response(&req, json!({})),
                    event("stopped", json!({"reason": "step", "threadId": 1})),
                ],
                "disconnect" => vec![ok_response(&req, json!({}))],
                other => vec![err_response(&req, &format!("unknown command {other}"))],
            }
        }
    }

    async fn wait_for_state(session: &Session, state: SessionState) {
        for _ in 0..100 {
            if session.state() == state {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "session never reached {state}, still {}",
            session.state()
        );
    }

    #[tokio::test]
    async fn session_div_by_zero_end_to_end() {
        let session = py_session();
        install_scripted_adapter(&session, div_by_zero_script());

        // Breakpoints set before launch are unverified intent.
        let views = session
            .set_breakpoints(Path::new("/tmp/p/s.py"), vec![BreakpointSpec::at_line(3)])
            .await
            .unwrap();
        assert!(!views[0].verified);

        session
            .launch(LaunchConfig {
                program: Some(PathBuf::from("/tmp/p/s.py")),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(matches!(
            session.state(),
            SessionState::Running | SessionState::Stopped
        ));

        // The scripted stop arrives; polling observes it.
        let page = session
            .poll_events(0, 100, Some(Duration::from_secs(2)))
            .await;
        assert!(page
            .records
            .iter()
            .any(|r| r.kind == EventKind::Stopped && r.payload["reason"] == "breakpoint"));
        wait_for_state(&session, SessionState::Stopped).await;

        // Breakpoints got verified during the configuration phase.
        let views = session.breakpoints_intent();
        assert_eq!(views.len(), 1);

        let frames = session.stacktrace(Some(1), None, None).await.unwrap();
        assert_eq!(frames[0].line, 3);
        assert_eq!(frames[0].path.as_deref(), Some("/tmp/p/s.py"));

        let err = session.evaluate("1/0", Some(100), "repl").await.unwrap_err();
        match &err {
            SessionError::AdapterError { message, .. } => {
                assert!(message.contains("division"))
            }
            other => panic!("expected AdapterError, got {other:?}"),
        }
        // Non-terminal error leaves the state unchanged.
        assert_eq!(session.state(), SessionState::Stopped);

        let next_offset = page.next_offset;
        session.continue_(None).await.unwrap();
        let page = session
            .poll_events(next_offset, 100, Some(Duration::from_secs(2)))
            .await;
        assert!(page
            .records
            .iter()
            .any(|r| r.kind == EventKind::Stopped && r.payload["reason"] == "exception"));

        session.terminate().await.unwrap();
        assert_eq!(session.state(), SessionState::Terminated);

        // Idempotent.
        session.terminate().await.unwrap();
        assert_eq!(session.state(), SessionState::Terminated);
    }

    #[tokio::test]
    async fn session_launch_requires_created() {
        let session = py_session();
        install_scripted_adapter(&session, div_by_zero_script());
        session
            .launch(LaunchConfig {
                program: Some(PathBuf::from("/tmp/p/s.py")),
                ..Default::default()
            })
            .await
            .unwrap();

        let err = session
            .launch(LaunchConfig {
                program: Some(PathBuf::from("/tmp/p/s.py")),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn session_pause_before_launch_is_precondition_failure() {
        let session = py_session();
        let err = session.pause(None).await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidState { .. }));
        assert_eq!(err.kind(), "failed_precondition");
        assert_eq!(session.state(), SessionState::Created);
    }

    #[tokio::test]
    async fn session_continue_when_running_is_precondition_failure() {
        let session = py_session();
        install_scripted_adapter(&session, {
            let mut base = div_by_zero_script();
            move |req: Value| {
                // Same handshake, but no stop after configurationDone.
                if req["command"] == "configurationDone" {
                    vec![
                        ok_response(&req, json!({})),
                        json!({"seq": 0, "type": "response", "request_seq": 2,
                               "success": true, "command": "launch"}),
                    ]
                } else {
                    base(req)
                }
            }
        });

        session
            .launch(LaunchConfig {
                program: Some(PathBuf::from("/tmp/p/s.py")),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(session.state(), SessionState::Running);

        let err = session.continue_(None).await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidState { .. }));
        assert_eq!(session.state(), SessionState::Running);
    }

    #[tokio::test]
    async fn session_step_with_invalid_thread_is_not_found() {
        let session = py_session();
        install_scripted_adapter(&session, div_by_zero_script());
        session
            .launch(LaunchConfig {
                program: Some(PathBuf::from("/tmp/p/s.py")),
                ..Default::default()
            })
            .await
            .unwrap();
        wait_for_state(&session, SessionState::Stopped).await;

        let err = session.step(StepMode::Over, Some(99)).await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));
        assert_eq!(session.state(), SessionState::Stopped);

        // A valid explicit thread works.
        session.step(StepMode::Over, Some(1)).await.unwrap();
    }

    #[tokio::test]
    async fn session_watch_evaluation_across_steps() {
        // Watches: first stop evaluates to 2, after a step the name is gone.
        let out_of_scope = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = out_of_scope.clone();
        let session = py_session();
        install_scripted_adapter(&session, {
            let mut base = div_by_zero_script();
            move |req: Value| {
                if req["command"] == "evaluate"
                    && flag.load(std::sync::atomic::Ordering::SeqCst)
                {
                    vec![err_response(&req, "NameError: name 'x' is not defined")]
                } else {
                    base(req)
                }
            }
        });

        session
            .launch(LaunchConfig {
                program: Some(PathBuf::from("/tmp/p/s.py")),
                ..Default::default()
            })
            .await
            .unwrap();
        wait_for_state(&session, SessionState::Stopped).await;

        let watch_id = session.watch_add("x+1").unwrap();
        let results = session.watch_eval_all(Some(100)).await.unwrap();
        assert_eq!(results[0].id, watch_id);
        assert_eq!(results[0].value.as_deref(), Some("2"));
        assert!(results[0].error.is_none());

        session.step(StepMode::Over, None).await.unwrap();
        wait_for_state(&session, SessionState::Stopped).await;

        out_of_scope.store(true, std::sync::atomic::Ordering::SeqCst);
        let results = session.watch_eval_all(Some(100)).await.unwrap();
        assert!(results[0].value.is_none());
        assert!(results[0]
            .error
            .as_deref()
            .unwrap()
            .contains("name 'x' is not defined"));

        // The cached result is visible in the list.
        let watches = session.watch_list();
        assert!(watches[0].last_error.is_some());
    }

    #[tokio::test]
    async fn session_output_flows_into_buffer() {
        let session = py_session();
        install_scripted_adapter(&session, div_by_zero_script());
        session
            .launch(LaunchConfig {
                program: Some(PathBuf::from("/tmp/p/s.py")),
                ..Default::default()
            })
            .await
            .unwrap();

        // The script emits one stdout line right after configurationDone.
        let page = session
            .poll_events(0, 100, Some(Duration::from_secs(2)))
            .await;
        assert!(page
            .records
            .iter()
            .any(|r| r.kind == EventKind::OutputAvailable));

        let output = session.get_output(Some(OutputStream::Stdout), 0, 100);
        assert_eq!(output.records.len(), 1);
        assert_eq!(output.records[0].content, "starting\n");
        assert_eq!(output.dropped, 0);
    }

    #[tokio::test]
    async fn session_adapter_exit_mid_launch_fails_session() {
        let session = py_session();
        // Script that answers nothing: the pipe closes as soon as the
        // script task sees initialize and returns.
        let (ours, theirs) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            let (mut read, _write) = tokio::io::split(theirs);
            let mut buf = [0u8; 1024];
            // Read the initialize request, then drop the pipe.
            let _ = read.read(&mut buf).await;
        });
        let (read, write) = tokio::io::split(ours);
        let (transport, events) = Transport::from_streams(write, read);
        session.install_conn(transport, events);

        let err = session
            .launch(LaunchConfig {
                program: Some(PathBuf::from("/tmp/p/s.py")),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Disconnected));
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn session_disconnect_while_running_posts_synthetic_terminated() {
        let session = py_session();
        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        let script_handle = tokio::spawn(async move {
            let (mut read, mut write) = tokio::io::split(theirs);
            let mut decoder = FrameDecoder::new();
            let mut buf = [0u8; 8192];
            let mut script = div_by_zero_script();
            loop {
                let n = match read.read(&mut buf).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => n,
                };
                decoder.extend(&buf[..n]);
                while let Ok(Some(frame)) = decoder.next_frame() {
                    // Kill the conversation once the debuggee is running.
                    if frame["command"] == "configurationDone" {
                        let replies = script(frame);
                        for reply in replies {
                            let _ = write.write_all(&encode_frame(&reply)).await;
                        }
                        // Only keep the ones up to the launch response;
                        // then drop the pipe.
                        return;
                    }
                    for reply in script(frame) {
                        let _ = write.write_all(&encode_frame(&reply)).await;
                    }
                }
            }
        });
        let (read, write) = tokio::io::split(ours);
        let (transport, events) = Transport::from_streams(write, read);
        session.install_conn(transport, events);

        let _ = session
            .launch(LaunchConfig {
                program: Some(PathBuf::from("/tmp/p/s.py")),
                ..Default::default()
            })
            .await;
        let _ = script_handle.await;

        // The pipe is gone; the pump turns that into TERMINATED plus a
        // synthetic terminated event.
        let page = session
            .poll_events(0, 100, Some(Duration::from_secs(2)))
            .await;
        assert!(page
            .records
            .iter()
            .any(|r| r.kind == EventKind::Terminated));
        wait_for_state(&session, SessionState::Terminated).await;
    }

    #[tokio::test]
    async fn session_set_breakpoints_relative_path_rejected() {
        let session = py_session();
        let err = session
            .set_breakpoints(Path::new("s.py"), vec![BreakpointSpec::at_line(1)])
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn session_inspection_requires_stopped() {
        let session = py_session();
        let err = session.stacktrace(Some(1), None, None).await.unwrap_err();
        assert_eq!(err.kind(), "failed_precondition");
        let err = session.scopes(1).await.unwrap_err();
        assert_eq!(err.kind(), "failed_precondition");
        let err = session.evaluate("x", None, "repl").await.unwrap_err();
        assert_eq!(err.kind(), "failed_precondition");
    }

    #[tokio::test]
    async fn session_evaluate_rejects_unknown_context() {
        let session = py_session();
        install_scripted_adapter(&session, div_by_zero_script());
        session
            .launch(LaunchConfig {
                program: Some(PathBuf::from("/tmp/p/s.py")),
                ..Default::default()
            })
            .await
            .unwrap();
        wait_for_state(&session, SessionState::Stopped).await;

        let err = session.evaluate("x", None, "clipboard").await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn session_call_chain_includes_source_context() {
        let dir = tempfile::TempDir::new().unwrap();
        let source = dir.path().join("s.py");
        std::fs::write(&source, "a = 1\nb = 2\nc = a / 0\nd = 4\ne = 5\n").unwrap();
        let source_str = source.to_string_lossy().into_owned();

        let session = Session::new(SessionConfig {
            id: "s-cc".into(),
            name: None,
            language: Language::Py,
            project_root: dir.path().to_path_buf(),
        });
        install_scripted_adapter(&session, {
            let mut base = div_by_zero_script();
            let source_str = source_str.clone();
            move |req: Value| {
                if req["command"] == "stackTrace" {
                    vec![ok_response(
                        &req,
                        json!({"stackFrames": [
                            {"id": 100, "name": "main", "line": 3, "column": 1,
                             "source": {"name": "s.py", "path": source_str}}]}),
                    )]
                } else {
                    base(req)
                }
            }
        });
        session
            .launch(LaunchConfig {
                program: Some(source.clone()),
                ..Default::default()
            })
            .await
            .unwrap();
        wait_for_state(&session, SessionState::Stopped).await;

        let chain = session.call_chain(None, None).await.unwrap();
        assert_eq!(chain.len(), 1);
        let context = &chain[0].context;
        assert_eq!(context.len(), 5);
        assert!(context.iter().any(|l| l.current && l.line == 3));
        assert_eq!(context[0].line, 1);
    }

    #[tokio::test]
    async fn session_snapshot_reflects_stop() {
        let session = py_session();
        install_scripted_adapter(&session, div_by_zero_script());
        session
            .launch(LaunchConfig {
                program: Some(PathBuf::from("/tmp/p/s.py")),
                ..Default::default()
            })
            .await
            .unwrap();
        wait_for_state(&session, SessionState::Stopped).await;

        let snapshot = session.snapshot();
        assert_eq!(snapshot.id, "s-test");
        assert_eq!(snapshot.language, Language::Py);
        assert_eq!(snapshot.state, SessionState::Stopped);
        assert_eq!(snapshot.stop_reason.as_deref(), Some("breakpoint"));
        assert_eq!(snapshot.stop_thread_id, Some(1));
    }

    #[tokio::test]
    async fn session_terminate_runs_cleanups() {
        let session = py_session();
        let ran = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = ran.clone();
        session.add_cleanup(Box::new(move || {
            flag.store(true, std::sync::atomic::Ordering::SeqCst)
        }));
        session.terminate().await.unwrap();
        assert!(ran.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn session_smart_inspect_expression() {
        let session = py_session();
        install_scripted_adapter(&session, {
            let mut base = div_by_zero_script();
            move |req: Value| {
                let command = req["command"].as_str().unwrap_or_default();
                if command == "evaluate"
                    && req["arguments"]["expression"] == "items"
                {
                    vec![ok_response(
                        &req,
                        json!({"result": "[1, 2, 3]", "type": "list",
                               "variablesReference": 7}),
                    )]
                } else if command == "variables" {
                    vec![ok_response(
                        &req,
                        json!({"variables": [
                            {"name": "0", "value": "1", "variablesReference": 0},
                            {"name": "1", "value": "2", "variablesReference": 0},
                            {"name": "2", "value": "3", "variablesReference": 0}]}),
                    )]
                } else {
                    base(req)
                }
            }
        });
        session
            .launch(LaunchConfig {
                program: Some(PathBuf::from("/tmp/p/s.py")),
                ..Default::default()
            })
            .await
            .unwrap();
        wait_for_state(&session, SessionState::Stopped).await;

        let inspection = session
            .smart_inspect(InspectTarget::Expression("items".into()), Some(100))
            .await
            .unwrap();
        assert_eq!(inspection.kind, crate::inspect::InspectKind::Sequence);
        assert!(inspection.rendered.contains("[0] 1"));
    }

    #[test]
    fn step_mode_parse() {
        assert_eq!(StepMode::parse("over").unwrap(), StepMode::Over);
        assert_eq!(StepMode::parse("into").unwrap(), StepMode::Into);
        assert_eq!(StepMode::parse("out").unwrap(), StepMode::Out);
        assert!(StepMode::parse("sideways").is_err());
    }

    #[test]
    fn source_context_bounds() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("x.py");
        std::fs::write(&file, "l1\nl2\nl3\n").unwrap();

        // Line at the start clamps the window.
        let context = source_context(&file, 1, 2);
        assert_eq!(context.len(), 3);
        assert!(context[0].current);

        // Missing file is an empty context.
        assert!(source_context(Path::new("/nope/missing.py"), 1, 2).is_empty());
    }
}
