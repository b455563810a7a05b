//! HTTP surface.
//!
//! One path per broker operation; POST for mutations, GET for reads.
//! Errors map onto status codes with a `{kind, message, command?}` body;
//! adapter messages pass through unmodified.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use polybugger_broker::{
    Broker, BrokerError, ContainerAttachRequest, ContainerLaunchRequest, CreateSessionRequest,
};
use polybugger_session::{BreakpointSpec, InspectTarget, OutputStream};

type SharedBroker = Arc<Broker>;

/// Build the router over a shared broker.
pub fn router(broker: SharedBroker) -> Router {
    Router::new()
        .route("/languages", get(list_languages))
        .route("/sessions", post(create_session).get(list_sessions))
        .route("/sessions/:id", get(get_session))
        .route("/sessions/:id/terminate", post(terminate_session))
        .route(
            "/sessions/:id/breakpoints",
            post(set_breakpoints).get(get_breakpoints),
        )
        .route("/sessions/:id/breakpoints/clear", post(clear_breakpoints))
        .route("/sessions/:id/launch", post(launch))
        .route("/sessions/:id/attach", post(attach))
        .route("/sessions/:id/continue", post(continue_))
        .route("/sessions/:id/step", post(step))
        .route("/sessions/:id/pause", post(pause))
        .route("/sessions/:id/stacktrace", get(stacktrace))
        .route("/sessions/:id/scopes", get(scopes))
        .route("/sessions/:id/variables", get(variables))
        .route("/sessions/:id/evaluate", post(evaluate))
        .route("/sessions/:id/inspect", post(inspect))
        .route("/sessions/:id/call-chain", get(call_chain))
        .route(
            "/sessions/:id/watches",
            post(watch_add).get(watch_list),
        )
        .route("/sessions/:id/watches/remove", post(watch_remove))
        .route("/sessions/:id/watches/evaluate", post(watch_eval_all))
        .route("/sessions/:id/events", get(poll_events))
        .route("/sessions/:id/output", get(get_output))
        .route("/recoverable", get(list_recoverable))
        .route("/recoverable/:id/recover", post(recover_session))
        .route("/containers/processes", post(container_processes))
        .route("/containers/attach", post(container_attach))
        .route("/containers/launch", post(container_launch))
        .with_state(broker)
}

/// Error payload shared by all endpoints.
#[derive(Debug, Serialize)]
struct ErrorBody {
    kind: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    command: Option<String>,
}

struct ApiError(BrokerError);

impl From<BrokerError> for ApiError {
    fn from(err: BrokerError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let body = ErrorBody {
            kind: self.0.kind().to_string(),
            message: self.0.to_string(),
            command: self.0.command().map(String::from),
        };
        (status, Json(body)).into_response()
    }
}

fn status_for(err: &BrokerError) -> StatusCode {
    match err.kind() {
        "invalid_argument" => StatusCode::BAD_REQUEST,
        "not_found" | "container_not_found" => StatusCode::NOT_FOUND,
        "failed_precondition" => StatusCode::CONFLICT,
        "timeout" => StatusCode::REQUEST_TIMEOUT,
        "capacity_exceeded" => StatusCode::TOO_MANY_REQUESTS,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// -- request DTOs -----------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetBreakpointsBody {
    path: PathBuf,
    breakpoints: Vec<BreakpointSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClearBreakpointsBody {
    #[serde(default)]
    path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreadBody {
    #[serde(default)]
    thread_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StepBody {
    mode: String,
    #[serde(default)]
    thread_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EvaluateBody {
    expression: String,
    #[serde(default)]
    frame_id: Option<i64>,
    #[serde(default)]
    context: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InspectBody {
    #[serde(default)]
    expression: Option<String>,
    #[serde(default)]
    variables_reference: Option<i64>,
    #[serde(default)]
    frame_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FrameBody {
    #[serde(default)]
    frame_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WatchAddBody {
    expression: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WatchRemoveBody {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StackTraceQuery {
    #[serde(default)]
    thread_id: Option<i64>,
    #[serde(default)]
    start_frame: Option<i64>,
    #[serde(default)]
    levels: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScopesQuery {
    frame_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VariablesQuery {
    variables_reference: i64,
    #[serde(default)]
    filter: Option<String>,
    #[serde(default)]
    start: Option<i64>,
    #[serde(default)]
    count: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallChainQuery {
    #[serde(default)]
    thread_id: Option<i64>,
    #[serde(default)]
    max_frames: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventsQuery {
    #[serde(default)]
    since_offset: u64,
    #[serde(default = "default_page_size")]
    max: usize,
    #[serde(default)]
    wait_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OutputQuery {
    #[serde(default)]
    stream: Option<OutputStream>,
    #[serde(default)]
    since_offset: u64,
    #[serde(default = "default_page_size")]
    max: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContainerProcessesBody {
    runtime: String,
    container: String,
    language: String,
}

fn default_page_size() -> usize {
    100
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusBody {
    status: &'static str,
}

// -- handlers ---------------------------------------------------------------

async fn list_languages(State(broker): State<SharedBroker>) -> impl IntoResponse {
    Json(broker.list_languages())
}

async fn create_session(
    State(broker): State<SharedBroker>,
    Json(request): Json<CreateSessionRequest>,
) -> ApiResult<polybugger_session::SessionSnapshot> {
    Ok(Json(broker.create_session(request)?))
}

async fn list_sessions(State(broker): State<SharedBroker>) -> impl IntoResponse {
    Json(broker.list_sessions())
}

async fn get_session(
    State(broker): State<SharedBroker>,
    Path(id): Path<String>,
) -> ApiResult<polybugger_session::SessionSnapshot> {
    Ok(Json(broker.get_session(&id)?))
}

async fn terminate_session(
    State(broker): State<SharedBroker>,
    Path(id): Path<String>,
) -> ApiResult<StatusBody> {
    broker.terminate_session(&id).await?;
    Ok(Json(StatusBody {
        status: "terminated",
    }))
}

async fn set_breakpoints(
    State(broker): State<SharedBroker>,
    Path(id): Path<String>,
    Json(body): Json<SetBreakpointsBody>,
) -> ApiResult<Vec<polybugger_session::BreakpointView>> {
    Ok(Json(
        broker
            .set_breakpoints(&id, &body.path, body.breakpoints)
            .await?,
    ))
}

async fn get_breakpoints(
    State(broker): State<SharedBroker>,
    Path(id): Path<String>,
) -> ApiResult<std::collections::BTreeMap<String, Vec<BreakpointSpec>>> {
    Ok(Json(broker.get_breakpoints(&id)?))
}

async fn clear_breakpoints(
    State(broker): State<SharedBroker>,
    Path(id): Path<String>,
    Json(body): Json<ClearBreakpointsBody>,
) -> ApiResult<serde_json::Value> {
    let count = broker.clear_breakpoints(&id, body.path.as_deref()).await?;
    Ok(Json(serde_json::json!({"cleared": count})))
}

async fn launch(
    State(broker): State<SharedBroker>,
    Path(id): Path<String>,
    Json(config): Json<polybugger_adapters::LaunchConfig>,
) -> ApiResult<StatusBody> {
    broker.launch(&id, config).await?;
    Ok(Json(StatusBody { status: "launched" }))
}

async fn attach(
    State(broker): State<SharedBroker>,
    Path(id): Path<String>,
    Json(config): Json<polybugger_adapters::AttachConfig>,
) -> ApiResult<StatusBody> {
    broker.attach(&id, config).await?;
    Ok(Json(StatusBody { status: "attached" }))
}

async fn continue_(
    State(broker): State<SharedBroker>,
    Path(id): Path<String>,
    Json(body): Json<ThreadBody>,
) -> ApiResult<StatusBody> {
    broker.continue_(&id, body.thread_id).await?;
    Ok(Json(StatusBody {
        status: "continued",
    }))
}

async fn step(
    State(broker): State<SharedBroker>,
    Path(id): Path<String>,
    Json(body): Json<StepBody>,
) -> ApiResult<StatusBody> {
    broker.step(&id, &body.mode, body.thread_id).await?;
    Ok(Json(StatusBody { status: "stepping" }))
}

async fn pause(
    State(broker): State<SharedBroker>,
    Path(id): Path<String>,
    Json(body): Json<ThreadBody>,
) -> ApiResult<StatusBody> {
    broker.pause(&id, body.thread_id).await?;
    Ok(Json(StatusBody { status: "pausing" }))
}

async fn stacktrace(
    State(broker): State<SharedBroker>,
    Path(id): Path<String>,
    Query(query): Query<StackTraceQuery>,
) -> ApiResult<Vec<polybugger_session::FrameView>> {
    Ok(Json(
        broker
            .stacktrace(&id, query.thread_id, query.start_frame, query.levels)
            .await?,
    ))
}

async fn scopes(
    State(broker): State<SharedBroker>,
    Path(id): Path<String>,
    Query(query): Query<ScopesQuery>,
) -> ApiResult<Vec<polybugger_session::ScopeView>> {
    Ok(Json(broker.scopes(&id, query.frame_id).await?))
}

async fn variables(
    State(broker): State<SharedBroker>,
    Path(id): Path<String>,
    Query(query): Query<VariablesQuery>,
) -> ApiResult<Vec<polybugger_session::VariableView>> {
    Ok(Json(
        broker
            .variables(
                &id,
                query.variables_reference,
                query.filter.as_deref(),
                query.start,
                query.count,
            )
            .await?,
    ))
}

async fn evaluate(
    State(broker): State<SharedBroker>,
    Path(id): Path<String>,
    Json(body): Json<EvaluateBody>,
) -> ApiResult<polybugger_session::EvaluateView> {
    Ok(Json(
        broker
            .evaluate(&id, &body.expression, body.frame_id, body.context.as_deref())
            .await?,
    ))
}

async fn inspect(
    State(broker): State<SharedBroker>,
    Path(id): Path<String>,
    Json(body): Json<InspectBody>,
) -> ApiResult<polybugger_session::Inspection> {
    let target = match (body.expression, body.variables_reference) {
        (Some(expression), None) => InspectTarget::Expression(expression),
        (None, Some(reference)) => InspectTarget::Reference(reference),
        _ => {
            return Err(BrokerError::InvalidArgument(
                "provide exactly one of expression or variablesReference".into(),
            )
            .into())
        }
    };
    Ok(Json(broker.smart_inspect(&id, target, body.frame_id).await?))
}

async fn call_chain(
    State(broker): State<SharedBroker>,
    Path(id): Path<String>,
    Query(query): Query<CallChainQuery>,
) -> ApiResult<Vec<polybugger_session::CallChainFrame>> {
    Ok(Json(
        broker
            .call_chain(&id, query.thread_id, query.max_frames)
            .await?,
    ))
}

async fn watch_add(
    State(broker): State<SharedBroker>,
    Path(id): Path<String>,
    Json(body): Json<WatchAddBody>,
) -> ApiResult<serde_json::Value> {
    let watch_id = broker.watch_add(&id, &body.expression)?;
    Ok(Json(serde_json::json!({"id": watch_id})))
}

async fn watch_remove(
    State(broker): State<SharedBroker>,
    Path(id): Path<String>,
    Json(body): Json<WatchRemoveBody>,
) -> ApiResult<StatusBody> {
    broker.watch_remove(&id, &body.id)?;
    Ok(Json(StatusBody { status: "removed" }))
}

async fn watch_list(
    State(broker): State<SharedBroker>,
    Path(id): Path<String>,
) -> ApiResult<Vec<polybugger_session::Watch>> {
    Ok(Json(broker.watch_list(&id)?))
}

async fn watch_eval_all(
    State(broker): State<SharedBroker>,
    Path(id): Path<String>,
    Json(body): Json<FrameBody>,
) -> ApiResult<Vec<polybugger_session::WatchEvalView>> {
    Ok(Json(broker.watch_eval_all(&id, body.frame_id).await?))
}

async fn poll_events(
    State(broker): State<SharedBroker>,
    Path(id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> ApiResult<polybugger_session::EventPage> {
    Ok(Json(
        broker
            .poll_events(&id, query.since_offset, query.max, query.wait_ms)
            .await?,
    ))
}

async fn get_output(
    State(broker): State<SharedBroker>,
    Path(id): Path<String>,
    Query(query): Query<OutputQuery>,
) -> ApiResult<polybugger_session::OutputPage> {
    Ok(Json(broker.get_output(
        &id,
        query.stream,
        query.since_offset,
        query.max,
    )?))
}

async fn list_recoverable(
    State(broker): State<SharedBroker>,
) -> ApiResult<Vec<polybugger_broker::RecoverableSession>> {
    Ok(Json(broker.list_recoverable()?))
}

async fn recover_session(
    State(broker): State<SharedBroker>,
    Path(id): Path<String>,
) -> ApiResult<polybugger_session::SessionSnapshot> {
    Ok(Json(broker.recover_session(&id)?))
}

async fn container_processes(
    State(broker): State<SharedBroker>,
    Json(body): Json<ContainerProcessesBody>,
) -> ApiResult<Vec<polybugger_containers::ProcessInfo>> {
    Ok(Json(
        broker
            .container_list_processes(&body.runtime, &body.container, &body.language)
            .await?,
    ))
}

async fn container_attach(
    State(broker): State<SharedBroker>,
    Json(request): Json<ContainerAttachRequest>,
) -> ApiResult<polybugger_session::SessionSnapshot> {
    Ok(Json(broker.container_attach(request).await?))
}

async fn container_launch(
    State(broker): State<SharedBroker>,
    Json(request): Json<ContainerLaunchRequest>,
) -> ApiResult<polybugger_session::SessionSnapshot> {
    Ok(Json(broker.container_launch(request).await?))
}
