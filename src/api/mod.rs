//! The ambient REST surface (§1A, §6): thin `axum` handlers wrapping the same
//! [`crate::engine::SequenceService`] and [`crate::store::Store`] the hub
//! protocol's WebSocket handlers call, behind the teacher's `ApiResponse<T>`
//! envelope (`{success, data?, error?, count?}`).

use crate::channel::ChannelLayer;
use crate::clock::Clock;
use crate::engine::SequenceService;
use crate::error::HubError;
use crate::model::{Application, ApplicationTask, CodeType, Event, OneTimeSecurityCode};
use crate::store::Store;
use crate::ticket::{TicketKind, TicketSigner};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, patch, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
            count: None,
        })
    }

    pub fn ok_with_count(data: T, count: u64) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
            count: Some(count),
        })
    }
}

fn err_response(err: HubError) -> (StatusCode, Json<ApiResponse<()>>) {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(err.message),
            count: None,
        }),
    )
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, (StatusCode, Json<ApiResponse<()>>)>;

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn Store>,
    pub clock: Arc<dyn Clock>,
    pub channel_layer: Arc<ChannelLayer>,
    pub sequence_service: Arc<SequenceService>,
    pub ticket_signer: Arc<TicketSigner>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/applications", post(create_application))
        .route("/register/request-code", post(request_registration_code))
        .route("/register/confirm", post(confirm_registration))
        .route("/applications/{id}/tasks", get(list_application_tasks))
        .route("/sequences", post(create_sequence))
        .route("/sequences/{id}/finish", post(finish_sequence))
        .route("/sequences/{id}/meta", patch(update_sequence_meta))
        .route("/events", post(publish_event))
        .route("/connections/{id}/close", post(close_connection))
        .route("/counters/{subject}", get(get_counters))
        .route("/tickets", post(issue_ticket))
        .route("/health", get(health))
        .with_state(state)
}

fn client_ip(headers: &HeaderMap) -> String {
    for header_name in ["X-Forwarded-For", "X-Real-IP"] {
        if let Some(value) = headers.get(header_name).and_then(|v| v.to_str().ok()) {
            let first = value.split(',').next().unwrap_or("").trim();
            if !first.is_empty() {
                return first.to_owned();
            }
        }
    }
    "unknown".into()
}

#[derive(Deserialize)]
struct CreateApplicationBody {
    name: String,
    display_name: String,
    #[serde(default)]
    tags: Vec<String>,
}

async fn create_application(State(state): State<ApiState>, Json(body): Json<CreateApplicationBody>) -> ApiResult<Application> {
    let mut app = Application::new(body.name, body.display_name);
    app.tags = body.tags;
    state.store.create_application(&app).map_err(err_response)?;
    Ok(ApiResponse::ok(app))
}

async fn request_registration_code(State(state): State<ApiState>, headers: HeaderMap) -> ApiResult<Value> {
    let ip = client_ip(&headers);
    let now = state.clock.now();
    let mut code = OneTimeSecurityCode::generate(CodeType::ApplicationRegistration, &ip, now);
    // §3 "8+ digits, extended on collision": widen until the code is free.
    while state.store.get_security_code(&code.code).map_err(err_response)?.is_some() {
        code.widen();
    }
    state.store.put_security_code(&code).map_err(err_response)?;
    Ok(ApiResponse::ok(serde_json::json!({"code": code.code, "expires_at": code.expires_at})))
}

#[derive(Deserialize)]
struct ConfirmRegistrationBody {
    code: String,
    name: String,
    display_name: String,
}

async fn confirm_registration(State(state): State<ApiState>, Json(body): Json<ConfirmRegistrationBody>) -> ApiResult<Application> {
    let now = state.clock.now();
    let mut code = state
        .store
        .get_security_code(&body.code)
        .map_err(err_response)?
        .ok_or_else(|| err_response(HubError::not_found("registration code not found or already used")))?;
    if code.is_expired(now) {
        return Err(err_response(HubError::authentication("registration code expired")));
    }
    code.confirm(now);

    let app = Application::new(body.name, body.display_name);
    state.store.create_application(&app).map_err(err_response)?;
    state.store.delete_security_code(&body.code).map_err(err_response)?;
    Ok(ApiResponse::ok(app))
}

#[derive(Deserialize)]
struct TaskListQuery {
    #[serde(default)]
    include_deleted: bool,
}

async fn list_application_tasks(
    State(state): State<ApiState>,
    Path(app_id): Path<String>,
    Query(query): Query<TaskListQuery>,
) -> ApiResult<Vec<ApplicationTask>> {
    let tasks = state.store.list_tasks_for_app(&app_id, query.include_deleted).map_err(err_response)?;
    Ok(ApiResponse::ok_with_count(tasks.clone(), tasks.len() as u64))
}

#[derive(Deserialize)]
struct CreateSequenceBody {
    app_id: String,
    #[serde(default)]
    task_qualified_name: Option<String>,
    #[serde(default)]
    connection_id: Option<String>,
    name: String,
}

async fn create_sequence(State(state): State<ApiState>, headers: HeaderMap, Json(body): Json<CreateSequenceBody>) -> ApiResult<Value> {
    let app = state
        .store
        .get_application(&body.app_id)
        .map_err(err_response)?
        .ok_or_else(|| err_response(HubError::not_found("application not found")))?;
    let task = match &body.task_qualified_name {
        Some(qn) => Some(
            state
                .store
                .get_task_by_qualified_name(qn)
                .map_err(err_response)?
                .ok_or_else(|| err_response(HubError::not_found("task not found")))?,
        ),
        None => None,
    };
    let ip = client_ip(&headers);
    let (sequence, event) = state
        .sequence_service
        .create_sequence_and_start_event(&app, task.as_ref(), body.connection_id, body.name, &ip)
        .await
        .map_err(err_response)?;
    Ok(ApiResponse::ok(serde_json::json!({"sequence": sequence, "event": event})))
}

#[derive(Deserialize)]
struct FinishSequenceBody {
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    is_skipped: bool,
}

async fn finish_sequence(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<FinishSequenceBody>,
) -> ApiResult<Value> {
    let ip = client_ip(&headers);
    let (sequence, events) = state
        .sequence_service
        .finish_sequence(&id, body.error_message, body.is_skipped, &ip)
        .await
        .map_err(err_response)?;
    Ok(ApiResponse::ok(serde_json::json!({"sequence": sequence, "events": events})))
}

async fn update_sequence_meta(State(state): State<ApiState>, Path(id): Path<String>, Json(patch): Json<Value>) -> ApiResult<Value> {
    let sequence = state
        .sequence_service
        .update_sequence_meta(&id, patch)
        .await
        .map_err(err_response)?;
    Ok(ApiResponse::ok(serde_json::to_value(sequence).unwrap_or(Value::Null)))
}

#[derive(Deserialize)]
struct PublishEventBody {
    app_id: String,
    #[serde(default)]
    task_name: Option<String>,
    #[serde(default)]
    sequence_id: Option<String>,
    event_type: String,
    #[serde(default)]
    data: Value,
}

async fn publish_event(State(state): State<ApiState>, headers: HeaderMap, Json(body): Json<PublishEventBody>) -> ApiResult<Event> {
    if crate::model::RESERVED_EVENT_TYPES.contains(&body.event_type.as_str()) {
        return Err(err_response(HubError::validation(format!(
            "event type {} is reserved",
            body.event_type
        ))));
    }
    let app = state
        .store
        .get_application(&body.app_id)
        .map_err(err_response)?
        .ok_or_else(|| err_response(HubError::not_found("application not found")))?;

    let sequence = match &body.sequence_id {
        Some(sequence_id) => {
            let seq = state
                .store
                .get_sequence(sequence_id)
                .map_err(err_response)?
                .ok_or_else(|| err_response(HubError::not_found(format!("sequence {sequence_id} not found"))))?;
            if seq.app_id != app.id {
                return Err(err_response(HubError::authorization("sequence belongs to a different application")));
            }
            if seq.state.is_terminal() {
                return Err(err_response(HubError::conflict(format!("sequence {sequence_id} is already finished"))));
            }
            Some(seq)
        }
        None => None,
    };
    let task_name = sequence.as_ref().and_then(|seq| seq.task_name.clone());

    let event_key = match &task_name {
        Some(task_name) => Event::sequence_key(task_name, &body.event_type),
        None => Event::free_form_key(&app.name, &body.event_type),
    };
    let now = state.clock.now();
    let event = Event {
        id: crate::model::new_id(),
        app_id: app.id.clone(),
        task_name,
        task_id: sequence.as_ref().and_then(|seq| seq.task_id.clone()),
        sequence_id: body.sequence_id.clone(),
        event_type: body.event_type,
        event_key: event_key.clone(),
        data: body.data,
        publisher_ip: client_ip(&headers),
        t: now.timestamp_micros(),
    };
    state.store.insert_event(&event).map_err(err_response)?;
    for period in crate::model::Period::ALL {
        let bucket = period.bucket(now);
        let _ = state.store.increment_counter("events", period, &bucket, 1);
    }

    if let Some(sequence_id) = &body.sequence_id {
        unfreeze_if_needed(&state, sequence_id, now).map_err(err_response)?;
    }

    let mut groups = vec![format!("e/key/{event_key}"), format!("m/appEvents/{}", app.id)];
    if let Some(sequence_id) = &body.sequence_id {
        groups.push(format!("m/sequenceEvents/{sequence_id}"));
    }
    let _ = state
        .channel_layer
        .groups_send(&groups, serde_json::json!({"type": "event_published", "event": event}))
        .await;

    Ok(ApiResponse::ok(event))
}

/// A published event implies the publishing agent is alive again (§4.5 step
/// 5, §8 "Event publish unfreezes"). Best-effort: a lost race against a
/// concurrent state change just means the next orphan sweep decides instead.
fn unfreeze_if_needed(state: &ApiState, sequence_id: &str, now: chrono::DateTime<chrono::Utc>) -> crate::error::HubResult<()> {
    if let Some(mut seq) = state.store.get_sequence(sequence_id)? {
        let expected = seq.state_updated_at;
        if seq.unfreeze(now) {
            state.store.update_sequence_if_unchanged(&seq, expected)?;
        }
    }
    Ok(())
}

async fn close_connection(State(state): State<ApiState>, Path(id): Path<String>) -> ApiResult<Value> {
    state.channel_layer.close_connection(&id).await.map_err(err_response)?;
    Ok(ApiResponse::ok(serde_json::json!({"closed": id})))
}

async fn get_counters(State(state): State<ApiState>, Path(subject): Path<String>) -> ApiResult<Value> {
    let counters = state.store.list_counters(&subject).map_err(err_response)?;
    Ok(ApiResponse::ok(serde_json::to_value(counters).unwrap_or(Value::Null)))
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum TicketKindBody {
    Application,
    User,
}

#[derive(Deserialize)]
struct IssueTicketBody {
    kind: TicketKindBody,
    subject_id: String,
}

/// `POST /tickets` — issues the short-lived WS upgrade ticket named by §6
/// ("issued over an authenticated REST call"). The application/user identity
/// check that authenticates *this* call is left to whatever sits in front of
/// the gateway (reverse proxy auth, operator session); this handler's only
/// job is minting the signed ticket once that's established.
async fn issue_ticket(State(state): State<ApiState>, Json(body): Json<IssueTicketBody>) -> ApiResult<Value> {
    let kind = match body.kind {
        TicketKindBody::Application => TicketKind::Application,
        TicketKindBody::User => TicketKind::User,
    };
    let now = state.clock.now();
    let ticket = state.ticket_signer.issue(kind, &body.subject_id, now);
    Ok(ApiResponse::ok(serde_json::json!({
        "ticket": ticket,
        "expires_in_secs": kind.default_lifetime().as_secs(),
    })))
}

async fn health() -> impl IntoResponse {
    ApiResponse::ok(crate::health::snapshot_json())
}
