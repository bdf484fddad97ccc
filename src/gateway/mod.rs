//! Axum-based gateway: the WebSocket upgrade endpoints for agents and
//! operators, plus the mounted REST surface, behind a shared body-size limit
//! and request timeout.
//!
//! This replaces the teacher's webhook/`WhatsApp` gateway with the hub's own
//! two entrypoints — `GET /ws/agent`, `GET /ws/operator` — both authenticated
//! by a signed ticket carried as a query parameter (§6) rather than a header,
//! since not every WebSocket client can set custom headers on the handshake.

use crate::api::{self, ApiState};
use crate::backplane::{Backplane, InMemoryBackplane};
use crate::channel::ChannelLayer;
use crate::clock::{Clock, SystemClock};
use crate::config::{BackplaneBackend, Config};
use crate::engine::{self, SequenceEventHandlers, SequenceService};
use crate::hub::{self, HubContext};
use crate::observability;
use crate::store::{SqliteStore, Store};
use crate::ticket::{TicketClaims, TicketKind, TicketSigner};
use crate::transit::{BatchConfig, TransitEndpoint};
use anyhow::{Context, Result};
use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Request body size ceiling shared by every REST route.
pub const MAX_BODY_SIZE: usize = 65_536;
/// Request timeout applied to the whole router, REST and WS upgrade alike.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Clone)]
struct WsState {
    ctx: Arc<HubContext>,
}

/// Builds the full router (WS upgrade endpoints + mounted REST surface,
/// body-limit and timeout layers) without binding a socket. Split out of
/// [`run_gateway`] so integration tests can drive the exact same router
/// against an ephemeral `TcpListener` instead of reimplementing it.
pub fn build_router(ctx: Arc<HubContext>, api_state: ApiState) -> Router {
    Router::new()
        .route("/ws/agent", get(ws_agent))
        .route("/ws/operator", get(ws_operator))
        .with_state(WsState { ctx })
        .merge(api::router(api_state))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
        ))
}

pub async fn run_gateway(config: Config) -> Result<()> {
    let store: Arc<dyn Store> = Arc::new(SqliteStore::open(config.sqlite_path()).context("failed to open sqlite store")?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let backplane = build_backplane(&config);
    let channel_layer = ChannelLayer::spawn(backplane).await?;
    let observer = Arc::from(observability::create_observer(&config.observability));

    let handlers = Arc::new(SequenceEventHandlers::new(store.clone(), channel_layer.clone()));
    let transit = Arc::new(TransitEndpoint::spawn(BatchConfig::new(32, Duration::from_millis(200)), handlers));
    let sequence_service = Arc::new(SequenceService::new(store.clone(), clock.clone(), transit));

    let ticket_secret = config
        .ticket
        .secret
        .clone()
        .context("ticket secret missing — Config::load_or_init should have generated one")?;
    let ticket_signer = Arc::new(TicketSigner::new(ticket_secret.into_bytes()));

    let cleaned = engine::cleanup_hanging_connections(
        store.clone(),
        clock.clone(),
        config.sequence_engine.hanging_connection_policy,
    )
    .await?;
    tracing::info!(cleaned, "boot-time hanging connection cleanup complete");

    let reaper_interval = Duration::from_secs(config.sequence_engine.orphan_reaper_interval_secs.max(1));
    engine::spawn_orphan_reaper(store.clone(), clock.clone(), sequence_service.clone(), reaper_interval);

    let ctx = Arc::new(HubContext {
        store: store.clone(),
        clock: clock.clone(),
        channel_layer: channel_layer.clone(),
        sequence_service: sequence_service.clone(),
        ticket_signer: ticket_signer.clone(),
        observer,
    });

    let api_state = ApiState {
        store,
        clock,
        channel_layer,
        sequence_service,
        ticket_signer,
    };

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_port = listener.local_addr()?.port();
    tracing::info!(host = %config.server.host, port = actual_port, "hub listening");

    crate::health::mark_component_ok("gateway");

    let app = build_router(ctx, api_state);

    axum::serve(listener, app).await?;
    Ok(())
}

fn build_backplane(config: &Config) -> Arc<dyn Backplane> {
    match config.backplane.backend {
        BackplaneBackend::Memory => Arc::new(InMemoryBackplane::new()),
        BackplaneBackend::Redis => {
            tracing::warn!("redis backplane is not implemented yet; falling back to the in-process backplane");
            Arc::new(InMemoryBackplane::new())
        }
    }
}

#[derive(Debug, Deserialize)]
struct TicketQuery {
    ticket: String,
}

fn client_ip(headers: &axum::http::HeaderMap) -> String {
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

async fn ws_agent(
    State(state): State<WsState>,
    Query(query): Query<TicketQuery>,
    headers: axum::http::HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    match authenticate(&state.ctx, &query.ticket, TicketKind::Application) {
        Ok(claims) => {
            let peer_ip = client_ip(&headers);
            ws.on_upgrade(move |socket| hub::run_agent_hub(state.ctx, socket, claims.subject_id, peer_ip))
                .into_response()
        }
        Err(err) => (StatusCode::UNAUTHORIZED, err.message).into_response(),
    }
}

async fn ws_operator(State(state): State<WsState>, Query(query): Query<TicketQuery>, ws: WebSocketUpgrade) -> impl IntoResponse {
    match authenticate(&state.ctx, &query.ticket, TicketKind::User) {
        Ok(claims) => ws.on_upgrade(move |socket| hub::run_operator_hub(state.ctx, socket, claims.subject_id)).into_response(),
        Err(err) => (StatusCode::UNAUTHORIZED, err.message).into_response(),
    }
}

fn authenticate(ctx: &HubContext, ticket: &str, expected: TicketKind) -> Result<TicketClaims, crate::error::HubError> {
    let now = ctx.clock.now();
    let claims = ctx.ticket_signer.verify(ticket, now).map_err(|err| {
        ctx.observer.record_event(&crate::observability::HubEvent::TicketRejected {
            reason: err.message.clone(),
        });
        err
    })?;
    if claims.kind != expected {
        let err = crate::error::HubError::authentication("ticket kind does not match this endpoint");
        ctx.observer.record_event(&crate::observability::HubEvent::TicketRejected {
            reason: err.message.clone(),
        });
        return Err(err);
    }
    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_ip_falls_back_to_unknown() {
        let headers = axum::http::HeaderMap::new();
        assert_eq!(client_ip(&headers), "unknown");
    }

    #[test]
    fn client_ip_reads_x_forwarded_for() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert("X-Forwarded-For", "1.2.3.4, 5.6.7.8".parse().unwrap());
        assert_eq!(client_ip(&headers), "1.2.3.4");
    }
}
