use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::dead_letter::{
    DeadLetterService, InspectRequest, InspectResult, RedriveReport, RedriveRequest,
};
use crate::error::Result;
use crate::publisher::{EventPublisher, PublishEvent};
use crate::types::EventMetadata;

#[derive(Clone)]
pub struct ApiState {
    pub publisher: EventPublisher,
    pub dead_letters: Arc<DeadLetterService>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IngestBody {
    event_type: String,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    metadata: EventMetadata,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InspectQuery {
    limit: Option<usize>,
    #[serde(default)]
    delete_processed: bool,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/tenants/{tenant_id}/events", post(ingest_event))
        .route("/tenants/{tenant_id}/dead-letters", get(inspect_dead_letters))
        .route("/dead-letters/redrive", post(redrive_dead_letters))
        .with_state(state)
}

/// Bind the API server and serve it in the background until `shutdown`
/// flips to true. Returns the bound address.
pub async fn start(
    state: ApiState,
    bind_addr: &str,
    mut shutdown: watch::Receiver<bool>,
) -> Result<SocketAddr> {
    let listener = TcpListener::bind(bind_addr).await?;
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "HTTP server bound");

    let app = router(state);
    tokio::spawn(async move {
        let signal = async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        };
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(signal)
            .await
        {
            tracing::error!(error = %e, "HTTP server error");
        }
    });

    Ok(addr)
}

async fn ingest_event(
    Path(tenant_id): Path<String>,
    State(state): State<ApiState>,
    Json(body): Json<IngestBody>,
) -> Result<(StatusCode, Json<Value>)> {
    let event = state
        .publisher
        .publish(PublishEvent {
            tenant_id,
            event_type: body.event_type,
            payload: body.payload,
            metadata: body.metadata,
        })
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "eventId": event.event_id })),
    ))
}

async fn inspect_dead_letters(
    Path(tenant_id): Path<String>,
    State(state): State<ApiState>,
    Query(query): Query<InspectQuery>,
) -> Result<Json<InspectResult>> {
    let result = state
        .dead_letters
        .inspect(InspectRequest {
            tenant_id,
            limit: query.limit,
            delete_processed: query.delete_processed,
        })
        .await?;
    Ok(Json(result))
}

async fn redrive_dead_letters(
    State(state): State<ApiState>,
    Json(request): Json<RedriveRequest>,
) -> Result<Json<RedriveReport>> {
    Ok(Json(state.dead_letters.redrive(request).await?))
}
