use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;

use crate::ingestor::{IngestOutcome, WebhookIngestor};

#[derive(Clone)]
pub struct IngestState {
    pub ingestor: Arc<WebhookIngestor>,
}

/// `POST /webhooks/:marketplace/:user_id`. Always returns 200 regardless of
/// whether the signature validated (§4.7: "the endpoint still returns a
/// success status to prevent probing").
pub fn router(state: IngestState) -> Router {
    Router::new().route("/webhooks/:marketplace/:user_id", post(receive_webhook)).with_state(state)
}

async fn receive_webhook(
    State(state): State<IngestState>,
    Path((marketplace, user_id)): Path<(String, uuid::Uuid)>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> StatusCode {
    let signature = headers
        .get("x-webhook-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let header_map: HashMap<String, String> = headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
        .collect();

    match state.ingestor.ingest(user_id, &marketplace, &body, &signature, header_map).await {
        Ok(IngestOutcome::Accepted | IngestOutcome::InvalidSignature) => StatusCode::OK,
        Err(e) => {
            tracing::error!(error = %e, %marketplace, "webhook ingestion failed internally");
            // Still 200: an internal failure isn't the sender's problem to
            // retry into, and retrying would just repeat the failure.
            StatusCode::OK
        }
    }
}
