//! Liveness handler.

use crate::models::HealthResponse;
use crate::routes::AppState;
use axum::extract::State;
use axum::Json;
use std::sync::Arc;

/// Liveness probe handler.
///
/// Does not fetch keys. `key_set` only reports whether a fetch has ever
/// succeeded, so an unreachable identity provider does not restart the pod.
///
/// ## Example Response
///
/// ```json
/// {
///   "status": "healthy",
///   "region": "us-east-1",
///   "key_set": "populated"
/// }
/// ```
#[tracing::instrument(skip_all, name = "gateway.health.check")]
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let populated = state.verifier.key_cache().is_populated().await;

    Json(HealthResponse {
        status: "healthy".to_string(),
        region: state.config.region.clone(),
        key_set: if populated { "populated" } else { "empty" }.to_string(),
    })
}
