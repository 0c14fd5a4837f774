//! # Health Check and Metrics Endpoints
//!
//! - `GET /health`, `GET /api/v1/health`: liveness, `{mode, status}`
//! - `GET /api/v1/metrics`: session counts, relay counters and live sessions
//!
//! ## Example Response (/health):
//! ```json
//! { "mode": "local", "status": "ok" }
//! ```

use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Liveness check. `mode` reports whether remote credentials were present at startup.
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "mode": state.mode,
        "status": "ok"
    }))
}

pub async fn relay_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let sessions: Vec<_> = state
        .registry
        .snapshot()
        .into_iter()
        .map(|(id, entry)| {
            json!({
                "connection_id": id,
                "mode": entry.mode,
                "opened_at": entry.opened_at.to_rfc3339()
            })
        })
        .collect();

    HttpResponse::Ok().json(json!({
        "mode": state.mode,
        "uptime_seconds": state.get_uptime_seconds(),
        "active_sessions": state.registry.len(),
        "max_concurrent_sessions": state.registry.max_sessions(),
        "sessions_opened": metrics.sessions_opened,
        "envelopes_received": metrics.envelopes_received,
        "backend_errors": metrics.backend_errors,
        "sessions": sessions
    }))
}
