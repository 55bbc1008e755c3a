//! # Session Endpoint
//!
//! - `POST /reset-session?session_id=...`: forget a stream's fluctuation
//!   drift and stitching tail so the next chunk starts fresh

use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    pub session_id: String,
}

/// Reset a streaming session's fluctuation and stitching state.
///
/// ## Endpoint: `POST /reset-session?session_id=...`
///
/// An unknown session is not an error: the response says `not_found`.
pub async fn reset_session(state: web::Data<AppState>, query: web::Query<SessionQuery>) -> HttpResponse {
    let session_id = query.into_inner().session_id;
    let status = if state.pipeline.reset_session(&session_id) {
        "reset"
    } else {
        "not_found"
    };

    HttpResponse::Ok().json(json!({
        "status": status,
        "session_id": session_id
    }))
}
