//! HTTP surface: one request message per `POST /rpc` body.
//!
//! The reply message is the response body (empty for oneway calls). Requests
//! whose header cannot be decoded get `400`; failures the processor
//! propagates get `500`.

use axum::{
    body::Bytes,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};

use wirecall_core::transport::http::CONTENT_TYPE;

use crate::app_state::AppState;

pub async fn rpc(State(state): State<AppState>, body: Bytes) -> Response {
    let processor = state.processor();
    match processor.process(body).await {
        Ok(outcome) => {
            let reply = outcome.reply.unwrap_or_default();
            (StatusCode::OK, [(header::CONTENT_TYPE, CONTENT_TYPE)], reply).into_response()
        }
        Err(e) => {
            tracing::warn!(error = %e, code = e.code().as_str(), "rpc request failed");
            let status = if e.is_protocol() {
                StatusCode::BAD_REQUEST
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            (status, e.to_string()).into_response()
        }
    }
}
