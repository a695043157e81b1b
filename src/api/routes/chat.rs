//! `POST /api/chat`: the completion request handler's HTTP face.
//!
//! Request `{"query": string, "context"?: {..}}`, success `{"response": string}`
//! with an `x-cache: hit|miss` header, failure `{"error": string}`.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::api::error::{error_response, ApiError};
use crate::api::server::AppState;
use crate::assistant::{AnswerSource, AskRequest};
use crate::cache::CacheContext;

/// Request body for `POST /api/chat`.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub query: String,
    #[serde(default)]
    pub context: Option<Map<String, Value>>,
}

/// Successful response from `POST /api/chat`.
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response: String,
}

pub async fn post_chat(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let Json(body) = match payload {
        Ok(body) => body,
        Err(rejection) => return error_response(rejection.status(), rejection.body_text()),
    };

    let context = match body.context.as_ref().map(CacheContext::from_json) {
        Some(Ok(ctx)) => ctx,
        Some(Err(e)) => return ApiError(e).into_response(),
        None => CacheContext::new(),
    };
    let request = AskRequest::new(body.query).with_context(context);

    // Cancelled on server shutdown, or when this future is dropped because
    // the client went away.
    let cancel = state.shutdown.child_token();
    let _cancel_on_drop = cancel.clone().drop_guard();

    match state.assistant.answer(&request, &cancel).await {
        Ok(answer) => {
            let mut resp = (
                StatusCode::OK,
                Json(ChatResponse {
                    response: answer.text,
                }),
            )
                .into_response();
            let cache_header = match answer.source {
                AnswerSource::Cache => "hit",
                AnswerSource::Upstream => "miss",
            };
            resp.headers_mut()
                .insert("x-cache", HeaderValue::from_static(cache_header));
            resp
        }
        Err(e) => ApiError(e).into_response(),
    }
}
