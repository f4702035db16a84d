//! Alert ingress HTTP server
//!
//! Small axum app bound to a private interface: `POST /alert` pushes a
//! notification into the inbox, `GET /health` reports liveness. Alert
//! ingestion never touches the voice pipeline directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use super::{Alert, AlertInbox, Priority};
use crate::{Error, Result};

/// Shared state for the alert routes
#[derive(Clone)]
pub struct AlertServerState {
    pub inbox: Arc<AlertInbox>,
    pub token: String,
    pub user_in_voice: Arc<AtomicBool>,
}

/// Alert submission body
#[derive(Debug, Deserialize)]
struct AlertRequest {
    message: Option<String>,
    #[serde(default = "default_priority")]
    priority: Priority,
    #[serde(rename = "fullDetails")]
    full_details: Option<String>,
    source: Option<String>,
}

const fn default_priority() -> Priority {
    Priority::Normal
}

/// Alert submission response
#[derive(Serialize)]
struct AlertResponse {
    ok: bool,
    queued: bool,
    #[serde(rename = "userInVoice")]
    user_in_voice: bool,
}

/// Health response
#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
}

/// Build the router for the alert ingress app
fn router(state: AlertServerState) -> Router {
    let protected = Router::new()
        .route("/alert", post(post_alert))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_bearer,
        ));

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the alert ingress until the token is cancelled
///
/// # Errors
///
/// Returns an error if the listener cannot bind.
pub async fn serve(
    state: AlertServerState,
    bind_address: &str,
    port: u16,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::Alert(format!("bind {addr}: {e}")))?;

    tracing::info!(%addr, "alert ingress listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| Error::Alert(e.to_string()))
}

/// Middleware verifying the `Authorization: Bearer` token
async fn require_bearer(
    State(state): State<AlertServerState>,
    req: Request,
    next: Next,
) -> std::result::Result<Response, StatusCode> {
    let provided = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        Some(token) if token == state.token => Ok(next.run(req).await),
        Some(_) => {
            tracing::warn!("alert ingress: invalid bearer token");
            Err(StatusCode::UNAUTHORIZED)
        }
        None => {
            tracing::debug!("alert ingress: missing bearer token");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { ok: true })
}

async fn post_alert(
    State(state): State<AlertServerState>,
    Json(body): Json<AlertRequest>,
) -> std::result::Result<Json<AlertResponse>, StatusCode> {
    let Some(message) = body.message.filter(|m| !m.trim().is_empty()) else {
        return Err(StatusCode::BAD_REQUEST);
    };

    let mut alert = Alert::new(body.priority, message.trim());
    alert.detail = body.full_details;
    alert.source = body.source;
    state.inbox.push(alert);

    Ok(Json(AlertResponse {
        ok: true,
        queued: true,
        user_in_voice: state.user_in_voice.load(Ordering::SeqCst),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::body::Body;
    use axum::http::{header, Method};
    use tower::ServiceExt as _;

    fn state() -> AlertServerState {
        AlertServerState {
            inbox: Arc::new(AlertInbox::default()),
            token: "hook-secret".to_string(),
            user_in_voice: Arc::new(AtomicBool::new(false)),
        }
    }

    fn alert_request(auth: Option<&str>, body: &str) -> Request {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/alert")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(auth) = auth {
            builder = builder.header(header::AUTHORIZATION, auth);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn health_needs_no_auth() {
        let app = router(state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_token_is_unauthorized() {
        let app = router(state());
        let response = app
            .oneshot(alert_request(None, r#"{"message":"hi"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn wrong_token_is_unauthorized() {
        let app = router(state());
        let response = app
            .oneshot(alert_request(Some("Bearer nope"), r#"{"message":"hi"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn missing_message_is_bad_request() {
        let app = router(state());
        let response = app
            .oneshot(alert_request(
                Some("Bearer hook-secret"),
                r#"{"priority":"urgent"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn valid_alert_is_queued() {
        let state = state();
        state.user_in_voice.store(true, Ordering::SeqCst);
        let inbox = Arc::clone(&state.inbox);

        let app = router(state);
        let response = app
            .oneshot(alert_request(
                Some("Bearer hook-secret"),
                r#"{"message":"deploy finished","priority":"urgent","source":"ci"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["ok"], true);
        assert_eq!(json["queued"], true);
        assert_eq!(json["userInVoice"], true);

        let batch = inbox.drain_for_briefing();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].message, "deploy finished");
        assert_eq!(batch[0].priority, Priority::Urgent);
    }

    #[tokio::test]
    async fn default_priority_is_normal() {
        let state = state();
        let inbox = Arc::clone(&state.inbox);

        let app = router(state);
        let response = app
            .oneshot(alert_request(
                Some("Bearer hook-secret"),
                r#"{"message":"fyi"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(inbox.drain_for_briefing()[0].priority, Priority::Normal);
    }
}
