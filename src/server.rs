//! Webhook HTTP server powered by axum.
//!
//! Serves:
//! - `ANY /api/telegram-webhook` — Telegram update relay (path configurable)
//! - `GET /health`               — Health check

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Query, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{any, get},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn, Instrument};

use crate::config::Config;
use crate::relay::{Outcome, Relay, WebhookParams};

#[derive(Debug, Default, Deserialize)]
struct WebhookQuery {
    token: Option<String>,
    #[serde(rename = "siteId")]
    site_id: Option<String>,
}

/// Build the axum router serving the relay at `webhook_path`.
pub fn build_router(relay: Arc<Relay>, webhook_path: &str) -> Router {
    Router::new()
        .route(webhook_path, any(handle_webhook))
        .route("/health", get(health_check))
        .with_state(relay)
}

/// Bind and serve until Ctrl-C.
pub async fn run(config: &Config, relay: Arc<Relay>) -> Result<()> {
    let app = build_router(relay, &config.server.webhook_path);
    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "Invalid server address: {}:{}",
                config.server.bind, config.server.port
            )
        })?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    info!("Webhook relay listening on http://{}", addr);
    info!("   Webhook: http://{}{}", addr, config.server.webhook_path);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Shutting down");
        })
        .await
        .context("Server error")?;

    Ok(())
}

/// Telegram update relay. Non-POST requests are acknowledged with
/// `{ok:true}` so webhook verification checks succeed.
async fn handle_webhook(
    State(relay): State<Arc<Relay>>,
    method: Method,
    query: Result<Query<WebhookQuery>, QueryRejection>,
    body: Bytes,
) -> Response {
    if method != Method::POST {
        return Json(json!({"ok": true})).into_response();
    }

    // Telegram must always get a 2xx, so a malformed query means no params.
    let query = match query {
        Ok(Query(query)) => query,
        Err(e) => {
            warn!("Ignoring unparseable webhook query: {}", e);
            WebhookQuery::default()
        }
    };

    // A body that is not JSON has nothing actionable in it.
    let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let params = WebhookParams {
        token: query.token,
        site_id: query.site_id,
    };

    let request_id = uuid::Uuid::new_v4();
    let span = tracing::info_span!("webhook", %request_id);
    relay.handle(params, &body).instrument(span).await.into_response()
}

impl IntoResponse for Outcome {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Outcome::Ignored | Outcome::Replied => (StatusCode::OK, json!({"ok": true})),
            Outcome::MissingToken => (
                StatusCode::OK,
                json!({"ok": true, "warning": "No bot token"}),
            ),
            Outcome::SiteDisabled => (
                StatusCode::OK,
                json!({"ok": true, "info": "site disabled"}),
            ),
            Outcome::BotDisabled => (
                StatusCode::OK,
                json!({"ok": true, "info": "bot disabled"}),
            ),
            // 202 still counts as delivered for Telegram, so no retries.
            Outcome::UpstreamUnavailable { status } => {
                let mut body = json!({"ok": false, "error": "home api error"});
                if let Some(status) = status {
                    body["status"] = json!(status);
                }
                (StatusCode::ACCEPTED, body)
            }
            Outcome::UpstreamRejected { detail } => (
                StatusCode::ACCEPTED,
                json!({"ok": false, "error": "home returned not ok", "detail": detail}),
            ),
            Outcome::Failed => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({"ok": false, "error": "server error"}),
            ),
        };
        (status, Json(body)).into_response()
    }
}

/// GET /health — Health check.
async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    fn relay_for(uri: &str, fallback_token: Option<&str>) -> Arc<Relay> {
        let mut config = Config::default();
        config.home.base_url = uri.to_string();
        config.telegram.api_url = uri.to_string();
        config.telegram.bot_token = fallback_token.map(str::to_string);
        config.relay.typing_delay_ms = 0;
        Arc::new(Relay::new(&config).expect("relay"))
    }

    fn app(relay: Arc<Relay>) -> Router {
        build_router(relay, "/api/telegram-webhook")
    }

    fn update_body() -> String {
        json!({
            "update_id": 1,
            "message": {
                "message_id": 7,
                "from": {"id": 1001, "first_name": "Alice"},
                "chat": {"id": 42, "type": "private"},
                "text": "hello"
            }
        })
        .to_string()
    }

    fn post(uri: &str, body: String) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .expect("request")
    }

    async fn send(app: Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.oneshot(req).await.expect("response");
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .expect("body");
        (status, serde_json::from_slice(&bytes).expect("json"))
    }

    async fn mount_telegram(server: &MockServer) {
        Mock::given(matchers::method("POST"))
            .and(matchers::path_regex(r"(?i)^/bot[^/]+/sendchataction$"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": true})),
            )
            .mount(server)
            .await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path_regex(r"(?i)^/bot[^/]+/sendmessage$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": {
                    "message_id": 77,
                    "date": 1700000000,
                    "chat": {"id": 42, "type": "private", "first_name": "Alice"},
                    "text": "ok"
                }
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_duplicate_query_keys_on_get() {
        let server = MockServer::start().await;
        let req = Request::builder()
            .uri("/api/telegram-webhook?token=a&token=b")
            .body(Body::empty())
            .expect("request");

        let (status, body) = send(app(relay_for(&server.uri(), None)), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"ok": true}));
    }

    #[tokio::test]
    async fn test_duplicate_query_keys_on_post_still_relay() {
        let server = MockServer::start().await;
        mount_telegram(&server).await;
        Mock::given(matchers::path("/api/chat"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"ok": true, "reply": "hi"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let req = post("/api/telegram-webhook?siteId=a&siteId=b", update_body());
        let (status, body) = send(app(relay_for(&server.uri(), Some("T"))), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"ok": true}));

        let requests = server.received_requests().await.unwrap();
        assert!(requests.iter().all(|r| r.url.path() != "/api/config"));
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let server = MockServer::start().await;
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .expect("request");

        let (status, body) = send(app(relay_for(&server.uri(), None)), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_get_is_acknowledged() {
        let server = MockServer::start().await;
        let req = Request::builder()
            .uri("/api/telegram-webhook")
            .body(Body::empty())
            .expect("request");

        let (status, body) = send(app(relay_for(&server.uri(), Some("T"))), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"ok": true}));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_json_is_acknowledged() {
        let server = MockServer::start().await;
        let req = post("/api/telegram-webhook?token=T", "{not json".to_string());

        let (status, body) = send(app(relay_for(&server.uri(), None)), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"ok": true}));
    }

    #[tokio::test]
    async fn test_missing_token_warning() {
        let server = MockServer::start().await;
        let req = post("/api/telegram-webhook?siteId=site-1", update_body());

        let (status, body) = send(app(relay_for(&server.uri(), None)), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"ok": true, "warning": "No bot token"}));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_query_params_reach_relay() {
        let server = MockServer::start().await;
        mount_telegram(&server).await;
        Mock::given(matchers::path("/api/config"))
            .and(matchers::query_param("siteId", "site-9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"botOff": true})))
            .expect(1)
            .mount(&server)
            .await;

        let req = post("/api/telegram-webhook?token=T&siteId=site-9", update_body());
        let (status, body) = send(app(relay_for(&server.uri(), None)), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"ok": true, "info": "bot disabled"}));
    }

    #[tokio::test]
    async fn test_site_disabled_response() {
        let server = MockServer::start().await;
        mount_telegram(&server).await;
        Mock::given(matchers::path("/api/config"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"siteOff": true})))
            .mount(&server)
            .await;

        let req = post("/api/telegram-webhook?token=T&siteId=s", update_body());
        let (status, body) = send(app(relay_for(&server.uri(), None)), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"ok": true, "info": "site disabled"}));
    }

    #[tokio::test]
    async fn test_upstream_failure_status() {
        let server = MockServer::start().await;
        mount_telegram(&server).await;

        let mut config = Config::default();
        config.home.base_url = "http://127.0.0.1:1".to_string();
        config.telegram.api_url = server.uri();
        config.relay.typing_delay_ms = 0;
        let relay = Arc::new(Relay::new(&config).expect("relay"));

        let req = post("/api/telegram-webhook?token=T", update_body());
        let (status, body) = send(app(relay), req).await;
        assert_ne!(status, StatusCode::OK);
        assert_ne!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({"ok": false, "error": "home api error"}));
    }

    #[tokio::test]
    async fn test_upstream_rejection_detail() {
        let server = MockServer::start().await;
        mount_telegram(&server).await;
        Mock::given(matchers::path("/api/chat"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"ok": false, "error": "nope"})),
            )
            .mount(&server)
            .await;

        let req = post("/api/telegram-webhook?token=T", update_body());
        let (status, body) = send(app(relay_for(&server.uri(), None)), req).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["error"], "home returned not ok");
        assert_eq!(body["detail"]["error"], "nope");
    }

    #[tokio::test]
    async fn test_reply_ok() {
        let server = MockServer::start().await;
        mount_telegram(&server).await;
        Mock::given(matchers::path("/api/chat"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"ok": true, "reply": "hi"})),
            )
            .mount(&server)
            .await;

        let req = post("/api/telegram-webhook?token=T", update_body());
        let (status, body) = send(app(relay_for(&server.uri(), None)), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"ok": true}));
    }

    #[test]
    fn test_outcome_status_codes() {
        assert_eq!(Outcome::Failed.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            Outcome::UpstreamUnavailable { status: Some(503) }
                .into_response()
                .status(),
            StatusCode::ACCEPTED
        );
        assert_eq!(Outcome::Ignored.into_response().status(), StatusCode::OK);
    }
}
