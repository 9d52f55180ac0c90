use std::sync::Arc;

use axum::{
    extract::{Path, Query, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::Value;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::CorsLayer;

use baton_core::client::BatonClient;
use baton_core::types::CORRELATION_ID_FIELD;

use crate::handlers::*;

pub type AppState = Arc<BatonClient>;

/// Env var holding the bearer token. Unset or empty leaves the server open.
pub const API_KEY_VAR: &str = "BATON_API_KEY";

const MAX_IN_FLIGHT_REQUESTS: usize = 256;

pub async fn run(host: &str, port: u16, client: BatonClient) -> std::io::Result<()> {
    let api_key: Option<Arc<str>> = std::env::var(API_KEY_VAR)
        .ok()
        .filter(|key| !key.is_empty())
        .map(Arc::from);

    if api_key.is_some() {
        tracing::info!("🔐 API key authentication enabled");
    } else {
        tracing::warn!("⚠️  No {} set, server is open (dev mode)", API_KEY_VAR);
    }

    let app = router(Arc::new(client), api_key);
    let addr = format!("{}:{}", host, port);
    tracing::info!("🎫 Baton server starting on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

pub fn router(state: AppState, api_key: Option<Arc<str>>) -> Router {
    Router::new()
        // Health is always open (no auth)
        .route("/health", get(health))
        .route("/tickets", get(list_tickets))
        .route("/tickets/{id}", delete(release_ticket))
        .route("/events/{name}", post(emit_event))
        .layer(middleware::from_fn_with_state(api_key, auth_middleware))
        .layer(ConcurrencyLimitLayer::new(MAX_IN_FLIGHT_REQUESTS))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("🛑 Shutting down");
}

// ─── Auth Middleware ────────────────────────────────────────────────────────

async fn auth_middleware(
    State(api_key): State<Option<Arc<str>>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected_key) = api_key else {
        return Ok(next.run(request).await);
    };

    if request.uri().path() == "/health" {
        return Ok(next.run(request).await);
    }

    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    if token == &*expected_key {
        Ok(next.run(request).await)
    } else {
        tracing::warn!("🚫 Unauthorized request to {}", request.uri().path());
        Err(StatusCode::UNAUTHORIZED)
    }
}

// ─── Handlers ───────────────────────────────────────────────────────────────

async fn health(State(client): State<AppState>) -> (StatusCode, Json<ApiResponse<HealthResponse>>) {
    match client.tickets().await {
        Ok(tickets) => (
            StatusCode::OK,
            Json(ApiResponse::ok(HealthResponse {
                status: "ok".to_string(),
                queued_tickets: tickets.len(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            })),
        ),
        Err(e) => {
            tracing::error!(error = %e, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiResponse::err(e.to_string())),
            )
        }
    }
}

async fn list_tickets(
    State(client): State<AppState>,
) -> (StatusCode, Json<ApiResponse<Vec<TicketInfo>>>) {
    match client.tickets().await {
        Ok(tickets) => (
            StatusCode::OK,
            Json(ApiResponse::ok(TicketInfo::from_queue(tickets))),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiResponse::err(e.to_string())),
        ),
    }
}

async fn release_ticket(
    State(client): State<AppState>,
    Path(id): Path<String>,
) -> (StatusCode, Json<ApiResponse<ReleaseResponse>>) {
    match client.force_release(&id).await {
        Ok(true) => (
            StatusCode::OK,
            Json(ApiResponse::ok(ReleaseResponse {
                ticket_id: id,
                released: true,
            })),
        ),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::err(format!("Ticket '{}' not found", id))),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiResponse::err(e.to_string())),
        ),
    }
}

async fn emit_event(
    State(client): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<EmitQuery>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<ApiResponse<EmitResponse>>) {
    if let Err(e) = validate_event_name(&name) {
        return (StatusCode::BAD_REQUEST, Json(ApiResponse::err(e)));
    }
    let Value::Object(mut fields) = body else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::err("event payload must be a JSON object")),
        );
    };
    if let Some(id) = query.correlation_id {
        fields.insert(CORRELATION_ID_FIELD.to_string(), Value::String(id));
    }

    match client.emit(&name, fields).await {
        Ok(emitted) => {
            tracing::info!(
                event = %name,
                correlation_id = %emitted.correlation_id,
                receivers = emitted.receivers,
                "Event emitted"
            );
            (
                StatusCode::ACCEPTED,
                Json(ApiResponse::ok(EmitResponse::new(name, emitted))),
            )
        }
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiResponse::err(e.to_string())),
        ),
    }
}

// ─── Storage Backend Selection ──────────────────────────────────────────────

/// Build a client for `storage`: `"memory"` or `"sqlite:<path>"`.
pub fn create_client(storage: &str, queue: &str) -> Result<BatonClient, String> {
    if storage == "memory" {
        tracing::info!("💾 Storage backend: in-memory (tickets are local to this process)");
        Ok(BatonClient::new())
    } else if let Some(path) = storage.strip_prefix("sqlite:") {
        #[cfg(feature = "sqlite")]
        {
            tracing::info!(queue, "💾 Storage backend: SQLite ({})", path);
            BatonClient::with_sqlite(path, queue)
                .map_err(|e| format!("Failed to open SQLite database at '{}': {}", path, e))
        }
        #[cfg(not(feature = "sqlite"))]
        {
            let _ = (path, queue);
            Err("SQLite storage requested but the `sqlite` feature is not enabled. \
                 Rebuild with: cargo build --features sqlite"
                .to_string())
        }
    } else {
        Err(format!(
            "Unknown storage backend: '{}'. Use 'memory' or 'sqlite:<path>'",
            storage
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use baton_core::bus::Subscriber;
    use std::sync::Mutex;
    use tower::ServiceExt;

    async fn call(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health_is_open_with_api_key() {
        let app = router(Arc::new(BatonClient::new()), Some(Arc::from("k3y")));

        let (status, body) = call(app.clone(), get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["queued_tickets"], 0);

        let (status, _) = call(app, get("/tickets")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_bearer_token_grants_access() {
        let app = router(Arc::new(BatonClient::new()), Some(Arc::from("k3y")));

        let request = Request::get("/tickets")
            .header("authorization", "Bearer k3y")
            .body(Body::empty())
            .unwrap();
        let (status, body) = call(app, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_force_release_of_unknown_ticket() {
        let app = router(Arc::new(BatonClient::new()), None);

        let request = Request::delete("/tickets/nope00").body(Body::empty()).unwrap();
        let (status, body) = call(app, request).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_emit_reaches_subscribers() {
        let client = BatonClient::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _sub = {
            let seen = seen.clone();
            client
                .subscribe(
                    "user.create",
                    Subscriber::new("test", move |payload| {
                        seen.lock().unwrap().push(payload);
                        Ok(())
                    }),
                )
                .await
                .unwrap()
        };
        let app = router(Arc::new(client), None);

        let request = Request::post("/events/user.create?correlation_id=abc1234")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"name":"ada"}"#))
            .unwrap();
        let (status, body) = call(app, request).await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["data"]["correlation_id"], "abc1234");
        assert_eq!(body["data"]["receivers"], 1);
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0]["name"], "ada");
        assert_eq!(seen[0][CORRELATION_ID_FIELD], "abc1234");
    }

    #[tokio::test]
    async fn test_emit_rejects_bad_input() {
        let app = router(Arc::new(BatonClient::new()), None);

        let array_body = Request::post("/events/user.create")
            .header("content-type", "application/json")
            .body(Body::from("[1,2]"))
            .unwrap();
        let (status, _) = call(app.clone(), array_body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let bad_name = Request::post("/events/bad%20name")
            .header("content-type", "application/json")
            .body(Body::from("{}"))
            .unwrap();
        let (status, _) = call(app, bad_name).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_unknown_storage_is_an_error() {
        assert!(create_client("redis://localhost", "default").is_err());
        assert!(create_client("memory", "default").is_ok());
    }
}
