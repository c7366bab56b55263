//! Sift Web Server
//!
//! Axum-based REST API over the categorization engine.
//!
//! Security features:
//! - API key authentication (secure by default, use --no-auth for local dev)
//! - Restrictive CORS policy
//! - Input validation (suggestion page limits, bulk size limits)
//! - Sanitized error responses

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::{
    cors::CorsLayer, services::ServeDir, set_header::SetResponseHeaderLayer, trace::TraceLayer,
};
use tracing::{error, info, warn};

use sift_core::{AIBackend, CategorizationEngine};

mod handlers;

/// Maximum review-queue page size
pub const MAX_SUGGESTION_LIMIT: i64 = 100;

/// Default review-queue page size
pub const DEFAULT_SUGGESTION_LIMIT: i64 = 50;

/// Maximum ids accepted by a single bulk apply
pub const MAX_BULK_IDS: usize = 500;

/// Authorization header for API key auth
const AUTHORIZATION_HEADER: &str = "authorization";

/// Server configuration
#[derive(Clone)]
pub struct ServerConfig {
    /// Whether authentication is required (secure by default)
    pub require_auth: bool,
    /// Allowed CORS origins (empty = same-origin only)
    pub allowed_origins: Vec<String>,
    /// Accepted bearer keys, sent as "Bearer <key>" in the Authorization header
    pub api_keys: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            require_auth: true,
            allowed_origins: vec![],
            api_keys: vec![],
        }
    }
}

impl ServerConfig {
    /// Read `SIFT_API_KEYS` and `SIFT_ALLOWED_ORIGINS` (both comma-separated)
    pub fn from_env(require_auth: bool) -> Self {
        Self {
            require_auth,
            allowed_origins: split_list(&std::env::var("SIFT_ALLOWED_ORIGINS").unwrap_or_default()),
            api_keys: split_list(&std::env::var("SIFT_API_KEYS").unwrap_or_default()),
        }
    }
}

/// Split a comma-separated env value, dropping blanks
pub fn split_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Shared application state
pub struct AppState {
    pub engine: CategorizationEngine,
    pub config: ServerConfig,
}

/// Authentication middleware - validates bearer API keys
///
/// Keys are compared in constant time to prevent timing attacks.
async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    if !state.config.require_auth {
        return next.run(request).await;
    }

    let api_key_valid = request
        .headers()
        .get(AUTHORIZATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|auth| auth.strip_prefix("Bearer "))
        .map(|key| validate_api_key(key, &state.config.api_keys))
        .unwrap_or(false);

    if api_key_valid {
        tracing::debug!(path = %request.uri().path(), "Authenticated via API key");
        return next.run(request).await;
    }

    warn!(path = %request.uri().path(), "Unauthorized request - no valid auth");
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({
            "error": "Authentication required"
        })),
    )
        .into_response()
}

fn validate_api_key(provided: &str, valid_keys: &[String]) -> bool {
    use subtle::ConstantTimeEq;

    let provided_bytes = provided.as_bytes();

    // Visit every key; ct_eq is false on length mismatch
    let mut matched = subtle::Choice::from(0u8);
    for key in valid_keys {
        matched |= provided_bytes.ct_eq(key.as_bytes());
    }
    matched.into()
}

#[derive(Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Build the router around an engine
pub fn create_router(
    engine: CategorizationEngine,
    static_dir: Option<&str>,
    config: ServerConfig,
) -> Router {
    match engine.ai() {
        Some(ai) => info!(host = %ai.host(), model = %ai.model(), "External classifier configured"),
        None => info!("External classifier not configured (set OLLAMA_HOST to enable)"),
    }

    let state = Arc::new(AppState {
        engine,
        config: config.clone(),
    });

    let api_routes = Router::new()
        .route(
            "/categorization/suggestions",
            get(handlers::list_suggestions),
        )
        .route("/categorization/suggest/:id", get(handlers::suggest_one))
        .route("/categorization/apply", post(handlers::apply))
        .route("/categorization/apply-bulk", post(handlers::apply_bulk))
        .route("/categorization/similar/:id", get(handlers::find_similar))
        .route("/categorization/reset/:id", post(handlers::reset))
        .route("/categorization/auto", post(handlers::auto_categorize))
        .route("/categorization/stats", get(handlers::categorization_stats))
        .route("/categorization/rules", get(handlers::list_rules))
        .route("/categorization/rules/stats", get(handlers::rule_stats))
        .route("/categorization/rules/:id", delete(handlers::delete_rule))
        .route("/classifier/train", post(handlers::train_classifier))
        .route("/classifier/stats", get(handlers::classifier_stats))
        .route("/classifier/predict/:id", get(handlers::predict))
        .route("/categories", get(handlers::list_categories))
        .route("/transactions", post(handlers::create_transaction))
        .route("/transactions/:id", get(handlers::get_transaction))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    // Health stays reachable for load-balancer checks without a key
    let public_routes = Router::new().route("/health", get(handlers::health));

    let cors = if config.allowed_origins.is_empty() {
        CorsLayer::new()
            .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
    };

    let mut app = Router::new()
        .nest("/api", api_routes.merge(public_routes))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::CONTENT_SECURITY_POLICY,
            HeaderValue::from_static("default-src 'self'; frame-ancestors 'none'"),
        ));

    if let Some(dir) = static_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }

    app
}

/// Start the server with default (authenticated) configuration
pub async fn serve(engine: CategorizationEngine, host: &str, port: u16) -> anyhow::Result<()> {
    serve_with_config(engine, host, port, None, ServerConfig::default()).await
}

pub async fn serve_with_config(
    engine: CategorizationEngine,
    host: &str,
    port: u16,
    static_dir: Option<&str>,
    config: ServerConfig,
) -> anyhow::Result<()> {
    if !config.require_auth {
        warn!("Authentication disabled - do not expose to network!");
    } else if config.api_keys.is_empty() {
        warn!("No SIFT_API_KEYS configured; every /api request except /health will be rejected");
    }

    match engine.load_classifier() {
        Ok(Some(version)) => info!(version, "Classifier restored"),
        Ok(None) => info!("No trained classifier yet (POST /api/classifier/train)"),
        Err(e) => warn!(error = %e, "Failed to restore classifier"),
    }

    check_ai_connection(&engine).await;

    let app = create_router(engine, static_dir, config);
    let addr = format!("{}:{}", host, port);

    info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn check_ai_connection(engine: &CategorizationEngine) {
    let Some(client) = engine.ai() else {
        return;
    };
    if client.health_check().await {
        info!(host = %client.host(), model = %client.model(), "External classifier connected");
    } else {
        warn!(
            host = %client.host(),
            "External classifier configured but not responding; suggestions will skip it"
        );
    }
}

// ========== Error Handling ==========

/// API error with a client-safe message
///
/// Engine errors map to statuses by kind; anything unexpected becomes a
/// generic 500 and the full error is logged.
pub struct AppError {
    status: StatusCode,
    message: String,
    internal: Option<anyhow::Error>,
}

impl AppError {
    pub fn bad_request(msg: &str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.to_string(),
            internal: None,
        }
    }

    pub fn not_found(msg: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: msg.to_string(),
            internal: None,
        }
    }

    pub fn conflict(msg: &str) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: msg.to_string(),
            internal: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let Some(err) = &self.internal {
            error!(error = %err, "Internal error");
        }

        let body = Json(serde_json::json!({
            "error": self.message
        }));

        (self.status, body).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        let err = err.into();
        match err.downcast_ref::<sift_core::Error>() {
            Some(sift_core::Error::NotFound(what)) => Self::not_found(&format!("{} not found", what)),
            Some(sift_core::Error::InvalidData(msg)) => Self::bad_request(msg),
            Some(sift_core::Error::InvariantViolation(msg)) => Self::conflict(msg),
            _ => Self {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: "An internal error occurred".to_string(),
                internal: Some(err),
            },
        }
    }
}
