use anyhow::{Context, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequestParts, Path, State};
use axum::http::header::{AUTHORIZATION, LOCATION, WWW_AUTHENTICATE};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::ServiceConfig;
use crate::directory::{self, DirectoryStore, StoreError, UserDraft};
use crate::security::audit_log::AuditLogger;
use crate::security::bootstrap::{RetryPolicy, SecretBootstrapper, SecretSource};
use crate::security::policy::{self, AccessDecision, DenyReason, Operation};
use crate::security::token::{extract_bearer, AuthFailure, Principal, TokenValidator};
use crate::security::vault_client::VaultClient;

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub validator: Arc<TokenValidator>,
    pub directory: Arc<dyn DirectoryStore>,
    pub audit: AuditLogger,
}

impl AppState {
    pub fn new(
        config: Arc<ServiceConfig>,
        validator: TokenValidator,
        directory: Arc<dyn DirectoryStore>,
    ) -> Self {
        Self::with_audit(config, validator, directory, AuditLogger::new())
    }

    pub fn with_audit(
        config: Arc<ServiceConfig>,
        validator: TokenValidator,
        directory: Arc<dyn DirectoryStore>,
        audit: AuditLogger,
    ) -> Self {
        Self {
            config,
            validator: Arc::new(validator),
            directory,
            audit,
        }
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Per-request failures. Bodies stay generic; details go to the log.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unauthorized: {0}")]
    Unauthorized(AuthFailure),
    #[error("forbidden: {0}")]
    Forbidden(DenyReason),
    #[error("user not found")]
    NotFound,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, "Forbidden".to_string()),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "User not found".to_string()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Store(e) => {
                error!(error = %e, "directory store failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(ErrorResponse { error: message });
        if status == StatusCode::UNAUTHORIZED {
            (status, [(WWW_AUTHENTICATE, "Bearer")], body).into_response()
        } else {
            (status, body).into_response()
        }
    }
}

/// Caller authenticated from `Authorization: Bearer <jwt>`.
#[derive(Debug, Clone)]
pub struct Authenticated(pub Principal);

impl FromRequestParts<SharedState> for Authenticated {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let outcome = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(extract_bearer)
            .ok_or(AuthFailure::MissingToken)
            .and_then(|token| state.validator.validate(token));

        match outcome {
            Ok(principal) => Ok(Authenticated(principal)),
            Err(reason) => {
                state.audit.auth_failure(parts.uri.path(), reason);
                Err(ApiError::Unauthorized(reason))
            }
        }
    }
}

fn enforce(
    state: &AppState,
    op: Operation,
    owner: Option<&str>,
    principal: Option<&Principal>,
) -> Result<(), ApiError> {
    match policy::authorize(op, owner, principal) {
        AccessDecision::Allow => {
            if let Some(p) = principal {
                state.audit.access_granted(p.subject_id(), op, owner);
            }
            Ok(())
        }
        AccessDecision::Deny(reason) => {
            state.audit.access_denied(principal.map(Principal::subject_id), op, owner, reason);
            match reason {
                DenyReason::Unauthenticated => {
                    Err(ApiError::Unauthorized(AuthFailure::MissingToken))
                }
                _ => Err(ApiError::Forbidden(reason)),
            }
        }
    }
}

fn parse_user_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw)
        .map_err(|_| ApiError::BadRequest(format!("'{raw}' is not a valid user id")))
}

fn parse_draft(payload: Result<Json<UserDraft>, JsonRejection>) -> Result<UserDraft, ApiError> {
    let Json(draft) = payload.map_err(|rejection| {
        debug!(error = %rejection.body_text(), "rejected user payload");
        ApiError::BadRequest("Invalid user payload".to_string())
    })?;
    Ok(draft)
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

// Anonymous: anyone may register.
async fn create_user(
    State(state): State<SharedState>,
    payload: Result<Json<UserDraft>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    enforce(&state, Operation::Create, None, None)?;

    let record = parse_draft(payload)?
        .into_record(Uuid::new_v4())
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let created = state.directory.create(record).await?;
    let id = created.id.to_string();
    state.audit.user_created(&id, None);
    info!(user_id = %id, name = %created.name, "user created");

    Ok((
        StatusCode::CREATED,
        [(LOCATION, format!("/user/{id}"))],
        Json(created),
    ))
}

async fn get_user(
    State(state): State<SharedState>,
    Authenticated(principal): Authenticated,
    Path(raw_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_user_id(&raw_id)?;
    let owner = id.to_string();
    enforce(&state, Operation::ReadById, Some(&owner), Some(&principal))?;

    debug!(user_id = %owner, "fetching user");
    match state.directory.get_by_id(id).await? {
        Some(user) => Ok(Json(user)),
        None => {
            warn!(user_id = %owner, "user not found");
            Err(ApiError::NotFound)
        }
    }
}

async fn get_user_by_name(
    State(state): State<SharedState>,
    Authenticated(principal): Authenticated,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    enforce(&state, Operation::ReadByName, None, Some(&principal))?;

    debug!(name = %name, "fetching user by name");
    match state.directory.get_by_name(&name).await? {
        Some(user) => Ok(Json(user)),
        None => {
            warn!(name = %name, "user not found");
            Err(ApiError::NotFound)
        }
    }
}

async fn list_users(
    State(state): State<SharedState>,
    Authenticated(principal): Authenticated,
) -> Result<impl IntoResponse, ApiError> {
    enforce(&state, Operation::ListAll, None, Some(&principal))?;

    let users = state.directory.list_all().await?;
    debug!(count = users.len(), "listing users");
    Ok(Json(users))
}

async fn update_user(
    State(state): State<SharedState>,
    Authenticated(principal): Authenticated,
    Path(raw_id): Path<String>,
    payload: Result<Json<UserDraft>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_user_id(&raw_id)?;
    let owner = id.to_string();
    enforce(&state, Operation::Update, Some(&owner), Some(&principal))?;

    let record = parse_draft(payload)?
        .into_record(id)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    match state.directory.update(id, record).await? {
        Some(updated) => {
            state.audit.user_updated(&owner, principal.subject_id());
            info!(user_id = %owner, "user updated");
            Ok(Json(updated))
        }
        None => {
            warn!(user_id = %owner, "user not updated, no such record");
            Err(ApiError::NotFound)
        }
    }
}

async fn delete_user(
    State(state): State<SharedState>,
    Authenticated(principal): Authenticated,
    Path(raw_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_user_id(&raw_id)?;
    let owner = id.to_string();
    enforce(&state, Operation::Delete, Some(&owner), Some(&principal))?;

    if state.directory.delete(id).await? {
        state.audit.user_deleted(&owner, principal.subject_id());
        info!(user_id = %owner, "user deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        warn!(user_id = %owner, "user not deleted, no such record");
        Err(ApiError::NotFound)
    }
}

fn hosted_at_address() -> String {
    match local_ip_address::local_ip() {
        Ok(ip) => ip.to_string(),
        Err(e) => {
            warn!(error = %e, "could not resolve local address");
            "Could not resolve IP-address".to_string()
        }
    }
}

async fn version(
    State(state): State<SharedState>,
    Authenticated(principal): Authenticated,
) -> Result<impl IntoResponse, ApiError> {
    enforce(&state, Operation::ReadVersion, None, Some(&principal))?;

    let address = tokio::task::spawn_blocking(hosted_at_address)
        .await
        .unwrap_or_else(|_| "Could not resolve IP-address".to_string());

    Ok(Json(json!({
        "service": state.config.service_name,
        "version": crate::VERSION,
        "hosted-at-address": address,
    })))
}

pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/user/add", post(create_user))
        .route("/user/all", get(list_users))
        .route("/user/version", get(version))
        .route("/user/name/{name}", get(get_user_by_name))
        .route(
            "/user/{id}",
            get(get_user).put(update_user).delete(delete_user),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Resolve secrets from `source`, then wire validator and directory into
/// the shared request state. Fails if any step fails.
pub async fn build_state(
    config: Arc<ServiceConfig>,
    source: Arc<dyn SecretSource>,
) -> Result<SharedState> {
    let description = source.describe();
    let bootstrapper = SecretBootstrapper::new(
        source,
        RetryPolicy::from(&config.vault),
        config.secret_keys.clone(),
    );
    let secrets = bootstrapper
        .fetch_secrets()
        .await
        .context("bootstrapping secrets")?;

    let audit = AuditLogger::new();
    audit.secrets_loaded(&description, secrets.bundle.issuer());

    let directory =
        directory::open(&secrets.connection_string).context("opening directory store")?;
    let validator = TokenValidator::new(secrets.bundle, config.token.leeway_secs);

    Ok(Arc::new(AppState::with_audit(config, validator, directory, audit)))
}

pub async fn serve(config: ServiceConfig, port: u16) -> Result<()> {
    let config = Arc::new(config);
    let vault = VaultClient::from_env(&config.vault)?;
    let state = build_state(config, Arc::new(vault)).await?;

    let app = create_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("HTTP server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
