//! Liveness and readiness checks.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, instrument};

use crate::AppState;

/// Health check response body.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// When the check ran.
    pub timestamp: DateTime<Utc>,
    /// Database state, omitted from liveness responses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<ComponentHealth>,
    /// Service version.
    pub version: &'static str,
}

/// Overall check status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Serving requests.
    Healthy,
    /// A dependency is unavailable.
    Unhealthy,
}

/// State of one dependency.
#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    /// `up`, `down` or `not_configured`.
    pub status: ComponentStatus,
    /// Failure detail when down.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Component-level status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    /// Reachable.
    Up,
    /// Unreachable.
    Down,
    /// Running without this dependency.
    NotConfigured,
}

/// Liveness check. Never touches the database.
#[instrument(name = "health_check", skip_all)]
pub async fn health_check() -> Response {
    let response = HealthResponse {
        status: HealthStatus::Healthy,
        timestamp: Utc::now(),
        database: None,
        version: env!("CARGO_PKG_VERSION"),
    };
    (StatusCode::OK, Json(response)).into_response()
}

/// Readiness check with a database round-trip when one is configured.
#[instrument(name = "readiness_check", skip_all)]
pub async fn readiness_check(State(state): State<AppState>) -> Response {
    let database = match &state.storage {
        None => ComponentHealth { status: ComponentStatus::NotConfigured, message: None },
        Some(storage) => match storage.health_check().await {
            Ok(()) => ComponentHealth { status: ComponentStatus::Up, message: None },
            Err(e) => {
                error!("Database health check failed: {}", e);
                ComponentHealth {
                    status: ComponentStatus::Down,
                    message: Some(format!("Database connection failed: {e}")),
                }
            },
        },
    };

    let (status, status_code) = match database.status {
        ComponentStatus::Down => (HealthStatus::Unhealthy, StatusCode::SERVICE_UNAVAILABLE),
        ComponentStatus::Up | ComponentStatus::NotConfigured => {
            (HealthStatus::Healthy, StatusCode::OK)
        },
    };

    debug!(status = ?status, db_status = ?database.status, "Readiness check completed");

    let response = HealthResponse {
        status,
        timestamp: Utc::now(),
        database: Some(database),
        version: env!("CARGO_PKG_VERSION"),
    };
    (status_code, Json(response)).into_response()
}
