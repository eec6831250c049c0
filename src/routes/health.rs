use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub database: ComponentHealth,
    pub redis: ComponentHealth,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub latency_ms: Option<u64>,
}

impl ComponentHealth {
    fn ok(started: std::time::Instant) -> Self {
        Self {
            status: "ok".to_string(),
            latency_ms: Some(started.elapsed().as_millis() as u64),
        }
    }

    fn with_status(status: &str) -> Self {
        Self {
            status: status.to_string(),
            latency_ms: None,
        }
    }

    /// Anything but an error counts as healthy.
    fn is_healthy(&self) -> bool {
        self.status != "error"
    }
}

/// GET /health: database and sweep-lock connectivity.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let start = std::time::Instant::now();

    let db_check = match sqlx::query("SELECT 1").execute(&state.db).await {
        Ok(_) => ComponentHealth::ok(start),
        Err(e) => {
            tracing::warn!(error = %e, "Database health check failed");
            ComponentHealth::with_status("error")
        }
    };

    // Redis is optional; without it sweeps run unlocked
    let redis_check = match &state.lock {
        Some(lock) => {
            let redis_start = std::time::Instant::now();
            match lock.health_check().await {
                Ok(()) => ComponentHealth::ok(redis_start),
                Err(e) => {
                    tracing::warn!(error = %e, "Redis health check failed");
                    ComponentHealth::with_status("error")
                }
            }
        }
        None => ComponentHealth::with_status("not_configured"),
    };

    let all_healthy = db_check.is_healthy() && redis_check.is_healthy();
    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if all_healthy {
            "ok".to_string()
        } else {
            "degraded".to_string()
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: HealthChecks {
            database: db_check,
            redis: redis_check,
        },
    };

    (status_code, Json(response))
}
