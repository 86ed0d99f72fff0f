use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use repuestos_db::{connection::ping, DbPool};
use repuestos_engine::TickSummary;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    last_tick: watch::Receiver<Option<TickSummary>>,
}

impl HealthState {
    pub fn new(db_pool: DbPool, last_tick: watch::Receiver<Option<TickSummary>>) -> Self {
        Self { db_pool, last_tick }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: HealthCheck,
    pub scheduler: HealthCheck,
    pub last_tick: Option<TickSummary>,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

pub async fn spawn(
    bind_address: &str,
    port: u16,
    state: HealthState,
    cancel: CancellationToken,
) -> std::io::Result<JoinHandle<()>> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(event_name = "system.health.start", bind_address = %address, "health endpoint started");

    Ok(tokio::spawn(async move {
        let server = axum::serve(listener, router(state))
            .with_graceful_shutdown(async move { cancel.cancelled().await });
        if let Err(error) = server.await {
            error!(
                event_name = "system.health.error",
                error = %error,
                "health endpoint server terminated unexpectedly"
            );
        }
    }))
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let last_tick = *state.last_tick.borrow();
    let ready = database.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        database,
        scheduler: scheduler_check(last_tick.as_ref()),
        last_tick,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match ping(pool).await {
        Ok(()) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

fn scheduler_check(last_tick: Option<&TickSummary>) -> HealthCheck {
    match last_tick {
        None => HealthCheck { status: "starting", detail: "no tick has completed yet".to_string() },
        Some(summary) => HealthCheck {
            status: "ready",
            detail: format!(
                "last tick at {} examined {} solicitudes ({} transitions, {} conflicts, {} failures)",
                summary.finished_at.to_rfc3339(),
                summary.examined,
                summary.transitions,
                summary.conflicts,
                summary.failures
            ),
        },
    }
}
