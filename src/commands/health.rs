use crate::market::connection::ConnectionState;
use crate::{error::AppError, state::AppState};
use serde::Serialize;
use sqlx::SqlitePool;
use std::time::Instant;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_ms: u128,
    pub db: &'static str,
    pub stream: ConnectionState,
}

pub async fn build_health_response(
    started_at: Instant,
    pool: &SqlitePool,
    stream: ConnectionState,
) -> HealthResponse {
    let db_status = match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(pool)
        .await
    {
        Ok(_) => "ok",
        Err(_) => "error",
    };

    HealthResponse {
        status: "ok",
        uptime_ms: started_at.elapsed().as_millis(),
        db: db_status,
        stream,
    }
}

pub async fn health(state: &AppState) -> Result<HealthResponse, AppError> {
    let stream = state.tick_status.read().await.state;
    Ok(build_health_response(state.started_at, &state.db_pool, stream).await)
}
