use crate::error::AppError;
use crate::market::calendar::CalendarLoader;
use crate::market::connection::ConnectionState;
use crate::market::pipeline::run_tick_stream;
use crate::market::types::{
    StartTickStreamArgs, StreamStatusSnapshot, TickStreamSession, TickStreamStopResult,
};
use crate::state::{AppState, TickStreamHandle};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Replaces any running subscription with one built from `args`.
pub async fn start_tick_stream(
    state: &AppState,
    args: Option<StartTickStreamArgs>,
) -> Result<TickStreamSession, AppError> {
    let config = args.unwrap_or_default().normalize()?;

    let existing_handle = {
        let mut stream_slot = state.tick_stream.lock().await;
        stream_slot.take()
    };
    if let Some(handle) = existing_handle {
        handle.cancellation_token.cancel();
        let _ = handle.join_handle.await;
    }

    let cancellation_token = CancellationToken::new();
    let task_token = cancellation_token.clone();
    let (enabled, enabled_control) = watch::channel(config.enabled);
    let status_store = Arc::clone(&state.tick_status);
    let calendar = Arc::clone(&state.calendar);
    let emitter = state.emitter.clone();
    let loader = CalendarLoader::new(
        state.http_client.clone(),
        config.calendar_url.clone(),
        Some(state.db_pool.clone()),
    );
    let runtime_config = config.clone();

    info!(
        instrument = %config.instrument_id,
        enabled = config.enabled,
        feed_configured = config.endpoint.is_some(),
        "starting tick stream"
    );
    let join_handle = tokio::spawn(async move {
        run_tick_stream(
            runtime_config,
            calendar,
            loader,
            status_store,
            emitter,
            enabled_control,
            task_token,
        )
        .await;
    });

    {
        let mut stream_slot = state.tick_stream.lock().await;
        *stream_slot = Some(TickStreamHandle {
            cancellation_token,
            join_handle,
            enabled,
        });
    }

    Ok(TickStreamSession::from_config(&config))
}

pub async fn stop_tick_stream(state: &AppState) -> Result<TickStreamStopResult, AppError> {
    let existing_handle = {
        let mut stream_slot = state.tick_stream.lock().await;
        stream_slot.take()
    };

    let stopped = if let Some(handle) = existing_handle {
        handle.cancellation_token.cancel();
        let _ = handle.join_handle.await;
        true
    } else {
        false
    };

    {
        let mut writable = state.tick_status.write().await;
        *writable = StreamStatusSnapshot {
            state: ConnectionState::Idle,
            reconnect_attempts: 0,
            reason: Some("stream stopped by command".to_string()),
            ..writable.clone()
        };
    }

    Ok(TickStreamStopResult { stopped })
}

/// Toggles the running subscription without restarting it. Returns false when
/// no subscription is running.
pub async fn set_tick_stream_enabled(state: &AppState, enabled: bool) -> Result<bool, AppError> {
    let stream_slot = state.tick_stream.lock().await;
    let Some(handle) = stream_slot.as_ref() else {
        return Ok(false);
    };

    info!(enabled, "toggling tick stream");
    Ok(handle.enabled.send(enabled).is_ok())
}

pub async fn tick_stream_status(state: &AppState) -> Result<StreamStatusSnapshot, AppError> {
    let snapshot = state.tick_status.read().await.clone();
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::run_migrations;
    use crate::market::FeedEmitter;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::time::Duration;

    async fn app_state() -> AppState {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite should open");
        run_migrations(&pool).await.expect("migrations should run");
        let (emitter, _events) = FeedEmitter::channel();
        AppState::new(pool, emitter)
    }

    fn disabled_args() -> StartTickStreamArgs {
        StartTickStreamArgs {
            instrument_id: Some("000001".to_string()),
            enabled: Some(false),
            host: Some("127.0.0.1".to_string()),
            port: Some(9),
            effective_date: Some("2024-01-15".to_string()),
            ..StartTickStreamArgs::default()
        }
    }

    #[tokio::test]
    async fn rejects_invalid_arguments_before_spawning() {
        let state = app_state().await;
        let args = StartTickStreamArgs {
            reconnect_delay_ms: Some(1),
            ..disabled_args()
        };

        let result = start_tick_stream(&state, Some(args)).await;

        assert!(matches!(result, Err(AppError::InvalidArgument(_))));
        assert!(state.tick_stream.lock().await.is_none());
    }

    #[tokio::test]
    async fn start_replaces_and_stop_clears_the_subscription() {
        let state = app_state().await;

        let session = start_tick_stream(&state, Some(disabled_args()))
            .await
            .expect("stream should start");
        assert!(session.running);
        assert_eq!(session.instrument_id, "000001");
        assert!(!session.enabled);

        start_tick_stream(&state, Some(disabled_args()))
            .await
            .expect("restart should succeed");
        tokio::time::sleep(Duration::from_millis(50)).await;

        let status = tick_stream_status(&state).await.expect("status readable");
        assert_eq!(status.instrument_id, "000001");
        assert_eq!(status.reason.as_deref(), Some("stream disabled"));

        let first_stop = stop_tick_stream(&state).await.expect("stop should succeed");
        let second_stop = stop_tick_stream(&state).await.expect("stop should succeed");
        assert!(first_stop.stopped);
        assert!(!second_stop.stopped);

        let status = tick_stream_status(&state).await.expect("status readable");
        assert_eq!(status.state, ConnectionState::Idle);
        assert_eq!(status.reason.as_deref(), Some("stream stopped by command"));
    }

    #[tokio::test]
    async fn toggling_requires_a_running_subscription() {
        let state = app_state().await;

        let toggled = set_tick_stream_enabled(&state, true)
            .await
            .expect("toggle should not fail");
        assert!(!toggled);

        start_tick_stream(&state, Some(disabled_args()))
            .await
            .expect("stream should start");
        let toggled = set_tick_stream_enabled(&state, false)
            .await
            .expect("toggle should not fail");
        assert!(toggled);

        stop_tick_stream(&state).await.expect("stop should succeed");
    }
}
