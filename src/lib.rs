pub mod cli;
pub mod commands;
pub mod db;
pub mod error;
pub mod market;
pub mod state;

use cli::Cli;
use commands::health::health;
use commands::tick_stream::{start_tick_stream, stop_tick_stream};
use db::{initialize_pool_from_path, resolve_db_path};
use error::AppError;
use market::{FeedEmitter, FeedEvent};
use state::AppState;
use tracing::info;

fn render_event(event: &FeedEvent, pretty: bool) -> Result<String, AppError> {
    let rendered = if pretty {
        simd_json::to_string_pretty(event)?
    } else {
        simd_json::to_string(event)?
    };
    Ok(rendered)
}

/// Runs one subscription until ctrl-c, printing every produced event.
pub async fn run(cli: Cli) -> Result<(), AppError> {
    let db_path = resolve_db_path(cli.db_path.clone())?;
    let db_pool = initialize_pool_from_path(&db_path).await?;
    info!(db = %db_path.display(), "trading calendar store ready");

    let (emitter, mut events) = FeedEmitter::channel();
    let state = AppState::new(db_pool, emitter);
    let session = start_tick_stream(&state, Some(cli.stream_args())).await?;
    info!(
        instrument = %session.instrument_id,
        feed_configured = session.feed_configured,
        timezone = %session.exchange_timezone,
        "tick feed running"
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => {
                let Some(event) = event else {
                    break;
                };
                println!("{}", render_event(&event, cli.pretty)?);
            }
        }
    }

    let stopped = stop_tick_stream(&state).await?;
    let health = health(&state).await?;
    info!(
        stopped = stopped.stopped,
        uptime_ms = health.uptime_ms as u64,
        db = health.db,
        "tick feed shut down"
    );
    Ok(())
}
