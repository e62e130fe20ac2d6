use crate::market::calendar::SessionCalendar;
use crate::market::types::{StreamStatusSnapshot, DEFAULT_INSTRUMENT_ID};
use crate::market::FeedEmitter;
use reqwest::Client;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct TickStreamHandle {
    pub cancellation_token: CancellationToken,
    pub join_handle: JoinHandle<()>,
    pub enabled: watch::Sender<bool>,
}

pub struct AppState {
    pub started_at: Instant,
    pub db_pool: SqlitePool,
    pub http_client: Client,
    pub calendar: Arc<SessionCalendar>,
    pub emitter: FeedEmitter,
    pub tick_stream: Mutex<Option<TickStreamHandle>>,
    pub tick_status: Arc<RwLock<StreamStatusSnapshot>>,
}

impl AppState {
    pub fn new(db_pool: SqlitePool, emitter: FeedEmitter) -> Self {
        let tick_status = StreamStatusSnapshot::idle(
            DEFAULT_INSTRUMENT_ID.to_string(),
            Some("stream idle".to_string()),
        );

        Self {
            started_at: Instant::now(),
            db_pool,
            http_client: Client::new(),
            calendar: Arc::new(SessionCalendar::default()),
            emitter,
            tick_stream: Mutex::new(None),
            tick_status: Arc::new(RwLock::new(tick_status)),
        }
    }
}
