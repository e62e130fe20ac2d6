use crate::error::AppError;
use crate::market::calendar::{TradingDayRecord, TradingDayWire};
use reqwest::Client;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tracing::debug;
use url::Url;

pub type FeedSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn calendar_endpoint(calendar_url: &str, year: i32) -> Result<Url, AppError> {
    let mut endpoint = Url::parse(calendar_url.trim())?;
    endpoint
        .query_pairs_mut()
        .append_pair("year", &year.to_string());
    Ok(endpoint)
}

pub async fn connect_tick_stream(url: &Url) -> Result<FeedSocket, AppError> {
    let ws_config = WebSocketConfig {
        max_message_size: Some(64 << 20),
        max_frame_size: Some(16 << 20),
        ..Default::default()
    };

    let (stream, _) = connect_async_with_config(url.as_str(), Some(ws_config), true).await?;
    Ok(stream)
}

/// Fetches one calendar year; entries that cannot be parsed are skipped.
pub async fn fetch_trading_calendar(
    client: &Client,
    calendar_url: &str,
    year: i32,
) -> Result<Vec<TradingDayRecord>, AppError> {
    let endpoint = calendar_endpoint(calendar_url, year)?;
    let response = client.get(endpoint).send().await?.error_for_status()?;
    let payload = response.json::<Vec<TradingDayWire>>().await?;

    let mut records = Vec::with_capacity(payload.len());
    for entry in payload {
        match TradingDayRecord::try_from(entry) {
            Ok(record) => records.push(record),
            Err(error) => debug!(year, %error, "skipping trading calendar entry"),
        }
    }
    records.sort_unstable_by_key(|record| record.date);
    records.dedup_by_key(|record| record.date);
    Ok(records)
}
