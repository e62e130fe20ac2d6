use crate::market::types::{StartTickStreamArgs, DEFAULT_INSTRUMENT_ID};
use clap::Parser;
use std::path::PathBuf;

/// Streams intraday ticks for one instrument and prints the chart feed as
/// JSON lines on stdout.
///
/// Feed location falls back to TICK_FEED_PROTOCOL, TICK_FEED_HOST,
/// TICK_FEED_PORT and TICK_FEED_PATH; the calendar endpoint to
/// TICK_CALENDAR_URL.
#[derive(Debug, Parser)]
#[command(name = "intraday-tick-feed", author, version, about)]
pub struct Cli {
    /// Instrument code to subscribe to.
    #[arg(long, default_value = DEFAULT_INSTRUMENT_ID)]
    pub instrument: String,

    /// Feed protocol, `ws` or `wss`.
    #[arg(long)]
    pub protocol: Option<String>,

    #[arg(long)]
    pub host: Option<String>,

    #[arg(long)]
    pub port: Option<u16>,

    #[arg(long)]
    pub path: Option<String>,

    /// HTTP endpoint returning one year of trading days.
    #[arg(long)]
    pub calendar_url: Option<String>,

    #[arg(long)]
    pub reconnect_delay_ms: Option<u64>,

    #[arg(long)]
    pub date_recheck_interval_ms: Option<u64>,

    /// IANA time zone of the exchange.
    #[arg(long)]
    pub timezone: Option<String>,

    /// Pin the session date (YYYY-MM-DD or YYYYMMDD) instead of resolving it.
    #[arg(long)]
    pub effective_date: Option<String>,

    /// Start with the subscription disabled.
    #[arg(long)]
    pub disabled: bool,

    /// SQLite file for the trading-calendar store. Defaults to
    /// `./data/$TICK_DB_FILENAME`.
    #[arg(long)]
    pub db_path: Option<PathBuf>,

    #[arg(long)]
    pub pretty: bool,
}

impl Cli {
    pub fn stream_args(&self) -> StartTickStreamArgs {
        StartTickStreamArgs {
            instrument_id: Some(self.instrument.clone()),
            enabled: Some(!self.disabled),
            protocol: self.protocol.clone(),
            host: self.host.clone(),
            port: self.port,
            path: self.path.clone(),
            calendar_url: self.calendar_url.clone(),
            reconnect_delay_ms: self.reconnect_delay_ms,
            date_recheck_interval_ms: self.date_recheck_interval_ms,
            exchange_timezone: self.timezone.clone(),
            effective_date: self.effective_date.clone(),
        }
    }
}
