use crate::error::AppError;
use crate::market::connection::ConnectionState;
use chrono::{NaiveDate, NaiveDateTime};
use chrono_tz::Tz;
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

pub const DEFAULT_INSTRUMENT_ID: &str = "600519";
pub const DEFAULT_ENABLED: bool = true;
pub const DEFAULT_FEED_PROTOCOL: &str = "ws";
pub const DEFAULT_FEED_PATH: &str = "/ws/stock";
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 3_000;
pub const DEFAULT_DATE_RECHECK_INTERVAL_MS: u64 = 60_000;
pub const DEFAULT_EXCHANGE_TIMEZONE: &str = "Asia/Shanghai";
pub const MIN_RECONNECT_DELAY_MS: u64 = 50;
pub const MAX_RECONNECT_DELAY_MS: u64 = 60_000;
pub const MIN_DATE_RECHECK_INTERVAL_MS: u64 = 1_000;
pub const MAX_DATE_RECHECK_INTERVAL_MS: u64 = 3_600_000;
pub const QUOTE_LADDER_DEPTH: usize = 5;

pub const FEED_PROTOCOL_ENV: &str = "TICK_FEED_PROTOCOL";
pub const FEED_HOST_ENV: &str = "TICK_FEED_HOST";
pub const FEED_PORT_ENV: &str = "TICK_FEED_PORT";
pub const FEED_PATH_ENV: &str = "TICK_FEED_PATH";
pub const CALENDAR_URL_ENV: &str = "TICK_CALENDAR_URL";

pub const PRICE_FIELDS: &[&str] = &["price", "trade", "close", "last"];
pub const VOLUME_FIELDS: &[&str] = &["vol", "volume", "traded_volume", "amount"];
pub const PRE_CLOSE_FIELDS: &[&str] = &["preClose", "pre_close", "prevClose", "prev_close", "yclose"];
pub const INSTRUMENT_FIELDS: &[&str] = &["stockCode", "code", "symbol"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TradingPhase {
    Trading,
    Rest,
    NonTrading,
}

impl TradingPhase {
    pub fn parse_str(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "trading" => Some(Self::Trading),
            "rest" => Some(Self::Rest),
            "non_trading" | "nontrading" => Some(Self::NonTrading),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StreamStatusSnapshot {
    pub state: ConnectionState,
    pub instrument_id: String,
    pub effective_date: Option<NaiveDate>,
    pub trading_phase: Option<TradingPhase>,
    pub trading_finished: bool,
    pub has_data: bool,
    pub tick_count: usize,
    pub rejected_count: usize,
    pub degraded: bool,
    pub reconnect_attempts: u32,
    pub reason: Option<String>,
}

impl StreamStatusSnapshot {
    pub fn idle(instrument_id: String, reason: Option<String>) -> Self {
        Self {
            state: ConnectionState::Idle,
            instrument_id,
            effective_date: None,
            trading_phase: None,
            trading_finished: false,
            has_data: false,
            tick_count: 0,
            rejected_count: 0,
            degraded: false,
            reconnect_attempts: 0,
            reason,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StartTickStreamArgs {
    pub instrument_id: Option<String>,
    pub enabled: Option<bool>,
    pub protocol: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub path: Option<String>,
    pub calendar_url: Option<String>,
    pub reconnect_delay_ms: Option<u64>,
    pub date_recheck_interval_ms: Option<u64>,
    pub exchange_timezone: Option<String>,
    pub effective_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEndpoint {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl FeedEndpoint {
    pub fn url_for(&self, instrument_id: &str, date: NaiveDate) -> Result<Url, AppError> {
        let mut url = Url::parse(&format!(
            "{}://{}:{}{}",
            self.protocol, self.host, self.port, self.path
        ))?;
        url.query_pairs_mut()
            .append_pair("stockCode", instrument_id)
            .append_pair("date", &date.format("%Y-%m-%d").to_string());
        Ok(url)
    }
}

#[derive(Debug, Clone)]
pub struct TickStreamConfig {
    pub instrument_id: String,
    pub enabled: bool,
    pub endpoint: Option<FeedEndpoint>,
    pub calendar_url: Option<String>,
    pub reconnect_delay: Duration,
    pub date_recheck_interval: Duration,
    pub timezone: Tz,
    pub effective_date_override: Option<NaiveDate>,
}

impl TickStreamConfig {
    pub fn feed_url(&self, date: NaiveDate) -> Result<Url, AppError> {
        let endpoint = self.endpoint.as_ref().ok_or_else(|| {
            AppError::Configuration(format!("set {FEED_HOST_ENV} or pass a feed host"))
        })?;
        endpoint.url_for(&self.instrument_id, date)
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

impl StartTickStreamArgs {
    pub fn normalize(self) -> Result<TickStreamConfig, AppError> {
        let instrument_id = non_empty(self.instrument_id)
            .unwrap_or_else(|| DEFAULT_INSTRUMENT_ID.to_string())
            .to_ascii_lowercase();
        if !instrument_id.chars().all(|ch| ch.is_ascii_alphanumeric()) {
            return Err(AppError::InvalidArgument(
                "instrumentId must be non-empty alphanumeric ASCII".to_string(),
            ));
        }

        let protocol = non_empty(self.protocol)
            .or_else(|| env_value(FEED_PROTOCOL_ENV))
            .unwrap_or_else(|| DEFAULT_FEED_PROTOCOL.to_string())
            .to_ascii_lowercase();
        let default_port = match protocol.as_str() {
            "ws" => 80,
            "wss" => 443,
            _ => {
                return Err(AppError::InvalidArgument(format!(
                    "protocol must be ws or wss, got '{protocol}'"
                )))
            }
        };

        let port = match self.port {
            Some(port) => port,
            None => match env_value(FEED_PORT_ENV) {
                Some(raw) => raw.parse::<u16>().map_err(|_| {
                    AppError::InvalidArgument(format!("{FEED_PORT_ENV} must be a port number"))
                })?,
                None => default_port,
            },
        };
        if port == 0 {
            return Err(AppError::InvalidArgument(
                "port must be between 1 and 65535".to_string(),
            ));
        }

        let path = non_empty(self.path)
            .or_else(|| env_value(FEED_PATH_ENV))
            .unwrap_or_else(|| DEFAULT_FEED_PATH.to_string());
        if !path.starts_with('/') {
            return Err(AppError::InvalidArgument(
                "path must start with '/'".to_string(),
            ));
        }

        let endpoint = non_empty(self.host)
            .or_else(|| env_value(FEED_HOST_ENV))
            .map(|host| FeedEndpoint {
                protocol,
                host,
                port,
                path,
            });

        let reconnect_delay_ms = self
            .reconnect_delay_ms
            .unwrap_or(DEFAULT_RECONNECT_DELAY_MS);
        if !(MIN_RECONNECT_DELAY_MS..=MAX_RECONNECT_DELAY_MS).contains(&reconnect_delay_ms) {
            return Err(AppError::InvalidArgument(format!(
                "reconnectDelayMs must be between {MIN_RECONNECT_DELAY_MS} and {MAX_RECONNECT_DELAY_MS}"
            )));
        }

        let date_recheck_interval_ms = self
            .date_recheck_interval_ms
            .unwrap_or(DEFAULT_DATE_RECHECK_INTERVAL_MS);
        if !(MIN_DATE_RECHECK_INTERVAL_MS..=MAX_DATE_RECHECK_INTERVAL_MS)
            .contains(&date_recheck_interval_ms)
        {
            return Err(AppError::InvalidArgument(format!(
                "dateRecheckIntervalMs must be between {MIN_DATE_RECHECK_INTERVAL_MS} and {MAX_DATE_RECHECK_INTERVAL_MS}"
            )));
        }

        let timezone_name = non_empty(self.exchange_timezone)
            .unwrap_or_else(|| DEFAULT_EXCHANGE_TIMEZONE.to_string());
        let timezone = timezone_name.parse::<Tz>().map_err(|_| {
            AppError::InvalidArgument(format!("unknown exchange timezone '{timezone_name}'"))
        })?;

        let effective_date_override = match non_empty(self.effective_date) {
            Some(raw) => Some(crate::market::validator::parse_tick_date(&raw).ok_or_else(
                || AppError::InvalidArgument(format!("effectiveDate '{raw}' is not a valid date")),
            )?),
            None => None,
        };

        Ok(TickStreamConfig {
            instrument_id,
            enabled: self.enabled.unwrap_or(DEFAULT_ENABLED),
            endpoint,
            calendar_url: non_empty(self.calendar_url).or_else(|| env_value(CALENDAR_URL_ENV)),
            reconnect_delay: Duration::from_millis(reconnect_delay_ms),
            date_recheck_interval: Duration::from_millis(date_recheck_interval_ms),
            timezone,
            effective_date_override,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickStreamSession {
    pub running: bool,
    pub instrument_id: String,
    pub enabled: bool,
    pub feed_configured: bool,
    pub reconnect_delay_ms: u64,
    pub date_recheck_interval_ms: u64,
    pub exchange_timezone: String,
}

impl TickStreamSession {
    pub fn from_config(config: &TickStreamConfig) -> Self {
        Self {
            running: true,
            instrument_id: config.instrument_id.clone(),
            enabled: config.enabled,
            feed_configured: config.endpoint.is_some(),
            reconnect_delay_ms: config.reconnect_delay.as_millis() as u64,
            date_recheck_interval_ms: config.date_recheck_interval.as_millis() as u64,
            exchange_timezone: config.timezone.name().to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickStreamStopResult {
    pub stopped: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuoteLevel {
    pub price: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Tick {
    pub instrument_id: String,
    pub date: Option<String>,
    pub time: Option<String>,
    pub price: Option<f64>,
    pub volume: Option<f64>,
    pub pre_close: Option<f64>,
    pub bids: Vec<QuoteLevel>,
    pub asks: Vec<QuoteLevel>,
    pub timestamp: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TickKey {
    pub date: String,
    pub time: String,
    pub instrument_id: String,
}

impl Tick {
    pub fn new(instrument_id: &str, date: &str, time: &str) -> Self {
        Self {
            instrument_id: instrument_id.to_string(),
            date: Some(date.to_string()),
            time: Some(time.to_string()),
            price: None,
            volume: None,
            pre_close: None,
            bids: Vec::new(),
            asks: Vec::new(),
            timestamp: None,
        }
    }

    pub fn with_price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = Some(volume);
        self
    }

    pub fn with_pre_close(mut self, pre_close: f64) -> Self {
        self.pre_close = Some(pre_close);
        self
    }

    pub fn key(&self) -> TickKey {
        TickKey {
            date: self
                .date
                .as_deref()
                .map(normalize_date_text)
                .unwrap_or_default(),
            time: self
                .time
                .as_deref()
                .map(normalize_time_text)
                .unwrap_or_default(),
            instrument_id: self.instrument_id.clone(),
        }
    }

    pub fn from_fields(fields: &TickFields, default_instrument_id: &str) -> Self {
        Self {
            instrument_id: resolve_instrument_id(fields)
                .unwrap_or_else(|| default_instrument_id.to_string()),
            date: field_text(fields, "date"),
            time: field_text(fields, "time"),
            price: resolve_price(fields),
            volume: resolve_volume(fields),
            pre_close: resolve_pre_close(fields),
            bids: resolve_ladder(fields, 'b'),
            asks: resolve_ladder(fields, 'a'),
            timestamp: None,
        }
    }
}

pub fn normalize_date_text(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.contains(['-', '/']) {
        let parts: Vec<&str> = trimmed.split(['-', '/']).map(str::trim).collect();
        if let [year, month, day] = parts.as_slice() {
            return format!("{year:0>4}{month:0>2}{day:0>2}");
        }
    }
    trimmed.to_string()
}

pub fn normalize_time_text(raw: &str) -> String {
    let trimmed = raw.trim();
    let (clock, fraction) = match trimmed.split_once('.') {
        Some((clock, fraction)) => (clock, Some(fraction)),
        None => (trimmed, None),
    };

    let mut normalized = if clock.contains(':') {
        let mut parts: Vec<String> = clock
            .split(':')
            .map(|part| format!("{:0>2}", part.trim()))
            .collect();
        while parts.len() < 3 {
            parts.push("00".to_string());
        }
        parts.concat()
    } else {
        match clock.len() {
            4 => format!("{clock}00"),
            1..=5 => format!("{clock:0>6}"),
            _ => clock.to_string(),
        }
    };

    if let Some(fraction) = fraction {
        normalized.push('.');
        normalized.push_str(fraction);
    }
    normalized
}

/// A scalar JSON value as the feed sends it; numbers frequently arrive as strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WireScalar {
    Number(f64),
    Text(String),
    Flag(bool),
    Other(IgnoredAny),
}

impl WireScalar {
    pub fn as_f64(&self) -> Option<f64> {
        let value = match self {
            Self::Number(value) => *value,
            Self::Text(text) => text.trim().parse::<f64>().ok()?,
            Self::Flag(_) | Self::Other(_) => return None,
        };
        value.is_finite().then_some(value)
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            Self::Flag(flag) => Some(*flag),
            Self::Text(text) if text.trim().eq_ignore_ascii_case("true") => Some(true),
            Self::Text(text) if text.trim().eq_ignore_ascii_case("false") => Some(false),
            other => other.as_f64().map(|flag| flag == 1.0),
        }
    }

    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Text(text) => {
                let trimmed = text.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            Self::Number(value) if value.is_finite() && value.fract() == 0.0 => {
                Some(format!("{value:.0}"))
            }
            Self::Number(value) if value.is_finite() => Some(value.to_string()),
            _ => None,
        }
    }
}

pub type TickFields = HashMap<String, WireScalar>;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum WireTick {
    Fields(TickFields),
    Malformed(IgnoredAny),
}

fn field_text(fields: &TickFields, name: &str) -> Option<String> {
    fields.get(name).and_then(WireScalar::as_text)
}

fn first_number(fields: &TickFields, candidates: &[&str]) -> Option<f64> {
    candidates
        .iter()
        .find_map(|name| fields.get(*name).and_then(WireScalar::as_f64))
}

pub fn resolve_price(fields: &TickFields) -> Option<f64> {
    first_number(fields, PRICE_FIELDS)
}

pub fn resolve_volume(fields: &TickFields) -> Option<f64> {
    first_number(fields, VOLUME_FIELDS)
}

pub fn resolve_pre_close(fields: &TickFields) -> Option<f64> {
    first_number(fields, PRE_CLOSE_FIELDS)
}

pub fn resolve_instrument_id(fields: &TickFields) -> Option<String> {
    INSTRUMENT_FIELDS
        .iter()
        .find_map(|name| field_text(fields, name))
}

/// Reads `{side}{1..5}_p` / `{side}{1..5}_v`, stopping at the first missing level.
pub fn resolve_ladder(fields: &TickFields, side: char) -> Vec<QuoteLevel> {
    let mut levels = Vec::new();
    for level in 1..=QUOTE_LADDER_DEPTH {
        let price = fields
            .get(&format!("{side}{level}_p"))
            .and_then(WireScalar::as_f64);
        let volume = fields
            .get(&format!("{side}{level}_v"))
            .and_then(WireScalar::as_f64);
        match (price, volume) {
            (Some(price), volume) => levels.push(QuoteLevel {
                price,
                volume: volume.unwrap_or(0.0),
            }),
            (None, _) => break,
        }
    }
    levels
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedMessageWire {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub history_ticks: Option<Vec<WireTick>>,
    #[serde(default)]
    pub latest_ticks: Option<Vec<WireTick>>,
    #[serde(default)]
    pub trading_finished: Option<WireScalar>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedMessage {
    pub phase: Option<TradingPhase>,
    pub history_ticks: Vec<Tick>,
    pub latest_ticks: Vec<Tick>,
    pub trading_finished: bool,
    pub malformed_ticks: usize,
}

impl FeedMessage {
    pub fn from_wire(wire: FeedMessageWire, default_instrument_id: &str) -> Self {
        let mut malformed_ticks = 0;
        let mut convert = |batch: Option<Vec<WireTick>>| -> Vec<Tick> {
            batch
                .unwrap_or_default()
                .into_iter()
                .filter_map(|entry| match entry {
                    WireTick::Fields(fields) => {
                        Some(Tick::from_fields(&fields, default_instrument_id))
                    }
                    WireTick::Malformed(_) => {
                        malformed_ticks += 1;
                        None
                    }
                })
                .collect()
        };
        let history_ticks = convert(wire.history_ticks);
        let latest_ticks = convert(wire.latest_ticks);

        Self {
            phase: wire.status.as_deref().and_then(TradingPhase::parse_str),
            history_ticks,
            latest_ticks,
            trading_finished: wire
                .trading_finished
                .as_ref()
                .and_then(WireScalar::as_flag)
                .unwrap_or(false),
            malformed_ticks,
        }
    }
}

pub fn parse_feed_payload(
    payload: &mut [u8],
    default_instrument_id: &str,
) -> Result<FeedMessage, AppError> {
    let wire: FeedMessageWire = simd_json::serde::from_slice(payload)?;
    Ok(FeedMessage::from_wire(wire, default_instrument_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_feed_payload_with_field_aliases() {
        let mut payload = br#"{
            "status": "trading",
            "historyTicks": [
                {"date": "20240115", "time": "093000", "trade": "10.5", "volume": 100, "preClose": 10.1}
            ],
            "latestTicks": [
                {"date": "2024-01-15", "time": "09:30:03", "last": 10.6, "traded_volume": "150",
                 "a1_p": 10.61, "a1_v": 300, "b1_p": "10.59", "b1_v": 200, "b2_p": 10.58}
            ],
            "tradingFinished": false
        }"#
        .to_vec();

        let message = parse_feed_payload(&mut payload, "600519").expect("payload should parse");

        assert_eq!(message.phase, Some(TradingPhase::Trading));
        assert!(!message.trading_finished);
        assert_eq!(message.history_ticks.len(), 1);
        let history = &message.history_ticks[0];
        assert_eq!(history.instrument_id, "600519");
        assert_eq!(history.price, Some(10.5));
        assert_eq!(history.volume, Some(100.0));
        assert_eq!(history.pre_close, Some(10.1));

        let latest = &message.latest_ticks[0];
        assert_eq!(latest.price, Some(10.6));
        assert_eq!(latest.volume, Some(150.0));
        assert_eq!(latest.asks, vec![QuoteLevel { price: 10.61, volume: 300.0 }]);
        assert_eq!(latest.bids.len(), 2);
        assert_eq!(latest.bids[1].volume, 0.0);
    }

    #[test]
    fn trading_finished_accepts_numeric_and_text_flags() {
        for (raw, expected) in [
            ("true", true),
            ("1", true),
            ("0", false),
            (r#""true""#, true),
            (r#""1""#, true),
            (r#""no""#, false),
            ("null", false),
        ] {
            let mut payload =
                format!(r#"{{"status": "closed", "tradingFinished": {raw}}}"#).into_bytes();

            let message = parse_feed_payload(&mut payload, "600519")
                .unwrap_or_else(|error| panic!("{raw} should decode: {error}"));

            assert_eq!(message.trading_finished, expected, "tradingFinished = {raw}");
        }
    }

    #[test]
    fn price_alias_order_prefers_price_over_close() {
        let mut fields = TickFields::new();
        fields.insert("close".to_string(), WireScalar::Number(9.0));
        fields.insert("price".to_string(), WireScalar::Text("11.25".to_string()));
        assert_eq!(resolve_price(&fields), Some(11.25));

        fields.insert("price".to_string(), WireScalar::Text("n/a".to_string()));
        assert_eq!(resolve_price(&fields), Some(9.0));
    }

    #[test]
    fn drops_non_object_ticks_without_failing_the_message() {
        let mut payload =
            br#"{"latestTicks": [42, null, {"date": 20240115, "time": 93000, "price": 10}]}"#
                .to_vec();
        let message = parse_feed_payload(&mut payload, "000001").expect("payload should parse");

        assert_eq!(message.malformed_ticks, 2);
        assert_eq!(message.latest_ticks.len(), 1);
        let tick = &message.latest_ticks[0];
        assert_eq!(tick.date.as_deref(), Some("20240115"));
        assert_eq!(tick.time.as_deref(), Some("93000"));
        assert_eq!(tick.key().time, "093000");
        assert_eq!(message.phase, None);
    }

    #[test]
    fn rejects_payload_that_is_not_json() {
        let mut payload = b"not json".to_vec();
        assert!(parse_feed_payload(&mut payload, "600519").is_err());
    }

    #[test]
    fn normalizes_key_text_for_ordering() {
        assert_eq!(normalize_date_text("2024-01-05"), "20240105");
        assert_eq!(normalize_date_text("2024/1/5"), "20240105");
        assert_eq!(normalize_date_text("20240105"), "20240105");
        assert_eq!(normalize_time_text("09:30:00"), "093000");
        assert_eq!(normalize_time_text("9:30"), "093000");
        assert_eq!(normalize_time_text("93000"), "093000");
        assert_eq!(normalize_time_text("0930"), "093000");
        assert_eq!(normalize_time_text("13:00:01.250"), "130001.250");
    }

    #[test]
    fn builds_feed_url_with_query_params() {
        let endpoint = FeedEndpoint {
            protocol: "ws".to_string(),
            host: "quotes.local".to_string(),
            port: 8080,
            path: "/ws/stock".to_string(),
        };
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).expect("valid date");
        let url = endpoint.url_for("600519", date).expect("url should build");

        assert_eq!(
            url.as_str(),
            "ws://quotes.local:8080/ws/stock?stockCode=600519&date=2024-01-15"
        );
    }

    #[test]
    fn normalizes_start_args_defaults() {
        let config = StartTickStreamArgs {
            host: Some("127.0.0.1".to_string()),
            ..Default::default()
        }
        .normalize()
        .expect("defaults should be valid");

        assert_eq!(config.instrument_id, DEFAULT_INSTRUMENT_ID);
        assert!(config.enabled);
        assert_eq!(
            config.reconnect_delay,
            Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS)
        );
        assert_eq!(
            config.date_recheck_interval,
            Duration::from_millis(DEFAULT_DATE_RECHECK_INTERVAL_MS)
        );
        assert_eq!(config.timezone, chrono_tz::Asia::Shanghai);
        let endpoint = config.endpoint.expect("host was given");
        assert_eq!(endpoint.port, 80);
        assert_eq!(endpoint.path, DEFAULT_FEED_PATH);
    }

    #[test]
    fn wss_protocol_defaults_to_tls_port() {
        let config = StartTickStreamArgs {
            protocol: Some("WSS".to_string()),
            host: Some("feed.example.com".to_string()),
            port: None,
            ..Default::default()
        }
        .normalize()
        .expect("wss should be valid");

        let endpoint = config.endpoint.expect("host was given");
        assert_eq!(endpoint.protocol, "wss");
        assert_eq!(endpoint.port, 443);
    }

    #[test]
    fn validates_reconnect_delay_range() {
        let result = StartTickStreamArgs {
            reconnect_delay_ms: Some(10),
            ..Default::default()
        }
        .normalize();

        assert!(result.is_err());
    }

    #[test]
    fn validates_date_recheck_interval_range() {
        let result = StartTickStreamArgs {
            date_recheck_interval_ms: Some(10_000_000),
            ..Default::default()
        }
        .normalize();

        assert!(result.is_err());
    }

    #[test]
    fn rejects_unknown_protocol_and_timezone() {
        let protocol = StartTickStreamArgs {
            protocol: Some("http".to_string()),
            ..Default::default()
        }
        .normalize();
        assert!(protocol.is_err());

        let timezone = StartTickStreamArgs {
            exchange_timezone: Some("Mars/Olympus".to_string()),
            ..Default::default()
        }
        .normalize();
        assert!(timezone.is_err());
    }

    #[test]
    fn parses_effective_date_override() {
        let config = StartTickStreamArgs {
            effective_date: Some("2024-01-12".to_string()),
            ..Default::default()
        }
        .normalize()
        .expect("override should be valid");

        assert_eq!(
            config.effective_date_override,
            NaiveDate::from_ymd_opt(2024, 1, 12)
        );
    }
}
