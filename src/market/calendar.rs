use crate::error::AppError;
use crate::market::feed::fetch_trading_calendar;
use crate::market::persistence::{load_trading_year, save_trading_year};
use crate::market::types::WireScalar;
use crate::market::validator::parse_tick_date;
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Timelike};
use parking_lot::{Mutex, RwLock};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

pub const EFFECTIVE_DATE_CUTOFF_HOUR: u32 = 9;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TradingDayRecord {
    pub date: NaiveDate,
    pub is_trading_day: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradingDayWire {
    pub trade_date: WireScalar,
    pub is_trading_day: WireScalar,
}

impl TryFrom<TradingDayWire> for TradingDayRecord {
    type Error = AppError;

    fn try_from(value: TradingDayWire) -> Result<Self, Self::Error> {
        let raw_date = value.trade_date.as_text().ok_or_else(|| {
            AppError::InvalidArgument("trading calendar entry has no tradeDate".to_string())
        })?;
        let date = parse_tick_date(&raw_date).ok_or_else(|| {
            AppError::InvalidArgument(format!("tradeDate '{raw_date}' is not a valid date"))
        })?;
        let is_trading_day = value.is_trading_day.as_flag().unwrap_or(false);

        Ok(Self {
            date,
            is_trading_day,
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveDate {
    pub effective_date: NaiveDate,
    pub is_today_trading_day: bool,
    pub previous_trading_date: Option<NaiveDate>,
    pub today: NaiveDate,
}

impl EffectiveDate {
    pub fn is_settled(&self) -> bool {
        self.is_today_trading_day && self.effective_date == self.today
    }
}

pub fn resolve_effective_date(trading_days: &[TradingDayRecord], now: NaiveDateTime) -> EffectiveDate {
    let today = now.date();
    let mut trading_dates: Vec<NaiveDate> = trading_days
        .iter()
        .filter(|record| record.is_trading_day)
        .map(|record| record.date)
        .collect();
    trading_dates.sort_unstable();
    trading_dates.dedup();

    let is_today_trading_day = trading_dates.binary_search(&today).is_ok();
    let previous_trading_date = trading_dates
        .iter()
        .rev()
        .find(|date| **date < today)
        .copied();

    let effective_date = if !is_today_trading_day || now.hour() < EFFECTIVE_DATE_CUTOFF_HOUR {
        previous_trading_date.unwrap_or(today)
    } else {
        today
    };

    EffectiveDate {
        effective_date,
        is_today_trading_day,
        previous_trading_date,
        today,
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    PreOpenAuction,
    MorningContinuous,
    AfternoonContinuous,
    ClosingAuction,
}

/// A same-day window in seconds since local midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentRule {
    pub kind: SegmentKind,
    pub open_ssm: u32,
    pub close_ssm: u32,
}

const fn ssm(hour: u32, minute: u32) -> u32 {
    hour * 3_600 + minute * 60
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTemplate {
    rules: Vec<SegmentRule>,
}

impl Default for SessionTemplate {
    fn default() -> Self {
        Self {
            rules: vec![
                SegmentRule {
                    kind: SegmentKind::PreOpenAuction,
                    open_ssm: ssm(9, 15),
                    close_ssm: ssm(9, 25),
                },
                SegmentRule {
                    kind: SegmentKind::MorningContinuous,
                    open_ssm: ssm(9, 30),
                    close_ssm: ssm(11, 30),
                },
                SegmentRule {
                    kind: SegmentKind::AfternoonContinuous,
                    open_ssm: ssm(13, 0),
                    close_ssm: ssm(14, 57),
                },
                SegmentRule {
                    kind: SegmentKind::ClosingAuction,
                    open_ssm: ssm(14, 57),
                    close_ssm: ssm(15, 0),
                },
            ],
        }
    }
}

impl SessionTemplate {
    // A close that coincides with the next open belongs to the next segment.
    fn closes_into_next(&self, index: usize) -> bool {
        match (self.rules.get(index), self.rules.get(index + 1)) {
            (Some(rule), Some(next)) => rule.close_ssm == next.open_ssm,
            _ => false,
        }
    }

    pub fn segment_kind_at(&self, time: NaiveTime) -> Option<SegmentKind> {
        let seconds = time.num_seconds_from_midnight();
        let exact_second = time.nanosecond() == 0;
        self.rules
            .iter()
            .enumerate()
            .find(|(index, rule)| {
                let close_included = exact_second && !self.closes_into_next(*index);
                seconds >= rule.open_ssm
                    && (seconds < rule.close_ssm || (seconds == rule.close_ssm && close_included))
            })
            .map(|(_, rule)| rule.kind)
    }

    pub fn segments_on(&self, date: NaiveDate) -> Vec<SessionSegment> {
        let midnight = date.and_time(NaiveTime::MIN);
        self.rules
            .iter()
            .enumerate()
            .map(|(index, rule)| {
                let mut close_ssm = rule.close_ssm;
                if self.closes_into_next(index) && close_ssm > rule.open_ssm {
                    close_ssm -= 1;
                }
                SessionSegment {
                    kind: rule.kind,
                    start: midnight + TimeDelta::seconds(i64::from(rule.open_ssm)),
                    end: midnight + TimeDelta::seconds(i64::from(close_ssm)),
                }
            })
            .collect()
    }
}

/// `end` is the last second inside the segment.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSegment {
    pub kind: SegmentKind,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl SessionSegment {
    pub fn duration_secs(&self) -> i64 {
        (self.end - self.start).num_seconds().max(0)
    }
}

#[derive(Debug, Default)]
pub struct SessionCalendar {
    template: SessionTemplate,
    years: RwLock<HashMap<i32, Arc<[TradingDayRecord]>>>,
    segments: Mutex<HashMap<NaiveDate, Arc<[SessionSegment]>>>,
}

impl SessionCalendar {
    pub fn new(template: SessionTemplate) -> Self {
        Self {
            template,
            years: RwLock::new(HashMap::new()),
            segments: Mutex::new(HashMap::new()),
        }
    }

    pub fn template(&self) -> &SessionTemplate {
        &self.template
    }

    pub fn cached_year(&self, year: i32) -> Option<Arc<[TradingDayRecord]>> {
        self.years.read().get(&year).cloned()
    }

    /// Returns the cached year or runs `load`. Empty or failed loads are not
    /// cached so the next recheck retries them.
    pub async fn trading_year_or_load<F, Fut>(&self, year: i32, load: F) -> Arc<[TradingDayRecord]>
    where
        F: FnOnce(i32) -> Fut,
        Fut: Future<Output = Result<Vec<TradingDayRecord>, AppError>>,
    {
        if let Some(cached) = self.cached_year(year) {
            return cached;
        }

        match load(year).await {
            Ok(records) if records.is_empty() => {
                debug!(year, "trading calendar source returned no days");
                Arc::from(records)
            }
            Ok(records) => {
                let records: Arc<[TradingDayRecord]> = Arc::from(records);
                self.years.write().insert(year, Arc::clone(&records));
                records
            }
            Err(error) => {
                warn!(year, %error, "failed to load trading calendar");
                Arc::from(Vec::new())
            }
        }
    }

    pub fn session_segments(&self, date: NaiveDate) -> Arc<[SessionSegment]> {
        let mut cache = self.segments.lock();
        Arc::clone(
            cache
                .entry(date)
                .or_insert_with(|| Arc::from(self.template.segments_on(date))),
        )
    }

    pub async fn resolve_for(&self, now: NaiveDateTime, loader: &CalendarLoader) -> EffectiveDate {
        let mut records = Vec::new();
        for year in [now.year() - 1, now.year()] {
            let loaded = self
                .trading_year_or_load(year, |year| loader.load_year(year))
                .await;
            records.extend(loaded.iter().copied());
        }
        resolve_effective_date(&records, now)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CalendarLoader {
    client: Client,
    calendar_url: Option<String>,
    pool: Option<SqlitePool>,
}

impl CalendarLoader {
    pub fn new(client: Client, calendar_url: Option<String>, pool: Option<SqlitePool>) -> Self {
        Self {
            client,
            calendar_url,
            pool,
        }
    }

    pub async fn load_year(&self, year: i32) -> Result<Vec<TradingDayRecord>, AppError> {
        if let Some(pool) = &self.pool {
            let stored = load_trading_year(pool, year).await?;
            if !stored.is_empty() {
                return Ok(stored);
            }
        }

        let Some(calendar_url) = self.calendar_url.as_deref() else {
            return Ok(Vec::new());
        };
        let fetched = fetch_trading_calendar(&self.client, calendar_url, year).await?;

        if let Some(pool) = &self.pool {
            if !fetched.is_empty() {
                save_trading_year(pool, year, &fetched).await?;
            }
        }
        Ok(fetched)
    }
}
