use crate::market::calendar::SessionTemplate;
use crate::market::types::{normalize_date_text, normalize_time_text, Tick};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    MissingDatetime,
    InvalidDatetime,
    OutOfSession,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingDatetime => "missing_datetime",
            Self::InvalidDatetime => "invalid_datetime",
            Self::OutOfSession => "out_of_session",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RejectedTick {
    pub tick: Tick,
    pub reason: RejectReason,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationOutcome {
    pub valid: Vec<Tick>,
    pub rejected: Vec<RejectedTick>,
    /// Set when every tick of a non-empty batch was rejected and `valid`
    /// carries the unfiltered batch instead.
    pub degraded: bool,
}

pub fn parse_tick_date(raw: &str) -> Option<NaiveDate> {
    let normalized = normalize_date_text(raw);
    if normalized.len() != 8 || !normalized.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    let year = normalized[0..4].parse::<i32>().ok()?;
    let month = normalized[4..6].parse::<u32>().ok()?;
    let day = normalized[6..8].parse::<u32>().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

pub fn parse_tick_time(raw: &str) -> Option<NaiveTime> {
    let normalized = normalize_time_text(raw);
    let (clock, fraction) = match normalized.split_once('.') {
        Some((clock, fraction)) => (clock, fraction),
        None => (normalized.as_str(), ""),
    };
    if clock.len() != 6 || !clock.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    if !fraction.bytes().all(|byte| byte.is_ascii_digit()) || fraction.len() > 9 {
        return None;
    }

    let hour = clock[0..2].parse::<u32>().ok()?;
    let minute = clock[2..4].parse::<u32>().ok()?;
    let second = clock[4..6].parse::<u32>().ok()?;
    let nanos = if fraction.is_empty() {
        0
    } else {
        format!("{fraction:0<9}").parse::<u32>().ok()?
    };
    NaiveTime::from_hms_nano_opt(hour, minute, second, nanos)
}

pub fn resolve_timestamp(
    tick: &Tick,
    template: &SessionTemplate,
) -> Result<NaiveDateTime, RejectReason> {
    let (Some(date), Some(time)) = (tick.date.as_deref(), tick.time.as_deref()) else {
        return Err(RejectReason::MissingDatetime);
    };
    if date.trim().is_empty() || time.trim().is_empty() {
        return Err(RejectReason::MissingDatetime);
    }

    let (Some(date), Some(time)) = (parse_tick_date(date), parse_tick_time(time)) else {
        return Err(RejectReason::InvalidDatetime);
    };

    if template.segment_kind_at(time).is_none() {
        return Err(RejectReason::OutOfSession);
    }

    Ok(date.and_time(time))
}

pub fn filter_valid(ticks: Vec<Tick>, template: &SessionTemplate) -> ValidationOutcome {
    if ticks.is_empty() {
        return ValidationOutcome::default();
    }

    let original = ticks.clone();
    let mut outcome = ValidationOutcome::default();
    for mut tick in ticks {
        match resolve_timestamp(&tick, template) {
            Ok(timestamp) => {
                tick.timestamp = Some(timestamp);
                outcome.valid.push(tick);
            }
            Err(reason) => {
                debug!(
                    instrument = %tick.instrument_id,
                    date = ?tick.date,
                    time = ?tick.time,
                    reason = reason.as_str(),
                    "dropping tick"
                );
                outcome.rejected.push(RejectedTick { tick, reason });
            }
        }
    }

    if outcome.valid.is_empty() {
        warn!(
            rejected = outcome.rejected.len(),
            "every tick in batch failed validation; keeping unfiltered batch"
        );
        outcome.valid = original;
        outcome.degraded = true;
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> SessionTemplate {
        SessionTemplate::default()
    }

    #[test]
    fn parses_both_date_layouts() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 15);
        assert_eq!(parse_tick_date("20240115"), expected);
        assert_eq!(parse_tick_date("2024-01-15"), expected);
        assert_eq!(parse_tick_date(" 2024/1/15 "), expected);
        assert_eq!(parse_tick_date("2024-02-30"), None);
        assert_eq!(parse_tick_date("yesterday"), None);
    }

    #[test]
    fn parses_both_time_layouts() {
        let expected = NaiveTime::from_hms_opt(9, 30, 5);
        assert_eq!(parse_tick_time("093005"), expected);
        assert_eq!(parse_tick_time("09:30:05"), expected);
        assert_eq!(parse_tick_time("93005"), expected);
        assert_eq!(
            parse_tick_time("09:30:05.5"),
            NaiveTime::from_hms_milli_opt(9, 30, 5, 500)
        );
        assert_eq!(parse_tick_time("25:00:00"), None);
        assert_eq!(parse_tick_time("ab:cd:ef"), None);
    }

    #[test]
    fn first_matching_rule_wins() {
        let missing = Tick {
            time: None,
            ..Tick::new("600519", "not-a-date", "09:30:00")
        };
        assert_eq!(
            resolve_timestamp(&missing, &template()),
            Err(RejectReason::MissingDatetime)
        );

        let invalid = Tick::new("600519", "2024-13-01", "12:00:00");
        assert_eq!(
            resolve_timestamp(&invalid, &template()),
            Err(RejectReason::InvalidDatetime)
        );

        let lunch = Tick::new("600519", "2024-01-15", "12:00:00");
        assert_eq!(
            resolve_timestamp(&lunch, &template()),
            Err(RejectReason::OutOfSession)
        );
    }

    #[test]
    fn annotates_accepted_ticks_and_reports_rejections() {
        let ticks = vec![
            Tick::new("600519", "20240115", "093000").with_price(10.0),
            Tick::new("600519", "20240115", "120000").with_price(10.1),
            Tick::new("600519", "20240115", "15:00:00").with_price(10.2),
        ];

        let outcome = filter_valid(ticks, &template());

        assert!(!outcome.degraded);
        assert_eq!(outcome.valid.len(), 2);
        assert_eq!(
            outcome.valid[0].timestamp,
            NaiveDate::from_ymd_opt(2024, 1, 15).and_then(|d| d.and_hms_opt(9, 30, 0))
        );
        assert_eq!(outcome.rejected.len(), 1);
        assert_eq!(outcome.rejected[0].reason, RejectReason::OutOfSession);
    }

    #[test]
    fn falls_back_to_unfiltered_batch_when_everything_is_rejected() {
        let ticks: Vec<Tick> = (0..10)
            .map(|index| Tick {
                time: None,
                ..Tick::new("600519", "2024-01-15", "").with_price(10.0 + index as f64)
            })
            .collect();

        let outcome = filter_valid(ticks.clone(), &template());

        assert!(outcome.degraded);
        assert_eq!(outcome.valid, ticks);
        assert_eq!(outcome.rejected.len(), 10);
        assert!(outcome
            .rejected
            .iter()
            .all(|rejected| rejected.reason == RejectReason::MissingDatetime));
    }

    #[test]
    fn empty_batch_is_not_degraded() {
        let outcome = filter_valid(Vec::new(), &template());
        assert!(outcome.valid.is_empty());
        assert!(!outcome.degraded);
    }
}
