use crate::market::calendar::{SegmentKind, SessionCalendar, SessionSegment};
use crate::market::types::Tick;
use crate::market::validator::{parse_tick_date, parse_tick_time};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

pub const RANGE_PADDING_RATIO: f64 = 0.11;
pub const MIN_RANGE_PADDING_SECS: i64 = 200;
pub const PRICE_SCALE: f64 = 100.0;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionWindow {
    pub kind: SegmentKind,
    pub real_start: NaiveDateTime,
    pub real_end: NaiveDateTime,
    pub virtual_start: i64,
    pub virtual_end: i64,
}

impl SessionWindow {
    pub fn contains(&self, timestamp: NaiveDateTime) -> bool {
        timestamp >= self.real_start && timestamp <= self.real_end
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimelinePoint {
    pub virtual_time: i64,
    pub price: i64,
    pub volume: f64,
    pub timestamp: NaiveDateTime,
    pub segment: Option<SegmentKind>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimeLabel {
    pub virtual_time: i64,
    pub short: String,
    pub full: String,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct VisibleRange {
    pub from: i64,
    pub to: i64,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualTimeline {
    pub points: Vec<TimelinePoint>,
    pub labels: Vec<TimeLabel>,
    pub session_windows: Vec<SessionWindow>,
    pub virtual_range: Option<VisibleRange>,
}

impl VirtualTimeline {
    pub fn label_at(&self, virtual_time: i64) -> Option<&TimeLabel> {
        self.labels
            .binary_search_by_key(&virtual_time, |label| label.virtual_time)
            .ok()
            .map(|index| &self.labels[index])
    }
}

/// Each segment occupies its inclusive second count, so 11:30:00 and 13:00:00
/// land on neighbouring virtual seconds. No segments means identity mapping.
#[derive(Debug, Clone, Default)]
pub struct VirtualTimeIndex {
    windows: Vec<SessionWindow>,
}

impl VirtualTimeIndex {
    pub fn new(segments: &[SessionSegment]) -> Self {
        let mut ordered = segments.to_vec();
        ordered.sort_by_key(|segment| segment.start);

        let Some(first) = ordered.first() else {
            return Self::default();
        };
        let mut cursor = epoch_seconds(first.start);
        let windows = ordered
            .iter()
            .map(|segment| {
                let virtual_start = cursor;
                let virtual_end = virtual_start + segment.duration_secs();
                cursor = virtual_end + 1;
                SessionWindow {
                    kind: segment.kind,
                    real_start: segment.start,
                    real_end: segment.end,
                    virtual_start,
                    virtual_end,
                }
            })
            .collect();

        Self { windows }
    }

    pub fn windows(&self) -> &[SessionWindow] {
        &self.windows
    }

    pub fn window_of(&self, timestamp: NaiveDateTime) -> Option<&SessionWindow> {
        self.windows.iter().find(|window| window.contains(timestamp))
    }

    pub fn map(&self, timestamp: NaiveDateTime) -> i64 {
        let (Some(first), Some(last)) = (self.windows.first(), self.windows.last()) else {
            return epoch_seconds(timestamp);
        };

        if timestamp < first.real_start {
            return first.virtual_start - (first.real_start - timestamp).num_seconds();
        }

        let mut previous_end = first.virtual_start;
        for window in &self.windows {
            if window.contains(timestamp) {
                return window.virtual_start + (timestamp - window.real_start).num_seconds();
            }
            if timestamp < window.real_start {
                // between two segments: pin to the end of the earlier one
                return previous_end;
            }
            previous_end = window.virtual_end;
        }

        last.virtual_end + (timestamp - last.real_end).num_seconds()
    }
}

fn epoch_seconds(timestamp: NaiveDateTime) -> i64 {
    timestamp.and_utc().timestamp()
}

fn tick_timestamp(tick: &Tick) -> Option<NaiveDateTime> {
    if let Some(timestamp) = tick.timestamp {
        return Some(timestamp);
    }
    let date = parse_tick_date(tick.date.as_deref()?)?;
    let time = parse_tick_time(tick.time.as_deref()?)?;
    Some(date.and_time(time))
}

fn usable_price(price: Option<f64>) -> Option<f64> {
    price.filter(|price| price.is_finite() && *price > 0.0)
}

pub fn price_units(price: f64) -> i64 {
    (price * PRICE_SCALE).round() as i64
}

pub fn incremental_volume(cumulative: Option<f64>, previous_cumulative: Option<f64>) -> f64 {
    match (cumulative, previous_cumulative) {
        (Some(current), Some(previous)) if current >= previous => current - previous,
        (Some(current), _) => current.max(0.0),
        (None, _) => 0.0,
    }
}

fn range_padding(span: i64) -> i64 {
    ((span as f64 * RANGE_PADDING_RATIO).round() as i64).max(MIN_RANGE_PADDING_SECS)
}

pub fn build_virtual_timeline(
    ticks: &[Tick],
    segments: &[SessionSegment],
    pre_close: Option<f64>,
) -> VirtualTimeline {
    let index = VirtualTimeIndex::new(segments);
    let pre_close =
        usable_price(pre_close).or_else(|| ticks.iter().find_map(|tick| usable_price(tick.pre_close)));

    let placed: Vec<(&Tick, NaiveDateTime)> = ticks
        .iter()
        .filter_map(|tick| match tick_timestamp(tick) {
            Some(timestamp) => Some((tick, timestamp)),
            None => {
                debug!(date = ?tick.date, time = ?tick.time, "tick has no usable timestamp for the timeline");
                None
            }
        })
        .collect();

    let auction = index
        .windows()
        .iter()
        .find(|window| window.kind == SegmentKind::PreOpenAuction)
        .copied();
    let cleared_price = auction.and_then(|auction| {
        placed
            .iter()
            .filter(|(_, timestamp)| *timestamp > auction.real_end)
            .find_map(|(tick, _)| usable_price(tick.price))
    });

    let mut points = Vec::with_capacity(placed.len());
    let mut last_price: Option<f64> = None;
    let mut previous_cumulative: Option<f64> = None;
    for (tick, timestamp) in placed {
        let volume = incremental_volume(tick.volume, previous_cumulative);
        if tick.volume.is_some() {
            previous_cumulative = tick.volume;
        }

        let in_auction = auction.is_some_and(|auction| auction.contains(timestamp));
        let price = if in_auction {
            cleared_price.or(pre_close).or_else(|| usable_price(tick.price))
        } else {
            usable_price(tick.price).or(last_price).or(pre_close)
        };
        let Some(price) = price else {
            continue;
        };
        last_price = Some(price);

        points.push(TimelinePoint {
            virtual_time: index.map(timestamp),
            price: price_units(price),
            volume,
            timestamp,
            segment: index.window_of(timestamp).map(|window| window.kind),
        });
    }

    let labels: Vec<TimeLabel> = points
        .iter()
        .map(|point| {
            (
                point.virtual_time,
                TimeLabel {
                    virtual_time: point.virtual_time,
                    short: point.timestamp.format("%H:%M").to_string(),
                    full: point.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
                },
            )
        })
        .collect::<BTreeMap<i64, TimeLabel>>()
        .into_values()
        .collect();

    let virtual_range = match (index.windows().first(), index.windows().last()) {
        (Some(first), Some(last)) => {
            let end = points
                .last()
                .map(|point| point.virtual_time.max(last.virtual_end))
                .unwrap_or(last.virtual_end);
            let span = end - first.virtual_start;
            Some(VisibleRange {
                from: first.virtual_start,
                to: end + range_padding(span),
            })
        }
        _ => match (points.first(), points.last()) {
            (Some(first), Some(last)) => {
                let span = last.virtual_time - first.virtual_time;
                Some(VisibleRange {
                    from: first.virtual_time,
                    to: last.virtual_time + range_padding(span),
                })
            }
            _ => None,
        },
    };

    VirtualTimeline {
        points,
        labels,
        session_windows: index.windows().to_vec(),
        virtual_range,
    }
}

pub fn timeline_for_reference_date(
    ticks: &[Tick],
    reference_date: &str,
    calendar: &SessionCalendar,
    pre_close: Option<f64>,
) -> VirtualTimeline {
    match parse_tick_date(reference_date) {
        Some(date) => build_virtual_timeline(ticks, &calendar.session_segments(date), pre_close),
        None => {
            warn!(reference_date, "unparsable reference date, using ungapped time axis");
            build_virtual_timeline(ticks, &[], pre_close)
        }
    }
}
