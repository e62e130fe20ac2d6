use crate::market::calendar::{CalendarLoader, EffectiveDate, SessionCalendar, SessionTemplate};
use crate::market::connection::{
    ConnectionAction, ConnectionEvent, ConnectionState, StreamConnection, Transition,
};
use crate::market::feed::{connect_tick_stream, FeedSocket};
use crate::market::merger::merge;
use crate::market::timeline::{timeline_for_reference_date, VirtualTimeline};
use crate::market::types::{
    parse_feed_payload, FeedMessage, StreamStatusSnapshot, Tick, TickStreamConfig, TradingPhase,
};
use crate::market::validator::filter_valid;
use crate::market::{FeedEmitter, FeedEvent};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;
use futures_util::StreamExt;
use serde::Serialize;
use std::collections::VecDeque;
use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, RwLock};
use tokio::time::{MissedTickBehavior, Sleep};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const STATUS_ERROR_THROTTLE_MS: u64 = 500;
const SOCKET_CLOSE_TIMEOUT_MS: u64 = 1_000;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamState {
    pub history_ticks: Vec<Tick>,
    pub latest_ticks: Vec<Tick>,
    pub merged_ticks: Vec<Tick>,
    pub trading_finished: bool,
    pub effective_date: Option<NaiveDate>,
    pub trading_phase: Option<TradingPhase>,
    pub rejected_count: usize,
    pub degraded: bool,
}

impl StreamState {
    pub fn new(effective_date: Option<NaiveDate>) -> Self {
        Self {
            effective_date,
            ..Self::default()
        }
    }

    pub fn reset(&mut self, effective_date: Option<NaiveDate>) {
        *self = Self::new(effective_date);
    }

    pub fn pre_close(&self) -> Option<f64> {
        self.merged_ticks.iter().rev().find_map(|tick| tick.pre_close)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PayloadApplyOutcome {
    pub accepted: usize,
    pub rejected: usize,
    pub degraded: bool,
}

/// Validates both batches of a payload and folds them into `state`.
///
/// A non-empty history batch replaces the stored history; latest ticks
/// accumulate across payloads. `merged_ticks` is rebuilt from both.
pub fn apply_feed_message(
    state: &mut StreamState,
    message: FeedMessage,
    template: &SessionTemplate,
) -> PayloadApplyOutcome {
    let mut outcome = PayloadApplyOutcome {
        rejected: message.malformed_ticks,
        ..PayloadApplyOutcome::default()
    };

    if let Some(phase) = message.phase {
        state.trading_phase = Some(phase);
    }
    if message.trading_finished {
        state.trading_finished = true;
    }

    if !message.history_ticks.is_empty() {
        let validated = filter_valid(message.history_ticks, template);
        outcome.accepted += validated.valid.len();
        outcome.rejected += validated.rejected.len();
        outcome.degraded |= validated.degraded;
        state.history_ticks = validated.valid;
    }

    if !message.latest_ticks.is_empty() {
        let validated = filter_valid(message.latest_ticks, template);
        outcome.accepted += validated.valid.len();
        outcome.rejected += validated.rejected.len();
        outcome.degraded |= validated.degraded;
        state.latest_ticks = merge(&state.latest_ticks, &validated.valid);
    }

    state.merged_ticks = merge(&state.history_ticks, &state.latest_ticks);
    state.rejected_count += outcome.rejected;
    state.degraded |= outcome.degraded;
    outcome
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChartTimeline {
    pub instrument_id: String,
    pub effective_date: Option<NaiveDate>,
    pub trading_phase: Option<TradingPhase>,
    pub trading_finished: bool,
    pub degraded: bool,
    pub pre_close: Option<f64>,
    pub timeline: VirtualTimeline,
}

pub fn build_chart_timeline(
    state: &StreamState,
    instrument_id: &str,
    calendar: &SessionCalendar,
) -> ChartTimeline {
    let reference_date = state
        .effective_date
        .map(|date| date.format("%Y-%m-%d").to_string())
        .or_else(|| state.merged_ticks.first().and_then(|tick| tick.date.clone()))
        .unwrap_or_default();
    let pre_close = state.pre_close();

    ChartTimeline {
        instrument_id: instrument_id.to_string(),
        effective_date: state.effective_date,
        trading_phase: state.trading_phase,
        trading_finished: state.trading_finished,
        degraded: state.degraded,
        pre_close,
        timeline: timeline_for_reference_date(
            &state.merged_ticks,
            &reference_date,
            calendar,
            pre_close,
        ),
    }
}

pub fn exchange_now(timezone: Tz) -> NaiveDateTime {
    Utc::now().with_timezone(&timezone).naive_local()
}

#[derive(Debug, Default)]
struct StatusPublishThrottle {
    last_state: Option<ConnectionState>,
    last_reason: Option<String>,
    last_emit: Option<Instant>,
}

fn allow_status_publish(
    throttle: &mut StatusPublishThrottle,
    state: ConnectionState,
    reason: &Option<String>,
) -> bool {
    let now = Instant::now();
    let should_throttle = matches!(
        state,
        ConnectionState::Reconnecting | ConnectionState::Disconnected
    );

    if should_throttle
        && throttle.last_state == Some(state)
        && throttle.last_reason == *reason
        && throttle
            .last_emit
            .map(|instant| {
                now.duration_since(instant) < Duration::from_millis(STATUS_ERROR_THROTTLE_MS)
            })
            .unwrap_or(false)
    {
        return false;
    }

    throttle.last_state = Some(state);
    throttle.last_reason = reason.clone();
    throttle.last_emit = Some(now);
    true
}

async fn publish_status(
    status_store: &Arc<RwLock<StreamStatusSnapshot>>,
    emitter: &FeedEmitter,
    snapshot: StreamStatusSnapshot,
) {
    {
        let mut writable = status_store.write().await;
        *writable = snapshot.clone();
    }

    if let Err(error) = emitter.emit(FeedEvent::TickStatus(snapshot)) {
        debug!(%error, "tick status not delivered");
    }
}

async fn next_frame(
    socket: &mut Option<FeedSocket>,
) -> Option<Result<Message, tokio_tungstenite::tungstenite::Error>> {
    match socket {
        Some(socket) => socket.next().await,
        None => pending().await,
    }
}

async fn reconnect_elapsed(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.as_mut().await,
        None => pending().await,
    }
}

async fn enabled_changed(control: &mut Option<watch::Receiver<bool>>) -> Option<bool> {
    let Some(receiver) = control else {
        return pending().await;
    };
    match receiver.changed().await {
        Ok(()) => Some(*receiver.borrow_and_update()),
        Err(_) => None,
    }
}

async fn close_socket(mut socket: FeedSocket) {
    let close = socket.close(None);
    match tokio::time::timeout(Duration::from_millis(SOCKET_CLOSE_TIMEOUT_MS), close).await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => debug!(%error, "tick socket close failed"),
        Err(_) => debug!("tick socket close timed out"),
    }
}

struct StreamDriver<'a> {
    config: &'a TickStreamConfig,
    calendar: &'a SessionCalendar,
    loader: &'a CalendarLoader,
    status_store: &'a Arc<RwLock<StreamStatusSnapshot>>,
    emitter: &'a FeedEmitter,
    cancel_token: &'a CancellationToken,
    enabled_control: Option<watch::Receiver<bool>>,
    connection: StreamConnection,
    stream: StreamState,
    socket: Option<FeedSocket>,
    reconnect_timer: Option<Pin<Box<Sleep>>>,
    pending_events: VecDeque<ConnectionEvent>,
    pending_payload: Option<FeedMessage>,
    effective: Option<EffectiveDate>,
    misconfigured: Option<String>,
    reason: Option<String>,
    throttle: StatusPublishThrottle,
}

impl StreamDriver<'_> {
    fn effective_date(&self) -> NaiveDate {
        self.config
            .effective_date_override
            .or_else(|| self.effective.map(|effective| effective.effective_date))
            .unwrap_or_else(|| exchange_now(self.config.timezone).date())
    }

    fn snapshot(&self) -> StreamStatusSnapshot {
        let state = if self.misconfigured.is_some() {
            ConnectionState::Disconnected
        } else {
            self.connection.state()
        };
        StreamStatusSnapshot {
            state,
            instrument_id: self.config.instrument_id.clone(),
            effective_date: self.stream.effective_date,
            trading_phase: self.stream.trading_phase,
            trading_finished: self.stream.trading_finished,
            has_data: !self.stream.merged_ticks.is_empty(),
            tick_count: self.stream.merged_ticks.len(),
            rejected_count: self.stream.rejected_count,
            degraded: self.stream.degraded,
            reconnect_attempts: self.connection.reconnect_attempts(),
            reason: self.misconfigured.clone().or_else(|| self.reason.clone()),
        }
    }

    async fn publish(&mut self) {
        let snapshot = self.snapshot();
        if !allow_status_publish(&mut self.throttle, snapshot.state, &snapshot.reason) {
            return;
        }
        publish_status(self.status_store, self.emitter, snapshot).await;
    }

    async fn enable(&mut self) {
        let endpoint_ready = self.config.endpoint.is_some();
        self.dispatch(ConnectionEvent::Enable { endpoint_ready }).await;
    }

    async fn set_enabled(&mut self, enabled: bool) {
        if enabled == self.connection.is_enabled() {
            return;
        }

        info!(instrument = %self.config.instrument_id, enabled, "tick stream toggled");
        if enabled {
            self.enable().await;
        } else {
            self.dispatch(ConnectionEvent::Disable).await;
            self.misconfigured = None;
            self.reason = Some("stream disabled".to_string());
            self.publish().await;
        }
    }

    async fn dispatch(&mut self, event: ConnectionEvent) {
        self.pending_events.push_back(event);
        while let Some(event) = self.pending_events.pop_front() {
            if self.cancel_token.is_cancelled() {
                self.pending_events.clear();
                return;
            }

            let transition = self.connection.handle(event);
            if transition.is_noop() {
                debug!(?event, state = transition.from.as_str(), "ignoring connection event");
                continue;
            }
            if transition.changed() {
                info!(
                    instrument = %self.config.instrument_id,
                    from = transition.from.as_str(),
                    to = transition.to.as_str(),
                    "tick stream transition"
                );
                self.reason = Some(self.describe(&transition));
            }

            let publish = transition.changed()
                || transition.actions.iter().any(|action| {
                    matches!(
                        action,
                        ConnectionAction::ApplyPayload | ConnectionAction::ReportMisconfigured
                    )
                });
            for action in transition.actions {
                self.perform(action).await;
            }
            if publish {
                self.publish().await;
            }
        }
    }

    fn describe(&self, transition: &Transition) -> String {
        match transition.to {
            ConnectionState::Idle => "stream reset".to_string(),
            ConnectionState::Connecting => "opening tick stream".to_string(),
            ConnectionState::Connected => "tick stream connected".to_string(),
            ConnectionState::Reconnecting => format!(
                "reconnect attempt {} in {} ms",
                self.connection.reconnect_attempts(),
                self.config.reconnect_delay.as_millis()
            ),
            ConnectionState::Disconnected => {
                if self.connection.is_trading_finished() {
                    "trading finished".to_string()
                } else {
                    "tick stream closed".to_string()
                }
            }
        }
    }

    async fn perform(&mut self, action: ConnectionAction) {
        match action {
            ConnectionAction::OpenSocket => self.open_socket().await,
            ConnectionAction::CloseSocket => {
                if let Some(socket) = self.socket.take() {
                    close_socket(socket).await;
                }
            }
            ConnectionAction::ScheduleReconnect(delay) => {
                info!(
                    instrument = %self.config.instrument_id,
                    delay_ms = delay.as_millis() as u64,
                    attempt = self.connection.reconnect_attempts(),
                    "scheduling tick stream reconnect"
                );
                self.reconnect_timer = Some(Box::pin(tokio::time::sleep(delay)));
            }
            ConnectionAction::CancelReconnect => {
                self.reconnect_timer = None;
            }
            ConnectionAction::ApplyPayload => self.apply_payload(),
            ConnectionAction::ResetStreamState => {
                self.pending_payload = None;
                let effective_date = self.effective_date();
                self.stream.reset(Some(effective_date));
            }
            ConnectionAction::ReportMisconfigured => {
                let error = self
                    .config
                    .feed_url(self.effective_date())
                    .err()
                    .map(|error| error.to_string())
                    .unwrap_or_else(|| "feed endpoint not configured".to_string());
                warn!(instrument = %self.config.instrument_id, %error, "tick stream stays idle");
                self.misconfigured = Some(error);
            }
        }
    }

    async fn open_socket(&mut self) {
        // at most one socket and one timer: drop both before dialing
        self.reconnect_timer = None;
        if let Some(socket) = self.socket.take() {
            close_socket(socket).await;
        }

        let url = match self.config.feed_url(self.effective_date()) {
            Ok(url) => url,
            Err(error) => {
                warn!(%error, "cannot build tick feed url");
                self.pending_events
                    .push_back(ConnectionEvent::Enable { endpoint_ready: false });
                return;
            }
        };
        self.misconfigured = None;

        debug!(%url, "connecting tick stream");
        let connected = tokio::select! {
            _ = self.cancel_token.cancelled() => return,
            connected = connect_tick_stream(&url) => connected,
        };
        match connected {
            Ok(socket) => {
                self.socket = Some(socket);
                self.pending_events.push_back(ConnectionEvent::Opened);
            }
            Err(error) => {
                warn!(%error, "tick stream connect failed");
                self.pending_events.push_back(ConnectionEvent::TransportClosed);
            }
        }
    }

    fn apply_payload(&mut self) {
        let Some(message) = self.pending_payload.take() else {
            return;
        };

        let outcome = apply_feed_message(&mut self.stream, message, self.calendar.template());
        debug!(
            accepted = outcome.accepted,
            rejected = outcome.rejected,
            merged = self.stream.merged_ticks.len(),
            "applied tick payload"
        );
        if outcome.degraded {
            warn!(instrument = %self.config.instrument_id, "payload kept unvalidated ticks");
        }

        let timeline = build_chart_timeline(&self.stream, &self.config.instrument_id, self.calendar);
        if let Err(error) = self.emitter.emit(FeedEvent::TimelineUpdate(timeline)) {
            debug!(%error, "timeline update not delivered");
        }
    }

    async fn handle_frame(
        &mut self,
        frame: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>,
    ) {
        let mut payload = match frame {
            Some(Ok(Message::Text(text))) => text.into_bytes(),
            Some(Ok(Message::Binary(binary))) => binary,
            Some(Ok(Message::Close(_))) | None => {
                self.socket = None;
                self.dispatch(ConnectionEvent::TransportClosed).await;
                return;
            }
            Some(Ok(_)) => return,
            Some(Err(error)) => {
                warn!(%error, "tick stream transport error");
                self.socket = None;
                self.dispatch(ConnectionEvent::TransportClosed).await;
                return;
            }
        };

        match parse_feed_payload(payload.as_mut_slice(), &self.config.instrument_id) {
            Ok(message) => {
                let trading_finished = message.trading_finished;
                self.pending_payload = Some(message);
                self.dispatch(ConnectionEvent::Payload { trading_finished })
                    .await;
                self.pending_payload = None;
            }
            Err(error) => {
                warn!(%error, "dropping undecodable tick payload");
                self.reason = Some(format!("failed to decode tick payload: {error}"));
                self.publish().await;
            }
        }
    }

    /// Re-resolves while the date is unsettled or after a calendar-day
    /// rollover. Returns true when a previously resolved date changed.
    async fn resolve_effective_date(&mut self) -> bool {
        if self.config.effective_date_override.is_some() {
            return false;
        }

        let now = exchange_now(self.config.timezone);
        let needs_resolution = match self.effective {
            Some(effective) => !effective.is_settled() || effective.today != now.date(),
            None => true,
        };
        if !needs_resolution {
            return false;
        }

        let previous = self.effective.map(|effective| effective.effective_date);
        let resolved = self.calendar.resolve_for(now, self.loader).await;
        self.effective = Some(resolved);
        previous.is_some() && previous != Some(resolved.effective_date)
    }

    async fn recheck_effective_date(&mut self) {
        if !self.resolve_effective_date().await {
            return;
        }

        info!(
            instrument = %self.config.instrument_id,
            effective_date = %self.effective_date(),
            "effective date changed, resubscribing"
        );
        if self.connection.is_enabled() {
            self.dispatch(ConnectionEvent::ParamsChanged).await;
            self.enable().await;
        } else {
            let effective_date = self.effective_date();
            self.stream.reset(Some(effective_date));
        }
    }

    async fn run(&mut self) {
        self.resolve_effective_date().await;
        let effective_date = self.effective_date();
        self.stream.reset(Some(effective_date));

        if self.config.enabled {
            self.enable().await;
        } else {
            self.reason = Some("stream disabled".to_string());
            self.publish().await;
        }

        let period = self.config.date_recheck_interval;
        let mut recheck = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        recheck.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => break,
                frame = next_frame(&mut self.socket) => self.handle_frame(frame).await,
                _ = reconnect_elapsed(&mut self.reconnect_timer) => {
                    self.reconnect_timer = None;
                    self.dispatch(ConnectionEvent::ReconnectElapsed).await;
                }
                _ = recheck.tick() => self.recheck_effective_date().await,
                update = enabled_changed(&mut self.enabled_control) => match update {
                    Some(enabled) => self.set_enabled(enabled).await,
                    None => self.enabled_control = None,
                },
            }
        }

        self.reconnect_timer = None;
        if let Some(socket) = self.socket.take() {
            close_socket(socket).await;
        }
    }
}

pub async fn run_tick_stream(
    config: TickStreamConfig,
    calendar: Arc<SessionCalendar>,
    loader: CalendarLoader,
    status_store: Arc<RwLock<StreamStatusSnapshot>>,
    emitter: FeedEmitter,
    enabled: watch::Receiver<bool>,
    cancel_token: CancellationToken,
) {
    let mut driver = StreamDriver {
        config: &config,
        calendar: &calendar,
        loader: &loader,
        status_store: &status_store,
        emitter: &emitter,
        cancel_token: &cancel_token,
        enabled_control: Some(enabled),
        connection: StreamConnection::new(config.reconnect_delay),
        stream: StreamState::default(),
        socket: None,
        reconnect_timer: None,
        pending_events: VecDeque::new(),
        pending_payload: None,
        effective: None,
        misconfigured: None,
        reason: None,
        throttle: StatusPublishThrottle::default(),
    };

    driver.run().await;
    info!(instrument = %config.instrument_id, "tick stream stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::types::FeedEndpoint;
    use futures_util::SinkExt;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn reference_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 15).expect("valid date")
    }

    fn tick(time: &str, price: f64, volume: f64) -> Tick {
        Tick::new("600519", "2024-01-15", time)
            .with_price(price)
            .with_volume(volume)
    }

    fn message(history: Vec<Tick>, latest: Vec<Tick>, trading_finished: bool) -> FeedMessage {
        FeedMessage {
            phase: Some(TradingPhase::Trading),
            history_ticks: history,
            latest_ticks: latest,
            trading_finished,
            malformed_ticks: 0,
        }
    }

    fn stream_config(port: Option<u16>) -> TickStreamConfig {
        TickStreamConfig {
            instrument_id: "600519".to_string(),
            enabled: true,
            endpoint: port.map(|port| FeedEndpoint {
                protocol: "ws".to_string(),
                host: "127.0.0.1".to_string(),
                port,
                path: "/ws/stock".to_string(),
            }),
            calendar_url: None,
            reconnect_delay: Duration::from_millis(50),
            date_recheck_interval: Duration::from_secs(60),
            timezone: chrono_tz::Asia::Shanghai,
            effective_date_override: Some(reference_date()),
        }
    }

    struct RunningStream {
        status_store: Arc<RwLock<StreamStatusSnapshot>>,
        enabled: watch::Sender<bool>,
        events: UnboundedReceiver<FeedEvent>,
        cancel_token: CancellationToken,
        join_handle: tokio::task::JoinHandle<()>,
    }

    impl RunningStream {
        fn spawn(config: TickStreamConfig) -> Self {
            let (emitter, events) = FeedEmitter::channel();
            let status_store = Arc::new(RwLock::new(StreamStatusSnapshot::idle(
                config.instrument_id.clone(),
                None,
            )));
            let cancel_token = CancellationToken::new();
            let (enabled, enabled_control) = watch::channel(config.enabled);
            let join_handle = tokio::spawn(run_tick_stream(
                config,
                Arc::new(SessionCalendar::default()),
                CalendarLoader::default(),
                Arc::clone(&status_store),
                emitter,
                enabled_control,
                cancel_token.clone(),
            ));
            Self {
                status_store,
                enabled,
                events,
                cancel_token,
                join_handle,
            }
        }

        async fn wait_for_status(&mut self, state: ConnectionState) -> StreamStatusSnapshot {
            let wait = async {
                while let Some(event) = self.events.recv().await {
                    if let FeedEvent::TickStatus(snapshot) = event {
                        if snapshot.state == state {
                            return snapshot;
                        }
                    }
                }
                panic!("event channel closed before {state:?}");
            };
            tokio::time::timeout(Duration::from_secs(5), wait)
                .await
                .expect("status should arrive in time")
        }

        async fn stop(self) {
            self.cancel_token.cancel();
            self.join_handle.await.expect("stream task should join");
        }
    }

    async fn serve_once(listener: &TcpListener, payload: &str) {
        let (tcp, _) = listener.accept().await.expect("client should connect");
        let mut websocket = tokio_tungstenite::accept_async(tcp)
            .await
            .expect("handshake should succeed");
        websocket
            .send(Message::Text(payload.to_string()))
            .await
            .expect("payload should send");
        websocket.close(None).await.expect("close should send");
    }

    const FINISHED_PAYLOAD: &str = r#"{"status":"non_trading","tradingFinished":true,
        "historyTicks":[{"date":"20240115","time":"093000","price":"10.00","vol":100,"preClose":9.9},
                        {"date":"20240115","time":"150000","price":"10.20","vol":900}],
        "latestTicks":[]}"#;

    const LIVE_PAYLOAD: &str = r#"{"status":"trading","tradingFinished":false,
        "historyTicks":[{"date":"20240115","time":"093000","price":10.0,"vol":100}],
        "latestTicks":[{"date":"20240115","time":"093003","price":10.1,"vol":160}]}"#;

    #[test]
    fn history_replaces_and_latest_accumulates() {
        let template = SessionTemplate::default();
        let mut state = StreamState::new(Some(reference_date()));

        apply_feed_message(
            &mut state,
            message(
                vec![tick("09:30:00", 10.0, 100.0), tick("09:31:00", 10.1, 150.0)],
                vec![tick("09:32:00", 10.2, 180.0)],
                false,
            ),
            &template,
        );
        apply_feed_message(
            &mut state,
            message(
                Vec::new(),
                vec![tick("09:32:00", 10.25, 190.0), tick("09:33:00", 10.3, 220.0)],
                false,
            ),
            &template,
        );

        assert_eq!(state.history_ticks.len(), 2);
        assert_eq!(state.latest_ticks.len(), 2);
        assert_eq!(state.merged_ticks.len(), 4);
        assert_eq!(state.merged_ticks[2].price, Some(10.25));
        assert_eq!(state.trading_phase, Some(TradingPhase::Trading));

        apply_feed_message(
            &mut state,
            message(vec![tick("09:30:00", 9.9, 90.0)], Vec::new(), false),
            &template,
        );
        assert_eq!(state.history_ticks.len(), 1);
        assert_eq!(state.merged_ticks.len(), 3);
        assert_eq!(state.merged_ticks[0].price, Some(9.9));
    }

    #[test]
    fn counts_rejections_and_flags_degraded_batches() {
        let template = SessionTemplate::default();
        let mut state = StreamState::new(Some(reference_date()));
        let mut malformed = message(
            vec![tick("09:30:00", 10.0, 100.0), tick("12:00:00", 10.0, 100.0)],
            Vec::new(),
            false,
        );
        malformed.malformed_ticks = 2;

        let outcome = apply_feed_message(&mut state, malformed, &template);
        assert_eq!(outcome.accepted, 1);
        assert_eq!(outcome.rejected, 3);
        assert!(!state.degraded);

        let lunch_only = message(Vec::new(), vec![tick("12:30:00", 10.0, 100.0)], true);
        let outcome = apply_feed_message(&mut state, lunch_only, &template);
        assert!(outcome.degraded);
        assert!(state.degraded);
        assert!(state.trading_finished);
        assert_eq!(state.rejected_count, 4);
    }

    #[test]
    fn chart_timeline_uses_latest_pre_close() {
        let calendar = SessionCalendar::default();
        let mut state = StreamState::new(Some(reference_date()));
        state.merged_ticks = vec![
            tick("09:30:00", 10.0, 100.0).with_pre_close(9.5),
            tick("09:30:03", 10.1, 120.0).with_pre_close(9.8),
            tick("09:30:06", 10.2, 150.0),
        ];

        let chart = build_chart_timeline(&state, "600519", &calendar);

        assert_eq!(chart.pre_close, Some(9.8));
        assert_eq!(chart.timeline.points.len(), 3);
        assert_eq!(chart.timeline.session_windows.len(), 4);
        assert_eq!(chart.effective_date, Some(reference_date()));
    }

    #[test]
    fn throttles_repeated_reconnecting_status() {
        let mut throttle = StatusPublishThrottle::default();
        let reason = Some("reconnect attempt 1 in 3000 ms".to_string());

        assert!(allow_status_publish(
            &mut throttle,
            ConnectionState::Reconnecting,
            &reason
        ));
        assert!(!allow_status_publish(
            &mut throttle,
            ConnectionState::Reconnecting,
            &reason
        ));
        assert!(allow_status_publish(
            &mut throttle,
            ConnectionState::Reconnecting,
            &Some("reconnect attempt 2 in 3000 ms".to_string())
        ));
        assert!(allow_status_publish(
            &mut throttle,
            ConnectionState::Connected,
            &None
        ));
        assert!(allow_status_publish(
            &mut throttle,
            ConnectionState::Connected,
            &None
        ));
    }

    #[tokio::test]
    async fn finished_session_does_not_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind should succeed");
        let port = listener.local_addr().expect("listener has an address").port();
        let mut stream = RunningStream::spawn(stream_config(Some(port)));

        serve_once(&listener, FINISHED_PAYLOAD).await;
        let disconnected = stream.wait_for_status(ConnectionState::Disconnected).await;

        assert!(disconnected.trading_finished);
        assert!(disconnected.has_data);
        assert_eq!(disconnected.tick_count, 2);
        assert_eq!(disconnected.reason.as_deref(), Some("trading finished"));
        assert!(
            tokio::time::timeout(Duration::from_millis(300), listener.accept())
                .await
                .is_err(),
            "no reconnect after trading finished"
        );

        stream.stop().await;
    }

    #[tokio::test]
    async fn unexpected_close_reconnects_after_delay() {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind should succeed");
        let port = listener.local_addr().expect("listener has an address").port();
        let mut stream = RunningStream::spawn(stream_config(Some(port)));

        serve_once(&listener, LIVE_PAYLOAD).await;
        let reconnecting = stream.wait_for_status(ConnectionState::Reconnecting).await;
        assert_eq!(reconnecting.reconnect_attempts, 1);
        assert_eq!(reconnecting.tick_count, 2);

        let second = tokio::time::timeout(Duration::from_secs(2), listener.accept()).await;
        assert!(second.is_ok(), "stream should dial again");

        stream.stop().await;
    }

    #[tokio::test]
    async fn disabling_while_reconnecting_cancels_the_pending_dial() {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind should succeed");
        let port = listener.local_addr().expect("listener has an address").port();
        let config = TickStreamConfig {
            reconnect_delay: Duration::from_millis(300),
            ..stream_config(Some(port))
        };
        let mut stream = RunningStream::spawn(config);

        serve_once(&listener, LIVE_PAYLOAD).await;
        stream.wait_for_status(ConnectionState::Reconnecting).await;
        stream.enabled.send(false).expect("driver holds the receiver");

        let idle = stream.wait_for_status(ConnectionState::Idle).await;
        assert_eq!(idle.reconnect_attempts, 0);
        assert!(
            tokio::time::timeout(Duration::from_millis(800), listener.accept())
                .await
                .is_err(),
            "no socket opens once disabled"
        );

        stream.enabled.send(true).expect("driver holds the receiver");
        let redial = tokio::time::timeout(Duration::from_secs(2), listener.accept()).await;
        assert!(redial.is_ok(), "enabling again dials immediately");

        stream.stop().await;
    }

    #[tokio::test]
    async fn stopping_while_reconnecting_opens_no_socket() {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind should succeed");
        let port = listener.local_addr().expect("listener has an address").port();
        let config = TickStreamConfig {
            reconnect_delay: Duration::from_millis(300),
            ..stream_config(Some(port))
        };
        let mut stream = RunningStream::spawn(config);

        serve_once(&listener, LIVE_PAYLOAD).await;
        stream.wait_for_status(ConnectionState::Reconnecting).await;
        stream.stop().await;

        assert!(
            tokio::time::timeout(Duration::from_millis(800), listener.accept())
                .await
                .is_err(),
            "no socket opens after the task stopped"
        );
    }

    #[tokio::test]
    async fn emits_timeline_after_each_payload() {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind should succeed");
        let port = listener.local_addr().expect("listener has an address").port();
        let mut stream = RunningStream::spawn(stream_config(Some(port)));

        serve_once(&listener, LIVE_PAYLOAD).await;
        let timeline = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(event) = stream.events.recv().await {
                if let FeedEvent::TimelineUpdate(timeline) = event {
                    return timeline;
                }
            }
            panic!("event channel closed before a timeline update");
        })
        .await
        .expect("timeline should arrive in time");

        assert_eq!(timeline.instrument_id, "600519");
        let prices: Vec<i64> = timeline
            .timeline
            .points
            .iter()
            .map(|point| point.price)
            .collect();
        assert_eq!(prices, vec![1_000, 1_010]);

        stream.stop().await;
    }

    #[tokio::test]
    async fn missing_endpoint_is_reported_as_disconnected() {
        let mut stream = RunningStream::spawn(stream_config(None));

        let status = stream.wait_for_status(ConnectionState::Disconnected).await;
        assert!(status
            .reason
            .as_deref()
            .is_some_and(|reason| reason.contains("not configured")));
        assert_eq!(
            stream.status_store.read().await.state,
            ConnectionState::Disconnected
        );

        stream.stop().await;
    }
}
