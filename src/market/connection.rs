use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Disconnected => "disconnected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Enable { endpoint_ready: bool },
    Opened,
    Payload { trading_finished: bool },
    TransportClosed,
    ReconnectElapsed,
    Disable,
    ParamsChanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionAction {
    OpenSocket,
    CloseSocket,
    ScheduleReconnect(Duration),
    CancelReconnect,
    ApplyPayload,
    ResetStreamState,
    ReportMisconfigured,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: ConnectionState,
    pub to: ConnectionState,
    pub actions: Vec<ConnectionAction>,
}

impl Transition {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }

    pub fn is_noop(&self) -> bool {
        !self.changed() && self.actions.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct StreamConnection {
    state: ConnectionState,
    enabled: bool,
    trading_finished: bool,
    reconnect_delay: Duration,
    reconnect_attempts: u32,
}

impl StreamConnection {
    pub fn new(reconnect_delay: Duration) -> Self {
        Self {
            state: ConnectionState::Idle,
            enabled: false,
            trading_finished: false,
            reconnect_delay,
            reconnect_attempts: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_trading_finished(&self) -> bool {
        self.trading_finished
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn handle(&mut self, event: ConnectionEvent) -> Transition {
        use ConnectionAction as A;
        use ConnectionState as S;

        let from = self.state;
        let actions = match (from, event) {
            (_, ConnectionEvent::Enable { endpoint_ready }) => {
                self.enabled = true;
                self.trading_finished = false;
                match from {
                    _ if !endpoint_ready => {
                        self.state = S::Idle;
                        vec![A::CancelReconnect, A::CloseSocket, A::ReportMisconfigured]
                    }
                    S::Idle | S::Disconnected => {
                        self.state = S::Connecting;
                        vec![A::OpenSocket]
                    }
                    S::Reconnecting => {
                        self.state = S::Connecting;
                        vec![A::CancelReconnect, A::OpenSocket]
                    }
                    S::Connecting | S::Connected => Vec::new(),
                }
            }
            (S::Connecting, ConnectionEvent::Opened) => {
                self.state = S::Connected;
                self.reconnect_attempts = 0;
                Vec::new()
            }
            (S::Connected, ConnectionEvent::Payload { trading_finished }) => {
                if trading_finished {
                    self.trading_finished = true;
                }
                vec![A::ApplyPayload]
            }
            (S::Connecting | S::Connected, ConnectionEvent::TransportClosed) => {
                if self.trading_finished || !self.enabled {
                    self.state = S::Disconnected;
                    Vec::new()
                } else {
                    self.state = S::Reconnecting;
                    self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);
                    vec![A::ScheduleReconnect(self.reconnect_delay)]
                }
            }
            (S::Reconnecting, ConnectionEvent::ReconnectElapsed)
                if self.enabled && !self.trading_finished =>
            {
                self.state = S::Connecting;
                vec![A::OpenSocket]
            }
            (_, ConnectionEvent::Disable) => {
                self.enabled = false;
                self.reset()
            }
            (_, ConnectionEvent::ParamsChanged) => self.reset(),
            _ => Vec::new(),
        };

        Transition {
            from,
            to: self.state,
            actions,
        }
    }

    fn reset(&mut self) -> Vec<ConnectionAction> {
        self.state = ConnectionState::Idle;
        self.trading_finished = false;
        self.reconnect_attempts = 0;
        vec![
            ConnectionAction::CancelReconnect,
            ConnectionAction::CloseSocket,
            ConnectionAction::ResetStreamState,
        ]
    }
}
