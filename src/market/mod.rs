pub mod calendar;
pub mod connection;
pub mod feed;
pub mod merger;
pub mod persistence;
pub mod pipeline;
pub mod timeline;
pub mod types;
pub mod validator;

use crate::error::AppError;
use crate::market::pipeline::ChartTimeline;
use crate::market::types::StreamStatusSnapshot;
use serde::Serialize;
use tokio::sync::mpsc;

pub const TICK_STATUS_EVENT: &str = "tick_status";
pub const TIMELINE_UPDATE_EVENT: &str = "timeline_update";

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum FeedEvent {
    TickStatus(StreamStatusSnapshot),
    TimelineUpdate(ChartTimeline),
}

impl FeedEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::TickStatus(_) => TICK_STATUS_EVENT,
            Self::TimelineUpdate(_) => TIMELINE_UPDATE_EVENT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeedEmitter {
    sender: mpsc::UnboundedSender<FeedEvent>,
}

impl FeedEmitter {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<FeedEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    pub fn emit(&self, event: FeedEvent) -> Result<(), AppError> {
        let name = event.name();
        self.sender
            .send(event)
            .map_err(|_| AppError::EventChannelClosed(name))
    }
}
