//! Outbound notifications emitted while an enhancement runs.
//!
//! The orchestrator does not know how events reach a user. It is handed a
//! [`ProgressListener`] per call and fires events at it without waiting for any
//! acknowledgement.

use crate::orchestrator::AggregateResult;
use serde::Serialize;
use std::sync::Mutex;
use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStep {
    Initialize,
    Process,
    Framework,
    Refine,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub step: ProgressStep,
    #[serde(rename = "details", skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ProgressEvent {
    pub fn new(step: ProgressStep) -> Self {
        Self { step, detail: None }
    }

    pub fn with_detail(step: ProgressStep, detail: impl Into<String>) -> Self {
        Self {
            step,
            detail: Some(detail.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundEvent {
    EnhancementProgress { data: ProgressEvent },
    PromptEnhanced { data: AggregateResult },
    EnhancementError { error: String },
}

impl OutboundEvent {
    pub fn progress(&self) -> Option<&ProgressEvent> {
        match self {
            Self::EnhancementProgress { data } => Some(data),
            _ => None,
        }
    }
}

pub trait ProgressListener: Send + Sync {
    fn emit(&self, event: OutboundEvent);
}

impl<F> ProgressListener for F
where
    F: Fn(OutboundEvent) + Send + Sync,
{
    fn emit(&self, event: OutboundEvent) {
        self(event)
    }
}

/// Drops every event.
pub struct NoopListener;

impl ProgressListener for NoopListener {
    fn emit(&self, _event: OutboundEvent) {}
}

/// Forwards events into a tokio channel. A closed receiver is ignored.
pub struct ChannelListener {
    sender: UnboundedSender<OutboundEvent>,
}

impl ChannelListener {
    pub fn new(sender: UnboundedSender<OutboundEvent>) -> Self {
        Self { sender }
    }
}

impl ProgressListener for ChannelListener {
    fn emit(&self, event: OutboundEvent) {
        let _ = self.sender.send(event);
    }
}

/// Keeps every event in memory, in emission order.
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<OutboundEvent>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<OutboundEvent> {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Just the progress events, in order.
    pub fn progress(&self) -> Vec<ProgressEvent> {
        self.events()
            .iter()
            .filter_map(OutboundEvent::progress)
            .cloned()
            .collect()
    }
}

impl ProgressListener for RecordingListener {
    fn emit(&self, event: OutboundEvent) {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(event);
    }
}
