//! In-memory publishers
//!
//! A recording publisher for tests and a no-op publisher for deployments
//! with events disabled.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::AppResult;

use super::{Event, EventPublisher};

/// Publisher that records every event, for assertions in tests.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<Event>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events published so far.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// Event types in publish order.
    pub fn event_types(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|event| event.event_type.clone())
            .collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: Event) -> AppResult<()> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }

    async fn publish_batch(&self, events: Vec<Event>) -> AppResult<()> {
        self.events.lock().unwrap().extend(events);
        Ok(())
    }
}

/// Publisher that drops events after a debug log line.
#[derive(Debug, Default, Clone)]
pub struct NoopPublisher;

impl NoopPublisher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EventPublisher for NoopPublisher {
    async fn publish(&self, event: Event) -> AppResult<()> {
        tracing::debug!(event_type = %event.event_type, "Event publishing disabled, dropping");
        Ok(())
    }

    async fn publish_batch(&self, events: Vec<Event>) -> AppResult<()> {
        tracing::debug!(count = events.len(), "Event publishing disabled, dropping batch");
        Ok(())
    }
}
