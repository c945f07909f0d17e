//! Locator event bus — position fixes and lookup errors for subscribers.
//!
//! The bus is a `tokio::sync::broadcast` channel. Every subscriber sees every
//! event; with no subscribers, events are dropped.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::lifecycle::Resolution;
use crate::types::{ErrorKind, LocatorError, Position};

pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Everything the locator reports to its callers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LocatorEvent {
    LocationFound {
        latitude: f64,
        longitude: f64,
        accuracy: f64,
    },
    Error {
        kind: ErrorKind,
        detail: String,
    },
}

impl LocatorEvent {
    pub fn location(position: Position) -> Self {
        LocatorEvent::LocationFound {
            latitude: position.latitude,
            longitude: position.longitude,
            accuracy: position.accuracy,
        }
    }

    pub fn error(err: &LocatorError) -> Self {
        LocatorEvent::Error {
            kind: err.kind(),
            detail: err.to_string(),
        }
    }
}

impl From<Resolution> for LocatorEvent {
    fn from(resolution: Resolution) -> Self {
        match resolution.into_result() {
            Ok(position) => LocatorEvent::location(position),
            Err(e) => LocatorEvent::error(&e),
        }
    }
}

pub struct EventBus {
    sender: broadcast::Sender<LocatorEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: LocatorEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LocatorEvent> {
        self.sender.subscribe()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = LocatorEvent::LocationFound {
            latitude: 55.75,
            longitude: 37.62,
            accuracy: 30.0,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "location_found");
        assert_eq!(json["latitude"], 55.75);

        let parsed: LocatorEvent = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_error_event_from_resolution() {
        let event = LocatorEvent::from(Resolution::TimedOut);
        match event {
            LocatorEvent::Error { kind, .. } => assert_eq!(kind, ErrorKind::TimedOut),
            _ => panic!("wrong variant"),
        }
        let json = serde_json::to_string(&LocatorEvent::from(Resolution::ProtocolError(
            "no location data".into(),
        )))
        .unwrap();
        assert!(json.contains("\"kind\":\"protocol\""));
    }

    #[test]
    fn test_event_bus_emit_no_subscribers() {
        let bus = EventBus::new(4);
        bus.emit(LocatorEvent::error(&LocatorError::TimedOut));
    }

    #[test]
    fn test_event_bus_subscribe_receive() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.emit(LocatorEvent::location(Position {
            latitude: 1.0,
            longitude: 2.0,
            accuracy: -1.0,
        }));
        match rx.try_recv().unwrap() {
            LocatorEvent::LocationFound { accuracy, .. } => assert_eq!(accuracy, -1.0),
            _ => panic!("wrong event"),
        }
    }
}
