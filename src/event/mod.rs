//! Inactivity events and the dispatcher that fans them out to handlers.

mod command;

pub use command::CommandHandler;

use async_trait::async_trait;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::HandlerError;
use crate::logging::JournalHandler;

/// Events raised by the inactivity tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// The machine has been inactive for the configured timeout.
    /// Raised once per inactive episode.
    InactiveTimeout { idle_for: Duration },
    /// Activity came back after an `InactiveTimeout` was raised.
    ActivityResumed { idle_for: Duration },
}

/// Capability contract shared by every event handler.
#[async_trait]
pub trait EventHandler: Send {
    fn name(&self) -> &str;

    /// Apply the `eventhandler` table. Returns false when the handler cannot be used.
    fn configure(&mut self, eventhandler: &toml::Table) -> bool;

    /// React to one event. Runs to completion before the next handler starts.
    async fn handle(&mut self, event: &Event) -> Result<(), HandlerError>;
}

/// A handler that failed during one dispatch.
#[derive(Debug)]
pub struct HandlerFailure {
    pub handler: String,
    pub error: HandlerError,
}

/// Ordered list of handlers.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Box<dyn EventHandler>) {
        debug!(handler = handler.name(), "Event handler registered");
        self.handlers.push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Deliver `event` to every handler in registration order.
    ///
    /// A failing handler is logged and collected; the remaining handlers still run.
    pub async fn dispatch(&mut self, event: &Event) -> Vec<HandlerFailure> {
        let mut failures = Vec::new();

        for handler in self.handlers.iter_mut() {
            match handler.handle(event).await {
                Ok(()) => debug!(handler = handler.name(), ?event, "Event handled"),
                Err(error) => {
                    debug!(handler = handler.name(), ?event, "Event handler failed: {}", error);
                    failures.push(HandlerFailure {
                        handler: handler.name().to_string(),
                        error,
                    });
                }
            }
        }

        failures
    }
}

/// Build every known handler, configure it from `eventhandler` and keep the usable ones.
pub fn build_dispatcher(eventhandler: &toml::Table, logs_dir: &Path) -> EventDispatcher {
    let candidates: Vec<Box<dyn EventHandler>> = vec![
        Box::new(CommandHandler::new()),
        Box::new(JournalHandler::new(logs_dir.to_path_buf())),
    ];

    let mut dispatcher = EventDispatcher::new();
    for mut handler in candidates {
        if handler.configure(eventhandler) {
            dispatcher.register(handler);
        } else {
            debug!(handler = handler.name(), "Event handler not configured, skipped");
        }
    }

    if dispatcher.is_empty() {
        warn!("No event handler configured, inactivity will only be logged");
    } else {
        info!("{} event handler(s) registered", dispatcher.len());
    }
    dispatcher
}


#[cfg(test)]
mod tests {
    use super::mocks::RecordingHandler;
    use super::*;

    #[tokio::test]
    async fn test_dispatch_in_order_and_survives_failures() {
        let first = RecordingHandler::failing("first");
        let second = RecordingHandler::new("second");
        let first_events = first.events.clone();
        let second_events = second.events.clone();

        let mut dispatcher = EventDispatcher::new();
        dispatcher.register(Box::new(first));
        dispatcher.register(Box::new(second));

        let event = Event::InactiveTimeout {
            idle_for: Duration::from_secs(10),
        };
        let failures = dispatcher.dispatch(&event).await;

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].handler, "first");
        assert_eq!(*first_events.lock().unwrap(), vec![event]);
        assert_eq!(*second_events.lock().unwrap(), vec![event]);
    }

    #[tokio::test]
    async fn test_dispatch_without_handlers() {
        let mut dispatcher = EventDispatcher::new();
        let failures = dispatcher
            .dispatch(&Event::ActivityResumed {
                idle_for: Duration::ZERO,
            })
            .await;
        assert!(failures.is_empty());
    }

    #[test]
    fn test_build_dispatcher_skips_unconfigured_handlers() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = build_dispatcher(&toml::Table::new(), dir.path());
        assert!(dispatcher.is_empty());
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let json = serde_json::to_value(Event::InactiveTimeout {
            idle_for: Duration::from_secs(3),
        })
        .unwrap();
        assert_eq!(json["event"], "inactive_timeout");
        assert_eq!(json["idle_for"]["secs"], 3);
    }
}
