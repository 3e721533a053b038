//! Inactivity tracker: the state machine between the probes and the handlers.
//!
//! The tracker keeps two separate pieces of state. The latch is edge
//! triggered: it makes `InactiveTimeout` fire once per inactive episode. The
//! termination predicate is level triggered: it is recomputed from
//! `last_active_at` on every call.

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::decode_section;
use crate::event::{Event, EventDispatcher};

const SECTION: &str = "inactivetimeout";

/// Seconds of inactivity before the event fires when nothing is configured.
pub const DEFAULT_INACTIVE_TIMEOUT: u64 = 1800;

fn default_inactive_timeout() -> u64 {
    DEFAULT_INACTIVE_TIMEOUT
}

/// `eventhandler.inactivetimeout` settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TrackerConfig {
    /// Stop the daemon once the timeout is reached.
    #[serde(default)]
    pub die_on_inactive: bool,
    /// Seconds of continuous inactivity before the event fires.
    #[serde(default = "default_inactive_timeout")]
    pub inactive_timeout: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            die_on_inactive: false,
            inactive_timeout: DEFAULT_INACTIVE_TIMEOUT,
        }
    }
}

impl TrackerConfig {
    /// Read the tracker settings, falling back to defaults for a missing or broken section.
    pub fn from_eventhandler(eventhandler: &toml::Table) -> Self {
        match decode_section(eventhandler, SECTION) {
            Ok(config) => config,
            Err(e) => {
                warn!("Using default inactivity settings: {}", e);
                Self::default()
            }
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.inactive_timeout)
    }
}

/// Where the tracker is within an episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    /// Activity seen on the last update, or nothing observed yet.
    Active,
    /// Inactive, timeout not reached.
    InactivePending,
    /// Inactive past the timeout; the event already fired for this episode.
    InactiveFired,
}

pub struct InactivityTracker {
    clock: Arc<dyn Clock>,
    dispatcher: EventDispatcher,
    timeout: Duration,
    terminate_on_inactive: bool,
    last_active_at: Instant,
    latch: bool,
}

impl InactivityTracker {
    pub fn new(config: &TrackerConfig, clock: Arc<dyn Clock>, dispatcher: EventDispatcher) -> Self {
        info!(
            "eventhandler.inactivetimeout config: die_on_inactive={}, inactive_timeout={}s",
            config.die_on_inactive, config.inactive_timeout
        );
        let last_active_at = clock.now();
        Self {
            clock,
            dispatcher,
            timeout: config.timeout(),
            terminate_on_inactive: config.die_on_inactive,
            last_active_at,
            latch: false,
        }
    }

    /// Time since the aggregate signal was last active.
    pub fn idle_for(&self) -> Duration {
        self.clock.now().saturating_duration_since(self.last_active_at)
    }

    /// Feed one cycle's aggregate activity into the state machine.
    pub async fn update(&mut self, active: bool) -> TrackerState {
        let now = self.clock.now();
        let idle_for = now.saturating_duration_since(self.last_active_at);

        if active {
            self.last_active_at = self.last_active_at.max(now);
            if self.latch {
                self.latch = false;
                info!("Activity resumed after {:?} of inactivity", idle_for);
                self.dispatch(Event::ActivityResumed { idle_for }).await;
            }
            TrackerState::Active
        } else if idle_for < self.timeout {
            debug!(
                idle_for = ?idle_for,
                remaining = ?(self.timeout - idle_for),
                "Inactive, timeout not reached"
            );
            TrackerState::InactivePending
        } else if !self.latch {
            self.latch = true;
            info!("Inactive for {:?}, dispatching inactivity event", idle_for);
            self.dispatch(Event::InactiveTimeout { idle_for }).await;
            TrackerState::InactiveFired
        } else {
            TrackerState::InactiveFired
        }
    }

    async fn dispatch(&mut self, event: Event) {
        for failure in self.dispatcher.dispatch(&event).await {
            warn!(handler = %failure.handler, ?event, "Event not handled: {}", failure.error);
        }
    }

    /// True once inactivity reached the timeout and the daemon is configured to stop.
    pub fn should_terminate(&self) -> bool {
        self.terminate_on_inactive && self.idle_for() >= self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::mocks::ManualClock;
    use crate::event::mocks::RecordingHandler;
    use std::sync::Mutex;

    struct Harness {
        clock: Arc<ManualClock>,
        tracker: InactivityTracker,
        events: Arc<Mutex<Vec<Event>>>,
    }

    impl Harness {
        fn new(timeout_secs: u64, die_on_inactive: bool) -> Self {
            let clock = Arc::new(ManualClock::new());
            let handler = RecordingHandler::new("recorder");
            let events = handler.events.clone();
            let mut dispatcher = EventDispatcher::new();
            dispatcher.register(Box::new(handler));

            let config = TrackerConfig {
                die_on_inactive,
                inactive_timeout: timeout_secs,
            };
            let tracker = InactivityTracker::new(&config, clock.clone(), dispatcher);
            Self { clock, tracker, events }
        }

        async fn step(&mut self, secs: u64, active: bool) -> TrackerState {
            self.clock.advance(Duration::from_secs(secs));
            self.tracker.update(active).await
        }

        fn timeouts(&self) -> usize {
            RecordingHandler::timeouts(&self.events)
        }
    }

    #[tokio::test]
    async fn test_fires_once_per_episode() {
        let mut h = Harness::new(10, false);

        assert_eq!(h.step(5, false).await, TrackerState::InactivePending);
        assert_eq!(h.timeouts(), 0);
        assert_eq!(h.step(5, false).await, TrackerState::InactiveFired);
        assert_eq!(h.timeouts(), 1);

        for _ in 0..20 {
            assert_eq!(h.step(5, false).await, TrackerState::InactiveFired);
        }
        assert_eq!(h.timeouts(), 1);
    }

    #[tokio::test]
    async fn test_activity_starts_new_episode() {
        let mut h = Harness::new(10, false);

        h.step(10, false).await;
        assert_eq!(h.timeouts(), 1);

        assert_eq!(h.step(1, true).await, TrackerState::Active);
        let resumed = h
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, Event::ActivityResumed { .. }))
            .count();
        assert_eq!(resumed, 1);

        assert_eq!(h.step(9, false).await, TrackerState::InactivePending);
        assert_eq!(h.step(1, false).await, TrackerState::InactiveFired);
        assert_eq!(h.step(5, false).await, TrackerState::InactiveFired);
        assert_eq!(h.timeouts(), 2);
    }

    #[tokio::test]
    async fn test_activity_before_timeout_never_fires() {
        let mut h = Harness::new(10, false);

        for _ in 0..10 {
            h.step(6, false).await;
            h.step(6, true).await;
        }
        assert_eq!(h.timeouts(), 0);
        // No resume event without a prior timeout.
        assert!(h.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_measured_from_last_activity() {
        // Active at cycle 1, inactive afterwards, 2s cycles, 6s timeout.
        let mut h = Harness::new(6, false);
        let mut states = Vec::new();
        states.push(h.step(2, true).await);
        for _ in 0..4 {
            states.push(h.step(2, false).await);
        }

        assert_eq!(
            states,
            vec![
                TrackerState::Active,
                TrackerState::InactivePending,
                TrackerState::InactivePending,
                TrackerState::InactiveFired,
                TrackerState::InactiveFired,
            ]
        );
        assert_eq!(h.timeouts(), 1);
    }

    #[tokio::test]
    async fn test_should_terminate_requires_die_on_inactive() {
        let mut keep_running = Harness::new(10, false);
        keep_running.step(1000, false).await;
        assert!(!keep_running.tracker.should_terminate());

        let mut die = Harness::new(10, true);
        assert!(!die.tracker.should_terminate());
        die.step(9, false).await;
        assert!(!die.tracker.should_terminate());
        die.step(1, false).await;
        assert!(die.tracker.should_terminate());

        die.step(0, true).await;
        assert!(!die.tracker.should_terminate());
    }

    #[tokio::test]
    async fn test_should_terminate_is_level_triggered() {
        let mut h = Harness::new(10, true);
        h.step(10, false).await;

        for _ in 0..3 {
            assert!(h.tracker.should_terminate());
            h.step(1, false).await;
        }
        assert_eq!(h.timeouts(), 1);
    }

    #[test]
    fn test_config_defaults_and_parsing() {
        let empty = TrackerConfig::from_eventhandler(&toml::Table::new());
        assert_eq!(empty, TrackerConfig::default());
        assert_eq!(empty.timeout(), Duration::from_secs(1800));

        let table: toml::Table = "[inactivetimeout]\ndie_on_inactive = true\n".parse().unwrap();
        let partial = TrackerConfig::from_eventhandler(&table);
        assert!(partial.die_on_inactive);
        assert_eq!(partial.inactive_timeout, 1800);

        let table: toml::Table = "[inactivetimeout]\ninactive_timeout = -5\n".parse().unwrap();
        assert_eq!(TrackerConfig::from_eventhandler(&table), TrackerConfig::default());
    }
}
