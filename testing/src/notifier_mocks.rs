//! Notifier that records what it was asked to deliver.

#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

use matchpoint_core::notify::{DomainEvent, Notifier, NotifyError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Captures delivered events; can be switched to fail every delivery.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<DomainEvent>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    /// A notifier that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent delivery fail.
    pub fn fail_deliveries(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    /// Events delivered so far, in order.
    #[must_use]
    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Names of delivered events, in order.
    #[must_use]
    pub fn event_names(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(DomainEvent::name).collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, event: &DomainEvent) -> Result<(), NotifyError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError("mail relay unreachable".to_string()));
        }
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}
