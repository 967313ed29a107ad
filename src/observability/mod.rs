//! Observability subsystem for aerofle
//!
//! Structured JSON-line logging of typed lifecycle events.
//!
//! # Principles
//!
//! 1. Observability is read-only
//! 2. No async or background threads
//! 3. Deterministic output
//! 4. No key material or document values in any payload
//!
//! # Usage
//!
//! ```ignore
//! use aerofle::observability::{log_event_with_fields, Event};
//!
//! log_event_with_fields(Event::CollectionBound, &[("namespace", "app.users")]);
//! ```

mod events;
mod logger;

pub use events::Event;
pub use logger::{min_severity, Logger, Severity, LOG_LEVEL_ENV};

/// Log a lifecycle event
pub fn log_event(event: Event) {
    log_event_with_fields(event, &[]);
}

/// Log a lifecycle event with fields
///
/// Failure events log at WARN, everything else at INFO.
pub fn log_event_with_fields(event: Event, fields: &[(&str, &str)]) {
    let severity = if event.is_failure() {
        Severity::Warn
    } else {
        Severity::Info
    };
    Logger::log(severity, event.as_str(), fields);
}
