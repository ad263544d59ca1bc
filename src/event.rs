//! Failure events.
//!
//! Every request ends in exactly one of three failure outcomes or in none
//! at all. For each outcome the dispatcher builds one [`Event`] and gives it
//! to the configured failure handler (through
//! [`Context::event`](crate::Context::event)) and, independently, to the
//! process-wide event sink if that outcome's gate in [`EventConfig`] is on.
//!
//! ```rust
//! use waypoint::{Dispatcher, EventConfig};
//!
//! let mut app = Dispatcher::new();
//! app.event_config(EventConfig { enable_trace: true, short_caller: true, ..EventConfig::default() })
//!     .on_event(|event| {
//!         tracing::error!(status = event.status.as_u16(), trace = ?event.trace, "{}", event.message);
//!     });
//! ```

use std::fmt;
use std::panic::Location;
use std::sync::Arc;

use http::StatusCode;

use crate::handler::EventSink;
use crate::request::Request;
use crate::trace;

/// The three failure outcomes.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum EventKind {
    /// No route matched the path.
    NotFound,
    /// The path matched, the method did not.
    MethodNotAllowed,
    /// A chain step returned an error or panicked.
    ServerError,
}

impl EventKind {
    pub fn status(self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// A structured record of one failure occurrence.
#[derive(Clone, Debug)]
pub struct Event {
    pub kind: EventKind,
    pub status: StatusCode,
    pub message: String,
    /// `file:line` entries, innermost first. Empty unless tracing is enabled.
    pub trace: Vec<String>,
    pub request: Arc<Request>,
}

/// Event emission settings.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EventConfig {
    /// Capture a call trace for server errors.
    pub enable_trace: bool,
    /// Reduce trace file paths to their base name.
    pub short_caller: bool,
    /// Emit an event for not-found outcomes.
    pub not_found: bool,
    /// Emit an event for method-not-allowed outcomes.
    pub method_not_allowed: bool,
    /// Emit an event for server-error outcomes.
    pub server_error: bool,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            enable_trace: false,
            short_caller: false,
            not_found: true,
            method_not_allowed: true,
            server_error: true,
        }
    }
}

impl EventConfig {
    pub fn emits(&self, kind: EventKind) -> bool {
        match kind {
            EventKind::NotFound => self.not_found,
            EventKind::MethodNotAllowed => self.method_not_allowed,
            EventKind::ServerError => self.server_error,
        }
    }
}

/// Where an event's trace comes from.
pub(crate) enum TraceSource {
    None,
    /// The location an error was created at.
    Origin(&'static Location<'static>),
    /// Frames recorded at a panic site.
    Captured(Vec<String>),
}

/// Builds events and hands them to the sink.
#[derive(Clone, Default)]
pub struct EventReporter {
    config: EventConfig,
    sink: Option<EventSink>,
}

impl fmt::Debug for EventReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventReporter")
            .field("config", &self.config)
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

impl EventReporter {
    pub fn config(&self) -> EventConfig {
        self.config
    }

    pub(crate) fn set_config(&mut self, config: EventConfig) {
        self.config = config;
    }

    pub(crate) fn set_sink(&mut self, sink: EventSink) {
        self.sink = Some(sink);
    }

    pub(crate) fn build(
        &self,
        kind: EventKind,
        message: String,
        request: Arc<Request>,
        source: TraceSource,
    ) -> Event {
        let trace = if self.config.enable_trace {
            let short = self.config.short_caller;
            match source {
                TraceSource::None => Vec::new(),
                TraceSource::Origin(loc) => vec![trace::location(loc.file(), loc.line(), short)],
                TraceSource::Captured(frames) => frames,
            }
        } else {
            Vec::new()
        };
        Event { kind, status: kind.status(), message, trace, request }
    }

    /// Hands `event` to the sink if one is set and the event's gate is on.
    pub(crate) fn emit(&self, event: &Event) {
        if let Some(sink) = &self.sink {
            if self.config.emits(event.kind) {
                sink(event);
            }
        }
    }

    /// Builds and emits in one step. Does nothing, not even building, when
    /// there is no sink or the gate is off.
    pub(crate) fn report(
        &self,
        kind: EventKind,
        message: String,
        request: Arc<Request>,
        source: TraceSource,
    ) {
        if self.sink.is_none() || !self.config.emits(kind) {
            return;
        }
        let event = self.build(kind, message, request, source);
        self.emit(&event);
    }
}
