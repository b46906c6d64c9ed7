//! Diagnostic events for log views
//!
//! Every event is traced and also kept in a bounded in-memory log and
//! pushed to any subscribed receivers.

use chrono::{DateTime, Local};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use uuid::Uuid;

/// Default number of events kept in memory
pub const DEFAULT_EVENT_CAPACITY: usize = 500;

/// What happened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PollEventKind {
    /// Serial port list refreshed
    PortsRefreshed {
        /// Ports in display order
        ports: Vec<String>,
    },
    /// Session opened
    Connected {
        /// Connection summary
        info: String,
    },
    /// Session could not be opened
    ConnectFailed {
        /// Error text
        error: String,
    },
    /// Session closed
    Disconnected {
        /// Connection summary
        info: String,
    },
    /// A register read failed
    RegisterTransportError {
        /// Register name
        name: String,
        /// Error text
        message: String,
    },
    /// A register's words could not be decoded
    RegisterDecodeError {
        /// Register name
        name: String,
        /// Error text
        message: String,
    },
    /// Poll interval could not be parsed, default used
    IntervalFallback {
        /// Text that failed to parse
        raw: String,
        /// Interval actually used
        used_ms: u64,
    },
}

impl fmt::Display for PollEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PortsRefreshed { ports } if ports.is_empty() => write!(f, "Ports: No ports found"),
            Self::PortsRefreshed { ports } => write!(f, "Ports: {}", ports.join(", ")),
            Self::Connected { info } => write!(f, "Connected OK: {info}"),
            Self::ConnectFailed { error } => write!(f, "Failed to open port: {error}"),
            Self::Disconnected { info } => write!(f, "Disconnected: {info}"),
            Self::RegisterTransportError { name, message } => write!(f, "{name}: {message}"),
            Self::RegisterDecodeError { name, message } => write!(f, "{name}: decode error: {message}"),
            Self::IntervalFallback { raw, used_ms } => {
                write!(f, "Invalid poll interval '{raw}', using {used_ms} ms")
            }
        }
    }
}

/// Timestamped diagnostic record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollEvent {
    /// When it happened
    pub timestamp: DateTime<Local>,
    /// Engine session that raised it, if any
    pub session: Option<Uuid>,
    /// Event payload
    pub kind: PollEventKind,
}

impl PollEvent {
    /// Create an event stamped now
    pub fn new(session: Option<Uuid>, kind: PollEventKind) -> Self {
        Self {
            timestamp: Local::now(),
            session,
            kind,
        }
    }

    /// Whether this event reports a failure
    pub fn is_error(&self) -> bool {
        matches!(
            self.kind,
            PollEventKind::ConnectFailed { .. }
                | PollEventKind::RegisterTransportError { .. }
                | PollEventKind::RegisterDecodeError { .. }
        )
    }
}

impl fmt::Display for PollEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.timestamp.format("%H:%M:%S"), self.kind)
    }
}

/// Fan-out point for [`PollEvent`]s
pub struct EventHub {
    session: Option<Uuid>,
    capacity: usize,
    log: Mutex<VecDeque<PollEvent>>,
    subscribers: Mutex<Vec<Sender<PollEvent>>>,
}

impl EventHub {
    /// Hub not tied to an engine session
    pub fn new() -> Self {
        Self::with_capacity(None, DEFAULT_EVENT_CAPACITY)
    }

    /// Hub stamping events with an engine session id
    pub fn for_session(session: Uuid) -> Self {
        Self::with_capacity(Some(session), DEFAULT_EVENT_CAPACITY)
    }

    /// Hub with a custom log size
    pub fn with_capacity(session: Option<Uuid>, capacity: usize) -> Self {
        Self {
            session,
            capacity: capacity.max(1),
            log: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Record and distribute an event
    pub fn emit(&self, kind: PollEventKind) {
        let event = PollEvent::new(self.session, kind);

        if event.is_error() {
            tracing::warn!(session = ?self.session, "{}", event.kind);
        } else {
            tracing::info!(session = ?self.session, "{}", event.kind);
        }

        {
            let mut log = self.log.lock();
            if log.len() == self.capacity {
                log.pop_front();
            }
            log.push_back(event.clone());
        }

        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Receive every event emitted from now on
    pub fn subscribe(&self) -> Receiver<PollEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Events currently held in the log, oldest first
    pub fn recent(&self) -> Vec<PollEvent> {
        self.log.lock().iter().cloned().collect()
    }

    /// Empty the log
    pub fn clear(&self) {
        self.log.lock().clear();
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}
