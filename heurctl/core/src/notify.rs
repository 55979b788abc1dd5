//! Notification Emitter
//!
//! Turns session signals into short-lived user notices.
//!
//! Each notice gets a strictly increasing millisecond identity, so two
//! notices with the same text are never merged, and its own expiry timer:
//! it disappears [`NOTICE_TTL`] after it was shown, regardless of what
//! other notices do. Dismissing a notice early cancels its timer. Dropping
//! the center cancels every pending timer.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use tracing::debug;

use crate::commands::{CommandKind, UserCommand};
use crate::session::SessionSignal;

/// How long a notice stays visible
pub const NOTICE_TTL: Duration = Duration::from_millis(5000);

/// Message shown once the reconnect budget is spent
pub const CONNECTION_LOST: &str = "Connection to server lost";

/// Message shown when the server closes the connection normally
pub const CONNECTION_CLOSED: &str = "Connection closed by server";

const EVENT_CAPACITY: usize = 64;

/// Severity of a notice
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    /// A command is on its way
    Pending,
    /// A command was acknowledged or the job finished
    Success,
    /// A job or connection failure
    Error,
    /// A dropped command
    Muted,
}

impl NoticeLevel {
    /// Display color
    pub fn color(self) -> &'static str {
        match self {
            Self::Pending => "orange",
            Self::Success => "green",
            Self::Error => "red",
            Self::Muted => "#333",
        }
    }
}

/// Identity of a notice: emission time in Unix milliseconds, made unique
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NoticeId(i64);

impl NoticeId {
    /// Raw millisecond value
    pub fn as_millis(self) -> i64 {
        self.0
    }
}

impl fmt::Display for NoticeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One user-visible notice
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    /// Unique identity
    pub id: NoticeId,
    /// Text to show
    pub message: String,
    /// Severity
    pub level: NoticeLevel,
}

/// Change to the visible set
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NoticeEvent {
    /// A notice appeared
    Shown(Notice),
    /// A notice timed out
    Expired(NoticeId),
    /// A notice was dismissed
    Dismissed(NoticeId),
}

#[derive(Default)]
struct Inner {
    visible: Vec<Notice>,
    timers: HashMap<NoticeId, AbortHandle>,
    last_id: i64,
}

impl Inner {
    fn next_id(&mut self) -> NoticeId {
        let id = Utc::now().timestamp_millis().max(self.last_id + 1);
        self.last_id = id;
        NoticeId(id)
    }

    fn remove(&mut self, id: NoticeId) -> bool {
        let before = self.visible.len();
        self.visible.retain(|n| n.id != id);
        self.visible.len() != before
    }
}

/// Owns the visible notices and their expiry timers
pub struct NotificationCenter {
    inner: Arc<Mutex<Inner>>,
    ttl: Duration,
    events: broadcast::Sender<NoticeEvent>,
}

impl Default for NotificationCenter {
    fn default() -> Self {
        Self::new(NOTICE_TTL)
    }
}

impl NotificationCenter {
    /// Center whose notices live for `ttl`
    pub fn new(ttl: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            ttl,
            events,
        }
    }

    /// Subscribe to changes of the visible set
    pub fn subscribe(&self) -> broadcast::Receiver<NoticeEvent> {
        self.events.subscribe()
    }

    /// Notices currently visible, oldest first
    pub fn visible(&self) -> Vec<Notice> {
        self.inner.lock().visible.clone()
    }

    /// Show a notice and start its expiry timer
    ///
    /// Must be called from within a Tokio runtime.
    pub fn push(&self, message: impl Into<String>, level: NoticeLevel) -> NoticeId {
        let mut inner = self.inner.lock();
        let id = inner.next_id();
        let notice = Notice {
            id,
            message: message.into(),
            level,
        };
        debug!(%id, level = level.color(), message = %notice.message, "Notice shown");
        inner.visible.push(notice.clone());

        let shared = Arc::clone(&self.inner);
        let events = self.events.clone();
        let ttl = self.ttl;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let removed = {
                let mut inner = shared.lock();
                inner.timers.remove(&id);
                inner.remove(id)
            };
            if removed {
                let _ = events.send(NoticeEvent::Expired(id));
            }
        });
        inner.timers.insert(id, timer.abort_handle());
        drop(inner);

        let _ = self.events.send(NoticeEvent::Shown(notice));
        id
    }

    /// Remove a notice before it expires
    ///
    /// Returns `false` if it was no longer visible.
    pub fn dismiss(&self, id: NoticeId) -> bool {
        let removed = {
            let mut inner = self.inner.lock();
            if let Some(timer) = inner.timers.remove(&id) {
                timer.abort();
            }
            inner.remove(id)
        };
        if removed {
            let _ = self.events.send(NoticeEvent::Dismissed(id));
        }
        removed
    }

    /// Show the notice a session signal calls for, if any
    pub fn observe(&self, signal: &SessionSignal) -> Option<NoticeId> {
        let (message, level) = match signal {
            SessionSignal::Issued { command, resume } => {
                let text = match (command, resume) {
                    (UserCommand::Start, false) => "Starting…",
                    (UserCommand::Start, true) => "Resuming…",
                    (UserCommand::Pause, _) => "Pausing…",
                    (UserCommand::Stop, _) => "Stopping…",
                };
                (text.to_string(), NoticeLevel::Pending)
            }
            SessionSignal::Rejected { reason, .. } => (reason.to_string(), NoticeLevel::Muted),
            SessionSignal::Acknowledged { command, .. } => {
                let text = match command {
                    CommandKind::Start => "Started successfully",
                    CommandKind::Pause => "Paused successfully",
                    CommandKind::Stop => "Stopped successfully",
                    CommandKind::GetParams => return None,
                };
                (text.to_string(), NoticeLevel::Success)
            }
            SessionSignal::Finished { summary } => (
                summary
                    .clone()
                    .unwrap_or_else(|| "Finished successfully".to_string()),
                NoticeLevel::Success,
            ),
            SessionSignal::Failed { reason } => (reason.clone(), NoticeLevel::Error),
            SessionSignal::ProgressChanged(_) | SessionSignal::Resynced { .. } => return None,
        };
        Some(self.push(message, level))
    }

    /// Show the terminal connection-failure notice
    pub fn connection_lost(&self) -> NoticeId {
        self.push(CONNECTION_LOST, NoticeLevel::Error)
    }

    /// Show the notice for a normal close initiated by the server
    pub fn connection_closed(&self) -> NoticeId {
        self.push(CONNECTION_CLOSED, NoticeLevel::Muted)
    }

    /// Cancel every pending timer and clear the visible set
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        for (_, timer) in inner.timers.drain() {
            timer.abort();
        }
        inner.visible.clear();
    }
}

impl Drop for NotificationCenter {
    fn drop(&mut self) {
        self.shutdown();
    }
}
