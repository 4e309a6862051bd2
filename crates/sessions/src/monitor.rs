//! Session monitor fed by the call-home registries.
//!
//! Every registry reports session up/down through [`SessionListener`]; the
//! monitor keeps one row per live session and, when a feed is running,
//! broadcasts a [`SessionDelta`] on each tick that saw a change.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use nc_callhome::{SessionContext, SessionListener};
use nc_domain::trace::TraceEvent;
use nc_domain::TransportProtocol;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::delta::{DeltaTracker, SessionDelta};

const FEED_CAPACITY: usize = 64;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session row
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub device: String,
    pub protocol: TransportProtocol,
    pub remote_address: SocketAddr,
    pub login_time: DateTime<Utc>,
}

impl From<&SessionContext> for SessionInfo {
    fn from(ctx: &SessionContext) -> Self {
        Self {
            session_id: ctx.session_id().to_owned(),
            device: ctx.id().name().to_owned(),
            protocol: ctx.protocol(),
            remote_address: ctx.remote_address(),
            login_time: ctx.connected_at(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Monitor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SessionMonitor {
    sessions: RwLock<HashMap<String, SessionInfo>>,
    feed_tx: broadcast::Sender<SessionDelta>,
}

impl Default for SessionMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionMonitor {
    pub fn new() -> Self {
        let (feed_tx, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            sessions: RwLock::new(HashMap::new()),
            feed_tx,
        }
    }

    pub fn record_up(&self, info: SessionInfo) {
        tracing::debug!(
            device = %info.device,
            session_id = %info.session_id,
            protocol = %info.protocol,
            "monitor: session up"
        );
        self.sessions.write().insert(info.session_id.clone(), info);
    }

    pub fn record_down(&self, session_id: &str) -> Option<SessionInfo> {
        let removed = self.sessions.write().remove(session_id);
        if let Some(info) = &removed {
            tracing::debug!(
                device = %info.device,
                session_id = %session_id,
                "monitor: session down"
            );
        }
        removed
    }

    /// Snapshot of live sessions, oldest login first.
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut rows: Vec<_> = self.sessions.read().values().cloned().collect();
        rows.sort_by(|a, b| {
            a.login_time
                .cmp(&b.login_time)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        rows
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionDelta> {
        self.feed_tx.subscribe()
    }

    /// Publish a delta every `interval` in which sessions started or ended.
    /// The first tick fires immediately and reports every session already
    /// live. The task ends when `shutdown` is cancelled.
    pub fn spawn_feed(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut tracker = DeltaTracker::new();
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(interval_ms = interval.as_millis() as u64, "session feed started");

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => monitor.publish(&mut tracker),
                }
            }
            tracing::info!("session feed stopped");
        })
    }

    fn publish(&self, tracker: &mut DeltaTracker) {
        let Some(delta) = tracker.next(&self.list()) else {
            return;
        };
        TraceEvent::MonitoringDelta {
            started: delta.started.len(),
            ended: delta.ended.len(),
            open: tracker.open(),
        }
        .emit();
        // No subscribers is fine; the delta is still traced.
        let _ = self.feed_tx.send(delta);
    }
}

impl SessionListener for SessionMonitor {
    fn session_up(&self, session: &SessionContext) {
        self.record_up(SessionInfo::from(session));
    }

    fn session_down(&self, session: &SessionContext) {
        self.record_down(session.session_id());
    }
}
