use std::collections::BTreeMap;

use serde::Serialize;

use crate::monitor::SessionInfo;

/// Sessions that appeared or went away between two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionDelta {
    pub started: Vec<SessionInfo>,
    pub ended: Vec<SessionInfo>,
}

impl SessionDelta {
    pub fn is_empty(&self) -> bool {
        self.started.is_empty() && self.ended.is_empty()
    }
}

/// Remembers the previous snapshot so each tick reports only the change.
#[derive(Debug, Default)]
pub struct DeltaTracker {
    previous: BTreeMap<String, SessionInfo>,
}

impl DeltaTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare `current` against the last snapshot and adopt it.
    /// Returns `None` when nothing started or ended.
    pub fn next(&mut self, current: &[SessionInfo]) -> Option<SessionDelta> {
        let current: BTreeMap<String, SessionInfo> = current
            .iter()
            .map(|s| (s.session_id.clone(), s.clone()))
            .collect();

        let started = current
            .iter()
            .filter(|(id, _)| !self.previous.contains_key(*id))
            .map(|(_, s)| s.clone())
            .collect();
        let ended = self
            .previous
            .iter()
            .filter(|(id, _)| !current.contains_key(*id))
            .map(|(_, s)| s.clone())
            .collect();

        self.previous = current;
        let delta = SessionDelta { started, ended };
        (!delta.is_empty()).then_some(delta)
    }

    /// Number of sessions in the last adopted snapshot.
    pub fn open(&self) -> usize {
        self.previous.len()
    }
}
