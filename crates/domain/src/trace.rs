use serde::Serialize;

/// Structured trace events emitted across all crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    SessionRegistered {
        device: String,
        protocol: String,
        session_id: String,
        remote: String,
    },
    SessionRejected {
        protocol: String,
        remote: String,
        reason: String,
    },
    SessionRemoved {
        device: String,
        protocol: String,
        session_id: String,
    },
    UnknownPeer {
        protocol: String,
        remote: String,
        fingerprint: Option<String>,
    },
    DeviceStatusChanged {
        device: String,
        status: String,
    },
    MasterUnreachable {
        device: String,
        operation: String,
    },
    SubmitAlreadyClosed {
        device: String,
    },
    WriteSlotExpired {
        device: String,
        idle_ms: u64,
    },
    MonitoringDelta {
        started: usize,
        ended: usize,
        open: usize,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "nc_event");
    }
}
