//! Messages exchanged with a device that dialed in over the call-home
//! WebSocket endpoint.

use nc_domain::PeerCredential;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CallHomeMessage {
    /// Gateway → Device: first frame, the nonce the device must sign.
    Challenge { nonce: String },

    /// Device → Gateway: presents the device's credential with a base64
    /// Ed25519 signature over the challenge, made with that credential's key.
    DeviceHello {
        credential: PeerCredential,
        signature: String,
    },

    /// Gateway → Device: the session was registered.
    Accepted { session_id: String },

    /// Gateway → Device: the session was refused; the socket closes next.
    Rejected { reason: String },

    Ping { timestamp: i64 },
    Pong { timestamp: i64 },
}
