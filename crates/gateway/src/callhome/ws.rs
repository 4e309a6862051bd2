//! WebSocket endpoint devices dial to call home.
//!
//! Flow:
//! 1. Device connects to `/v1/callhome/{ssh|tls}`
//! 2. Gateway sends `challenge{nonce}`
//! 3. Device sends `device_hello` with its credential and a signature over
//!    the challenge made with that credential's key
//! 4. Gateway checks the signature, registers the connection with that
//!    protocol's registry and answers `accepted{session_id}`, or
//!    `rejected{reason}` and closes
//! 5. Message loop: `ping`/`pong` until either side closes, which
//!    removes the session

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, Path, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};

use nc_callhome::TransportHandle;
use nc_domain::{PeerCredential, TransportProtocol};
use nc_protocol::callhome::CallHomeMessage;

use super::proof::{challenge_payload, new_nonce, verify_possession};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// GET /v1/callhome/:protocol: upgrade to WebSocket.
pub async fn callhome_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(protocol): Path<String>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    let protocol: TransportProtocol = match protocol.parse() {
        Ok(p) => p,
        Err(e) => return (StatusCode::NOT_FOUND, e).into_response(),
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, protocol, remote))
        .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Socket handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    protocol: TransportProtocol,
    remote: SocketAddr,
) {
    let (mut ws_sink, mut ws_stream) = socket.split();

    // 1. Challenge, then wait for device_hello.
    let nonce = new_nonce();
    let challenge = CallHomeMessage::Challenge {
        nonce: nonce.clone(),
    };
    if send_ws_message(&mut ws_sink, &challenge).await.is_err() {
        tracing::debug!(protocol = %protocol, remote = %remote, "device left before the challenge");
        return;
    }
    let hello_timeout = Duration::from_secs(state.config.callhome.hello_timeout_secs);
    let Some((credential, signature)) = wait_for_hello(&mut ws_stream, hello_timeout).await else {
        tracing::warn!(
            protocol = %protocol,
            remote = %remote,
            "device disconnected or timed out before sending device_hello"
        );
        return;
    };

    // 2. A credential of the other kind cannot authenticate here.
    if credential.protocol() != protocol {
        let device = state.status.report_failed_auth(&credential);
        tracing::warn!(
            protocol = %protocol,
            remote = %remote,
            credential = %credential.protocol(),
            device = ?device.as_ref().map(|d| d.name()),
            "credential does not match the call-home endpoint"
        );
        reject(&mut ws_sink, "auth_failed").await;
        return;
    }

    // 3. The signature over our nonce must verify against the credential.
    let payload = challenge_payload(protocol, &nonce);
    if let Err(e) = verify_possession(&credential, &payload, &signature) {
        let device = state.status.report_failed_auth(&credential);
        tracing::warn!(
            protocol = %protocol,
            remote = %remote,
            device = ?device.as_ref().map(|d| d.name()),
            error = %e,
            "call-home credential not proven"
        );
        reject(&mut ws_sink, "auth_failed").await;
        return;
    }

    // 4. Register. The endpoint owns the transport from here on.
    let transport = Arc::new(TransportHandle::new(remote, Some(credential)));
    let context = match state
        .registry(protocol)
        .on_incoming_connection(transport.clone())
    {
        Ok(context) => context,
        Err(rejection) => {
            transport.close();
            reject(&mut ws_sink, rejection.reason()).await;
            return;
        }
    };

    let accepted = CallHomeMessage::Accepted {
        session_id: context.session_id().to_owned(),
    };
    if send_ws_message(&mut ws_sink, &accepted).await.is_err() {
        tracing::warn!(device = %context.id(), "failed to send accepted");
        transport.close();
        state.status.report_failure(context.id());
        return;
    }

    // 5. Message loop.
    while let Some(Ok(msg)) = ws_stream.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<CallHomeMessage>(&text) {
                Ok(CallHomeMessage::Ping { timestamp }) => {
                    let pong = CallHomeMessage::Pong { timestamp };
                    if send_ws_message(&mut ws_sink, &pong).await.is_err() {
                        break;
                    }
                }
                Ok(CallHomeMessage::Pong { .. }) => {}
                _ => {
                    tracing::debug!(device = %context.id(), "ignoring unexpected message");
                }
            },
            Message::Close(_) => break,
            // axum answers WS-level pings itself.
            _ => {}
        }
    }

    transport.close();
    tracing::info!(
        device = %context.id(),
        protocol = %protocol,
        session_id = %context.session_id(),
        "device disconnected"
    );
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn wait_for_hello(
    stream: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
    timeout: Duration,
) -> Option<(PeerCredential, String)> {
    let hello = tokio::time::timeout(timeout, async {
        while let Some(Ok(msg)) = stream.next().await {
            match msg {
                Message::Text(text) => {
                    if let Ok(CallHomeMessage::DeviceHello {
                        credential,
                        signature,
                    }) = serde_json::from_str::<CallHomeMessage>(&text)
                    {
                        return Some((credential, signature));
                    }
                }
                Message::Close(_) => return None,
                _ => {}
            }
        }
        None
    })
    .await;

    hello.unwrap_or(None)
}

/// Tell the device why it was refused, then close the socket.
async fn reject(sink: &mut (impl SinkExt<Message> + Unpin), reason: &str) {
    let rejected = CallHomeMessage::Rejected {
        reason: reason.to_owned(),
    };
    if send_ws_message(sink, &rejected).await.is_ok() {
        let _ = sink.send(Message::Close(None)).await;
    }
}

async fn send_ws_message(
    sink: &mut (impl SinkExt<Message> + Unpin),
    msg: &CallHomeMessage,
) -> Result<(), ()> {
    let json = serde_json::to_string(msg).map_err(|_| ())?;
    sink.send(Message::Text(json)).await.map_err(|_| ())
}
