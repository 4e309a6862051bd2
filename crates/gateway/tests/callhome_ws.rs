//! Boots the gateway router on an ephemeral port and drives the call-home
//! endpoint with a real WebSocket client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use ed25519_dalek::{Signer, SigningKey};
use futures_util::{SinkExt, StreamExt};
use nc_callhome::DeviceStatus;
use nc_domain::config::{AllowedDevice, Config};
use nc_domain::{PeerCredential, TransportProtocol};
use nc_gateway::callhome::proof::challenge_payload;
use nc_gateway::state::AppState;
use nc_gateway::{api, bootstrap};
use nc_protocol::callhome::CallHomeMessage;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn dev1() -> SigningKey {
    SigningKey::from_bytes(&[1; 32])
}

/// Authorized-keys line for `key`.
fn ssh_key_line(key: &SigningKey) -> String {
    let public = key.verifying_key();
    let mut blob = Vec::new();
    for field in [b"ssh-ed25519".as_slice(), public.as_bytes().as_slice()] {
        blob.extend_from_slice(&(field.len() as u32).to_be_bytes());
        blob.extend_from_slice(field);
    }
    format!(
        "ssh-ed25519 {}",
        base64::engine::general_purpose::STANDARD.encode(blob)
    )
}

async fn start_gateway(hello_timeout_secs: u64) -> (SocketAddr, AppState) {
    let mut config = Config::default();
    config.callhome.hello_timeout_secs = hello_timeout_secs;
    config.monitoring.update_interval_secs = 0;
    config.callhome.devices = vec![AllowedDevice {
        unique_id: "dev-1".into(),
        address: None,
        ssh_host_key: Some(ssh_key_line(&dev1())),
        tls_fingerprint: None,
    }];
    let state = bootstrap::build_app_state(Arc::new(config)).unwrap();
    let app = api::router().with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    (addr, state)
}

async fn connect(addr: SocketAddr, protocol: &str) -> Client {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/v1/callhome/{protocol}"))
        .await
        .unwrap();
    ws
}

async fn send(ws: &mut Client, msg: &CallHomeMessage) {
    let json = serde_json::to_string(msg).unwrap();
    ws.send(Message::Text(json)).await.unwrap();
}

/// Read the challenge and answer it, signing with `signer`.
async fn hello(
    ws: &mut Client,
    protocol: TransportProtocol,
    credential: PeerCredential,
    signer: &SigningKey,
) {
    let Some(CallHomeMessage::Challenge { nonce }) = recv(ws).await else {
        panic!("expected a challenge first");
    };
    let signature = signer.sign(challenge_payload(protocol, &nonce).as_bytes());
    let signature = base64::engine::general_purpose::STANDARD.encode(signature.to_bytes());
    send(
        ws,
        &CallHomeMessage::DeviceHello {
            credential,
            signature,
        },
    )
    .await;
}

async fn ssh_hello(ws: &mut Client, key: &SigningKey) {
    hello(ws, TransportProtocol::Ssh, ssh_key(key), key).await;
}

/// Next protocol message, skipping control frames. `None` once the
/// socket closes.
async fn recv(ws: &mut Client) -> Option<CallHomeMessage> {
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(frame) = ws.next().await {
            match frame {
                Ok(Message::Text(text)) => return Some(serde_json::from_str(&text).unwrap()),
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => {}
            }
        }
        None
    })
    .await
    .expect("gateway did not answer in time")
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached");
}

fn ssh_key(key: &SigningKey) -> PeerCredential {
    PeerCredential::SshHostKey(ssh_key_line(key))
}

#[tokio::test]
async fn accepted_session_is_registered_until_the_socket_closes() {
    let (addr, state) = start_gateway(5).await;
    let mut ws = connect(addr, "ssh").await;
    ssh_hello(&mut ws, &dev1()).await;

    let Some(CallHomeMessage::Accepted { session_id }) = recv(&mut ws).await else {
        panic!("expected accepted");
    };
    assert_eq!(state.ssh.len(), 1);
    assert!(state.tls.is_empty());
    assert_eq!(state.monitor.list()[0].session_id, session_id);
    assert_eq!(state.status.status("dev-1"), Some(DeviceStatus::Connected));

    send(&mut ws, &CallHomeMessage::Ping { timestamp: 42 }).await;
    assert_eq!(
        recv(&mut ws).await,
        Some(CallHomeMessage::Pong { timestamp: 42 })
    );

    ws.close(None).await.unwrap();
    wait_until(|| state.ssh.is_empty()).await;
    assert!(state.monitor.is_empty());
    assert_eq!(state.status.status("dev-1"), Some(DeviceStatus::Disconnected));
}

#[tokio::test]
async fn duplicate_call_home_is_rejected() {
    let (addr, state) = start_gateway(5).await;
    let mut first = connect(addr, "ssh").await;
    ssh_hello(&mut first, &dev1()).await;
    assert!(matches!(
        recv(&mut first).await,
        Some(CallHomeMessage::Accepted { .. })
    ));

    let mut second = connect(addr, "ssh").await;
    ssh_hello(&mut second, &dev1()).await;
    assert_eq!(
        recv(&mut second).await,
        Some(CallHomeMessage::Rejected {
            reason: "duplicate_session".into()
        })
    );
    assert_eq!(recv(&mut second).await, None);

    // The first session is untouched.
    assert_eq!(state.ssh.len(), 1);
    send(&mut first, &CallHomeMessage::Ping { timestamp: 1 }).await;
    assert_eq!(
        recv(&mut first).await,
        Some(CallHomeMessage::Pong { timestamp: 1 })
    );
}

#[tokio::test]
async fn unknown_device_is_refused_and_recorded() {
    let (addr, state) = start_gateway(5).await;
    let mut ws = connect(addr, "ssh").await;
    ssh_hello(&mut ws, &SigningKey::from_bytes(&[9; 32])).await;

    assert_eq!(
        recv(&mut ws).await,
        Some(CallHomeMessage::Rejected {
            reason: "unknown_peer".into()
        })
    );
    assert!(state.ssh.is_empty());
    let unlisted: Vec<_> = state.status.list().into_iter().filter(|d| !d.listed).collect();
    assert_eq!(unlisted.len(), 1);
    assert_eq!(unlisted[0].status, DeviceStatus::FailedNotAllowed);
}

#[tokio::test]
async fn credential_for_the_other_protocol_fails_auth() {
    let (addr, state) = start_gateway(5).await;
    let mut ws = connect(addr, "tls").await;
    hello(&mut ws, TransportProtocol::Tls, ssh_key(&dev1()), &dev1()).await;

    assert_eq!(
        recv(&mut ws).await,
        Some(CallHomeMessage::Rejected {
            reason: "auth_failed".into()
        })
    );
    assert!(state.tls.is_empty());
    assert_eq!(
        state.status.status("dev-1"),
        Some(DeviceStatus::FailedAuthFailure)
    );
}

#[tokio::test]
async fn silent_device_is_dropped_after_hello_timeout() {
    let (addr, state) = start_gateway(1).await;
    let mut ws = connect(addr, "ssh").await;

    assert!(matches!(
        recv(&mut ws).await,
        Some(CallHomeMessage::Challenge { .. })
    ));
    assert_eq!(recv(&mut ws).await, None);
    assert!(state.ssh.is_empty());
}

#[tokio::test]
async fn listed_key_without_its_private_half_is_refused() {
    let (addr, state) = start_gateway(5).await;
    let impostor = SigningKey::from_bytes(&[6; 32]);

    let mut ws = connect(addr, "ssh").await;
    hello(&mut ws, TransportProtocol::Ssh, ssh_key(&dev1()), &impostor).await;
    assert_eq!(
        recv(&mut ws).await,
        Some(CallHomeMessage::Rejected {
            reason: "auth_failed".into()
        })
    );
    assert!(state.ssh.is_empty());
    assert_eq!(
        state.status.status("dev-1"),
        Some(DeviceStatus::FailedAuthFailure)
    );

    // The real device is not locked out.
    let mut real = connect(addr, "ssh").await;
    ssh_hello(&mut real, &dev1()).await;
    assert!(matches!(
        recv(&mut real).await,
        Some(CallHomeMessage::Accepted { .. })
    ));
    assert_eq!(state.ssh.len(), 1);
}

#[tokio::test]
async fn signature_over_a_previous_challenge_is_refused() {
    let (addr, state) = start_gateway(5).await;
    let key = dev1();

    let mut first = connect(addr, "ssh").await;
    let Some(CallHomeMessage::Challenge { nonce }) = recv(&mut first).await else {
        panic!("expected a challenge first");
    };
    let replayed = base64::engine::general_purpose::STANDARD.encode(
        key.sign(challenge_payload(TransportProtocol::Ssh, &nonce).as_bytes())
            .to_bytes(),
    );
    drop(first);

    let mut second = connect(addr, "ssh").await;
    assert!(matches!(
        recv(&mut second).await,
        Some(CallHomeMessage::Challenge { .. })
    ));
    send(
        &mut second,
        &CallHomeMessage::DeviceHello {
            credential: ssh_key(&key),
            signature: replayed,
        },
    )
    .await;
    assert_eq!(
        recv(&mut second).await,
        Some(CallHomeMessage::Rejected {
            reason: "auth_failed".into()
        })
    );
    assert!(state.ssh.is_empty());
}

#[tokio::test]
async fn unknown_protocol_is_not_found() {
    let (addr, _state) = start_gateway(5).await;
    let result =
        tokio_tungstenite::connect_async(format!("ws://{addr}/v1/callhome/telnet")).await;
    assert!(result.is_err());
}
