use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};

use nc_callhome::{
    CallHomeTransport, DeviceStatus, DeviceStatusTable, ListenerSet, Rejection, SessionContext,
    SessionContextManager, SessionListener, TransportHandle,
};
use nc_domain::config::AllowedDevice;
use nc_domain::{DeviceId, PeerCredential, TransportProtocol};

const DEV1_KEY: &str = "ssh-ed25519 AAAAdev1";
const DEV2_KEY: &str = "ssh-ed25519 AAAAdev2";

fn allowed(id: &str, ssh: Option<&str>, tls: Option<String>) -> AllowedDevice {
    AllowedDevice {
        unique_id: id.into(),
        address: None,
        ssh_host_key: ssh.map(str::to_owned),
        tls_fingerprint: tls,
    }
}

fn table() -> Arc<DeviceStatusTable> {
    Arc::new(DeviceStatusTable::from_config(&[
        allowed("dev-1", Some(DEV1_KEY), Some(tls_cert().fingerprint())),
        allowed("dev-2", Some(DEV2_KEY), None),
    ]))
}

fn tls_cert() -> PeerCredential {
    PeerCredential::TlsCertificate("dev-1-certificate".into())
}

fn manager(protocol: TransportProtocol, table: &Arc<DeviceStatusTable>) -> SessionContextManager {
    SessionContextManager::new(protocol, table.clone(), table.clone(), table.clone())
}

fn ssh_transport(key: &str, port: u16) -> Arc<TransportHandle> {
    let remote: SocketAddr = format!("10.0.0.1:{port}").parse().unwrap();
    Arc::new(TransportHandle::new(
        remote,
        Some(PeerCredential::SshHostKey(key.into())),
    ))
}

#[test]
fn known_device_is_registered_with_its_address() {
    let table = table();
    let mgr = manager(TransportProtocol::Ssh, &table);
    let transport = ssh_transport(DEV1_KEY, 40001);

    let ctx = mgr.on_incoming_connection(transport).unwrap();
    assert_eq!(ctx.id(), &DeviceId::new("dev-1"));
    assert_eq!(ctx.id().address(), Some("10.0.0.1:40001".parse().unwrap()));
    assert_eq!(ctx.protocol(), TransportProtocol::Ssh);
    assert_eq!(mgr.len(), 1);
    assert_eq!(table.status("dev-1"), Some(DeviceStatus::Connected));
}

#[test]
fn second_connection_with_same_identity_is_rejected() {
    let table = table();
    let mgr = manager(TransportProtocol::Ssh, &table);
    let first = ssh_transport(DEV1_KEY, 40001);
    let second = ssh_transport(DEV1_KEY, 40002);

    let registered = mgr.on_incoming_connection(first.clone()).unwrap();
    let rejection = mgr.on_incoming_connection(second.clone()).unwrap_err();
    assert_eq!(
        rejection,
        Rejection::Duplicate {
            device: DeviceId::new("dev-1"),
            existing_session: registered.session_id().to_owned(),
        }
    );

    assert_eq!(mgr.len(), 1);
    let current = mgr.get(&DeviceId::new("dev-1")).unwrap();
    assert_eq!(current.session_id(), registered.session_id());
    assert_eq!(current.remote_address(), first.remote_address());

    // The rejected transport is left open for its owner, and closing it
    // does not touch the registered session.
    assert!(second.is_open());
    second.close();
    assert_eq!(mgr.len(), 1);
    assert_eq!(table.status("dev-1"), Some(DeviceStatus::Connected));
}

#[test]
fn concurrent_registrations_admit_exactly_one() {
    let table = table();
    let mgr = manager(TransportProtocol::Ssh, &table);
    let contenders = 16;
    let barrier = Barrier::new(contenders);
    let wins = AtomicUsize::new(0);
    let duplicates = AtomicUsize::new(0);

    std::thread::scope(|scope| {
        for i in 0..contenders {
            let (mgr, barrier, wins, duplicates) = (&mgr, &barrier, &wins, &duplicates);
            scope.spawn(move || {
                let transport = ssh_transport(DEV1_KEY, 41000 + i as u16);
                barrier.wait();
                match mgr.on_incoming_connection(transport) {
                    Ok(_) => wins.fetch_add(1, Ordering::SeqCst),
                    Err(Rejection::Duplicate { .. }) => duplicates.fetch_add(1, Ordering::SeqCst),
                    Err(other) => panic!("unexpected rejection: {other}"),
                };
            });
        }
    });

    assert_eq!(wins.load(Ordering::SeqCst), 1);
    assert_eq!(duplicates.load(Ordering::SeqCst), contenders - 1);
    assert_eq!(mgr.len(), 1);
}

#[test]
fn closing_a_transport_removes_only_its_session() {
    let table = table();
    let mgr = manager(TransportProtocol::Ssh, &table);
    let one = ssh_transport(DEV1_KEY, 40001);
    let two = ssh_transport(DEV2_KEY, 40002);
    mgr.on_incoming_connection(one.clone()).unwrap();
    mgr.on_incoming_connection(two).unwrap();

    one.close();

    assert_eq!(mgr.len(), 1);
    assert!(mgr.get(&DeviceId::new("dev-1")).is_none());
    assert!(mgr.get(&DeviceId::new("dev-2")).is_some());
    assert_eq!(table.status("dev-1"), Some(DeviceStatus::Disconnected));
    assert_eq!(table.status("dev-2"), Some(DeviceStatus::Connected));

    // The device may call home again once its old session is gone.
    mgr.on_incoming_connection(ssh_transport(DEV1_KEY, 40003))
        .unwrap();
    assert_eq!(mgr.len(), 2);
}

#[test]
fn stale_close_does_not_remove_a_newer_session() {
    let table = table();
    let mgr = manager(TransportProtocol::Ssh, &table);
    let old = ssh_transport(DEV1_KEY, 40001);
    mgr.on_incoming_connection(old.clone()).unwrap();

    mgr.close();
    assert!(mgr.is_empty());
    let newer = mgr
        .on_incoming_connection(ssh_transport(DEV1_KEY, 40002))
        .unwrap();

    old.close();
    let current = mgr.get(&DeviceId::new("dev-1")).unwrap();
    assert_eq!(current.session_id(), newer.session_id());
}

#[test]
fn unknown_peer_is_reported_and_not_registered() {
    let table = table();
    let mgr = manager(TransportProtocol::Ssh, &table);
    let stranger = ssh_transport("ssh-ed25519 AAAAstranger", 40009);

    let rejection = mgr.on_incoming_connection(stranger.clone()).unwrap_err();
    let Rejection::UnknownPeer {
        remote,
        fingerprint,
    } = rejection.clone()
    else {
        panic!("expected unknown peer, got {rejection:?}");
    };
    assert_eq!(remote, stranger.remote_address());
    assert!(fingerprint.is_some());
    assert!(mgr.is_empty());
    assert!(stranger.is_open());

    let unlisted: Vec<_> = table.list().into_iter().filter(|r| !r.listed).collect();
    assert_eq!(unlisted.len(), 1);
    assert_eq!(unlisted[0].status, DeviceStatus::FailedNotAllowed);
}

#[test]
fn transport_without_credential_is_unknown() {
    let table = table();
    let mgr = manager(TransportProtocol::Tls, &table);
    let anonymous = Arc::new(TransportHandle::new("10.0.0.2:1".parse().unwrap(), None));
    let rejection = mgr.on_incoming_connection(anonymous).unwrap_err();
    assert_eq!(rejection.reason(), "unknown_peer");
}

#[test]
fn closed_transport_is_rejected_before_lookup() {
    let table = table();
    let mgr = manager(TransportProtocol::Ssh, &table);
    let transport = ssh_transport(DEV1_KEY, 40001);
    transport.close();

    assert_eq!(
        mgr.on_incoming_connection(transport).unwrap_err(),
        Rejection::TransportClosed
    );
    assert!(mgr.is_empty());
    assert_eq!(table.status("dev-1"), Some(DeviceStatus::Disconnected));
}

#[test]
fn ssh_and_tls_registries_are_independent() {
    let table = table();
    let ssh = manager(TransportProtocol::Ssh, &table);
    let tls = manager(TransportProtocol::Tls, &table);

    ssh.on_incoming_connection(ssh_transport(DEV1_KEY, 40001))
        .unwrap();
    let tls_transport = Arc::new(TransportHandle::new(
        "10.0.0.1:40443".parse().unwrap(),
        Some(tls_cert()),
    ));
    let ctx = tls.on_incoming_connection(tls_transport).unwrap();
    assert_eq!(ctx.id(), &DeviceId::new("dev-1"));
    assert_eq!(ssh.len(), 1);
    assert_eq!(tls.len(), 1);
}

#[derive(Default)]
struct Counting {
    up: AtomicUsize,
    down: AtomicUsize,
}

impl SessionListener for Counting {
    fn session_up(&self, _: &SessionContext) {
        self.up.fetch_add(1, Ordering::SeqCst);
    }

    fn session_down(&self, _: &SessionContext) {
        self.down.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn listener_set_sees_up_then_down() {
    let table = table();
    let counting = Arc::new(Counting::default());
    let listeners = ListenerSet::new().with(table.clone()).with(counting.clone());
    let mgr = SessionContextManager::new(
        TransportProtocol::Ssh,
        table.clone(),
        table.clone(),
        Arc::new(listeners),
    );

    let transport = ssh_transport(DEV1_KEY, 40001);
    mgr.on_incoming_connection(transport.clone()).unwrap();
    let _ = mgr.on_incoming_connection(ssh_transport(DEV1_KEY, 40002));
    assert_eq!(counting.up.load(Ordering::SeqCst), 1);

    transport.close();
    transport.close();
    assert_eq!(counting.down.load(Ordering::SeqCst), 1);
    assert_eq!(table.status("dev-1"), Some(DeviceStatus::Disconnected));
}
