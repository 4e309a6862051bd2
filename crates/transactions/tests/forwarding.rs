//! End-to-end forwarding between proxy handles and a master task, both
//! in-process and across a frame link with simulated network delay.

use std::sync::Arc;
use std::time::Duration;

use nc_domain::config::ClusterConfig;
use nc_domain::{DataPath, DeviceError, DeviceId, ErrorTag, Store};
use nc_protocol::ClusterFrame;
use nc_transactions::{
    serve_link, spawn_master, spawn_reply_reader, ClusterLink, LocalMaster, MasterTxContext,
    MemoryDevice, ProxyReadHandle, ProxyWriteHandle, TxError, TxState,
};
use serde_json::json;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

const ASK_TIMEOUT: Duration = Duration::from_secs(5);

fn local_master(idle: Option<Duration>) -> (MemoryDevice, LocalMaster) {
    let device = MemoryDevice::new();
    let ctx = MasterTxContext::new(DeviceId::new("dev-1"), Arc::new(device.clone()));
    let (master, _task) = spawn_master(ctx, idle);
    (device, master)
}

/// A proxy-side link to a master on another "node".
///
/// Frames from the proxy pass through a relay that delays each one by the
/// next entry of `delays` while keeping send order, and that holds all
/// traffic while the gate is closed.
struct Cluster {
    device: MemoryDevice,
    link: Arc<ClusterLink>,
    gate: watch::Sender<bool>,
    config: ClusterConfig,
}

impl Cluster {
    fn new(delays: Vec<Duration>, idle: Option<Duration>) -> Self {
        let config = ClusterConfig {
            ask_timeout_ms: ASK_TIMEOUT.as_millis() as u64,
            write_tx_idle_timeout_secs: idle.map(|d| d.as_secs()).unwrap_or(0),
            ..ClusterConfig::default()
        };
        let (device, master) = local_master(config.write_tx_idle_timeout());
        let (proxy_out, relay_in) = mpsc::unbounded_channel();
        let (relay_out, master_in) = mpsc::unbounded_channel();
        let (master_out, proxy_in) = mpsc::unbounded_channel();
        let (gate, gate_rx) = watch::channel(true);

        tokio::spawn(relay(relay_in, relay_out, delays, gate_rx));
        tokio::spawn(serve_link(master, master_in, master_out, ASK_TIMEOUT));

        let link = Arc::new(ClusterLink::from_config(
            DeviceId::new("dev-1"),
            proxy_out,
            &config,
        ));
        spawn_reply_reader(link.clone(), proxy_in);
        Self {
            device,
            link,
            gate,
            config,
        }
    }

    fn writer(&self) -> ProxyWriteHandle {
        ProxyWriteHandle::from_config(self.link.clone(), &self.config)
    }

    fn reader(&self) -> ProxyReadHandle {
        ProxyReadHandle::from_config(self.link.clone(), &self.config)
    }

    fn hold(&self) {
        let _ = self.gate.send(false);
    }

    fn release(&self) {
        let _ = self.gate.send(true);
    }
}

async fn relay(
    mut from: mpsc::UnboundedReceiver<ClusterFrame>,
    to: mpsc::UnboundedSender<ClusterFrame>,
    delays: Vec<Duration>,
    mut gate: watch::Receiver<bool>,
) {
    let mut release_at = Instant::now();
    let mut n = 0usize;
    while let Some(frame) = from.recv().await {
        let delay = if delays.is_empty() {
            Duration::ZERO
        } else {
            delays[n % delays.len()]
        };
        n += 1;
        release_at = release_at.max(Instant::now() + delay);
        tokio::time::sleep_until(release_at).await;
        loop {
            let open = *gate.borrow();
            if open {
                break;
            }
            if gate.changed().await.is_err() {
                return;
            }
        }
        if to.send(frame).is_err() {
            return;
        }
    }
}

fn path(raw: &str) -> DataPath {
    DataPath::parse(raw)
}

// ── Local mailbox ─────────────────────────────────────────────────

#[tokio::test]
async fn open_put_submit_reaches_device() {
    let (device, master) = local_master(None);
    let handle = ProxyWriteHandle::new(Arc::new(master), ASK_TIMEOUT);

    handle.open().await.unwrap();
    handle
        .put(Store::Configuration, path("/a"), json!("X"))
        .unwrap();
    handle.submit().await.unwrap();

    assert_eq!(device.snapshot(Store::Configuration, &path("/a")), Some(json!("X")));
    assert_eq!(handle.state(), TxState::Closed);
}

#[tokio::test]
async fn second_open_never_reaches_master() {
    let (_device, master) = local_master(None);
    let handle = ProxyWriteHandle::new(Arc::new(master), ASK_TIMEOUT);
    handle.open().await.unwrap();

    // A master-side rejection would surface as a device `in-use` error.
    for _ in 0..3 {
        let err = handle.open().await.unwrap_err();
        assert!(matches!(err, TxError::TransactionInUse { .. }), "{err:?}");
    }
    handle.submit().await.unwrap();
    handle.open().await.unwrap();
}

#[tokio::test]
async fn two_handles_share_the_master_write_slot() {
    let (_device, master) = local_master(None);
    let master = Arc::new(master);
    let first = ProxyWriteHandle::new(master.clone(), ASK_TIMEOUT);
    let second = ProxyWriteHandle::new(master, ASK_TIMEOUT);

    first.open().await.unwrap();
    let err = second.open().await.unwrap_err();
    assert_eq!(err.error_tag(), ErrorTag::InUse);
    assert_eq!(second.state(), TxState::Closed);

    assert!(first.cancel().await);
    second.open().await.unwrap();
}

#[tokio::test]
async fn failed_commit_resets_both_sides() {
    let (device, master) = local_master(None);
    let handle = ProxyWriteHandle::new(Arc::new(master), ASK_TIMEOUT);
    device.fail_next_commit(DeviceError::operation_failed("validation failed"));

    handle.open().await.unwrap();
    handle
        .merge(Store::Configuration, path("/a"), json!({"b": 1}))
        .unwrap();
    let err = handle.submit().await.unwrap_err();
    assert_eq!(
        err,
        TxError::Device(DeviceError::operation_failed("validation failed"))
    );
    assert_eq!(handle.state(), TxState::Closed);

    handle.open().await.unwrap();
    handle.submit().await.unwrap();
}

#[tokio::test]
async fn read_of_missing_data_is_absent() {
    let (device, master) = local_master(None);
    device
        .seed(Store::Operational, &path("/y"), json!(1))
        .unwrap();
    let reader = ProxyReadHandle::new(Arc::new(master), ASK_TIMEOUT);

    assert_eq!(reader.read(Store::Operational, path("/x")).await, Ok(None));
    assert!(!reader.exists(Store::Operational, path("/x")).await.unwrap());
    assert!(reader.exists(Store::Operational, path("/y")).await.unwrap());
}

#[tokio::test]
async fn device_read_errors_reach_the_proxy() {
    let (device, master) = local_master(None);
    device.set_read_failure(Some(DeviceError::operation_failed("session dropped")));
    let reader = ProxyReadHandle::new(Arc::new(master), ASK_TIMEOUT);
    let err = reader.read(Store::Operational, path("/x")).await.unwrap_err();
    assert_eq!(
        err,
        TxError::Device(DeviceError::operation_failed("session dropped"))
    );
}

#[tokio::test(start_paused = true)]
async fn writes_after_idle_expiry_never_commit() {
    let (device, master) = local_master(Some(Duration::from_secs(30)));
    let handle = ProxyWriteHandle::new(Arc::new(master), ASK_TIMEOUT);

    handle.open().await.unwrap();
    handle.put(Store::Configuration, path("/a"), json!(1)).unwrap();
    tokio::time::sleep(Duration::from_secs(31)).await;

    // The handle still looks open, but the master dropped its transaction.
    assert_eq!(handle.state(), TxState::Open);
    handle.put(Store::Configuration, path("/b"), json!(2)).unwrap();
    let err = handle.submit().await.unwrap_err();
    assert!(matches!(err, TxError::AlreadyClosed { .. }), "{err:?}");
    assert!(device.snapshot(Store::Configuration, &path("/a")).is_none());
    assert!(device.snapshot(Store::Configuration, &path("/b")).is_none());
    assert_eq!(device.commit_count(), 0);

    handle.open().await.unwrap();
    handle.put(Store::Configuration, path("/c"), json!(3)).unwrap();
    handle.submit().await.unwrap();
    assert_eq!(device.snapshot(Store::Configuration, &path("/c")), Some(json!(3)));
}

// ── Across a link ─────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn scenario_open_put_submit_over_link() {
    let cluster = Cluster::new(vec![], None);
    let handle = cluster.writer();

    handle.open().await.unwrap();
    handle
        .put(Store::Configuration, path("/a"), json!("X"))
        .unwrap();
    handle.submit().await.unwrap();

    assert_eq!(
        cluster.device.snapshot(Store::Configuration, &path("/a")),
        Some(json!("X"))
    );
    assert_eq!(handle.state(), TxState::Closed);
    assert_eq!(cluster.link.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn puts_land_before_submit_whatever_the_delay() {
    // open, put, put, delete, submit: early frames are slow, later ones fast.
    let delays = vec![
        Duration::ZERO,
        Duration::from_millis(400),
        Duration::from_millis(250),
        Duration::from_millis(100),
        Duration::ZERO,
    ];
    let cluster = Cluster::new(delays, None);
    cluster
        .device
        .seed(Store::Configuration, &path("/old"), json!(true))
        .unwrap();
    let handle = cluster.writer();

    handle.open().await.unwrap();
    handle
        .put(Store::Configuration, path("/a/b"), json!(1))
        .unwrap();
    handle
        .put(Store::Configuration, path("/a/c"), json!(2))
        .unwrap();
    handle.delete(Store::Configuration, path("/old")).unwrap();
    handle.submit().await.unwrap();

    assert_eq!(
        cluster.device.snapshot(Store::Configuration, &path("/a")),
        Some(json!({"b": 1, "c": 2}))
    );
    assert!(cluster
        .device
        .snapshot(Store::Configuration, &path("/old"))
        .is_none());
    assert_eq!(cluster.device.commit_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn unresponsive_master_on_submit() {
    let cluster = Cluster::new(vec![], None);
    let handle = cluster.writer();
    handle.open().await.unwrap();

    cluster.hold();
    let started = Instant::now();
    let err = handle.submit().await.unwrap_err();
    assert!(matches!(err, TxError::MasterUnreachable { .. }));
    assert!(started.elapsed() >= ASK_TIMEOUT);
    assert_eq!(handle.state(), TxState::Closed);
    assert_eq!(cluster.link.pending_count(), 0);

    // The held submit is delivered first, freeing the master's slot.
    cluster.release();
    handle.open().await.unwrap();
    assert_eq!(handle.state(), TxState::Open);
}

#[tokio::test(start_paused = true)]
async fn timeouts_never_leave_a_handle_open() {
    let cluster = Cluster::new(vec![], None);
    let handle = cluster.writer();

    cluster.hold();
    let err = handle.open().await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(handle.state(), TxState::Closed);

    let cluster = Cluster::new(vec![], None);
    let handle = cluster.writer();
    handle.open().await.unwrap();
    cluster.hold();
    assert!(!handle.cancel().await);
    assert_eq!(handle.state(), TxState::Closed);

    let cluster = Cluster::new(vec![], None);
    let handle = cluster.writer();
    handle.open().await.unwrap();
    cluster.hold();
    assert!(handle.submit().await.unwrap_err().is_retryable());
    assert_eq!(handle.state(), TxState::Closed);
}

#[tokio::test(start_paused = true)]
async fn open_answered_after_the_timeout_does_not_lock_the_device() {
    let cluster = Cluster::new(vec![], None);
    let first = cluster.writer();

    cluster.hold();
    let err = first.open().await.unwrap_err();
    assert!(matches!(err, TxError::MasterUnreachable { .. }));
    assert_eq!(first.state(), TxState::Closed);

    // The held open reaches the master late and reserves the slot, but the
    // release told after the timeout follows it.
    cluster.release();
    let second = cluster.writer();
    second.open().await.unwrap();
    second.put(Store::Configuration, path("/b"), json!(2)).unwrap();
    second.submit().await.unwrap();
    assert_eq!(
        cluster.device.snapshot(Store::Configuration, &path("/b")),
        Some(json!(2))
    );

    // The timed-out handle retries cleanly too.
    first.open().await.unwrap();
    assert!(first.cancel().await);
    first.open().await.unwrap();
    assert_eq!(first.state(), TxState::Open);
}

#[tokio::test(start_paused = true)]
async fn abandoned_transaction_expires_on_master() {
    let cluster = Cluster::new(vec![], Some(Duration::from_secs(120)));
    let stale = cluster.writer();
    stale.open().await.unwrap();
    stale
        .put(Store::Configuration, path("/a"), json!(1))
        .unwrap();
    drop(stale);

    let fresh = cluster.writer();
    assert_eq!(fresh.open().await.unwrap_err().error_tag(), ErrorTag::InUse);

    tokio::time::sleep(Duration::from_secs(121)).await;
    fresh.open().await.unwrap();
    fresh.submit().await.unwrap();
    assert!(cluster
        .device
        .snapshot(Store::Configuration, &path("/a"))
        .is_none());
}

#[tokio::test(start_paused = true)]
async fn read_over_link() {
    let cluster = Cluster::new(vec![Duration::from_millis(20)], None);
    cluster
        .device
        .seed(Store::Operational, &path("/if/eth0"), json!({"oper": "up"}))
        .unwrap();
    let reader = cluster.reader();

    assert_eq!(reader.read(Store::Operational, path("/x")).await, Ok(None));
    let node = reader
        .read(Store::Operational, path("/if/eth0"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(node.path, path("/if/eth0"));
    assert_eq!(node.data, json!({"oper": "up"}));

    cluster.hold();
    let err = reader
        .read(Store::Operational, path("/if"))
        .await
        .unwrap_err();
    assert!(err.is_retryable());
}
