use std::net::SocketAddr;

use nc_domain::PeerCredential;
use parking_lot::Mutex;

pub type CloseCallback = Box<dyn FnOnce() + Send>;

/// An inbound transport connection whose handshake has completed.
pub trait CallHomeTransport: Send + Sync {
    fn is_open(&self) -> bool;

    /// Authenticated peer material, if the handshake produced any.
    fn peer_credential(&self) -> Option<PeerCredential>;

    fn remote_address(&self) -> SocketAddr;

    /// Run `callback` once when the transport closes. Runs it immediately
    /// if the transport is already closed.
    fn on_close(&self, callback: CloseCallback);
}

struct State {
    closed: bool,
    callbacks: Vec<CloseCallback>,
}

/// Transport state shared between the connection owner (which calls
/// [`TransportHandle::close`]) and the session registry.
pub struct TransportHandle {
    remote: SocketAddr,
    credential: Option<PeerCredential>,
    state: Mutex<State>,
}

impl TransportHandle {
    pub fn new(remote: SocketAddr, credential: Option<PeerCredential>) -> Self {
        Self {
            remote,
            credential,
            state: Mutex::new(State {
                closed: false,
                callbacks: Vec::new(),
            }),
        }
    }

    /// Mark closed and fire close callbacks. Later calls do nothing.
    pub fn close(&self) {
        let callbacks = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            std::mem::take(&mut state.callbacks)
        };
        for callback in callbacks {
            callback();
        }
    }
}

impl CallHomeTransport for TransportHandle {
    fn is_open(&self) -> bool {
        !self.state.lock().closed
    }

    fn peer_credential(&self) -> Option<PeerCredential> {
        self.credential.clone()
    }

    fn remote_address(&self) -> SocketAddr {
        self.remote
    }

    fn on_close(&self, callback: CloseCallback) {
        let mut state = self.state.lock();
        if !state.closed {
            state.callbacks.push(callback);
            return;
        }
        drop(state);
        callback();
    }
}
