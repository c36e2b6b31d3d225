//! In-memory sockets for unit-testing the workers without real transports.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, channel};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use detectmate_config::Address;

use super::listener::lock_unpoisoned;
use super::{
    DialOptions, EngineSocketFactory, ManagerSocketFactory, MessageSocket, SocketError,
};

/// One half of an in-memory duplex socket pair.
pub(crate) struct ChannelSocket {
    tx: Mutex<Option<Sender<Vec<u8>>>>,
    rx: Mutex<Receiver<Vec<u8>>>,
    closed: AtomicBool,
    recv_timeout: Mutex<Duration>,
}

pub(crate) fn channel_pair() -> (Arc<ChannelSocket>, Arc<ChannelSocket>) {
    let (tx_a, rx_b) = channel();
    let (tx_b, rx_a) = channel();
    let make = |tx, rx| {
        Arc::new(ChannelSocket {
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(rx),
            closed: AtomicBool::new(false),
            recv_timeout: Mutex::new(Duration::from_millis(100)),
        })
    };
    (make(tx_a, rx_a), make(tx_b, rx_b))
}

impl MessageSocket for ChannelSocket {
    fn recv(&self) -> Result<Vec<u8>, SocketError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SocketError::Closed);
        }
        let timeout = *lock_unpoisoned(&self.recv_timeout);
        let receiver = lock_unpoisoned(&self.rx);
        match receiver.recv_timeout(timeout) {
            Ok(payload) => Ok(payload),
            Err(RecvTimeoutError::Timeout) => {
                if self.closed.load(Ordering::SeqCst) {
                    Err(SocketError::Closed)
                } else {
                    Err(SocketError::Timeout)
                }
            }
            Err(RecvTimeoutError::Disconnected) => Err(SocketError::Closed),
        }
    }

    fn send(&self, payload: &[u8]) -> Result<(), SocketError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SocketError::Closed);
        }
        let sender = lock_unpoisoned(&self.tx);
        match sender.as_ref() {
            Some(sender) => sender
                .send(payload.to_vec())
                .map_err(|_| SocketError::Closed),
            None => Err(SocketError::Closed),
        }
    }

    fn close(&self) -> Result<(), SocketError> {
        self.closed.store(true, Ordering::SeqCst);
        lock_unpoisoned(&self.tx).take();
        Ok(())
    }

    fn set_recv_timeout(&self, timeout: Duration) {
        *lock_unpoisoned(&self.recv_timeout) = timeout;
    }
}

/// Factory handing out pre-built channel sockets, keyed by address.
///
/// Each `expect(addr)` registers the service-side socket returned for that
/// address and hands back the client half for the test to drive.
#[derive(Default)]
pub(crate) struct ChannelSocketFactory {
    sockets: Mutex<HashMap<String, Arc<ChannelSocket>>>,
}

impl ChannelSocketFactory {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn expect(&self, addr: &Address) -> Arc<ChannelSocket> {
        let (service_half, client_half) = channel_pair();
        lock_unpoisoned(&self.sockets).insert(addr.to_string(), service_half);
        client_half
    }

    fn take(&self, addr: &Address) -> Result<Arc<dyn MessageSocket>, SocketError> {
        lock_unpoisoned(&self.sockets)
            .remove(&addr.to_string())
            .map(|socket| socket as Arc<dyn MessageSocket>)
            .ok_or_else(|| SocketError::Bind {
                endpoint: addr.to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::AddrNotAvailable,
                    "no channel registered for address",
                ),
            })
    }
}

impl ManagerSocketFactory for ChannelSocketFactory {
    fn create(&self, addr: &Address) -> Result<Arc<dyn MessageSocket>, SocketError> {
        self.take(addr)
    }
}

impl EngineSocketFactory for ChannelSocketFactory {
    fn bind(&self, addr: &Address) -> Result<Arc<dyn MessageSocket>, SocketError> {
        self.take(addr)
    }

    fn connect(
        &self,
        addr: &Address,
        _options: DialOptions,
    ) -> Result<Arc<dyn MessageSocket>, SocketError> {
        self.take(addr)
    }
}
