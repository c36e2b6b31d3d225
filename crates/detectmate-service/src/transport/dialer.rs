//! Dialing message socket for engine output peers.
//!
//! Output peers may come up after the service: a background thread keeps
//! retrying the dial until the socket is closed. While no peer is attached,
//! sends are buffered up to the configured buffer size and flushed in order
//! on attach; once the buffer is full, `send()` blocks. Back-pressure is
//! deliberate: a slow or absent peer stalls the sender instead of dropping
//! the message.

use std::collections::VecDeque;
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use detectmate_config::Address;

use super::frame::{extract_frame, write_frame};
use super::listener::lock_unpoisoned;
use super::socket::DialOptions;
use super::stream::{PeerStream, unsupported};
use super::{ACCEPT_BACKOFF, DIAL_BACKOFF, READ_SLICE, SocketError, TRANSPORT_TARGET};

#[derive(Debug)]
pub(crate) struct StreamDialSocket {
    shared: Arc<DialShared>,
}

#[derive(Debug)]
struct DialShared {
    endpoint: Address,
    options: DialOptions,
    closed: AtomicBool,
    recv_timeout: Mutex<Duration>,
    state: Mutex<DialState>,
    attached: Condvar,
}

#[derive(Debug, Default)]
struct DialState {
    peer: Option<PeerStream>,
    recv_buf: Vec<u8>,
    pending: VecDeque<Vec<u8>>,
    pending_bytes: usize,
}

impl StreamDialSocket {
    pub(crate) fn connect(endpoint: &Address, options: DialOptions) -> Result<Self, SocketError> {
        if !matches!(endpoint, Address::Ipc { .. } | Address::Tcp { .. }) {
            return Err(unsupported(endpoint));
        }

        let shared = Arc::new(DialShared {
            endpoint: endpoint.clone(),
            options,
            closed: AtomicBool::new(false),
            recv_timeout: Mutex::new(Duration::from_millis(100)),
            state: Mutex::new(DialState::default()),
            attached: Condvar::new(),
        });

        let dialer = Arc::clone(&shared);
        thread::spawn(move || run_dial_loop(&dialer));

        Ok(Self { shared })
    }

    /// Sends one message to the peer, or into the detached-send buffer.
    ///
    /// Blocks only when no peer is attached and the buffer has no room for
    /// the payload; `close()` unblocks a parked sender.
    pub(crate) fn send(&self, payload: &[u8]) -> Result<(), SocketError> {
        let mut state = lock_unpoisoned(&self.shared.state);
        loop {
            if self.shared.closed.load(Ordering::SeqCst) {
                return Err(SocketError::Closed);
            }
            if state.peer.is_some() {
                break;
            }
            if state.pending_bytes + payload.len() <= self.shared.options.buffer_size {
                state.pending.push_back(payload.to_vec());
                state.pending_bytes += payload.len();
                return Ok(());
            }
            let (next, _timeout) = self
                .shared
                .attached
                .wait_timeout(state, ACCEPT_BACKOFF)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            state = next;
        }

        // The dialer drains the buffer under the lock when it attaches a
        // peer, so a visible peer implies an empty buffer.
        let Some(peer) = state.peer.as_mut() else {
            return Err(SocketError::NoPeer);
        };
        match write_frame(peer, payload) {
            Ok(()) => Ok(()),
            Err(source) => {
                state.peer = None;
                state.recv_buf.clear();
                Err(SocketError::Io { source })
            }
        }
    }

    pub(crate) fn recv(&self) -> Result<Vec<u8>, SocketError> {
        let timeout = *lock_unpoisoned(&self.shared.recv_timeout);
        let deadline = Instant::now() + timeout;
        let mut state = lock_unpoisoned(&self.shared.state);

        loop {
            if self.shared.closed.load(Ordering::SeqCst) {
                return Err(SocketError::Closed);
            }

            if state.peer.is_none() {
                if Instant::now() >= deadline {
                    return Err(SocketError::Timeout);
                }
                let (next, _timeout) = self
                    .shared
                    .attached
                    .wait_timeout(state, ACCEPT_BACKOFF)
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                state = next;
                continue;
            }

            let Some(peer) = state.peer.as_mut() else {
                continue;
            };
            peer.set_read_timeout(Some(READ_SLICE.min(timeout.max(Duration::from_millis(1)))))
                .map_err(SocketError::from_io)?;

            let mut chunk = [0_u8; 4096];
            match peer.read(&mut chunk) {
                Ok(0) => {
                    debug!(target: TRANSPORT_TARGET, endpoint = %self.shared.endpoint, "output peer detached");
                    state.peer = None;
                    state.recv_buf.clear();
                }
                Ok(read) => {
                    state.recv_buf.extend_from_slice(&chunk[..read]);
                    match extract_frame(&mut state.recv_buf) {
                        Ok(Some(frame)) => return Ok(frame),
                        Ok(None) => {}
                        Err(source) => {
                            state.peer = None;
                            state.recv_buf.clear();
                            return Err(SocketError::Io { source });
                        }
                    }
                }
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error)
                    if error.kind() == io::ErrorKind::WouldBlock
                        || error.kind() == io::ErrorKind::TimedOut =>
                {
                    if Instant::now() >= deadline {
                        return Err(SocketError::Timeout);
                    }
                }
                Err(source) => {
                    state.peer = None;
                    state.recv_buf.clear();
                    return Err(SocketError::Io { source });
                }
            }
        }
    }

    pub(crate) fn close(&self) -> Result<(), SocketError> {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.attached.notify_all();
        Ok(())
    }

    pub(crate) fn set_recv_timeout(&self, timeout: Duration) {
        *lock_unpoisoned(&self.shared.recv_timeout) = timeout;
    }
}

fn run_dial_loop(shared: &DialShared) {
    let mut last_error: Option<io::ErrorKind> = None;
    while !shared.closed.load(Ordering::SeqCst) {
        let detached = lock_unpoisoned(&shared.state).peer.is_none();
        if !detached {
            thread::sleep(DIAL_BACKOFF);
            continue;
        }

        match PeerStream::connect(
            &shared.endpoint,
            shared.options.dial_timeout,
            Some(shared.options.buffer_size),
        ) {
            Ok(peer) => {
                let mut state = lock_unpoisoned(&shared.state);
                if shared.closed.load(Ordering::SeqCst) {
                    break;
                }
                debug!(target: TRANSPORT_TARGET, endpoint = %shared.endpoint, "output peer attached");
                last_error = None;
                state.recv_buf.clear();
                state.peer = Some(peer);
                flush_pending(&mut state, &shared.endpoint);
                shared.attached.notify_all();
            }
            Err(error) => {
                let kind = match &error {
                    SocketError::Io { source }
                    | SocketError::Resolve { source, .. }
                    | SocketError::Bind { source, .. } => Some(source.kind()),
                    _ => None,
                };
                if last_error != kind {
                    warn!(
                        target: TRANSPORT_TARGET,
                        endpoint = %shared.endpoint,
                        error = %error,
                        "output dial failed, retrying"
                    );
                }
                last_error = kind;
                thread::sleep(DIAL_BACKOFF);
            }
        }
    }

    if let Some(peer) = lock_unpoisoned(&shared.state).peer.take() {
        drop(peer);
    }
}

/// Writes buffered messages to the freshly attached peer, in order.
///
/// A write failure detaches the peer again; the failed message is dropped
/// (it is partially on the wire) and the rest stay buffered for the next
/// attach.
fn flush_pending(state: &mut DialState, endpoint: &Address) {
    while !state.pending.is_empty() {
        let Some(payload) = state.pending.front() else {
            break;
        };
        let Some(peer) = state.peer.as_mut() else {
            break;
        };
        match write_frame(peer, payload) {
            Ok(()) => {
                if let Some(sent) = state.pending.pop_front() {
                    state.pending_bytes -= sent.len();
                }
            }
            Err(error) => {
                warn!(
                    target: TRANSPORT_TARGET,
                    endpoint = %endpoint,
                    %error,
                    "failed to flush buffered message"
                );
                if let Some(dropped) = state.pending.pop_front() {
                    state.pending_bytes -= dropped.len();
                }
                state.peer = None;
                state.recv_buf.clear();
                break;
            }
        }
    }
}

impl Drop for StreamDialSocket {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.attached.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::super::listener::StreamListenerSocket;
    use super::*;

    #[test]
    fn unsupported_schemes_are_rejected() {
        let endpoint: Address = "inproc://outputs".parse().expect("valid address");
        let error = StreamDialSocket::connect(
            &endpoint,
            DialOptions {
                dial_timeout: Duration::from_millis(100),
                buffer_size: 8192,
            },
        )
        .expect_err("inproc has no stream implementation");
        assert!(matches!(error, SocketError::UnsupportedTransport { .. }));
    }

    #[test]
    fn buffered_sends_are_delivered_once_the_peer_appears() {
        let probe = StreamListenerSocket::bind(&Address::tcp("127.0.0.1", 0)).expect("probe bind");
        let port = probe.local_port().expect("tcp port");
        let target = Address::tcp("127.0.0.1", port);
        drop(probe);

        let dialer = StreamDialSocket::connect(
            &target,
            DialOptions {
                dial_timeout: Duration::from_millis(200),
                buffer_size: 8192,
            },
        )
        .expect("dial");

        // No listener yet: both messages land in the detached-send buffer.
        dialer.send(b"first").expect("buffered send");
        dialer.send(b"second").expect("buffered send");

        let listener = StreamListenerSocket::bind(&target).expect("late bind");
        listener.set_recv_timeout(Duration::from_millis(2000));
        assert_eq!(listener.recv().expect("first delivery"), b"first");
        assert_eq!(listener.recv().expect("second delivery"), b"second");

        dialer.close().expect("close");
        listener.close().expect("close");
    }

    #[test]
    fn send_blocks_when_the_buffer_is_full_and_close_unblocks_it() {
        let dialer = Arc::new(
            StreamDialSocket::connect(
                &Address::tcp("127.0.0.1", 1),
                DialOptions {
                    dial_timeout: Duration::from_millis(100),
                    buffer_size: 8,
                },
            )
            .expect("dial"),
        );

        let sender = Arc::clone(&dialer);
        let handle = std::thread::spawn(move || sender.send(b"larger than the buffer"));
        std::thread::sleep(Duration::from_millis(100));
        assert!(!handle.is_finished(), "oversized send must park");
        dialer.close().expect("close");

        let result = handle.join().expect("join sender");
        assert!(matches!(result, Err(SocketError::Closed)));
    }
}
