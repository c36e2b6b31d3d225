//! Bound message socket for the engine input and manager command channels.
//!
//! The socket accepts one peer at a time and goes back to accepting when the
//! peer disconnects, so a replacement client can attach to a long-lived
//! service. Receives are sliced into short reads with the close flag checked
//! in between, which lets `close()` unblock a pending `recv()` from any
//! thread without touching the reader's lock.

use std::io::{self, Read};
use std::net::TcpListener;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use detectmate_config::Address;

use super::frame::{extract_frame, write_frame};
use super::stream::{PeerStream, resolve_tcp, unsupported};
use super::{ACCEPT_BACKOFF, READ_SLICE, SocketError, TRANSPORT_TARGET};

#[cfg(unix)]
use std::fs;
#[cfg(unix)]
use std::os::unix::net::UnixListener;

pub(crate) struct StreamListenerSocket {
    endpoint: Address,
    closed: AtomicBool,
    recv_timeout: Mutex<Duration>,
    inner: Mutex<ListenerInner>,
}

struct ListenerInner {
    listener: ListenerKind,
    peer: Option<PeerStream>,
    recv_buf: Vec<u8>,
}

enum ListenerKind {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

impl StreamListenerSocket {
    pub(crate) fn bind(endpoint: &Address) -> Result<Self, SocketError> {
        let listener = match endpoint {
            Address::Tcp { host, port } => {
                let addr = resolve_tcp(host, *port, endpoint)?;
                let listener = TcpListener::bind(addr).map_err(|source| SocketError::Bind {
                    endpoint: endpoint.to_string(),
                    source,
                })?;
                listener
                    .set_nonblocking(true)
                    .map_err(SocketError::from_io)?;
                ListenerKind::Tcp(listener)
            }
            Address::Ipc { path } => {
                #[cfg(unix)]
                {
                    remove_stale_socket(path.as_str())?;
                    let listener = UnixListener::bind(path.as_std_path()).map_err(|source| {
                        SocketError::Bind {
                            endpoint: endpoint.to_string(),
                            source,
                        }
                    })?;
                    listener
                        .set_nonblocking(true)
                        .map_err(SocketError::from_io)?;
                    ListenerKind::Unix(listener)
                }

                #[cfg(not(unix))]
                {
                    let _ = path;
                    return Err(unsupported(endpoint));
                }
            }
            _ => return Err(unsupported(endpoint)),
        };

        debug!(target: TRANSPORT_TARGET, endpoint = %endpoint, "socket listening");
        Ok(Self {
            endpoint: endpoint.clone(),
            closed: AtomicBool::new(false),
            recv_timeout: Mutex::new(Duration::from_millis(100)),
            inner: Mutex::new(ListenerInner {
                listener,
                peer: None,
                recv_buf: Vec::new(),
            }),
        })
    }

    #[cfg(test)]
    pub(crate) fn local_port(&self) -> Option<u16> {
        let inner = lock_unpoisoned(&self.inner);
        match &inner.listener {
            ListenerKind::Tcp(listener) => listener.local_addr().ok().map(|addr| addr.port()),
            #[cfg(unix)]
            ListenerKind::Unix(_) => None,
        }
    }

    pub(crate) fn recv(&self) -> Result<Vec<u8>, SocketError> {
        let timeout = *lock_unpoisoned(&self.recv_timeout);
        let deadline = Instant::now() + timeout;
        let mut inner = lock_unpoisoned(&self.inner);

        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(SocketError::Closed);
            }

            if inner.peer.is_none() {
                match accept_peer(&inner.listener) {
                    Ok(Some(peer)) => {
                        debug!(target: TRANSPORT_TARGET, endpoint = %self.endpoint, "peer attached");
                        inner.recv_buf.clear();
                        inner.peer = Some(peer);
                    }
                    Ok(None) => {
                        if Instant::now() >= deadline {
                            return Err(SocketError::Timeout);
                        }
                        thread::sleep(ACCEPT_BACKOFF.min(timeout));
                        continue;
                    }
                    Err(source) => return Err(SocketError::Io { source }),
                }
            }

            let Some(peer) = inner.peer.as_mut() else {
                continue;
            };
            peer.set_read_timeout(Some(READ_SLICE.min(timeout.max(Duration::from_millis(1)))))
                .map_err(SocketError::from_io)?;

            let mut chunk = [0_u8; 4096];
            match peer.read(&mut chunk) {
                Ok(0) => {
                    debug!(target: TRANSPORT_TARGET, endpoint = %self.endpoint, "peer detached");
                    inner.peer = None;
                    inner.recv_buf.clear();
                }
                Ok(read) => {
                    inner.recv_buf.extend_from_slice(&chunk[..read]);
                    match extract_frame(&mut inner.recv_buf) {
                        Ok(Some(frame)) => return Ok(frame),
                        Ok(None) => {}
                        Err(source) => {
                            inner.peer = None;
                            inner.recv_buf.clear();
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
                    inner.peer = None;
                    inner.recv_buf.clear();
                    return Err(SocketError::Io { source });
                }
            }
        }
    }

    pub(crate) fn send(&self, payload: &[u8]) -> Result<(), SocketError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SocketError::Closed);
        }
        let mut inner = lock_unpoisoned(&self.inner);
        let Some(peer) = inner.peer.as_mut() else {
            return Err(SocketError::NoPeer);
        };
        match write_frame(peer, payload) {
            Ok(()) => Ok(()),
            Err(source) => {
                inner.peer = None;
                inner.recv_buf.clear();
                Err(SocketError::Io { source })
            }
        }
    }

    pub(crate) fn close(&self) -> Result<(), SocketError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        #[cfg(unix)]
        cleanup_ipc_socket(&self.endpoint);
        Ok(())
    }

    pub(crate) fn set_recv_timeout(&self, timeout: Duration) {
        *lock_unpoisoned(&self.recv_timeout) = timeout;
    }
}

impl Drop for StreamListenerSocket {
    fn drop(&mut self) {
        #[cfg(unix)]
        cleanup_ipc_socket(&self.endpoint);
    }
}

fn accept_peer(listener: &ListenerKind) -> io::Result<Option<PeerStream>> {
    match listener {
        ListenerKind::Tcp(tcp) => match tcp.accept() {
            Ok((stream, _)) => {
                stream.set_nonblocking(false)?;
                Ok(Some(PeerStream::Tcp(stream)))
            }
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(error) => Err(error),
        },
        #[cfg(unix)]
        ListenerKind::Unix(unix) => match unix.accept() {
            Ok((stream, _)) => {
                stream.set_nonblocking(false)?;
                Ok(Some(PeerStream::Unix(stream)))
            }
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(error) => Err(error),
        },
    }
}

/// Removes a stale rendezvous file left behind by a previous run.
#[cfg(unix)]
fn remove_stale_socket(path: &str) -> Result<(), SocketError> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(target: TRANSPORT_TARGET, path, "removed stale ipc socket");
            Ok(())
        }
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(SocketError::StaleSocketCleanup {
            path: path.to_owned(),
            source,
        }),
    }
}

#[cfg(unix)]
fn cleanup_ipc_socket(endpoint: &Address) {
    let Some(path) = endpoint.ipc_path() else {
        return;
    };
    if let Err(error) = fs::remove_file(path.as_std_path())
        && error.kind() != io::ErrorKind::NotFound
    {
        warn!(
            target: TRANSPORT_TARGET,
            error = %error,
            path = %path,
            "failed to remove ipc socket file"
        );
    }
}

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::DialOptions;
    use super::super::dialer::StreamDialSocket;
    use super::*;

    #[test]
    fn recv_times_out_without_a_peer() {
        let socket = StreamListenerSocket::bind(&Address::tcp("127.0.0.1", 0)).expect("bind");
        socket.set_recv_timeout(Duration::from_millis(50));
        let error = socket.recv().expect_err("no peer yet");
        assert!(matches!(error, SocketError::Timeout));
    }

    #[test]
    fn dialer_attaches_and_frames_roundtrip() {
        let listener =
            Arc::new(StreamListenerSocket::bind(&Address::tcp("127.0.0.1", 0)).expect("bind"));
        listener.set_recv_timeout(Duration::from_millis(500));
        let port = listener.local_port().expect("tcp port");

        let dialer = StreamDialSocket::connect(
            &Address::tcp("127.0.0.1", port),
            DialOptions {
                dial_timeout: Duration::from_millis(500),
                buffer_size: 8192,
            },
        )
        .expect("dial");

        dialer.send(b"over the wire").expect("send");
        let received = listener.recv().expect("recv");
        assert_eq!(received, b"over the wire");

        // Reply path back to the dialing side.
        dialer.set_recv_timeout(Duration::from_millis(500));
        listener.send(b"and back").expect("reply");
        assert_eq!(dialer.recv().expect("reply recv"), b"and back");

        dialer.close().expect("close dialer");
        listener.close().expect("close listener");
    }

    #[test]
    fn close_unblocks_a_pending_recv() {
        let socket =
            Arc::new(StreamListenerSocket::bind(&Address::tcp("127.0.0.1", 0)).expect("bind"));
        socket.set_recv_timeout(Duration::from_secs(5));

        let waiter = Arc::clone(&socket);
        let handle = std::thread::spawn(move || waiter.recv());
        std::thread::sleep(Duration::from_millis(50));
        socket.close().expect("close");

        let result = handle.join().expect("join receiver");
        assert!(matches!(result, Err(SocketError::Closed)));
    }
}
