//! Socket capability trait and the factory strategy contracts.
//!
//! The engine and manager never touch a concrete transport: they receive
//! sockets from a factory and speak [`MessageSocket`] only. Tests inject
//! in-memory factories; production wiring uses the stream-backed ones.

use std::sync::Arc;
use std::time::Duration;

use detectmate_config::Address;

use super::SocketError;
use super::dialer::StreamDialSocket;
use super::listener::StreamListenerSocket;

/// Minimal duplex message socket capability.
///
/// Methods take `&self`: implementations synchronize internally so `close`
/// may be called from any thread to unblock a pending `recv`.
pub trait MessageSocket: Send + Sync {
    /// Receives one message, blocking up to the receive timeout.
    fn recv(&self) -> Result<Vec<u8>, SocketError>;
    /// Sends one message, blocking until the transport accepts it.
    fn send(&self, payload: &[u8]) -> Result<(), SocketError>;
    /// Closes the socket; pending operations observe [`SocketError::Closed`].
    fn close(&self) -> Result<(), SocketError>;
    /// Adjusts the receive window.
    fn set_recv_timeout(&self, timeout: Duration);
}

/// Options applied to a dialing output socket.
#[derive(Debug, Clone, Copy)]
pub struct DialOptions {
    /// Budget for one connection attempt.
    pub dial_timeout: Duration,
    /// Send-buffer size in bytes.
    pub buffer_size: usize,
}

/// Produces the request/reply server socket for the command channel.
pub trait ManagerSocketFactory: Send + Sync {
    /// Creates a socket bound on `addr`.
    fn create(&self, addr: &Address) -> Result<Arc<dyn MessageSocket>, SocketError>;
}

/// Produces the engine-side sockets.
pub trait EngineSocketFactory: Send + Sync {
    /// Creates the input socket bound on `addr`.
    fn bind(&self, addr: &Address) -> Result<Arc<dyn MessageSocket>, SocketError>;
    /// Creates an output socket that dials `addr` in the background.
    fn connect(
        &self,
        addr: &Address,
        options: DialOptions,
    ) -> Result<Arc<dyn MessageSocket>, SocketError>;
}

impl MessageSocket for StreamListenerSocket {
    fn recv(&self) -> Result<Vec<u8>, SocketError> {
        Self::recv(self)
    }

    fn send(&self, payload: &[u8]) -> Result<(), SocketError> {
        Self::send(self, payload)
    }

    fn close(&self) -> Result<(), SocketError> {
        Self::close(self)
    }

    fn set_recv_timeout(&self, timeout: Duration) {
        Self::set_recv_timeout(self, timeout);
    }
}

impl MessageSocket for StreamDialSocket {
    fn recv(&self) -> Result<Vec<u8>, SocketError> {
        Self::recv(self)
    }

    fn send(&self, payload: &[u8]) -> Result<(), SocketError> {
        Self::send(self, payload)
    }

    fn close(&self) -> Result<(), SocketError> {
        Self::close(self)
    }

    fn set_recv_timeout(&self, timeout: Duration) {
        Self::set_recv_timeout(self, timeout);
    }
}

/// Stream-backed command-channel factory covering ipc and tcp.
#[derive(Debug, Default, Clone, Copy)]
pub struct StreamManagerSocketFactory;

impl ManagerSocketFactory for StreamManagerSocketFactory {
    fn create(&self, addr: &Address) -> Result<Arc<dyn MessageSocket>, SocketError> {
        Ok(Arc::new(StreamListenerSocket::bind(addr)?))
    }
}

/// Stream-backed engine socket factory covering ipc and tcp.
#[derive(Debug, Default, Clone, Copy)]
pub struct StreamEngineSocketFactory;

impl EngineSocketFactory for StreamEngineSocketFactory {
    fn bind(&self, addr: &Address) -> Result<Arc<dyn MessageSocket>, SocketError> {
        Ok(Arc::new(StreamListenerSocket::bind(addr)?))
    }

    fn connect(
        &self,
        addr: &Address,
        options: DialOptions,
    ) -> Result<Arc<dyn MessageSocket>, SocketError> {
        Ok(Arc::new(StreamDialSocket::connect(addr, options)?))
    }
}
