//! Byte-stream types shared by the listener and dialer sockets.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use socket2::{Domain, SockAddr, Socket, Type};

use detectmate_config::Address;

use super::SocketError;

#[cfg(unix)]
use std::os::unix::net::UnixStream;

/// One connected peer on either supported transport.
#[derive(Debug)]
pub(crate) enum PeerStream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl PeerStream {
    pub(crate) fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.set_read_timeout(timeout),
            #[cfg(unix)]
            Self::Unix(stream) => stream.set_read_timeout(timeout),
        }
    }

    /// Dials `endpoint` once, bounded by `timeout`.
    ///
    /// A send-buffer size is applied before connecting when requested.
    pub(crate) fn connect(
        endpoint: &Address,
        timeout: Duration,
        buffer_size: Option<usize>,
    ) -> Result<Self, SocketError> {
        match endpoint {
            Address::Tcp { host, port } => {
                let addr = resolve_tcp(host, *port, endpoint)?;
                let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None)
                    .map_err(SocketError::from_io)?;
                if let Some(size) = buffer_size {
                    socket
                        .set_send_buffer_size(size)
                        .map_err(SocketError::from_io)?;
                }
                socket
                    .connect_timeout(&SockAddr::from(addr), timeout)
                    .map_err(SocketError::from_io)?;
                Ok(Self::Tcp(socket.into()))
            }
            Address::Ipc { path } => {
                #[cfg(unix)]
                {
                    let socket = Socket::new(Domain::UNIX, Type::STREAM, None)
                        .map_err(SocketError::from_io)?;
                    if let Some(size) = buffer_size {
                        socket
                            .set_send_buffer_size(size)
                            .map_err(SocketError::from_io)?;
                    }
                    let addr = SockAddr::unix(path.as_std_path()).map_err(SocketError::from_io)?;
                    socket
                        .connect_timeout(&addr, timeout)
                        .map_err(SocketError::from_io)?;
                    Ok(Self::Unix(UnixStream::from(
                        std::os::fd::OwnedFd::from(socket),
                    )))
                }

                #[cfg(not(unix))]
                {
                    let _ = (path, timeout, buffer_size);
                    Err(unsupported(endpoint))
                }
            }
            _ => Err(unsupported(endpoint)),
        }
    }
}

impl Read for PeerStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for PeerStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            Self::Unix(stream) => stream.flush(),
        }
    }
}

pub(crate) fn resolve_tcp(
    host: &str,
    port: u16,
    endpoint: &Address,
) -> Result<SocketAddr, SocketError> {
    let mut addrs = (host, port)
        .to_socket_addrs()
        .map_err(|source| SocketError::Resolve {
            endpoint: endpoint.to_string(),
            source,
        })?;
    addrs.next().ok_or_else(|| SocketError::Resolve {
        endpoint: endpoint.to_string(),
        source: io::Error::new(io::ErrorKind::AddrNotAvailable, "no resolved addresses"),
    })
}

pub(crate) fn unsupported(endpoint: &Address) -> SocketError {
    SocketError::UnsupportedTransport {
        scheme: endpoint.scheme().to_owned(),
        endpoint: endpoint.to_string(),
    }
}
