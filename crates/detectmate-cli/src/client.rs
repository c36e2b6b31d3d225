//! Client-side connection to a service's command channel.
//!
//! Wraps the transport-specific streams in a uniform [`Connection`] so the
//! command logic stays transport agnostic. Requests and replies use the same
//! length-prefixed framing the service speaks.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use detectmate_config::Address;
use detectmate_service::transport::frame;

use crate::errors::AppError;

#[cfg(unix)]
use std::os::unix::net::UnixStream;

#[cfg(unix)]
use socket2::{Domain, SockAddr, Socket, Type};

pub(crate) const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) enum Connection {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for Connection {
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

/// Sends one command and reads the single framed reply.
pub(crate) fn request(endpoint: &Address, command: &str) -> Result<String, AppError> {
    let mut connection = connect(endpoint)?;
    frame::write_frame(&mut connection, command.as_bytes()).map_err(AppError::SendRequest)?;
    let reply = frame::read_frame(&mut connection).map_err(AppError::ReadReply)?;
    String::from_utf8(reply).map_err(|_| AppError::InvalidReply)
}

pub(crate) fn connect(endpoint: &Address) -> Result<Connection, AppError> {
    match endpoint {
        Address::Tcp { host, port } => {
            let endpoint_display = endpoint.to_string();
            let address =
                resolve_tcp_address(host, *port).map_err(|source| AppError::Connect {
                    endpoint: endpoint_display.clone(),
                    source,
                })?;
            let stream = TcpStream::connect_timeout(&address, CONNECTION_TIMEOUT).map_err(
                |source| AppError::Connect {
                    endpoint: endpoint_display.clone(),
                    source,
                },
            )?;
            configure_timeouts(&stream, &endpoint_display)?;
            Ok(Connection::Tcp(stream))
        }
        Address::Ipc { path } => {
            #[cfg(unix)]
            {
                connect_unix(path.as_str()).map_err(|source| AppError::Connect {
                    endpoint: endpoint.to_string(),
                    source,
                })
            }

            #[cfg(not(unix))]
            {
                let _ = path;
                Err(AppError::UnsupportedTransport(endpoint.to_string()))
            }
        }
        other => Err(AppError::UnsupportedTransport(other.to_string())),
    }
}

fn configure_timeouts(stream: &TcpStream, endpoint: &str) -> Result<(), AppError> {
    stream
        .set_read_timeout(Some(CONNECTION_TIMEOUT))
        .map_err(|source| AppError::Connect {
            endpoint: endpoint.to_owned(),
            source,
        })
}

fn resolve_tcp_address(host: &str, port: u16) -> io::Result<SocketAddr> {
    let mut addrs = (host, port).to_socket_addrs()?;
    addrs
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no resolved addresses"))
}

#[cfg(unix)]
fn connect_unix(path: &str) -> io::Result<Connection> {
    let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
    let address = SockAddr::unix(path)?;
    socket.connect_timeout(&address, CONNECTION_TIMEOUT)?;
    let stream: UnixStream = std::os::fd::OwnedFd::from(socket).into();
    stream.set_read_timeout(Some(CONNECTION_TIMEOUT))?;
    Ok(Connection::Unix(stream))
}
