//! Transport endpoint representation shared by the engine and manager
//! channels.
//!
//! Addresses are URL values over a fixed scheme set. TCP-style schemes
//! require an explicit port; `ipc` addresses map to a filesystem rendezvous
//! point. Settings files and the wire-facing status report carry addresses
//! in their string form, so serde goes through [`FromStr`] / [`Display`].

use std::fmt;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Endpoint for a message socket on one of the supported transports.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub enum Address {
    /// Filesystem rendezvous socket (`ipc:///path/to/socket`).
    Ipc { path: Utf8PathBuf },
    /// Plain TCP endpoint (`tcp://host:port`).
    Tcp { host: String, port: u16 },
    /// TLS-wrapped TCP endpoint (`tls+tcp://host:port`).
    TlsTcp { host: String, port: u16 },
    /// WebSocket endpoint (`ws://host[:port]/path`).
    Ws { url: Url },
    /// In-process endpoint (`inproc://name`).
    Inproc { name: String },
}

impl Address {
    /// Builds an `ipc` address from a socket path.
    #[must_use]
    pub fn ipc(path: impl Into<Utf8PathBuf>) -> Self {
        Self::Ipc { path: path.into() }
    }

    /// Builds a `tcp` address.
    #[must_use]
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Returns the scheme this address was parsed from.
    #[must_use]
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Ipc { .. } => "ipc",
            Self::Tcp { .. } => "tcp",
            Self::TlsTcp { .. } => "tls+tcp",
            Self::Ws { .. } => "ws",
            Self::Inproc { .. } => "inproc",
        }
    }

    /// Returns the rendezvous path when the address uses the ipc transport.
    #[must_use]
    pub fn ipc_path(&self) -> Option<&Utf8Path> {
        match self {
            Self::Ipc { path } => Some(path.as_ref()),
            _ => None,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ipc { path } => write!(formatter, "ipc://{path}"),
            Self::Tcp { host, port } => write_host_port(formatter, "tcp", host, *port),
            Self::TlsTcp { host, port } => write_host_port(formatter, "tls+tcp", host, *port),
            Self::Ws { url } => formatter.write_str(url.as_str()),
            Self::Inproc { name } => write!(formatter, "inproc://{name}"),
        }
    }
}

fn write_host_port(
    formatter: &mut fmt::Formatter<'_>,
    scheme: &str,
    host: &str,
    port: u16,
) -> fmt::Result {
    if host.contains(':') {
        write!(formatter, "{scheme}://[{host}]:{port}")
    } else {
        write!(formatter, "{scheme}://{host}:{port}")
    }
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let url = Url::parse(input)?;
        match url.scheme() {
            "ipc" => {
                let path = url.path();
                if path.is_empty() {
                    return Err(AddressParseError::MissingIpcPath(input.to_owned()));
                }
                Ok(Self::Ipc {
                    path: Utf8PathBuf::from(path),
                })
            }
            "tcp" => parse_host_port(&url, input).map(|(host, port)| Self::Tcp { host, port }),
            "tls+tcp" => {
                parse_host_port(&url, input).map(|(host, port)| Self::TlsTcp { host, port })
            }
            "ws" => Ok(Self::Ws { url }),
            "inproc" => {
                let name = format!("{}{}", url.host_str().unwrap_or(""), url.path());
                if name.is_empty() {
                    return Err(AddressParseError::MissingInprocName(input.to_owned()));
                }
                Ok(Self::Inproc { name })
            }
            other => Err(AddressParseError::UnsupportedScheme(other.to_owned())),
        }
    }
}

fn parse_host_port(url: &Url, input: &str) -> Result<(String, u16), AddressParseError> {
    let host = url
        .host_str()
        .ok_or_else(|| AddressParseError::MissingHost(input.to_owned()))?;
    let host = host.trim_matches(['[', ']']).to_owned();
    let port = url
        .port()
        .ok_or_else(|| AddressParseError::MissingPort(input.to_owned()))?;
    Ok((host, port))
}

impl TryFrom<String> for Address {
    type Error = AddressParseError;

    fn try_from(input: String) -> Result<Self, Self::Error> {
        input.parse()
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.to_string()
    }
}

/// Errors encountered while parsing an [`Address`] from text.
#[derive(Debug, Error)]
pub enum AddressParseError {
    /// Scheme is outside the supported transport set.
    #[error("unsupported address scheme '{0}'")]
    UnsupportedScheme(String),
    /// Host component was missing for a TCP-style address.
    #[error("missing host in '{0}'")]
    MissingHost(String),
    /// Port was missing; TCP-style schemes require one.
    #[error("missing port in '{0}'")]
    MissingPort(String),
    /// ipc address without a filesystem path.
    #[error("missing ipc socket path in '{0}'")]
    MissingIpcPath(String),
    /// inproc address without a name.
    #[error("missing inproc name in '{0}'")]
    MissingInprocName(String),
    /// URL failed to parse at all.
    #[error(transparent)]
    Url(#[from] url::ParseError),
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn parse_ipc_roundtrip() {
        let address: Address = "ipc:///tmp/detectmate.engine.ipc"
            .parse()
            .expect("valid ipc address");
        assert_eq!(
            address.ipc_path().map(Utf8Path::as_str),
            Some("/tmp/detectmate.engine.ipc")
        );
        assert_eq!(address.to_string(), "ipc:///tmp/detectmate.engine.ipc");
    }

    #[rstest]
    #[case::tcp("tcp://127.0.0.1:5555", "tcp")]
    #[case::tls("tls+tcp://example.com:5556", "tls+tcp")]
    #[case::inproc("inproc://engine-test", "inproc")]
    fn parse_supported_schemes(#[case] input: &str, #[case] scheme: &str) {
        let address: Address = input.parse().expect("valid address");
        assert_eq!(address.scheme(), scheme);
        assert_eq!(address.to_string(), input);
    }

    #[test]
    fn parse_tcp_ipv6_roundtrip() {
        let address: Address = "tcp://[::1]:9000".parse().expect("valid IPv6 address");
        assert_eq!(address.to_string(), "tcp://[::1]:9000");
    }

    #[rstest]
    #[case::no_port("tcp://127.0.0.1")]
    #[case::tls_no_port("tls+tcp://example.com")]
    fn tcp_without_port_is_rejected(#[case] input: &str) {
        let error = input.parse::<Address>().expect_err("port is required");
        assert!(matches!(error, AddressParseError::MissingPort(_)));
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        let error = "udp://127.0.0.1:5555"
            .parse::<Address>()
            .expect_err("scheme outside the allowed set");
        assert!(matches!(error, AddressParseError::UnsupportedScheme(_)));
    }

    #[test]
    fn serde_uses_the_string_form() {
        let address = Address::tcp("127.0.0.1", 6000);
        let json = serde_json::to_string(&address).expect("serialize");
        assert_eq!(json, "\"tcp://127.0.0.1:6000\"");
        let back: Address = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, address);
    }
}
