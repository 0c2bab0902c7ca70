//! Peer connection configuration: ICE servers.

use std::fmt;

use rtc_abi::{Result, RtcError};
use serde::{Deserialize, Serialize};
use url::form_urlencoded::byte_serialize;

/// Default STUN servers for ICE connectivity.
pub const DEFAULT_STUN_SERVERS: &[&str] = &[
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

/// Transport used to reach a TURN relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayType {
    #[default]
    TurnUdp,
    TurnTcp,
    TurnTls,
}

/// An ICE server, passed to the engine as a URL string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IceServer {
    /// A ready-made URL, forwarded unchanged.
    Url { url: String },
    /// A STUN server.
    Stun { hostname: String, port: u16 },
    /// A TURN relay with credentials.
    Turn {
        hostname: String,
        port: u16,
        username: String,
        password: String,
        #[serde(default)]
        relay_type: RelayType,
    },
}

impl IceServer {
    /// A server given as a URL such as `stun:stun.example.org:3478`.
    pub fn url(url: impl Into<String>) -> Self {
        IceServer::Url { url: url.into() }
    }

    /// A STUN server on `port`.
    pub fn stun(hostname: impl Into<String>, port: u16) -> Self {
        IceServer::Stun {
            hostname: hostname.into(),
            port,
        }
    }

    /// A STUN server with its port given as a service string.
    pub fn stun_service(hostname: impl Into<String>, service: &str) -> Result<Self> {
        Ok(Self::stun(hostname, parse_port(service)?))
    }

    /// A TURN relay on `port`.
    pub fn turn(
        hostname: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
        relay_type: RelayType,
    ) -> Self {
        IceServer::Turn {
            hostname: hostname.into(),
            port,
            username: username.into(),
            password: password.into(),
            relay_type,
        }
    }

    /// A TURN relay with its port given as a service string.
    pub fn turn_service(
        hostname: impl Into<String>,
        service: &str,
        username: impl Into<String>,
        password: impl Into<String>,
        relay_type: RelayType,
    ) -> Result<Self> {
        Ok(Self::turn(
            hostname,
            parse_port(service)?,
            username,
            password,
            relay_type,
        ))
    }

    /// The URL handed to the engine.
    ///
    /// TURN credentials are percent-encoded into the user-info part. TCP and
    /// TLS relays add `?transport=tcp`; TLS also switches the scheme to `turns`.
    pub fn to_url(&self) -> String {
        match self {
            IceServer::Url { url } => url.clone(),
            IceServer::Stun { hostname, port } => format!("stun:{hostname}:{port}"),
            IceServer::Turn {
                hostname,
                port,
                username,
                password,
                relay_type,
            } => {
                let scheme = match relay_type {
                    RelayType::TurnTls => "turns",
                    RelayType::TurnUdp | RelayType::TurnTcp => "turn",
                };
                let username: String = byte_serialize(username.as_bytes()).collect();
                let password: String = byte_serialize(password.as_bytes()).collect();
                let mut url = format!("{scheme}:{username}:{password}@{hostname}:{port}");
                if *relay_type != RelayType::TurnUdp {
                    url.push_str("?transport=tcp");
                }
                url
            }
        }
    }
}

impl fmt::Display for IceServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Keep credentials out of logs.
            IceServer::Turn {
                hostname, port, ..
            } => write!(f, "turn:{hostname}:{port}"),
            _ => f.write_str(&self.to_url()),
        }
    }
}

fn parse_port(service: &str) -> Result<u16> {
    service
        .trim()
        .parse::<u16>()
        .map_err(|_| RtcError::InvalidPort(service.to_string()))
}

/// Settings used when creating a peer connection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Configuration {
    pub ice_servers: Vec<IceServer>,
}

impl Configuration {
    /// A configuration without ICE servers; only host candidates are gathered.
    pub fn new() -> Self {
        Self::default()
    }

    /// The public Google STUN servers.
    pub fn with_default_stun() -> Self {
        Self {
            ice_servers: DEFAULT_STUN_SERVERS
                .iter()
                .map(|&url| IceServer::url(url))
                .collect(),
        }
    }

    /// Adds an ICE server.
    pub fn with_ice_server(mut self, server: IceServer) -> Self {
        self.ice_servers.push(server);
        self
    }

    /// The ICE server URLs in order.
    pub fn ice_server_urls(&self) -> Vec<String> {
        self.ice_servers.iter().map(IceServer::to_url).collect()
    }
}
