//! Transport contract consumed by the chat session.
//!
//! A transport owns the network connection and a dispatch task that reports
//! everything that happens on it through an [`EventHandler`]. The session
//! never touches sockets directly:
//!
//! - [`Transport::connect`] registers where to connect and who to notify.
//! - [`Transport::run`] starts the dispatch task; the outcome of the connect
//!   attempt arrives later via [`EventHandler::on_connect`].
//! - Outbound payloads are pushed through an [`Outbox`]; the transport drains
//!   the matching [`OutboxQueue`] and reports each completion through
//!   [`EventHandler::on_send_complete`].
//! - [`Transport::close`] flushes what is queued before the connection goes
//!   away; [`Transport::shutdown`] drops it on the spot.
//!
//! [`tcp::TcpTransport`] is the implementation used by the binary.

pub mod proxy;
pub mod tcp;

use std::{borrow::Cow, fmt, net::SocketAddr, sync::Arc};

use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::config::{AuthType, redact};
use crate::handler::EventHandler;

/// Errors reported by a transport, always through handler callbacks.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("no addresses found for {0}")]
    Resolve(String),

    #[error("proxy refused the tunnel: {status}")]
    ProxyRejected { status: String },

    #[error("proxy requires authentication")]
    ProxyAuthRequired,

    #[error("malformed proxy response: {0}")]
    MalformedProxyResponse(String),

    #[error("payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("outbound queue is closed")]
    QueueClosed,

    #[error("no connection has been requested")]
    NotConnected,
}

/// Identifies the remote side of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerId {
    /// The connection never got far enough to learn the peer address.
    Unknown,
    Addr(SocketAddr),
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerId::Unknown => f.write_str("unknown peer"),
            PeerId::Addr(addr) => write!(f, "{addr}"),
        }
    }
}

/// A host and a port, both kept as the user typed them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: String,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: port.into(),
        }
    }

    pub fn port_number(&self) -> Result<u16, TransportError> {
        match self.port.parse::<u16>() {
            Ok(0) => Err(self.invalid("port 0 is not allowed")),
            Ok(port) => Ok(port),
            Err(err) => Err(self.invalid(&err.to_string())),
        }
    }

    /// `host:port` with IPv6 literals bracketed, as used in lookups and in
    /// the proxy `CONNECT` line.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    fn invalid(&self, reason: &str) -> TransportError {
        TransportError::InvalidEndpoint {
            endpoint: self.authority(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.authority())
    }
}

/// Proxy hop plus the credentials for it.
#[derive(Clone, PartialEq, Eq)]
pub struct ProxyRoute {
    pub auth: AuthType,
    pub proxy: Endpoint,
    pub user: String,
    pub password: String,
}

impl fmt::Debug for ProxyRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyRoute")
            .field("auth", &self.auth)
            .field("proxy", &self.proxy)
            .field("user", &self.user)
            .field("password", &redact(&self.password))
            .finish()
    }
}

/// How to reach the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Direct,
    Proxy(ProxyRoute),
}

/// Bytes received from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload(Vec<u8>);

impl Payload {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Text content, with invalid UTF-8 replaced.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.0)
    }
}

/// Non-blocking handle for queueing outbound payloads.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<String>,
}

impl Outbox {
    /// Queues a payload. Fails only once the transport has dropped its queue.
    pub fn push(&self, payload: impl Into<String>) -> Result<(), TransportError> {
        self.tx
            .send(payload.into())
            .map_err(|_| TransportError::QueueClosed)
    }
}

/// Receiving end of an [`Outbox`], owned by the transport.
#[derive(Debug)]
pub struct OutboxQueue {
    rx: mpsc::UnboundedReceiver<String>,
}

impl OutboxQueue {
    pub async fn next(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Returns a queued payload without waiting, if there is one.
    pub fn try_next(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }
}

pub fn outbox() -> (Outbox, OutboxQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Outbox { tx }, OutboxQueue { rx })
}

/// A connection engine the session can drive.
pub trait Transport: Send + 'static {
    /// Records the route to take and the handler to notify. Nothing happens
    /// on the network until [`Transport::run`].
    fn connect(&mut self, route: Route, handler: Arc<dyn EventHandler>);

    /// Starts the dispatch activity.
    fn run(&mut self) -> Result<(), TransportError>;

    /// Asks dispatch to write every payload already queued, then close the
    /// connection. Returns the dispatch task so the caller can wait for the
    /// flush; `None` when nothing is running.
    fn close(&mut self) -> Option<JoinHandle<()>>;

    /// Stops dispatch at once and releases the connection. Safe to call
    /// repeatedly.
    fn shutdown(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authority_brackets_ipv6_hosts() {
        assert_eq!(Endpoint::new("127.0.0.1", "30303").authority(), "127.0.0.1:30303");
        assert_eq!(Endpoint::new("::1", "8080").authority(), "[::1]:8080");
    }

    #[test]
    fn port_number_rejects_garbage_and_zero() {
        assert_eq!(Endpoint::new("h", "30303").port_number().unwrap(), 30303);
        assert!(matches!(
            Endpoint::new("h", "0").port_number(),
            Err(TransportError::InvalidEndpoint { .. })
        ));
        assert!(matches!(
            Endpoint::new("h", "http").port_number(),
            Err(TransportError::InvalidEndpoint { .. })
        ));
        assert!(Endpoint::new("h", "").port_number().is_err());
    }

    #[test]
    fn payload_text_is_lossy() {
        let payload = Payload::new(vec![b'h', b'i', 0xff]);
        assert_eq!(payload.text(), "hi\u{fffd}");
    }

    #[tokio::test]
    async fn outbox_fails_once_queue_is_gone() {
        let (outbox, mut queue) = outbox();
        outbox.push("hello").expect("queue open");
        assert_eq!(queue.next().await.as_deref(), Some("hello"));

        drop(queue);
        assert!(matches!(outbox.push("late"), Err(TransportError::QueueClosed)));
    }

    #[test]
    fn proxy_route_debug_hides_password() {
        let route = ProxyRoute {
            auth: AuthType::Basic,
            proxy: Endpoint::new("10.0.0.1", "8080"),
            user: "alice".into(),
            password: "hunter2".into(),
        };
        assert!(!format!("{route:?}").contains("hunter2"));
    }
}
