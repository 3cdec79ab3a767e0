//! TCP transport with newline-delimited text framing.
//!
//! [`TcpTransport::run`] spawns a single dispatch task that connects (directly
//! or through the proxy), then multiplexes two halves of the stream:
//!
//! - reading lines from the peer and handing them to
//!   [`EventHandler::on_message`] until EOF or a read error, which becomes
//!   [`EventHandler::on_disconnect`];
//! - draining the [`OutboxQueue`], writing each payload followed by `\n` and
//!   reporting [`EventHandler::on_send_complete`].
//!
//! [`Transport::close`] raises a close signal: the writer flushes whatever is
//! still queued, shuts down its half of the socket and dispatch ends.
//! [`Transport::shutdown`] aborts the task, which closes the socket.

use std::{io, net::SocketAddr, sync::Arc};

use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpStream,
    select,
    sync::watch,
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use super::{
    Endpoint, OutboxQueue, Payload, PeerId, Route, Transport, TransportError, proxy,
};
use crate::handler::EventHandler;

/// Longest inbound line delivered to the handler.
pub const MAX_LINE: usize = 64 * 1024;

/// Most bytes buffered for one inbound line: the content plus `\r\n`.
const READ_LIMIT: u64 = MAX_LINE as u64 + 2;

pub struct TcpTransport {
    endpoint: Endpoint,
    queue: Option<OutboxQueue>,
    pending: Option<(Route, Arc<dyn EventHandler>)>,
    dispatch: Option<JoinHandle<()>>,
    closing: watch::Sender<bool>,
}

impl TcpTransport {
    pub fn new(endpoint: Endpoint, queue: OutboxQueue) -> Self {
        let (closing, _) = watch::channel(false);
        Self {
            endpoint,
            queue: Some(queue),
            pending: None,
            dispatch: None,
            closing,
        }
    }
}

impl Transport for TcpTransport {
    fn connect(&mut self, route: Route, handler: Arc<dyn EventHandler>) {
        self.pending = Some((route, handler));
    }

    fn run(&mut self) -> Result<(), TransportError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|err| TransportError::Io(io::Error::other(err)))?;
        let (route, handler) = self.pending.take().ok_or(TransportError::NotConnected)?;
        let queue = self.queue.take().ok_or(TransportError::NotConnected)?;
        let endpoint = self.endpoint.clone();
        let closing = self.closing.subscribe();

        self.dispatch = Some(runtime.spawn(dispatch(endpoint, route, handler, queue, closing)));
        Ok(())
    }

    fn close(&mut self) -> Option<JoinHandle<()>> {
        self.closing.send_replace(true);
        let task = self.dispatch.take()?;
        debug!(endpoint = %self.endpoint, "flushing outbound queue before close");
        Some(task)
    }

    fn shutdown(&mut self) {
        if let Some(task) = self.dispatch.take() {
            task.abort();
            debug!(endpoint = %self.endpoint, "dispatch task stopped");
        }
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn dispatch(
    endpoint: Endpoint,
    route: Route,
    handler: Arc<dyn EventHandler>,
    mut queue: OutboxQueue,
    closing: watch::Receiver<bool>,
) {
    let stream = match open(&endpoint, &route).await {
        Ok(stream) => stream,
        Err(error) => {
            warn!(%endpoint, %error, "connection attempt failed");
            handler.on_connect(PeerId::Unknown, Err(error));
            return;
        }
    };

    let peer = stream
        .peer_addr()
        .map(PeerId::Addr)
        .unwrap_or(PeerId::Unknown);
    info!(%endpoint, %peer, "transport connected");
    handler.on_connect(peer, Ok(()));

    let (reader, writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    select! {
        error = read_lines(&mut reader, peer, handler.as_ref()) => {
            handler.on_disconnect(peer, error);
        }
        () = write_queued(writer, &mut queue, closing, peer, handler.as_ref()) => {
            debug!(%peer, "outbound side closed");
        }
    }
}

async fn open(endpoint: &Endpoint, route: &Route) -> Result<TcpStream, TransportError> {
    match route {
        Route::Direct => connect_tcp(endpoint).await,
        Route::Proxy(proxy_route) => proxy::open_tunnel(endpoint, proxy_route).await,
    }
}

/// Resolves `endpoint` and connects to the first address that accepts.
pub(crate) async fn connect_tcp(endpoint: &Endpoint) -> Result<TcpStream, TransportError> {
    let port = endpoint.port_number()?;
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((endpoint.host.as_str(), port))
        .await?
        .collect();
    if addrs.is_empty() {
        return Err(TransportError::Resolve(endpoint.authority()));
    }

    let mut last_err = None;
    for addr in &addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                debug!(target_addr = %addr, "TCP connected");
                if let Err(error) = stream.set_nodelay(true) {
                    debug!(?error, "failed to set TCP_NODELAY");
                }
                return Ok(stream);
            }
            Err(error) => {
                debug!(target_addr = %addr, %error, "TCP connect failed");
                last_err = Some(error);
            }
        }
    }

    Err(last_err
        .map(TransportError::Io)
        .unwrap_or_else(|| TransportError::Resolve(endpoint.authority())))
}

/// Delivers lines until the peer closes. Returns the read error, if any.
async fn read_lines<R>(
    reader: &mut R,
    peer: PeerId,
    handler: &dyn EventHandler,
) -> Option<TransportError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    loop {
        match next_line(reader, &mut line).await {
            Ok(LineRead::Closed) => return None,
            Ok(LineRead::TooLong(size)) => handler.on_message(
                peer,
                Err(TransportError::PayloadTooLarge {
                    size,
                    limit: MAX_LINE,
                }),
            ),
            Ok(LineRead::Line) => {
                handler.on_message(peer, Ok(Payload::new(std::mem::take(&mut line))));
            }
            Err(error) => return Some(error.into()),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum LineRead {
    /// `line` holds the next line without its ending.
    Line,
    /// The line was longer than [`MAX_LINE`] and has been skipped.
    TooLong(usize),
    Closed,
}

/// Reads one line into `line`, buffering at most [`READ_LIMIT`] bytes. The
/// rest of an overlong line is consumed without being kept.
async fn next_line<R>(reader: &mut R, line: &mut Vec<u8>) -> io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    line.clear();
    let read = (&mut *reader).take(READ_LIMIT).read_until(b'\n', line).await?;
    if read == 0 {
        return Ok(LineRead::Closed);
    }
    if line.last() != Some(&b'\n') && read as u64 == READ_LIMIT {
        let skipped = skip_line(reader).await?;
        return Ok(LineRead::TooLong(read + skipped));
    }

    while matches!(line.last(), Some(b'\n' | b'\r')) {
        line.pop();
    }
    if line.len() > MAX_LINE {
        return Ok(LineRead::TooLong(line.len()));
    }
    Ok(LineRead::Line)
}

/// Consumes input up to and including the next newline. Returns the number of
/// bytes dropped.
async fn skip_line<R>(reader: &mut R) -> io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut skipped = 0;
    loop {
        let (used, found) = {
            let available = reader.fill_buf().await?;
            match available.iter().position(|&byte| byte == b'\n') {
                Some(end) => (end + 1, true),
                None => (available.len(), false),
            }
        };
        reader.consume(used);
        skipped += used;
        if found || used == 0 {
            return Ok(skipped);
        }
    }
}

/// Writes queued payloads until the queue closes or `closing` turns true.
/// Payloads queued before the close signal are still written.
async fn write_queued<W>(
    mut writer: W,
    queue: &mut OutboxQueue,
    mut closing: watch::Receiver<bool>,
    peer: PeerId,
    handler: &dyn EventHandler,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let next = select! {
            biased;
            payload = queue.next() => payload,
            _ = closing.wait_for(|closed| *closed) => None,
        };
        let Some(payload) = next else {
            break;
        };
        write_and_report(&mut writer, &payload, peer, handler).await;
    }

    while let Some(payload) = queue.try_next() {
        write_and_report(&mut writer, &payload, peer, handler).await;
    }

    if let Err(error) = writer.shutdown().await {
        debug!(?error, "failed to shut down writer cleanly");
    }
}

async fn write_and_report<W>(
    writer: &mut W,
    payload: &str,
    peer: PeerId,
    handler: &dyn EventHandler,
) where
    W: AsyncWrite + Unpin,
{
    let outcome = write_line(writer, payload)
        .await
        .map_err(TransportError::from);
    handler.on_send_complete(peer, outcome);
}

async fn write_line<W>(writer: &mut W, payload: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut encoded = Vec::with_capacity(payload.len() + 1);
    encoded.extend_from_slice(payload.as_bytes());
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await
}
