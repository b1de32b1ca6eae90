/**
 * Primary/alternate pairing.
 *
 * Two servers with one IP address each cooperate to answer CHANGE-REQUEST: the primary
 * forwards the encoded response over a TCP control connection, and the alternate sends it
 * to the client from its own address.
 *
 * The primary listens on the control address and keeps at most one alternate connection,
 * the `AlternateSession`. The alternate dials the primary and reconnects after a fixed delay
 * whenever the connection is lost.
 */
use std::io;
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use slog::{debug, info, trace, warn, Logger};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, Notify};

use crate::net::{
    bind_reusable_udp,
    transport::{Transport, TransportKind},
};
use crate::stun::error::{StunError, StunResult};
use crate::{utils, Context};

pub mod frame;

use frame::RelayFrame;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/**
 * The write side of the live control connection, if any.
 *
 * Every attached connection gets a new generation number. Detaching by generation keeps a
 * stale watchdog from dropping a newer connection. Each detach of a live connection sends
 * exactly one notification, which lets the accept loop take the next connection.
 *
 * `live` mirrors the generation of the stored connection (0 when there is none) so that
 * liveness can be read while a relay write holds the writer lock.
 */
pub struct AlternateSession {
    writer: Mutex<Option<(u64, BoxedWriter)>>,
    generation: AtomicU64,
    live: AtomicU64,
    detached: Notify,
    logger: Logger,
}

impl AlternateSession {
    pub fn new(logger: Logger) -> Self {
        Self {
            writer: Mutex::new(None),
            generation: AtomicU64::new(0),
            live: AtomicU64::new(0),
            detached: Notify::new(),
            logger,
        }
    }

    /// Store a new control connection, replacing any previous one, and return its generation
    pub async fn attach<W>(&self, writer: W) -> u64
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut guard = self.writer.lock().await;
        *guard = Some((generation, Box::new(writer)));
        self.live.store(generation, Ordering::SeqCst);
        generation
    }

    /// Never waits on the writer lock
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst) != 0
    }

    /**
     * Write one encoded relay frame. A failed write drops the connection and wakes the
     * accept loop.
     */
    pub async fn relay(&self, frame: &[u8]) -> StunResult<()> {
        let mut guard = self.writer.lock().await;
        let (_, writer) = guard.as_mut().ok_or(StunError::AlternateUnavailable)?;

        let written = match writer.write_all(frame).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            warn!(self.logger, "Relay to alternate server failed: {}", e);
            *guard = None;
            self.live.store(0, Ordering::SeqCst);
            self.detached.notify_one();
            return Err(StunError::AlternateUnavailable);
        }
        Ok(())
    }

    /// Drop the connection if it is still the one with this generation
    pub async fn detach(&self, generation: u64) -> bool {
        let mut guard = self.writer.lock().await;
        match guard.as_ref() {
            Some((current, _)) if *current == generation => {
                *guard = None;
                self.live.store(0, Ordering::SeqCst);
                self.detached.notify_one();
                true
            }
            _ => false,
        }
    }

    pub async fn wait_for_detach(&self) {
        self.detached.notified().await;
    }
}

/**
 * A transport that answers through the alternate server: a write becomes a relay frame
 * asking the alternate to send the bytes to `remote` from `local`. Reading gives nothing.
 */
pub struct RelayTransport {
    session: Arc<AlternateSession>,
    remote: SocketAddrV4,
    local: SocketAddr,
}

impl RelayTransport {
    pub fn new(session: Arc<AlternateSession>, remote: SocketAddrV4, local: SocketAddr) -> Self {
        Self {
            session,
            remote,
            local,
        }
    }
}

#[async_trait]
impl Transport for RelayTransport {
    async fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let frame = RelayFrame::new(self.remote, self.local.port(), buf)
            .encode()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        self.session
            .relay(&frame)
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::NotConnected, e))?;
        Ok(buf.len())
    }

    async fn read(&self, _buf: &mut [u8]) -> io::Result<usize> {
        Ok(0)
    }

    async fn close(&self) -> io::Result<()> {
        Ok(())
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        Some(self.local)
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        Some(SocketAddr::V4(self.remote))
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Relay
    }
}

/**
 * Pairing state of this process: its role, the alternate address and the shared session.
 */
pub struct AlternatePairing {
    context: Arc<Context>,
    session: Arc<AlternateSession>,
}

impl AlternatePairing {
    pub fn new(context: &Arc<Context>) -> Self {
        Self {
            context: Arc::clone(context),
            session: Arc::new(AlternateSession::new(context.logger.clone())),
        }
    }

    pub fn session(&self) -> &Arc<AlternateSession> {
        &self.session
    }

    /// Pairing is configured when this is the primary and the alternate IP is known
    pub fn is_primary(&self) -> bool {
        !self.context.config.alternate && self.context.config.alternate_ip.is_some()
    }

    /**
     * A relay transport answering `client` from the alternate IP, or `None` when this process
     * cannot relay. The alternate sends from the primary port, or from the alternate port when
     * the port should change too.
     */
    pub fn relay_for(&self, client: SocketAddr, change_port: bool) -> Option<RelayTransport> {
        if !self.is_primary() {
            return None;
        }
        let alternate_ip = self.context.config.alternate_ip?;
        let remote = match client {
            SocketAddr::V4(v4) => v4,
            SocketAddr::V6(_) => return None,
        };
        let local_port = if change_port {
            self.context.config.alternate_port
        } else {
            self.context.config.port
        };
        Some(RelayTransport::new(
            Arc::clone(&self.session),
            remote,
            SocketAddr::new(alternate_ip, local_port),
        ))
    }

    /// Address of the alternate server, known only while it is connected
    pub fn other_address(&self) -> Option<SocketAddr> {
        if !self.is_primary() || !self.session.is_live() {
            return None;
        }
        let ip = self.context.config.alternate_ip?;
        Some(SocketAddr::new(ip, self.context.config.alternate_port))
    }

    pub async fn bind_control(&self) -> io::Result<TcpListener> {
        TcpListener::bind(self.context.config.control_address()).await
    }

    /**
     * Primary role: accept control connections from the alternate IP, one at a time. A stored
     * connection is kept until it fails, then the next one is accepted.
     */
    pub async fn run_primary(&self, listener: TcpListener) -> io::Result<()> {
        let logger = &self.context.logger;
        info!(
            logger,
            "Listening for alternate server on {}",
            listener.local_addr()?
        );

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(logger, "Control accept error: {}", e);
                    continue;
                }
            };

            if Some(peer.ip()) != self.context.config.alternate_ip {
                debug!(logger, "Rejected control connection from {}", peer);
                drop(stream);
                continue;
            }

            info!(logger, "Alternate server connected from {}", peer);
            let (reader, writer) = stream.into_split();
            let generation = self.session.attach(writer).await;

            let session = Arc::clone(&self.session);
            let watchdog_logger = logger.clone();
            tokio::spawn(async move {
                watch_control(reader).await;
                if session.detach(generation).await {
                    info!(watchdog_logger, "Alternate server disconnected");
                }
            });

            self.session.wait_for_detach().await;
            debug!(logger, "Waiting for alternate server to reconnect");
        }
    }

    /**
     * Alternate role: connect to the primary and execute relay frames until the connection
     * ends, then try again after the reconnect delay. Never returns.
     */
    pub async fn run_alternate(&self) {
        let logger = &self.context.logger;
        let control = self.context.config.control_address();
        let delay = Duration::from_millis(self.context.config.reconnect_delay_ms);

        loop {
            match TcpStream::connect(control).await {
                Ok(stream) => {
                    info!(logger, "Connected to primary server at {}", control);
                    self.serve_frames(stream).await;
                    info!(logger, "Connection to primary server closed");
                }
                Err(e) => debug!(logger, "Connecting to primary server {} failed: {}", control, e),
            }
            tokio::time::sleep(delay).await;
        }
    }

    /// Read frames until the stream fails, sending each one out
    pub async fn serve_frames<S>(&self, mut stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            let frame = match RelayFrame::read_from(&mut stream).await {
                Ok(frame) => frame,
                Err(e) => {
                    debug!(self.context.logger, "Control read ended: {}", e);
                    break;
                }
            };
            if let Err(e) = self.send_frame(&frame).await {
                warn!(self.context.logger, "Relay to {} failed: {}", frame.remote, e);
            }
        }
        let _ = stream.shutdown().await;
    }

    /// Send the frame payload to its remote address from (alternate IP, frame local port)
    pub async fn send_frame(&self, frame: &RelayFrame) -> io::Result<()> {
        let ip = self.context.config.alternate_ip.ok_or_else(|| {
            io::Error::new(io::ErrorKind::AddrNotAvailable, "alternate IP is not configured")
        })?;
        if !ip.is_ipv4() {
            return Err(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                "alternate IP must be IPv4",
            ));
        }

        let socket = bind_reusable_udp(SocketAddr::new(ip, frame.local_port))?;
        let local = socket.local_addr()?;
        trace!(
            self.context.logger,
            "--<-- relay {} -> {}: {}",
            local,
            frame.remote,
            utils::hex_encode_delimited(&frame.payload)
        );
        socket
            .send_to(&frame.payload, SocketAddr::V4(frame.remote))
            .await?;
        Ok(())
    }
}

/// Block until the peer closes the control connection or it fails. Inbound bytes are ignored.
async fn watch_control<R>(mut reader: R)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 256];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}
