/**
 * The bytes-in/bytes-out capability handed to method handlers.
 *
 * A handler writes its response to a `Transport` without knowing whether it ends up on a
 * TCP stream, as a UDP datagram, or relayed through the alternate server.
 */
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// connection oriented (TCP)
    Stream,
    /// connectionless (UDP)
    Datagram,
    /// virtual transport answering through the alternate server
    Relay,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn write(&self, buf: &[u8]) -> io::Result<usize>;

    async fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    async fn close(&self) -> io::Result<()>;

    fn local_addr(&self) -> Option<SocketAddr>;

    fn remote_addr(&self) -> Option<SocketAddr>;

    fn kind(&self) -> TransportKind;
}

/**
 * One UDP peer on a shared socket. The driver has already received the datagram, so
 * reading is a no-op; writing sends a datagram back to the peer.
 */
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    remote: SocketAddr,
}

impl UdpTransport {
    pub fn new(socket: Arc<UdpSocket>, remote: SocketAddr) -> Self {
        Self { socket, remote }
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn write(&self, buf: &[u8]) -> io::Result<usize> {
        self.socket.send_to(buf, self.remote).await
    }

    async fn read(&self, _buf: &mut [u8]) -> io::Result<usize> {
        Ok(0)
    }

    async fn close(&self) -> io::Result<()> {
        Ok(())
    }

    /// The bound address; a wildcard bind gives the unspecified IP
    fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.local_addr().ok()
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        Some(self.remote)
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Datagram
    }
}

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/**
 * A byte stream split in two halves, each behind its own lock, so the connection task can
 * block on a read while a handler writes a response.
 */
pub struct StreamTransport {
    reader: Mutex<BoxedReader>,
    writer: Mutex<BoxedWriter>,
    local: Option<SocketAddr>,
    remote: Option<SocketAddr>,
}

impl StreamTransport {
    pub fn new<R, W>(reader: R, writer: W, local: Option<SocketAddr>, remote: Option<SocketAddr>) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: Mutex::new(Box::new(reader)),
            writer: Mutex::new(Box::new(writer)),
            local,
            remote,
        }
    }

    pub fn from_tcp(stream: TcpStream) -> Self {
        let local = stream.local_addr().ok();
        let remote = stream.peer_addr().ok();
        let (reader, writer) = stream.into_split();
        Self::new(reader, writer, local, remote)
    }

    /// Fill `buf` completely, failing with `UnexpectedEof` if the stream ends first
    pub async fn read_exact(&self, buf: &mut [u8]) -> io::Result<()> {
        self.reader.lock().await.read_exact(buf).await.map(|_| ())
    }
}

#[async_trait]
impl Transport for StreamTransport {
    async fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let mut writer = self.writer.lock().await;
        writer.write_all(buf).await?;
        writer.flush().await?;
        Ok(buf.len())
    }

    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.lock().await.read(buf).await
    }

    async fn close(&self) -> io::Result<()> {
        self.writer.lock().await.shutdown().await
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Stream
    }
}
