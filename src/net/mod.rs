/**
 * Network related functionality
 *
 */
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::{
    stun::{self, processor::MessageProcessor},
    Context,
};
use slog::{debug, error, Logger};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, UdpSocket};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};

pub mod transport;

use transport::{StreamTransport, Transport, UdpTransport};

/// per RFC5389 this is 64k, but we limit it
const MAX_MESSAGE_SIZE: usize = 4096;

/// How long the rest of a message may take once its header has arrived
const READ_TIMEOUT: Duration = Duration::from_secs(3);

/**
 * Bind a non-blocking UDP socket with SO_REUSEADDR set, so that more than one socket can
 * send from the same local address.
 */
pub fn bind_reusable_udp(addr: SocketAddr) -> io::Result<UdpSocket> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket)
}

/**
 * Network server that handles TCP and UDP connections.
 */
pub struct NetworkServer<T: MessageProcessor> {
    context: Arc<Context>,
    processor: T,
}

impl<T> NetworkServer<T>
where
    T: MessageProcessor + Clone + 'static,
{
    /**
     * Initialize a new network server. The context contains global logger
     * and configuration settings, and the message processor is used to
     * do protocol-specific message processing (in this case STUN)
     */
    pub fn new(context: &Arc<Context>, message_processor: T) -> Self {
        Self {
            context: Arc::clone(context),
            processor: message_processor,
        }
    }

    /**
     * Binds the configured address and starts accepting TCP connections.
     *
     * @return A JoinHandle for the spawned listener task, or an error if binding fails
     */
    pub async fn setup_tcp_listener(&self) -> io::Result<JoinHandle<()>> {
        debug!(self.context.logger, "Enabling TCP server");
        let listener = TcpListener::bind(self.context.config.bind_address()).await?;
        Ok(self.serve_tcp(listener))
    }

    /**
     * Accepts incoming TCP connections and handles each in a separate task.
     * Each connection is processed using the configured message processor.
     */
    pub fn serve_tcp(&self, listener: TcpListener) -> JoinHandle<()> {
        let context = Arc::clone(&self.context);
        let processor = self.processor.clone();

        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        let processor = processor.clone();
                        let logger = context.logger.clone();
                        tokio::spawn(async move {
                            let transport = Arc::new(StreamTransport::from_tcp(stream));
                            if let Err(e) =
                                Self::handle_tcp_socket(processor, transport, &logger).await
                            {
                                debug!(logger, "TCP connection {} closed: {}", peer, e);
                            }
                        });
                    }
                    Err(e) => error!(context.logger, "TCP accept error: {}", e),
                }
            }
        })
    }

    /**
     * Binds the configured address and starts receiving UDP datagrams.
     *
     * @return A JoinHandle for the spawned listener task, or an error if binding fails
     */
    pub fn setup_udp_listener(&self) -> io::Result<JoinHandle<()>> {
        debug!(self.context.logger, "Enabling UDP server");
        let socket = bind_reusable_udp(self.context.config.bind_address())?;
        Ok(self.serve_udp(socket))
    }

    /**
     * Receives UDP datagrams one at a time and processes each before reading the next.
     */
    pub fn serve_udp(&self, socket: UdpSocket) -> JoinHandle<()> {
        let logger = self.context.logger.clone();
        let processor = self.processor.clone();

        tokio::spawn(async move {
            Self::handle_udp_socket(processor, Arc::new(socket), &logger).await;
        })
    }

    /**
     * Handles the messages on a tcp connection
     *
     * Reads STUN messages from the connection in order, header first and then the body,
     * and processes each one. Returns when the peer closes the connection.
     *
     * @param processor The message processor to handle the STUN messages
     * @param transport The TCP connection
     * @return Result indicating why the connection ended
     */
    async fn handle_tcp_socket(
        processor: T,
        transport: Arc<StreamTransport>,
        logger: &Logger,
    ) -> io::Result<()> {
        let mut buffer = [0u8; MAX_MESSAGE_SIZE];

        loop {
            // Read header first
            match transport
                .read_exact(&mut buffer[..stun::HEADER_LENGTH])
                .await
            {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) => return Err(e),
            }

            // Extract message length from header (bytes 2-3)
            let message_length = u16::from_be_bytes([buffer[2], buffer[3]]) as usize;
            if message_length > MAX_MESSAGE_SIZE - stun::HEADER_LENGTH {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "Message too large",
                ));
            }

            // Read remaining message if any
            let total_length = stun::HEADER_LENGTH + message_length;
            if message_length > 0 {
                timeout(
                    READ_TIMEOUT,
                    transport.read_exact(&mut buffer[stun::HEADER_LENGTH..total_length]),
                )
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "Message read timed out"))??;
            }

            let shared: Arc<dyn Transport> = transport.clone();
            if let Err(e) = processor
                .process_message(&buffer[..total_length], shared)
                .await
            {
                debug!(logger, "TCP message failed: {}", e);
            }
        }
    }

    /**
     * Handles UDP messages
     *
     * Receives UDP packets and processes them as STUN messages. Responses go back to the
     * originating address through a `UdpTransport`. Errors are logged and the loop goes on.
     *
     * @param processor The message processor to handle the STUN messages
     * @param socket The UDP socket to receive/send on
     */
    async fn handle_udp_socket(processor: T, socket: Arc<UdpSocket>, logger: &Logger) {
        let mut buffer = [0u8; MAX_MESSAGE_SIZE];

        loop {
            let (n, client_addr) = match socket.recv_from(&mut buffer).await {
                Ok(received) => received,
                Err(e) => {
                    debug!(logger, "UDP receive error: {}", e);
                    continue;
                }
            };

            let transport: Arc<dyn Transport> =
                Arc::new(UdpTransport::new(Arc::clone(&socket), client_addr));
            if let Err(e) = processor.process_message(&buffer[..n], transport).await {
                debug!(logger, "UDP message from {} failed: {}", client_addr, e);
            }
        }
    }
}
