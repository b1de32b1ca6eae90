/**
 * Binding method handler: answers a Binding request with the address it came from.
 *
 * A request carrying CHANGE-REQUEST with the "change IP" flag, received over UDP on a paired
 * primary, is answered through the alternate server instead. See RFC 5780 Section 7.
 */
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use slog::{debug, trace, warn, Logger};

use super::{
    address::StunAddress,
    attribute::{ErrorCode, StunAttribute},
    attribute_type, class,
    error::{StunError, StunResult},
    error_code,
    message::StunMessage,
    method,
    processor::{error_response, MethodHandler, RequestContext},
};
use crate::net::transport::{Transport, TransportKind};
use crate::pair::AlternatePairing;
use crate::{utils, Context};

pub struct BindingHandler {
    logger: Logger,
    pairing: Arc<AlternatePairing>,
}

impl BindingHandler {
    pub fn new(context: &Arc<Context>, pairing: Arc<AlternatePairing>) -> Self {
        Self {
            logger: context.logger.clone(),
            pairing,
        }
    }

    /**
     * The transport the response goes out on: a relay through the alternate server when a UDP
     * request asks to change the IP and this server can relay, otherwise the inbound one.
     */
    pub fn select_transport(
        &self,
        message: &StunMessage,
        transport: Arc<dyn Transport>,
    ) -> Arc<dyn Transport> {
        let change = match message.attribute(attribute_type::CHANGE_REQUEST) {
            Some(StunAttribute::ChangeRequest(cr)) => *cr,
            _ => return transport,
        };
        if !change.change_ip || transport.kind() != TransportKind::Datagram {
            return transport;
        }
        let relay = transport
            .remote_addr()
            .and_then(|remote| self.pairing.relay_for(remote, change.change_port));
        match relay {
            Some(relay) => Arc::new(relay),
            None => transport,
        }
    }

    async fn build_success(
        &self,
        message: &StunMessage,
        remote: SocketAddr,
        transport: &Arc<dyn Transport>,
        software_name: &str,
    ) -> StunMessage {
        let mapped = StunAddress::from(remote);
        let mut response = StunMessage::new(
            method::BINDING,
            class::SUCCESS_RESPONSE,
            message.transaction_id,
        );
        response
            .add_attribute(StunAttribute::XorMappedAddress(mapped))
            .add_attribute(StunAttribute::MappedAddress(mapped));

        if let Some(other) = self.pairing.other_address() {
            response.add_attribute(StunAttribute::OtherAddress(other.into()));
        }
        if let Some(origin) = transport.local_addr() {
            response.add_attribute(StunAttribute::ResponseOrigin(origin.into()));
        }
        response.add_attribute(StunAttribute::Software(software_name.to_string()));
        response
    }

    async fn send(
        &self,
        transport: &Arc<dyn Transport>,
        output: &[u8],
        message: &StunMessage,
    ) -> StunResult<()> {
        trace!(
            self.logger,
            "--<-- [{}]: {}",
            hex::encode(message.transaction_id),
            utils::hex_encode_delimited(output)
        );
        match transport.write(output).await {
            Ok(_) => Ok(()),
            Err(e) if transport.kind() == TransportKind::Relay => {
                warn!(
                    self.logger,
                    "[{}] response dropped: {}",
                    hex::encode(message.transaction_id),
                    e
                );
                Err(StunError::AlternateUnavailable)
            }
            Err(e) => Err(StunError::Io(e)),
        }
    }
}

#[async_trait]
impl MethodHandler for BindingHandler {
    async fn handle(
        &self,
        ctx: &RequestContext<'_>,
        transport: Arc<dyn Transport>,
        message: &StunMessage,
    ) -> StunResult<bool> {
        if message.method() != method::BINDING || message.class() != class::REQUEST {
            return Ok(false);
        }
        let tid = hex::encode(message.transaction_id);
        debug!(self.logger, "[{}] binding request from {:?}", tid, transport.remote_addr());

        if !ctx.unknown.is_empty() {
            debug!(
                self.logger,
                "[{}] unknown attributes {:04x?}",
                tid,
                ctx.unknown.as_slice()
            );
            let output = error_response(
                method::BINDING,
                message.transaction_id,
                ErrorCode::new(error_code::UNKNOWN_ATTRIBUTE, "Unknown Attribute"),
                ctx.software_name,
                ctx.padding_byte,
            )?;
            self.send(&transport, &output, message).await?;
            return Ok(true);
        }

        let remote = match transport.remote_addr() {
            Some(remote) => remote,
            None => {
                let output = error_response(
                    method::BINDING,
                    message.transaction_id,
                    ErrorCode::new(error_code::SERVER_ERROR, "Cannot determine address"),
                    ctx.software_name,
                    ctx.padding_byte,
                )?;
                self.send(&transport, &output, message).await?;
                return Ok(true);
            }
        };

        let out_transport = self.select_transport(message, transport);
        let mut response = self
            .build_success(message, remote, &out_transport, ctx.software_name)
            .await;
        let output = response.encode(None, ctx.integrity_key, ctx.fingerprint, ctx.padding_byte)?;
        self.send(&out_transport, &output, message).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::net::transport::UdpTransport;
    use crate::pair::frame::RelayFrame;
    use crate::stun::attribute::{ChangeRequest, UnknownTypes};
    use std::io;
    use tokio::net::UdpSocket;
    use tokio::sync::Mutex;

    /// In-memory transport recording its writes
    struct FakeTransport {
        kind: TransportKind,
        local: Option<SocketAddr>,
        remote: Option<SocketAddr>,
        written: Mutex<Vec<Vec<u8>>>,
    }

    impl FakeTransport {
        fn new(kind: TransportKind, remote: Option<&str>) -> Arc<Self> {
            Arc::new(Self {
                kind,
                local: Some("192.168.1.113:3478".parse().unwrap()),
                remote: remote.map(|r| r.parse().unwrap()),
                written: Mutex::new(Vec::new()),
            })
        }

        async fn response(&self) -> StunMessage {
            let written = self.written.lock().await;
            assert_eq!(written.len(), 1);
            let mut unknown = UnknownTypes::new();
            StunMessage::from_bytes(&written[0], &mut unknown).unwrap()
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn write(&self, buf: &[u8]) -> io::Result<usize> {
            self.written.lock().await.push(buf.to_vec());
            Ok(buf.len())
        }

        async fn read(&self, _buf: &mut [u8]) -> io::Result<usize> {
            Ok(0)
        }

        async fn close(&self) -> io::Result<()> {
            Ok(())
        }

        fn local_addr(&self) -> Option<SocketAddr> {
            self.local
        }

        fn remote_addr(&self) -> Option<SocketAddr> {
            self.remote
        }

        fn kind(&self) -> TransportKind {
            self.kind
        }
    }

    fn get_context(alternate_ip: Option<&str>) -> Arc<Context> {
        let mut config = Settings::default();
        config.alternate_ip = alternate_ip.map(|ip| ip.parse().unwrap());
        config.software_name = "test1".to_string();
        Arc::new(Context {
            config,
            logger: Logger::root(slog::Discard, slog::o!()),
        })
    }

    fn get_handler(alternate_ip: Option<&str>) -> (BindingHandler, Arc<AlternatePairing>) {
        let context = get_context(alternate_ip);
        let pairing = Arc::new(AlternatePairing::new(&context));
        (BindingHandler::new(&context, Arc::clone(&pairing)), pairing)
    }

    fn request_context(unknown: &UnknownTypes) -> RequestContext<'_> {
        RequestContext {
            unknown,
            integrity_key: None,
            fingerprint: false,
            padding_byte: 0x20,
            software_name: "test1",
        }
    }

    fn binding_request(change: Option<ChangeRequest>) -> StunMessage {
        let mut msg = StunMessage::new(method::BINDING, class::REQUEST, [3u8; 12]);
        if let Some(cr) = change {
            msg.add_attribute(StunAttribute::ChangeRequest(cr));
        }
        msg
    }

    const CHANGE_IP: ChangeRequest = ChangeRequest {
        change_ip: true,
        change_port: false,
    };

    #[tokio::test]
    async fn test_success_response() {
        let (handler, _) = get_handler(None);
        let transport = FakeTransport::new(TransportKind::Datagram, Some("61.159.104.242:20226"));
        let unknown = UnknownTypes::new();

        let handled = handler
            .handle(&request_context(&unknown), transport.clone(), &binding_request(None))
            .await
            .unwrap();
        assert!(handled);

        let response = transport.response().await;
        let client: StunAddress = "61.159.104.242:20226".parse::<SocketAddr>().unwrap().into();
        assert_eq!(response.class(), class::SUCCESS_RESPONSE);
        assert_eq!(response.method(), method::BINDING);
        assert_eq!(response.transaction_id, [3u8; 12]);
        assert_eq!(
            response.attributes,
            vec![
                StunAttribute::XorMappedAddress(client),
                StunAttribute::MappedAddress(client),
                StunAttribute::ResponseOrigin(
                    "192.168.1.113:3478".parse::<SocketAddr>().unwrap().into()
                ),
                StunAttribute::Software("test1".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_response_trailers() {
        let (handler, _) = get_handler(None);
        let transport = FakeTransport::new(TransportKind::Stream, Some("10.0.0.1:5000"));
        let unknown = UnknownTypes::new();
        let mut ctx = request_context(&unknown);
        ctx.integrity_key = Some(&b"secret"[..]);
        ctx.fingerprint = true;

        handler
            .handle(&ctx, transport.clone(), &binding_request(None))
            .await
            .unwrap();
        let response = transport.response().await;
        response.check_message_integrity(b"secret").unwrap();
        response.check_fingerprint().unwrap();
    }

    #[tokio::test]
    async fn test_unknown_attribute_error() {
        let (handler, _) = get_handler(None);
        let transport = FakeTransport::new(TransportKind::Datagram, Some("10.0.0.1:5000"));
        let mut unknown = UnknownTypes::new();
        unknown.push(0x0002);

        assert!(handler
            .handle(&request_context(&unknown), transport.clone(), &binding_request(None))
            .await
            .unwrap());

        let response = transport.response().await;
        assert_eq!(response.class(), class::ERROR_RESPONSE);
        assert_eq!(response.message_type, 0x0111);
        assert_eq!(
            response.attributes,
            vec![
                StunAttribute::ErrorCode(ErrorCode::new(420, "Unknown Attribute")),
                StunAttribute::Software("test1".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_remote_address() {
        let (handler, _) = get_handler(None);
        let transport = FakeTransport::new(TransportKind::Stream, None);
        let unknown = UnknownTypes::new();

        assert!(handler
            .handle(&request_context(&unknown), transport.clone(), &binding_request(None))
            .await
            .unwrap());
        let response = transport.response().await;
        assert_eq!(
            response.attributes[0],
            StunAttribute::ErrorCode(ErrorCode::new(500, "Cannot determine address"))
        );
    }

    #[tokio::test]
    async fn test_not_handled() {
        let (handler, _) = get_handler(None);
        let transport = FakeTransport::new(TransportKind::Datagram, Some("10.0.0.1:5000"));
        let unknown = UnknownTypes::new();
        let ctx = request_context(&unknown);

        let allocate = StunMessage::new(method::ALLOCATE, class::REQUEST, [1u8; 12]);
        assert!(!handler.handle(&ctx, transport.clone(), &allocate).await.unwrap());

        let indication = StunMessage::new(method::BINDING, class::INDICATION, [1u8; 12]);
        assert!(!handler.handle(&ctx, transport.clone(), &indication).await.unwrap());

        assert!(transport.written.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_change_request_selects_relay() {
        let (handler, _) = get_handler(Some("192.168.1.114"));

        let udp: Arc<dyn Transport> =
            FakeTransport::new(TransportKind::Datagram, Some("61.159.104.242:20226"));
        let chosen = handler.select_transport(&binding_request(Some(CHANGE_IP)), udp);
        assert_eq!(chosen.kind(), TransportKind::Relay);
        assert_eq!(chosen.local_addr(), Some("192.168.1.114:3478".parse().unwrap()));

        let both = ChangeRequest {
            change_ip: true,
            change_port: true,
        };
        let udp: Arc<dyn Transport> =
            FakeTransport::new(TransportKind::Datagram, Some("61.159.104.242:20226"));
        let chosen = handler.select_transport(&binding_request(Some(both)), udp);
        assert_eq!(chosen.local_addr(), Some("192.168.1.114:3479".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_change_request_ignored() {
        let (handler, _) = get_handler(Some("192.168.1.114"));

        // stream transports have no alternate source
        let tcp: Arc<dyn Transport> =
            FakeTransport::new(TransportKind::Stream, Some("61.159.104.242:20226"));
        let chosen = handler.select_transport(&binding_request(Some(CHANGE_IP)), tcp);
        assert_eq!(chosen.kind(), TransportKind::Stream);

        // only the port changes
        let port_only = ChangeRequest {
            change_ip: false,
            change_port: true,
        };
        let udp: Arc<dyn Transport> =
            FakeTransport::new(TransportKind::Datagram, Some("61.159.104.242:20226"));
        let chosen = handler.select_transport(&binding_request(Some(port_only)), udp);
        assert_eq!(chosen.kind(), TransportKind::Datagram);

        // no pairing configured
        let (handler, _) = get_handler(None);
        let udp: Arc<dyn Transport> =
            FakeTransport::new(TransportKind::Datagram, Some("61.159.104.242:20226"));
        let chosen = handler.select_transport(&binding_request(Some(CHANGE_IP)), udp);
        assert_eq!(chosen.kind(), TransportKind::Datagram);
    }

    #[tokio::test]
    async fn test_change_request_relayed_to_alternate() {
        let (handler, pairing) = get_handler(Some("192.168.1.114"));
        let (primary_end, mut alternate_end) = tokio::io::duplex(1024);
        pairing.session().attach(primary_end).await;

        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let transport: Arc<dyn Transport> = Arc::new(UdpTransport::new(
            socket,
            "61.159.104.242:20226".parse().unwrap(),
        ));
        let unknown = UnknownTypes::new();

        assert!(handler
            .handle(
                &request_context(&unknown),
                transport,
                &binding_request(Some(CHANGE_IP))
            )
            .await
            .unwrap());

        let frame = RelayFrame::read_from(&mut alternate_end).await.unwrap();
        assert_eq!(frame.remote, "61.159.104.242:20226".parse().unwrap());
        assert_eq!(frame.local_port, 3478);

        let mut unknown = UnknownTypes::new();
        let response = StunMessage::from_bytes(&frame.payload, &mut unknown).unwrap();
        let other: StunAddress = "192.168.1.114:3479".parse::<SocketAddr>().unwrap().into();
        let origin: StunAddress = "192.168.1.114:3478".parse::<SocketAddr>().unwrap().into();
        assert_eq!(response.attributes[2], StunAttribute::OtherAddress(other));
        assert_eq!(response.attributes[3], StunAttribute::ResponseOrigin(origin));
    }

    #[tokio::test]
    async fn test_change_request_without_alternate() {
        let (handler, _) = get_handler(Some("192.168.1.114"));
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let transport: Arc<dyn Transport> = Arc::new(UdpTransport::new(
            socket,
            "61.159.104.242:20226".parse().unwrap(),
        ));
        let unknown = UnknownTypes::new();

        let result = handler
            .handle(
                &request_context(&unknown),
                transport,
                &binding_request(Some(CHANGE_IP)),
            )
            .await;
        assert!(matches!(result, Err(StunError::AlternateUnavailable)));
    }
}
