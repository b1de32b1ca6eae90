/**
 * A message processor for STUN messages
 *
 */
use std::sync::Arc;

use async_trait::async_trait;
use slog::{debug, trace};

use super::{
    attribute::{ErrorCode, StunAttribute, UnknownTypes},
    attribute_type, class,
    error::StunResult,
    error_code,
    message::StunMessage,
    TransactionId, MAGIC_COOKIE,
};
use crate::net::transport::Transport;
use crate::{utils, Context};

/**
 * Per-request state handed to method handlers: the unknown comprehension-required attributes
 * met while decoding the request, and how responses are to be encoded.
 */
#[derive(Debug, Clone)]
pub struct RequestContext<'a> {
    pub unknown: &'a UnknownTypes,
    pub integrity_key: Option<&'a [u8]>,
    pub fingerprint: bool,
    pub padding_byte: u8,
    pub software_name: &'a str,
}

/**
 * Handler for one STUN method. Returns `Ok(false)` when the message is not for this
 * handler, so the next one can be tried.
 */
#[async_trait]
pub trait MethodHandler: Send + Sync {
    async fn handle(
        &self,
        ctx: &RequestContext<'_>,
        transport: Arc<dyn Transport>,
        message: &StunMessage,
    ) -> StunResult<bool>;
}

/**
 * This trait defines an asynchronous method for processing one inbound STUN buffer. The
 * response, if any, is written to the transport. Returns whether the message was handled.
 */
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    async fn process_message(
        &self,
        input: &[u8],
        transport: Arc<dyn Transport>,
    ) -> StunResult<bool>;
}

/**
 * Build an error-class response carrying ERROR-CODE and SOFTWARE, encoded without
 * MESSAGE-INTEGRITY or FINGERPRINT.
 */
pub fn error_response(
    method: u16,
    transaction_id: TransactionId,
    error: ErrorCode,
    software_name: &str,
    padding_byte: u8,
) -> StunResult<Vec<u8>> {
    let mut response = StunMessage::new(method, class::ERROR_RESPONSE, transaction_id);
    response
        .add_attribute(StunAttribute::ErrorCode(error))
        .add_attribute(StunAttribute::Software(software_name.to_string()));
    response.encode(None, None, false, padding_byte)
}

/**
 * Implement the `MessageProcessor` trait for STUN: decode, validate the trailers, and
 * dispatch to the method handlers in order.
 */
#[derive(Clone)]
pub struct StunMessageProcessor {
    context: Arc<Context>,
    handlers: Vec<Arc<dyn MethodHandler>>,
}

impl StunMessageProcessor {
    /**
     * Creates a new `StunMessageProcessor` instance.
     *
     * @param context The server context containing configuration and logger.
     * @param handlers Method handlers, tried in order.
     */
    pub fn new(context: &Arc<Context>, handlers: Vec<Arc<dyn MethodHandler>>) -> Self {
        Self {
            context: Arc::clone(context),
            handlers,
        }
    }

    async fn reject_unauthorized(
        &self,
        request: &StunMessage,
        transport: &Arc<dyn Transport>,
    ) -> StunResult<()> {
        let output = error_response(
            request.method(),
            request.transaction_id,
            ErrorCode::new(error_code::UNAUTHORIZED, "Unauthorized"),
            &self.context.config.software_name,
            self.context.config.padding_byte,
        )?;
        trace!(
            self.context.logger,
            "--<-- [{}] STUN ERR 401: {}",
            hex::encode(request.transaction_id),
            utils::hex_encode_delimited(&output)
        );
        transport.write(&output).await?;
        Ok(())
    }
}

#[async_trait]
impl MessageProcessor for StunMessageProcessor {
    /**
     * Processes a STUN message.
     *
     * Undecodable buffers, buffers without the magic cookie and requests with a bad
     * FINGERPRINT are dropped. With an integrity key configured, a request whose
     * MESSAGE-INTEGRITY does not verify is answered with 401.
     *
     * @param input The input byte slice containing the STUN message.
     * @param transport Where the message came from, and where responses go.
     * @return Whether a handler took the message, or the error it reported.
     */
    async fn process_message(
        &self,
        input: &[u8],
        transport: Arc<dyn Transport>,
    ) -> StunResult<bool> {
        let logger = &self.context.logger;
        let mut unknown = UnknownTypes::new();

        let request = match StunMessage::from_bytes(input, &mut unknown) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(logger, "Dropping undecodable message: {}", e);
                return Ok(false);
            }
        };

        if request.magic_cookie != MAGIC_COOKIE {
            debug!(
                logger,
                "Dropping message with bad magic cookie 0x{:08x}", request.magic_cookie
            );
            return Ok(false);
        }

        trace!(
            logger,
            "-->-- [{}]: {}",
            hex::encode(request.transaction_id),
            utils::hex_encode_delimited(input)
        );

        if request.attribute(attribute_type::FINGERPRINT).is_some() {
            if let Err(e) = request.check_fingerprint() {
                debug!(
                    logger,
                    "[{}] dropping message: {}",
                    hex::encode(request.transaction_id),
                    e
                );
                return Ok(false);
            }
        }

        let integrity_key = self.context.config.integrity_key();
        if let Some(key) = integrity_key {
            if request.attribute(attribute_type::MESSAGE_INTEGRITY).is_some() {
                if let Err(e) = request.check_message_integrity(key) {
                    debug!(
                        logger,
                        "[{}] rejecting message: {}",
                        hex::encode(request.transaction_id),
                        e
                    );
                    if request.class() == class::REQUEST {
                        self.reject_unauthorized(&request, &transport).await?;
                    }
                    return Ok(true);
                }
            }
        }

        let ctx = RequestContext {
            unknown: &unknown,
            integrity_key,
            fingerprint: self.context.config.fingerprint,
            padding_byte: self.context.config.padding_byte,
            software_name: &self.context.config.software_name,
        };

        for handler in &self.handlers {
            if handler.handle(&ctx, Arc::clone(&transport), &request).await? {
                return Ok(true);
            }
        }

        debug!(
            logger,
            "Unhandled STUN message type 0x{:04x}", request.message_type
        );
        Ok(false)
    }
}
