/**
 * A STUN server that runs as one half of a primary/alternate pair, so that clients can
 * ask for responses from a different address (CHANGE-REQUEST, RFC 5780).
 */
use slog::{info, warn, Logger};
use std::sync::Arc;

pub mod config;
pub mod logging;
pub mod net;
pub mod pair;
pub mod stun;
mod utils;

use pair::AlternatePairing;
use stun::{
    binding::BindingHandler,
    processor::{MethodHandler, StunMessageProcessor},
};

/**
 * Represents the context shared by every part of the server.
 *
 * Fields:
 * - `config`: The server configuration settings.
 * - `logger`: The server logger instance.
 */
#[derive(Debug)]
pub struct Context {
    pub config: config::Settings,
    pub logger: Logger,
}

pub struct TwinServer {
    context: Arc<Context>,
}

impl TwinServer {
    /**
     * Creates a new `TwinServer` instance.
     *
     * This function loads the configuration and initializes the logger.
     */
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let cfg = config::Settings::new()?;

        let context = Context {
            logger: logging::init_logger(&cfg),
            config: cfg,
        };

        Ok(Self {
            context: Arc::new(context),
        })
    }

    /**
     * Run the server.
     *
     * Starts the pairing role (control listener on the primary, reconnecting client on the
     * alternate) and the TCP and UDP listeners, then blocks until they exit.
     *
     * @return A `Result` indicating success or failure.
     */
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let context = &self.context;
        let mut handles = vec![];

        info!(
            context.logger,
            "Starting STUN server on {}",
            context.config.bind_address()
        );

        let pairing = Arc::new(AlternatePairing::new(context));
        if context.config.alternate {
            if context.config.alternate_ip.is_none() {
                warn!(context.logger, "No alternate_ip set, relayed responses cannot be sent");
            }
            let alternate = Arc::clone(&pairing);
            handles.push(tokio::spawn(async move { alternate.run_alternate().await }));
        } else if pairing.is_primary() {
            let listener = pairing.bind_control().await?;
            let primary = Arc::clone(&pairing);
            let logger = context.logger.clone();
            handles.push(tokio::spawn(async move {
                if let Err(e) = primary.run_primary(listener).await {
                    warn!(logger, "Control listener stopped: {}", e);
                }
            }));
        } else {
            info!(context.logger, "No alternate_ip set, CHANGE-REQUEST is answered directly");
        }

        let binding: Arc<dyn MethodHandler> = Arc::new(BindingHandler::new(context, pairing));
        let stun_processor = StunMessageProcessor::new(context, vec![binding]);
        let network_server = net::NetworkServer::new(context, stun_processor);

        if !context.config.disable_tcp {
            handles.push(network_server.setup_tcp_listener().await?);
        }

        if !context.config.disable_udp {
            handles.push(network_server.setup_udp_listener()?);
        }

        for handle in handles {
            handle.await?;
        }
        Ok(())
    }
}
