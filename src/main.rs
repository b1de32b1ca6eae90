/**
 * The main entry point for the application, it creates
 * the server object and passes control to it.
 */
use twin_stun::TwinServer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let server = TwinServer::new()?;
    server.run().await
}
