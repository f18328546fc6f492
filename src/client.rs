use crate::config::{ClientConfig, SessionConfig};
use crate::handshake::{handshake, HelloReply, HelloRequest};
use crate::keys::generate_keys;
use crate::session::{Session, SessionOutcome};
use crate::transport::UdpTransport;
use anyhow::Context;
use tokio::net::TcpStream;
use tracing::{debug, info};

/// A complete run: handshake over TCP, then the UDP session. Both sockets are closed when this
///  returns, successfully or not.
pub async fn run_client(config: &ClientConfig) -> anyhow::Result<SessionOutcome> {
    config.validate()?;

    let my_keys = if config.capabilities.encryption {
        generate_keys(config.key_count)
    }
    else {
        Vec::new()
    };

    let request = HelloRequest::new(config.capabilities, my_keys);
    let reply = tcp_handshake(config, &request).await?;

    let transport = UdpTransport::connect(&config.server_host, reply.udp_port, config.receive_timeout).await?;
    let session = Session::new(reply.cid, transport, SessionConfig::new(config)?, request.keys, reply.keys);
    let outcome = session.run().await?;

    info!("session complete");
    Ok(outcome)
}

async fn tcp_handshake(config: &ClientConfig, request: &HelloRequest) -> anyhow::Result<HelloReply> {
    let mut stream = TcpStream::connect((config.server_host.as_str(), config.server_tcp_port)).await
        .with_context(|| format!("connecting to {}:{}", config.server_host, config.server_tcp_port))?;
    debug!("TCP connection to {:?} established", stream.peer_addr());

    handshake(&mut stream, request, config.handshake_read_len).await
}
