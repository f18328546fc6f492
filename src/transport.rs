use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::timeout;
use tracing::{debug, trace};

/// Datagram exchange with the server, abstracted for testability
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PacketTransport: Send + Sync {
    async fn send_datagram(&self, buf: &[u8]) -> anyhow::Result<()>;

    /// Waits for the next datagram and returns its length
    async fn recv_datagram(&self, buf: &mut [u8]) -> anyhow::Result<usize>;
}


/// A UDP socket connected to the server, so datagrams from other peers are filtered out by the
///  OS. The socket is closed when this is dropped.
pub struct UdpTransport {
    socket: UdpSocket,
    receive_timeout: Option<Duration>,
}

impl UdpTransport {
    pub async fn connect(host: &str, port: u16, receive_timeout: Option<Duration>) -> anyhow::Result<UdpTransport> {
        let peer_addr = lookup_host((host, port)).await
            .with_context(|| format!("resolving {}", host))?
            .next()
            .ok_or_else(|| anyhow!("{} did not resolve to any address", host))?;

        let local_addr: SocketAddr = if peer_addr.is_ipv4() {
            "0.0.0.0:0".parse()?
        }
        else {
            "[::]:0".parse()?
        };

        let socket = UdpSocket::bind(local_addr).await?;
        socket.connect(peer_addr).await
            .with_context(|| format!("connecting UDP socket to {}", peer_addr))?;
        debug!("UDP socket {:?} connected to {}", socket.local_addr(), peer_addr);

        Ok(UdpTransport {
            socket,
            receive_timeout,
        })
    }
}

#[async_trait]
impl PacketTransport for UdpTransport {
    async fn send_datagram(&self, buf: &[u8]) -> anyhow::Result<()> {
        let n = self.socket.send(buf).await?;
        if n != buf.len() {
            bail!("datagram truncated: sent {} of {} bytes", n, buf.len());
        }
        trace!("sent datagram of {} bytes", n);
        Ok(())
    }

    async fn recv_datagram(&self, buf: &mut [u8]) -> anyhow::Result<usize> {
        let n = match self.receive_timeout {
            None => self.socket.recv(buf).await?,
            Some(t) => timeout(t, self.socket.recv(buf)).await
                .map_err(|_| anyhow!("no datagram from the server within {:?}", t))??,
        };
        trace!("received datagram of {} bytes", n);
        Ok(n)
    }
}
