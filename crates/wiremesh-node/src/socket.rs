//! Port-pinned UDP sockets
//!
//! The node uses one local UDP port for the gateway link and every
//! per-peer connected socket, so the NAT mapping observed by the
//! gateway is the same one peers punch through. SO_REUSEPORT (and
//! SO_REUSEADDR) allow several connected sockets to share that port.

use std::net::{Ipv4Addr, SocketAddr};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

/// Bind a nonblocking UDP socket on the pinned local port. Port 0 asks
/// the OS for a free port; read it back via `local_addr()`.
pub(crate) fn bind_pinned(port: u16) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;

    let bind_addr: SocketAddr = (Ipv4Addr::UNSPECIFIED, port).into();
    socket.bind(&bind_addr.into())?;

    UdpSocket::from_std(socket.into())
}

/// Dial a connected UDP socket from the pinned local port to a remote
/// endpoint.
pub(crate) async fn dial_pinned(local_port: u16, remote: SocketAddr) -> std::io::Result<UdpSocket> {
    let socket = bind_pinned(local_port)?;
    socket.connect(remote).await?;
    Ok(socket)
}
