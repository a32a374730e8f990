//! Listener and socket setup.
//!
//! The listener is built through `socket2` so `SO_REUSEADDR` and
//! non-blocking mode are set before the bind, and every accepted stream
//! gets `TCP_NODELAY` — command traffic is tiny and latency-sensitive.

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};

/// Socket options applied to the listener and each accepted connection.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Disable Nagle's algorithm on accepted streams. Default: true.
    pub tcp_nodelay: bool,
    /// Enable `SO_REUSEADDR` on the listener. Default: true except Windows.
    pub reuse_addr: bool,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            tcp_nodelay: true,
            reuse_addr: !cfg!(target_os = "windows"),
        }
    }
}

/// Apply per-connection options to an accepted stream.
pub fn configure_stream(stream: &TcpStream, config: &SocketConfig) -> std::io::Result<()> {
    stream.set_nodelay(config.tcp_nodelay)
}

/// Bind a listener on `addr` with the configured socket options.
pub fn create_listener(addr: SocketAddr, config: &SocketConfig) -> std::io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;
    if config.reuse_addr {
        socket.set_reuse_address(true)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(128)?;

    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener)
}

/// The wildcard IPv4 bind address for a port.
pub fn bind_address(port: u16) -> SocketAddr {
    SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), port)
}
