//! TCP listener and connection plumbing

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::debug;

/// Network errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}

/// Result type for network operations
pub type Result<T> = std::result::Result<T, Error>;

fn resolve(addr: &str) -> Result<SocketAddr> {
    addr.to_socket_addrs()
        .map_err(|e| Error::InvalidAddress(format!("{}: {}", addr, e)))?
        .next()
        .ok_or_else(|| Error::InvalidAddress(addr.to_string()))
}

/// Bind a listening socket with SO_REUSEADDR
///
/// Port 0 picks a free port; read it back with `local_addr()`.
pub fn bind_listener(addr: &str, backlog: i32) -> Result<TcpListener> {
    let addr = resolve(addr)?;
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&SockAddr::from(addr))?;
    socket.listen(backlog)?;
    let listener: TcpListener = socket.into();
    debug!(addr = %listener.local_addr()?, backlog, "listening");
    Ok(listener)
}

/// Accept one connection with TCP_NODELAY set
pub fn accept(listener: &TcpListener) -> Result<(TcpStream, SocketAddr)> {
    let (stream, peer) = listener.accept()?;
    stream.set_nodelay(true)?;
    debug!(peer = %peer, "connection accepted");
    Ok((stream, peer))
}

/// Connect with an optional timeout and TCP_NODELAY set
pub fn connect(addr: &str, timeout: Option<Duration>) -> Result<TcpStream> {
    let addr = resolve(addr)?;
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    match timeout {
        Some(timeout) => socket.connect_timeout(&SockAddr::from(addr), timeout)?,
        None => socket.connect(&SockAddr::from(addr))?,
    }
    socket.set_nodelay(true)?;
    Ok(socket.into())
}
