//! HTTP transport layer
//!
//! The protocol engine itself lives in [`h2`] and never touches a socket.
//! This module supplies the transport it is driven over:
//!
//! - `SessionOps` trait defines operations (poll, read, write, close)
//! - `HttpSession` wraps a `SessionOps` with a timeout and full-buffer writes
//! - `FdSessionOps` implements `SessionOps` for a plain `TcpStream`
//!
//! # Examples
//!
//! ```no_run
//! use h2engine::http::h2::server::H2ServerBuilder;
//! use h2engine::http::h2::server::{H2Request, H2Response};
//! use h2engine::http::session::FdSessionOps;
//! use h2engine::net;
//!
//! let listener = net::bind_listener("127.0.0.1:8080", 128).unwrap();
//! let (stream, _) = net::accept(&listener).unwrap();
//!
//! let mut server = H2ServerBuilder::new().build(FdSessionOps::new(stream)).unwrap();
//! server
//!     .serve(&mut |req: &H2Request| H2Response::new(200).body(format!("hello {}", req.path())))
//!     .unwrap();
//! ```

pub mod h2;
pub mod session;

pub use session::{FdSessionOps, HttpSession, PollEvents, SessionOps};

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, Error>;

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] crate::net::Error),

    #[error("Timeout")]
    Timeout,

    #[error("Connection closed")]
    ConnectionClosed,
}
