//! HTTP/2 protocol implementation
//!
//! An RFC 7540 / RFC 7541 engine split into layers that can each be used and
//! tested on their own.
//!
//! # Architecture
//!
//! - **Frame codec** ([`codec`], [`frames`]): the 9-octet frame header, every
//!   frame type's payload layout and per-frame validation.
//! - **HPACK** ([`hpack`]): static and dynamic tables, Huffman coding and the
//!   header block encoder and decoder.
//! - **Streams** ([`stream`]): the stream state machine and stream id rules.
//! - **Flow control** ([`flow_control`]): send and receive windows for the
//!   connection and each stream.
//! - **Settings** ([`settings`]): the SETTINGS table and its ACK handshake.
//! - **Connection** ([`connection`]): ties the layers together, owns all
//!   streams, decides whether an error resets a stream or ends the
//!   connection, and drives GOAWAY.
//!
//! The connection engine does no I/O. [`server::H2Server`] drives one over a
//! transport session, and [`client::H2Client`] writes scripted, possibly
//! malformed, frames for testing.
//!
//! # Examples
//!
//! ## Engine
//!
//! ```
//! use h2engine::http::h2::{Connection, ConnectionConfig, Event, HeaderBlock};
//! use bytes::Bytes;
//!
//! let mut client = Connection::client(ConnectionConfig::client());
//! let mut server = Connection::server(ConnectionConfig::server());
//!
//! let id = client
//!     .open_stream(HeaderBlock::request("GET", "https", "/").with_authority("localhost"), true)
//!     .unwrap();
//! server.receive(&client.take_outbound()).unwrap();
//! while server.poll_event().is_some() {}
//!
//! server
//!     .send_response(id, &HeaderBlock::response(200), Bytes::from_static(b"hi"))
//!     .unwrap();
//! client.receive(&server.take_outbound()).unwrap();
//!
//! let events: Vec<Event> = std::iter::from_fn(|| client.poll_event()).collect();
//! assert!(events.iter().any(|e| matches!(e, Event::Data { data, end_stream: true, .. } if &data[..] == b"hi")));
//! ```
//!
//! ## Server
//!
//! ```no_run
//! use h2engine::http::h2::{H2Request, H2Response, H2ServerBuilder};
//! use h2engine::http::session::FdSessionOps;
//! use std::net::TcpListener;
//!
//! let listener = TcpListener::bind("127.0.0.1:8080").unwrap();
//! let (tcp_stream, _) = listener.accept().unwrap();
//!
//! let mut server = H2ServerBuilder::new()
//!     .max_concurrent_streams(50)
//!     .build(FdSessionOps::new(tcp_stream))
//!     .unwrap();
//! server
//!     .serve(&mut |_req: &H2Request| H2Response::new(200).body("OK"))
//!     .unwrap();
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod flood;
pub mod flow_control;
pub mod frames;
pub mod headers;
pub mod hpack;
pub mod priority;
pub mod profile;
pub mod server;
pub mod settings;
pub mod stream;

pub use client::{H2Client, H2ClientBuilder};
pub use config::{ConnectionConfig, ConnectionConfigBuilder, SchedulingPolicy};
pub use connection::{Connection, ConnectionState, Event, Role};
pub use error::{Error, ErrorCode, Result};
pub use flow_control::WindowUpdatePolicy;
pub use frames::{DataFrame, Frame, FrameFlags, FrameType, HeadersFrame, SettingsFrame};
pub use headers::HeaderBlock;
pub use profile::ConformanceProfile;
pub use server::{H2Request, H2Response, H2Server, H2ServerBuilder, Handler};
pub use settings::{Settings, SettingsBuilder};
pub use stream::{H2Stream, StreamId, StreamState};

/// HTTP/2 connection preface that must be sent by clients
///
/// From RFC 7540 Section 3.5:
/// "PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n"
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Default initial window size (65535 bytes)
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65535;

/// Default maximum frame size (16384 bytes)
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16384;

/// Default header table size (4096 bytes)
pub const DEFAULT_HEADER_TABLE_SIZE: u32 = 4096;

/// Maximum stream ID value (2^31 - 1)
pub const MAX_STREAM_ID: u32 = 0x7FFFFFFF;

/// Stream ID 0 (connection-level)
pub const CONNECTION_STREAM_ID: u32 = 0;
