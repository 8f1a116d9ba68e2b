//! h2engine - HTTP/2 protocol engine
//!
//! This crate provides a sans-I/O HTTP/2 connection engine (frame codec,
//! HPACK, stream states, flow control, settings negotiation and connection
//! lifecycle) together with a small blocking server driver and a scripted
//! frame-level client for exercising it over real sockets.

pub mod http;
pub mod net;
