#![forbid(unsafe_code)]

//! Real-time quote and order hub: QUIC sessions, room fan-out, unread
//! counters and the order lifecycle.

pub mod config;
pub mod quic;
pub mod server;
pub mod store;
