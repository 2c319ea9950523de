//! Socket gateway adapter.
//!
//! The vendor control only runs inside a Windows COM host. A small helper
//! process hosts it and exposes each control method over TCP; this crate is
//! the Rust side of that link.

pub mod client;
pub mod protocol;

pub use client::{SocketDecoder, SocketGateway, SocketGatewayConfig};
