//! Simulated gateway.
//!
//! Serves scripted data through the same invocation/callback surface as the
//! vendor control, for tests and offline demos.

pub mod demo;
pub mod gateway;

pub use gateway::{Operation, SimCall, SimulatedDecoder, SimulatedGateway, SimulatedGatewayConfig};
