//! Core module containing the polling machinery of Meterpoll
//!
//! This module provides:
//! - Register map definitions and the EM6400NG default map
//! - Float32 decoding with optional word swap
//! - Transport layer for Modbus RTU over serial
//! - Connection wrapper with retry policy
//! - Polling engine with a dedicated worker thread per session
//! - Latest-value result sink
//! - Diagnostic event hub

pub mod connection;
pub mod decoder;
pub mod engine;
pub mod error;
pub mod events;
pub mod register;
pub mod retry;
pub mod sink;
pub mod transport;
