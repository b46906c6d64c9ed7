//! Utility helpers

pub mod ports;
