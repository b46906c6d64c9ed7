//! CLI Module
//!
//! Provides command-line interface functionality including:
//! - Exit codes for automation
//! - Snapshot rendering as text, JSON or CSV

pub mod exit_codes;
pub mod render;

pub use exit_codes::{
    exit_code_description, exit_code_table, print_exit_codes, transport_exit_code, CliResult, ExitCodes,
};
pub use render::{csv_header, render_register_map, render_snapshot, OutputFormat};
