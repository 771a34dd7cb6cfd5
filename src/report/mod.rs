//! Output module.
//!
//! This module handles:
//! - Colored console output and progress bars
//! - JSON output to stdout or files

pub mod console;
pub mod json;

pub use console::ConsoleOutput;
pub use json::{write_json, write_names};
