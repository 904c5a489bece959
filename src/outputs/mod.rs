//! Output sinks for response payloads.
//!
//! - [`json`]: writes each payload to a dated JSON file

pub mod json;
