//! Ambient stack shared by the block manager core and its server
//! binary: error type, configuration, background worker scheduling,
//! and time helpers.

#[macro_use]
extern crate tracing;

pub mod background;
pub mod config;
pub mod error;
pub mod time;
