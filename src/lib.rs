//! code-exec-daemon library
//!
//! This crate provides the execution service behind the editor's "Run"
//! button:
//! - Per-language profiles (interpreted, compile-then-run, echo)
//! - Toolchain availability probing
//! - Deadline-bounded child processes with scoped scratch cleanup
//! - The HTTP surface (`POST /execute`)

pub mod config;
pub mod error;
pub mod executor;
pub mod language;
pub mod prober;
pub mod runner;
pub mod server;
