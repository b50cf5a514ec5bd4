//! Integration test utilities for the chat sync core
//!
//! This crate provides an in-memory authoritative ledger that implements the backend port,
//! and helpers for running the gateway and talking to it over real sockets.

pub mod helpers;
pub mod ledger;

pub use helpers::*;
pub use ledger::{Ledger, LedgerBackend, Op};
