//! Test doubles for the transport layer
//!
//! Lets the whole client run against an in-memory server, with no sockets.

pub mod mocks;

pub use mocks::*;
