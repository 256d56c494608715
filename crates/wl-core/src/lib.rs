//! Wallet link core: the client side of a session with a wallet companion.
//!
//! This crate implements:
//! - The session state machine (connect, authenticate, link, reset)
//! - The link/relink handshake with key agreement
//! - The hash-chain cursor for correlated requests
//! - The request registry and inbound event dispatch
//! - Typed api calls and signer injection

#![forbid(unsafe_code)]

// Core state machine
pub mod session;
pub mod link;

// Services
pub mod dispatch;
pub mod registry;
pub mod api;
pub mod inject;

// Supporting modules
pub mod chain;
pub mod config;
pub mod errors;
pub mod identity;
pub mod harness;

#[cfg(test)]
mod proptests;

pub use config::{AppConfig, ConnectOptions, LinkOptions};
pub use errors::SessionError;
pub use identity::Identity;
pub use session::{Session, SessionStatus};
