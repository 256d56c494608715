//! Channel abstraction for the wallet link protocol.
//!
//! The session only consumes a bidirectional, named-event message channel:
//! connect, send an event, receive events, disconnect. Concrete transports
//! (websocket, IPC) live with the application; this crate defines the trait
//! and a scripted in-memory implementation for tests.

pub mod traits;
pub mod testing;

pub use traits::*;
pub use testing::*;
