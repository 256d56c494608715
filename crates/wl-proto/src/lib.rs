//! Wire vocabulary for the wallet link protocol.
//!
//! Messages travel as JSON payloads over named channel events:
//! - `authenticate` / `authenticated`
//! - `linkRequest` / `relinkRequest` answered by `link`
//! - `api` in both directions
//!
//! Every outgoing message is wrapped in a [`RequestEnvelope`]; every reply
//! arrives as a [`ResponseEnvelope`] carrying the same correlation id.

#![forbid(unsafe_code)]

pub mod events;
pub mod messages;
pub mod validation;

#[cfg(test)]
mod proptests;

pub use events::*;
pub use messages::*;
