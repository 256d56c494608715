//! Channel event names and the request kinds that map onto them.

use std::fmt;

/// Sent by the client once the channel is open.
pub const AUTHENTICATE: &str = "authenticate";
/// Companion reply to [`AUTHENTICATE`].
pub const AUTHENTICATED: &str = "authenticated";
/// First-time link with key agreement.
pub const LINK_REQUEST: &str = "linkRequest";
/// Resumption of a stored link.
pub const RELINK_REQUEST: &str = "relinkRequest";
/// Companion reply to both link request kinds.
pub const LINK: &str = "link";
/// Encrypted api traffic, both directions.
pub const API: &str = "api";

/// Remote error code that forces a full session reset.
pub const FATAL_ERROR_CODE: i64 = 2;

/// Kind of an outgoing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Authenticate,
    LinkRequest,
    RelinkRequest,
    Api,
}

impl RequestKind {
    /// Channel event the request is emitted on. Doubles as the envelope `type`.
    pub fn event_name(self) -> &'static str {
        match self {
            RequestKind::Authenticate => AUTHENTICATE,
            RequestKind::LinkRequest => LINK_REQUEST,
            RequestKind::RelinkRequest => RELINK_REQUEST,
            RequestKind::Api => API,
        }
    }

    /// Channel event the companion answers on.
    pub fn response_event(self) -> &'static str {
        match self {
            RequestKind::Authenticate => AUTHENTICATED,
            RequestKind::LinkRequest | RequestKind::RelinkRequest => LINK,
            RequestKind::Api => API,
        }
    }

    /// Parse an envelope `type` string.
    pub fn from_event_name(name: &str) -> Option<Self> {
        match name {
            AUTHENTICATE => Some(RequestKind::Authenticate),
            LINK_REQUEST => Some(RequestKind::LinkRequest),
            RELINK_REQUEST => Some(RequestKind::RelinkRequest),
            API => Some(RequestKind::Api),
            _ => None,
        }
    }

    /// Whether payloads of this kind are encrypted with the session cipher.
    pub fn is_encrypted(self) -> bool {
        matches!(self, RequestKind::Api)
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_name())
    }
}
