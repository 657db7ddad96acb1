//! Eight-byte opaque tokens used as request and span identifiers.
//!
//! Log lines carry ids as 8 ASCII characters. They are never decoded as
//! text: the raw bytes are reinterpreted as a little-endian `u64` and are
//! written back verbatim when a trace is rendered.

use std::fmt;

/// Width of every id token in a log line.
pub const TOKEN_LEN: usize = 8;

/// Literal separating the caller token from the callee token.
pub const ARROW: &[u8; 2] = b"->";

/// Marker written in place of `<caller>->` when a span has no caller.
pub const NULL_MARKER: &[u8; 6] = b"null->";

/// Mask selecting the six low bytes of an 8-byte little-endian read.
pub const NULL_MARKER_MASK: u64 = 0x0000_ffff_ffff_ffff;

const fn encode_marker(marker: &[u8; 6]) -> u64 {
    u64::from_le_bytes([
        marker[0], marker[1], marker[2], marker[3], marker[4], marker[5], 0, 0,
    ])
}

macro_rules! token_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            pub const fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            /// Interpret 8 token bytes exactly as they appear in the log.
            pub const fn from_bytes(bytes: [u8; TOKEN_LEN]) -> Self {
                Self(u64::from_le_bytes(bytes))
            }

            pub const fn as_raw(self) -> u64 {
                self.0
            }

            /// The original token bytes.
            pub const fn to_bytes(self) -> [u8; TOKEN_LEN] {
                self.0.to_le_bytes()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let bytes = self.to_bytes();
                let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
                write!(f, "{}", String::from_utf8_lossy(&bytes[..end]))
            }
        }
    };
}

token_type!(
    /// Identifier of one request (one call tree).
    RequestId
);

token_type!(
    /// Identifier of one caller→callee span within a request.
    SpanId
);

/// Reserved id of the synthetic root span, the encoding of `null->`.
pub const NULL_SPAN: SpanId = SpanId::from_raw(encode_marker(NULL_MARKER));

impl SpanId {
    /// Whether this is the synthetic root of a request.
    pub fn is_root(self) -> bool {
        self == NULL_SPAN
    }
}

/// Whether an 8-byte caller read starts with the `null->` marker.
///
/// Only the low 48 bits take part; the two high bytes already belong to
/// the callee token.
pub fn is_null_marker(raw: u64) -> bool {
    raw & NULL_MARKER_MASK == NULL_SPAN.as_raw()
}
