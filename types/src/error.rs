//! Errors raised by the timestamp codec.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimestampError {
    #[error("timestamp truncated: need 24 bytes, have {available}")]
    Truncated { available: usize },

    #[error("unexpected byte {found:#04x} at offset {offset} of timestamp")]
    Malformed { offset: usize, found: u8 },

    #[error("{field} value {value} is out of range")]
    FieldOutOfRange { field: &'static str, value: u32 },

    #[error("calendar year window {first}..{end} is empty or starts before 1970")]
    InvalidYearWindow { first: u32, end: u32 },
}
