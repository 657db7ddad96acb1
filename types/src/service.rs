//! Interned service identifiers.

use std::fmt;

/// Small integer id of an interned service name.
///
/// Id 0 is reserved: a span carrying it has been referenced as a caller
/// but its own defining line has not been seen yet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceId(u32);

impl ServiceId {
    pub const UNRESOLVED: Self = Self(0);

    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }

    pub const fn is_resolved(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
