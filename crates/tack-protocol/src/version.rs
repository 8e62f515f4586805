//! Protocol versioning.
//!
//! Clients announce only the major version in their `connect` frame.

use serde::{Deserialize, Serialize};

/// Current protocol version.
pub const PROTOCOL_VERSION: Version = Version { major: 1, minor: 0 };

/// Protocol version information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version {
    /// Breaking changes increment this.
    pub major: u8,
    /// Backwards-compatible changes increment this.
    pub minor: u8,
}

impl Version {
    #[must_use]
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// The version a client means by the single byte in its `connect` frame.
    #[must_use]
    pub const fn from_wire(major: u8) -> Self {
        Self { major, minor: 0 }
    }

    /// Versions are compatible if they share the same major version.
    #[must_use]
    pub fn is_compatible_with(&self, other: &Version) -> bool {
        self.major == other.major
    }

    /// Whether a client announcing `major` may talk to this server.
    #[must_use]
    pub fn accepts_client(&self, major: u8) -> bool {
        self.is_compatible_with(&Version::from_wire(major))
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl Default for Version {
    fn default() -> Self {
        PROTOCOL_VERSION
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_compatibility() {
        assert!(Version::new(1, 0).is_compatible_with(&Version::new(1, 3)));
        assert!(!Version::new(1, 0).is_compatible_with(&Version::new(2, 0)));
    }

    #[test]
    fn test_accepts_client() {
        assert!(PROTOCOL_VERSION.accepts_client(1));
        assert!(!PROTOCOL_VERSION.accepts_client(0));
        assert_eq!(PROTOCOL_VERSION.to_string(), "1.0");
    }
}
