// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Classified values that never leave the process in cleartext.
//!
//! A pre-authenticated request URL is a bearer credential: anyone holding
//! the text can use it. Wrapping it in [`Secret`] makes every generic
//! conversion (`Debug`, `Display`, `Serialize`) emit [`REDACTED`] instead.
//!
//! ```rust
//! use storage::secret::{Secret, REDACTED};
//!
//! let token = Secret::new("AbCdEf0123".to_string());
//! assert_eq!(format!("{token}"), REDACTED);
//! assert!(!format!("{token:?}").contains("AbCdEf"));
//! assert_eq!(token.as_declassified(), "AbCdEf0123");
//! ```
//!
//! There is no `Deserialize`: classified values come from user input and
//! are never read back from a persisted artifact.

use serde::{Serialize, Serializer};
use std::fmt;

/// Placeholder emitted wherever a classified value would appear
pub const REDACTED: &str = "[REDACTED]";

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Secret<T>(T);

impl<T> Secret<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// The only way to reach the raw value
    pub fn as_declassified(&self) -> &T {
        &self.0
    }
}

impl<T> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<dumpload/secret:{REDACTED}>")
    }
}

impl<T> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl<T> Serialize for Secret<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(REDACTED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize, Debug)]
    struct Persisted {
        source: Secret<String>,
        public_field: String,
    }

    #[test]
    fn test_serialize_is_redacted() {
        let record = Persisted {
            source: Secret::new("p/abc123/n/ns".to_string()),
            public_field: "visible".to_string(),
        };
        let json = serde_json::to_string(&record).expect("serialize");
        assert!(!json.contains("abc123"));
        assert!(json.contains(REDACTED));
        assert!(json.contains("visible"));
    }

    #[test]
    fn test_debug_is_redacted() {
        let record = Persisted {
            source: Secret::new("p/abc123/n/ns".to_string()),
            public_field: "visible".to_string(),
        };
        let debug_output = format!("{record:?}");
        assert!(debug_output.contains("REDACTED"));
        assert!(!debug_output.contains("abc123"));
    }
}
