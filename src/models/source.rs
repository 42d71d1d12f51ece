//! Followed account.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// An account whose posts are polled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Source {
    pub id: i64,
    pub handle: String,
    pub enabled: bool,
}

impl Source {
    /// Normalize a user-supplied handle: trim and strip a leading `@`.
    pub fn normalize_handle(raw: &str) -> Result<String> {
        let handle = raw.trim().trim_start_matches('@').trim();
        if handle.is_empty() {
            return Err(AppError::validation("handle must not be empty"));
        }
        Ok(handle.to_string())
    }

    pub fn status_label(&self) -> &'static str {
        if self.enabled { "Enabled" } else { "Disabled" }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{} (id {}, {})", self.handle, self.id, self.status_label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_handle() {
        assert_eq!(Source::normalize_handle("@jack").unwrap(), "jack");
        assert_eq!(Source::normalize_handle("  jack ").unwrap(), "jack");
        assert!(Source::normalize_handle("@").is_err());
        assert!(Source::normalize_handle("   ").is_err());
    }

    #[test]
    fn test_display() {
        let source = Source {
            id: 3,
            handle: "jack".into(),
            enabled: false,
        };
        assert_eq!(source.to_string(), "@jack (id 3, Disabled)");
    }
}
