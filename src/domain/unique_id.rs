use crate::error::MirrorError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifies an extension by publisher and name. Case-preserving for
/// display, case-insensitive for equality and hashing — matching the
/// upstream marketplace's own treatment of `publisher.name` identifiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniqueId {
    pub publisher: String,
    pub name: String,
}

impl UniqueId {
    pub fn new(publisher: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            publisher: publisher.into(),
            name: name.into(),
        }
    }

    /// Lowercased `publisher.name`, used as the cache key and the backend's
    /// directory/prefix segments.
    pub fn storage_key(&self) -> String {
        format!(
            "{}/{}",
            self.publisher.to_lowercase(),
            self.name.to_lowercase()
        )
    }

    fn cmp_key(&self) -> (String, String) {
        (self.publisher.to_lowercase(), self.name.to_lowercase())
    }
}

impl PartialEq for UniqueId {
    fn eq(&self, other: &Self) -> bool {
        self.cmp_key() == other.cmp_key()
    }
}
impl Eq for UniqueId {}

impl std::hash::Hash for UniqueId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.cmp_key().hash(state);
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.publisher, self.name)
    }
}

impl FromStr for UniqueId {
    type Err = MirrorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() != 2 || parts[0].is_empty() || parts[1].is_empty() {
            return Err(MirrorError::InvalidUniqueId(s.to_string()));
        }
        Ok(Self::new(parts[0], parts[1]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_id() {
        let uid: UniqueId = "golang.Go".parse().unwrap();
        assert_eq!(uid.publisher, "golang");
        assert_eq!(uid.name, "Go");
        assert_eq!(uid.to_string(), "golang.Go");
    }

    #[test]
    fn rejects_missing_separator() {
        assert!("golangGo".parse::<UniqueId>().is_err());
    }

    #[test]
    fn rejects_multiple_separators() {
        assert!("golang.Go.extra".parse::<UniqueId>().is_err());
    }

    #[test]
    fn rejects_empty_half() {
        assert!(".Go".parse::<UniqueId>().is_err());
        assert!("golang.".parse::<UniqueId>().is_err());
    }

    #[test]
    fn equality_is_case_insensitive() {
        let a: UniqueId = "Golang.Go".parse().unwrap();
        let b: UniqueId = "golang.go".parse().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn round_trips_through_display_and_parse() {
        let uid = UniqueId::new("redhat", "java");
        let parsed: UniqueId = uid.to_string().parse().unwrap();
        assert_eq!(uid, parsed);
    }
}
