//! Granted authorities

use std::fmt;

use serde::{Deserialize, Serialize};

/// Prefix distinguishing role authorities from plain permissions
pub const ROLE_PREFIX: &str = "ROLE_";

/// A single permission held by a principal (e.g. `ROLE_ADMIN`, `orders:write`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GrantedAuthority(String);

impl GrantedAuthority {
    /// Create an authority from its literal name
    pub fn new(authority: impl Into<String>) -> Self {
        Self(authority.into())
    }

    /// Create a role authority, adding the `ROLE_` prefix when missing
    pub fn role(role: impl AsRef<str>) -> Self {
        let role = role.as_ref();
        if role.starts_with(ROLE_PREFIX) {
            Self(role.to_string())
        } else {
            Self(format!("{ROLE_PREFIX}{role}"))
        }
    }

    /// The authority string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this authority represents a role
    #[must_use]
    pub fn is_role(&self) -> bool {
        self.0.starts_with(ROLE_PREFIX)
    }
}

impl fmt::Display for GrantedAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GrantedAuthority {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for GrantedAuthority {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Build a list of authorities from literal names
pub fn authority_list(names: &[&str]) -> Vec<GrantedAuthority> {
    names.iter().map(|n| GrantedAuthority::new(*n)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_prefix_added_once() {
        assert_eq!(GrantedAuthority::role("ADMIN").as_str(), "ROLE_ADMIN");
        assert_eq!(GrantedAuthority::role("ROLE_ADMIN").as_str(), "ROLE_ADMIN");
    }

    #[test]
    fn test_is_role() {
        assert!(GrantedAuthority::role("USER").is_role());
        assert!(!GrantedAuthority::new("orders:read").is_role());
    }

    #[test]
    fn test_authority_list() {
        let list = authority_list(&["ROLE_ANONYMOUS", "read"]);
        assert_eq!(list.len(), 2);
        assert_eq!(list[1].to_string(), "read");
    }
}
