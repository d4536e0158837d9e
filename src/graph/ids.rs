//! Identifiers: graph ids and business keys

use serde::{Deserialize, Serialize};

/// Identifier of a persisted graph
///
/// Serializes as a plain string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GraphId(String);

impl GraphId {
    /// Create a GraphId from a string
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for GraphId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for GraphId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for GraphId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Stable, document-scoped identifier of a concept before it has a
/// database identity.
///
/// Keys built with [`BusinessKey::from_name`] are normalized so that
/// "Linear Algebra", "linear  algebra" and "linear-algebra" collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BusinessKey(String);

impl BusinessKey {
    /// Wrap an already-normalized key (e.g. one read back from the store).
    pub fn from_string(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Derive a key from a display name.
    ///
    /// Lowercases, collapses every run of non-alphanumeric characters into
    /// a single `-`, and strips leading/trailing separators. `+` and `#`
    /// are spelled out as words first, so `C`, `C++` and `C#` stay apart.
    /// Other punctuation is dropped: `Big-O` and `big o` are one key.
    pub fn from_name(name: &str) -> Self {
        let mut key = String::with_capacity(name.len());
        let mut pending_sep = false;
        for ch in name.chars() {
            let word = match ch {
                '+' => "plus",
                '#' => "sharp",
                c if c.is_alphanumeric() => {
                    if pending_sep && !key.is_empty() {
                        key.push('-');
                    }
                    pending_sep = false;
                    key.extend(c.to_lowercase());
                    continue;
                }
                _ => {
                    pending_sep = true;
                    continue;
                }
            };
            if !key.is_empty() {
                key.push('-');
            }
            key.push_str(word);
            pending_sep = true;
        }
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for BusinessKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for BusinessKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for BusinessKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::borrow::Borrow<str> for BusinessKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}
