use std::collections::BTreeSet;

use crate::BuildError;

/// Case-insensitive address substrings scoping the view to the
/// integrations under observation.
///
/// Entries are trimmed, lower-cased and de-duplicated; ordering is stable so
/// the same list always renders the same SQL (and the same cache key).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allowlist {
    entries: BTreeSet<String>,
}

impl Allowlist {
    pub fn new<I, S>(entries: I) -> Result<Self, BuildError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entries: BTreeSet<String> = entries
            .into_iter()
            .map(|e| e.as_ref().trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        if entries.is_empty() {
            return Err(BuildError::EmptyAllowlist);
        }
        Ok(Self { entries })
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Same test the generated SQL applies.
    pub fn matches(&self, field: &str) -> bool {
        let field = field.to_lowercase();
        self.entries.iter().any(|e| field.contains(e.as_str()))
    }
}
