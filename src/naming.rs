use std::collections::HashSet;

use deunicode::deunicode;

use crate::error::InputError;

/// Converts an arbitrary source string into a `[a-z0-9_]` identifier.
///
/// Non-ASCII letters are transliterated first, so `Población` becomes `poblacion`.
/// The function is total and idempotent; it may return an empty or all-underscore
/// string, which callers must guard against.
pub fn normalize(raw: &str) -> String {
    let ascii = deunicode(raw);
    ascii
        .to_ascii_lowercase()
        .trim()
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '_' => c,
            _ => '_',
        })
        .collect()
}

/// Normalizes a user-supplied table name, rejecting names with no usable characters.
pub fn table_name(raw: &str) -> Result<String, InputError> {
    let normalized = normalize(raw);
    if normalized.chars().all(|c| c == '_') {
        return Err(InputError::InvalidTableName {
            raw: raw.to_string(),
        });
    }
    if normalized.starts_with(|c: char| c.is_ascii_digit()) {
        Ok(format!("t_{normalized}"))
    } else {
        Ok(normalized)
    }
}

/// Tracks identifiers already used in one table and resolves collisions.
#[derive(Debug, Default, Clone)]
pub struct IdentifierSet {
    taken: HashSet<String>,
}

impl IdentifierSet {
    pub fn with_reserved<I, S>(reserved: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            taken: reserved.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.taken.contains(name)
    }

    /// Normalizes `raw` and claims a unique name for it.
    ///
    /// Empty or all-underscore results fall back to `column_<position>`; a name that
    /// is already taken gets the first free `_2`, `_3`, ... suffix.
    pub fn claim(&mut self, raw: &str, position: usize) -> String {
        let mut base = normalize(raw);
        if base.chars().all(|c| c == '_') {
            base = format!("column_{position}");
        }
        let mut candidate = base.clone();
        let mut suffix = 2usize;
        while self.taken.contains(&candidate) {
            candidate = format!("{base}_{suffix}");
            suffix += 1;
        }
        self.taken.insert(candidate.clone());
        candidate
    }
}
