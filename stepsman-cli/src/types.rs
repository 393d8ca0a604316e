//! Common types used across CLI modules

use uuid::Uuid;

/// Run identifier as typed by the user
///
/// Digits are a store id, a full UUID is taken as is, and anything else is
/// treated as a UUID prefix that must match exactly one run.
#[derive(Debug, Clone, PartialEq)]
pub enum IdOrPrefix {
    Id(i64),
    Full(Uuid),
    Prefix(String),
}

impl IdOrPrefix {
    pub fn parse(input: &str) -> Self {
        let input = input.trim();
        if let Ok(id) = input.parse::<i64>() {
            IdOrPrefix::Id(id)
        } else if let Ok(uuid) = Uuid::parse_str(input) {
            IdOrPrefix::Full(uuid)
        } else {
            IdOrPrefix::Prefix(input.to_lowercase())
        }
    }
}

impl std::fmt::Display for IdOrPrefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdOrPrefix::Id(id) => write!(f, "{}", id),
            IdOrPrefix::Full(uuid) => write!(f, "{}", uuid),
            IdOrPrefix::Prefix(prefix) => write!(f, "{}", prefix),
        }
    }
}
