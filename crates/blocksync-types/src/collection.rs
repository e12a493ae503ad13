//! Collection kinds.
//!
//! Built-in collections are closed enum variants, so a user-defined table
//! named `"blocks"` can never be confused with the built-in block store.

use serde::{Deserialize, Serialize};

/// A remote collection: one of the built-ins, or a user-defined table.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum Collection {
    /// Document blocks.
    #[default]
    Blocks,
    /// Submitted form responses.
    Responses,
    /// Response sessions.
    Sessions,
    Customers,
    /// Externally connected primary table.
    ExternalMain,
    /// User-defined table, keyed by name.
    Custom(String),
}

impl Collection {
    pub fn custom(name: impl Into<String>) -> Self {
        Self::Custom(name.into())
    }

    pub fn is_builtin(&self) -> bool {
        !matches!(self, Collection::Custom(_))
    }

    /// Human-readable label for logs and notices.
    pub fn label(&self) -> &str {
        match self {
            Collection::Blocks => "blocks",
            Collection::Responses => "responses",
            Collection::Sessions => "sessions",
            Collection::Customers => "customers",
            Collection::ExternalMain => "external_main",
            Collection::Custom(name) => name,
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Collection::Custom(name) => write!(f, "custom:{name}"),
            builtin => write!(f, "{}", builtin.label()),
        }
    }
}
