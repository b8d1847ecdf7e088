//! Core identifiers shared across the harness.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of a managed context within a [`ContextGroup`](crate::fixture::ContextGroup).
///
/// Each role owns exactly one lane. The interactive role stands in for the UI-facing
/// context, the background role for the sync context, and the search role for the
/// read-heavy query context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextRole {
    Interactive,
    Background,
    Search,
}

impl ContextRole {
    pub const ALL: [ContextRole; 3] = [
        ContextRole::Interactive,
        ContextRole::Background,
        ContextRole::Search,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ContextRole::Interactive => "interactive",
            ContextRole::Background => "background",
            ContextRole::Search => "search",
        }
    }
}

impl fmt::Display for ContextRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
