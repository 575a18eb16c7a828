//! Intent routing types

use serde::{Deserialize, Serialize};

/// Fixed intent vocabulary for the router.
///
/// `clarify` is part of the vocabulary even though it is never routed to
/// as a retrieval intent; the orchestrator assigns it on clarify branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Recipe,
    DishOverview,
    Storage,
    Substitution,
    Nutrition,
    Equipment,
    Shopping,
    Unknown,
    OutOfDomain,
    Clarify,
}

impl Intent {
    pub const ALL: &'static [Intent] = &[
        Intent::Recipe,
        Intent::DishOverview,
        Intent::Storage,
        Intent::Substitution,
        Intent::Nutrition,
        Intent::Equipment,
        Intent::Shopping,
        Intent::Unknown,
        Intent::OutOfDomain,
        Intent::Clarify,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Recipe => "recipe",
            Intent::DishOverview => "dish_overview",
            Intent::Storage => "storage",
            Intent::Substitution => "substitution",
            Intent::Nutrition => "nutrition",
            Intent::Equipment => "equipment",
            Intent::Shopping => "shopping",
            Intent::Unknown => "unknown",
            Intent::OutOfDomain => "out_of_domain",
            Intent::Clarify => "clarify",
        }
    }

    /// Parse a label into the vocabulary; anything unrecognized is `None`.
    pub fn from_label(label: &str) -> Option<Intent> {
        let label = label.trim();
        Intent::ALL.iter().copied().find(|i| i.as_str() == label)
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Router output: classified intent plus whether retrieval is required.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub intent: Intent,
    pub needs_retrieval: bool,
    #[serde(default)]
    pub notes: String,
}

impl Route {
    pub fn new(intent: Intent, needs_retrieval: bool, notes: impl Into<String>) -> Self {
        Self {
            intent,
            needs_retrieval,
            notes: notes.into(),
        }
    }

    pub fn out_of_domain(notes: impl Into<String>) -> Self {
        Self::new(Intent::OutOfDomain, false, notes)
    }
}
