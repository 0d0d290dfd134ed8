use serde::{Deserialize, Serialize};

/// Per-kind limits for root entities and their children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindLimits {
    /// Length of child IDs for this kind.
    pub child_id_len: usize,
    /// Expiry applied when `create` is called without one.
    pub default_expiry_days: i64,
    /// Maximum number of live children per root entity.
    pub child_cap: usize,
    /// Whether participants may upsert their own child record without the admin token.
    pub self_service: bool,
}

/// The app instantiations sharing the engine.
///
/// Serialized as the plural path segment used by the HTTP surface
/// (`polls`, `lists`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppKind {
    #[serde(rename = "polls")]
    Poll,
    #[serde(rename = "lists")]
    List,
    #[serde(rename = "groups")]
    Group,
    #[serde(rename = "quizzes")]
    Quiz,
    #[serde(rename = "notes")]
    Note,
}

impl AppKind {
    pub const ALL: [AppKind; 5] = [
        AppKind::Poll,
        AppKind::List,
        AppKind::Group,
        AppKind::Quiz,
        AppKind::Note,
    ];

    /// Storage tag persisted with each root entity.
    pub fn as_str(&self) -> &'static str {
        match self {
            AppKind::Poll => "poll",
            AppKind::List => "list",
            AppKind::Group => "group",
            AppKind::Quiz => "quiz",
            AppKind::Note => "note",
        }
    }

    /// Plural path segment used by the HTTP surface.
    pub fn path_segment(&self) -> &'static str {
        match self {
            AppKind::Poll => "polls",
            AppKind::List => "lists",
            AppKind::Group => "groups",
            AppKind::Quiz => "quizzes",
            AppKind::Note => "notes",
        }
    }

    /// Parse a storage tag. Unknown tags are rejected rather than defaulted.
    pub fn parse(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == tag)
    }

    pub fn limits(&self) -> KindLimits {
        match self {
            // Votes: one per participant, short IDs.
            AppKind::Poll => KindLimits {
                child_id_len: 8,
                default_expiry_days: 30,
                child_cap: 500,
                self_service: true,
            },
            AppKind::List => KindLimits {
                child_id_len: 12,
                default_expiry_days: 90,
                child_cap: 500,
                self_service: false,
            },
            // Expenses
            AppKind::Group => KindLimits {
                child_id_len: 12,
                default_expiry_days: 90,
                child_cap: 500,
                self_service: false,
            },
            // Answers: one per participant.
            AppKind::Quiz => KindLimits {
                child_id_len: 8,
                default_expiry_days: 30,
                child_cap: 200,
                self_service: true,
            },
            AppKind::Note => KindLimits {
                child_id_len: 8,
                default_expiry_days: 30,
                child_cap: 0,
                self_service: false,
            },
        }
    }
}
