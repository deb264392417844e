use std::num::NonZeroU32;

use chrono::{DateTime, Utc};
use pastebin_lite_common::PasteView;
use serde::{Deserialize, Serialize};

/// How many more successful reads a paste allows.
///
/// A limited budget always remembers its ceiling, so "no limit" can never be
/// confused with a budget that has run down to zero.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewLimit {
    Unlimited,
    Limited { max: NonZeroU32, remaining: u32 },
}

impl ViewLimit {
    pub const fn new(max: Option<NonZeroU32>) -> Self {
        match max {
            Some(max) => Self::Limited {
                max,
                remaining: max.get(),
            },
            None => Self::Unlimited,
        }
    }

    pub const fn remaining(self) -> Option<u32> {
        match self {
            Self::Unlimited => None,
            Self::Limited { remaining, .. } => Some(remaining),
        }
    }

    pub const fn is_exhausted(self) -> bool {
        matches!(self, Self::Limited { remaining: 0, .. })
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Paste {
    pub id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub views: ViewLimit,
}

impl Paste {
    pub fn new(
        id: String,
        content: String,
        created_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
        max_views: Option<NonZeroU32>,
    ) -> Self {
        Self {
            id,
            content,
            created_at,
            expires_at,
            views: ViewLimit::new(max_views),
        }
    }

    pub fn view(&self) -> PasteView {
        PasteView {
            content: self.content.clone(),
            remaining_views: self.views.remaining(),
            expires_at: self.expires_at,
        }
    }
}
