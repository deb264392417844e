//! Visibility rules for pastes. Nothing in here touches storage; stores call
//! [`apply_read`] while holding whatever exclusion they need and persist the
//! outcome themselves.

use chrono::{DateTime, Utc};

use crate::paste::{Paste, ViewLimit};

/// A paste is alive until its deadline passes or its view budget runs out,
/// whichever happens first. Once dead it stays dead.
pub fn is_alive(paste: &Paste, now: DateTime<Utc>) -> bool {
    let in_time = paste.expires_at.map_or(true, |expires_at| now < expires_at);
    in_time && !paste.views.is_exhausted()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The paste is dead; callers must report it as not found.
    Hidden,
    /// The paste is visible and its state is unchanged.
    Visible,
    /// The paste is visible and this read spent one view. Holds the budget
    /// the paste must be stored with.
    Consumed(ViewLimit),
}

/// Decides what a read at `now` does to `paste`.
///
/// The read that spends the last view is still visible; only the reads after
/// it are hidden.
pub fn apply_read(paste: &Paste, now: DateTime<Utc>, decrement: bool) -> ReadOutcome {
    if !is_alive(paste, now) {
        return ReadOutcome::Hidden;
    }

    if !decrement {
        return ReadOutcome::Visible;
    }

    match paste.views {
        ViewLimit::Unlimited => ReadOutcome::Visible,
        ViewLimit::Limited { max, remaining } => ReadOutcome::Consumed(ViewLimit::Limited {
            max,
            remaining: remaining.saturating_sub(1),
        }),
    }
}
