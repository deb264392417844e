use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use pastebin_lite_common::{CreatePasteRequest, PasteView};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, error, instrument, warn};

use crate::error::{Error, ValidationError};
use crate::paste::Paste;
use crate::short_code::{Generator, ShortCode, SHORT_CODE_SIZE};
use crate::store::{PasteStore, StoreError};

/// How many fresh ids to try before giving up on a create.
pub const MAX_ID_ATTEMPTS: usize = 5;

/// A create request that passed validation.
#[derive(Debug, PartialEq, Eq)]
pub struct NewPaste {
    pub content: String,
    pub ttl_seconds: Option<i64>,
    pub max_views: Option<NonZeroU32>,
}

impl TryFrom<CreatePasteRequest> for NewPaste {
    type Error = ValidationError;

    fn try_from(request: CreatePasteRequest) -> Result<Self, Self::Error> {
        if request.content.trim().is_empty() {
            return Err(ValidationError::EmptyContent);
        }

        let ttl_seconds = match request.ttl_seconds {
            Some(ttl) if ttl < 1 => return Err(ValidationError::TtlSeconds),
            ttl => ttl,
        };

        let max_views = request
            .max_views
            .map(|max| {
                u32::try_from(max)
                    .ok()
                    .and_then(NonZeroU32::new)
                    .ok_or(ValidationError::MaxViews)
            })
            .transpose()?;

        Ok(Self {
            content: request.content,
            ttl_seconds,
            max_views,
        })
    }
}

/// Absolute deadline for a ttl, or a validation error if it does not fit in
/// the calendar.
fn deadline(now: DateTime<Utc>, ttl_seconds: i64) -> Result<DateTime<Utc>, ValidationError> {
    // Anything past i64::MAX milliseconds cannot be a Duration
    let ttl = ttl_seconds
        .checked_mul(1000)
        .map(Duration::milliseconds)
        .ok_or(ValidationError::TtlSeconds)?;
    now.checked_add_signed(ttl)
        .ok_or(ValidationError::TtlSeconds)
}

/// Creates and reads pastes on top of an injected store.
pub struct PasteService {
    store: Arc<dyn PasteStore>,
    rng: Mutex<StdRng>,
}

impl PasteService {
    pub fn new(store: Arc<dyn PasteStore>) -> Self {
        Self::with_rng(store, StdRng::from_entropy())
    }

    pub fn with_rng(store: Arc<dyn PasteStore>, rng: StdRng) -> Self {
        Self {
            store,
            rng: Mutex::new(rng),
        }
    }

    pub fn store(&self) -> &Arc<dyn PasteStore> {
        &self.store
    }

    fn generate_id(&self) -> Result<String, Error> {
        let mut rng = self.rng.lock().map_err(|_| {
            error!("Id generator lock poisoned");
            Error::StoreUnavailable("id generator unavailable".to_string())
        })?;
        let code: ShortCode<SHORT_CODE_SIZE> = rng.sample(Generator);
        Ok(code.to_string())
    }

    /// Validates `request` and stores it as a new paste created at `now`.
    /// Returns the id of the new paste.
    #[instrument(skip(self, request))]
    pub fn create_paste(
        &self,
        request: CreatePasteRequest,
        now: DateTime<Utc>,
    ) -> Result<String, Error> {
        let NewPaste {
            content,
            ttl_seconds,
            max_views,
        } = NewPaste::try_from(request)?;
        let expires_at = ttl_seconds.map(|ttl| deadline(now, ttl)).transpose()?;

        for attempt in 1..=MAX_ID_ATTEMPTS {
            let id = self.generate_id()?;
            let paste = Paste::new(id, content.clone(), now, expires_at, max_views);

            match self.store.insert(paste) {
                Ok(paste) => {
                    debug!("Created paste {} at {} on attempt {}", paste.id, paste.created_at, attempt);
                    return Ok(paste.id);
                }
                Err(StoreError::DuplicateId) => {
                    warn!("Paste id collision on attempt {}, retrying", attempt);
                }
                Err(e) => return Err(e.into()),
            }
        }

        error!("Failed to generate a valid shortcode");
        Err(Error::GenerationExhausted(MAX_ID_ATTEMPTS))
    }

    /// Reads a paste as of `now`. A decrementing read spends one view.
    /// Malformed, missing and expired ids all come back as
    /// [`Error::NotFound`].
    #[instrument(skip(self), level = "debug")]
    pub fn read_paste(
        &self,
        id: &str,
        now: DateTime<Utc>,
        decrement: bool,
    ) -> Result<PasteView, Error> {
        if id.parse::<ShortCode<SHORT_CODE_SIZE>>().is_err() {
            return Err(Error::NotFound);
        }

        let view = if decrement {
            self.store.fetch_and_apply_read(id, now, true)?
        } else {
            self.store.fetch_only(id, now)?
        };

        Ok(view)
    }
}
