//! Bearer credential caching for the upstream services.
//!
//! A [`CredentialCache`] owns one entry per registered [`TokenSource`]. A cached
//! token is handed out only while `now < expires_at`; otherwise the source is asked
//! for a fresh grant exactly once. Failed refreshes leave the entry untouched.
//!
//! Entries sit behind a mutex that is never held across the network call, so two
//! requests racing on an expired entry may both refresh. The last write wins.

use crate::{CredentialError, Service, TokenGrant, TokenSource};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use time::{Duration, OffsetDateTime};
use tracing::{debug, info, warn};

/// Subtracted from every upstream `expires_in` so tokens are not used right at their edge.
pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::seconds(60);

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

/// Wall clock in UTC.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Cached credential for one service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialEntry {
    pub token: Option<String>,
    pub expires_at: Option<OffsetDateTime>,
}

impl CredentialEntry {
    /// The token, if one is cached and still valid at `now`.
    pub fn valid_token(&self, now: OffsetDateTime) -> Option<&str> {
        match (&self.token, self.expires_at) {
            (Some(token), Some(expires_at)) if now < expires_at => Some(token),
            _ => None,
        }
    }
}

struct Slot {
    source: Arc<dyn TokenSource>,
    entry: Mutex<CredentialEntry>,
}

impl Slot {
    fn entry(&self) -> MutexGuard<'_, CredentialEntry> {
        self.entry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Per-service bearer credential cache.
pub struct CredentialCache {
    slots: HashMap<Service, Slot>,
    safety_margin: Duration,
    clock: Arc<dyn Clock>,
}

impl CredentialCache {
    pub fn new() -> Self {
        Self {
            slots: HashMap::new(),
            safety_margin: DEFAULT_SAFETY_MARGIN,
            clock: Arc::new(SystemClock),
        }
    }

    /// Register the refresh mechanism for `source.service()`, replacing any previous one.
    pub fn with_source(mut self, source: Arc<dyn TokenSource>) -> Self {
        let slot = Slot {
            source: source.clone(),
            entry: Mutex::new(CredentialEntry::default()),
        };
        self.slots.insert(source.service(), slot);
        self
    }

    pub fn with_safety_margin(mut self, margin: Duration) -> Self {
        self.safety_margin = margin;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Return a valid bearer credential for `service`, refreshing it if needed.
    pub async fn get_credential(&self, service: Service) -> Result<String, CredentialError> {
        let slot = self
            .slots
            .get(&service)
            .ok_or_else(|| CredentialError::Authentication {
                service,
                status: None,
                body: "no token source registered".into(),
            })?;

        {
            let entry = slot.entry();
            if let Some(token) = entry.valid_token(self.clock.now()) {
                debug!(%service, "using cached credential");
                return Ok(token.to_string());
            }
        }

        debug!(%service, "credential missing or expired, refreshing");
        let grant = match slot.source.fetch_token().await {
            Ok(grant) => grant,
            Err(e) => {
                warn!(%service, error = %e, "credential refresh failed");
                return Err(e);
            }
        };

        let expires_at = self.expiry_for(service, &grant)?;
        info!(%service, expires_in = grant.expires_in, %expires_at, "credential refreshed");

        let mut entry = slot.entry();
        entry.token = Some(grant.access_token.clone());
        entry.expires_at = Some(expires_at);
        Ok(grant.access_token)
    }

    /// Drop the cached token so the next call refreshes.
    pub fn invalidate(&self, service: Service) {
        if let Some(slot) = self.slots.get(&service) {
            *slot.entry() = CredentialEntry::default();
            debug!(%service, "credential invalidated");
        }
    }

    /// Copy of the current entry, `None` if `service` is not registered.
    pub fn snapshot(&self, service: Service) -> Option<CredentialEntry> {
        self.slots.get(&service).map(|slot| slot.entry().clone())
    }

    fn expiry_for(&self, service: Service, grant: &TokenGrant) -> Result<OffsetDateTime, CredentialError> {
        let now = self.clock.now();
        let lifetime = i64::try_from(grant.expires_in)
            .ok()
            .and_then(|secs| Duration::seconds(secs).checked_sub(self.safety_margin))
            .ok_or_else(|| CredentialError::MalformedResponse {
                service,
                detail: format!("expires_in out of range: {}", grant.expires_in),
            })?;

        // A lifetime shorter than the margin expires immediately.
        now.checked_add(lifetime.max(Duration::ZERO))
            .ok_or_else(|| CredentialError::MalformedResponse {
                service,
                detail: format!("expires_in out of range: {}", grant.expires_in),
            })
    }
}

impl Default for CredentialCache {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CredentialCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialCache")
            .field("services", &self.slots.keys().collect::<Vec<_>>())
            .field("safety_margin", &self.safety_margin)
            .finish()
    }
}
