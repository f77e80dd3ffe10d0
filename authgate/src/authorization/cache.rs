//! Expiring token cache and the caching verifier decorator.

use async_trait::async_trait;
use chrono::Utc;
use moka::{Expiry, sync::Cache};
use std::{
    marker::PhantomData,
    time::{Duration, Instant},
};
use tracing::{debug, instrument, trace};

use super::{
    context::AuthorizationContext,
    verifier::{Verifier, bearer_token},
};
use crate::errors::Result;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

#[derive(Clone)]
struct Entry<V> {
    value: V,
    ttl: Duration,
}

/// Each entry expires after the TTL it was stored with.
struct PerEntryTtl;

impl<V> Expiry<String, Entry<V>> for PerEntryTtl {
    fn expire_after_create(&self, _key: &String, entry: &Entry<V>, _created_at: Instant) -> Option<Duration> {
        Some(entry.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &Entry<V>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }
}

/// Concurrent map from token to value with a per-entry TTL.
///
/// An expired entry is never returned; eviction of entries nobody asks for again happens
/// in the background of regular cache operations.
pub struct TtlCache<V> {
    entries: Cache<String, Entry<V>>,
    default_ttl: Duration,
}

impl<V: Clone + Send + Sync + 'static> TtlCache<V> {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: Cache::builder().expire_after(PerEntryTtl).build(),
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.entries.get(key).map(|entry| entry.value)
    }

    /// Stores `value` until `ttl` has elapsed. A zero TTL stores nothing.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        self.entries.insert(key.into(), Entry { value, ttl });
    }

    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.set(key, value, self.default_ttl);
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        self.entries.remove(key).map(|entry| entry.value)
    }

    /// Number of live entries. Runs pending evictions first so the count is exact.
    pub fn len(&self) -> usize {
        self.entries.run_pending_tasks();
        self.entries.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Wraps a [`Verifier`] and reuses its successful results for identical tokens.
///
/// Failures are never cached. Concurrent misses for the same token may each reach the
/// wrapped verifier; requests are not coalesced.
pub struct CachingVerifier<V, T> {
    inner: V,
    cache: TtlCache<T>,
    _context: PhantomData<fn() -> T>,
}

impl<V, T> CachingVerifier<V, T>
where
    V: Verifier<T>,
    T: AuthorizationContext,
{
    pub fn new(inner: V, ttl: Duration) -> Self {
        Self {
            inner,
            cache: TtlCache::new(ttl),
            _context: PhantomData,
        }
    }

    pub fn cache(&self) -> &TtlCache<T> {
        &self.cache
    }

    /// Like [`Verifier::check_authorization`], caching a fresh result for `ttl` instead of
    /// the default.
    #[instrument(skip_all, fields(ttl = ?ttl))]
    pub async fn check_authorization_with_ttl(&self, authorization: &str, ttl: Duration) -> Result<T> {
        let token = bearer_token(authorization)?;

        if let Some(ctx) = self.cache.get(token) {
            trace!("Token cache hit");
            return Ok(ctx);
        }

        let ctx = self.inner.check_authorization(authorization).await?;
        let ttl = clamp_to_expiry(ttl, &ctx);
        debug!(ttl = ?ttl, "Caching verified token");
        self.cache.set(token, ctx.clone(), ttl);
        Ok(ctx)
    }
}

/// Entries must not outlive the token they were derived from.
fn clamp_to_expiry<T: AuthorizationContext>(ttl: Duration, ctx: &T) -> Duration {
    match ctx.expires_at() {
        Some(expires_at) => {
            let remaining = (expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            ttl.min(remaining)
        }
        None => ttl,
    }
}

#[async_trait]
impl<V, T> Verifier<T> for CachingVerifier<V, T>
where
    V: Verifier<T>,
    T: AuthorizationContext,
{
    async fn check_authorization(&self, authorization: &str) -> Result<T> {
        self.check_authorization_with_ttl(authorization, self.cache.default_ttl())
            .await
    }
}
