//! Server-side session storage.

use async_trait::async_trait;
use moka::sync::Cache;
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::context::AuthenticationContext;
use crate::errors::{Error, Result};

/// Maps an opaque session ID to the context of the signed-in user.
///
/// A missing session is reported as [`Error::NoSession`]; other errors mean the store
/// itself failed.
#[async_trait]
pub trait SessionStore<T: AuthenticationContext>: Send + Sync {
    async fn get(&self, id: &str) -> Result<T>;
    async fn set(&self, id: &str, context: T) -> Result<()>;
    async fn delete(&self, id: &str) -> Result<()>;
}

/// Process-local session store.
///
/// Sessions are lost on restart and not shared between replicas, so this store only
/// suits single-instance deployments and tests. Without a `max_age` entries live until
/// logout.
pub struct InMemorySessionStore<T> {
    sessions: Cache<String, T>,
}

impl<T: AuthenticationContext> Default for InMemorySessionStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: AuthenticationContext> InMemorySessionStore<T> {
    pub fn new() -> Self {
        Self {
            sessions: Cache::builder().build(),
        }
    }

    /// Sessions older than `max_age` are treated as missing. Call before storing sessions.
    pub fn with_max_age(self, max_age: Duration) -> Self {
        Self {
            sessions: Cache::builder().time_to_live(max_age).build(),
        }
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.run_pending_tasks();
        self.sessions.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spawns a task evicting expired sessions every `interval` until `shutdown` is cancelled.
    ///
    /// Expired sessions are never returned without it; the reaper only bounds how long
    /// their memory is held between requests.
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Session reaper shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        store.sessions.run_pending_tasks();
                        debug!(sessions = store.sessions.entry_count(), "Evicted expired sessions");
                    }
                }
            }
        })
    }
}

#[async_trait]
impl<T: AuthenticationContext> SessionStore<T> for InMemorySessionStore<T> {
    async fn get(&self, id: &str) -> Result<T> {
        self.sessions.get(id).ok_or(Error::NoSession)
    }

    async fn set(&self, id: &str, context: T) -> Result<()> {
        self.sessions.insert(id.to_string(), context);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.sessions.invalidate(id);
        Ok(())
    }
}
