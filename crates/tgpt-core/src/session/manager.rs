//! Session cache with idle expiry

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info};

use crate::Result;
use crate::llm::RequestParams;
use crate::session::{Session, SessionDeps, SessionId};

/// Hands out the live session for an identity. This is all a front end needs.
#[async_trait]
pub trait ProvideSession: Send + Sync {
    async fn provide_session(&self, id: SessionId) -> Result<Arc<Session>>;
}

struct CacheEntry {
    session: Arc<Session>,
    last_access: DateTime<Utc>,
}

/// Keeps at most one [`Session`] per identity in memory and drops sessions
/// that have been idle for longer than the TTL.
///
/// The registry is a sharded map, so lookups for different identities do not
/// contend on a single lock.
pub struct SessionProvider {
    sessions: DashMap<SessionId, CacheEntry>,
    deps: SessionDeps,
    params: RequestParams,
    ttl: TimeDelta,
    sweep_interval: Duration,
}

impl SessionProvider {
    /// Smallest accepted sweep interval
    pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

    pub fn new(
        deps: SessionDeps,
        params: RequestParams,
        ttl: Duration,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            deps,
            params,
            ttl: TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX),
            sweep_interval: sweep_interval.max(Self::MIN_SWEEP_INTERVAL),
        }
    }

    /// Return the live session for `id`, creating it on first reference.
    /// Every call refreshes the session's last access time.
    pub fn get_or_create(&self, id: SessionId) -> Arc<Session> {
        let now = self.deps.clock.now();

        match self.sessions.entry(id) {
            Entry::Occupied(mut occupied) => {
                debug!(session = %occupied.key(), "Session found in cache");
                let entry = occupied.get_mut();
                entry.last_access = now;
                Arc::clone(&entry.session)
            }
            Entry::Vacant(vacant) => {
                info!(session = %vacant.key(), "Creating new session");
                let session = Arc::new(Session::new(
                    vacant.key().clone(),
                    self.deps.clone(),
                    self.params,
                ));
                vacant.insert(CacheEntry {
                    session: Arc::clone(&session),
                    last_access: now,
                });
                session
            }
        }
    }

    /// Drop every cached session. Durable state is untouched.
    pub fn clear(&self) {
        self.sessions.clear();
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    /// Remove sessions idle for longer than the TTL, returning how many went
    pub fn evict_expired(&self) -> usize {
        let now = self.deps.clock.now();
        let mut evicted = 0;

        self.sessions.retain(|id, entry| {
            let keep = now - entry.last_access <= self.ttl;
            if !keep {
                debug!(session = %id, "Evicting idle session");
                evicted += 1;
            }
            keep
        });

        evicted
    }

    /// Start the periodic sweep. It runs until the handle is stopped.
    pub fn start_sweeper(self: &Arc<Self>) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let provider = Arc::clone(self);
        let period = self.sweep_interval;

        let handle = tokio::spawn(async move {
            info!(interval_ms = period.as_millis() as u64, "Session sweeper started");

            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        let evicted = provider.evict_expired();
                        if evicted > 0 {
                            info!(evicted, remaining = provider.len(), "Evicted idle sessions");
                        }
                    }
                }
            }

            info!("Session sweeper stopped");
        });

        SweeperHandle {
            shutdown_tx,
            handle,
        }
    }
}

#[async_trait]
impl ProvideSession for SessionProvider {
    async fn provide_session(&self, id: SessionId) -> Result<Arc<Session>> {
        Ok(self.get_or_create(id))
    }
}

/// Handle to a running sweeper
pub struct SweeperHandle {
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for it to exit
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.handle.await;
    }
}
