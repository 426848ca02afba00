//! In-process remote store.
//!
//! Behaves like the real service (TTL on the store clock, read budgets,
//! atomic one-time consumption, request-rate ceiling) and adds failure
//! injection and call counters for tests.

use super::{RemoteError, RemoteStore};
use async_trait::async_trait;
use dashmap::DashMap;
use governor::clock::{Clock as _, DefaultClock};
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use kvdrop_core::{Clock, SystemClock};
use kvdrop_types::{Fingerprint, PutOptions, RecordMeta, Token};
use std::collections::VecDeque;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Type alias for a direct (non-keyed) rate limiter.
type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

struct StoredRecord {
    payload: Vec<u8>,
    meta: RecordMeta,
}

enum Slot {
    Live(StoredRecord),
    /// Tombstone left by a one-time read.
    Consumed,
}

#[derive(Default)]
struct Counters {
    issued: AtomicU64,
    puts: AtomicU64,
    gets: AtomicU64,
    heads: AtomicU64,
    deletes: AtomicU64,
}

#[derive(Default)]
struct Faults {
    next: VecDeque<RemoteError>,
    next_delete: VecDeque<RemoteError>,
}

struct Inner {
    records: DashMap<Token, Slot>,
    clock: Arc<dyn Clock>,
    atomic_consume: AtomicBool,
    limiter: Mutex<Option<Arc<DirectLimiter>>>,
    latency: Mutex<Option<Duration>>,
    faults: Mutex<Faults>,
    counters: Counters,
}

/// Snapshot of how many calls of each kind reached the store.
///
/// Failed and rate-limited calls are counted too.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// `issue_token` calls.
    pub issued: u64,
    /// `put` calls.
    pub puts: u64,
    /// `get` calls.
    pub gets: u64,
    /// `head` calls.
    pub heads: u64,
    /// `delete` calls.
    pub deletes: u64,
}

/// In-memory [`RemoteStore`].
///
/// Clones share the same records.
#[derive(Clone)]
pub struct InMemoryStore {
    inner: Arc<Inner>,
}

impl InMemoryStore {
    /// Create an empty store on the system clock.
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    /// Create an empty store on the given clock.
    pub fn with_clock(clock: impl Clock + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                records: DashMap::new(),
                clock: Arc::new(clock),
                atomic_consume: AtomicBool::new(true),
                limiter: Mutex::new(None),
                latency: Mutex::new(None),
                faults: Mutex::new(Faults::default()),
                counters: Counters::default(),
            }),
        }
    }

    /// Enforce a request-rate ceiling across all calls.
    pub fn set_rate_limit(&self, per_second: NonZeroU32) {
        let limiter = RateLimiter::direct(Quota::per_second(per_second));
        *lock(&self.inner.limiter) = Some(Arc::new(limiter));
    }

    /// Choose whether one-time reads consume in the same operation.
    ///
    /// When off, `get` only counts reads and the client must delete.
    pub fn set_atomic_consume(&self, atomic: bool) {
        self.inner.atomic_consume.store(atomic, Ordering::SeqCst);
    }

    /// Delay every response by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *lock(&self.inner.latency) = latency;
    }

    /// Cause the next call (of any kind) to fail with `error`.
    ///
    /// Queued errors are returned in order, one per call.
    pub fn fail_next(&self, error: RemoteError) {
        lock(&self.inner.faults).next.push_back(error);
    }

    /// Cause the next `delete` to fail with `error`.
    pub fn fail_next_delete(&self, error: RemoteError) {
        lock(&self.inner.faults).next_delete.push_back(error);
    }

    /// Call counters so far.
    pub fn stats(&self) -> StoreStats {
        let c = &self.inner.counters;
        StoreStats {
            issued: c.issued.load(Ordering::SeqCst),
            puts: c.puts.load(Ordering::SeqCst),
            gets: c.gets.load(Ordering::SeqCst),
            heads: c.heads.load(Ordering::SeqCst),
            deletes: c.deletes.load(Ordering::SeqCst),
        }
    }

    /// The stored bytes, exactly as the server sees them.
    pub fn raw_payload(&self, token: &Token) -> Option<Vec<u8>> {
        match self.inner.records.get(token)?.value() {
            Slot::Live(record) => Some(record.payload.clone()),
            Slot::Consumed => None,
        }
    }

    /// Number of records, including expired ones and tombstones.
    pub fn len(&self) -> usize {
        self.inner.records.len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.inner.records.is_empty()
    }

    /// Drop expired records. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.inner.clock.now_ms();
        let before = self.inner.records.len();
        self.inner.records.retain(|_, slot| match slot {
            Slot::Live(record) => !record.meta.is_expired_at(now),
            Slot::Consumed => true,
        });
        let removed = before.saturating_sub(self.inner.records.len());
        if removed > 0 {
            tracing::debug!(removed, "purged expired records");
        }
        removed
    }

    /// Simulated network and admission control, run before every call.
    async fn admit(&self) -> Result<(), RemoteError> {
        let latency = *lock(&self.inner.latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if let Some(error) = lock(&self.inner.faults).next.pop_front() {
            return Err(error);
        }

        let limiter = lock(&self.inner.limiter).clone();
        if let Some(limiter) = limiter {
            if let Err(not_until) = limiter.check() {
                let retry_after = not_until.wait_time_from(DefaultClock::default().now());
                return Err(RemoteError::RateLimited {
                    retry_after: Some(retry_after),
                });
            }
        }
        Ok(())
    }

    fn write(&self, token: &Token, payload: &[u8], options: &PutOptions) -> RecordMeta {
        let now = self.inner.clock.now_ms();
        let meta = RecordMeta {
            token: token.clone(),
            created_at: now,
            expires_at: options
                .ttl
                .map(|ttl| now.saturating_add(ttl.as_millis() as u64)),
            read_count: 0,
            max_reads: options.max_reads,
            fingerprint: Fingerprint::of(payload),
            size: payload.len(),
        };
        self.inner.records.insert(
            token.clone(),
            Slot::Live(StoredRecord {
                payload: payload.to_vec(),
                meta: meta.clone(),
            }),
        );
        meta
    }

    /// Read under the record's shard lock, so counting the read and
    /// consuming the record happen as one step.
    fn read(&self, token: &Token) -> Result<(Vec<u8>, RecordMeta), RemoteError> {
        let now = self.inner.clock.now_ms();
        let atomic = self.inner.atomic_consume.load(Ordering::SeqCst);

        let mut slot = self
            .inner
            .records
            .get_mut(token)
            .ok_or(RemoteError::NotFound)?;

        let (payload, meta) = match slot.value_mut() {
            Slot::Consumed => return Err(RemoteError::Consumed),
            Slot::Live(record) => {
                if record.meta.is_expired_at(now) {
                    return Err(RemoteError::Expired);
                }
                record.meta.read_count = record.meta.read_count.saturating_add(1);
                (record.payload.clone(), record.meta.clone())
            }
        };

        if atomic && meta.reads_exhausted() {
            *slot = Slot::Consumed;
        }
        Ok((payload, meta))
    }

    fn inspect(&self, token: &Token) -> Result<RecordMeta, RemoteError> {
        let now = self.inner.clock.now_ms();
        let slot = self
            .inner
            .records
            .get(token)
            .ok_or(RemoteError::NotFound)?;
        match slot.value() {
            Slot::Consumed => Err(RemoteError::Consumed),
            Slot::Live(record) if record.meta.is_expired_at(now) => Err(RemoteError::Expired),
            Slot::Live(record) => Ok(record.meta.clone()),
        }
    }

    fn remove(&self, token: &Token) -> Result<(), RemoteError> {
        match self.inner.records.remove(token) {
            Some((_, Slot::Live(_))) => Ok(()),
            Some((_, Slot::Consumed)) | None => Err(RemoteError::NotFound),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("records", &self.inner.records.len())
            .field("clock", &self.inner.clock)
            .field(
                "atomic_consume",
                &self.inner.atomic_consume.load(Ordering::SeqCst),
            )
            .field("limiter", &"DirectLimiter")
            .finish()
    }
}

#[async_trait]
impl RemoteStore for InMemoryStore {
    async fn issue_token(&self) -> Result<Token, RemoteError> {
        self.inner.counters.issued.fetch_add(1, Ordering::SeqCst);
        self.admit().await?;
        Token::new(uuid::Uuid::new_v4().simple().to_string())
            .map_err(|e| RemoteError::Server(e.to_string()))
    }

    async fn put(
        &self,
        token: &Token,
        payload: &[u8],
        options: &PutOptions,
    ) -> Result<RecordMeta, RemoteError> {
        self.inner.counters.puts.fetch_add(1, Ordering::SeqCst);
        self.admit().await?;
        Ok(self.write(token, payload, options))
    }

    async fn get(&self, token: &Token) -> Result<(Vec<u8>, RecordMeta), RemoteError> {
        self.inner.counters.gets.fetch_add(1, Ordering::SeqCst);
        self.admit().await?;
        self.read(token)
    }

    async fn head(&self, token: &Token) -> Result<RecordMeta, RemoteError> {
        self.inner.counters.heads.fetch_add(1, Ordering::SeqCst);
        self.admit().await?;
        self.inspect(token)
    }

    async fn delete(&self, token: &Token) -> Result<(), RemoteError> {
        self.inner.counters.deletes.fetch_add(1, Ordering::SeqCst);
        self.admit().await?;
        if let Some(error) = lock(&self.inner.faults).next_delete.pop_front() {
            return Err(error);
        }
        self.remove(token)
    }

    fn consumes_atomically(&self) -> bool {
        self.inner.atomic_consume.load(Ordering::SeqCst)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
