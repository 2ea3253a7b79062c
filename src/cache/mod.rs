// convo-view - Conversation viewport sync and derived-content caching
// Copyright (C) 2025  Simon Peter Rothgang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as
// published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Keyed cache for content derived from messages by external services.
//!
//! Each key has at most one entry. A request for a key that is already being
//! resolved joins the in-flight fetch instead of starting another one, so the
//! underlying resolver runs at most once per key at a time. Failed or empty
//! results are replaced by a per-cache fallback value and cached under the
//! same TTL, which means a broken key is retried only after expiry or an
//! explicit invalidation.
//!
//! Everything here runs on one thread: entries live behind `Rc<RefCell<..>>`
//! and fetches are driven by `spawn_local` tasks, so callers must be inside a
//! `tokio::task::LocalSet`.

pub mod preview;
pub mod translation;

use crate::policy::Ttl;
use futures::FutureExt as _;
use futures::future::{LocalBoxFuture, Shared};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::rc::{Rc, Weak};
use tokio::time::Instant;

/// Why a fallback value was stored instead of the resolver's answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    /// The resolver answered, but with nothing worth rendering.
    Empty,
    /// The resolver failed; carries the error chain as text.
    Failed(String),
}

type FallbackFn<K, V> = Rc<dyn Fn(&K, FallbackReason) -> V>;
type UsefulFn<V> = Rc<dyn Fn(&V) -> bool>;
type InFlight<V> = Shared<LocalBoxFuture<'static, V>>;

struct Policy<K, V> {
    ttl: Ttl,
    fallback: FallbackFn<K, V>,
    is_useful: UsefulFn<V>,
}

impl<K, V> Clone for Policy<K, V> {
    fn clone(&self) -> Self {
        Self {
            ttl: self.ttl,
            fallback: Rc::clone(&self.fallback),
            is_useful: Rc::clone(&self.is_useful),
        }
    }
}

enum EntryState<V> {
    Pending(InFlight<V>),
    Resolved { value: V, expires_at: Option<Instant> },
}

struct CacheEntry<V> {
    state: EntryState<V>,
    created_at: Instant,
    /// Distinguishes this entry from any later entry under the same key, so
    /// a fetch started before an invalidation cannot write into its successor.
    generation: u64,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        match &self.state {
            EntryState::Resolved { expires_at: Some(at), .. } => now >= *at,
            EntryState::Resolved { expires_at: None, .. } | EntryState::Pending(_) => false,
        }
    }
}

struct Inner<K, V> {
    name: &'static str,
    entries: HashMap<K, CacheEntry<V>>,
    policy: Policy<K, V>,
    next_generation: u64,
}

impl<K: Eq + Hash + fmt::Debug, V> Inner<K, V> {
    /// Store the outcome of the fetch that created `generation`. Returns
    /// `false` when the entry was invalidated or replaced in the meantime.
    fn settle(&mut self, key: &K, generation: u64, value: V) -> bool {
        let now = Instant::now();
        let expires_at = self.policy.ttl.expires_at(now);
        let Some(entry) = self.entries.get_mut(key) else {
            tracing::debug!(cache = self.name, ?key, "fetch finished after invalidation");
            return false;
        };
        if entry.generation != generation || !matches!(entry.state, EntryState::Pending(_)) {
            tracing::debug!(cache = self.name, ?key, "fetch finished for a replaced entry");
            return false;
        }
        tracing::debug!(
            cache = self.name,
            ?key,
            elapsed = ?now.saturating_duration_since(entry.created_at),
            "derived content resolved"
        );
        entry.state = EntryState::Resolved { value, expires_at };
        true
    }
}

enum Lookup<V> {
    Ready(V),
    Join(InFlight<V>),
    Miss,
}

/// Shared, single-threaded cache of derived content.
///
/// Cloning yields another handle to the same table.
pub struct DerivedContentCache<K, V> {
    inner: Rc<RefCell<Inner<K, V>>>,
}

impl<K, V> Clone for DerivedContentCache<K, V> {
    fn clone(&self) -> Self {
        Self { inner: Rc::clone(&self.inner) }
    }
}

impl<K, V> DerivedContentCache<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + 'static,
    V: Clone + 'static,
{
    /// Create a cache whose every resolved value counts as useful.
    pub fn new(
        name: &'static str,
        ttl: Ttl,
        fallback: impl Fn(&K, FallbackReason) -> V + 'static,
    ) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                name,
                entries: HashMap::new(),
                policy: Policy { ttl, fallback: Rc::new(fallback), is_useful: Rc::new(|_| true) },
                next_generation: 0,
            })),
        }
    }

    /// Values rejected by `is_useful` are replaced by the fallback with
    /// [`FallbackReason::Empty`].
    #[must_use]
    pub fn with_usefulness(self, is_useful: impl Fn(&V) -> bool + 'static) -> Self {
        self.inner.borrow_mut().policy.is_useful = Rc::new(is_useful);
        self
    }

    /// Replace the TTL and fallback. Applies to entries resolved from now on.
    pub fn configure(&self, ttl: Ttl, fallback: impl Fn(&K, FallbackReason) -> V + 'static) {
        let mut inner = self.inner.borrow_mut();
        inner.policy.ttl = ttl;
        inner.policy.fallback = Rc::new(fallback);
    }

    #[must_use]
    pub fn ttl(&self) -> Ttl {
        self.inner.borrow().policy.ttl
    }

    /// Return the cached value for `key`, join the fetch already running for
    /// it, or start a new one with `fetch`.
    ///
    /// Never fails: resolver errors and useless answers become the fallback
    /// value. `fetch` is only called when a new fetch is actually started.
    pub async fn get_or_fetch<F, Fut>(&self, key: K, fetch: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Option<V>>> + 'static,
    {
        let handle = match self.lookup(&key) {
            Lookup::Ready(value) => return value,
            Lookup::Join(handle) => handle,
            Lookup::Miss => self.start_fetch(key, fetch()),
        };
        handle.await
    }

    /// Synchronous read of a live resolved value. Never starts a fetch.
    #[must_use]
    pub fn peek(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let inner = self.inner.borrow();
        let entry = inner.entries.get(key)?;
        match &entry.state {
            EntryState::Resolved { value, .. } if !entry.is_expired(now) => Some(value.clone()),
            EntryState::Resolved { .. } | EntryState::Pending(_) => None,
        }
    }

    #[must_use]
    pub fn is_pending(&self, key: &K) -> bool {
        self.inner
            .borrow()
            .entries
            .get(key)
            .is_some_and(|entry| matches!(entry.state, EntryState::Pending(_)))
    }

    /// Drop the entry for `key`. A fetch still running for it answers its
    /// current callers but is not stored.
    pub fn invalidate(&self, key: &K) -> bool {
        let mut inner = self.inner.borrow_mut();
        let removed = inner.entries.remove(key).is_some();
        if removed {
            tracing::debug!(cache = inner.name, ?key, "derived content invalidated");
        }
        removed
    }

    pub fn invalidate_all(&self) {
        let mut inner = self.inner.borrow_mut();
        let dropped = inner.entries.len();
        inner.entries.clear();
        tracing::debug!(cache = inner.name, dropped, "derived content cache cleared");
    }

    /// Teardown: forget every entry, resolved or pending.
    pub fn reset(&self) {
        self.invalidate_all();
        tracing::info!(cache = self.inner.borrow().name, "derived content cache reset");
    }

    /// Remove expired resolved entries and return how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.borrow_mut();
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| !entry.is_expired(now));
        before - inner.entries.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.borrow().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().entries.is_empty()
    }

    fn lookup(&self, key: &K) -> Lookup<V> {
        let now = Instant::now();
        let inner = self.inner.borrow();
        let Some(entry) = inner.entries.get(key) else {
            return Lookup::Miss;
        };
        match &entry.state {
            EntryState::Pending(handle) => {
                tracing::debug!(cache = inner.name, ?key, "joining in-flight fetch");
                Lookup::Join(handle.clone())
            }
            EntryState::Resolved { value, .. } if !entry.is_expired(now) => {
                tracing::trace!(cache = inner.name, ?key, "derived content cache hit");
                Lookup::Ready(value.clone())
            }
            EntryState::Resolved { .. } => {
                tracing::debug!(cache = inner.name, ?key, "derived content expired");
                Lookup::Miss
            }
        }
    }

    /// Register a pending entry for `key` and spawn the task that drives
    /// `fut`. The lookup that preceded this call and the insert below run
    /// without an await in between, which keeps one fetch per key.
    fn start_fetch<Fut>(&self, key: K, fut: Fut) -> InFlight<V>
    where
        Fut: Future<Output = anyhow::Result<Option<V>>> + 'static,
    {
        let mut inner = self.inner.borrow_mut();
        let generation = inner.next_generation;
        inner.next_generation += 1;
        let name = inner.name;
        tracing::debug!(cache = name, ?key, generation, "starting derived content fetch");

        let task = tokio::task::spawn_local(resolve(
            Rc::downgrade(&self.inner),
            name,
            key.clone(),
            generation,
            inner.policy.clone(),
            fut,
        ));

        let weak = Rc::downgrade(&self.inner);
        let fallback = Rc::clone(&inner.policy.fallback);
        let task_key = key.clone();
        let handle = async move {
            match task.await {
                Ok(value) => value,
                Err(err) => {
                    // The task panicked before it could settle the entry.
                    tracing::warn!(
                        cache = name,
                        key = ?task_key,
                        error = %err,
                        "derived content task died"
                    );
                    let value = fallback(&task_key, FallbackReason::Failed(err.to_string()));
                    if let Some(inner) = weak.upgrade() {
                        inner.borrow_mut().settle(&task_key, generation, value.clone());
                    }
                    value
                }
            }
        }
        .boxed_local()
        .shared();

        inner.entries.insert(
            key,
            CacheEntry {
                state: EntryState::Pending(handle.clone()),
                created_at: Instant::now(),
                generation,
            },
        );
        handle
    }
}

async fn resolve<K, V, Fut>(
    cache: Weak<RefCell<Inner<K, V>>>,
    name: &'static str,
    key: K,
    generation: u64,
    policy: Policy<K, V>,
    fut: Fut,
) -> V
where
    K: Eq + Hash + fmt::Debug,
    V: Clone,
    Fut: Future<Output = anyhow::Result<Option<V>>>,
{
    let value = match fut.await {
        Ok(Some(value)) if (policy.is_useful)(&value) => value,
        Ok(_) => {
            tracing::debug!(cache = name, ?key, "resolver returned nothing useful, using fallback");
            (policy.fallback)(&key, FallbackReason::Empty)
        }
        Err(err) => {
            let message = format!("{err:#}");
            tracing::warn!(cache = name, ?key, error = %message, "derived content fetch failed");
            (policy.fallback)(&key, FallbackReason::Failed(message))
        }
    };
    if let Some(inner) = cache.upgrade() {
        inner.borrow_mut().settle(&key, generation, value.clone());
    }
    value
}
