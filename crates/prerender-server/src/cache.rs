//! Package cache with single-flight fetch coalescing.
//!
//! The cache maps package URLs to fetched script bodies. It is the only
//! significant shared mutable state in the process; all map transitions
//! happen under one mutex, and in-flight fetches park their waiters on a
//! per-entry completion channel.
//!
//! # Single-flight
//!
//! For any URL, at most one entry is in the FETCHING state at a time. The
//! first caller installs a placeholder and spawns the fetch; every
//! concurrent caller for the same URL attaches to the placeholder's channel
//! and shares the outcome. The fetch itself runs in a detached task so that
//! a cancelled request never strands its co-waiters.
//!
//! # Eviction
//!
//! The cache is a per-render hot set, not a long-tail cache. A sweep runs at
//! the start of every render and evicts entries that no render has touched
//! since the previous sweep. `flush_all` (the `/flush` endpoint) empties the
//! map outright; fetches in flight at that point complete and wake their
//! waiters, but their results are not retained.
//!
//! # Failure policy
//!
//! A failed fetch wakes its waiters with the error and leaves nothing in the
//! map; the next request for that URL fetches again.

use bytes::Bytes;
use prerender_common::protocol::{FetchFailure, RenderError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::watch;
use url::Url;

use crate::fetcher::PackageSource;
use crate::stats::RequestStats;

/// One fetched JavaScript package. Immutable once fetched; `last_used`
/// mutates on every cache hit.
#[derive(Debug)]
struct Package {
    content: Bytes,
    #[allow(dead_code)]
    fetched_at: Instant,
    last_used: Instant,
    size_bytes: u64,
}

impl Package {
    fn new(content: Bytes) -> Self {
        let now = Instant::now();
        Self {
            size_bytes: content.len() as u64,
            content,
            fetched_at: now,
            last_used: now,
        }
    }
}

/// Outcome broadcast to everyone coalesced onto one fetch. `None` until the
/// fetch settles.
type FetchOutcome = Option<std::result::Result<Bytes, FetchFailure>>;

enum Entry {
    /// A fetch is in flight. The ticket identifies the fetch that installed
    /// this placeholder, so a completion after `flush_all` can tell that its
    /// placeholder is gone and must not re-insert.
    Fetching {
        ticket: u64,
        outcome: watch::Receiver<FetchOutcome>,
    },
    Ready(Package),
}

struct CacheInner {
    entries: HashMap<String, Entry>,
    /// Timestamp of the previous unused-sweep. Entries not touched since
    /// this mark are evicted by the next sweep.
    sweep_mark: Instant,
    next_ticket: u64,
}

enum Claim {
    Hit(Bytes),
    Wait(watch::Receiver<FetchOutcome>),
    Fetch {
        ticket: u64,
        sender: watch::Sender<FetchOutcome>,
    },
}

/// URL-keyed store of fetched package bodies.
pub struct PackageCache {
    inner: Arc<Mutex<CacheInner>>,
    source: Arc<dyn PackageSource>,
}

impl PackageCache {
    pub fn new(source: Arc<dyn PackageSource>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CacheInner {
                entries: HashMap::new(),
                sweep_mark: Instant::now(),
                next_ticket: 0,
            })),
            source,
        }
    }

    /// Returns the package body for `url`, fetching it if necessary.
    ///
    /// The boolean is true for a cache hit. Cache hits bump the entry's
    /// `last_used` and the request's `fromCache` counter; a real network
    /// fetch bumps `packageFetches` on the initiating request only. Callers
    /// that coalesce onto someone else's fetch count as neither.
    pub async fn get_or_fetch(&self, url: &Url, stats: &RequestStats) -> Result<(Bytes, bool)> {
        let claim = {
            let mut inner = self.inner.lock().expect("package cache poisoned");
            match inner.entries.get_mut(url.as_str()) {
                Some(Entry::Ready(package)) => {
                    package.last_used = Instant::now();
                    Claim::Hit(package.content.clone())
                }
                Some(Entry::Fetching { outcome, .. }) => Claim::Wait(outcome.clone()),
                None => {
                    let (sender, receiver) = watch::channel(None);
                    let ticket = inner.next_ticket;
                    inner.next_ticket += 1;
                    inner.entries.insert(
                        url.as_str().to_string(),
                        Entry::Fetching {
                            ticket,
                            outcome: receiver,
                        },
                    );
                    Claim::Fetch { ticket, sender }
                }
            }
        };

        match claim {
            Claim::Hit(content) => {
                stats.record_cache_hit();
                Ok((content, true))
            }
            Claim::Wait(receiver) => Self::await_outcome(receiver).await,
            Claim::Fetch { ticket, sender } => {
                stats.record_package_fetch();
                let receiver = sender.subscribe();
                self.spawn_fetch(url.clone(), ticket, sender);
                Self::await_outcome(receiver).await
            }
        }
    }

    /// Runs the fetch in a detached task: the initiating request may be
    /// cancelled, but co-waiters must still receive the outcome.
    fn spawn_fetch(&self, url: Url, ticket: u64, sender: watch::Sender<FetchOutcome>) {
        let inner = Arc::clone(&self.inner);
        let source = Arc::clone(&self.source);

        tokio::spawn(async move {
            let result = source.fetch(url.clone()).await;

            {
                let mut inner = inner.lock().expect("package cache poisoned");
                let ours = matches!(
                    inner.entries.get(url.as_str()),
                    Some(Entry::Fetching { ticket: t, .. }) if *t == ticket
                );
                if ours {
                    match &result {
                        Ok(content) => {
                            inner.entries.insert(
                                url.as_str().to_string(),
                                Entry::Ready(Package::new(content.clone())),
                            );
                        }
                        Err(_) => {
                            inner.entries.remove(url.as_str());
                        }
                    }
                }
            }

            let _ = sender.send(Some(result));
        });
    }

    async fn await_outcome(
        mut receiver: watch::Receiver<FetchOutcome>,
    ) -> Result<(Bytes, bool)> {
        loop {
            let current = (*receiver.borrow_and_update()).clone();
            if let Some(outcome) = current {
                return match outcome {
                    Ok(content) => Ok((content, false)),
                    Err(failure) => Err(RenderError::Fetch(failure)),
                };
            }
            if receiver.changed().await.is_err() {
                return Err(RenderError::Internal(
                    "package fetch abandoned before completion".to_string(),
                ));
            }
        }
    }

    /// Drops every entry. In-flight fetches run to completion for their
    /// waiters but their results are not retained.
    pub fn flush_all(&self) {
        let mut inner = self.inner.lock().expect("package cache poisoned");
        inner.entries.clear();
    }

    /// Evicts entries no render has touched since the previous sweep, then
    /// advances the sweep mark. Called at the start of every render.
    pub fn flush_unused(&self) {
        let mut inner = self.inner.lock().expect("package cache poisoned");
        let mark = inner.sweep_mark;
        inner.entries.retain(|_, entry| match entry {
            Entry::Ready(package) => package.last_used >= mark,
            Entry::Fetching { .. } => true,
        });
        inner.sweep_mark = Instant::now();
    }

    /// Total bytes held by READY entries, for observability.
    pub fn size(&self) -> u64 {
        let inner = self.inner.lock().expect("package cache poisoned");
        inner
            .entries
            .values()
            .map(|entry| match entry {
                Entry::Ready(package) => package.size_bytes,
                Entry::Fetching { .. } => 0,
            })
            .sum()
    }
}
