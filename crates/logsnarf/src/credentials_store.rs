// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Token to credentials cache in front of a slow [`CredentialsFetcher`].
//!
//! Cache hits never lock. On a miss the caller tries the token's lock
//! without waiting: the winner fetches and stores the result, everyone else
//! sleeps for `retry_delay` and looks again. At most one fetch per token is
//! in flight. Unknown tokens are cached too, with the same ttl.

use crate::credentials::{Credentials, CredentialsFetcher};
use crate::errors::CredentialsError;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info};

#[derive(Debug, Clone)]
struct CacheEntry {
    credentials: Option<Credentials>,
    fetched_at: Instant,
}

impl CacheEntry {
    fn expired(&self, now: Instant, ttl: Duration) -> bool {
        self.fetched_at + ttl < now
    }
}

pub struct CredentialsStore {
    fetcher: Arc<dyn CredentialsFetcher>,
    cache: DashMap<String, CacheEntry>,
    // one lock per token, created on first miss and kept for the process lifetime
    locks: DashMap<String, Arc<Mutex<()>>>,
    ttl: Duration,
    retry_delay: Duration,
}

impl CredentialsStore {
    pub fn new(fetcher: Arc<dyn CredentialsFetcher>, ttl: Duration, retry_delay: Duration) -> Self {
        CredentialsStore {
            fetcher,
            cache: DashMap::new(),
            locks: DashMap::new(),
            ttl,
            retry_delay,
        }
    }

    /// Resolves `token`, returning `Ok(None)` when it is unknown.
    ///
    /// Backend failures are returned as errors and are not cached.
    pub async fn get(&self, token: &str) -> Result<Option<Credentials>, CredentialsError> {
        loop {
            if let Some(entry) = self.try_get(token).await? {
                return Ok(entry.credentials);
            }
            debug!(
                "Another task is fetching credentials, retrying in {:?}",
                self.retry_delay
            );
            tokio::time::sleep(self.retry_delay).await;
        }
    }

    /// `Ok(None)` when another task holds the token's lock.
    async fn try_get(&self, token: &str) -> Result<Option<CacheEntry>, CredentialsError> {
        if let Some(entry) = self.live_entry(token) {
            return Ok(Some(entry));
        }

        let lock = Arc::clone(self.locks.entry(token.to_string()).or_default().value());
        let Ok(_guard) = lock.try_lock() else {
            return Ok(None);
        };

        // the previous holder may have just stored a fresh entry
        if let Some(entry) = self.live_entry(token) {
            return Ok(Some(entry));
        }

        let entry = self.fetch(token).await?;
        self.cache.insert(token.to_string(), entry.clone());
        Ok(Some(entry))
    }

    fn live_entry(&self, token: &str) -> Option<CacheEntry> {
        let entry = self.cache.get(token)?;
        if entry.expired(Instant::now(), self.ttl) {
            return None;
        }
        Some(entry.value().clone())
    }

    async fn fetch(&self, token: &str) -> Result<CacheEntry, CredentialsError> {
        info!("Fetching credentials");
        let started = Instant::now();
        let credentials = self.fetcher.fetch(token).await.map_err(|e| {
            error!("Failed to fetch credentials: {e}");
            e
        })?;
        match &credentials {
            Some(creds) => info!(
                "Fetched credentials for {} in {:?}",
                creds.name,
                started.elapsed()
            ),
            None => info!("No credentials for token, caching negative result"),
        }
        Ok(CacheEntry {
            credentials,
            fetched_at: Instant::now(),
        })
    }
}
