// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-destination buffering and batched delivery.
//!
//! Each destination gets a buffer and a timer task. A push appends to the
//! buffer and flushes when it holds more than `max_size` metrics or when
//! `flush_interval` has passed since the last flush. The timer flushes quiet
//! destinations on its own.
//!
//! A flush swaps the buffer out under the lock and sends the batch from a
//! tracked task, so producers never wait on the network. Failed batches are
//! reported to the [`Notifier`] and dropped: delivery is at most once.

use crate::credentials::Credentials;
use crate::errors::{ShippingError, WriterError};
use crate::metric::Metric;
use crate::notifier::Notifier;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Delivers one batch to one destination.
#[async_trait]
pub trait MetricsSender: Send + Sync {
    async fn send(&self, metrics: &[Metric]) -> Result<(), ShippingError>;
}

/// Picks and builds the sender for a destination's credentials.
pub trait Connector: Send + Sync {
    fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn MetricsSender>, ShippingError>;
}

#[derive(Debug, Clone, Copy)]
pub struct WriterConfig {
    pub max_size: usize,
    pub flush_interval: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        WriterConfig {
            max_size: crate::constants::DEFAULT_BUFFER_MAX_SIZE,
            flush_interval: crate::constants::DEFAULT_BUFFER_FLUSH_INTERVAL,
        }
    }
}

struct Pending {
    metrics: Vec<Metric>,
    last_flush_at: Instant,
}

struct Destination {
    name: String,
    sender: Arc<dyn MetricsSender>,
    pending: Mutex<Pending>,
}

impl Destination {
    fn new(name: String, sender: Arc<dyn MetricsSender>) -> Self {
        Destination {
            name,
            sender,
            pending: Mutex::new(Pending {
                metrics: Vec::new(),
                last_flush_at: Instant::now(),
            }),
        }
    }

    #[allow(clippy::expect_used)]
    fn lock(&self) -> std::sync::MutexGuard<'_, Pending> {
        self.pending.lock().expect("lock poisoned")
    }

    /// Appends and, if a trigger fired, takes the batch in the same critical
    /// section.
    fn append(&self, metrics: Vec<Metric>, config: &WriterConfig) -> Option<Vec<Metric>> {
        let mut pending = self.lock();
        pending.metrics.extend(metrics);
        let now = Instant::now();
        if pending.metrics.len() > config.max_size
            || now.duration_since(pending.last_flush_at) >= config.flush_interval
        {
            return Some(swap(&mut pending, now));
        }
        None
    }

    fn take_if_due(&self, config: &WriterConfig) -> Option<Vec<Metric>> {
        let mut pending = self.lock();
        let now = Instant::now();
        if now.duration_since(pending.last_flush_at) >= config.flush_interval {
            return Some(swap(&mut pending, now));
        }
        None
    }

    fn take(&self) -> Vec<Metric> {
        let mut pending = self.lock();
        swap(&mut pending, Instant::now())
    }

    fn next_deadline(&self, config: &WriterConfig) -> Instant {
        self.lock().last_flush_at + config.flush_interval
    }
}

fn swap(pending: &mut Pending, now: Instant) -> Vec<Metric> {
    pending.last_flush_at = now;
    std::mem::take(&mut pending.metrics)
}

pub struct Writer {
    connector: Arc<dyn Connector>,
    config: WriterConfig,
    notifier: Arc<dyn Notifier>,
    destinations: DashMap<String, Arc<Destination>>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl Writer {
    pub fn new(
        connector: Arc<dyn Connector>,
        config: WriterConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Writer {
            connector,
            config,
            notifier,
            destinations: DashMap::new(),
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Buffers `metrics` for the destination described by `credentials`.
    ///
    /// Only fails when no sender can be built for the destination. Delivery
    /// errors never surface here.
    pub fn push(&self, credentials: &Credentials, metrics: Vec<Metric>) -> Result<(), WriterError> {
        if metrics.is_empty() {
            return Ok(());
        }
        if self.cancel.is_cancelled() {
            warn!(
                "Writer is shut down, dropping {} metrics for {}",
                metrics.len(),
                credentials.name
            );
            return Ok(());
        }

        let destination = self.destination(credentials)?;
        if let Some(batch) = destination.append(metrics, &self.config) {
            ship(&self.tracker, &self.notifier, &destination, batch);
        }
        Ok(())
    }

    /// Sends whatever is buffered for `key` and waits for the result.
    pub async fn flush(&self, key: &str) -> Result<(), WriterError> {
        let destination = self
            .destinations
            .get(key)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| WriterError::UnknownDestination(key.to_string()))?;

        let batch = destination.take();
        if batch.is_empty() {
            return Ok(());
        }
        debug!("Flushing {} metrics to {}", batch.len(), destination.name);
        destination.sender.send(&batch).await.map_err(|e| {
            self.notifier.notify(&destination.name, batch.len(), &e);
            WriterError::Shipping(e)
        })
    }

    /// Stops the timers, flushes every buffer and waits for all in-flight
    /// sends.
    pub async fn shutdown(&self) {
        info!("Shutting down writer");
        self.cancel.cancel();

        let destinations: Vec<Arc<Destination>> = self
            .destinations
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for destination in destinations {
            let batch = destination.take();
            if !batch.is_empty() {
                ship(&self.tracker, &self.notifier, &destination, batch);
            }
        }

        self.tracker.close();
        self.tracker.wait().await;
        info!("Writer shut down");
    }

    /// Number of metrics waiting in the buffer for `key`.
    pub fn pending(&self, key: &str) -> usize {
        self.destinations
            .get(key)
            .map(|entry| entry.value().lock().metrics.len())
            .unwrap_or(0)
    }

    fn destination(&self, credentials: &Credentials) -> Result<Arc<Destination>, WriterError> {
        if let Some(entry) = self.destinations.get(&credentials.token) {
            return Ok(Arc::clone(entry.value()));
        }

        match self.destinations.entry(credentials.token.clone()) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let sender = self.connector.connect(credentials)?;
                let destination = Arc::new(Destination::new(credentials.name.clone(), sender));
                debug!("Created buffer for {}", destination.name);
                self.spawn_timer(Arc::clone(&destination));
                entry.insert(Arc::clone(&destination));
                Ok(destination)
            }
        }
    }

    fn spawn_timer(&self, destination: Arc<Destination>) {
        let config = self.config;
        let cancel = self.cancel.clone();
        let tracker = self.tracker.clone();
        let notifier = Arc::clone(&self.notifier);
        self.tracker.spawn(async move {
            loop {
                let deadline = destination.next_deadline(&config);
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep_until(deadline) => {}
                }
                if let Some(batch) = destination.take_if_due(&config) {
                    if !batch.is_empty() {
                        ship(&tracker, &notifier, &destination, batch);
                    }
                }
            }
            debug!("Stopped flush timer for {}", destination.name);
        });
    }
}

fn ship(
    tracker: &TaskTracker,
    notifier: &Arc<dyn Notifier>,
    destination: &Arc<Destination>,
    batch: Vec<Metric>,
) {
    if batch.is_empty() {
        return;
    }
    let notifier = Arc::clone(notifier);
    let destination = Arc::clone(destination);
    tracker.spawn(async move {
        debug!("Flushing {} metrics to {}", batch.len(), destination.name);
        match destination.sender.send(&batch).await {
            Ok(()) => debug!("Flushed {} metrics to {}", batch.len(), destination.name),
            Err(e) => notifier.notify(&destination.name, batch.len(), &e),
        }
    });
}
