// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::errors::ShippingError;
use tracing::error;

/// Sink for failures on the asynchronous write path. Nothing reported here
/// reaches the log source that sent the data.
pub trait Notifier: Send + Sync {
    fn notify(&self, destination: &str, batch_size: usize, error: &ShippingError);
}

/// Reports failures as error events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, destination: &str, batch_size: usize, error: &ShippingError) {
        error!("Dropped {batch_size} metrics for {destination}: {error}");
    }
}
