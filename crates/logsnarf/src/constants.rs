// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Prefix Heroku puts in front of runtime metric keys (`sample#memory_total`).
pub const SAMPLE_PREFIX: &str = "sample#";

/// Pending metrics per destination before a push forces a flush.
pub const DEFAULT_BUFFER_MAX_SIZE: usize = 1_000;

/// Longest a destination buffer waits before the timer flushes it.
pub const DEFAULT_BUFFER_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

pub const DEFAULT_CREDENTIALS_CACHE_TTL: Duration = Duration::from_secs(5);

/// Sleep between lookups while another request fetches the same token.
pub const DEFAULT_CREDENTIALS_RETRY_DELAY: Duration = Duration::from_millis(100);

pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Heroku drains post at most a few hundred KB; the limit guards against abuse.
pub const DEFAULT_MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

pub const DEFAULT_PORT: u16 = 3030;
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Timestamp precision requested from the destination (microseconds).
pub const WRITE_PRECISION: &str = "u";

pub const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
