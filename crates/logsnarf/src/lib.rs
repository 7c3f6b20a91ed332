// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Metrics-from-logs bridge for syslog-framed log drains.
//!
//! Bytes arrive on the ingress endpoint, the [`parser`] turns them into
//! [`parser::LogLine`]s, the [`decoder`] registry extracts at most one
//! [`metric::Metric`] per line, and the [`writer`] buffers metrics per
//! destination and ships them as [`line_protocol`] in the background.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod constants;
pub mod credentials;
pub mod credentials_store;
pub mod decoder;
pub mod errors;
pub mod http_utils;
pub mod influxdb;
pub mod ingest;
pub mod line_protocol;
pub mod metric;
pub mod notifier;
pub mod parser;
pub mod server;
pub mod writer;
