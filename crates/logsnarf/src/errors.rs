// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for every stage of the pipeline.

use reqwest::StatusCode;

/// A decoder rule matched a line but no valid metric could be built from it.
///
/// Decode errors are recovered locally: the line is skipped and the rest of
/// the upload is still ingested.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum DecodeError {
    #[error("log line has no timestamp")]
    MissingTimestamp,
    #[error("invalid timestamp `{0}`")]
    InvalidTimestamp(String),
    #[error("value `{value}` for key `{key}` is not a number")]
    InvalidNumber { key: String, value: String },
    #[error("metric `{name}` is incomplete: it needs at least one tag and one value")]
    Incomplete { name: String },
}

/// Failure of the credentials backend. "Not found" is not an error.
#[derive(Debug, thiserror::Error)]
pub enum CredentialsError {
    #[error("credentials backend error: {0}")]
    Backend(String),
    #[error("unable to read credentials table: {0}")]
    Io(#[from] std::io::Error),
    #[error("unable to parse credentials table: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure to deliver a batch to a destination.
#[derive(Debug, thiserror::Error)]
pub enum ShippingError {
    #[error("failed to prepare payload: {0}")]
    Payload(String),
    #[error("invalid destination url: {0}")]
    InvalidUrl(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("destination returned {status}: {body}")]
    Destination { status: StatusCode, body: String },
}

#[derive(Debug, thiserror::Error)]
pub enum WriterError {
    #[error("no buffer for destination `{0}`")]
    UnknownDestination(String),
    #[error(transparent)]
    Shipping(#[from] ShippingError),
}

/// Outcome of an ingestion request that did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("no credentials for token")]
    CredentialsNotFound,
    #[error(transparent)]
    Credentials(#[from] CredentialsError),
    #[error(transparent)]
    Writer(#[from] WriterError),
    #[error("failed reading request body: {0}")]
    Read(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} environment variable is not set")]
    Missing(&'static str),
    #[error("invalid value `{value}` for {name}")]
    Invalid { name: &'static str, value: String },
}
