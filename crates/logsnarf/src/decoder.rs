// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Classifies parsed log lines and extracts metrics from the recognized ones.
//!
//! Rules are plain data: a name, a predicate over the line and the pair keys
//! to copy into tags and values. They are tried in order and the first match
//! wins, so at most one metric comes out of a line.

use crate::constants::SAMPLE_PREFIX;
use crate::errors::DecodeError;
use crate::metric::{FieldValue, Metric};
use crate::parser::LogLine;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

#[allow(clippy::expect_used)]
fn number_regex() -> &'static Regex {
    static NUMBER: OnceLock<Regex> = OnceLock::new();
    NUMBER.get_or_init(|| Regex::new(r"^-?[0-9]+(\.[0-9]+)?").expect("failed creating regex"))
}

#[derive(Clone, Copy)]
pub struct DecoderRule {
    /// Metric family name, used as the measurement.
    pub name: &'static str,
    pub predicate: fn(&LogLine) -> bool,
    /// Pair keys copied verbatim into tags.
    pub tag_fields: &'static [&'static str],
    /// Pair keys copied into numeric values after unit normalization.
    pub value_fields: &'static [&'static str],
}

impl fmt::Debug for DecoderRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoderRule")
            .field("name", &self.name)
            .field("tag_fields", &self.tag_fields)
            .field("value_fields", &self.value_fields)
            .finish_non_exhaustive()
    }
}

fn is_dyno_memory(line: &LogLine) -> bool {
    line.pairs.contains_key("dyno") && line.pairs.contains_key("sample#memory_total")
}

fn is_dyno_load(line: &LogLine) -> bool {
    line.pairs.contains_key("dyno") && line.pairs.contains_key("sample#load_avg_1m")
}

fn is_router(line: &LogLine) -> bool {
    line.appname.as_deref() == Some("heroku") && line.procid.as_deref() == Some("router")
}

fn is_redis(line: &LogLine) -> bool {
    line.procid.as_deref() == Some("heroku-redis")
}

fn is_postgres(line: &LogLine) -> bool {
    line.procid.as_deref() == Some("heroku-postgres")
}

/// Built-in Heroku metric families, in evaluation order.
pub static DECODERS: &[DecoderRule] = &[
    DecoderRule {
        name: "heroku_dyno_memory",
        predicate: is_dyno_memory,
        tag_fields: &["source"],
        value_fields: &[
            "sample#memory_total",
            "sample#memory_rss",
            "sample#memory_cache",
            "sample#memory_swap",
            "sample#memory_pgpgin",
            "sample#memory_pgpgout",
            "sample#memory_quota",
        ],
    },
    DecoderRule {
        name: "heroku_dyno_load",
        predicate: is_dyno_load,
        tag_fields: &["source"],
        value_fields: &[
            "sample#load_avg_1m",
            "sample#load_avg_5m",
            "sample#load_avg_15m",
        ],
    },
    DecoderRule {
        name: "heroku_router",
        predicate: is_router,
        tag_fields: &["method", "host", "dyno", "status", "protocol"],
        value_fields: &["connect", "service", "bytes"],
    },
    DecoderRule {
        name: "heroku_redis",
        predicate: is_redis,
        tag_fields: &["addon"],
        value_fields: &[
            "sample#active-connections",
            "sample#load-avg-1m",
            "sample#load-avg-5m",
            "sample#load-avg-15m",
            "sample#read-iops",
            "sample#write-iops",
            "sample#memory-total",
            "sample#memory-free",
            "sample#memory-cached",
            "sample#memory-redis",
            "sample#hit-rate",
            "sample#evicted-keys",
            "sample#used_memory_over_limit",
        ],
    },
    DecoderRule {
        name: "heroku_postgres",
        predicate: is_postgres,
        tag_fields: &["addon", "source"],
        value_fields: &[
            "sample#current_transaction",
            "sample#db_size",
            "sample#tables",
            "sample#active-connections",
            "sample#waiting-connections",
            "sample#index-cache-hit-rate",
            "sample#table-cache-hit-rate",
            "sample#load-avg-1m",
            "sample#load-avg-5m",
            "sample#load-avg-15m",
            "sample#read-iops",
            "sample#write-iops",
            "sample#tmp-disk-used",
            "sample#tmp-disk-available",
            "sample#memory-total",
            "sample#memory-free",
            "sample#memory-cached",
            "sample#memory-postgres",
            "sample#wal-percentage-used",
        ],
    },
];

#[derive(Debug, Clone)]
pub struct DecoderRegistry {
    rules: Vec<DecoderRule>,
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        DecoderRegistry::new(DECODERS.to_vec())
    }
}

impl DecoderRegistry {
    pub fn new(rules: Vec<DecoderRule>) -> Self {
        DecoderRegistry { rules }
    }

    pub fn rules(&self) -> &[DecoderRule] {
        &self.rules
    }

    /// Returns `Ok(None)` when no rule recognizes the line, which is the
    /// common case for ordinary application logs.
    pub fn classify(&self, line: &LogLine) -> Result<Option<Metric>, DecodeError> {
        match self.rules.iter().find(|rule| (rule.predicate)(line)) {
            Some(rule) => decode(rule, line).map(Some),
            None => Ok(None),
        }
    }
}

fn decode(rule: &DecoderRule, line: &LogLine) -> Result<Metric, DecodeError> {
    let raw_timestamp = line
        .timestamp
        .as_deref()
        .ok_or(DecodeError::MissingTimestamp)?;
    let timestamp = DateTime::parse_from_rfc3339(raw_timestamp)
        .map_err(|_| DecodeError::InvalidTimestamp(raw_timestamp.to_string()))?
        .with_timezone(&Utc);

    let mut metric = Metric::new(rule.name, timestamp);
    for field in rule.tag_fields {
        if let Some(value) = line.pairs.get(field) {
            metric.tags.insert((*field).to_string(), value.to_string());
        }
    }
    for field in rule.value_fields {
        if let Some(raw) = line.pairs.get(field) {
            let (key, value) = normalize_value(field, raw)?;
            metric.values.insert(key, FieldValue::Float(value));
        }
    }

    if !metric.is_complete() {
        return Err(DecodeError::Incomplete {
            name: metric.name,
        });
    }
    Ok(metric)
}

/// `("sample#memory_total", "318.20MB")` becomes `("memory_total_mb", 318.2)`.
pub fn normalize_value(key: &str, raw: &str) -> Result<(String, f64), DecodeError> {
    let invalid = || DecodeError::InvalidNumber {
        key: key.to_string(),
        value: raw.to_string(),
    };

    let stripped = key.strip_prefix(SAMPLE_PREFIX).unwrap_or(key);
    let number = number_regex().find(raw).ok_or_else(invalid)?;
    let value: f64 = number.as_str().parse().map_err(|_| invalid())?;
    let unit = raw[number.end()..].to_lowercase();

    let key = if unit.is_empty() {
        stripped.to_string()
    } else {
        format!("{stripped}_{unit}")
    };
    Ok((key, value))
}
