// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

/// Numeric field value carried by a [`Metric`].
///
/// Decoded metrics are always floats; integers exist so callers building
/// metrics by hand can ask for the `i` suffix on the wire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Float(v) => write!(f, "{v}"),
            FieldValue::Integer(v) => write!(f, "{v}i"),
        }
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub name: String,
    pub tags: BTreeMap<String, String>,
    pub values: BTreeMap<String, FieldValue>,
    pub timestamp: DateTime<Utc>,
}

impl Metric {
    pub fn new(name: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Metric {
            name: name.into(),
            tags: BTreeMap::new(),
            values: BTreeMap::new(),
            timestamp,
        }
    }

    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// A metric is only shipped when it has a name, at least one tag and at
    /// least one value. The timestamp is always present by construction.
    pub fn is_complete(&self) -> bool {
        !self.name.is_empty() && !self.tags.is_empty() && !self.values.is_empty()
    }

    /// Microseconds since the unix epoch, the precision used on the wire.
    pub fn timestamp_micros(&self) -> i64 {
        self.timestamp.timestamp_micros()
    }
}
