// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! InfluxDB line protocol: `measurement[,tag=value...] field=value[,...] timestamp`
//! with microsecond timestamps.

use crate::metric::Metric;
use std::borrow::Cow;
use std::fmt::Write;

/// Escapes spaces and commas. Nothing else is escaped.
pub fn escape(input: &str) -> Cow<'_, str> {
    if !input.contains([' ', ',']) {
        return Cow::Borrowed(input);
    }
    let mut escaped = String::with_capacity(input.len() + 4);
    for c in input.chars() {
        if c == ' ' || c == ',' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    Cow::Owned(escaped)
}

/// One line per metric, joined by `\n`, without a trailing newline.
pub fn encode(metrics: &[Metric]) -> String {
    let mut out = String::new();
    for (i, metric) in metrics.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        encode_metric(&mut out, metric);
    }
    out
}

fn encode_metric(out: &mut String, metric: &Metric) {
    out.push_str(&escape(&metric.name));
    for (key, value) in &metric.tags {
        out.push(',');
        out.push_str(&escape(key));
        out.push('=');
        out.push_str(&escape(value));
    }
    out.push(' ');
    for (i, (key, value)) in metric.values.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        // writing to a String cannot fail
        let _ = write!(out, "{key}={value}");
    }
    let _ = write!(out, " {}", metric.timestamp_micros());
}
