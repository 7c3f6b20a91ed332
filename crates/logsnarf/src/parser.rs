// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Incremental parser for syslog-framed log drains.
//!
//! Heroku drains send RFC5424-ish lines:
//!
//! ```text
//! 245 <45>1 2019-11-25T18:28:00.226738+00:00 host heroku worker.1 - - source=worker.1 sample#load_avg_1m=0.03
//! ```
//!
//! The header is scanned field by field and every field is optional, so a
//! sender that omits the structured-data placeholder still parses. The
//! remainder is a run of `key=value` tokens. Malformed input never fails the
//! stream: the line is dropped and reading continues with the next one.

use regex::Regex;
use std::io;
use std::sync::OnceLock;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::debug;

const MAX_HOSTNAME_LEN: usize = 255;
const MAX_APPNAME_LEN: usize = 48;
const MAX_PROCID_LEN: usize = 128;
const MAX_MSGID_LEN: usize = 32;

/// RFC5424 placeholder for an absent header field.
const NIL_VALUE: &str = "-";

#[allow(clippy::expect_used)]
fn timestamp_regex() -> &'static Regex {
    static TIMESTAMP: OnceLock<Regex> = OnceLock::new();
    TIMESTAMP.get_or_init(|| {
        Regex::new(
            r"^[0-9]{4}-[0-9]{2}-[0-9]{2}T[0-9]{2}:[0-9]{2}:[0-9]{2}(\.[0-9]+)?(Z|[+-][0-9]{2}:[0-9]{2})",
        )
        .expect("failed creating regex")
    })
}

/// Ordered string map where inserting an existing key overwrites its value
/// but keeps its original position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pairs {
    entries: Vec<(String, String)>,
}

impl Pairs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One parsed drain line.
#[derive(Debug, Clone, PartialEq)]
pub struct LogLine {
    /// Raw ISO-8601 timestamp, converted by the decoder when needed.
    pub timestamp: Option<String>,
    pub hostname: Option<String>,
    pub appname: Option<String>,
    pub procid: Option<String>,
    pub msgid: Option<String>,
    /// Free-form pairs plus the header fields under their literal names.
    pub pairs: Pairs,
    /// Original text without the line terminator.
    pub raw: String,
}

pub struct Parser;

impl Parser {
    /// Parses a single line, without its terminator.
    ///
    /// Returns `None` when nothing could be extracted from the line.
    pub fn parse_line(line: &str) -> Option<LogLine> {
        let mut scanner = Scanner::new(line);

        scanner.skip_length_prefix();
        if scanner.eat('<') {
            if scanner.scan_digits().is_none() || !scanner.eat('>') {
                return None;
            }
            // protocol version
            scanner.scan_digits();
        }
        scanner.skip_whitespace();

        let timestamp = scanner.scan_timestamp();
        scanner.skip_whitespace();
        let hostname = scanner.scan_header_field(MAX_HOSTNAME_LEN);
        scanner.skip_whitespace();
        let appname = scanner.scan_header_field(MAX_APPNAME_LEN);
        scanner.skip_whitespace();
        let procid = scanner.scan_header_field(MAX_PROCID_LEN);
        scanner.skip_whitespace();
        let msgid = scanner.scan_header_field(MAX_MSGID_LEN);
        scanner.skip_whitespace();
        // Heroku leaves out structured data, sometimes even the placeholder.
        scanner.eat_str("- ");

        let mut pairs = Pairs::new();
        for (key, value) in [
            ("hostname", &hostname),
            ("appname", &appname),
            ("procid", &procid),
            ("msgid", &msgid),
        ] {
            if let Some(value) = value {
                pairs.insert(key, value.as_str());
            }
        }
        for (key, value) in KeyValues::new(scanner.rest()) {
            pairs.insert(key, value);
        }

        if pairs.is_empty() {
            return None;
        }

        Some(LogLine {
            timestamp: timestamp.map(str::to_string),
            hostname,
            appname,
            procid,
            msgid,
            pairs,
            raw: line.to_string(),
        })
    }
}

struct Scanner<'a> {
    rest: &'a str,
}

impl<'a> Scanner<'a> {
    fn new(input: &'a str) -> Self {
        Scanner { rest: input }
    }

    fn rest(&self) -> &'a str {
        self.rest
    }

    fn skip_whitespace(&mut self) {
        self.rest = self.rest.trim_start();
    }

    fn eat(&mut self, c: char) -> bool {
        match self.rest.strip_prefix(c) {
            Some(rest) => {
                self.rest = rest;
                true
            }
            None => false,
        }
    }

    fn eat_str(&mut self, s: &str) -> bool {
        match self.rest.strip_prefix(s) {
            Some(rest) => {
                self.rest = rest;
                true
            }
            None => false,
        }
    }

    fn take(&mut self, len: usize) -> Option<&'a str> {
        if len == 0 {
            return None;
        }
        let (taken, rest) = self.rest.split_at(len);
        self.rest = rest;
        Some(taken)
    }

    fn scan_digits(&mut self) -> Option<&'a str> {
        let len = self
            .rest
            .bytes()
            .take_while(|b| b.is_ascii_digit())
            .count();
        self.take(len)
    }

    /// Octet-counting prefix. Only consumed when followed by whitespace so a
    /// bare timestamp is not mistaken for a length.
    fn skip_length_prefix(&mut self) {
        let len = self
            .rest
            .bytes()
            .take_while(|b| b.is_ascii_digit())
            .count();
        if len > 0
            && self.rest[len..]
                .chars()
                .next()
                .is_some_and(char::is_whitespace)
        {
            self.rest = &self.rest[len..];
            self.skip_whitespace();
        }
    }

    fn scan_timestamp(&mut self) -> Option<&'a str> {
        let len = timestamp_regex().find(self.rest)?.end();
        self.take(len)
    }

    /// Up to `max_len` printable ASCII characters. The NIL placeholder is
    /// consumed but reported as absent.
    fn scan_header_field(&mut self, max_len: usize) -> Option<String> {
        let len = self
            .rest
            .bytes()
            .take(max_len)
            .take_while(|b| (0x21..=0x7e).contains(b))
            .count();
        let field = self.take(len)?;
        (field != NIL_VALUE).then(|| field.to_string())
    }
}

/// Iterator over the `key=value` tokens of a message body.
///
/// Tokens without a `=`, with an empty key or with an empty value are
/// skipped. A value starting with `"` runs to the closing quote and may
/// contain whitespace; an unterminated quote ends the message.
struct KeyValues<'a> {
    rest: &'a str,
}

impl<'a> KeyValues<'a> {
    fn new(input: &'a str) -> Self {
        KeyValues { rest: input }
    }

    fn next_token(&mut self) -> Option<(&'a str, Option<&'a str>)> {
        self.rest = self.rest.trim_start();
        if self.rest.is_empty() {
            return None;
        }

        let key_len = self
            .rest
            .find(|c: char| c == '=' || c.is_whitespace())
            .unwrap_or(self.rest.len());
        let key = &self.rest[..key_len];
        let after_key = &self.rest[key_len..];

        let Some(after_eq) = after_key.strip_prefix('=') else {
            // bare word
            self.rest = after_key;
            return Some((key, None));
        };

        if let Some(quoted) = after_eq.strip_prefix('"') {
            let Some(end) = quoted.find('"') else {
                self.rest = "";
                return None;
            };
            self.rest = &quoted[end + 1..];
            return Some((key, Some(&quoted[..end])));
        }

        let value_len = after_eq
            .find(char::is_whitespace)
            .unwrap_or(after_eq.len());
        self.rest = &after_eq[value_len..];
        Some((key, Some(&after_eq[..value_len])))
    }
}

impl<'a> Iterator for KeyValues<'a> {
    type Item = (&'a str, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.next_token()? {
                (key, Some(value)) if !key.is_empty() && !value.is_empty() => {
                    return Some((key, value))
                }
                _ => continue,
            }
        }
    }
}

/// Pulls [`LogLine`]s out of a byte stream one newline-terminated line at a
/// time, keeping running totals of what it consumed.
///
/// Memory use is bounded by the longest line. A trailing chunk without a
/// newline is counted in [`bytes`](Self::bytes) but never parsed.
pub struct LineReader<R> {
    reader: R,
    buf: Vec<u8>,
    lines: u64,
    bytes: u64,
}

impl<R> LineReader<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        LineReader {
            reader,
            buf: Vec::new(),
            lines: 0,
            bytes: 0,
        }
    }

    /// Next parsed line, skipping lines that yield nothing.
    ///
    /// Returns `Ok(None)` at end of stream.
    pub async fn next_line(&mut self) -> io::Result<Option<LogLine>> {
        loop {
            self.buf.clear();
            let read = self.reader.read_until(b'\n', &mut self.buf).await?;
            if read == 0 {
                return Ok(None);
            }
            self.bytes += read as u64;

            if self.buf.last() != Some(&b'\n') {
                debug!("Dropping {read} trailing bytes without a line terminator");
                return Ok(None);
            }
            self.lines += 1;

            let text = String::from_utf8_lossy(&self.buf);
            let line = text.trim_end_matches(['\n', '\r']);
            if let Some(log_line) = Parser::parse_line(line) {
                return Ok(Some(log_line));
            }
        }
    }

    /// Newline-terminated lines read so far, including dropped ones.
    pub fn lines(&self) -> u64 {
        self.lines
    }

    /// Bytes read so far.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const LOAD_LINE: &str = "245 <45>1 2019-11-25T18:28:00.226738+00:00 host heroku worker.1 - - source=worker.1 dyno=heroku.145151706.b6e2d2ae-2a9c-4dad-a9ea-1a3bd4e8e8d7 sample#load_avg_1m=0.03 sample#load_avg_5m=0.04 sample#load_avg_15m=0.02";

    const ROUTER_LINE: &str = "251 <158>1 2019-11-25T18:28:03.516197+00:00 host heroku router - at=info method=GET path=\"/\" host=example.herokuapp.com request_id=0b1e5c7f fwd=\"10.1.1.1\" dyno=web.1 connect=1ms service=12ms status=200 bytes=1234 protocol=https";

    async fn collect(input: &str) -> (Vec<LogLine>, u64, u64) {
        let mut reader = LineReader::new(input.as_bytes());
        let mut out = Vec::new();
        while let Some(line) = reader.next_line().await.unwrap() {
            out.push(line);
        }
        (out, reader.lines(), reader.bytes())
    }

    #[test]
    fn test_parses_header_and_pairs() {
        let line = Parser::parse_line(LOAD_LINE).unwrap();
        assert_eq!(
            line.timestamp.as_deref(),
            Some("2019-11-25T18:28:00.226738+00:00")
        );
        assert_eq!(line.hostname.as_deref(), Some("host"));
        assert_eq!(line.appname.as_deref(), Some("heroku"));
        assert_eq!(line.procid.as_deref(), Some("worker.1"));
        assert_eq!(line.msgid, None);
        assert_eq!(line.pairs.get("source"), Some("worker.1"));
        assert_eq!(line.pairs.get("sample#load_avg_15m"), Some("0.02"));
        assert_eq!(line.raw, LOAD_LINE);
    }

    #[test]
    fn test_header_fields_are_injected_into_pairs() {
        let line = Parser::parse_line(ROUTER_LINE).unwrap();
        let keys: Vec<&str> = line.pairs.iter().map(|(k, _)| k).take(3).collect();
        assert_eq!(keys, vec!["hostname", "appname", "procid"]);
        assert_eq!(line.pairs.get("appname"), Some("heroku"));
        assert_eq!(line.pairs.get("procid"), Some("router"));
        assert!(!line.pairs.contains_key("msgid"));
    }

    #[test]
    fn test_quoted_values_keep_inner_whitespace() {
        let line = Parser::parse_line(
            "<13>1 2019-11-25T18:28:00Z host app web.1 - msg=\"hello there world\" k=v",
        )
        .unwrap();
        assert_eq!(line.pairs.get("msg"), Some("hello there world"));
        assert_eq!(line.pairs.get("k"), Some("v"));
        let line = Parser::parse_line(ROUTER_LINE).unwrap();
        assert_eq!(line.pairs.get("path"), Some("/"));
    }

    #[test]
    fn test_later_pairs_overwrite_earlier_ones() {
        let line =
            Parser::parse_line("<13>1 2019-11-25T18:28:00Z host app web.1 - - k=1 j=0 k=2").unwrap();
        assert_eq!(line.pairs.get("k"), Some("2"));
        let keys: Vec<&str> = line.pairs.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["hostname", "appname", "procid", "k", "j"]);
    }

    #[test]
    fn test_bare_words_and_empty_values_are_skipped() {
        let line = Parser::parse_line(
            "<13>1 2019-11-25T18:28:00Z host app web.1 - - Starting process with command k= =v a=b",
        )
        .unwrap();
        assert_eq!(line.pairs.get("a"), Some("b"));
        assert!(!line.pairs.contains_key("k"));
        assert!(!line.pairs.contains_key("Starting"));
        assert_eq!(line.pairs.len(), 4);
    }

    #[test]
    fn test_missing_structured_data_placeholder() {
        let line = Parser::parse_line(
            "<134>1 2019-11-25T18:28:00+00:00 host app heroku-redis - sample#active-connections=8",
        )
        .unwrap();
        assert_eq!(line.procid.as_deref(), Some("heroku-redis"));
        assert_eq!(line.pairs.get("sample#active-connections"), Some("8"));
    }

    #[test]
    fn test_empty_line_is_dropped() {
        assert!(Parser::parse_line("").is_none());
        assert!(Parser::parse_line("   ").is_none());
    }

    #[test]
    fn test_broken_priority_is_dropped() {
        assert!(Parser::parse_line("<abc 2019-11-25T18:28:00Z host app web.1").is_none());
    }

    #[test]
    fn test_header_fields_are_length_limited() {
        let long = "a".repeat(60);
        let line = Parser::parse_line(&format!("2019-11-25T18:28:00Z host {long} web.1 - - k=v"))
            .unwrap();
        assert_eq!(line.appname.as_deref(), Some(&long[..48]));
    }

    #[tokio::test]
    async fn test_reader_yields_one_line_per_newline() {
        let input = format!("{LOAD_LINE}\n\n{ROUTER_LINE}\n");
        let (lines, count, bytes) = collect(&input).await;
        assert_eq!(lines.len(), 2);
        assert_eq!(count, 3);
        assert_eq!(bytes, input.len() as u64);
        assert_eq!(lines[1].procid.as_deref(), Some("router"));
    }

    #[tokio::test]
    async fn test_reader_drops_unterminated_trailing_line() {
        let input = format!("{LOAD_LINE}\n{ROUTER_LINE}");
        let (lines, count, bytes) = collect(&input).await;
        assert_eq!(lines.len(), 1);
        assert_eq!(count, 1);
        assert_eq!(bytes, input.len() as u64);
    }

    #[tokio::test]
    async fn test_reader_handles_crlf() {
        let (lines, _, _) = collect(&format!("{LOAD_LINE}\r\n")).await;
        assert_eq!(lines[0].pairs.get("sample#load_avg_15m"), Some("0.02"));
    }

    #[tokio::test]
    async fn test_reader_reads_lines_split_across_chunks() {
        let input = format!("{LOAD_LINE}\n{ROUTER_LINE}\n");
        let reader = tokio::io::BufReader::with_capacity(7, input.as_bytes());
        let mut reader = LineReader::new(reader);
        let mut out = Vec::new();
        while let Some(line) = reader.next_line().await.unwrap() {
            out.push(line);
        }
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].raw, LOAD_LINE);
        assert_eq!(out[1].raw, ROUTER_LINE);
    }

    #[tokio::test]
    async fn test_reparsing_yields_identical_lines() {
        let input = format!("{LOAD_LINE}\n{ROUTER_LINE}\ngarbage\n");
        let first = collect(&input).await;
        let second = collect(&input).await;
        assert_eq!(first, second);
    }

    proptest! {
        #[test]
        fn test_parse_line_never_panics(line in "\\PC*") {
            let _ = Parser::parse_line(&line);
        }

        #[test]
        fn test_parse_line_is_deterministic(line in "[ -~]{0,120}") {
            prop_assert_eq!(Parser::parse_line(&line), Parser::parse_line(&line));
        }

        #[test]
        fn test_last_duplicate_key_wins(a in "[0-9]{1,5}", b in "[0-9]{1,5}") {
            let input = format!("<13>1 2019-11-25T18:28:00Z host app web.1 - - k={a} k={b}");
            let line = Parser::parse_line(&input).unwrap();
            prop_assert_eq!(line.pairs.get("k"), Some(b.as_str()));
        }
    }
}
