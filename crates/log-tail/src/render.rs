// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Turns fetched events into output lines.
//!
//! Each fetch worker owns one [`EventRenderer`], so short-format aliases and
//! the day offset are relative to what that worker has seen.

use std::collections::{BTreeSet, HashMap};
use std::hash::Hasher;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use fnv::FnvHasher;
use lifecycle_common::ConfigError;
use serde::Serialize;
use tracing::warn;

use crate::worker::FetchedEvent;

const DAY_MS: i64 = 86_400_000;
const MAPPING_LEAD_MS: i64 = 10;
const REDUNDANT_WINDOW_MS: i64 = 5;

const ADJECTIVES: [&str; 32] = [
    "amber", "bold", "brisk", "calm", "clever", "cosmic", "crisp", "dusty", "eager", "fuzzy",
    "gentle", "golden", "hollow", "icy", "jolly", "keen", "lively", "lucky", "mellow", "misty",
    "nimble", "noble", "polar", "quiet", "rapid", "rusty", "silent", "silver", "sunny", "swift",
    "tidy", "wild",
];

const NOUNS: [&str; 32] = [
    "badger", "beacon", "canyon", "cedar", "comet", "coral", "delta", "falcon", "fjord", "glacier",
    "harbor", "heron", "island", "lagoon", "lantern", "maple", "meadow", "otter", "panda", "pebble",
    "pine", "prairie", "raven", "reef", "ridge", "river", "summit", "thistle", "tundra", "walrus",
    "willow", "zephyr",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// `<UTC time> <group> <stream> <message>`
    #[default]
    Full,
    /// Day offset, time of day and hashed aliases for group and stream
    Short,
    /// One JSON object per event
    Json,
}

impl FromStr for OutputFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "full" => Ok(OutputFormat::Full),
            "short" => Ok(OutputFormat::Short),
            "json" => Ok(OutputFormat::Json),
            _ => Err(ConfigError::InvalidValue {
                key: "format".to_string(),
                value: s.to_string(),
                reason: "expected one of full, short, json".to_string(),
            }),
        }
    }
}

/// A line and the timestamp it sorts under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedLine {
    pub timestamp: i64,
    pub line: String,
}

#[derive(Serialize)]
struct JsonEvent<'a> {
    timestamp: i64,
    group: &'a str,
    stream: &'a str,
    message: &'a str,
}

#[derive(Debug, Clone, Default)]
pub struct EventRenderer {
    format: OutputFormat,
    first_timestamp: Option<i64>,
    group_aliases: HashMap<String, String>,
    stream_aliases: HashMap<String, String>,
}

impl EventRenderer {
    #[must_use]
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Renders one event of `group`. Short format may prepend mapping lines.
    pub fn render(&mut self, group: &str, event: &FetchedEvent) -> Vec<RenderedLine> {
        let first = *self.first_timestamp.get_or_insert(event.timestamp);
        let message = event.message.trim_end();

        match self.format {
            OutputFormat::Full => vec![RenderedLine {
                timestamp: event.timestamp,
                line: join_fields(&[
                    &full_time(event.timestamp),
                    group,
                    &event.stream,
                    message,
                ]),
            }],
            OutputFormat::Json => {
                let json = JsonEvent {
                    timestamp: event.timestamp,
                    group,
                    stream: &event.stream,
                    message,
                };
                match serde_json::to_string(&json) {
                    Ok(line) => vec![RenderedLine {
                        timestamp: event.timestamp,
                        line,
                    }],
                    Err(e) => {
                        warn!("Failed to serialize event from {group}: {e}");
                        Vec::new()
                    }
                }
            }
            OutputFormat::Short => {
                let mut lines = Vec::with_capacity(3);
                let mapping_time = event.timestamp - MAPPING_LEAD_MS;
                let group_alias = alias_for(&mut self.group_aliases, group, mapping_time, &mut lines);
                let stream_alias =
                    alias_for(&mut self.stream_aliases, &event.stream, mapping_time, &mut lines);
                let message = strip_redundant_timestamps(message, event.timestamp);
                lines.push(RenderedLine {
                    timestamp: event.timestamp,
                    line: join_fields(&[
                        &short_time(first, event.timestamp),
                        &group_alias,
                        &stream_alias,
                        &message,
                    ]),
                });
                lines
            }
        }
    }
}

fn alias_for(
    aliases: &mut HashMap<String, String>,
    name: &str,
    mapping_time: i64,
    lines: &mut Vec<RenderedLine>,
) -> String {
    if let Some(alias) = aliases.get(name) {
        return alias.clone();
    }
    let alias = hashed_word(name);
    lines.push(RenderedLine {
        timestamp: mapping_time,
        line: format!("Mapping {name} to {alias}"),
    });
    aliases.insert(name.to_string(), alias.clone());
    alias
}

fn join_fields(fields: &[&str]) -> String {
    fields.join(" ").trim().to_string()
}

/// Short, stable, human-friendly alias for a long name.
#[must_use]
pub fn hashed_word(name: &str) -> String {
    let mut hasher = FnvHasher::default();
    hasher.write(name.as_bytes());
    let hash = hasher.finish();
    // both indices are below 32, so the casts cannot truncate
    let adjective = ADJECTIVES[(hash % ADJECTIVES.len() as u64) as usize];
    let noun = NOUNS[((hash >> 32) % NOUNS.len() as u64) as usize];
    format!("{adjective}-{noun}")
}

fn datetime(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis)
}

fn full_time(millis: i64) -> String {
    datetime(millis).map_or_else(
        || millis.to_string(),
        |t| t.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
    )
}

fn short_time(first: i64, millis: i64) -> String {
    let day = millis.div_euclid(DAY_MS) - first.div_euclid(DAY_MS);
    let time = datetime(millis).map_or_else(
        || millis.to_string(),
        |t| t.format("%H:%M:%S%.3f").to_string(),
    );
    format!("{day} {time}")
}

/// Every way the event's own timestamp (give or take a few ms) is likely to
/// appear inside its message, longest first.
fn redundant_timeformats(timestamp: i64) -> Vec<String> {
    let mut formats = BTreeSet::new();
    for offset in -REDUNDANT_WINDOW_MS..REDUNDANT_WINDOW_MS {
        let Some(t) = datetime(timestamp + offset) else {
            continue;
        };
        for base in [
            t.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
            t.format("%Y-%m-%dT%H:%M:%S%.3f").to_string(),
        ] {
            formats.insert(base.clone());
            formats.insert(base.replace('.', ","));
            formats.insert(base.replace('T', " "));
            formats.insert(base.replace('T', " ").replace('.', ","));
            formats.insert(base[..19].to_string());
            formats.insert(base[..19].replace('T', " "));
            formats.insert(base[..10].to_string());
            formats.insert(base[11..19].to_string());
            formats.insert(base[11..23].to_string());
            formats.insert(base[11..23].replace('.', ","));
        }
    }
    let mut formats: Vec<String> = formats.into_iter().collect();
    formats.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    formats
}

fn strip_redundant_timestamps(message: &str, timestamp: i64) -> String {
    redundant_timeformats(timestamp)
        .iter()
        .fold(message.to_string(), |message, redundant| {
            message.replace(redundant.as_str(), "")
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(timestamp: i64, stream: &str, message: &str) -> FetchedEvent {
        FetchedEvent {
            timestamp,
            stream: stream.to_string(),
            message: message.to_string(),
        }
    }

    fn millis(h: u32, m: u32, s: u32, ms: i64) -> i64 {
        Utc.with_ymd_and_hms(2024, 5, 31, h, m, s)
            .unwrap()
            .timestamp_millis()
            + ms
    }

    #[test]
    fn test_full_format() {
        let mut renderer = EventRenderer::new(OutputFormat::Full);
        let lines = renderer.render("/app/web", &event(millis(12, 0, 1, 250), "i-123", "GET /\n"));
        assert_eq!(
            lines,
            vec![RenderedLine {
                timestamp: millis(12, 0, 1, 250),
                line: "2024-05-31 12:00:01.250 /app/web i-123 GET /".to_string(),
            }]
        );
    }

    #[test]
    fn test_json_format() {
        let mut renderer = EventRenderer::new(OutputFormat::Json);
        let lines = renderer.render("/app/web", &event(42, "i-123", "say \"hi\""));
        let parsed: serde_json::Value =
            serde_json::from_str(&lines[0].line).expect("valid json");
        assert_eq!(parsed["timestamp"], 42);
        assert_eq!(parsed["group"], "/app/web");
        assert_eq!(parsed["stream"], "i-123");
        assert_eq!(parsed["message"], "say \"hi\"");
    }

    #[test]
    fn test_short_format_maps_names_once() {
        let mut renderer = EventRenderer::new(OutputFormat::Short);
        let group_alias = hashed_word("/app/web");
        let stream_alias = hashed_word("i-123");

        let ts = millis(23, 59, 59, 900);
        let first = renderer.render("/app/web", &event(ts, "i-123", "started"));
        assert_eq!(
            first,
            vec![
                RenderedLine {
                    timestamp: ts - 10,
                    line: format!("Mapping /app/web to {group_alias}"),
                },
                RenderedLine {
                    timestamp: ts - 10,
                    line: format!("Mapping i-123 to {stream_alias}"),
                },
                RenderedLine {
                    timestamp: ts,
                    line: format!("0 23:59:59.900 {group_alias} {stream_alias} started"),
                },
            ]
        );

        let next_day = ts + 200;
        let second = renderer.render("/app/web", &event(next_day, "i-123", "still here"));
        assert_eq!(
            second,
            vec![RenderedLine {
                timestamp: next_day,
                line: format!("1 00:00:00.100 {group_alias} {stream_alias} still here"),
            }]
        );
    }

    #[test]
    fn test_short_format_strips_own_timestamp() {
        let mut renderer = EventRenderer::new(OutputFormat::Short);
        let ts = millis(12, 0, 1, 250);
        let lines = renderer.render(
            "g",
            &event(ts, "s", "2024-05-31 12:00:01,252 INFO request served"),
        );
        let line = &lines.last().expect("event line").line;
        assert!(line.ends_with(" INFO request served"), "{line}");
        assert!(!line.contains("2024-05-31"), "{line}");

        let lines = renderer.render("g", &event(ts, "s", "[2024-05-31T12:00:01.245] boot"));
        assert!(lines[0].line.ends_with("[] boot"), "{}", lines[0].line);
    }

    #[test]
    fn test_hashed_word_is_stable() {
        assert_eq!(hashed_word("/app/web"), hashed_word("/app/web"));
        let alias = hashed_word("/app/web");
        let (adjective, noun) = alias.split_once('-').expect("two words");
        assert!(ADJECTIVES.contains(&adjective));
        assert!(NOUNS.contains(&noun));
    }

    #[test]
    fn test_parse_format() {
        assert_eq!("SHORT".parse::<OutputFormat>(), Ok(OutputFormat::Short));
        assert_eq!("json".parse::<OutputFormat>(), Ok(OutputFormat::Json));
        assert!("xml".parse::<OutputFormat>().is_err());
    }
}
