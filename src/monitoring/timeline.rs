//! Run Log
//!
//! Append-only, timestamped trail of what happened during a run, plus a
//! timing report derived from step start/complete pairs.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Type of log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    Info,
    StepStart,
    StepComplete,
    Error,
    Complete,
}

/// A single entry in the run log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    pub message: String,
}

/// Append-only log of a run. Entries are never mutated or removed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunLog {
    entries: Vec<LogEntry>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a run-level event.
    pub fn push(&mut self, event_type: EventType, message: impl Into<String>) {
        self.entries.push(LogEntry {
            timestamp: Utc::now(),
            event_type,
            step_id: None,
            message: message.into(),
        });
    }

    /// Records an event for a step.
    pub fn push_step(
        &mut self,
        step_id: &str,
        event_type: EventType,
        message: impl Into<String>,
    ) {
        self.entries.push(LogEntry {
            timestamp: Utc::now(),
            event_type,
            step_id: Some(step_id.to_string()),
            message: message.into(),
        });
    }

    /// Returns all recorded entries.
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&LogEntry> {
        self.entries.last()
    }

    /// Milliseconds between each step's start and its completion or error.
    ///
    /// A step that ran more than once reports its last run.
    pub fn step_durations(&self) -> Vec<(String, i64)> {
        let mut started: HashMap<&str, DateTime<Utc>> = HashMap::new();
        let mut order: Vec<String> = Vec::new();
        let mut durations: HashMap<String, i64> = HashMap::new();

        for entry in &self.entries {
            let Some(step_id) = entry.step_id.as_deref() else {
                continue;
            };
            match entry.event_type {
                EventType::StepStart => {
                    started.insert(step_id, entry.timestamp);
                }
                EventType::StepComplete | EventType::Error => {
                    if let Some(start) = started.remove(step_id) {
                        let ms = (entry.timestamp - start).num_milliseconds();
                        if !durations.contains_key(step_id) {
                            order.push(step_id.to_string());
                        }
                        durations.insert(step_id.to_string(), ms);
                    }
                }
                _ => {}
            }
        }

        order
            .into_iter()
            .map(|id| {
                let ms = durations.get(&id).copied().unwrap_or(0);
                (id, ms)
            })
            .collect()
    }

    /// Renders a plain-text timing report.
    pub fn timing_report(&self) -> String {
        let mut output = String::from("Step timings:\n");
        for (step_id, ms) in self.step_durations() {
            output.push_str(&format!("  {:<24} {:>8} ms\n", step_id, ms));
        }
        output
    }
}
