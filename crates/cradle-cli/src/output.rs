//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use chrono::{Local, TimeZone};
use serde::Serialize;

use cradle_core::models::FeedEvent;
use cradle_core::queries::{DailySummary, DayCounts, EventRef, Freshness};
use cradle_core::{EventKind, TrackedEvent};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

#[derive(Serialize)]
struct EventJson<'a> {
    id: &'a str,
    #[serde(flatten)]
    event: &'a TrackedEvent,
    #[serde(skip_serializing_if = "Option::is_none")]
    freshness: Option<Freshness>,
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Print any serializable value as pretty JSON
    pub fn json<T: Serialize + ?Sized>(&self, value: &T) {
        match serde_json::to_string_pretty(value) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Failed to encode output: {}", e),
        }
    }

    /// Print a list of events
    pub fn print_events(&self, events: &[EventRef<'_>]) {
        match self.format {
            OutputFormat::Human => {
                if events.is_empty() {
                    println!("No events found.");
                    return;
                }
                let mut sorted = events.to_vec();
                sorted.sort_by_key(|(_, event)| event.begin_ms());
                for (id, event) in sorted {
                    println!(
                        "{} | {:<7} | {} | {}",
                        short_id(id),
                        event.kind(),
                        format_time(event.begin_ms()),
                        describe(event)
                    );
                }
                println!("\n{} event(s)", events.len());
            }
            OutputFormat::Json => {
                let json: Vec<_> = events
                    .iter()
                    .map(|(id, event)| EventJson {
                        id: *id,
                        event: *event,
                        freshness: None,
                    })
                    .collect();
                self.json(&json);
            }
            OutputFormat::Quiet => {
                for (id, _) in events {
                    println!("{}", id);
                }
            }
        }
    }

    /// Print a single event picked by a query ("first feed", "last nap")
    pub fn print_event(
        &self,
        label: &str,
        kind: EventKind,
        found: Option<EventRef<'_>>,
        freshness: Option<Freshness>,
    ) {
        let Some((id, event)) = found else {
            match self.format {
                OutputFormat::Human => println!("No {} events.", kind),
                OutputFormat::Json => println!("null"),
                OutputFormat::Quiet => {}
            }
            return;
        };

        match self.format {
            OutputFormat::Human => {
                println!("{} {}: {}", label, kind, format_time(event.begin_ms()));
                println!("  ID:      {}", id);
                println!("  Details: {}", describe(event));
                if let Some(freshness) = freshness {
                    println!(
                        "  Started: {} ago ({})",
                        format_duration(Local::now().timestamp_millis() - event.begin_ms()),
                        freshness
                    );
                }
            }
            OutputFormat::Json => self.json(&EventJson {
                id,
                event,
                freshness,
            }),
            OutputFormat::Quiet => println!("{}", id),
        }
    }

    pub fn print_summary(&self, summary: &DailySummary) {
        match self.format {
            OutputFormat::Human => {
                println!("Today since {}", format_time(summary.since_ms));
                println!();
                println!(
                    "Diapers: {} ({} wet, {} soiled){}",
                    summary.diapers.total,
                    summary.diapers.wet,
                    summary.diapers.soiled,
                    last_footer(summary, EventKind::Diaper)
                );
                println!(
                    "Feeds:   {} ({} breast, {} bottle){}",
                    summary.feeds.total,
                    summary.feeds.breast,
                    summary.feeds.bottle,
                    last_footer(summary, EventKind::Feed)
                );
                println!(
                    "         nursing L {} / R {}, bottle volume {}",
                    format_duration(summary.feeds.left_ms),
                    format_duration(summary.feeds.right_ms),
                    summary.feeds.bottle_volume
                );
                println!(
                    "Naps:    {} ({} asleep){}",
                    summary.naps.total,
                    format_duration(summary.naps.asleep_ms),
                    last_footer(summary, EventKind::Sleep)
                );
            }
            OutputFormat::Json => self.json(summary),
            OutputFormat::Quiet => {
                println!(
                    "{} {} {}",
                    summary.diapers.total, summary.feeds.total, summary.naps.total
                );
            }
        }
    }

    pub fn print_day_counts(&self, days: &[DayCounts]) {
        match self.format {
            OutputFormat::Human => {
                println!("Date       | Diapers | Feeds | Naps");
                for day in days {
                    println!(
                        "{} | {:>7} | {:>5} | {:>4}",
                        day.date, day.diapers, day.feeds, day.naps
                    );
                }
                if !days.is_empty() {
                    let n = days.len() as f64;
                    let avg = |f: fn(&DayCounts) -> usize| {
                        days.iter().map(f).sum::<usize>() as f64 / n
                    };
                    println!(
                        "Average    | {:>7.1} | {:>5.1} | {:>4.1}",
                        avg(|d| d.diapers),
                        avg(|d| d.feeds),
                        avg(|d| d.naps)
                    );
                }
            }
            OutputFormat::Json => self.json(days),
            OutputFormat::Quiet => {
                for day in days {
                    println!("{} {} {} {}", day.date, day.diapers, day.feeds, day.naps);
                }
            }
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

fn last_footer(summary: &DailySummary, kind: EventKind) -> String {
    summary
        .last
        .get(&kind)
        .map(|ms| format!(", last at {}", format_clock(*ms)))
        .unwrap_or_default()
}

/// One-line description of an event's kind-specific fields
pub fn describe(event: &TrackedEvent) -> String {
    match event {
        TrackedEvent::Diaper(diaper) => {
            let mut parts = Vec::new();
            if diaper.is_wet() {
                parts.push("wet");
            }
            if diaper.is_soiled() {
                parts.push("soiled");
            }
            if diaper.diaper_type_dry.unwrap_or(false) {
                parts.push("dry");
            }
            if diaper.diaper_type_rash.unwrap_or(false) {
                parts.push("rash");
            }
            if parts.is_empty() {
                "diaper change".to_string()
            } else {
                parts.join(", ")
            }
        }
        TrackedEvent::Feed(FeedEvent::Breast(feed)) => format!(
            "breast, L {} / R {}",
            format_duration(feed.breast_left_duration.unwrap_or(0)),
            format_duration(feed.breast_right_duration.unwrap_or(0))
        ),
        TrackedEvent::Feed(FeedEvent::Bottle(feed)) => match feed.bottle_volume {
            Some(volume) => format!(
                "bottle, {} {}",
                volume,
                feed.bottle_volume_unit.as_deref().unwrap_or("")
            )
            .trim_end()
            .to_string(),
            None => "bottle".to_string(),
        },
        TrackedEvent::Sleep(sleep) => match sleep.duration_ms() {
            Some(ms) => format!("nap, {}", format_duration(ms)),
            None => "asleep".to_string(),
        },
        TrackedEvent::Pump(pump) => format!(
            "pump, L {} / R {}",
            format_duration(pump.breast_left_duration.unwrap_or(0)),
            format_duration(pump.breast_right_duration.unwrap_or(0))
        ),
        TrackedEvent::Routine(routine) => {
            if routine.note.is_empty() {
                routine.routine_name.clone()
            } else {
                format!("{}: {}", routine.routine_name, routine.note)
            }
        }
    }
}

/// First 8 characters of an event id
fn short_id(id: &str) -> &str {
    id.char_indices().nth(8).map_or(id, |(end, _)| &id[..end])
}

fn format_time(ms: i64) -> String {
    Local
        .timestamp_millis_opt(ms)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ms.to_string())
}

fn format_clock(ms: i64) -> String {
    Local
        .timestamp_millis_opt(ms)
        .single()
        .map(|dt| dt.format("%H:%M").to_string())
        .unwrap_or_else(|| ms.to_string())
}

/// Render milliseconds as `1h 05m`, `12m` or `40s`
pub fn format_duration(ms: i64) -> String {
    let secs = ms.max(0) / 1000;
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if hours > 0 {
        format!("{}h {:02}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m", minutes)
    } else {
        format!("{}s", seconds)
    }
}
