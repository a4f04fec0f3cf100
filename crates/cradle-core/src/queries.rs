//! Read operations over the cached event mapping
//!
//! Everything here is a pure function of the mapping and a reference time,
//! so callers decide which clock to use. Results borrow from the mapping and
//! are ordered by event id, the mapping's iteration order.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Offset, TimeZone};
use serde::Serialize;

use crate::models::{EventKind, FeedEvent, TrackedEvent, Trackz};

/// An event together with its id
pub type EventRef<'a> = (&'a str, &'a TrackedEvent);

const ONE_HOUR_MS: i64 = 60 * 60 * 1000;

/// All events of one kind
pub fn events_by_kind(trackz: &Trackz, kind: EventKind) -> Vec<EventRef<'_>> {
    trackz
        .iter()
        .filter(|(_, event)| event.kind() == kind)
        .map(|(id, event)| (id.as_str(), event))
        .collect()
}

/// Events of one kind starting at or after `start_ms`
pub fn events_by_kind_since(trackz: &Trackz, kind: EventKind, start_ms: i64) -> Vec<EventRef<'_>> {
    trackz
        .iter()
        .filter(|(_, event)| event.kind() == kind && event.begin_ms() >= start_ms)
        .map(|(id, event)| (id.as_str(), event))
        .collect()
}

/// Events of one kind since the local midnight of `now`
pub fn todays_events_by_kind<'a, Tz: TimeZone>(
    trackz: &'a Trackz,
    kind: EventKind,
    now: &DateTime<Tz>,
) -> Vec<EventRef<'a>> {
    events_by_kind_since(trackz, kind, start_of_day_ms(now))
}

/// Epoch milliseconds of the midnight starting the day of `now`, in `now`'s zone
///
/// When midnight does not exist (a DST gap), `now`'s offset is applied to it.
pub fn start_of_day_ms<Tz: TimeZone>(now: &DateTime<Tz>) -> i64 {
    let midnight = now.date_naive().and_time(NaiveTime::MIN);
    match now.timezone().from_local_datetime(&midnight).earliest() {
        Some(start) => start.timestamp_millis(),
        None => {
            let offset_ms = i64::from(now.offset().fix().local_minus_utc()) * 1000;
            midnight.and_utc().timestamp_millis() - offset_ms
        }
    }
}

/// Earliest event of one kind
///
/// `None` when no event of that kind exists. On equal start times the
/// first in id order wins.
pub fn first_event_by_kind(trackz: &Trackz, kind: EventKind) -> Option<EventRef<'_>> {
    events_by_kind(trackz, kind)
        .into_iter()
        .reduce(|best, candidate| {
            if candidate.1.begin_ms() < best.1.begin_ms() {
                candidate
            } else {
                best
            }
        })
}

/// Latest event of one kind, with the same tie rule as [`first_event_by_kind`]
pub fn last_event_by_kind(trackz: &Trackz, kind: EventKind) -> Option<EventRef<'_>> {
    events_by_kind(trackz, kind)
        .into_iter()
        .reduce(|best, candidate| {
            if candidate.1.begin_ms() > best.1.begin_ms() {
                candidate
            } else {
                best
            }
        })
}

/// How long ago an event started, bucketed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Freshness {
    /// Within the last hour
    Okay,
    /// Within the last two hours
    Late,
    Overdue,
}

impl std::fmt::Display for Freshness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Freshness::Okay => "okay",
            Freshness::Late => "late",
            Freshness::Overdue => "overdue",
        };
        f.pad(label)
    }
}

pub fn freshness(begin_ms: i64, now_ms: i64) -> Freshness {
    let elapsed = now_ms - begin_ms;
    if elapsed <= ONE_HOUR_MS {
        Freshness::Okay
    } else if elapsed <= 2 * ONE_HOUR_MS {
        Freshness::Late
    } else {
        Freshness::Overdue
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiaperSummary {
    pub total: usize,
    pub wet: usize,
    pub soiled: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeedSummary {
    pub total: usize,
    pub breast: usize,
    pub bottle: usize,
    /// Nursing time on the left side, milliseconds
    pub left_ms: i64,
    pub right_ms: i64,
    /// Sum of `bottleVolume`
    pub bottle_volume: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NapSummary {
    pub total: usize,
    /// Naps that have ended
    pub ended: usize,
    /// Length of the ended naps, milliseconds
    pub asleep_ms: i64,
}

/// Totals for the events since a day start
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DailySummary {
    pub since_ms: i64,
    pub diapers: DiaperSummary,
    pub feeds: FeedSummary,
    pub naps: NapSummary,
    /// Start of the latest event of each kind, over the whole mapping
    pub last: BTreeMap<EventKind, i64>,
}

pub fn daily_summary(trackz: &Trackz, start_ms: i64) -> DailySummary {
    let mut summary = DailySummary {
        since_ms: start_ms,
        ..DailySummary::default()
    };

    for event in trackz.values() {
        let last = summary.last.entry(event.kind()).or_insert(event.begin_ms());
        *last = (*last).max(event.begin_ms());

        if event.begin_ms() < start_ms {
            continue;
        }
        match event {
            TrackedEvent::Diaper(diaper) => {
                summary.diapers.total += 1;
                summary.diapers.wet += usize::from(diaper.is_wet());
                summary.diapers.soiled += usize::from(diaper.is_soiled());
            }
            TrackedEvent::Feed(feed) => {
                summary.feeds.total += 1;
                match feed {
                    FeedEvent::Breast(breast) => {
                        summary.feeds.breast += 1;
                        summary.feeds.left_ms += breast.breast_left_duration.unwrap_or(0);
                        summary.feeds.right_ms += breast.breast_right_duration.unwrap_or(0);
                    }
                    FeedEvent::Bottle(bottle) => {
                        summary.feeds.bottle += 1;
                        summary.feeds.bottle_volume += bottle.bottle_volume.unwrap_or(0.0);
                    }
                }
            }
            TrackedEvent::Sleep(sleep) => {
                summary.naps.total += 1;
                if let Some(duration) = sleep.duration_ms() {
                    summary.naps.ended += 1;
                    summary.naps.asleep_ms += duration;
                }
            }
            TrackedEvent::Pump(_) | TrackedEvent::Routine(_) => {}
        }
    }

    summary
}

/// Diaper, feed and nap counts of one local day
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayCounts {
    pub date: NaiveDate,
    pub diapers: usize,
    pub feeds: usize,
    pub naps: usize,
}

/// Per-day counts for the `days` days ending with the day of `now`, oldest first
pub fn daily_counts<Tz: TimeZone>(trackz: &Trackz, now: &DateTime<Tz>, days: u32) -> Vec<DayCounts> {
    let today = now.date_naive();
    let mut counts: Vec<DayCounts> = (0..days)
        .rev()
        .map(|back| DayCounts {
            date: today - Duration::days(i64::from(back)),
            diapers: 0,
            feeds: 0,
            naps: 0,
        })
        .collect();
    let Some(oldest) = counts.first().map(|day| day.date) else {
        return counts;
    };

    let zone = now.timezone();
    for event in trackz.values() {
        let Some(begin) = DateTime::from_timestamp_millis(event.begin_ms()) else {
            continue;
        };
        let date = begin.with_timezone(&zone).date_naive();
        if date < oldest || date > today {
            continue;
        }
        let index = (date - oldest).num_days() as usize;
        let day = &mut counts[index];
        match event.kind() {
            EventKind::Diaper => day.diapers += 1,
            EventKind::Feed => day.feeds += 1,
            EventKind::Sleep => day.naps += 1,
            EventKind::Pump | EventKind::Routine => {}
        }
    }

    counts
}
