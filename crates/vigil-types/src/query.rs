use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::entry::{AuditAction, AuditEntry, AuditResource};
use crate::error::TypeError;

/// Inclusive window over entry timestamps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Build a range, rejecting `start > end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, TypeError> {
        if start > end {
            return Err(TypeError::InvalidRange {
                start: start.to_rfc3339(),
                end: end.to_rfc3339(),
            });
        }
        Ok(Self { start, end })
    }

    /// From the Unix epoch to the end of year 9999.
    pub fn unbounded() -> Self {
        Self {
            start: DateTime::<Utc>::default(),
            end: far_future(),
        }
    }

    /// The trailing `days` up to now.
    pub fn last_days(days: i64) -> Self {
        let end = Utc::now();
        Self {
            start: end - Duration::days(days),
            end,
        }
    }

    /// Fill missing bounds from [`TimeRange::unbounded`].
    pub fn from_bounds(
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Self, TypeError> {
        let open = Self::unbounded();
        Self::new(start.unwrap_or(open.start), end.unwrap_or(open.end))
    }

    pub fn contains(&self, ts: &DateTime<Utc>) -> bool {
        *ts >= self.start && *ts <= self.end
    }
}

fn far_future() -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(9999, 12, 31)
        .and_then(|d| d.and_hms_opt(23, 59, 59))
        .map(|naive| naive.and_utc())
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Conjunctive filter for ledger reads. `None` fields match everything.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryFilter {
    #[serde(default)]
    pub actor_id: Option<String>,
    #[serde(default)]
    pub patient_id: Option<String>,
    #[serde(default)]
    pub resource: Option<AuditResource>,
    #[serde(default)]
    pub action: Option<AuditAction>,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub range: Option<TimeRange>,
}

impl EntryFilter {
    /// Every entry naming the given patient.
    pub fn for_patient(patient_id: impl Into<String>) -> Self {
        Self {
            patient_id: Some(patient_id.into()),
            ..Self::default()
        }
    }

    /// Every entry stamped inside the range.
    pub fn within(range: TimeRange) -> Self {
        Self {
            range: Some(range),
            ..Self::default()
        }
    }

    pub fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(ref actor) = self.actor_id {
            if entry.actor_id != *actor {
                return false;
            }
        }
        if let Some(ref patient) = self.patient_id {
            if entry.patient_id.as_deref() != Some(patient.as_str()) {
                return false;
            }
        }
        if let Some(resource) = self.resource {
            if entry.resource != resource {
                return false;
            }
        }
        if let Some(action) = self.action {
            if entry.action != action {
                return false;
            }
        }
        if let Some(success) = self.success {
            if entry.success != success {
                return false;
            }
        }
        if let Some(ref range) = self.range {
            if !range.contains(&entry.timestamp) {
                return false;
            }
        }
        true
    }
}

/// Offset page over newest-first results.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub offset: usize,
    pub limit: usize,
}

impl PageRequest {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }

    pub fn first(limit: usize) -> Self {
        Self { offset: 0, limit }
    }

    /// The page following this one.
    pub fn next(&self) -> Self {
        Self {
            offset: self.offset + self.limit,
            limit: self.limit,
        }
    }
}

/// Aggregate statistics over a window.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditStats {
    pub total_entries: u64,
    pub by_action: BTreeMap<AuditAction, u64>,
    pub by_resource: BTreeMap<AuditResource, u64>,
    pub failed_count: u64,
    pub unique_actors: u64,
    pub range: TimeRange,
}

impl AuditStats {
    /// Statistics over a stream of entries held in memory at once.
    pub fn collect<'a>(range: TimeRange, entries: impl IntoIterator<Item = &'a AuditEntry>) -> Self {
        let mut acc = StatsAccumulator::new(range);
        acc.accumulate(entries);
        acc.finish()
    }
}

/// Folds entries into [`AuditStats`] one page at a time.
///
/// Only the distinct actor ids are retained between pages.
#[derive(Clone, Debug)]
pub struct StatsAccumulator {
    stats: AuditStats,
    actors: BTreeSet<String>,
}

impl StatsAccumulator {
    pub fn new(range: TimeRange) -> Self {
        Self {
            stats: AuditStats {
                total_entries: 0,
                by_action: BTreeMap::new(),
                by_resource: BTreeMap::new(),
                failed_count: 0,
                unique_actors: 0,
                range,
            },
            actors: BTreeSet::new(),
        }
    }

    pub fn accumulate<'a>(&mut self, entries: impl IntoIterator<Item = &'a AuditEntry>) {
        for entry in entries {
            self.stats.total_entries += 1;
            *self.stats.by_action.entry(entry.action).or_insert(0) += 1;
            *self.stats.by_resource.entry(entry.resource).or_insert(0) += 1;
            if !entry.success {
                self.stats.failed_count += 1;
            }
            if !self.actors.contains(&entry.actor_id) {
                self.actors.insert(entry.actor_id.clone());
            }
        }
    }

    pub fn finish(mut self) -> AuditStats {
        self.stats.unique_actors = self.actors.len() as u64;
        self.stats
    }
}
