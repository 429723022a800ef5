//! Core domain model for the live match notifier.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::de;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const CRATE_NAME: &str = "lmn-core";

/// Upstream lifecycle states for a fixture, in the feed's wire spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchStatus {
    Scheduled,
    Timed,
    InPlay,
    Paused,
    Suspended,
    Finished,
    Postponed,
    #[serde(alias = "CANCELLED")]
    Canceled,
    Awarded,
}

impl MatchStatus {
    /// Stable lower-cased key used by the ledger's terminal event family.
    pub fn ledger_key(self) -> &'static str {
        match self {
            MatchStatus::Scheduled => "scheduled",
            MatchStatus::Timed => "timed",
            MatchStatus::InPlay => "in_play",
            MatchStatus::Paused => "paused",
            MatchStatus::Suspended => "suspended",
            MatchStatus::Finished => "finished",
            MatchStatus::Postponed => "postponed",
            MatchStatus::Canceled => "canceled",
            MatchStatus::Awarded => "awarded",
        }
    }

    fn from_ledger_key(key: &str) -> Option<Self> {
        match key {
            "scheduled" => Some(MatchStatus::Scheduled),
            "timed" => Some(MatchStatus::Timed),
            "in_play" => Some(MatchStatus::InPlay),
            "paused" => Some(MatchStatus::Paused),
            "suspended" => Some(MatchStatus::Suspended),
            "finished" => Some(MatchStatus::Finished),
            "postponed" => Some(MatchStatus::Postponed),
            "canceled" => Some(MatchStatus::Canceled),
            "awarded" => Some(MatchStatus::Awarded),
            _ => None,
        }
    }
}

/// Which phase of play the current score belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScoreDuration {
    #[default]
    Regular,
    ExtraTime,
    PenaltyShootout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScorePair {
    pub home: u32,
    pub away: u32,
}

/// Score block of a snapshot. `penalties` is present only once a shootout
/// has begun; a pair of zeros counts as present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Score {
    pub duration: ScoreDuration,
    pub full_time: ScorePair,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub penalties: Option<ScorePair>,
}

/// One tracked fixture as returned by a single poll. Never mutated; a new
/// poll produces an entirely new snapshot list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchSnapshot {
    pub id: u64,
    pub status: MatchStatus,
    pub stage: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matchday: Option<u32>,
    pub home_team: String,
    pub away_team: String,
    pub score: Score,
}

/// Notable transitions the notifier reports. Every kind maps to a stable
/// ledger key, and a key is scheduled at most once per match id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventKind {
    Kickoff,
    EndOfFirst,
    StartOfSecond,
    StartOfEt1,
    EndOfEt1,
    StartOfEt2,
    EndOfEt2,
    StartOfPk,
    Ended(MatchStatus),
}

impl EventKind {
    pub fn ledger_key(self) -> &'static str {
        match self {
            EventKind::Kickoff => "kickoff",
            EventKind::EndOfFirst => "end_of_first",
            EventKind::StartOfSecond => "start_of_second",
            EventKind::StartOfEt1 => "start_of_et1",
            EventKind::EndOfEt1 => "end_of_et1",
            EventKind::StartOfEt2 => "start_of_et2",
            EventKind::EndOfEt2 => "end_of_et2",
            EventKind::StartOfPk => "start_of_pk",
            EventKind::Ended(status) => status.ledger_key(),
        }
    }

    fn from_ledger_key(key: &str) -> Option<Self> {
        match key {
            "kickoff" => Some(EventKind::Kickoff),
            "end_of_first" => Some(EventKind::EndOfFirst),
            "start_of_second" => Some(EventKind::StartOfSecond),
            "start_of_et1" => Some(EventKind::StartOfEt1),
            "end_of_et1" => Some(EventKind::EndOfEt1),
            "start_of_et2" => Some(EventKind::StartOfEt2),
            "end_of_et2" => Some(EventKind::EndOfEt2),
            "start_of_pk" => Some(EventKind::StartOfPk),
            other => MatchStatus::from_ledger_key(other).map(EventKind::Ended),
        }
    }
}

/// Per-match record of the event kinds already scheduled. Flags are never
/// cleared once set. On disk the ledger keeps its historical shape, a map of
/// ledger key to `true`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventLedger(BTreeSet<EventKind>);

impl EventLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, kind: EventKind) -> bool {
        self.0.contains(&kind)
    }

    /// Records the kind; returns whether it was newly set.
    pub fn record(&mut self, kind: EventKind) -> bool {
        self.0.insert(kind)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for EventLedger {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for kind in &self.0 {
            map.serialize_entry(kind.ledger_key(), &true)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for EventLedger {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let entries = BTreeMap::<String, bool>::deserialize(deserializer)?;
        let mut ledger = EventLedger::new();
        for (key, set) in entries {
            let kind = EventKind::from_ledger_key(&key)
                .ok_or_else(|| de::Error::custom(format!("unknown ledger key `{key}`")))?;
            if set {
                ledger.record(kind);
            }
        }
        Ok(ledger)
    }
}

/// A delayed notification awaiting dispatch. `posted` only exists in memory
/// to filter the queue after a flush.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationJob {
    pub post_on_or_after: DateTime<Utc>,
    pub title: String,
    pub subtitle: String,
    #[serde(skip)]
    pub posted: bool,
}

/// Everything the notifier persists between runs: the last-seen snapshot
/// list, the per-match notification ledger, and the pending job queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDoc {
    #[serde(default)]
    pub latest: Vec<MatchSnapshot>,
    #[serde(default)]
    pub scheduled: BTreeMap<u64, EventLedger>,
    #[serde(default)]
    pub queue: Vec<NotificationJob>,
}
