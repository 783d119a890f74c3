//! Interval data models.
//!
//! An `Interval` is one contiguous stretch of attention on a single domain.
//! It is mutated in memory while open and persisted as an immutable record
//! once closed.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current wall-clock time truncated to the millisecond precision the store keeps.
pub fn timestamp_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum IntervalStatus {
    Active,
    Idle,
    Paused,
    Closed,
}

impl Default for IntervalStatus {
    fn default() -> Self {
        IntervalStatus::Active
    }
}

impl IntervalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntervalStatus::Active => "active",
            IntervalStatus::Idle => "idle",
            IntervalStatus::Paused => "paused",
            IntervalStatus::Closed => "closed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(IntervalStatus::Active),
            "idle" => Some(IntervalStatus::Idle),
            "paused" => Some(IntervalStatus::Paused),
            "closed" => Some(IntervalStatus::Closed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InterruptionKind {
    Idle,
    Sleep,
    Terminated,
}

/// Why an interval was closed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CloseReason {
    Switch,
    Sleep,
    Idle,
    Midnight,
    Manual,
    Crash,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Switch => "switch",
            CloseReason::Sleep => "sleep",
            CloseReason::Idle => "idle",
            CloseReason::Midnight => "midnight",
            CloseReason::Manual => "manual",
            CloseReason::Crash => "crash",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "switch" => Some(CloseReason::Switch),
            "sleep" => Some(CloseReason::Sleep),
            "idle" => Some(CloseReason::Idle),
            "midnight" => Some(CloseReason::Midnight),
            "manual" => Some(CloseReason::Manual),
            "crash" => Some(CloseReason::Crash),
            _ => None,
        }
    }

    /// Interruption kind stamped on the closing record. Reasons without a
    /// natural mapping are recorded as `Terminated`.
    pub fn interruption_kind(&self) -> InterruptionKind {
        match self {
            CloseReason::Idle => InterruptionKind::Idle,
            CloseReason::Sleep => InterruptionKind::Sleep,
            _ => InterruptionKind::Terminated,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Interruption {
    pub kind: InterruptionKind,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Optional browser context captured when an interval opens.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TabContext {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub window_id: Option<i64>,
    #[serde(default)]
    pub tab_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Interval {
    pub id: String,
    pub domain: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_secs: u64,
    #[serde(default)]
    pub active_secs: u64,
    #[serde(default)]
    pub status: IntervalStatus,
    #[serde(default)]
    pub interruptions: Vec<Interruption>,
    #[serde(default)]
    pub end_reason: Option<CloseReason>,
    /// Id of the interval this one continues after a merge-grace reopen.
    #[serde(default)]
    pub continued_from: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub window_id: Option<i64>,
    #[serde(default)]
    pub tab_id: Option<i64>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Interval {
    pub fn open(domain: &str, started_at: DateTime<Utc>, context: &TabContext) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            domain: domain.to_string(),
            started_at,
            ended_at: None,
            total_secs: 0,
            active_secs: 0,
            status: IntervalStatus::Active,
            interruptions: Vec::new(),
            end_reason: None,
            continued_from: None,
            url: context.url.clone(),
            window_id: context.window_id,
            tab_id: context.tab_id,
            tags: Vec::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.status != IntervalStatus::Closed
    }

    /// Wall-clock presence in milliseconds; zero while open.
    pub fn wall_clock_ms(&self) -> u64 {
        match self.ended_at {
            Some(end) => (end - self.started_at).num_milliseconds().max(0) as u64,
            None => 0,
        }
    }

    /// Where the next interruption may start without overlapping earlier ones.
    pub fn interruption_floor(&self) -> DateTime<Utc> {
        self.interruptions
            .last()
            .map(|last| last.end)
            .unwrap_or(self.started_at)
    }

    /// Stamp the end time and the closing interruption. Elapsed counters are
    /// left exactly as accrued.
    pub fn close(&mut self, reason: CloseReason, ended_at: DateTime<Utc>) {
        let ended_at = ended_at.max(self.started_at);
        let floor = self.interruption_floor().min(ended_at);
        self.interruptions.push(Interruption {
            kind: reason.interruption_kind(),
            start: floor,
            end: ended_at,
        });
        self.ended_at = Some(ended_at);
        self.status = IntervalStatus::Closed;
        self.end_reason = Some(reason);
    }
}
