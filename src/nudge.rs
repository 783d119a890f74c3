//! Limit checks and nudge cooldowns.
//!
//! Deciding is pure: [`NudgeEvaluator::evaluate`] turns an aggregate and the
//! configured limits into requests. Delivery goes through a [`Notifier`].

use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use log::info;
use serde::{Deserialize, Serialize};

use crate::aggregate::{format_duration, Aggregate};
use crate::domain::pattern_matches;
use crate::settings::Limits;

const MINUTE_MS: u64 = 60_000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LimitKind {
    Daily,
    Category,
    Domain,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedAction {
    EnableFocusMode,
    BlockSite,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NudgeRequest {
    pub kind: LimitKind,
    /// Category name, domain, or `total` for the daily cap.
    pub target: String,
    pub current_ms: u64,
    pub limit_ms: u64,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub action: Option<SuggestedAction>,
}

/// Delivery side of a nudge.
pub trait Notifier: Send + Sync {
    fn notify(&self, request: &NudgeRequest) -> Result<()>;
}

/// Writes nudges to the log. Used when no extension is connected.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, request: &NudgeRequest) -> Result<()> {
        info!("Nudge [{:?} {}]: {}", request.kind, request.target, request.message);
        Ok(())
    }
}

fn nudge(
    kind: LimitKind,
    target: &str,
    current_ms: u64,
    limit_ms: u64,
) -> NudgeRequest {
    let (message, action) = match kind {
        LimitKind::Daily => (
            format!("You've spent {} browsing today.", format_duration(current_ms)),
            None,
        ),
        LimitKind::Category => (
            format!(
                "You've spent {} on {target} today. Consider taking a break!",
                format_duration(current_ms)
            ),
            Some(SuggestedAction::EnableFocusMode),
        ),
        LimitKind::Domain => (
            format!("You've spent {} on {target} today.", format_duration(current_ms)),
            Some(SuggestedAction::BlockSite),
        ),
    };
    NudgeRequest {
        kind,
        target: target.to_string(),
        current_ms,
        limit_ms,
        title: "Conscious Media".to_string(),
        message,
        action,
    }
}

/// Every limit the aggregate exceeds, one request each. No cooldown applied.
pub fn exceeded_limits(totals: &Aggregate, limits: &Limits) -> Vec<NudgeRequest> {
    let mut requests = Vec::new();

    if let Some(mins) = limits.daily_total_mins {
        let limit_ms = mins * MINUTE_MS;
        if totals.total > limit_ms {
            requests.push(nudge(LimitKind::Daily, "total", totals.total, limit_ms));
        }
    }

    for (category, &mins) in &limits.categories {
        let spent: u64 = totals
            .by_category
            .iter()
            .filter(|(tracked, _)| tracked.as_str() == category.as_str())
            .map(|(_, &ms)| ms)
            .sum();
        let limit_ms = mins * MINUTE_MS;
        if spent > limit_ms {
            requests.push(nudge(LimitKind::Category, category, spent, limit_ms));
        }
    }

    for (domain, &mins) in &limits.domains {
        let spent: u64 = totals
            .by_domain
            .iter()
            .filter(|(tracked, _)| pattern_matches(tracked, domain))
            .map(|(_, &ms)| ms)
            .sum();
        let limit_ms = mins * MINUTE_MS;
        if spent > limit_ms {
            requests.push(nudge(LimitKind::Domain, domain, spent, limit_ms));
        }
    }

    requests
}

/// Remembers when each (kind, target) last fired so repeated evaluation
/// inside the cooldown stays quiet.
#[derive(Debug, Default)]
pub struct NudgeEvaluator {
    last_fired: HashMap<(LimitKind, String), DateTime<Utc>>,
}

impl NudgeEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn evaluate(
        &mut self,
        totals: &Aggregate,
        limits: &Limits,
        cooldown: Duration,
        now: DateTime<Utc>,
    ) -> Vec<NudgeRequest> {
        let mut due = Vec::new();
        for request in exceeded_limits(totals, limits) {
            let key = (request.kind, request.target.clone());
            let cooling = self
                .last_fired
                .get(&key)
                .map(|fired| now >= *fired && now - *fired < cooldown)
                .unwrap_or(false);
            if cooling {
                continue;
            }
            self.last_fired.insert(key, now);
            due.push(request);
        }
        due
    }

    /// Forget cooldowns; used at the day boundary.
    pub fn reset(&mut self) {
        self.last_fired.clear();
    }
}
