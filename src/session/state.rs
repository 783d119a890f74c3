//! Tracking state machine.
//!
//! Owns the single open interval and moves it through active, idle and
//! paused states. Every method is a complete check-and-transition with no
//! I/O; closed records are handed back in a [`Transition`] for the caller to
//! persist after releasing its lock.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{extract_domain, is_whitelisted};
use crate::models::{CloseReason, Interruption, InterruptionKind, Interval, IntervalStatus, TabContext};
use crate::settings::TrackerSettings;

pub const TICK_QUANTUM_MS: i64 = 1_000;
/// Activity signals closer together than this are dropped.
pub const ACTIVITY_SIGNAL_MIN_GAP_MS: i64 = 1_000;

/// Outcome of one transition: records that were closed (in close order) and
/// the interval opened by it, if any.
#[derive(Debug, Clone, Default)]
pub struct Transition {
    pub closed: Vec<Interval>,
    pub opened: Option<Interval>,
}

impl Transition {
    pub fn is_empty(&self) -> bool {
        self.closed.is_empty() && self.opened.is_none()
    }

    fn absorb(&mut self, other: Transition) {
        self.closed.extend(other.closed);
        if other.opened.is_some() {
            self.opened = other.opened;
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlatformIdleState {
    Active,
    Idle,
    Locked,
}

#[derive(Debug, Clone)]
struct LastClosed {
    id: String,
    domain: String,
    ended_at: DateTime<Utc>,
    chain_total_secs: u64,
    chain_active_secs: u64,
    mergeable: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session: Option<Interval>,
    pub is_idle: bool,
    pub paused: bool,
    pub idle_counter_secs: u64,
    /// Totals across merge-grace continuations, current interval included.
    pub chain_total_secs: u64,
    pub chain_active_secs: u64,
    pub focused_domain: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SessionState {
    current: Option<Interval>,
    idle_counter_secs: u64,
    idle_since: Option<DateTime<Utc>>,
    paused: bool,
    paused_since: Option<DateTime<Utc>>,
    last_tick_at: Option<DateTime<Utc>>,
    pending_ms: i64,
    last_activity_signal_at: Option<DateTime<Utc>>,
    last_closed: Option<LastClosed>,
    focused: Option<(String, TabContext)>,
    chain_total_secs: u64,
    chain_active_secs: u64,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&Interval> {
        self.current.as_ref()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let (current_total, current_active) = self
            .current
            .as_ref()
            .map(|interval| (interval.total_secs, interval.active_secs))
            .unwrap_or((0, 0));
        SessionSnapshot {
            session: self.current.clone(),
            is_idle: self
                .current
                .as_ref()
                .map(|interval| interval.status == IntervalStatus::Idle)
                .unwrap_or(false),
            paused: self.paused,
            idle_counter_secs: self.idle_counter_secs,
            chain_total_secs: self.chain_total_secs + current_total,
            chain_active_secs: self.chain_active_secs + current_active,
            focused_domain: self.focused.as_ref().map(|(domain, _)| domain.clone()),
        }
    }

    /// Copy of the open interval with `now` as its end, for live totals.
    /// The live interval is untouched.
    pub fn provisional_record(&self, now: DateTime<Utc>) -> Option<Interval> {
        self.current.as_ref().map(|interval| {
            let mut record = interval.clone();
            record.ended_at = Some(now.max(record.started_at));
            record
        })
    }

    /// Tab activated or its URL changed.
    pub fn tab_activated(
        &mut self,
        url: &str,
        context: TabContext,
        settings: &TrackerSettings,
        now: DateTime<Utc>,
    ) -> Transition {
        let mut transition = self.advance(settings, now);
        let domain = extract_domain(url);

        if !is_whitelisted(&domain, &settings.whitelist) {
            self.focused = None;
            transition.absorb(self.close_current(CloseReason::Switch, now));
            return transition;
        }

        self.focused = Some((domain.clone(), context.clone()));

        if let Some(current) = &self.current {
            if current.domain == domain {
                return transition;
            }
            transition.absorb(self.close_current(CloseReason::Switch, now));
        }

        if !self.paused {
            transition.absorb(self.open(&domain, &context, settings, now));
        }
        transition
    }

    /// Browser window lost focus.
    pub fn window_blurred(&mut self, settings: &TrackerSettings, now: DateTime<Utc>) -> Transition {
        let mut transition = self.advance(settings, now);
        self.focused = None;
        transition.absorb(self.close_current(CloseReason::Sleep, now));
        transition
    }

    /// A tab closed. Only the tracked tab, or a whole window, ends tracking.
    pub fn tab_closed(
        &mut self,
        tab_id: Option<i64>,
        window_closing: bool,
        settings: &TrackerSettings,
        now: DateTime<Utc>,
    ) -> Transition {
        let tracked_tab = self
            .current
            .as_ref()
            .map(|interval| tab_id.is_none() || interval.tab_id.is_none() || interval.tab_id == tab_id)
            .unwrap_or(false);
        if !window_closing && !tracked_tab {
            return Transition::default();
        }

        let mut transition = self.advance(settings, now);
        self.focused = None;
        let reason = if window_closing {
            CloseReason::Sleep
        } else {
            CloseReason::Switch
        };
        transition.absorb(self.close_current(reason, now));
        transition
    }

    pub fn platform_idle_changed(
        &mut self,
        state: PlatformIdleState,
        settings: &TrackerSettings,
        now: DateTime<Utc>,
    ) -> Transition {
        let mut transition = self.advance(settings, now);
        match state {
            PlatformIdleState::Idle | PlatformIdleState::Locked => {
                transition.absorb(self.close_current(CloseReason::Idle, now));
            }
            PlatformIdleState::Active => {
                transition.absorb(self.mark_active(settings, now));
            }
        }
        transition
    }

    /// User input observed. Returns `None` when the signal was rate-limited.
    pub fn activity_signal(
        &mut self,
        settings: &TrackerSettings,
        now: DateTime<Utc>,
    ) -> Option<Transition> {
        if let Some(last) = self.last_activity_signal_at {
            let gap = (now - last).num_milliseconds();
            if (0..ACTIVITY_SIGNAL_MIN_GAP_MS).contains(&gap) {
                return None;
            }
        }
        self.last_activity_signal_at = Some(now);

        let mut transition = self.advance(settings, now);
        transition.absorb(self.mark_active(settings, now));
        Some(transition)
    }

    /// Periodic tick. Elapsed time is taken from the wall clock so a late or
    /// skipped tick is caught up in whole quanta.
    pub fn tick(&mut self, settings: &TrackerSettings, now: DateTime<Utc>) -> Transition {
        self.advance(settings, now)
    }

    /// Returns `false` when already paused.
    pub fn pause(&mut self, settings: &TrackerSettings, now: DateTime<Utc>) -> (bool, Transition) {
        if self.paused {
            return (false, Transition::default());
        }
        let transition = self.advance(settings, now);
        self.paused = true;
        self.paused_since = Some(now);

        if let Some(current) = self.current.as_mut() {
            if let Some(idle_start) = self.idle_since.take() {
                let start = idle_start.max(current.interruption_floor());
                if now > start {
                    current.interruptions.push(Interruption {
                        kind: InterruptionKind::Idle,
                        start,
                        end: now,
                    });
                }
            }
            current.status = IntervalStatus::Paused;
        }
        (true, transition)
    }

    /// Returns `false` when not paused.
    pub fn resume(&mut self, settings: &TrackerSettings, now: DateTime<Utc>) -> (bool, Transition) {
        if !self.paused {
            return (false, Transition::default());
        }
        self.paused = false;
        let paused_since = self.paused_since.take();
        self.idle_counter_secs = 0;
        self.idle_since = None;
        self.last_tick_at = Some(now);
        self.pending_ms = 0;

        let mut transition = Transition::default();
        if let Some(current) = self.current.as_mut() {
            let floor = current.interruption_floor();
            let start = paused_since.unwrap_or(floor).max(floor);
            if now > start {
                current.interruptions.push(Interruption {
                    kind: InterruptionKind::Sleep,
                    start,
                    end: now,
                });
            }
            current.status = IntervalStatus::Active;
        } else {
            transition.absorb(self.reopen_focused(settings, now));
        }
        (true, transition)
    }

    /// Local day rolled over at `day_start`: an interval begun before it is
    /// closed, then a fresh one starts if a tracked domain is still in focus.
    /// One begun after it (reopened after a suspend) is left alone.
    pub fn day_boundary(
        &mut self,
        settings: &TrackerSettings,
        day_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Transition {
        let mut transition = self.advance(settings, now);
        let begun_earlier = self
            .current
            .as_ref()
            .map(|interval| interval.started_at < day_start)
            .unwrap_or(false);
        if !begun_earlier {
            return transition;
        }
        transition.absorb(self.close_current(CloseReason::Midnight, now));
        transition.absorb(self.reopen_focused(settings, now));
        transition
    }

    /// User-requested stop.
    pub fn end_session(&mut self, settings: &TrackerSettings, now: DateTime<Utc>) -> Transition {
        let mut transition = self.advance(settings, now);
        self.focused = None;
        transition.absorb(self.close_current(CloseReason::Manual, now));
        transition
    }

    /// The user is back: reset the idle counter and end any idle stretch on
    /// the open interval, or reopen the focused domain if nothing is open.
    fn mark_active(&mut self, settings: &TrackerSettings, now: DateTime<Utc>) -> Transition {
        self.idle_counter_secs = 0;
        let Some(current) = self.current.as_mut() else {
            return self.reopen_focused(settings, now);
        };
        if current.status == IntervalStatus::Idle {
            let floor = current.interruption_floor();
            let start = self.idle_since.take().unwrap_or(floor).max(floor);
            if now > start {
                current.interruptions.push(Interruption {
                    kind: InterruptionKind::Idle,
                    start,
                    end: now,
                });
            }
            current.status = IntervalStatus::Active;
        }
        Transition::default()
    }

    fn reopen_focused(&mut self, settings: &TrackerSettings, now: DateTime<Utc>) -> Transition {
        if self.current.is_some() || self.paused {
            return Transition::default();
        }
        match self.focused.clone() {
            Some((domain, context)) if is_whitelisted(&domain, &settings.whitelist) => {
                self.open(&domain, &context, settings, now)
            }
            Some(_) => {
                self.focused = None;
                Transition::default()
            }
            None => Transition::default(),
        }
    }

    fn open(
        &mut self,
        domain: &str,
        context: &TabContext,
        settings: &TrackerSettings,
        now: DateTime<Utc>,
    ) -> Transition {
        let mut interval = Interval::open(domain, now, context);

        let grace = Duration::seconds(settings.merge_grace_secs as i64);
        match &self.last_closed {
            Some(last)
                if last.mergeable
                    && last.domain == domain
                    && now >= last.ended_at
                    && now - last.ended_at < grace =>
            {
                interval.continued_from = Some(last.id.clone());
                self.chain_total_secs = last.chain_total_secs;
                self.chain_active_secs = last.chain_active_secs;
            }
            _ => {
                self.chain_total_secs = 0;
                self.chain_active_secs = 0;
            }
        }

        self.idle_counter_secs = 0;
        self.idle_since = None;
        self.last_tick_at = Some(now);
        self.pending_ms = 0;
        self.current = Some(interval.clone());

        Transition {
            closed: Vec::new(),
            opened: Some(interval),
        }
    }

    fn close_current(&mut self, reason: CloseReason, now: DateTime<Utc>) -> Transition {
        let Some(mut interval) = self.current.take() else {
            return Transition::default();
        };
        interval.close(reason, now);

        self.last_closed = Some(LastClosed {
            id: interval.id.clone(),
            domain: interval.domain.clone(),
            ended_at: interval.ended_at.unwrap_or(now),
            chain_total_secs: self.chain_total_secs + interval.total_secs,
            chain_active_secs: self.chain_active_secs + interval.active_secs,
            mergeable: !matches!(reason, CloseReason::Midnight | CloseReason::Crash),
        });
        self.idle_counter_secs = 0;
        self.idle_since = None;
        self.last_tick_at = None;
        self.pending_ms = 0;
        self.chain_total_secs = 0;
        self.chain_active_secs = 0;

        Transition {
            closed: vec![interval],
            opened: None,
        }
    }

    /// Apply every whole tick quantum that elapsed since the last one.
    fn advance(&mut self, settings: &TrackerSettings, now: DateTime<Utc>) -> Transition {
        if self.current.is_none() || self.paused {
            self.last_tick_at = Some(now);
            self.pending_ms = 0;
            return Transition::default();
        }

        let Some(last_tick) = self.last_tick_at else {
            self.last_tick_at = Some(now);
            return Transition::default();
        };
        let elapsed = (now - last_tick).num_milliseconds();
        if elapsed <= 0 {
            if elapsed < 0 {
                // Clock went backwards; re-anchor without accruing.
                self.last_tick_at = Some(now);
                self.pending_ms = 0;
            }
            return Transition::default();
        }

        self.last_tick_at = Some(now);
        self.pending_ms += elapsed;
        let steps = self.pending_ms / TICK_QUANTUM_MS;
        self.pending_ms %= TICK_QUANTUM_MS;

        let threshold = settings.idle_threshold_secs.max(1);
        let auto_close = settings.idle_auto_close_secs.max(threshold);

        for step in 0..steps {
            let step_end = now
                - Duration::milliseconds(self.pending_ms)
                - Duration::milliseconds((steps - 1 - step) * TICK_QUANTUM_MS);
            let Some(current) = self.current.as_mut() else {
                break;
            };

            current.total_secs += 1;
            self.idle_counter_secs += 1;
            if self.idle_counter_secs < threshold {
                current.active_secs += 1;
                current.status = IntervalStatus::Active;
            } else {
                if current.status != IntervalStatus::Idle {
                    let candidate = step_end - Duration::milliseconds(TICK_QUANTUM_MS);
                    self.idle_since = Some(candidate.max(current.interruption_floor()));
                }
                current.status = IntervalStatus::Idle;
            }

            if self.idle_counter_secs >= auto_close {
                return self.close_current(CloseReason::Idle, step_end);
            }
        }

        Transition::default()
    }
}
