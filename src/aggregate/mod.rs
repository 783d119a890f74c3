//! Totals derived from closed intervals. Never persisted; recomputed per
//! request from the source records.

pub mod digest;

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Local, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{categorize, Category};
use crate::models::Interval;

pub use digest::{daily_digest, weekly_digest, DailyDigest, Recommendation, WeeklyDigest};

/// Half-open `[start, end)` range matched against interval end times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl StatsWindow {
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant < self.end
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StatsPeriod {
    Today,
    Week,
}

impl StatsPeriod {
    /// Local-calendar window ending at the next local midnight. `Week` covers
    /// today and the six days before it.
    pub fn window(&self, now: DateTime<Utc>) -> StatsWindow {
        self.window_in(&Local, now)
    }

    pub fn window_in<Tz: TimeZone>(&self, tz: &Tz, now: DateTime<Utc>) -> StatsWindow {
        let today = now.with_timezone(tz).date_naive();
        let first_day = match self {
            StatsPeriod::Today => today,
            StatsPeriod::Week => today - Duration::days(6),
        };
        StatsWindow {
            start: start_of_day(tz, first_day),
            end: start_of_day(tz, today + Duration::days(1)),
        }
    }
}

/// First instant of `date` in `tz`, in UTC. Falls back to treating the date
/// as UTC when the local midnight does not exist.
pub fn start_of_day<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::MIN);
    tz.from_local_datetime(&midnight)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&midnight))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Aggregate {
    /// Wall-clock milliseconds per domain.
    pub by_domain: BTreeMap<String, u64>,
    pub by_category: BTreeMap<Category, u64>,
    /// Sum of all wall-clock milliseconds.
    pub total: u64,
    pub active_secs: u64,
    pub total_secs: u64,
    pub interval_count: usize,
}

impl Aggregate {
    fn add(&mut self, interval: &Interval) {
        let elapsed = interval.wall_clock_ms();
        *self.by_domain.entry(interval.domain.clone()).or_default() += elapsed;
        *self
            .by_category
            .entry(categorize(&interval.domain))
            .or_default() += elapsed;
        self.total += elapsed;
        self.active_secs += interval.active_secs;
        self.total_secs += interval.total_secs;
        self.interval_count += 1;
    }

    pub fn category_ms(&self, category: Category) -> u64 {
        self.by_category.get(&category).copied().unwrap_or(0)
    }

    pub fn focus_score(&self) -> u32 {
        focus_score(self.active_secs, self.total_secs)
    }
}

/// Sum every interval whose end falls inside `window`. Open intervals are
/// skipped.
pub fn aggregate(intervals: &[Interval], window: &StatsWindow) -> Aggregate {
    let mut result = Aggregate::default();
    for interval in intervals {
        match interval.ended_at {
            Some(ended_at) if window.contains(ended_at) => result.add(interval),
            _ => {}
        }
    }
    result
}

/// Closed intervals grouped by the local date they started on.
pub fn daily_breakdown<Tz: TimeZone>(
    intervals: &[Interval],
    tz: &Tz,
) -> BTreeMap<NaiveDate, Aggregate> {
    let mut days: BTreeMap<NaiveDate, Aggregate> = BTreeMap::new();
    for interval in intervals.iter().filter(|interval| interval.ended_at.is_some()) {
        let date = interval.started_at.with_timezone(tz).date_naive();
        days.entry(date).or_default().add(interval);
    }
    days
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
}

const TREND_CHANGE_PERCENT: f64 = 20.0;

/// Compare the first and last values of a daily series.
pub fn trend(values: &[u64]) -> Trend {
    let (Some(&first), Some(&last)) = (values.first(), values.last()) else {
        return Trend::Stable;
    };
    if values.len() < 2 || first == 0 {
        return Trend::Stable;
    }

    let change = (last as f64 - first as f64) / first as f64 * 100.0;
    if change > TREND_CHANGE_PERCENT {
        Trend::Increasing
    } else if change < -TREND_CHANGE_PERCENT {
        Trend::Decreasing
    } else {
        Trend::Stable
    }
}

/// Population variance; zero for an empty series.
pub fn variance(values: &[u64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let count = values.len() as f64;
    let mean = values.iter().map(|&v| v as f64).sum::<f64>() / count;
    values
        .iter()
        .map(|&v| {
            let diff = v as f64 - mean;
            diff * diff
        })
        .sum::<f64>()
        / count
}

pub fn focus_score(active_secs: u64, total_secs: u64) -> u32 {
    if total_secs == 0 {
        return 0;
    }
    (active_secs as f64 / total_secs as f64 * 100.0).round() as u32
}

/// Consecutive days, counting back from `today`, whose active time meets
/// `min_active_secs`. A today still below the minimum does not break the
/// streak; counting starts from yesterday instead.
pub fn streak(active_by_day: &BTreeMap<NaiveDate, u64>, today: NaiveDate, min_active_secs: u64) -> u32 {
    let meets = |date: &NaiveDate| {
        active_by_day
            .get(date)
            .map(|&secs| secs >= min_active_secs)
            .unwrap_or(false)
    };

    let mut day = if meets(&today) {
        today
    } else {
        today - Duration::days(1)
    };
    let mut count = 0;
    while meets(&day) {
        count += 1;
        day -= Duration::days(1);
    }
    count
}

/// Days with at least this much active time keep a streak going.
pub const STREAK_MIN_ACTIVE_SECS: u64 = 600;

/// `2h 30m`, `2h`, `45m` or `30s`.
pub fn format_duration(ms: u64) -> String {
    let hours = ms / 3_600_000;
    let minutes = (ms % 3_600_000) / 60_000;
    let seconds = (ms % 60_000) / 1_000;

    if hours > 0 {
        if minutes > 0 {
            format!("{hours}h {minutes}m")
        } else {
            format!("{hours}h")
        }
    } else if minutes > 0 {
        format!("{minutes}m")
    } else {
        format!("{seconds}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CloseReason, TabContext};
    use rand::seq::SliceRandom;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 10, hour, minute, 0).unwrap()
    }

    fn closed(domain: &str, start: DateTime<Utc>, minutes: i64, active_secs: u64) -> Interval {
        let mut interval = Interval::open(domain, start, &TabContext::default());
        interval.total_secs = (minutes * 60) as u64;
        interval.active_secs = active_secs;
        interval.close(CloseReason::Switch, start + Duration::minutes(minutes));
        interval
    }

    fn day_window() -> StatsWindow {
        StatsWindow {
            start: at(0, 0),
            end: at(0, 0) + Duration::days(1),
        }
    }

    #[test]
    fn sums_wall_clock_by_domain_and_category() {
        let intervals = vec![
            closed("youtube.com", at(9, 0), 30, 1200),
            closed("reddit.com", at(10, 0), 15, 900),
            closed("youtube.com", at(11, 0), 10, 60),
            closed("unknown.example", at(12, 0), 5, 300),
        ];
        let result = aggregate(&intervals, &day_window());

        assert_eq!(result.by_domain["youtube.com"], 40 * 60_000);
        assert_eq!(result.by_domain["reddit.com"], 15 * 60_000);
        assert_eq!(result.category_ms(Category::Entertainment), 40 * 60_000);
        assert_eq!(result.category_ms(Category::Social), 15 * 60_000);
        assert_eq!(result.category_ms(Category::Other), 5 * 60_000);
        assert_eq!(result.total, 60 * 60_000);
        assert_eq!(result.active_secs, 2460);
        assert_eq!(result.interval_count, 4);
    }

    #[test]
    fn open_and_out_of_window_intervals_are_excluded() {
        let open = Interval::open("youtube.com", at(9, 0), &TabContext::default());
        let yesterday = closed("youtube.com", at(9, 0) - Duration::days(1), 30, 0);
        let ends_at_window_end = closed("reddit.com", at(23, 30), 30, 0);

        let result = aggregate(&[open, yesterday, ends_at_window_end], &day_window());
        assert_eq!(result, Aggregate::default());
    }

    #[test]
    fn aggregation_is_order_independent() {
        let mut intervals: Vec<Interval> = (0..40)
            .map(|i| {
                let domain = ["youtube.com", "reddit.com", "cnn.com", "docs.rs"][i % 4];
                closed(domain, at((i % 20) as u32, (i % 3) as u32 * 10), (i % 7 + 1) as i64, 30)
            })
            .collect();
        let expected = aggregate(&intervals, &day_window());

        let mut rng = rand::thread_rng();
        for _ in 0..10 {
            intervals.shuffle(&mut rng);
            assert_eq!(aggregate(&intervals, &day_window()), expected);
        }
    }

    #[test]
    fn merged_pair_aggregates_like_one_interval() {
        let first = closed("youtube.com", at(9, 0), 10, 600);
        let mut second = closed("youtube.com", at(9, 10), 5, 300);
        second.continued_from = Some(first.id.clone());
        let whole = closed("youtube.com", at(9, 0), 15, 900);

        let pair = aggregate(&[first, second], &day_window());
        let single = aggregate(&[whole], &day_window());
        assert_eq!(pair.by_domain, single.by_domain);
        assert_eq!(pair.by_category, single.by_category);
        assert_eq!(pair.total, single.total);
        assert_eq!(pair.active_secs, single.active_secs);
    }

    #[test]
    fn week_window_spans_seven_local_days() {
        let now = at(15, 0);
        let today = StatsPeriod::Today.window_in(&Utc, now);
        let week = StatsPeriod::Week.window_in(&Utc, now);
        assert_eq!(today.start, at(0, 0));
        assert_eq!(today.end, week.end);
        assert_eq!(week.end - week.start, Duration::days(7));
    }

    #[test]
    fn breakdown_groups_by_start_date() {
        let intervals = vec![
            closed("youtube.com", at(9, 0), 30, 0),
            closed("youtube.com", at(9, 0) + Duration::days(1), 20, 0),
            closed("reddit.com", at(23, 50), 20, 0),
        ];
        let days = daily_breakdown(&intervals, &Utc);
        let first = NaiveDate::from_ymd_opt(2024, 4, 10).unwrap();
        assert_eq!(days.len(), 2);
        assert_eq!(days[&first].total, 50 * 60_000);
    }

    #[test]
    fn trend_uses_twenty_percent_band() {
        assert_eq!(trend(&[100, 50, 121]), Trend::Increasing);
        assert_eq!(trend(&[100, 300, 79]), Trend::Decreasing);
        assert_eq!(trend(&[100, 120]), Trend::Stable);
        assert_eq!(trend(&[0, 500]), Trend::Stable);
        assert_eq!(trend(&[500]), Trend::Stable);
        assert_eq!(trend(&[]), Trend::Stable);
    }

    #[test]
    fn variance_is_population_variance() {
        assert_eq!(variance(&[2, 4, 4, 4, 5, 5, 7, 9]), 4.0);
        assert_eq!(variance(&[]), 0.0);
    }

    #[test]
    fn focus_score_rounds_percentage() {
        assert_eq!(focus_score(0, 0), 0);
        assert_eq!(focus_score(2, 3), 67);
        assert_eq!(focus_score(10, 10), 100);
    }

    #[test]
    fn streak_counts_consecutive_days() {
        let today = NaiveDate::from_ymd_opt(2024, 4, 10).unwrap();
        let days: BTreeMap<NaiveDate, u64> = [
            (today - Duration::days(3), 900),
            (today - Duration::days(2), 50),
            (today - Duration::days(1), 700),
            (today, 600),
        ]
        .into_iter()
        .collect();
        assert_eq!(streak(&days, today, 600), 2);

        let mut in_progress = days.clone();
        in_progress.insert(today, 10);
        assert_eq!(streak(&in_progress, today, 600), 1);
    }

    #[test]
    fn durations_format_like_the_popup() {
        assert_eq!(format_duration(3_661_000), "1h 1m");
        assert_eq!(format_duration(7_200_000), "2h");
        assert_eq!(format_duration(2_700_000), "45m");
        assert_eq!(format_duration(30_000), "30s");
    }
}
