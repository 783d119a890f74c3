use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::domain::Category;

use super::{format_duration, trend, variance, Aggregate, Trend};

const HOUR_MS: u64 = 3_600_000;
const MINUTE_MS: u64 = 60_000;

const SOCIAL_INSIGHT_MS: u64 = HOUR_MS;
const SOCIAL_REDUCE_MS: u64 = 2 * HOUR_MS;
const EDUCATION_MIN_MS: u64 = 30 * MINUTE_MS;
const BALANCED_TOTAL_MS: u64 = 4 * HOUR_MS;
const CONSISTENCY_VARIANCE: f64 = 7_200_000.0;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationKind {
    Reduce,
    Increase,
    Maintain,
    Consistency,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Recommendation {
    #[serde(rename = "type")]
    pub kind: RecommendationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    pub message: String,
    pub action: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyDigest {
    pub date: NaiveDate,
    pub total_time: u64,
    pub categories: BTreeMap<Category, u64>,
    pub domains: BTreeMap<String, u64>,
    /// Consecutive days, ending today or yesterday, with enough active time.
    pub streak_days: u32,
    pub insights: Vec<String>,
    pub recommendations: Vec<Recommendation>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyDigest {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub total_time: u64,
    pub categories: BTreeMap<Category, u64>,
    pub domains: BTreeMap<String, u64>,
    pub daily_breakdown: BTreeMap<NaiveDate, Aggregate>,
    pub trends: BTreeMap<Category, Trend>,
    pub streak_days: u32,
    pub insights: Vec<String>,
    pub recommendations: Vec<Recommendation>,
    pub generated_at: DateTime<Utc>,
}

pub fn daily_digest(
    date: NaiveDate,
    totals: &Aggregate,
    streak_days: u32,
    generated_at: DateTime<Utc>,
) -> DailyDigest {
    let mut insights = daily_insights(totals);
    insights.extend(streak_insight(streak_days));
    DailyDigest {
        date,
        total_time: totals.total,
        categories: totals.by_category.clone(),
        domains: totals.by_domain.clone(),
        streak_days,
        insights,
        recommendations: daily_recommendations(totals),
        generated_at,
    }
}

/// `breakdown` holds one entry per local day in the week that saw activity.
pub fn weekly_digest(
    start_date: NaiveDate,
    end_date: NaiveDate,
    totals: &Aggregate,
    breakdown: BTreeMap<NaiveDate, Aggregate>,
    streak_days: u32,
    generated_at: DateTime<Utc>,
) -> WeeklyDigest {
    let trends = category_trends(&breakdown);
    let mut insights = weekly_insights(totals, &breakdown);
    insights.extend(streak_insight(streak_days));
    let recommendations = weekly_recommendations(&breakdown);
    WeeklyDigest {
        start_date,
        end_date,
        total_time: totals.total,
        categories: totals.by_category.clone(),
        domains: totals.by_domain.clone(),
        daily_breakdown: breakdown,
        trends,
        streak_days,
        insights,
        recommendations,
        generated_at,
    }
}

fn streak_insight(streak_days: u32) -> Option<String> {
    (streak_days > 1).then(|| format!("You've been active {streak_days} days in a row"))
}

/// Largest entry; ties go to the smallest key.
fn top_entry<K: Ord>(map: &BTreeMap<K, u64>) -> Option<(&K, u64)> {
    map.iter()
        .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(key, &value)| (key, value))
}

fn daily_insights(totals: &Aggregate) -> Vec<String> {
    let mut insights = Vec::new();

    if let Some((category, ms)) = top_entry(&totals.by_category) {
        insights.push(format!(
            "You spent the most time on {} content ({})",
            category.as_str(),
            format_duration(ms)
        ));
    }
    if let Some((domain, ms)) = top_entry(&totals.by_domain) {
        insights.push(format!(
            "{domain} was your most visited site ({})",
            format_duration(ms)
        ));
    }

    let social = totals.category_ms(Category::Social);
    if social > SOCIAL_INSIGHT_MS {
        insights.push(format!("You spent {} on social media today", format_duration(social)));
    }
    insights
}

fn daily_recommendations(totals: &Aggregate) -> Vec<Recommendation> {
    let mut recommendations = Vec::new();

    if totals.category_ms(Category::Social) > SOCIAL_REDUCE_MS {
        recommendations.push(Recommendation {
            kind: RecommendationKind::Reduce,
            category: Some(Category::Social),
            message: "Consider reducing social media time tomorrow".into(),
            action: "Set a 1-hour daily limit for social media".into(),
        });
    }
    if totals.category_ms(Category::Education) < EDUCATION_MIN_MS {
        recommendations.push(Recommendation {
            kind: RecommendationKind::Increase,
            category: Some(Category::Education),
            message: "Try to include more educational content".into(),
            action: "Spend 30 minutes on learning platforms".into(),
        });
    }
    if totals.total < BALANCED_TOTAL_MS {
        recommendations.push(Recommendation {
            kind: RecommendationKind::Maintain,
            category: None,
            message: "Great job maintaining balanced screen time!".into(),
            action: "Keep up the conscious media consumption".into(),
        });
    }
    recommendations
}

fn weekly_insights(totals: &Aggregate, breakdown: &BTreeMap<NaiveDate, Aggregate>) -> Vec<String> {
    let mut insights = vec![format!(
        "Your average daily screen time was {}",
        format_duration(totals.total / 7)
    )];

    let busiest = breakdown
        .iter()
        .max_by(|a, b| a.1.total.cmp(&b.1.total).then_with(|| b.0.cmp(a.0)));
    if let Some((date, day)) = busiest {
        insights.push(format!(
            "{} was your most active day ({})",
            date.format("%A"),
            format_duration(day.total)
        ));
    }
    insights
}

fn weekly_recommendations(breakdown: &BTreeMap<NaiveDate, Aggregate>) -> Vec<Recommendation> {
    let totals: Vec<u64> = breakdown.values().map(|day| day.total).collect();
    if variance(&totals) > CONSISTENCY_VARIANCE {
        vec![Recommendation {
            kind: RecommendationKind::Consistency,
            category: None,
            message: "Try to maintain more consistent daily usage".into(),
            action: "Set daily time limits to create better habits".into(),
        }]
    } else {
        Vec::new()
    }
}

fn category_trends(breakdown: &BTreeMap<NaiveDate, Aggregate>) -> BTreeMap<Category, Trend> {
    let categories: BTreeSet<Category> = breakdown
        .values()
        .flat_map(|day| day.by_category.keys().copied())
        .collect();

    categories
        .into_iter()
        .map(|category| {
            let series: Vec<u64> = breakdown.values().map(|day| day.category_ms(category)).collect();
            (category, trend(&series))
        })
        .collect()
}
