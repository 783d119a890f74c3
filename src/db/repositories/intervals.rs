use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, types::Value, OptionalExtension, Row};

use crate::db::{
    helpers::{
        format_timestamp, parse_close_reason, parse_datetime, parse_optional_datetime,
        parse_status, to_i64, to_u64,
    },
    Database,
};
use crate::domain::categorize;
use crate::models::{Interval, IntervalStatus};

const INTERVAL_COLUMNS: &str = "id, domain, started_at, ended_at, total_secs, active_secs, status, end_reason, continued_from, url, window_id, tab_id, tags, interruptions";

/// Filter for `query_intervals`. `ended_range` is half-open and only matches
/// intervals that have an end timestamp.
#[derive(Debug, Clone, Default)]
pub struct IntervalQuery {
    pub domain: Option<String>,
    pub ended_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

impl IntervalQuery {
    pub fn ended_between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            domain: None,
            ended_range: Some((start, end)),
        }
    }
}

fn row_to_interval(row: &Row) -> Result<Interval> {
    let started_at: String = row.get("started_at")?;
    let ended_at: Option<String> = row.get("ended_at")?;
    let status: String = row.get("status")?;
    let total_secs: i64 = row.get("total_secs")?;
    let active_secs: i64 = row.get("active_secs")?;
    let tags: String = row.get("tags")?;
    let interruptions: String = row.get("interruptions")?;

    Ok(Interval {
        id: row.get("id")?,
        domain: row.get("domain")?,
        started_at: parse_datetime(&started_at, "started_at")?,
        ended_at: parse_optional_datetime(ended_at, "ended_at")?,
        total_secs: to_u64(total_secs, "total_secs")?,
        active_secs: to_u64(active_secs, "active_secs")?,
        status: parse_status(&status)?,
        interruptions: serde_json::from_str(&interruptions)
            .context("failed to parse interruptions")?,
        end_reason: parse_close_reason(row.get("end_reason")?)?,
        continued_from: row.get("continued_from")?,
        url: row.get("url")?,
        window_id: row.get("window_id")?,
        tab_id: row.get("tab_id")?,
        tags: serde_json::from_str(&tags).context("failed to parse tags")?,
    })
}

fn collect_intervals(rows: &mut rusqlite::Rows<'_>) -> Result<Vec<Interval>> {
    let mut intervals = Vec::new();
    while let Some(row) = rows.next()? {
        intervals.push(row_to_interval(row)?);
    }
    Ok(intervals)
}

fn interval_params(record: &Interval, updated_at: &DateTime<Utc>) -> Result<Vec<Value>> {
    Ok(vec![
        Value::Text(record.id.clone()),
        Value::Text(record.domain.clone()),
        Value::Text(categorize(&record.domain).as_str().to_string()),
        Value::Text(format_timestamp(&record.started_at)),
        record
            .ended_at
            .as_ref()
            .map(|dt| Value::Text(format_timestamp(dt)))
            .unwrap_or(Value::Null),
        Value::Integer(to_i64(record.total_secs)?),
        Value::Integer(to_i64(record.active_secs)?),
        Value::Text(record.status.as_str().to_string()),
        record
            .end_reason
            .map(|reason| Value::Text(reason.as_str().to_string()))
            .unwrap_or(Value::Null),
        record
            .continued_from
            .clone()
            .map(Value::Text)
            .unwrap_or(Value::Null),
        record.url.clone().map(Value::Text).unwrap_or(Value::Null),
        record.window_id.map(Value::Integer).unwrap_or(Value::Null),
        record.tab_id.map(Value::Integer).unwrap_or(Value::Null),
        Value::Text(serde_json::to_string(&record.tags)?),
        Value::Text(serde_json::to_string(&record.interruptions)?),
        Value::Text(format_timestamp(updated_at)),
    ])
}

const INSERT_INTERVAL: &str = "INSERT INTO intervals (id, domain, category, started_at, ended_at, total_secs, active_secs, status, end_reason, continued_from, url, window_id, tab_id, tags, interruptions, updated_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)";

impl Database {
    /// Insert, or update the stored row with the same id. A row that is
    /// already closed is left untouched, so a late heartbeat cannot reopen it.
    pub async fn put_interval(&self, interval: &Interval) -> Result<()> {
        let record = interval.clone();
        self.execute(move |conn| {
            let values = interval_params(&record, &Utc::now())?;
            conn.execute(
                &format!(
                    "{INSERT_INTERVAL}
                     ON CONFLICT(id) DO UPDATE SET
                         ended_at = excluded.ended_at,
                         total_secs = excluded.total_secs,
                         active_secs = excluded.active_secs,
                         status = excluded.status,
                         end_reason = excluded.end_reason,
                         tags = excluded.tags,
                         interruptions = excluded.interruptions,
                         updated_at = excluded.updated_at
                     WHERE intervals.status != 'closed'"
                ),
                params_from_iter(values),
            )
            .with_context(|| format!("failed to write interval {}", record.id))?;
            Ok(())
        })
        .await
    }

    /// Insert unless the id already exists. Returns whether a row was written.
    pub async fn insert_interval_if_absent(&self, interval: &Interval) -> Result<bool> {
        let record = interval.clone();
        self.execute(move |conn| {
            let values = interval_params(&record, &Utc::now())?;
            let changed = conn
                .execute(
                    &format!("{INSERT_INTERVAL} ON CONFLICT(id) DO NOTHING"),
                    params_from_iter(values),
                )
                .with_context(|| format!("failed to import interval {}", record.id))?;
            Ok(changed == 1)
        })
        .await
    }

    pub async fn get_interval(&self, interval_id: &str) -> Result<Option<Interval>> {
        let interval_id = interval_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {INTERVAL_COLUMNS} FROM intervals WHERE id = ?1"
            ))?;
            let row = stmt
                .query_row(params![interval_id], |row| Ok(row_to_interval(row)))
                .optional()?;
            row.transpose()
        })
        .await
    }

    pub async fn query_intervals(&self, query: IntervalQuery) -> Result<Vec<Interval>> {
        self.execute(move |conn| {
            let mut clauses = Vec::new();
            let mut values: Vec<Value> = Vec::new();

            if let Some(domain) = query.domain {
                values.push(Value::Text(domain));
                clauses.push(format!("domain = ?{}", values.len()));
            }
            if let Some((start, end)) = query.ended_range {
                values.push(Value::Text(format_timestamp(&start)));
                clauses.push(format!("ended_at >= ?{}", values.len()));
                values.push(Value::Text(format_timestamp(&end)));
                clauses.push(format!("ended_at < ?{}", values.len()));
            }

            let where_clause = if clauses.is_empty() {
                String::new()
            } else {
                format!("WHERE {}", clauses.join(" AND "))
            };

            let mut stmt = conn.prepare(&format!(
                "SELECT {INTERVAL_COLUMNS} FROM intervals {where_clause} ORDER BY started_at ASC"
            ))?;
            let mut rows = stmt.query(params_from_iter(values))?;
            collect_intervals(&mut rows)
        })
        .await
    }

    pub async fn count_intervals(&self) -> Result<usize> {
        self.execute(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM intervals", [], |row| row.get(0))?;
            Ok(usize::try_from(count).unwrap_or(0))
        })
        .await
    }

    /// Stable slice of every stored interval, oldest first.
    pub async fn intervals_page(&self, offset: usize, limit: usize) -> Result<Vec<Interval>> {
        let offset = to_i64(offset as u64)?;
        let limit = to_i64(limit as u64)?;
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {INTERVAL_COLUMNS} FROM intervals
                 ORDER BY started_at ASC, id ASC
                 LIMIT ?1 OFFSET ?2"
            ))?;
            let mut rows = stmt.query(params![limit, offset])?;
            collect_intervals(&mut rows)
        })
        .await
    }

    /// Intervals a previous process left open, newest first.
    pub async fn get_open_intervals(&self) -> Result<Vec<Interval>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {INTERVAL_COLUMNS} FROM intervals
                 WHERE status != ?1
                 ORDER BY started_at DESC"
            ))?;
            let mut rows = stmt.query(params![IntervalStatus::Closed.as_str()])?;
            collect_intervals(&mut rows)
        })
        .await
    }

    /// Last time an open interval was written, used as its recovered end.
    pub async fn get_interval_updated_at(&self, interval_id: &str) -> Result<Option<DateTime<Utc>>> {
        let interval_id = interval_id.to_string();
        self.execute(move |conn| {
            let updated_at: Option<String> = conn
                .query_row(
                    "SELECT updated_at FROM intervals WHERE id = ?1",
                    params![interval_id],
                    |row| row.get(0),
                )
                .optional()?;
            updated_at
                .map(|raw| parse_datetime(&raw, "updated_at"))
                .transpose()
        })
        .await
    }

    /// Drop closed intervals that started before `cutoff`. Returns the row count.
    pub async fn delete_intervals_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.execute(move |conn| {
            let deleted = conn
                .execute(
                    "DELETE FROM intervals WHERE started_at < ?1 AND status = ?2",
                    params![format_timestamp(&cutoff), IntervalStatus::Closed.as_str()],
                )
                .context("failed to purge intervals")?;
            Ok(deleted)
        })
        .await
    }
}
