//! Versioned export/import of every stored interval plus settings.
//!
//! A host reply must fit in one native-messaging frame, so exports are paged:
//! each page is a complete bundle holding a slice of the sessions, and the
//! caller keeps asking from `nextOffset` until it is absent. Any page, or the
//! concatenation of all of them, can be imported.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::db::Database;
use crate::models::{timestamp_now, Interval};
use crate::settings::SettingsStore;

pub const EXPORT_SCHEMA_VERSION: u32 = 1;

/// Most records read from the store for one page.
const EXPORT_PAGE_RECORDS: usize = 1_000;
/// Serialized size allowed for one page's sessions. Leaves headroom under the
/// 1 MiB reply limit for settings and the envelope.
const EXPORT_PAGE_BUDGET_BYTES: usize = 768 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExportBundle {
    pub version: u32,
    pub export_date: DateTime<Utc>,
    pub sessions: Vec<Interval>,
    #[serde(default)]
    pub settings: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExportPage {
    pub bundle: ExportBundle,
    pub offset: usize,
    /// Where the next page starts; absent on the last page.
    pub next_offset: Option<usize>,
    pub total: usize,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub imported: usize,
    pub skipped: usize,
    pub settings_applied: usize,
}

/// One page of the export starting at `offset`. At least one record is
/// returned whenever any remain, so paging always makes progress.
pub async fn export_page(db: &Database, settings: &SettingsStore, offset: usize) -> Result<ExportPage> {
    let total = db.count_intervals().await.context("failed to count intervals for export")?;
    let candidates = db
        .intervals_page(offset, EXPORT_PAGE_RECORDS)
        .await
        .context("failed to read intervals for export")?;

    let mut used = 0;
    let mut sessions = Vec::with_capacity(candidates.len());
    for interval in candidates {
        let size = serde_json::to_vec(&interval)?.len() + 1;
        if !sessions.is_empty() && used + size > EXPORT_PAGE_BUDGET_BYTES {
            break;
        }
        used += size;
        sessions.push(interval);
    }

    let end = offset + sessions.len();
    let next_offset = (end < total).then_some(end);
    info!("Exporting intervals {offset}..{end} of {total} ({used} bytes)");

    Ok(ExportPage {
        bundle: ExportBundle {
            version: EXPORT_SCHEMA_VERSION,
            export_date: timestamp_now(),
            sessions,
            settings: settings.current().to_entries()?,
        },
        offset,
        next_offset,
        total,
    })
}

/// Check the version tag before trusting the rest of the shape.
pub fn parse_bundle(raw: Value) -> Result<ExportBundle> {
    let version = raw
        .get("version")
        .and_then(Value::as_u64)
        .ok_or_else(|| anyhow!("bundle has no numeric version"))?;
    if version == 0 || version > u64::from(EXPORT_SCHEMA_VERSION) {
        bail!("unsupported bundle version {version} (supported: {EXPORT_SCHEMA_VERSION})");
    }
    serde_json::from_value(raw).context("bundle does not match the export format")
}

/// Add intervals whose id is not stored yet and settings keys the store does
/// not hold. Nothing already stored is overwritten. Intervals that are still
/// open in the bundle are skipped.
pub async fn import_bundle(
    db: &Database,
    settings: &SettingsStore,
    bundle: &ExportBundle,
) -> Result<ImportReport> {
    let mut report = ImportReport::default();

    for interval in &bundle.sessions {
        if interval.is_open() || interval.ended_at.is_none() {
            warn!("Skipping open interval {} in import", interval.id);
            report.skipped += 1;
            continue;
        }
        if db.insert_interval_if_absent(interval).await? {
            report.imported += 1;
        } else {
            report.skipped += 1;
        }
    }

    report.settings_applied = settings.apply_missing(db, &bundle.settings).await?;
    info!(
        "Import finished: {} imported, {} skipped, {} settings applied",
        report.imported, report.skipped, report.settings_applied
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::temp_database;
    use crate::db::IntervalQuery;
    use crate::models::{CloseReason, TabContext};
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn closed(domain: &str, offset_mins: i64) -> Interval {
        let start = Utc.with_ymd_and_hms(2024, 4, 10, 9, 0, 0).unwrap() + Duration::minutes(offset_mins);
        let mut interval = Interval::open(domain, start, &TabContext::default());
        interval.total_secs = 120;
        interval.active_secs = 90;
        interval.tags = vec!["evening".into()];
        interval.close(CloseReason::Switch, start + Duration::seconds(120));
        interval
    }

    /// Follow `nextOffset` and join the pages into one bundle.
    async fn export_all(db: &Database, settings: &SettingsStore) -> (ExportBundle, usize) {
        let mut page = export_page(db, settings, 0).await.unwrap();
        let mut pages = 1;
        let mut joined = page.bundle.clone();
        while let Some(next) = page.next_offset {
            page = export_page(db, settings, next).await.unwrap();
            joined.sessions.extend(page.bundle.sessions.clone());
            pages += 1;
        }
        (joined, pages)
    }

    #[tokio::test]
    async fn import_of_export_reproduces_records_without_duplicates() {
        let (_src_dir, source) = temp_database();
        let source_settings = SettingsStore::load(&source).await.unwrap();
        let records = vec![closed("youtube.com", 0), closed("reddit.com", 5), closed("cnn.com", 10)];
        for record in &records {
            source.put_interval(record).await.unwrap();
        }

        let (bundle, pages) = export_all(&source, &source_settings).await;
        assert_eq!(pages, 1);
        let text = serde_json::to_string(&bundle).unwrap();
        let parsed = parse_bundle(serde_json::from_str(&text).unwrap()).unwrap();

        let (_dst_dir, target) = temp_database();
        let target_settings = SettingsStore::load(&target).await.unwrap();
        let first = import_bundle(&target, &target_settings, &parsed).await.unwrap();
        assert_eq!(first.imported, 3);
        assert_eq!(first.skipped, 0);

        let second = import_bundle(&target, &target_settings, &parsed).await.unwrap();
        assert_eq!(second.imported, 0);
        assert_eq!(second.skipped, 3);

        let mut imported = target.query_intervals(IntervalQuery::default()).await.unwrap();
        let mut expected = records.clone();
        imported.sort_by(|a, b| a.id.cmp(&b.id));
        expected.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(imported, expected);
    }

    #[tokio::test]
    async fn large_export_is_split_into_pages_that_fit_a_frame() {
        let (_src_dir, source) = temp_database();
        let source_settings = SettingsStore::load(&source).await.unwrap();
        let long_url = format!("https://youtube.com/watch?v={}", "a".repeat(2_000));
        for minute in 0..600 {
            let mut record = closed("youtube.com", minute);
            record.url = Some(long_url.clone());
            source.put_interval(&record).await.unwrap();
        }

        let first = export_page(&source, &source_settings, 0).await.unwrap();
        assert_eq!(first.total, 600);
        assert!(first.next_offset.is_some());
        assert!(serde_json::to_vec(&first).unwrap().len() < 1024 * 1024);

        let (bundle, pages) = export_all(&source, &source_settings).await;
        assert!(pages >= 2);
        assert_eq!(bundle.sessions.len(), 600);

        let (_dst_dir, target) = temp_database();
        let target_settings = SettingsStore::load(&target).await.unwrap();
        let report = import_bundle(&target, &target_settings, &bundle).await.unwrap();
        assert_eq!((report.imported, report.skipped), (600, 0));
        assert_eq!(target.count_intervals().await.unwrap(), 600);
    }

    #[tokio::test]
    async fn offset_past_the_end_is_an_empty_last_page() {
        let (_dir, db) = temp_database();
        let settings = SettingsStore::load(&db).await.unwrap();
        db.put_interval(&closed("youtube.com", 0)).await.unwrap();
        let page = export_page(&db, &settings, 5).await.unwrap();
        assert!(page.bundle.sessions.is_empty());
        assert_eq!(page.next_offset, None);
        assert_eq!(page.total, 1);
    }

    #[tokio::test]
    async fn existing_ids_are_not_overwritten() {
        let (_dir, db) = temp_database();
        let settings = SettingsStore::load(&db).await.unwrap();
        let stored = closed("youtube.com", 0);
        db.put_interval(&stored).await.unwrap();

        let mut altered = stored.clone();
        altered.active_secs = 1;
        let bundle = ExportBundle {
            version: EXPORT_SCHEMA_VERSION,
            export_date: Utc::now(),
            sessions: vec![altered],
            settings: Map::new(),
        };
        let report = import_bundle(&db, &settings, &bundle).await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(db.get_interval(&stored.id).await.unwrap(), Some(stored));
    }

    #[tokio::test]
    async fn open_intervals_are_skipped() {
        let (_dir, db) = temp_database();
        let settings = SettingsStore::load(&db).await.unwrap();
        let open = Interval::open("youtube.com", Utc::now(), &TabContext::default());
        let bundle = ExportBundle {
            version: 1,
            export_date: Utc::now(),
            sessions: vec![open],
            settings: Map::new(),
        };
        let report = import_bundle(&db, &settings, &bundle).await.unwrap();
        assert_eq!((report.imported, report.skipped), (0, 1));
    }

    #[test]
    fn unknown_versions_are_rejected() {
        let newer = json!({"version": 2, "exportDate": "2024-04-10T00:00:00Z", "sessions": []});
        assert!(parse_bundle(newer).is_err());
        assert!(parse_bundle(json!({"version": 0, "sessions": []})).is_err());
        assert!(parse_bundle(json!({"sessions": []})).is_err());
        assert!(parse_bundle(json!({"version": 1, "sessions": "nope"})).is_err());
    }

    #[test]
    fn minimal_current_bundle_parses() {
        let raw = json!({"version": 1, "exportDate": "2024-04-10T00:00:00Z", "sessions": []});
        let bundle = parse_bundle(raw).unwrap();
        assert!(bundle.sessions.is_empty());
        assert!(bundle.settings.is_empty());
    }
}
