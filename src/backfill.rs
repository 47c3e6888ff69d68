use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Local;
use serde::Serialize;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::db::{PlaceStore, StoredPlace};
use crate::errors::AppResult;
use crate::places::{
    BusinessStatus, PlacesService, BUSINESS_STATUS_FIELD_MASK, OPENING_HOURS_FIELD_MASK,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClosedBusiness {
    pub name: String,
    pub address: Option<String>,
    pub alias: Option<String>,
    pub place_id: String,
}

impl From<StoredPlace> for ClosedBusiness {
    fn from(place: StoredPlace) -> Self {
        Self {
            name: place.display_name,
            address: place.formatted_address,
            alias: place.alias,
            place_id: place.place_id,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusRefreshSummary {
    pub total_records: usize,
    pub candidates: usize,
    pub updated: usize,
    pub failed: usize,
    pub closed: Vec<ClosedBusiness>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OpeningHoursSummary {
    pub total_records: usize,
    pub candidates: usize,
    pub updated: usize,
    pub marked_unknown: usize,
    pub failed: usize,
}

/// Re-check the business status of every place not already known closed.
pub async fn refresh_business_status(
    places: &PlacesService,
    store: &PlaceStore,
    interval: Duration,
) -> AppResult<StatusRefreshSummary> {
    let pending = store.places_needing_status_check()?;
    let mut summary = StatusRefreshSummary {
        total_records: store.count()?,
        candidates: pending.len(),
        ..StatusRefreshSummary::default()
    };
    info!(
        total = summary.total_records,
        pending = summary.candidates,
        "refreshing business status"
    );

    for (position, place) in pending.into_iter().enumerate() {
        if position > 0 {
            sleep(interval).await;
        }
        let status = match places
            .place_details(&place.place_id, BUSINESS_STATUS_FIELD_MASK)
            .await
        {
            Ok(details) => details.business_status,
            Err(err) => {
                warn!(place_id = %place.place_id, error = %err, "business status lookup failed");
                summary.failed += 1;
                continue;
            }
        };
        let Some(status) = status else {
            warn!(place_id = %place.place_id, "response carried no business status");
            summary.failed += 1;
            continue;
        };

        if !store.update_business_status(&place.place_id, status)? {
            summary.failed += 1;
            continue;
        }
        summary.updated += 1;
        if status == BusinessStatus::ClosedPermanently {
            info!(place_id = %place.place_id, name = %place.display_name, "place closed permanently");
            summary.closed.push(place.into());
        }
    }

    info!(
        updated = summary.updated,
        closed = summary.closed.len(),
        failed = summary.failed,
        "business status refresh finished"
    );
    Ok(summary)
}

/// Fill in opening hours for places that have none yet.
pub async fn backfill_opening_hours(
    places: &PlacesService,
    store: &PlaceStore,
    interval: Duration,
) -> AppResult<OpeningHoursSummary> {
    let pending = store.places_missing_opening_hours()?;
    let mut summary = OpeningHoursSummary {
        total_records: store.count()?,
        candidates: pending.len(),
        ..OpeningHoursSummary::default()
    };
    info!(
        total = summary.total_records,
        pending = summary.candidates,
        "backfilling opening hours"
    );

    for (position, place) in pending.iter().enumerate() {
        if position > 0 {
            sleep(interval).await;
        }
        let details = match places
            .place_details(&place.place_id, OPENING_HOURS_FIELD_MASK)
            .await
        {
            Ok(details) => details,
            Err(err) => {
                warn!(place_id = %place.place_id, error = %err, "opening hours lookup failed");
                summary.failed += 1;
                continue;
            }
        };

        let changed = match &details.opening_hours {
            Some(hours) => {
                let changed = store.update_opening_hours(&place.place_id, hours)?;
                if changed {
                    summary.updated += 1;
                }
                changed
            }
            None => {
                let changed = store.mark_opening_hours_unknown(&place.place_id)?;
                if changed {
                    summary.marked_unknown += 1;
                }
                changed
            }
        };
        if !changed {
            summary.failed += 1;
        }
    }

    info!(
        updated = summary.updated,
        unknown = summary.marked_unknown,
        failed = summary.failed,
        "opening hours backfill finished"
    );
    Ok(summary)
}

/// Write closed places as `closed_businesses_<timestamp>.{json,txt}`.
///
/// Returns `None` when there is nothing to report.
pub fn write_closed_report(
    dir: &Path,
    closed: &[ClosedBusiness],
) -> AppResult<Option<(PathBuf, PathBuf)>> {
    if closed.is_empty() {
        return Ok(None);
    }
    fs::create_dir_all(dir)?;
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    let json_path = dir.join(format!("closed_businesses_{stamp}.json"));
    let text_path = dir.join(format!("closed_businesses_{stamp}.txt"));

    fs::write(&json_path, serde_json::to_string_pretty(closed)?)?;
    fs::write(&text_path, render_closed_report(closed))?;
    info!(
        json = %json_path.display(),
        text = %text_path.display(),
        count = closed.len(),
        "closed business report written"
    );
    Ok(Some((json_path, text_path)))
}

fn render_closed_report(closed: &[ClosedBusiness]) -> String {
    let mut lines = vec![
        format!("Permanently closed places ({})", closed.len()),
        "=".repeat(50),
        String::new(),
    ];
    for (index, business) in closed.iter().enumerate() {
        lines.push(format!("{}. {}", index + 1, business.name));
        lines.push(format!(
            "   Address: {}",
            business.address.as_deref().unwrap_or("-")
        ));
        lines.push(format!(
            "   Alias: {}",
            business.alias.as_deref().unwrap_or("-")
        ));
        lines.push(format!("   Place ID: {}", business.place_id));
        lines.push("-".repeat(30));
    }
    lines.push(String::new());
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::tempdir;

    use super::*;
    use crate::paging::testing::{api_error, candidate, ScriptedSearch};
    use crate::places::{OpeningHours, PlaceDetails};
    use crate::records::{normalize, Category};

    fn seed(store: &PlaceStore, ids: &[&str]) {
        for id in ids {
            let record = normalize(
                candidate(id, BusinessStatus::Operating),
                Category::InsideOk,
                Some(format!("alias {id}")),
            )
            .unwrap();
            store.upsert(&record).unwrap();
        }
    }

    fn status_details(id: &str, status: Option<BusinessStatus>) -> PlaceDetails {
        PlaceDetails {
            place_id: id.into(),
            display_name: None,
            primary_type: None,
            formatted_address: None,
            location: None,
            business_status: status,
            map_url: None,
            opening_hours: None,
        }
    }

    #[tokio::test]
    async fn refresh_collects_newly_closed_places() {
        let store = PlaceStore::open_in_memory().unwrap();
        seed(&store, &["a", "b", "c", "d"]);
        store
            .update_business_status("d", BusinessStatus::ClosedPermanently)
            .unwrap();
        let search = ScriptedSearch::with_details(vec![
            Ok(status_details("a", Some(BusinessStatus::Operating))),
            Ok(status_details("b", Some(BusinessStatus::ClosedPermanently))),
            Err(api_error()),
        ]);

        let summary = refresh_business_status(&search.service(), &store, Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(summary.total_records, 4);
        assert_eq!(summary.candidates, 3);
        assert_eq!(summary.updated, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(
            summary.closed,
            vec![ClosedBusiness {
                name: "Place b".into(),
                address: Some("b street".into()),
                alias: Some("alias b".into()),
                place_id: "b".into(),
            }]
        );
        assert_eq!(
            store.find("b").unwrap().unwrap().business_status,
            BusinessStatus::ClosedPermanently
        );
        let masks: Vec<String> = search
            .detail_requests
            .lock()
            .iter()
            .map(|(_, mask)| mask.clone())
            .collect();
        assert!(masks.iter().all(|mask| mask == BUSINESS_STATUS_FIELD_MASK));
    }

    #[tokio::test]
    async fn backfill_stores_hours_or_marks_unknown() {
        let store = PlaceStore::open_in_memory().unwrap();
        seed(&store, &["a", "b", "c"]);
        let mut with_hours = status_details("a", None);
        with_hours.opening_hours = Some(OpeningHours(json!({"openNow": false})));
        let search = ScriptedSearch::with_details(vec![
            Ok(with_hours),
            Ok(status_details("b", None)),
            Err(api_error()),
        ]);

        let summary = backfill_opening_hours(&search.service(), &store, Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(summary.candidates, 3);
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.marked_unknown, 1);
        assert_eq!(summary.failed, 1);
        assert!(store.find("a").unwrap().unwrap().opening_hours.is_some());
        assert_eq!(
            store.opening_hours_status("b").unwrap().as_deref(),
            Some(crate::db::OPENING_HOURS_UNKNOWN)
        );
        assert!(store.opening_hours_status("c").unwrap().is_none());

        let remaining: Vec<String> = store
            .places_missing_opening_hours()
            .unwrap()
            .into_iter()
            .map(|place| place.place_id)
            .collect();
        assert_eq!(remaining, vec!["c".to_string()]);
    }

    #[test]
    fn writes_json_and_text_reports() {
        let dir = tempdir().unwrap();
        assert!(write_closed_report(dir.path(), &[]).unwrap().is_none());

        let closed = vec![ClosedBusiness {
            name: "Old Café".into(),
            address: None,
            alias: Some("old cafe".into()),
            place_id: "x".into(),
        }];
        let (json_path, text_path) = write_closed_report(dir.path(), &closed).unwrap().unwrap();

        let parsed: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(json_path).unwrap()).unwrap();
        assert_eq!(parsed[0]["place_id"], "x");
        let text = fs::read_to_string(text_path).unwrap();
        assert!(text.starts_with("Permanently closed places (1)"));
        assert!(text.contains("1. Old Café"));
        assert!(text.contains("   Alias: old cafe"));
    }
}
