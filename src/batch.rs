use serde::Serialize;
use tracing::{error, info, warn};

use crate::db::{DedupKey, PlaceStore, UpsertOutcome};
use crate::errors::AppResult;
use crate::ingestion::{read_input_entries, InputEntry, InputList, ListWriter, OutputRow, RejectedRow};
use crate::paging::{PageCursor, PagingPolicy};
use crate::places::PlacesService;
use crate::records::{normalize, Category, Rejection};
use crate::selector::{Operator, Selection, Selector};

#[derive(Debug, Clone, PartialEq)]
pub enum EntryOutcome {
    AlreadyKnown,
    Resolved {
        place_id: String,
        upsert: UpsertOutcome,
    },
    NotFound,
    SearchFailed,
    Skipped,
    Cancelled,
    InputClosed,
    Rejected(Rejection),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub lists: usize,
    pub unreadable_lists: usize,
    pub total: usize,
    pub already_known: usize,
    pub inserted: usize,
    pub updated: usize,
    pub not_found: usize,
    pub search_failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
    pub rejected: usize,
    pub failed: usize,
}

impl BatchSummary {
    fn record(&mut self, outcome: &EntryOutcome) {
        match outcome {
            EntryOutcome::AlreadyKnown => self.already_known += 1,
            EntryOutcome::Resolved {
                upsert: UpsertOutcome::Inserted,
                ..
            } => self.inserted += 1,
            EntryOutcome::Resolved {
                upsert: UpsertOutcome::Updated,
                ..
            } => self.updated += 1,
            EntryOutcome::NotFound => self.not_found += 1,
            EntryOutcome::SearchFailed => self.search_failed += 1,
            EntryOutcome::Skipped => self.skipped += 1,
            EntryOutcome::Cancelled | EntryOutcome::InputClosed => self.cancelled += 1,
            EntryOutcome::Rejected(_) => self.rejected += 1,
        }
    }

    pub fn resolved(&self) -> usize {
        self.inserted + self.updated
    }
}

/// Where resolved and rejected entries are written.
pub struct BatchSinks {
    pub output: ListWriter,
    pub rejected: Option<ListWriter>,
}

pub struct BatchDriver<'a> {
    places: PlacesService,
    store: &'a PlaceStore,
    selector: Selector,
    paging: PagingPolicy,
    dedup: DedupKey,
}

impl<'a> BatchDriver<'a> {
    pub fn new(
        places: PlacesService,
        store: &'a PlaceStore,
        selector: Selector,
        paging: PagingPolicy,
        dedup: DedupKey,
    ) -> Self {
        Self {
            places,
            store,
            selector,
            paging,
            dedup,
        }
    }

    /// Process every entry of every list. Entry failures are logged and
    /// counted; they never stop the batch.
    ///
    /// Once the operator's input closes, remaining entries are counted as
    /// cancelled without being searched.
    pub async fn run(
        &self,
        lists: &[InputList],
        operator: &mut dyn Operator,
        sinks: &mut BatchSinks,
    ) -> BatchSummary {
        let mut summary = BatchSummary::default();
        let mut input_closed = false;
        for list in lists {
            summary.lists += 1;
            let entries = match read_input_entries(&list.path) {
                Ok(entries) => entries,
                Err(err) => {
                    error!(
                        path = %list.path.display(),
                        error = %err,
                        "unable to read input list"
                    );
                    summary.unreadable_lists += 1;
                    continue;
                }
            };
            info!(
                path = %list.path.display(),
                category = %list.category,
                entries = entries.len(),
                "processing input list"
            );

            for entry in &entries {
                summary.total += 1;
                if input_closed {
                    summary.cancelled += 1;
                    continue;
                }
                match self.process_entry(entry, list.category, operator, sinks).await {
                    Ok(EntryOutcome::InputClosed) => {
                        warn!(name = %entry.name, "operator input closed; no further searches");
                        input_closed = true;
                        summary.record(&EntryOutcome::InputClosed);
                    }
                    Ok(outcome) => summary.record(&outcome),
                    Err(err) => {
                        error!(name = %entry.name, error = %err, "failed to process list entry");
                        summary.failed += 1;
                    }
                }
            }
        }
        info!(?summary, "batch finished");
        summary
    }

    pub async fn process_entry(
        &self,
        entry: &InputEntry,
        category: Category,
        operator: &mut dyn Operator,
        sinks: &mut BatchSinks,
    ) -> AppResult<EntryOutcome> {
        if self.store.exists(&entry.name, self.dedup)? {
            info!(name = %entry.name, "already in the store; skipping");
            return Ok(EntryOutcome::AlreadyKnown);
        }

        let mut cursor =
            match PageCursor::open(self.places.clone(), entry.name.as_str(), self.paging).await {
                Ok(cursor) => cursor,
                Err(err) => {
                    warn!(name = %entry.name, error = %err, "search failed; skipping entry");
                    return Ok(EntryOutcome::SearchFailed);
                }
            };
        if cursor.is_empty() {
            warn!(name = %entry.name, "no places found");
            return Ok(EntryOutcome::NotFound);
        }

        let candidate = match self.selector.select(&mut cursor, operator).await? {
            Selection::Chosen(candidate) => candidate,
            Selection::Skipped => {
                info!(name = %entry.name, "skipped by operator");
                return Ok(EntryOutcome::Skipped);
            }
            Selection::Cancelled => {
                info!(name = %entry.name, "selection cancelled");
                return Ok(EntryOutcome::Cancelled);
            }
            Selection::InputClosed => return Ok(EntryOutcome::InputClosed),
        };

        let record = match normalize(candidate, category, Some(entry.name.clone())) {
            Ok(record) => record,
            Err(rejection) => {
                warn!(name = %entry.name, %rejection, "rejected; not stored");
                if let Some(rejected) = sinks.rejected.as_mut() {
                    let Rejection::PermanentlyClosed {
                        place_id,
                        display_name,
                    } = &rejection;
                    rejected.append(&RejectedRow {
                        location_name: entry.name.clone(),
                        place_id: place_id.clone(),
                        display_name: display_name.clone(),
                        reason: rejection.reason().to_string(),
                    })?;
                }
                return Ok(EntryOutcome::Rejected(rejection));
            }
        };

        let upsert = self.store.upsert(&record)?;
        info!(
            name = %entry.name,
            place_id = %record.place_id,
            ?upsert,
            "place stored"
        );
        sinks.output.append(&OutputRow {
            location_name: entry.name.clone(),
            comment: entry.comment.clone(),
            url: record.map_url.clone().unwrap_or_default(),
            category: category.code(),
        })?;

        Ok(EntryOutcome::Resolved {
            place_id: record.place_id,
            upsert,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::{tempdir, TempDir};

    use super::*;
    use crate::paging::testing::{api_error, candidate, ScriptedSearch};
    use crate::places::{BusinessStatus, ResultPage};
    use crate::selector::testing::ScriptedOperator;
    use crate::selector::SelectionPolicy;

    fn instant_policy() -> PagingPolicy {
        PagingPolicy {
            retry_interval: Duration::ZERO,
            page_token_delay: Duration::ZERO,
            ..PagingPolicy::default()
        }
    }

    fn sinks(dir: &TempDir) -> BatchSinks {
        BatchSinks {
            output: ListWriter::output(&dir.path().join("output.csv")).unwrap(),
            rejected: Some(ListWriter::rejected(&dir.path().join("rejected.csv")).unwrap()),
        }
    }

    fn write_list(dir: &TempDir, name: &str, rows: &[&str]) -> InputList {
        let path = dir.path().join(name);
        let mut contents = String::from("タイトル,メモ\n");
        for row in rows {
            contents.push_str(row);
            contents.push('\n');
        }
        std::fs::write(&path, contents).unwrap();
        InputList {
            category: Category::InsideOk,
            path,
        }
    }

    fn page(candidates: Vec<crate::places::Candidate>) -> AppResult<ResultPage> {
        Ok(ResultPage {
            candidates,
            next_page_token: None,
        })
    }

    #[tokio::test]
    async fn resolves_new_entry_and_writes_output() {
        let dir = tempdir().unwrap();
        let store = PlaceStore::open_in_memory().unwrap();
        let search = ScriptedSearch::with_pages(vec![page(vec![
            candidate("A", BusinessStatus::Operating),
            candidate("B", BusinessStatus::ClosedPermanently),
        ])]);
        let driver = BatchDriver::new(
            search.service(),
            &store,
            Selector::default(),
            instant_policy(),
            DedupKey::NameOrAlias,
        );
        let list = write_list(&dir, "inside.csv", &["Café Example,静か"]);
        let mut operator = ScriptedOperator::new(&["1"]);
        let mut sinks = sinks(&dir);

        let summary = driver.run(&[list], &mut operator, &mut sinks).await;

        assert_eq!(summary.total, 1);
        assert_eq!(summary.inserted, 1);
        let stored = store.find("A").unwrap().unwrap();
        assert_eq!(stored.alias.as_deref(), Some("Café Example"));
        assert_eq!(stored.category, Category::InsideOk);
        let output = std::fs::read_to_string(dir.path().join("output.csv")).unwrap();
        assert!(output.contains("Café Example,静か,https://maps.google.com/?q=A,1"));
    }

    #[tokio::test]
    async fn known_names_skip_the_search() {
        let dir = tempdir().unwrap();
        let store = PlaceStore::open_in_memory().unwrap();
        let existing = normalize(
            candidate("A", BusinessStatus::Operating),
            Category::InsideOk,
            Some("Café Example".into()),
        )
        .unwrap();
        store.upsert(&existing).unwrap();

        let search = ScriptedSearch::with_pages(vec![]);
        let driver = BatchDriver::new(
            search.service(),
            &store,
            Selector::default(),
            instant_policy(),
            DedupKey::NameOrAlias,
        );
        let list = write_list(&dir, "inside.csv", &["Café Example,", "Place A,"]);
        let mut operator = ScriptedOperator::new(&[]);
        let mut sinks = sinks(&dir);

        let summary = driver.run(&[list], &mut operator, &mut sinks).await;
        assert_eq!(summary.already_known, 2);
        assert_eq!(search.request_count(), 0);
        assert!(operator.prompts.is_empty());
    }

    #[tokio::test]
    async fn rejected_entries_are_not_stored() {
        let dir = tempdir().unwrap();
        let store = PlaceStore::open_in_memory().unwrap();
        let search = ScriptedSearch::with_pages(vec![page(vec![candidate(
            "closed",
            BusinessStatus::ClosedPermanently,
        )])]);
        let driver = BatchDriver::new(
            search.service(),
            &store,
            Selector::new(SelectionPolicy {
                auto_select_single_result: true,
            }),
            instant_policy(),
            DedupKey::NameOrAlias,
        );
        let list = write_list(&dir, "inside.csv", &["Closed Place,"]);
        let mut operator = ScriptedOperator::new(&[]);
        let mut sinks = sinks(&dir);

        let summary = driver.run(&[list], &mut operator, &mut sinks).await;
        assert_eq!(summary.rejected, 1);
        assert_eq!(store.count().unwrap(), 0);
        let output = std::fs::read_to_string(dir.path().join("output.csv")).unwrap();
        assert_eq!(output, "location_name,comment,url,category\n");
        let rejected = std::fs::read_to_string(dir.path().join("rejected.csv")).unwrap();
        assert!(rejected.contains("Closed Place,closed,Place closed,CLOSED_PERMANENTLY"));
    }

    #[tokio::test]
    async fn closed_input_stops_further_searches() {
        let dir = tempdir().unwrap();
        let store = PlaceStore::open_in_memory().unwrap();
        let two = || {
            page(vec![
                candidate("x", BusinessStatus::Operating),
                candidate("y", BusinessStatus::Operating),
            ])
        };
        let search = ScriptedSearch::with_pages(vec![two(), two(), two()]);
        let driver = BatchDriver::new(
            search.service(),
            &store,
            Selector::default(),
            instant_policy(),
            DedupKey::NameOrAlias,
        );
        let first = write_list(&dir, "inside.csv", &["One,", "Two,"]);
        let mut second = write_list(&dir, "terrace.csv", &["Three,"]);
        second.category = Category::TerraceOk;
        let mut operator = ScriptedOperator::new(&[]);
        let mut sinks = sinks(&dir);

        let summary = driver
            .run(&[first, second], &mut operator, &mut sinks)
            .await;

        assert_eq!(summary.total, 3);
        assert_eq!(summary.cancelled, 3);
        assert_eq!(search.request_count(), 1);
        assert_eq!(operator.prompts, vec![0]);
        assert_eq!(store.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn quit_only_cancels_the_current_entry() {
        let dir = tempdir().unwrap();
        let store = PlaceStore::open_in_memory().unwrap();
        let search = ScriptedSearch::with_pages(vec![
            page(vec![candidate("x", BusinessStatus::Operating)]),
            page(vec![candidate("y", BusinessStatus::Operating)]),
        ]);
        let driver = BatchDriver::new(
            search.service(),
            &store,
            Selector::default(),
            instant_policy(),
            DedupKey::NameOrAlias,
        );
        let list = write_list(&dir, "inside.csv", &["One,", "Two,"]);
        let mut operator = ScriptedOperator::new(&["q", "1"]);
        let mut sinks = sinks(&dir);

        let summary = driver.run(&[list], &mut operator, &mut sinks).await;

        assert_eq!(summary.cancelled, 1);
        assert_eq!(summary.inserted, 1);
        assert_eq!(search.request_count(), 2);
        assert!(store.find("y").unwrap().is_some());
    }

    #[tokio::test]
    async fn failures_never_abort_the_batch() {
        let dir = tempdir().unwrap();
        let store = PlaceStore::open_in_memory().unwrap();
        let search = ScriptedSearch::with_pages(vec![
            // "Broken" exhausts its retries
            Err(api_error()),
            Err(api_error()),
            Err(api_error()),
            // "Nowhere" has no candidates
            page(vec![]),
            // "Picky" is skipped by the operator
            page(vec![candidate("x", BusinessStatus::Operating)]),
            // "Good" resolves
            page(vec![candidate("good", BusinessStatus::Operating)]),
        ]);
        let driver = BatchDriver::new(
            search.service(),
            &store,
            Selector::default(),
            instant_policy(),
            DedupKey::NameOrAlias,
        );
        let missing = InputList {
            category: Category::TerraceOk,
            path: dir.path().join("missing.csv"),
        };
        let list = write_list(&dir, "inside.csv", &["Broken,", "Nowhere,", "Picky,", "Good,"]);
        let mut operator = ScriptedOperator::new(&["s", "1"]);
        let mut sinks = sinks(&dir);

        let summary = driver.run(&[missing, list], &mut operator, &mut sinks).await;
        assert_eq!(
            summary,
            BatchSummary {
                lists: 2,
                unreadable_lists: 1,
                total: 4,
                search_failed: 1,
                not_found: 1,
                skipped: 1,
                inserted: 1,
                ..BatchSummary::default()
            }
        );
        assert!(store.find("good").unwrap().is_some());
    }
}
