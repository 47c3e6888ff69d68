use tracing::{info, warn};

use crate::db::{PlaceStore, UpsertOutcome};
use crate::errors::AppResult;
use crate::places::{PlacesService, REGISTER_FIELD_MASK};
use crate::records::{normalize, Category, PlaceRecord, Rejection};

#[derive(Debug, Clone, PartialEq)]
pub enum RegisterOutcome {
    Stored {
        record: PlaceRecord,
        upsert: UpsertOutcome,
    },
    Rejected(Rejection),
}

/// Register a place directly from its identifier, bypassing text search.
pub async fn register_place(
    places: &PlacesService,
    store: &PlaceStore,
    place_id: &str,
    category: Category,
    alias: Option<String>,
) -> AppResult<RegisterOutcome> {
    let details = places.place_details(place_id, REGISTER_FIELD_MASK).await?;
    let (candidate, opening_hours) = details.into_candidate();
    info!(
        place_id,
        name = %candidate.display_name.text,
        status = %candidate.business_status,
        %category,
        "fetched place details"
    );

    let record = match normalize(candidate, category, alias) {
        Ok(record) => record.with_opening_hours(opening_hours),
        Err(rejection) => {
            warn!(place_id, %rejection, "not registering");
            return Ok(RegisterOutcome::Rejected(rejection));
        }
    };

    let upsert = store.upsert(&record)?;
    match upsert {
        UpsertOutcome::Inserted => info!(place_id, "registered new place"),
        UpsertOutcome::Updated => info!(place_id, "updated existing place"),
    }
    Ok(RegisterOutcome::Stored { record, upsert })
}
