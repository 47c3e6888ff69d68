mod backfill;
mod batch;
mod config;
mod db;
mod errors;
mod ingestion;
mod paging;
mod places;
mod records;
mod register;
mod selector;

use once_cell::sync::OnceCell;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use backfill::{
    backfill_opening_hours, refresh_business_status, write_closed_report, ClosedBusiness,
    OpeningHoursSummary, StatusRefreshSummary,
};
pub use batch::{BatchDriver, BatchSinks, BatchSummary, EntryOutcome};
pub use config::{AppConfig, PublicAppConfig, DEFAULT_PLACES_API_BASE};
pub use db::{DedupKey, PlaceStore, StoredPlace, UpsertOutcome};
pub use errors::{AppError, AppResult};
pub use ingestion::{
    parse_input_entries, read_input_entries, InputEntry, InputList, ListWriter, OutputRow,
    RejectedRow,
};
pub use paging::{PageCursor, PagingPolicy};
pub use places::{
    BusinessStatus, Candidate, HttpPlacesClient, LatLng, LocalizedText, OpeningHours,
    PlaceDetails, PlaceSearch, PlacesService, ResultPage,
};
pub use records::{normalize, Category, PlaceRecord, Rejection};
pub use register::{register_place, RegisterOutcome};
pub use selector::{
    render_page, ConsoleOperator, Operator, OperatorCommand, PageView, Selection,
    SelectionPolicy, Selector, SelectorNotice,
};

pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,place_curator=debug"));
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    });
}
