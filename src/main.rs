use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use place_curator::{
    backfill_opening_hours, init_tracing, refresh_business_status, register_place,
    write_closed_report, AppConfig, BatchDriver, BatchSinks, Category, ConsoleOperator, DedupKey,
    InputList, ListWriter, PlaceStore, PlacesService, RegisterOutcome, Selector,
};

#[derive(Debug, Parser)]
#[command(name = "place-curator")]
#[command(about = "Enrich curated Google Maps lists with Places API data")]
struct Cli {
    /// Overrides DATABASE_PATH.
    #[arg(long, global = true)]
    database: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Resolve every entry of one or more list exports interactively.
    Import {
        /// `<category>=<csv>`, e.g. `2=terrace.csv`. Repeatable.
        #[arg(long = "list", required = true, value_parser = parse_input_list)]
        lists: Vec<InputList>,
        #[arg(long, default_value = "output.csv")]
        output: PathBuf,
        /// Also record permanently closed picks here.
        #[arg(long)]
        rejected: Option<PathBuf>,
        /// Take a lone search result without asking.
        #[arg(long)]
        auto_select: bool,
        /// name-or-alias, name or alias.
        #[arg(long, value_parser = parse_dedup_key)]
        dedup: Option<DedupKey>,
    },
    /// Register one place by its Places API identifier.
    Register {
        place_id: String,
        #[arg(value_parser = parse_category)]
        category: Category,
        alias: Option<String>,
    },
    /// Re-check business status and report permanently closed places.
    RefreshStatus {
        #[arg(long, default_value = ".")]
        report_dir: PathBuf,
    },
    /// Fetch opening hours for places that have none.
    BackfillHours,
    /// Print stored places as JSON.
    List {
        /// Only places whose primary type matches exactly, e.g. `カフェ`.
        #[arg(long)]
        primary_type: Option<String>,
    },
    /// Print the effective configuration without secrets.
    Config,
}

fn parse_input_list(value: &str) -> Result<InputList, String> {
    value.parse().map_err(|err: place_curator::AppError| err.to_string())
}

fn parse_category(value: &str) -> Result<Category, String> {
    value.parse().map_err(|err: place_curator::AppError| err.to_string())
}

fn parse_dedup_key(value: &str) -> Result<DedupKey, String> {
    value.parse().map_err(|err: place_curator::AppError| err.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();
    let mut config = AppConfig::from_env();
    if let Some(database) = cli.database {
        config.database_path = database;
    }

    if let Commands::Config = cli.command {
        println!("{}", serde_json::to_string_pretty(&config.public_profile())?);
        return Ok(ExitCode::SUCCESS);
    }

    let store = PlaceStore::open(&config.database_path)
        .with_context(|| format!("opening {}", config.database_path.display()))?;

    if let Commands::List { primary_type } = &cli.command {
        let records = store.list(primary_type.as_deref())?;
        println!("{}", serde_json::to_string_pretty(&records)?);
        store.close()?;
        return Ok(ExitCode::SUCCESS);
    }

    let places = PlacesService::new(&config)?;

    let code = match cli.command {
        Commands::Import {
            lists,
            output,
            rejected,
            auto_select,
            dedup,
        } => {
            if auto_select {
                config.auto_select_single_result = true;
            }
            let mut sinks = BatchSinks {
                output: ListWriter::output(&output)?,
                rejected: rejected.as_deref().map(ListWriter::rejected).transpose()?,
            };
            let driver = BatchDriver::new(
                places,
                &store,
                Selector::new(config.selection_policy()),
                config.paging_policy(),
                dedup.unwrap_or(config.dedup_key),
            );
            let mut operator = ConsoleOperator::new();
            let summary = driver.run(&lists, &mut operator, &mut sinks).await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            ExitCode::SUCCESS
        }
        Commands::Register {
            place_id,
            category,
            alias,
        } => match register_place(&places, &store, &place_id, category, alias).await? {
            RegisterOutcome::Stored { upsert, .. } => {
                info!(%place_id, ?upsert, "registration complete");
                ExitCode::SUCCESS
            }
            RegisterOutcome::Rejected(rejection) => {
                warn!(%rejection, "registration refused");
                ExitCode::FAILURE
            }
        },
        Commands::RefreshStatus { report_dir } => {
            let summary =
                refresh_business_status(&places, &store, config.backfill_interval()).await?;
            write_closed_report(&report_dir, &summary.closed)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            ExitCode::SUCCESS
        }
        Commands::BackfillHours => {
            let summary =
                backfill_opening_hours(&places, &store, config.backfill_interval()).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            ExitCode::SUCCESS
        }
        Commands::Config | Commands::List { .. } => ExitCode::SUCCESS,
    };

    store.close()?;
    Ok(code)
}
