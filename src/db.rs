use std::path::{Path, PathBuf};
use std::str::FromStr;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use tracing::{info, trace};

use crate::errors::{AppError, AppResult};
use crate::places::{BusinessStatus, LatLng, LocalizedText, OpeningHours};
use crate::records::{Category, PlaceRecord};

pub const OPENING_HOURS_AVAILABLE: &str = "available";
pub const OPENING_HOURS_UNKNOWN: &str = "unknown";

const RECORD_COLUMNS: &str = "place_id, display_name, display_name_language, primary_type,
    primary_type_language, formatted_address, map_url, latitude, longitude,
    category, alias, business_status, opening_hours";

/// Which stored fields count as "already resolved" for a list entry name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DedupKey {
    #[default]
    NameOrAlias,
    Name,
    Alias,
}

impl DedupKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            DedupKey::NameOrAlias => "name-or-alias",
            DedupKey::Name => "name",
            DedupKey::Alias => "alias",
        }
    }
}

impl FromStr for DedupKey {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "name-or-alias" | "" => Ok(DedupKey::NameOrAlias),
            "name" => Ok(DedupKey::Name),
            "alias" => Ok(DedupKey::Alias),
            other => Err(AppError::Parse(format!("invalid dedup key: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Minimal view of a stored place used by the backfill jobs.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredPlace {
    pub place_id: String,
    pub display_name: String,
    pub formatted_address: Option<String>,
    pub alias: Option<String>,
}

pub struct PlaceStore {
    connection: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl PlaceStore {
    pub fn open<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
        let connection = Connection::open_with_flags(path, flags)?;
        connection.execute_batch("PRAGMA journal_mode = WAL;")?;
        run_migrations(&connection)?;
        info!(
            target: "place_store",
            path = %path.display(),
            "place store opened"
        );
        Ok(Self {
            connection: Mutex::new(connection),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn open_in_memory() -> AppResult<Self> {
        let connection = Connection::open_in_memory()?;
        run_migrations(&connection)?;
        Ok(Self {
            connection: Mutex::new(connection),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Closes the underlying connection, surfacing any error from SQLite.
    pub fn close(self) -> AppResult<()> {
        self.connection
            .into_inner()
            .close()
            .map_err(|(_, err)| AppError::from(err))
    }

    pub fn exists(&self, name: &str, key: DedupKey) -> AppResult<bool> {
        let conn = self.connection.lock();
        let by_name = || -> AppResult<bool> {
            Ok(conn
                .query_row(
                    "SELECT 1 FROM places WHERE display_name = ?1 LIMIT 1",
                    [name],
                    |_| Ok(()),
                )
                .optional()?
                .is_some())
        };
        let by_alias = || -> AppResult<bool> {
            Ok(conn
                .query_row(
                    "SELECT 1 FROM places WHERE alias = ?1 LIMIT 1",
                    [name],
                    |_| Ok(()),
                )
                .optional()?
                .is_some())
        };
        match key {
            DedupKey::NameOrAlias => Ok(by_name()? || by_alias()?),
            DedupKey::Name => by_name(),
            DedupKey::Alias => by_alias(),
        }
    }

    /// Insert or replace the mapped fields of `record`, keyed by place id.
    ///
    /// `alias` and `opening_hours` keep their stored value when the incoming
    /// record leaves them empty.
    pub fn upsert(&self, record: &PlaceRecord) -> AppResult<UpsertOutcome> {
        let opening_hours = record
            .opening_hours
            .as_ref()
            .map(|hours| serde_json::to_string(&hours.0))
            .transpose()?;
        let hours_status = opening_hours.as_ref().map(|_| OPENING_HOURS_AVAILABLE);

        let mut conn = self.connection.lock();
        let tx = conn.transaction()?;
        let existed = tx
            .query_row(
                "SELECT 1 FROM places WHERE place_id = ?1",
                [&record.place_id],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        tx.execute(
            "INSERT INTO places (
                place_id, display_name, display_name_language, primary_type,
                primary_type_language, formatted_address, map_url, latitude, longitude,
                category, alias, business_status, opening_hours, opening_hours_status,
                updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, DATETIME('now'))
            ON CONFLICT(place_id) DO UPDATE SET
                display_name = excluded.display_name,
                display_name_language = excluded.display_name_language,
                primary_type = excluded.primary_type,
                primary_type_language = excluded.primary_type_language,
                formatted_address = excluded.formatted_address,
                map_url = excluded.map_url,
                latitude = excluded.latitude,
                longitude = excluded.longitude,
                category = excluded.category,
                alias = COALESCE(excluded.alias, places.alias),
                business_status = excluded.business_status,
                opening_hours = COALESCE(excluded.opening_hours, places.opening_hours),
                opening_hours_status = COALESCE(excluded.opening_hours_status, places.opening_hours_status),
                updated_at = DATETIME('now')",
            params![
                record.place_id,
                record.display_name.text,
                record.display_name.language_code,
                record.primary_type.as_ref().map(|t| t.text.as_str()),
                record
                    .primary_type
                    .as_ref()
                    .and_then(|t| t.language_code.as_deref()),
                record.formatted_address,
                record.map_url,
                record.location.map(|loc| loc.latitude),
                record.location.map(|loc| loc.longitude),
                record.category.code(),
                record.alias,
                record.business_status.as_str(),
                opening_hours,
                hours_status,
            ],
        )?;
        tx.commit()?;

        trace!(
            place_id = %record.place_id,
            existed,
            "place record upserted"
        );
        Ok(if existed {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Inserted
        })
    }

    pub fn find(&self, place_id: &str) -> AppResult<Option<PlaceRecord>> {
        let conn = self.connection.lock();
        conn.query_row(
            &format!("SELECT {RECORD_COLUMNS} FROM places WHERE place_id = ?1"),
            [place_id],
            parse_record,
        )
        .optional()
        .map_err(AppError::from)
    }

    /// Stored places in insertion order, optionally limited to one primary type.
    pub fn list(&self, primary_type: Option<&str>) -> AppResult<Vec<PlaceRecord>> {
        let conn = self.connection.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM places
            WHERE ?1 IS NULL OR primary_type = ?1
            ORDER BY rowid ASC"
        ))?;
        let records = stmt
            .query_map([primary_type], parse_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn count(&self) -> AppResult<usize> {
        let conn = self.connection.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM places", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    pub fn opening_hours_status(&self, place_id: &str) -> AppResult<Option<String>> {
        let conn = self.connection.lock();
        let status: Option<Option<String>> = conn
            .query_row(
                "SELECT opening_hours_status FROM places WHERE place_id = ?1",
                [place_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(status.flatten())
    }

    /// Places whose business status is unset or not yet permanently closed.
    pub fn places_needing_status_check(&self) -> AppResult<Vec<StoredPlace>> {
        self.query_places(
            "SELECT place_id, display_name, formatted_address, alias FROM places
            WHERE business_status IS NULL OR business_status != ?1
            ORDER BY rowid ASC",
            [BusinessStatus::ClosedPermanently.as_str()],
        )
    }

    /// Places with no opening hours that have not been marked unknown.
    pub fn places_missing_opening_hours(&self) -> AppResult<Vec<StoredPlace>> {
        self.query_places(
            "SELECT place_id, display_name, formatted_address, alias FROM places
            WHERE opening_hours IS NULL
              AND (opening_hours_status IS NULL OR opening_hours_status != ?1)
            ORDER BY rowid ASC",
            [OPENING_HOURS_UNKNOWN],
        )
    }

    pub fn update_business_status(&self, place_id: &str, status: BusinessStatus) -> AppResult<bool> {
        let conn = self.connection.lock();
        let changed = conn.execute(
            "UPDATE places SET business_status = ?2, updated_at = DATETIME('now') WHERE place_id = ?1",
            params![place_id, status.as_str()],
        )?;
        Ok(changed > 0)
    }

    pub fn update_opening_hours(&self, place_id: &str, hours: &OpeningHours) -> AppResult<bool> {
        let payload = serde_json::to_string(&hours.0)?;
        let conn = self.connection.lock();
        let changed = conn.execute(
            "UPDATE places
            SET opening_hours = ?2, opening_hours_status = ?3, updated_at = DATETIME('now')
            WHERE place_id = ?1",
            params![place_id, payload, OPENING_HOURS_AVAILABLE],
        )?;
        Ok(changed > 0)
    }

    pub fn mark_opening_hours_unknown(&self, place_id: &str) -> AppResult<bool> {
        let conn = self.connection.lock();
        let changed = conn.execute(
            "UPDATE places
            SET opening_hours = NULL, opening_hours_status = ?2, updated_at = DATETIME('now')
            WHERE place_id = ?1",
            params![place_id, OPENING_HOURS_UNKNOWN],
        )?;
        Ok(changed > 0)
    }

    fn query_places<P: rusqlite::Params>(&self, sql: &str, params: P) -> AppResult<Vec<StoredPlace>> {
        let conn = self.connection.lock();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, |row| {
                Ok(StoredPlace {
                    place_id: row.get(0)?,
                    display_name: row.get(1)?,
                    formatted_address: row.get(2)?,
                    alias: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn run_migrations(connection: &Connection) -> AppResult<()> {
    connection.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS places (
            place_id TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            display_name_language TEXT,
            primary_type TEXT,
            primary_type_language TEXT,
            formatted_address TEXT,
            map_url TEXT,
            latitude REAL,
            longitude REAL,
            category INTEGER NOT NULL CHECK (category IN (1, 2, 3)),
            alias TEXT,
            business_status TEXT,
            opening_hours TEXT,
            opening_hours_status TEXT,
            created_at TEXT NOT NULL DEFAULT (DATETIME('now')),
            updated_at TEXT NOT NULL DEFAULT (DATETIME('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_places_display_name ON places(display_name);
        CREATE INDEX IF NOT EXISTS idx_places_alias ON places(alias);
        "#,
    )?;
    Ok(())
}

fn parse_record(row: &Row<'_>) -> rusqlite::Result<PlaceRecord> {
    let primary_type: Option<String> = row.get(3)?;
    let primary_type_language: Option<String> = row.get(4)?;
    let latitude: Option<f64> = row.get(7)?;
    let longitude: Option<f64> = row.get(8)?;
    let category_code: i64 = row.get(9)?;
    let business_status: Option<String> = row.get(11)?;
    let opening_hours: Option<String> = row.get(12)?;

    let category = Category::from_code(category_code).ok_or_else(|| {
        rusqlite::Error::IntegralValueOutOfRange(9, category_code)
    })?;

    Ok(PlaceRecord {
        place_id: row.get(0)?,
        display_name: LocalizedText {
            text: row.get(1)?,
            language_code: row.get(2)?,
        },
        primary_type: primary_type.map(|text| LocalizedText {
            text,
            language_code: primary_type_language,
        }),
        formatted_address: row.get(5)?,
        map_url: row.get(6)?,
        location: latitude
            .zip(longitude)
            .map(|(latitude, longitude)| LatLng {
                latitude,
                longitude,
            }),
        category,
        alias: row.get(10)?,
        business_status: business_status
            .as_deref()
            .map(BusinessStatus::parse)
            .unwrap_or_default(),
        opening_hours: opening_hours
            .and_then(|text| serde_json::from_str(&text).ok())
            .map(OpeningHours),
    })
}
