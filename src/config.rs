use std::path::PathBuf;
use std::time::Duration;
use std::{env, io};

use secrecy::SecretString;
use serde::Serialize;
use tracing::{debug, warn};

use crate::db::DedupKey;
use crate::paging::PagingPolicy;
use crate::selector::SelectionPolicy;

pub const DEFAULT_PLACES_API_BASE: &str = "https://places.googleapis.com/v1";
const DEFAULT_LANGUAGE_CODE: &str = "ja";
const DEFAULT_DATABASE_PATH: &str = "places.db";
const MAX_PAGE_SIZE: u8 = 20;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub google_maps_api_key: Option<SecretString>,
    pub places_api_base: String,
    pub language_code: String,
    pub database_path: PathBuf,
    pub search_page_size: u8,
    pub search_max_pages: usize,
    pub search_retry_attempts: u32,
    pub search_retry_interval_ms: u64,
    pub search_page_token_delay_ms: u64,
    pub backfill_interval_ms: u64,
    pub http_timeout_secs: u64,
    pub auto_select_single_result: bool,
    pub dedup_key: DedupKey,
}

#[derive(Clone, Debug, Serialize)]
pub struct PublicAppConfig {
    pub places_api_base: String,
    pub language_code: String,
    pub database_path: String,
    pub search_page_size: u8,
    pub search_max_pages: usize,
    pub search_retry_attempts: u32,
    pub search_retry_interval_ms: u64,
    pub search_page_token_delay_ms: u64,
    pub backfill_interval_ms: u64,
    pub http_timeout_secs: u64,
    pub auto_select_single_result: bool,
    pub dedup_key: &'static str,
    pub has_api_key: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        load_dotenv();
        Self {
            google_maps_api_key: read_secret("GOOGLE_MAPS_API_KEY")
                .or_else(|| read_secret("GOOGLE_PLACES_API_KEY")),
            places_api_base: env::var("PLACES_API_BASE")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_PLACES_API_BASE.to_string()),
            language_code: env::var("PLACES_LANGUAGE_CODE")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_LANGUAGE_CODE.to_string()),
            database_path: env::var("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATABASE_PATH)),
            search_page_size: parse_u8("SEARCH_PAGE_SIZE", MAX_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
            search_max_pages: parse_usize("SEARCH_MAX_PAGES", 5).max(1),
            search_retry_attempts: parse_u32("SEARCH_RETRY_ATTEMPTS", 3).max(1),
            search_retry_interval_ms: parse_u64("SEARCH_RETRY_INTERVAL_MS", 1_000),
            search_page_token_delay_ms: parse_u64("SEARCH_PAGE_TOKEN_DELAY_MS", 2_000),
            backfill_interval_ms: parse_u64("BACKFILL_INTERVAL_MS", 100),
            http_timeout_secs: parse_u64("HTTP_TIMEOUT_SECS", 10).max(1),
            auto_select_single_result: parse_bool("AUTO_SELECT_SINGLE_RESULT", false),
            dedup_key: parse_dedup_key("DEDUP_KEY"),
        }
    }

    pub fn paging_policy(&self) -> PagingPolicy {
        PagingPolicy {
            page_size: self.search_page_size,
            max_pages: self.search_max_pages,
            attempts: self.search_retry_attempts,
            retry_interval: Duration::from_millis(self.search_retry_interval_ms),
            page_token_delay: Duration::from_millis(self.search_page_token_delay_ms),
        }
    }

    pub fn selection_policy(&self) -> SelectionPolicy {
        SelectionPolicy {
            auto_select_single_result: self.auto_select_single_result,
        }
    }

    pub fn backfill_interval(&self) -> Duration {
        Duration::from_millis(self.backfill_interval_ms)
    }

    pub fn public_profile(&self) -> PublicAppConfig {
        PublicAppConfig {
            places_api_base: self.places_api_base.clone(),
            language_code: self.language_code.clone(),
            database_path: self.database_path.to_string_lossy().to_string(),
            search_page_size: self.search_page_size,
            search_max_pages: self.search_max_pages,
            search_retry_attempts: self.search_retry_attempts,
            search_retry_interval_ms: self.search_retry_interval_ms,
            search_page_token_delay_ms: self.search_page_token_delay_ms,
            backfill_interval_ms: self.backfill_interval_ms,
            http_timeout_secs: self.http_timeout_secs,
            auto_select_single_result: self.auto_select_single_result,
            dedup_key: self.dedup_key.as_str(),
            has_api_key: self.google_maps_api_key.is_some(),
        }
    }
}

fn load_dotenv() {
    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn read_secret(key: &str) -> Option<SecretString> {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(SecretString::from)
}

fn parse_dedup_key(key: &str) -> DedupKey {
    match env::var(key) {
        Ok(value) => value.parse().unwrap_or_else(|err| {
            warn!(%err, "ignoring {key}; falling back to name-or-alias");
            DedupKey::default()
        }),
        Err(_) => DedupKey::default(),
    }
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_u8(key: &str, default: u8) -> u8 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u8>().ok())
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}

fn parse_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
}
