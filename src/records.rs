use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::errors::AppError;
use crate::places::{BusinessStatus, Candidate, LatLng, LocalizedText, OpeningHours};

/// Source list a place was curated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    /// Dogs welcome inside.
    InsideOk,
    /// Terrace seating or take-out only.
    TerraceOk,
    /// Favorite spot where dogs are not allowed.
    FavoriteDogNg,
}

impl Category {
    pub fn code(&self) -> i64 {
        match self {
            Category::InsideOk => 1,
            Category::TerraceOk => 2,
            Category::FavoriteDogNg => 3,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Category::InsideOk),
            2 => Some(Category::TerraceOk),
            3 => Some(Category::FavoriteDogNg),
            _ => None,
        }
    }

    pub fn as_tag(&self) -> &'static str {
        match self {
            Category::InsideOk => "inside-ok",
            Category::TerraceOk => "terrace-ok",
            Category::FavoriteDogNg => "dog-ng",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

impl FromStr for Category {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if let Ok(code) = trimmed.parse::<i64>() {
            return Self::from_code(code)
                .ok_or_else(|| AppError::Parse(format!("unknown category code: {code}")));
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "inside-ok" => Ok(Category::InsideOk),
            "terrace-ok" => Ok(Category::TerraceOk),
            "dog-ng" | "favorite-dog-ng" => Ok(Category::FavoriteDogNg),
            _ => Err(AppError::Parse(format!(
                "invalid category: {value} (expected 1, 2, 3, inside-ok, terrace-ok or dog-ng)"
            ))),
        }
    }
}

/// A place as persisted in the store, keyed by `place_id`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaceRecord {
    pub place_id: String,
    pub display_name: LocalizedText,
    pub primary_type: Option<LocalizedText>,
    pub formatted_address: Option<String>,
    pub map_url: Option<String>,
    pub location: Option<LatLng>,
    pub category: Category,
    pub alias: Option<String>,
    pub business_status: BusinessStatus,
    pub opening_hours: Option<OpeningHours>,
}

impl PlaceRecord {
    pub fn with_opening_hours(mut self, hours: Option<OpeningHours>) -> Self {
        self.opening_hours = hours;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("{display_name} ({place_id}) is permanently closed")]
    PermanentlyClosed {
        place_id: String,
        display_name: String,
    },
}

impl Rejection {
    pub fn reason(&self) -> &'static str {
        match self {
            Rejection::PermanentlyClosed { .. } => "CLOSED_PERMANENTLY",
        }
    }
}

pub fn normalize(
    candidate: Candidate,
    category: Category,
    alias: Option<String>,
) -> Result<PlaceRecord, Rejection> {
    if candidate.business_status.is_permanently_closed() {
        return Err(Rejection::PermanentlyClosed {
            place_id: candidate.place_id,
            display_name: candidate.display_name.text,
        });
    }

    Ok(PlaceRecord {
        place_id: candidate.place_id,
        display_name: candidate.display_name,
        primary_type: candidate.primary_type,
        formatted_address: candidate.formatted_address,
        map_url: candidate.map_url,
        location: candidate.location,
        category,
        alias: alias.filter(|value| !value.trim().is_empty()),
        business_status: candidate.business_status,
        opening_hours: None,
    })
}
