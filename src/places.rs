use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::trace;

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};

const SEARCH_FIELD_MASK: &str = "places.id,places.displayName,places.primaryTypeDisplayName,places.formattedAddress,places.googleMapsUri,places.location,places.businessStatus,nextPageToken";

/// Field mask used when registering a place from its identifier.
pub const REGISTER_FIELD_MASK: &str = "id,displayName,primaryTypeDisplayName,googleMapsUri,location,formattedAddress,businessStatus,currentOpeningHours";
pub const BUSINESS_STATUS_FIELD_MASK: &str = "businessStatus";
pub const OPENING_HOURS_FIELD_MASK: &str = "currentOpeningHours";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalizedText {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub language_code: Option<String>,
}

impl LocalizedText {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            language_code: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum BusinessStatus {
    Operating,
    ClosedTemporarily,
    ClosedPermanently,
    #[default]
    Unknown,
}

impl BusinessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BusinessStatus::Operating => "OPERATIONAL",
            BusinessStatus::ClosedTemporarily => "CLOSED_TEMPORARILY",
            BusinessStatus::ClosedPermanently => "CLOSED_PERMANENTLY",
            BusinessStatus::Unknown => "BUSINESS_STATUS_UNSPECIFIED",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "OPERATIONAL" | "OPERATING" => BusinessStatus::Operating,
            "CLOSED_TEMPORARILY" => BusinessStatus::ClosedTemporarily,
            "CLOSED_PERMANENTLY" => BusinessStatus::ClosedPermanently,
            _ => BusinessStatus::Unknown,
        }
    }

    pub fn is_permanently_closed(&self) -> bool {
        matches!(self, BusinessStatus::ClosedPermanently)
    }
}

impl fmt::Display for BusinessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for BusinessStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for BusinessStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

/// Opaque `currentOpeningHours` payload as returned by the Places API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpeningHours(pub Value);

impl OpeningHours {
    pub fn weekday_descriptions(&self) -> Vec<&str> {
        self.0
            .get("weekdayDescriptions")
            .and_then(Value::as_array)
            .map(|days| days.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub place_id: String,
    pub display_name: LocalizedText,
    pub primary_type: Option<LocalizedText>,
    pub formatted_address: Option<String>,
    pub location: Option<LatLng>,
    pub business_status: BusinessStatus,
    pub map_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultPage {
    pub candidates: Vec<Candidate>,
    pub next_page_token: Option<String>,
}

impl ResultPage {
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaceDetails {
    pub place_id: String,
    pub display_name: Option<LocalizedText>,
    pub primary_type: Option<LocalizedText>,
    pub formatted_address: Option<String>,
    pub location: Option<LatLng>,
    pub business_status: Option<BusinessStatus>,
    pub map_url: Option<String>,
    pub opening_hours: Option<OpeningHours>,
}

impl PlaceDetails {
    pub fn into_candidate(self) -> (Candidate, Option<OpeningHours>) {
        let candidate = Candidate {
            place_id: self.place_id,
            display_name: self.display_name.unwrap_or_default(),
            primary_type: self.primary_type,
            formatted_address: self.formatted_address,
            location: self.location,
            business_status: self.business_status.unwrap_or_default(),
            map_url: self.map_url,
        };
        (candidate, self.opening_hours)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiPlace {
    id: Option<String>,
    display_name: Option<LocalizedText>,
    primary_type_display_name: Option<LocalizedText>,
    formatted_address: Option<String>,
    google_maps_uri: Option<String>,
    location: Option<LatLng>,
    business_status: Option<BusinessStatus>,
    current_opening_hours: Option<OpeningHours>,
}

impl ApiPlace {
    fn into_candidate(self) -> Option<Candidate> {
        let place_id = self.id.filter(|id| !id.trim().is_empty())?;
        Some(Candidate {
            place_id,
            display_name: self.display_name.unwrap_or_default(),
            primary_type: self.primary_type_display_name,
            formatted_address: self.formatted_address,
            location: self.location,
            business_status: self.business_status.unwrap_or_default(),
            map_url: self.google_maps_uri,
        })
    }

    fn into_details(self, requested_id: &str) -> PlaceDetails {
        PlaceDetails {
            place_id: self.id.unwrap_or_else(|| requested_id.to_string()),
            display_name: self.display_name,
            primary_type: self.primary_type_display_name,
            formatted_address: self.formatted_address,
            location: self.location,
            business_status: self.business_status,
            map_url: self.google_maps_uri,
            opening_hours: self.current_opening_hours,
        }
    }
}

#[async_trait]
pub trait PlaceSearch: Send + Sync {
    /// Fetch a single page of text-search results.
    async fn search_page(
        &self,
        query: &str,
        page_size: u8,
        page_token: Option<&str>,
    ) -> AppResult<ResultPage>;

    async fn place_details(&self, place_id: &str, field_mask: &str) -> AppResult<PlaceDetails>;
}

#[derive(Clone)]
pub struct PlacesService {
    inner: Arc<dyn PlaceSearch>,
}

impl PlacesService {
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        let api_key = config.google_maps_api_key.clone().ok_or_else(|| {
            AppError::Config("GOOGLE_MAPS_API_KEY is not set; cannot reach the Places API".into())
        })?;
        let client = HttpPlacesClient::new(
            api_key,
            &config.places_api_base,
            &config.language_code,
            Duration::from_secs(config.http_timeout_secs),
        )?;
        Ok(Self {
            inner: Arc::new(client),
        })
    }

    pub fn from_search(search: Arc<dyn PlaceSearch>) -> Self {
        Self { inner: search }
    }

    pub async fn search_page(
        &self,
        query: &str,
        page_size: u8,
        page_token: Option<&str>,
    ) -> AppResult<ResultPage> {
        self.inner.search_page(query, page_size, page_token).await
    }

    pub async fn place_details(&self, place_id: &str, field_mask: &str) -> AppResult<PlaceDetails> {
        self.inner.place_details(place_id, field_mask).await
    }
}

pub struct HttpPlacesClient {
    http: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    language_code: String,
}

impl HttpPlacesClient {
    pub fn new(
        api_key: SecretString,
        base_url: &str,
        language_code: &str,
        timeout: Duration,
    ) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("place-curator/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            language_code: language_code.to_string(),
        })
    }

    fn details_url(&self, place_id: &str) -> AppResult<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|err| AppError::Config(format!("invalid Places API base: {err}")))?;
        url.path_segments_mut()
            .map_err(|_| AppError::Config("invalid Places API base".into()))?
            .push("places")
            .push(place_id);
        url.query_pairs_mut()
            .append_pair("languageCode", &self.language_code);
        Ok(url)
    }
}

async fn ensure_success(response: reqwest::Response) -> AppResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(AppError::Api {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl PlaceSearch for HttpPlacesClient {
    async fn search_page(
        &self,
        query: &str,
        page_size: u8,
        page_token: Option<&str>,
    ) -> AppResult<ResultPage> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct RequestBody<'a> {
            text_query: &'a str,
            language_code: &'a str,
            page_size: u8,
            #[serde(skip_serializing_if = "Option::is_none")]
            page_token: Option<&'a str>,
        }

        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Response {
            #[serde(default)]
            places: Vec<ApiPlace>,
            next_page_token: Option<String>,
        }

        let body = RequestBody {
            text_query: query,
            language_code: &self.language_code,
            page_size,
            page_token,
        };

        let response = self
            .http
            .post(format!("{}/places:searchText", self.base_url))
            .header("X-Goog-Api-Key", self.api_key.expose_secret())
            .header("X-Goog-FieldMask", SEARCH_FIELD_MASK)
            .json(&body)
            .send()
            .await?;
        let parsed: Response = ensure_success(response).await?.json().await?;

        let candidates: Vec<Candidate> = parsed
            .places
            .into_iter()
            .filter_map(ApiPlace::into_candidate)
            .collect();
        trace!(
            query,
            candidates = candidates.len(),
            has_next = parsed.next_page_token.is_some(),
            "places search page received"
        );
        Ok(ResultPage {
            candidates,
            next_page_token: parsed.next_page_token.filter(|token| !token.is_empty()),
        })
    }

    async fn place_details(&self, place_id: &str, field_mask: &str) -> AppResult<PlaceDetails> {
        let response = self
            .http
            .get(self.details_url(place_id)?)
            .header("X-Goog-Api-Key", self.api_key.expose_secret())
            .header("X-Goog-FieldMask", field_mask)
            .send()
            .await?;
        let parsed: ApiPlace = ensure_success(response).await?.json().await?;
        Ok(parsed.into_details(place_id))
    }
}
