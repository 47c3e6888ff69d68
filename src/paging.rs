use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::errors::AppResult;
use crate::places::{PlacesService, ResultPage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagingPolicy {
    pub page_size: u8,
    pub max_pages: usize,
    pub attempts: u32,
    pub retry_interval: Duration,
    /// Wait before the first attempt of a continuation-token request.
    pub page_token_delay: Duration,
}

impl Default for PagingPolicy {
    fn default() -> Self {
        Self {
            page_size: 20,
            max_pages: 5,
            attempts: 3,
            retry_interval: Duration::from_secs(1),
            page_token_delay: Duration::from_secs(2),
        }
    }
}

/// Lazily fetched search results for one query.
///
/// Pages are cached once fetched; the cursor never requests a page twice and
/// never holds more than `max_pages` pages.
pub struct PageCursor {
    places: PlacesService,
    policy: PagingPolicy,
    query: String,
    pages: Vec<ResultPage>,
    exhausted: bool,
}

impl PageCursor {
    /// Fetches the first page. An error here is terminal for the whole search.
    pub async fn open(
        places: PlacesService,
        query: impl Into<String>,
        policy: PagingPolicy,
    ) -> AppResult<Self> {
        let query = query.into();
        let first = fetch_with_retry(&places, &policy, &query, None).await?;
        Ok(Self {
            places,
            policy,
            query,
            pages: vec![first],
            exhausted: false,
        })
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn page(&self, index: usize) -> Option<&ResultPage> {
        self.pages.get(index)
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Number of page requests that produced a page.
    pub fn fetch_count(&self) -> usize {
        self.pages.len()
    }

    pub fn total_candidates(&self) -> usize {
        self.pages.iter().map(ResultPage::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_candidates() == 0
    }

    pub fn can_fetch_more(&self) -> bool {
        !self.exhausted
            && self.pages.len() < self.policy.max_pages
            && self.next_token().is_some()
    }

    fn next_token(&self) -> Option<&str> {
        self.pages
            .last()
            .and_then(|page| page.next_page_token.as_deref())
    }

    /// Fetches the page after the last cached one.
    ///
    /// Returns `None` when no further page is available, either because the
    /// upstream has none, the cap was reached, or the fetch failed. A failed
    /// fetch exhausts the cursor; pages already cached stay browsable.
    pub async fn fetch_next(&mut self) -> Option<&ResultPage> {
        if !self.can_fetch_more() {
            return None;
        }
        let token = self.next_token()?.to_string();
        match fetch_with_retry(&self.places, &self.policy, &self.query, Some(&token)).await {
            Ok(page) => {
                self.pages.push(page);
                self.pages.last()
            }
            Err(err) => {
                warn!(
                    query = %self.query,
                    page = self.pages.len() + 1,
                    error = %err,
                    "giving up on further result pages"
                );
                self.exhausted = true;
                None
            }
        }
    }
}

async fn fetch_with_retry(
    places: &PlacesService,
    policy: &PagingPolicy,
    query: &str,
    page_token: Option<&str>,
) -> AppResult<ResultPage> {
    if page_token.is_some() {
        sleep(policy.page_token_delay).await;
    }
    let attempts = policy.attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match places
            .search_page(query, policy.page_size, page_token)
            .await
        {
            Ok(page) => {
                debug!(query, attempt, candidates = page.len(), "fetched result page");
                return Ok(page);
            }
            Err(err) if attempt < attempts => {
                warn!(
                    query,
                    attempt,
                    error = %err,
                    "places search failed; retrying after {:?}",
                    policy.retry_interval
                );
                sleep(policy.retry_interval).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use crate::errors::{AppError, AppResult};
    use crate::places::{
        BusinessStatus, Candidate, LocalizedText, PlaceDetails, PlaceSearch, PlacesService,
        ResultPage,
    };

    pub fn candidate(id: &str, status: BusinessStatus) -> Candidate {
        Candidate {
            place_id: id.to_string(),
            display_name: LocalizedText::new(format!("Place {id}")),
            primary_type: Some(LocalizedText::new("カフェ")),
            formatted_address: Some(format!("{id} street")),
            location: None,
            business_status: status,
            map_url: Some(format!("https://maps.google.com/?q={id}")),
        }
    }

    /// Build `count` pages of `per_page` candidates, chained by tokens.
    pub fn chained_pages(count: usize, per_page: usize) -> Vec<ResultPage> {
        (0..count)
            .map(|page| ResultPage {
                candidates: (0..per_page)
                    .map(|i| candidate(&format!("p{page}-{i}"), BusinessStatus::Operating))
                    .collect(),
                next_page_token: Some(format!("token-{}", page + 1)),
            })
            .collect()
    }

    /// Serves scripted responses in order and records every request.
    #[derive(Default)]
    pub struct ScriptedSearch {
        responses: Mutex<VecDeque<AppResult<ResultPage>>>,
        details: Mutex<VecDeque<AppResult<PlaceDetails>>>,
        pub requests: Mutex<Vec<Option<String>>>,
        pub detail_requests: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedSearch {
        pub fn with_pages(pages: Vec<AppResult<ResultPage>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(pages.into()),
                ..Self::default()
            })
        }

        pub fn with_details(details: Vec<AppResult<PlaceDetails>>) -> Arc<Self> {
            Arc::new(Self {
                details: Mutex::new(details.into()),
                ..Self::default()
            })
        }

        pub fn service(self: &Arc<Self>) -> PlacesService {
            PlacesService::from_search(Arc::clone(self) as Arc<dyn PlaceSearch>)
        }

        pub fn request_count(&self) -> usize {
            self.requests.lock().len()
        }
    }

    #[async_trait]
    impl PlaceSearch for ScriptedSearch {
        async fn search_page(
            &self,
            _query: &str,
            _page_size: u8,
            page_token: Option<&str>,
        ) -> AppResult<ResultPage> {
            self.requests.lock().push(page_token.map(str::to_string));
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(AppError::Config("no scripted page left".into())))
        }

        async fn place_details(
            &self,
            place_id: &str,
            field_mask: &str,
        ) -> AppResult<PlaceDetails> {
            self.detail_requests
                .lock()
                .push((place_id.to_string(), field_mask.to_string()));
            self.details
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(AppError::Config("no scripted details left".into())))
        }
    }

    pub fn api_error() -> AppError {
        AppError::Api {
            status: 500,
            body: "backend error".into(),
        }
    }
}
