use super::{build_popular_endpoint, build_search_endpoint, build_trending_endpoint, with_page, TmdbClient};
use crate::error::CatalogError;
use crate::flight::{Flight, FlightKey, SingleFlight};
use crate::models::CatalogItem;
use parking_lot::Mutex;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowseMode {
    Trending,
    Popular,
    Search,
}

#[derive(Debug)]
struct BrowserState {
    items: Vec<CatalogItem>,
    page: u32,
    mode: BrowseMode,
    query: String,
}

/// Paged catalog listing: trending, popular or a search.
///
/// Every load shares one single-flight key, so a page request made while
/// another is pending is dropped rather than queued. A failed fetch leaves
/// items and page as they were.
pub struct CatalogBrowser {
    client: TmdbClient,
    state: Mutex<BrowserState>,
    flight: SingleFlight,
}

impl CatalogBrowser {
    pub fn new(client: TmdbClient) -> Self {
        Self {
            client,
            state: Mutex::new(BrowserState {
                items: Vec::new(),
                page: 1,
                mode: BrowseMode::Trending,
                query: String::new(),
            }),
            flight: SingleFlight::new(),
        }
    }

    pub fn items(&self) -> Vec<CatalogItem> {
        self.state.lock().items.clone()
    }

    pub fn page(&self) -> u32 {
        self.state.lock().page
    }

    pub fn mode(&self) -> BrowseMode {
        self.state.lock().mode
    }

    pub fn query(&self) -> String {
        self.state.lock().query.clone()
    }

    pub async fn load_trending(&self, reset: bool) -> Result<Flight<usize>, CatalogError> {
        self.load_listing(BrowseMode::Trending, build_trending_endpoint(), reset)
            .await
    }

    pub async fn load_popular(&self, reset: bool) -> Result<Flight<usize>, CatalogError> {
        self.load_listing(BrowseMode::Popular, build_popular_endpoint(), reset)
            .await
    }

    /// A blank query (after trimming) changes nothing and fetches nothing.
    /// Without `reset`, the previous query is continued.
    pub async fn search_shows(&self, query: &str, reset: bool) -> Result<Flight<usize>, CatalogError> {
        let Some(_guard) = self.flight.try_begin(FlightKey::CatalogPage) else {
            debug!("Catalog load already in flight, dropping search");
            return Ok(Flight::Dropped);
        };

        let (query, page) = {
            let state = self.state.lock();
            if reset {
                (query.to_string(), 1)
            } else {
                (state.query.clone(), state.page)
            }
        };

        let endpoint = build_search_endpoint(&query);
        if endpoint.is_empty() {
            debug!("Blank search query, skipping fetch");
            return Ok(Flight::Completed(0));
        }

        let list = self.fetch_page(&endpoint, page).await?;
        Ok(Flight::Completed(self.commit(list, reset, BrowseMode::Search, Some(query))))
    }

    pub async fn load_next(&self) -> Result<Flight<usize>, CatalogError> {
        match self.mode() {
            BrowseMode::Trending => self.load_trending(false).await,
            BrowseMode::Popular => self.load_popular(false).await,
            BrowseMode::Search => self.search_shows("", false).await,
        }
    }

    async fn load_listing(
        &self,
        mode: BrowseMode,
        endpoint: String,
        reset: bool,
    ) -> Result<Flight<usize>, CatalogError> {
        let Some(_guard) = self.flight.try_begin(FlightKey::CatalogPage) else {
            debug!("Catalog load already in flight, dropping {:?} load", mode);
            return Ok(Flight::Dropped);
        };

        let page = if reset { 1 } else { self.page() };
        let list = self.fetch_page(&endpoint, page).await?;
        Ok(Flight::Completed(self.commit(list, reset, mode, None)))
    }

    async fn fetch_page(&self, endpoint: &str, page: u32) -> Result<Vec<CatalogItem>, CatalogError> {
        self.client
            .fetch_list(&with_page(endpoint, page))
            .await
            .inspect_err(|e| error!("Failed to load catalog page {}: {}", page, e))
    }

    fn commit(
        &self,
        list: Vec<CatalogItem>,
        reset: bool,
        mode: BrowseMode,
        query: Option<String>,
    ) -> usize {
        let added = list.len();
        let mut state = self.state.lock();

        if reset {
            state.items = list;
            state.page = 2;
            state.mode = mode;
            state.query = query.unwrap_or_default();
        } else {
            state.items.extend(list);
            state.page += 1;
        }

        info!("Loaded {} {:?} items, next page {}", added, state.mode, state.page);
        added
    }
}
