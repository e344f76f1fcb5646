//! Result paginator.
//!
//! Orchestrates the backend queries behind one paginated search call:
//! decodes the incoming cursor (or the last-page sentinel), issues the
//! primary relevance-ordered fetch, probes the opposite end of the result
//! set for the true page boundaries when no cursor carries them yet, fans
//! out the optional aggregates, and reconstructs the forward/backward
//! cursor tokens for the response.
//!
//! Canonical order is descending relevance. Backward walks and the
//! last-page path fetch ascending and reverse in place, so callers always
//! see forward order. Boundary ids are learned once — on the first-page or
//! sentinel request — and every later cursor carries them forward, which
//! keeps "is this the first/last page?" answerable without a count per page.

use std::sync::Arc;

use tracing::debug;

use crate::catalog::aggregate::{AggregateService, CountAggregate, PriceAggregate};
use crate::catalog::cursor::{LAST_PAGE_CURSOR, PageCursor};
use crate::error::{AppError, AppResult};
use crate::rules::SearchQuery;
use crate::store::{ProductHit, ProductStore, Projection, SearchAnchor, SearchRequest, SortOrder};

/// Pagination parameters for one search call.
#[derive(Debug, Clone)]
pub struct PageRequest {
    pub limit: u64,
    pub offset: Option<u64>,
    pub cursor: Option<String>,
    pub want_counts: bool,
    pub want_prices: bool,
}

/// One page of results plus navigation state.
#[derive(Debug)]
pub struct ProductPage {
    /// Records in canonical (forward relevance) order.
    pub hits: Vec<ProductHit>,
    pub counts: Option<Vec<CountAggregate>>,
    pub prices: Option<Vec<PriceAggregate>>,
    pub next_page_cursor: Option<String>,
    pub prev_page_cursor: Option<String>,
    /// Token for jumping straight to the final page; absent when this page
    /// already is the final page.
    pub last_page_cursor: Option<String>,
    pub is_first_page_reached: bool,
    pub is_last_page_reached: bool,
}

/// Service executing paginated product searches.
#[derive(Clone)]
pub struct SearchService {
    store: Arc<dyn ProductStore>,
    aggregates: AggregateService,
}

impl SearchService {
    pub fn new(store: Arc<dyn ProductStore>, aggregates: AggregateService) -> Self {
        Self { store, aggregates }
    }

    /// Execute one paginated search.
    pub async fn search_products(
        &self,
        queries: &[SearchQuery],
        page: &PageRequest,
    ) -> AppResult<ProductPage> {
        match queries {
            [] => {
                return Err(AppError::InvalidQuery(
                    "a compiled search query is required".to_string(),
                ));
            }
            [_] => {}
            _ => {
                return Err(AppError::InvalidQuery(
                    "exactly one product type is allowed for a paginated query".to_string(),
                ));
            }
        }
        if page.limit == 0 {
            return Err(AppError::InvalidQuery("limit must be positive".to_string()));
        }

        match page.cursor.as_deref() {
            None => self.first_page(queries, page).await,
            Some(LAST_PAGE_CURSOR) => self.last_page(queries, page).await,
            Some(token) => {
                let cursor = PageCursor::parse(token)?;
                self.cursor_page(queries, page, cursor).await
            }
        }
    }

    /// Cursor-less request: fetch from the top, probing the far end for the
    /// true last-page boundary (and, on an offset jump, the near end too).
    async fn first_page(
        &self,
        queries: &[SearchQuery],
        page: &PageRequest,
    ) -> AppResult<ProductPage> {
        let query = &queries[0];
        let offset = page.offset.unwrap_or(0);

        let fetch_req = page_fetch(query, SortOrder::Desc, page.limit, offset, None);
        let end_probe_req = boundary_probe(query, SortOrder::Asc);
        let start_probe_req = boundary_probe(query, SortOrder::Desc);

        let (hits, end_probe, start_probe, counts, prices) = tokio::join!(
            self.store.search(&fetch_req),
            self.store.search(&end_probe_req),
            async {
                if offset > 0 {
                    self.store.search(&start_probe_req).await.map(Some)
                } else {
                    Ok(None)
                }
            },
            self.maybe_counts(queries, page.want_counts),
            self.maybe_prices(queries, page.want_prices),
        );

        let hits = hits?;
        if hits.is_empty() {
            return Err(AppError::NotFound("Products not found.".to_string()));
        }
        let end_probe = end_probe?;
        let start_probe = start_probe?;
        let counts = counts?;
        let prices = prices?;

        let (first_id, first_anchor, last_id, last_anchor) = page_edges(&hits);

        // The probes run the same predicate as the fetch, so they only come
        // back empty under a concurrent delete; fall back to the page edge.
        let last_page_id = end_probe
            .first()
            .map(|h| h.id.clone())
            .unwrap_or_else(|| last_id.clone());
        let first_page_id = match &start_probe {
            Some(probe) => probe
                .first()
                .map(|h| h.id.clone())
                .unwrap_or_else(|| first_id.clone()),
            None => first_id.clone(),
        };

        let next = (last_id != last_page_id).then(|| {
            PageCursor {
                first_page_id: first_page_id.clone(),
                last_page_id: last_page_id.clone(),
                anchor: last_anchor,
                direction: SortOrder::Desc,
            }
            .encode()
        });
        // The very first page has nothing before it, whatever the ids say.
        let prev = (offset > 0 && first_id != first_page_id).then(|| {
            PageCursor {
                first_page_id,
                last_page_id,
                anchor: first_anchor,
                direction: SortOrder::Asc,
            }
            .encode()
        });

        Ok(assemble(hits, counts, prices, next, prev))
    }

    /// Sentinel request: count first to size the final partial page, then
    /// fetch from the end and restore canonical order.
    async fn last_page(
        &self,
        queries: &[SearchQuery],
        page: &PageRequest,
    ) -> AppResult<ProductPage> {
        let query = &queries[0];

        // The total determines the final page's size, so this count must
        // complete before the fetch.
        let total = self
            .store
            .count(query.product_type, &query.predicate)
            .await?;
        let effective_limit = effective_page_size(total, page.limit);
        debug!(total, effective_limit, "sizing final page");

        let fetch_req = page_fetch(query, SortOrder::Asc, effective_limit, 0, None);
        let start_probe_req = boundary_probe(query, SortOrder::Desc);

        let (hits, start_probe, counts, prices) = tokio::join!(
            self.store.search(&fetch_req),
            self.store.search(&start_probe_req),
            self.maybe_counts(queries, page.want_counts),
            self.maybe_prices(queries, page.want_prices),
        );

        let mut hits = hits?;
        if hits.is_empty() {
            return Err(AppError::NotFound("Products not found.".to_string()));
        }
        hits.reverse();
        let start_probe = start_probe?;
        let counts = counts?;
        let prices = prices?;

        let (first_id, first_anchor, last_id, _) = page_edges(&hits);
        let first_page_id = start_probe
            .first()
            .map(|h| h.id.clone())
            .unwrap_or_else(|| first_id.clone());

        // By construction this is the last page: no next cursor, and no
        // last-page token either.
        let prev = (first_id != first_page_id).then(|| {
            PageCursor {
                first_page_id,
                last_page_id: last_id,
                anchor: first_anchor,
                direction: SortOrder::Asc,
            }
            .encode()
        });

        Ok(assemble(hits, counts, prices, None, prev))
    }

    /// Cursored request: continue after the anchor in the cursor's
    /// direction, reusing the boundary ids it carries.
    async fn cursor_page(
        &self,
        queries: &[SearchQuery],
        page: &PageRequest,
        cursor: PageCursor,
    ) -> AppResult<ProductPage> {
        let query = &queries[0];

        let fetch_req = page_fetch(
            query,
            cursor.direction,
            page.limit,
            0,
            Some(cursor.anchor.clone()),
        );

        let (hits, counts, prices) = tokio::join!(
            self.store.search(&fetch_req),
            self.maybe_counts(queries, page.want_counts),
            self.maybe_prices(queries, page.want_prices),
        );

        let mut hits = hits?;
        if hits.is_empty() {
            return Err(AppError::NotFound("Products not found.".to_string()));
        }
        if cursor.direction == SortOrder::Asc {
            hits.reverse();
        }
        let counts = counts?;
        let prices = prices?;

        let (first_id, first_anchor, last_id, last_anchor) = page_edges(&hits);

        let next = (last_id != cursor.last_page_id).then(|| {
            PageCursor {
                first_page_id: cursor.first_page_id.clone(),
                last_page_id: cursor.last_page_id.clone(),
                anchor: last_anchor,
                direction: SortOrder::Desc,
            }
            .encode()
        });
        let prev = (first_id != cursor.first_page_id).then(|| {
            PageCursor {
                first_page_id: cursor.first_page_id.clone(),
                last_page_id: cursor.last_page_id.clone(),
                anchor: first_anchor,
                direction: SortOrder::Asc,
            }
            .encode()
        });

        Ok(assemble(hits, counts, prices, next, prev))
    }

    async fn maybe_counts(
        &self,
        queries: &[SearchQuery],
        want: bool,
    ) -> AppResult<Option<Vec<CountAggregate>>> {
        if want {
            self.aggregates.count_aggregate(queries).await.map(Some)
        } else {
            Ok(None)
        }
    }

    async fn maybe_prices(
        &self,
        queries: &[SearchQuery],
        want: bool,
    ) -> AppResult<Option<Vec<PriceAggregate>>> {
        if want {
            self.aggregates.price_aggregate(queries).await.map(Some)
        } else {
            Ok(None)
        }
    }
}

impl std::fmt::Debug for SearchService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchService").finish()
    }
}

/// Build the primary page fetch for a compiled query.
fn page_fetch(
    query: &SearchQuery,
    order: SortOrder,
    limit: u64,
    offset: u64,
    search_after: Option<SearchAnchor>,
) -> SearchRequest {
    let projection = if query.attributes.is_empty() {
        Projection::Full
    } else {
        Projection::Fields(query.attributes.clone())
    };
    SearchRequest {
        product_type: query.product_type,
        predicate: query.predicate.clone(),
        projection,
        order,
        limit,
        offset,
        search_after,
    }
}

/// Build a 1-record boundary probe projected to the sort tuple only.
fn boundary_probe(query: &SearchQuery, order: SortOrder) -> SearchRequest {
    SearchRequest {
        product_type: query.product_type,
        predicate: query.predicate.clone(),
        projection: Projection::IdOnly,
        order,
        limit: 1,
        offset: 0,
        search_after: None,
    }
}

/// Ids and anchors of the edge records of a non-empty page.
fn page_edges(hits: &[ProductHit]) -> (String, SearchAnchor, String, SearchAnchor) {
    let first = &hits[0];
    let last = &hits[hits.len() - 1];
    (
        first.id.clone(),
        first.anchor.clone(),
        last.id.clone(),
        last.anchor.clone(),
    )
}

/// Effective size of the final page: the division remainder, or a full page
/// when the total splits evenly.
fn effective_page_size(total: u64, limit: u64) -> u64 {
    match total % limit {
        0 => limit,
        remainder => remainder,
    }
}

fn assemble(
    hits: Vec<ProductHit>,
    counts: Option<Vec<CountAggregate>>,
    prices: Option<Vec<PriceAggregate>>,
    next: Option<String>,
    prev: Option<String>,
) -> ProductPage {
    let last_page_cursor = next.is_some().then(|| LAST_PAGE_CURSOR.to_string());
    ProductPage {
        is_first_page_reached: prev.is_none(),
        is_last_page_reached: next.is_none(),
        next_page_cursor: next,
        prev_page_cursor: prev,
        last_page_cursor,
        hits,
        counts,
        prices,
    }
}
