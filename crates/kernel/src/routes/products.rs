//! Product search route handlers.
//!
//! Three endpoints:
//! - `POST /api/products/query` — paginated search over one product type
//! - `POST /api/products/metadata` — aggregate-only counts/prices (multi-type)
//! - `GET /api/products/{type}/{id}` — exact-match lookup
//!
//! Request bodies are validated here, before the catalog core runs.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::catalog::aggregate::{CountAggregate, PriceAggregate, SearchMetadata};
use crate::catalog::availability::AvailabilityFilter;
use crate::catalog::paginator::PageRequest;
use crate::catalog::{availability, shaper};
use crate::error::{AppError, AppResult};
use crate::rules::{self, ProductQuery, ProductType};
use crate::state::AppState;

/// Computed attribute families the backend cannot project directly.
const DISALLOWED_PROJECTION_FAMILIES: [&str; 1] = ["associatedMedia"];

/// Create the products router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/products/query", post(query_products))
        .route("/api/products/metadata", post(product_metadata))
        .route("/api/products/{product_type}/{id}", get(product_by_id))
}

/// Product search request body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSearchBody {
    pub search_query: Vec<ProductQuery>,
    pub limit: u64,
    #[serde(default)]
    pub offset: Option<u64>,
    #[serde(default)]
    pub offset_cursor: Option<String>,
    #[serde(default)]
    pub availability: Option<AvailabilityFilter>,
    #[serde(default)]
    pub want_counts: bool,
    #[serde(default)]
    pub want_prices: bool,
    #[serde(default)]
    pub projected_fields: Vec<String>,
}

/// Paginated search response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProductSearchResponse {
    records: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    counts: Option<Vec<CountAggregate>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    prices: Option<Vec<PriceAggregate>>,
    next_page_cursor: Option<String>,
    prev_page_cursor: Option<String>,
    last_page_cursor: Option<String>,
    is_first_page_reached: bool,
    is_last_page_reached: bool,
}

/// Paginated product search.
async fn query_products(
    State(state): State<AppState>,
    Json(body): Json<ProductSearchBody>,
) -> AppResult<Json<ProductSearchResponse>> {
    validate_body(&body, state.max_page_size())?;
    if body.search_query.len() != 1 {
        return Err(AppError::InvalidQuery(
            "exactly one product type is allowed for a paginated query".to_string(),
        ));
    }

    let compiled = rules::compile(&body.search_query)?;
    let compiled = merge_projected_fields(compiled, &body.projected_fields);
    let compiled = availability::compose(compiled, body.availability.as_ref());
    let product_type = compiled[0].product_type;

    let page = state
        .search()
        .search_products(
            &compiled,
            &PageRequest {
                limit: body.limit,
                offset: body.offset,
                cursor: body.offset_cursor.clone(),
                want_counts: body.want_counts,
                want_prices: body.want_prices,
            },
        )
        .await?;

    let records = page
        .hits
        .iter()
        .map(|hit| shaper::shape(hit, product_type))
        .collect::<AppResult<Vec<_>>>()?;

    Ok(Json(ProductSearchResponse {
        records,
        counts: page.counts,
        prices: page.prices,
        next_page_cursor: page.next_page_cursor,
        prev_page_cursor: page.prev_page_cursor,
        last_page_cursor: page.last_page_cursor,
        is_first_page_reached: page.is_first_page_reached,
        is_last_page_reached: page.is_last_page_reached,
    }))
}

/// Aggregate-only counts/prices; multiple product types allowed.
async fn product_metadata(
    State(state): State<AppState>,
    Json(body): Json<ProductSearchBody>,
) -> AppResult<Json<SearchMetadata>> {
    validate_body(&body, state.max_page_size())?;

    let compiled = rules::compile(&body.search_query)?;
    let compiled = availability::compose(compiled, body.availability.as_ref());

    let metadata = state
        .aggregates()
        .search_metadata(&compiled, body.want_counts, body.want_prices)
        .await?;

    Ok(Json(metadata))
}

/// Exact-match lookup by product type and id.
async fn product_by_id(
    State(state): State<AppState>,
    Path((product_type, id)): Path<(String, String)>,
) -> AppResult<Json<Value>> {
    let product_type: ProductType = product_type.parse()?;

    let hit = state
        .store()
        .fetch_by_id(product_type, &id)
        .await?
        .ok_or_else(|| AppError::NotFound("Products not found.".to_string()))?;

    Ok(Json(shaper::shape(&hit, product_type)?))
}

/// Request-shape validation run before the core.
fn validate_body(body: &ProductSearchBody, max_page_size: u64) -> AppResult<()> {
    if body.search_query.is_empty() {
        return Err(AppError::InvalidQuery(
            "searchQuery must not be empty".to_string(),
        ));
    }

    if body.limit == 0 || body.limit > max_page_size {
        return Err(AppError::InvalidQuery(format!(
            "limit must be between 1 and {max_page_size}"
        )));
    }

    for (index, query) in body.search_query.iter().enumerate() {
        if body.search_query[..index]
            .iter()
            .any(|q| q.product_type == query.product_type)
        {
            return Err(AppError::InvalidQuery(format!(
                "duplicate product type: {}",
                query.product_type
            )));
        }

        // Grouped rule trees cannot be combined with an availability filter;
        // the composer assumes this case never reaches it.
        if body.availability.is_some() && rules::has_groups(&query.rules) {
            return Err(AppError::InvalidQuery(
                "availability filter cannot be combined with grouped rules".to_string(),
            ));
        }

        validate_projection(&query.attributes)?;
    }

    validate_projection(&body.projected_fields)?;

    Ok(())
}

/// Reject projections onto disallowed computed attribute families.
fn validate_projection(fields: &[String]) -> AppResult<()> {
    for field in fields {
        if !rules::is_valid_attribute_name(field) {
            return Err(AppError::InvalidQuery(format!(
                "projected field '{field}' contains invalid characters"
            )));
        }
        let family = field.split('.').next().unwrap_or(field);
        if DISALLOWED_PROJECTION_FAMILIES.contains(&family) {
            return Err(AppError::InvalidAttribute(format!(
                "'{field}' cannot be projected directly"
            )));
        }
    }
    Ok(())
}

/// Fold the request-level projected fields into each compiled query.
fn merge_projected_fields(
    mut compiled: Vec<rules::SearchQuery>,
    projected_fields: &[String],
) -> Vec<rules::SearchQuery> {
    for query in &mut compiled {
        for field in projected_fields {
            if !query.attributes.contains(field) {
                query.attributes.push(field.clone());
            }
        }
    }
    compiled
}
