//! Document store abstraction.
//!
//! The catalog core issues every backend read through the [`ProductStore`]
//! trait: relevance-ordered page fetches with search-after anchors, match
//! counts, price-bucket aggregations, and exact-match lookups. The Postgres
//! implementation lives in [`pg`]; tests substitute an in-memory store.

mod pg;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{AppError, AppResult};
use crate::rules::{Predicate, ProductType};

pub use pg::PgProductStore;

/// Sort direction for relevance ordering.
///
/// Canonical forward order is descending score; ascending fetches are used
/// for backward walks and the last-page path and are reversed before use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

impl std::str::FromStr for SortOrder {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(AppError::InvalidCursor(format!(
                "unknown sort direction: {other}"
            ))),
        }
    }
}

/// Backend search-after tuple: the relevance score and tiebreak id of a
/// record, serialized as `{score}_{id}` inside cursor tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchAnchor {
    pub score: i64,
    pub id: String,
}

impl SearchAnchor {
    pub fn new(score: i64, id: impl Into<String>) -> Self {
        Self { score, id: id.into() }
    }

    /// Serialize as an underscore-joined tuple.
    pub fn encode(&self) -> String {
        format!("{}_{}", self.score, self.id)
    }

    /// Parse an underscore-joined tuple, validating both fields.
    pub fn parse(input: &str) -> AppResult<Self> {
        let (score, id) = input.split_once('_').ok_or_else(|| {
            AppError::InvalidCursor("anchor must be a score_id tuple".to_string())
        })?;
        let score: i64 = score
            .parse()
            .map_err(|_| AppError::InvalidCursor("anchor score must be numeric".to_string()))?;
        if !is_valid_record_id(id) {
            return Err(AppError::InvalidCursor(format!(
                "invalid record id in anchor: {id}"
            )));
        }
        Ok(Self::new(score, id))
    }
}

/// Validate a record id for use inside cursor tokens.
///
/// Catalog ids (ISBNs, DOIs, issue numbers) use alphanumerics plus `.`, `-`
/// and `/`; underscores and colons would collide with the token delimiters.
pub fn is_valid_record_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '/')
}

/// Field projection applied to fetched documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    /// Return the full document.
    Full,
    /// Return only the listed top-level document fields.
    Fields(Vec<String>),
    /// Return no document at all; only the id and sort tuple. Used by the
    /// boundary-anchor probes.
    IdOnly,
}

/// One record returned by a page fetch.
#[derive(Debug, Clone)]
pub struct ProductHit {
    /// Tiebreak id (also the last element of the sort tuple).
    pub id: String,

    /// Sort tuple for search-after continuation.
    pub anchor: SearchAnchor,

    /// Document source; `Value::Null` under [`Projection::IdOnly`].
    pub source: Value,
}

/// A relevance-ordered page fetch.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub product_type: ProductType,
    pub predicate: Predicate,
    pub projection: Projection,
    pub order: SortOrder,
    pub limit: u64,
    pub offset: u64,
    pub search_after: Option<SearchAnchor>,
}

/// Eligible currencies and price type codes for price aggregation.
///
/// Injected at construction time rather than read from ambient
/// configuration mid-algorithm.
#[derive(Debug, Clone)]
pub struct PriceRules {
    pub currencies: Vec<String>,
    pub price_type_codes: Vec<String>,
}

/// One price aggregation bucket for a `(currency, priceTypeCode)` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceBucket {
    pub currency: String,
    pub price_type: String,
    pub price_type_code: String,
    pub total_price: f64,
    pub matching_record_count: u64,
}

/// Read-only document store the catalog core runs against.
#[async_trait]
pub trait ProductStore: Send + Sync {
    /// Fetch a page of records matching the predicate, in the requested
    /// relevance order, optionally continuing after an anchor tuple.
    async fn search(&self, request: &SearchRequest) -> AppResult<Vec<ProductHit>>;

    /// Count records matching the predicate.
    async fn count(&self, product_type: ProductType, predicate: &Predicate) -> AppResult<u64>;

    /// Bucket matching records' price sub-records by `(currency,
    /// priceTypeCode)`, restricted to the eligible lists in `rules`.
    async fn price_buckets(
        &self,
        product_type: ProductType,
        predicate: &Predicate,
        rules: &PriceRules,
    ) -> AppResult<Vec<PriceBucket>>;

    /// Exact-match lookup by record id.
    async fn fetch_by_id(
        &self,
        product_type: ProductType,
        id: &str,
    ) -> AppResult<Option<ProductHit>>;
}
