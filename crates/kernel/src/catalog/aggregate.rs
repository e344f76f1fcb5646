//! Count and price aggregation across product types.
//!
//! Each requested type gets its own backend query; the per-type results are
//! fanned out concurrently and merged into request-level totals. The
//! metadata-only entry point always computes counts so a zero-match request
//! can fail with `NotFound` even when the caller did not ask for counts.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

use crate::error::{AppError, AppResult};
use crate::rules::SearchQuery;
use crate::store::{PriceBucket, PriceRules, ProductStore};

/// Synthetic type name for the summed count entry.
pub const TOTAL_COUNT_TYPE: &str = "Total";

/// Per-type match count; the list always ends with a `Total` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountAggregate {
    #[serde(rename = "type")]
    pub product_type: String,
    pub count: u64,
}

/// Summed prices for one `(currency, priceTypeCode)` pair across all
/// requested product types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceAggregate {
    pub currency: String,
    pub price_type: String,
    pub price_type_code: String,
    pub total_price: f64,
    pub matching_record_count: u64,
}

/// Result of a metadata-only (aggregate) request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchMetadata {
    pub counts: Option<Vec<CountAggregate>>,
    pub prices: Option<Vec<PriceAggregate>>,
}

/// Service computing count and price aggregates.
#[derive(Clone)]
pub struct AggregateService {
    store: Arc<dyn ProductStore>,
    price_rules: PriceRules,
}

impl AggregateService {
    pub fn new(store: Arc<dyn ProductStore>, price_rules: PriceRules) -> Self {
        Self { store, price_rules }
    }

    /// Count matches per type, appending the synthetic `Total` entry last.
    pub async fn count_aggregate(&self, queries: &[SearchQuery]) -> AppResult<Vec<CountAggregate>> {
        let mut tasks = JoinSet::new();
        for (index, query) in queries.iter().enumerate() {
            let store = Arc::clone(&self.store);
            let product_type = query.product_type;
            let predicate = query.predicate.clone();
            tasks.spawn(async move { (index, store.count(product_type, &predicate).await) });
        }

        let mut slots: Vec<Option<CountAggregate>> = (0..queries.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            let (index, result) = joined.map_err(anyhow::Error::from)?;
            slots[index] = Some(CountAggregate {
                product_type: queries[index].product_type.as_str().to_string(),
                count: result?,
            });
        }

        let mut counts: Vec<CountAggregate> = slots.into_iter().flatten().collect();
        let total = counts.iter().map(|c| c.count).sum();
        counts.push(CountAggregate {
            product_type: TOTAL_COUNT_TYPE.to_string(),
            count: total,
        });
        Ok(counts)
    }

    /// Aggregate prices per type and merge the buckets by
    /// `(currency, priceTypeCode)`.
    pub async fn price_aggregate(&self, queries: &[SearchQuery]) -> AppResult<Vec<PriceAggregate>> {
        let mut tasks = JoinSet::new();
        for (index, query) in queries.iter().enumerate() {
            let store = Arc::clone(&self.store);
            let product_type = query.product_type;
            let predicate = query.predicate.clone();
            let rules = self.price_rules.clone();
            tasks.spawn(async move {
                (
                    index,
                    store.price_buckets(product_type, &predicate, &rules).await,
                )
            });
        }

        // Merge in request order so the output is deterministic.
        let mut per_type: Vec<Vec<PriceBucket>> = vec![Vec::new(); queries.len()];
        while let Some(joined) = tasks.join_next().await {
            let (index, result) = joined.map_err(anyhow::Error::from)?;
            per_type[index] = result?;
        }

        Ok(merge_buckets(per_type.into_iter().flatten()))
    }

    /// Aggregate-only mode: counts are always computed (a zero total is the
    /// failure trigger) but only surfaced when requested; prices only when
    /// requested. No partial results on error.
    pub async fn search_metadata(
        &self,
        queries: &[SearchQuery],
        want_counts: bool,
        want_prices: bool,
    ) -> AppResult<SearchMetadata> {
        let (counts, prices) = tokio::join!(self.count_aggregate(queries), async {
            if want_prices {
                self.price_aggregate(queries).await.map(Some)
            } else {
                Ok(None)
            }
        });
        let counts = counts?;
        let prices = prices?;

        let total = counts.last().map_or(0, |c| c.count);
        if total == 0 {
            return Err(AppError::NotFound("Products not found.".to_string()));
        }

        Ok(SearchMetadata {
            counts: want_counts.then_some(counts),
            prices,
        })
    }
}

impl std::fmt::Debug for AggregateService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateService")
            .field("price_rules", &self.price_rules)
            .finish()
    }
}

/// Merge buckets sharing a `(currency, priceTypeCode)` pair by summing;
/// distinct pairs stay distinct entries.
fn merge_buckets(buckets: impl Iterator<Item = PriceBucket>) -> Vec<PriceAggregate> {
    let mut merged: Vec<PriceAggregate> = Vec::new();
    for bucket in buckets {
        let existing = merged.iter_mut().find(|a| {
            a.currency == bucket.currency && a.price_type_code == bucket.price_type_code
        });
        match existing {
            Some(aggregate) => {
                aggregate.total_price += bucket.total_price;
                aggregate.matching_record_count += bucket.matching_record_count;
            }
            None => merged.push(PriceAggregate {
                currency: bucket.currency,
                price_type: bucket.price_type,
                price_type_code: bucket.price_type_code,
                total_price: bucket.total_price,
                matching_record_count: bucket.matching_record_count,
            }),
        }
    }
    merged
}

#[cfg(test)]
// Tests are allowed to use unwrap/expect freely.
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn bucket(currency: &str, code: &str, total: f64, count: u64) -> PriceBucket {
        PriceBucket {
            currency: currency.to_string(),
            price_type: "Buy online".to_string(),
            price_type_code: code.to_string(),
            total_price: total,
            matching_record_count: count,
        }
    }

    #[test]
    fn overlapping_buckets_sum() {
        let merged = merge_buckets(
            vec![
                bucket("USD", "BYO", 100.0, 1),
                bucket("USD", "BYO", 50.0, 1),
                bucket("GBP", "BYO", 30.0, 1),
            ]
            .into_iter(),
        );

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].currency, "USD");
        assert_eq!(merged[0].total_price, 150.0);
        assert_eq!(merged[0].matching_record_count, 2);
        assert_eq!(merged[1].currency, "GBP");
        assert_eq!(merged[1].total_price, 30.0);
        assert_eq!(merged[1].matching_record_count, 1);
    }

    #[test]
    fn same_currency_different_code_stays_distinct() {
        let merged = merge_buckets(
            vec![bucket("USD", "BYO", 10.0, 1), bucket("USD", "SUB", 20.0, 1)].into_iter(),
        );
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn empty_input_merges_to_nothing() {
        assert!(merge_buckets(std::iter::empty()).is_empty());
    }

    #[test]
    fn count_aggregate_wire_format() {
        let entry = CountAggregate {
            product_type: "book".to_string(),
            count: 3,
        };
        assert_eq!(
            serde_json::to_string(&entry).unwrap(),
            r#"{"type":"book","count":3}"#
        );
    }

    #[test]
    fn price_aggregate_wire_format() {
        let entry = PriceAggregate {
            currency: "USD".to_string(),
            price_type: "Buy online".to_string(),
            price_type_code: "BYO".to_string(),
            total_price: 150.0,
            matching_record_count: 2,
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"priceTypeCode\":\"BYO\""));
        assert!(json.contains("\"totalPrice\":150.0"));
        assert!(json.contains("\"matchingRecordCount\":2"));
    }
}
