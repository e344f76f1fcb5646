//! Shared test fixtures: a deterministic in-memory document store.

#![allow(clippy::unwrap_used, clippy::expect_used)]
#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;

use colophon_kernel::error::AppResult;
use colophon_kernel::rules::{Predicate, ProductType};
use colophon_kernel::store::{
    PriceBucket, PriceRules, ProductHit, ProductStore, Projection, SearchAnchor, SearchRequest,
    SortOrder,
};

/// One stored product record.
#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub product_type: ProductType,
    pub id: String,
    pub score: i64,
    pub doc: Value,
}

/// Build a record with an empty document.
pub fn record(product_type: ProductType, id: &str, score: i64) -> StoredRecord {
    record_with_doc(product_type, id, score, serde_json::json!({}))
}

/// Build a record with the given document.
pub fn record_with_doc(
    product_type: ProductType,
    id: &str,
    score: i64,
    doc: Value,
) -> StoredRecord {
    StoredRecord {
        product_type,
        id: id.to_string(),
        score,
        doc,
    }
}

/// In-memory store with the same ordering and search-after semantics as the
/// Postgres implementation. Predicates are treated as match-all; the
/// pagination and aggregation logic under test never inspects them.
pub struct MemoryStore {
    records: Vec<StoredRecord>,
}

impl MemoryStore {
    pub fn new(records: Vec<StoredRecord>) -> Self {
        Self { records }
    }

    fn of_type(&self, product_type: ProductType) -> impl Iterator<Item = &StoredRecord> {
        self.records
            .iter()
            .filter(move |r| r.product_type == product_type)
    }
}

/// Lexicographic `(score, id)` comparison matching the SQL row comparison.
fn tuple_cmp(a: (i64, &str), b: (i64, &str)) -> std::cmp::Ordering {
    a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1))
}

#[async_trait]
impl ProductStore for MemoryStore {
    async fn search(&self, request: &SearchRequest) -> AppResult<Vec<ProductHit>> {
        let mut matches: Vec<&StoredRecord> = self.of_type(request.product_type).collect();

        matches.sort_by(|a, b| {
            let ordering = tuple_cmp((a.score, a.id.as_str()), (b.score, b.id.as_str()));
            match request.order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        });

        if let Some(anchor) = &request.search_after {
            matches.retain(|r| {
                let ordering =
                    tuple_cmp((r.score, r.id.as_str()), (anchor.score, anchor.id.as_str()));
                match request.order {
                    SortOrder::Asc => ordering.is_gt(),
                    SortOrder::Desc => ordering.is_lt(),
                }
            });
        }

        let hits = matches
            .into_iter()
            .skip(request.offset as usize)
            .take(request.limit as usize)
            .map(|r| {
                let source = match &request.projection {
                    Projection::IdOnly => Value::Null,
                    Projection::Full => r.doc.clone(),
                    Projection::Fields(fields) => match &r.doc {
                        Value::Object(map) => Value::Object(
                            map.iter()
                                .filter(|(key, _)| fields.iter().any(|f| {
                                    f == *key || f.starts_with(&format!("{key}."))
                                }))
                                .map(|(k, v)| (k.clone(), v.clone()))
                                .collect(),
                        ),
                        other => other.clone(),
                    },
                };
                ProductHit {
                    id: r.id.clone(),
                    anchor: SearchAnchor::new(r.score, r.id.clone()),
                    source,
                }
            })
            .collect();

        Ok(hits)
    }

    async fn count(&self, product_type: ProductType, _predicate: &Predicate) -> AppResult<u64> {
        Ok(self.of_type(product_type).count() as u64)
    }

    async fn price_buckets(
        &self,
        product_type: ProductType,
        _predicate: &Predicate,
        rules: &PriceRules,
    ) -> AppResult<Vec<PriceBucket>> {
        let mut buckets: Vec<PriceBucket> = Vec::new();

        for record in self.of_type(product_type) {
            let Some(prices) = record.doc.get("prices").and_then(Value::as_array) else {
                continue;
            };

            let mut counted_pairs: Vec<(String, String)> = Vec::new();
            for price in prices {
                let currency = price.get("currency").and_then(Value::as_str).unwrap_or("");
                let code = price
                    .get("priceTypeCode")
                    .and_then(Value::as_str)
                    .unwrap_or("");
                if !rules.currencies.iter().any(|c| c == currency)
                    || !rules.price_type_codes.iter().any(|c| c == code)
                {
                    continue;
                }

                let price_type = price
                    .get("priceType")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let amount = price.get("price").and_then(Value::as_f64).unwrap_or(0.0);

                let pair = (currency.to_string(), code.to_string());
                let first_for_record = !counted_pairs.contains(&pair);
                if first_for_record {
                    counted_pairs.push(pair.clone());
                }

                match buckets
                    .iter_mut()
                    .find(|b| b.currency == pair.0 && b.price_type_code == pair.1)
                {
                    Some(bucket) => {
                        bucket.total_price += amount;
                        if first_for_record {
                            bucket.matching_record_count += 1;
                        }
                    }
                    None => buckets.push(PriceBucket {
                        currency: pair.0,
                        price_type,
                        price_type_code: pair.1,
                        total_price: amount,
                        matching_record_count: 1,
                    }),
                }
            }
        }

        Ok(buckets)
    }

    async fn fetch_by_id(
        &self,
        product_type: ProductType,
        id: &str,
    ) -> AppResult<Option<ProductHit>> {
        Ok(self
            .of_type(product_type)
            .find(|r| r.id == id)
            .map(|r| ProductHit {
                id: r.id.clone(),
                anchor: SearchAnchor::new(r.score, r.id.clone()),
                source: r.doc.clone(),
            }))
    }
}
