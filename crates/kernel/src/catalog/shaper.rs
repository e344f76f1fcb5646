//! Response shaper.
//!
//! Turns a raw store hit into the record handed back to the HTTP layer:
//! promotes the id and sort tuple, strips internal bookkeeping fields, and
//! normalizes a couple of legacy numeric-vs-string year fields.

use serde_json::{Map, Value};

use crate::error::{AppError, AppResult};
use crate::rules::ProductType;
use crate::store::ProductHit;

/// Internal bookkeeping fields never exposed to callers.
const INTERNAL_FIELDS: [&str; 5] = [
    "_schemaVersion",
    "_sources",
    "_modifiedDate",
    "_createdDate",
    "_isSellable",
];

/// Product types whose `firstPublishedYear` is normalized to a string.
const YEAR_NORMALIZED_TYPES: [ProductType; 3] =
    [ProductType::Book, ProductType::Chapter, ProductType::Set];

/// Shape one hit for the response.
///
/// Fails with `InvalidRecord` when the hit carries no document (a null or
/// projected-away source must never reach the shaper).
pub fn shape(hit: &ProductHit, product_type: ProductType) -> AppResult<Value> {
    let Value::Object(source) = &hit.source else {
        return Err(AppError::InvalidRecord);
    };

    let mut record = Map::new();
    record.insert("id".to_string(), Value::String(hit.id.clone()));
    record.insert(
        "paginationAnchor".to_string(),
        Value::String(hit.anchor.encode()),
    );
    for (key, value) in source {
        record.insert(key.clone(), value.clone());
    }

    for field in INTERNAL_FIELDS {
        record.remove(field);
    }

    if YEAR_NORMALIZED_TYPES.contains(&product_type)
        && let Some(Value::Object(sub)) = record.get_mut(product_type.as_str())
    {
        if let Some(Value::Number(year)) = sub.get("firstPublishedYear") {
            let year = year.to_string();
            sub.insert("firstPublishedYear".to_string(), Value::String(year));
        }
        sub.remove("firstPublishedYearNumber");
    }

    Ok(Value::Object(record))
}

#[cfg(test)]
// Tests are allowed to use unwrap/expect freely.
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::SearchAnchor;
    use serde_json::json;

    fn hit(source: Value) -> ProductHit {
        ProductHit {
            id: "9781402014567".to_string(),
            anchor: SearchAnchor::new(42, "9781402014567"),
            source,
        }
    }

    #[test]
    fn promotes_id_and_anchor() {
        let shaped = shape(&hit(json!({"title": "A Book"})), ProductType::Book).unwrap();
        assert_eq!(shaped["id"], "9781402014567");
        assert_eq!(shaped["paginationAnchor"], "42_9781402014567");
        assert_eq!(shaped["title"], "A Book");
    }

    #[test]
    fn removes_exactly_the_bookkeeping_fields() {
        let shaped = shape(
            &hit(json!({
                "title": "A Book",
                "_schemaVersion": 4,
                "_sources": ["feed-a"],
                "_modifiedDate": "2024-01-01",
                "_createdDate": "2020-01-01",
                "_isSellable": true,
                "_customFlag": "stays"
            })),
            ProductType::Book,
        )
        .unwrap();

        for field in INTERNAL_FIELDS {
            assert!(shaped.get(field).is_none(), "{field} should be removed");
        }
        // Only the named fields go; anything else underscore-prefixed stays.
        assert_eq!(shaped["_customFlag"], "stays");
        assert_eq!(shaped["title"], "A Book");
    }

    #[test]
    fn normalizes_book_year_to_string() {
        let shaped = shape(
            &hit(json!({
                "book": {"firstPublishedYear": 2020, "firstPublishedYearNumber": 2020}
            })),
            ProductType::Book,
        )
        .unwrap();

        assert_eq!(shaped["book"]["firstPublishedYear"], "2020");
        assert!(shaped["book"].get("firstPublishedYearNumber").is_none());
    }

    #[test]
    fn normalizes_chapter_and_set_years() {
        for (product_type, key) in [(ProductType::Chapter, "chapter"), (ProductType::Set, "set")] {
            let shaped = shape(
                &hit(json!({key: {"firstPublishedYear": 1999}})),
                product_type,
            )
            .unwrap();
            assert_eq!(shaped[key]["firstPublishedYear"], "1999");
        }
    }

    #[test]
    fn leaves_other_types_untouched() {
        let shaped = shape(
            &hit(json!({
                "creativeWork": {"firstPublishedYear": 2020, "firstPublishedYearNumber": 2020}
            })),
            ProductType::CreativeWork,
        )
        .unwrap();

        assert_eq!(shaped["creativeWork"]["firstPublishedYear"], 2020);
        assert_eq!(shaped["creativeWork"]["firstPublishedYearNumber"], 2020);
    }

    #[test]
    fn already_string_year_passes_through() {
        let shaped = shape(
            &hit(json!({"book": {"firstPublishedYear": "2020"}})),
            ProductType::Book,
        )
        .unwrap();
        assert_eq!(shaped["book"]["firstPublishedYear"], "2020");
    }

    #[test]
    fn null_record_is_rejected() {
        assert!(matches!(
            shape(&hit(Value::Null), ProductType::Book),
            Err(AppError::InvalidRecord)
        ));
    }
}
