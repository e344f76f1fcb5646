//! PostgreSQL document store.
//!
//! Products live in a single `product` table: `id TEXT`, `type TEXT`,
//! `score BIGINT` (relevance rank), `doc JSONB`, and a generated
//! `search_vector` tsvector column with a GIN index. Predicates render to
//! SQL fragments over the JSONB document; page fetches use a `(score, id)`
//! row-tuple comparison for search-after continuation.

use async_trait::async_trait;
use sea_query::{Alias, Asterisk, Expr, ExprTrait, Order, PostgresQueryBuilder, Query};
use serde_json::Value;
use sqlx::PgPool;
use tracing::debug;

use crate::error::AppResult;
use crate::rules::{CompareOp, Predicate, ProductType, RuleValue};
use crate::store::{
    PriceBucket, PriceRules, ProductHit, ProductStore, Projection, SearchAnchor, SearchRequest,
    SortOrder,
};

/// Document store backed by PostgreSQL.
#[derive(Clone)]
pub struct PgProductStore {
    pool: PgPool,
}

impl PgProductStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: String,
    score: i64,
    doc: Option<Value>,
}

impl ProductRow {
    fn into_hit(self, projection: &Projection) -> ProductHit {
        let source = match (projection, self.doc) {
            (Projection::IdOnly, _) | (_, None) => Value::Null,
            (Projection::Full, Some(doc)) => doc,
            (Projection::Fields(fields), Some(doc)) => project_doc(doc, fields),
        };
        ProductHit {
            anchor: SearchAnchor::new(self.score, self.id.clone()),
            id: self.id,
            source,
        }
    }
}

#[async_trait]
impl ProductStore for PgProductStore {
    async fn search(&self, request: &SearchRequest) -> AppResult<Vec<ProductHit>> {
        let sql = build_search_sql(request);
        debug!(product_type = %request.product_type, limit = request.limit, "executing page fetch");

        let rows: Vec<ProductRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|r| r.into_hit(&request.projection))
            .collect())
    }

    async fn count(&self, product_type: ProductType, predicate: &Predicate) -> AppResult<u64> {
        let sql = build_count_sql(product_type, predicate);
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(count.max(0) as u64)
    }

    async fn price_buckets(
        &self,
        product_type: ProductType,
        predicate: &Predicate,
        rules: &PriceRules,
    ) -> AppResult<Vec<PriceBucket>> {
        // No eligible codes or currencies means no buckets can match.
        if rules.currencies.is_empty() || rules.price_type_codes.is_empty() {
            return Ok(Vec::new());
        }

        let sql = build_price_bucket_sql(product_type, predicate, rules);
        debug!(product_type = %product_type, "executing price aggregation");

        #[derive(sqlx::FromRow)]
        struct BucketRow {
            currency: String,
            price_type: Option<String>,
            price_type_code: String,
            total_price: f64,
            matching_record_count: i64,
        }

        let rows: Vec<BucketRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|r| PriceBucket {
                currency: r.currency,
                price_type: r.price_type.unwrap_or_default(),
                price_type_code: r.price_type_code,
                total_price: r.total_price,
                matching_record_count: r.matching_record_count.max(0) as u64,
            })
            .collect())
    }

    async fn fetch_by_id(
        &self,
        product_type: ProductType,
        id: &str,
    ) -> AppResult<Option<ProductHit>> {
        let row: Option<ProductRow> = sqlx::query_as(
            r#"SELECT id, score, doc FROM product WHERE "type" = $1 AND id = $2"#,
        )
        .bind(product_type.as_str())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into_hit(&Projection::Full)))
    }
}

/// Build the page-fetch SELECT.
fn build_search_sql(request: &SearchRequest) -> String {
    let mut query = Query::select();

    query.column(Alias::new("id")).column(Alias::new("score"));
    match request.projection {
        Projection::IdOnly => {
            // Boundary probes only need the sort tuple.
            query.expr_as(Expr::cust("NULL::jsonb"), Alias::new("doc"));
        }
        _ => {
            query.column(Alias::new("doc"));
        }
    }

    query.from(Alias::new("product"));
    query.and_where(Expr::col(Alias::new("type")).eq(request.product_type.as_str()));
    query.and_where(Expr::cust(predicate_sql(&request.predicate, "doc")));

    if let Some(anchor) = &request.search_after {
        let cmp = match request.order {
            SortOrder::Desc => "<",
            SortOrder::Asc => ">",
        };
        query.and_where(Expr::cust(format!(
            "(score, id) {cmp} ({}, {})",
            anchor.score,
            quote(&anchor.id)
        )));
    }

    let order = match request.order {
        SortOrder::Asc => Order::Asc,
        SortOrder::Desc => Order::Desc,
    };
    query.order_by(Alias::new("score"), order.clone());
    query.order_by(Alias::new("id"), order);

    query.limit(request.limit);
    if request.offset > 0 {
        query.offset(request.offset);
    }

    query.to_string(PostgresQueryBuilder)
}

/// Build the COUNT(*) query for a predicate.
fn build_count_sql(product_type: ProductType, predicate: &Predicate) -> String {
    let mut query = Query::select();
    query.expr(Expr::col(Asterisk).count());
    query.from(Alias::new("product"));
    query.and_where(Expr::col(Alias::new("type")).eq(product_type.as_str()));
    query.and_where(Expr::cust(predicate_sql(predicate, "doc")));
    query.to_string(PostgresQueryBuilder)
}

/// Build the price-bucket aggregation over the `prices` sub-records.
fn build_price_bucket_sql(
    product_type: ProductType,
    predicate: &Predicate,
    rules: &PriceRules,
) -> String {
    let codes = quote_list(&rules.price_type_codes);
    let currencies = quote_list(&rules.currencies);
    format!(
        "SELECT price.value->>'currency' AS currency, \
         MAX(price.value->>'priceType') AS price_type, \
         price.value->>'priceTypeCode' AS price_type_code, \
         SUM((price.value->>'price')::float8) AS total_price, \
         COUNT(DISTINCT product.id) AS matching_record_count \
         FROM product, jsonb_array_elements(doc->'prices') AS price \
         WHERE \"type\" = {} AND {} \
         AND price.value->>'priceTypeCode' IN ({codes}) \
         AND price.value->>'currency' IN ({currencies}) \
         GROUP BY price.value->>'currency', price.value->>'priceTypeCode' \
         ORDER BY price.value->>'currency', price.value->>'priceTypeCode'",
        quote(product_type.as_str()),
        predicate_sql(predicate, "doc"),
    )
}

/// Render a predicate as a SQL fragment against the given document column.
fn predicate_sql(predicate: &Predicate, doc: &str) -> String {
    match predicate {
        Predicate::All(clauses) => {
            if clauses.is_empty() {
                "TRUE".to_string()
            } else {
                let parts: Vec<String> = clauses.iter().map(|c| predicate_sql(c, doc)).collect();
                format!("({})", parts.join(" AND "))
            }
        }
        Predicate::Any(clauses) => {
            if clauses.is_empty() {
                "FALSE".to_string()
            } else {
                let parts: Vec<String> = clauses.iter().map(|c| predicate_sql(c, doc)).collect();
                format!("({})", parts.join(" OR "))
            }
        }
        Predicate::Compare { field, op, value } => compare_sql(doc, field, *op, value),
        Predicate::In { field, values } => {
            format!("{} IN ({})", text_expr(doc, field), quote_list(values))
        }
        Predicate::FullText { query } => full_text_sql(query),
        Predicate::Nested { path, clauses } => {
            let inner: Vec<String> = clauses
                .iter()
                .map(|c| predicate_sql(c, "entry.value"))
                .collect();
            let condition = if inner.is_empty() {
                "TRUE".to_string()
            } else {
                inner.join(" AND ")
            };
            format!(
                "EXISTS (SELECT 1 FROM jsonb_array_elements({doc}->{}) AS entry WHERE {condition})",
                quote(path)
            )
        }
        Predicate::ContainsAll { field, values } => {
            let json = Value::Array(values.iter().cloned().map(Value::String).collect());
            format!("{} @> {}::jsonb", json_expr(doc, field), quote(&json.to_string()))
        }
    }
}

/// Text extraction expression for a (possibly dotted) document path.
fn text_expr(doc: &str, field: &str) -> String {
    let parts: Vec<&str> = field.split('.').collect();
    let mut expr = doc.to_string();
    for (i, part) in parts.iter().enumerate() {
        let arrow = if i == parts.len() - 1 { "->>" } else { "->" };
        expr = format!("{expr}{arrow}{}", quote(part));
    }
    if parts.len() > 1 { format!("({expr})") } else { expr }
}

/// JSON extraction expression (keeps the value as jsonb).
fn json_expr(doc: &str, field: &str) -> String {
    let mut expr = doc.to_string();
    for part in field.split('.') {
        expr = format!("{expr}->{}", quote(part));
    }
    expr
}

fn compare_sql(doc: &str, field: &str, op: CompareOp, value: &RuleValue) -> String {
    let field_expr = text_expr(doc, field);
    let sql_op = match op {
        CompareOp::Eq => "=",
        CompareOp::Ne => "<>",
        CompareOp::Gt => ">",
        CompareOp::Lt => "<",
        CompareOp::Gte => ">=",
        CompareOp::Lte => "<=",
        CompareOp::Like => "LIKE",
    };

    match value {
        RuleValue::Integer(i) => format!("({field_expr})::numeric {sql_op} {i}"),
        RuleValue::Float(f) => format!("({field_expr})::numeric {sql_op} {f}"),
        RuleValue::Boolean(b) => format!("({field_expr})::boolean {sql_op} {b}"),
        RuleValue::String(s) => {
            if op == CompareOp::Like {
                format!(
                    "{field_expr} LIKE {}",
                    quote(&format!("%{}%", escape_like_wildcards(s)))
                )
            } else {
                format!("{field_expr} {sql_op} {}", quote(s))
            }
        }
        // Lists are rejected at compile time; render an impossible match
        // rather than widening results.
        RuleValue::List(_) => "FALSE".to_string(),
    }
}

/// Full-text search using the tsvector column.
///
/// Sanitize: keep only alphanumeric + spaces, then join terms with `&`.
fn full_text_sql(value: &str) -> String {
    let sanitized: String = value
        .chars()
        .map(|c| if c.is_alphanumeric() || c == ' ' { c } else { ' ' })
        .collect();
    let terms: Vec<&str> = sanitized.split_whitespace().collect();
    if terms.is_empty() {
        return "TRUE".to_string();
    }
    let tsquery = terms.join(" & ");
    format!("search_vector @@ to_tsquery('english', {})", quote(&tsquery))
}

/// Quote a string literal for SQL.
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn quote_list(values: &[String]) -> String {
    values
        .iter()
        .map(|v| quote(v))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Escape SQL LIKE wildcard characters (`%`, `_`, `\`) in a value.
fn escape_like_wildcards(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Keep only the requested top-level fields of a document.
fn project_doc(doc: Value, fields: &[String]) -> Value {
    match doc {
        Value::Object(mut map) => {
            map.retain(|key, _| fields.iter().any(|f| f == key || f.starts_with(&format!("{key}."))));
            Value::Object(map)
        }
        other => other,
    }
}

#[cfg(test)]
// Tests are allowed to use unwrap/expect freely.
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::Projection;
    use serde_json::json;

    fn request(predicate: Predicate) -> SearchRequest {
        SearchRequest {
            product_type: ProductType::Book,
            predicate,
            projection: Projection::Full,
            order: SortOrder::Desc,
            limit: 10,
            offset: 0,
            search_after: None,
        }
    }

    #[test]
    fn search_sql_basic_shape() {
        let sql = build_search_sql(&request(Predicate::All(vec![])));

        assert!(sql.contains("FROM \"product\""));
        assert!(sql.contains("\"type\" = 'book'"));
        assert!(sql.contains("ORDER BY \"score\" DESC, \"id\" DESC"));
        assert!(sql.contains("LIMIT 10"));
        assert!(!sql.contains("OFFSET"));
    }

    #[test]
    fn search_sql_keyset_continuation() {
        let mut req = request(Predicate::All(vec![]));
        req.search_after = Some(SearchAnchor::new(42, "9781402014567"));
        let sql = build_search_sql(&req);
        assert!(sql.contains("(score, id) < (42, '9781402014567')"), "{sql}");

        req.order = SortOrder::Asc;
        let sql = build_search_sql(&req);
        assert!(sql.contains("(score, id) > (42, '9781402014567')"), "{sql}");
        assert!(sql.contains("ORDER BY \"score\" ASC, \"id\" ASC"));
    }

    #[test]
    fn search_sql_id_only_projection() {
        let mut req = request(Predicate::All(vec![]));
        req.projection = Projection::IdOnly;
        req.limit = 1;
        let sql = build_search_sql(&req);
        assert!(sql.contains("NULL::jsonb"), "{sql}");
        assert!(sql.contains("LIMIT 1"));
    }

    #[test]
    fn compare_predicate_rendering() {
        let eq = Predicate::Compare {
            field: "publisherName".to_string(),
            op: CompareOp::Eq,
            value: RuleValue::String("O'Neill Press".to_string()),
        };
        assert_eq!(
            predicate_sql(&eq, "doc"),
            "doc->>'publisherName' = 'O''Neill Press'"
        );

        let gt = Predicate::Compare {
            field: "book.pages".to_string(),
            op: CompareOp::Gt,
            value: RuleValue::Integer(100),
        };
        assert_eq!(
            predicate_sql(&gt, "doc"),
            "((doc->'book'->>'pages'))::numeric > 100"
        );
    }

    #[test]
    fn in_predicate_rendering() {
        let p = Predicate::In {
            field: "language".to_string(),
            values: vec!["en".to_string(), "de".to_string()],
        };
        assert_eq!(predicate_sql(&p, "doc"), "doc->>'language' IN ('en', 'de')");
    }

    #[test]
    fn nested_predicate_renders_exists() {
        let p = Predicate::Nested {
            path: "availability".to_string(),
            clauses: vec![
                Predicate::Compare {
                    field: "channel".to_string(),
                    op: CompareOp::Eq,
                    value: RuleValue::String("web-shop".to_string()),
                },
                Predicate::ContainsAll {
                    field: "statuses".to_string(),
                    values: vec!["AVAILABLE".to_string(), "PREORDER".to_string()],
                },
            ],
        };
        let sql = predicate_sql(&p, "doc");
        assert!(
            sql.starts_with(
                "EXISTS (SELECT 1 FROM jsonb_array_elements(doc->'availability') AS entry WHERE "
            ),
            "{sql}"
        );
        assert!(sql.contains("entry.value->>'channel' = 'web-shop'"), "{sql}");
        assert!(
            sql.contains("entry.value->'statuses' @> '[\"AVAILABLE\",\"PREORDER\"]'::jsonb"),
            "{sql}"
        );
    }

    #[test]
    fn full_text_sanitizes_input() {
        let sql = full_text_sql("rust's | ! & (test)");
        assert!(sql.contains("to_tsquery('english', 'rust & s & test')"), "{sql}");
        assert_eq!(full_text_sql("!!!"), "TRUE");
    }

    #[test]
    fn like_wildcards_escaped() {
        let p = Predicate::Compare {
            field: "title".to_string(),
            op: CompareOp::Like,
            value: RuleValue::String("100%_done".to_string()),
        };
        let sql = predicate_sql(&p, "doc");
        assert!(sql.contains("LIKE '%100\\%\\_done%'"), "{sql}");
    }

    #[test]
    fn boolean_grouping() {
        let p = Predicate::Any(vec![
            Predicate::Compare {
                field: "language".to_string(),
                op: CompareOp::Eq,
                value: RuleValue::String("en".to_string()),
            },
            Predicate::Compare {
                field: "language".to_string(),
                op: CompareOp::Eq,
                value: RuleValue::String("de".to_string()),
            },
        ]);
        assert_eq!(
            predicate_sql(&p, "doc"),
            "(doc->>'language' = 'en' OR doc->>'language' = 'de')"
        );
        assert_eq!(predicate_sql(&Predicate::All(vec![]), "doc"), "TRUE");
        assert_eq!(predicate_sql(&Predicate::Any(vec![]), "doc"), "FALSE");
    }

    #[test]
    fn price_bucket_sql_shape() {
        let rules = PriceRules {
            currencies: vec!["USD".to_string(), "GBP".to_string()],
            price_type_codes: vec!["BYO".to_string()],
        };
        let sql = build_price_bucket_sql(ProductType::Book, &Predicate::All(vec![]), &rules);

        assert!(sql.contains("jsonb_array_elements(doc->'prices')"), "{sql}");
        assert!(sql.contains("GROUP BY price.value->>'currency', price.value->>'priceTypeCode'"));
        assert!(sql.contains("IN ('BYO')"));
        assert!(sql.contains("IN ('USD', 'GBP')"));
        assert!(sql.contains("COUNT(DISTINCT product.id)"));
    }

    #[test]
    fn count_sql_shape() {
        let sql = build_count_sql(ProductType::Journal, &Predicate::All(vec![]));
        assert!(sql.contains("COUNT(*)"));
        assert!(sql.contains("\"type\" = 'journal'"));
    }

    #[test]
    fn doc_projection_keeps_requested_fields() {
        let doc = json!({
            "title": "A Book",
            "book": {"isbn": "1"},
            "internal": true
        });
        let projected = project_doc(doc, &["title".to_string(), "book.isbn".to_string()]);
        assert_eq!(projected, json!({"title": "A Book", "book": {"isbn": "1"}}));
    }
}
