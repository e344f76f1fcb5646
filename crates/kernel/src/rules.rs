//! Rule compiler for catalog search requests.
//!
//! Translates the declarative rule trees that arrive on the wire into the
//! backend-neutral [`Predicate`] trees the document store executes:
//! - RuleNode: one condition or a nested and/or group
//! - compile: `(product type, rule tree, attributes)` → [`SearchQuery`]
//! - Predicate: the compiled filter, inspected only by the availability
//!   composer and rendered to SQL only by the store

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Product types the catalog serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProductType {
    Book,
    Chapter,
    Set,
    Journal,
    Article,
    Collection,
    CreativeWork,
    PublishingService,
}

impl ProductType {
    /// Wire name, also used as the document sub-object key.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductType::Book => "book",
            ProductType::Chapter => "chapter",
            ProductType::Set => "set",
            ProductType::Journal => "journal",
            ProductType::Article => "article",
            ProductType::Collection => "collection",
            ProductType::CreativeWork => "creativeWork",
            ProductType::PublishingService => "publishingService",
        }
    }
}

impl std::str::FromStr for ProductType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "book" => Ok(ProductType::Book),
            "chapter" => Ok(ProductType::Chapter),
            "set" => Ok(ProductType::Set),
            "journal" => Ok(ProductType::Journal),
            "article" => Ok(ProductType::Article),
            "collection" => Ok(ProductType::Collection),
            "creativeWork" => Ok(ProductType::CreativeWork),
            "publishingService" => Ok(ProductType::PublishingService),
            other => Err(AppError::InvalidQuery(format!(
                "unknown product type: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for ProductType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One per-type query as submitted by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductQuery {
    /// Product type this rule tree applies to.
    #[serde(rename = "type")]
    pub product_type: ProductType,

    /// Declarative filter rules; an empty list matches everything.
    #[serde(default)]
    pub rules: Vec<RuleNode>,

    /// Attributes to project into the response.
    #[serde(default)]
    pub attributes: Vec<String>,
}

/// A node in a rule tree: either a leaf condition or a nested group.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleNode {
    Group(RuleGroup),
    Condition(RuleCondition),
}

/// Nested group of rules combined with a boolean operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleGroup {
    /// How the group's sub-rules combine.
    pub operator: GroupOperator,

    /// Sub-rules; may themselves be groups.
    pub rules: Vec<RuleNode>,
}

/// Boolean combinator for rule groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupOperator {
    And,
    Or,
}

/// Leaf filter condition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleCondition {
    /// Document attribute the condition applies to (dots for nested paths).
    pub attribute: String,

    /// Comparison operator.
    pub operator: RuleOperator,

    /// Value to compare against.
    pub value: RuleValue,
}

/// Comparison operators for rule conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOperator {
    Equals,
    NotEquals,
    In,
    GreaterThan,
    LessThan,
    GreaterOrEqual,
    LessOrEqual,
    Contains,
    FullText,
}

/// Rule condition values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    List(Vec<RuleValue>),
}

impl RuleValue {
    /// Convert to a scalar string representation.
    pub fn as_string(&self) -> Option<String> {
        match self {
            RuleValue::String(s) => Some(s.clone()),
            RuleValue::Integer(i) => Some(i.to_string()),
            RuleValue::Float(f) => Some(f.to_string()),
            RuleValue::Boolean(b) => Some(b.to_string()),
            RuleValue::List(_) => None,
        }
    }

    /// Flatten to a list of scalar strings (for `in` conditions).
    pub fn as_string_list(&self) -> Vec<String> {
        match self {
            RuleValue::List(items) => items.iter().filter_map(|v| v.as_string()).collect(),
            other => other.as_string().map(|s| vec![s]).unwrap_or_default(),
        }
    }
}

/// Compiled filter predicate executed by the document store.
///
/// The availability composer inspects only the `All` form; everything else
/// is opaque until the store renders it.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Conjunction; an empty list matches everything.
    All(Vec<Predicate>),
    /// Disjunction.
    Any(Vec<Predicate>),
    /// Scalar comparison on a document attribute.
    Compare {
        field: String,
        op: CompareOp,
        value: RuleValue,
    },
    /// Attribute value is one of the listed values.
    In { field: String, values: Vec<String> },
    /// Full-text match against the search index.
    FullText { query: String },
    /// At least one element of the array at `path` satisfies every clause.
    Nested { path: String, clauses: Vec<Predicate> },
    /// The array attribute contains every listed value (superset test).
    ContainsAll { field: String, values: Vec<String> },
}

/// Scalar comparison operators in compiled predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
    Like,
}

/// One compiled query: the `(type, predicate, attributes)` triple handed to
/// the paginator and aggregate services.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub product_type: ProductType,
    pub predicate: Predicate,
    pub attributes: Vec<String>,
}

/// Compile caller rule trees into executable search queries.
pub fn compile(queries: &[ProductQuery]) -> AppResult<Vec<SearchQuery>> {
    queries
        .iter()
        .map(|q| {
            Ok(SearchQuery {
                product_type: q.product_type,
                predicate: compile_rules(&q.rules)?,
                attributes: q.attributes.clone(),
            })
        })
        .collect()
}

/// Whether any node in the rule list is a nested group.
///
/// Grouped trees cannot be combined with an availability filter; request
/// validation rejects that combination before compilation.
pub fn has_groups(rules: &[RuleNode]) -> bool {
    rules.iter().any(|r| matches!(r, RuleNode::Group(_)))
}

/// Compile a rule list. A single leaf compiles bare; anything else becomes
/// a conjunction so the availability composer can append to it.
fn compile_rules(rules: &[RuleNode]) -> AppResult<Predicate> {
    match rules {
        [RuleNode::Condition(cond)] => compile_condition(cond),
        _ => Ok(Predicate::All(
            rules.iter().map(compile_node).collect::<AppResult<_>>()?,
        )),
    }
}

fn compile_node(node: &RuleNode) -> AppResult<Predicate> {
    match node {
        RuleNode::Condition(cond) => compile_condition(cond),
        RuleNode::Group(group) => {
            let clauses = group
                .rules
                .iter()
                .map(compile_node)
                .collect::<AppResult<_>>()?;
            Ok(match group.operator {
                GroupOperator::And => Predicate::All(clauses),
                GroupOperator::Or => Predicate::Any(clauses),
            })
        }
    }
}

fn compile_condition(cond: &RuleCondition) -> AppResult<Predicate> {
    if !is_valid_attribute_name(&cond.attribute) {
        return Err(AppError::InvalidQuery(format!(
            "rule attribute '{}' contains invalid characters",
            cond.attribute
        )));
    }

    let field = cond.attribute.clone();
    match cond.operator {
        RuleOperator::Equals => scalar_predicate(field, CompareOp::Eq, &cond.value),
        RuleOperator::NotEquals => scalar_predicate(field, CompareOp::Ne, &cond.value),
        RuleOperator::GreaterThan => scalar_predicate(field, CompareOp::Gt, &cond.value),
        RuleOperator::LessThan => scalar_predicate(field, CompareOp::Lt, &cond.value),
        RuleOperator::GreaterOrEqual => scalar_predicate(field, CompareOp::Gte, &cond.value),
        RuleOperator::LessOrEqual => scalar_predicate(field, CompareOp::Lte, &cond.value),
        RuleOperator::Contains => scalar_predicate(field, CompareOp::Like, &cond.value),
        RuleOperator::In => {
            let values = cond.value.as_string_list();
            if values.is_empty() {
                return Err(AppError::InvalidQuery(format!(
                    "'in' rule on '{field}' requires a non-empty value list"
                )));
            }
            Ok(Predicate::In { field, values })
        }
        RuleOperator::FullText => {
            let query = cond.value.as_string().ok_or_else(|| {
                AppError::InvalidQuery(format!(
                    "full-text rule on '{field}' requires a string value"
                ))
            })?;
            Ok(Predicate::FullText { query })
        }
    }
}

fn scalar_predicate(field: String, op: CompareOp, value: &RuleValue) -> AppResult<Predicate> {
    if matches!(value, RuleValue::List(_)) {
        return Err(AppError::InvalidQuery(format!(
            "rule on '{field}' requires a scalar value"
        )));
    }
    Ok(Predicate::Compare {
        field,
        op,
        value: value.clone(),
    })
}

/// Validate an attribute name for use in queries.
///
/// Allows alphanumeric, underscores, and dots (for nested document paths).
/// Must be non-empty and start with a letter or underscore.
pub fn is_valid_attribute_name(name: &str) -> bool {
    let Some(first) = name.chars().next() else {
        return false;
    };
    if !first.is_ascii_alphabetic() && first != '_' {
        return false;
    }
    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}
