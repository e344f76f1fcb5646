//! Availability filter composer.
//!
//! Merges an optional availability constraint (distribution channel plus a
//! status set) into each compiled query's predicate. Every entry must be
//! satisfied by at least one element of the document's `availability` array;
//! different entries may be satisfied by different elements.
//!
//! Precondition: request validation rejects availability filters combined
//! with grouped rule trees, so the composer only ever sees flat predicates.

use serde::{Deserialize, Serialize};

use crate::rules::{CompareOp, Predicate, RuleValue, SearchQuery};

/// Availability constraint: one channel/status pair or an ordered list.
///
/// The single-vs-list decision is made once, here at the serde boundary,
/// rather than re-inspected at each call site.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AvailabilityFilter {
    Multiple(Vec<AvailabilityRule>),
    Single(AvailabilityRule),
}

/// One channel/status-set constraint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityRule {
    /// Distribution channel name.
    pub channel_name: String,

    /// Required statuses on that channel.
    pub status_match: StatusMatch,
}

/// Status matching mode; exactly one mode per entry.
///
/// Both modes execute as the backend's contains-all (superset) test — see
/// the design notes on the `IN` ambiguity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", content = "values")]
pub enum StatusMatch {
    #[serde(rename = "ALL")]
    All(Vec<String>),
    #[serde(rename = "IN")]
    In(Vec<String>),
}

impl StatusMatch {
    fn values(&self) -> &[String] {
        match self {
            StatusMatch::All(v) | StatusMatch::In(v) => v,
        }
    }
}

/// Conjoin the availability constraint with each query's predicate.
///
/// Returns the queries unchanged when no filter is supplied.
pub fn compose(queries: Vec<SearchQuery>, filter: Option<&AvailabilityFilter>) -> Vec<SearchQuery> {
    let Some(filter) = filter else {
        return queries;
    };

    let constraint = availability_predicate(filter);
    queries
        .into_iter()
        .map(|mut query| {
            query.predicate = conjoin(query.predicate, constraint.clone());
            query
        })
        .collect()
}

fn availability_predicate(filter: &AvailabilityFilter) -> Predicate {
    match filter {
        AvailabilityFilter::Single(rule) => entry_predicate(rule),
        AvailabilityFilter::Multiple(rules) => {
            Predicate::All(rules.iter().map(entry_predicate).collect())
        }
    }
}

/// One entry: some availability element carries the channel name and all of
/// the listed statuses.
fn entry_predicate(rule: &AvailabilityRule) -> Predicate {
    Predicate::Nested {
        path: "availability".to_string(),
        clauses: vec![
            Predicate::Compare {
                field: "channel".to_string(),
                op: CompareOp::Eq,
                value: RuleValue::String(rule.channel_name.clone()),
            },
            Predicate::ContainsAll {
                field: "statuses".to_string(),
                values: rule.status_match.values().to_vec(),
            },
        ],
    }
}

/// Append to an existing conjunction, or wrap both sides into a new one.
fn conjoin(existing: Predicate, constraint: Predicate) -> Predicate {
    match existing {
        Predicate::All(mut clauses) => {
            clauses.push(constraint);
            Predicate::All(clauses)
        }
        other => Predicate::All(vec![other, constraint]),
    }
}
