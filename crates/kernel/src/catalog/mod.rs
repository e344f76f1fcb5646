//! Catalog search core.
//!
//! This module owns the hard part of the service:
//! - availability: merges channel/status constraints into compiled queries
//! - cursor: opaque bidirectional page cursor tokens
//! - paginator: the cursor-based pagination state machine
//! - aggregate: per-type count and price aggregation
//! - shaper: raw store hit → response record

pub mod aggregate;
pub mod availability;
pub mod cursor;
pub mod paginator;
pub mod shaper;

#[allow(unused_imports)]
pub use aggregate::{AggregateService, CountAggregate, PriceAggregate, SearchMetadata};
#[allow(unused_imports)]
pub use availability::{AvailabilityFilter, AvailabilityRule, StatusMatch};
#[allow(unused_imports)]
pub use cursor::{LAST_PAGE_CURSOR, PageCursor};
#[allow(unused_imports)]
pub use paginator::{PageRequest, ProductPage, SearchService};
