//! Subscription matching: operator-tree filters and event-type lists

mod evaluator;
mod event_type;

pub(crate) use evaluator::lowercase_keys;
pub use evaluator::{matches, matches_headers, Condition, FilterTree, Operator};
pub use event_type::{type_matches, WILDCARD};
