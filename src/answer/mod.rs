//! Answers produced by queries

pub mod concept_map;
pub mod explanation;
pub mod group;
pub mod stream;

pub use concept_map::{ConceptMap, Explainable, Explainables};
pub use explanation::{Explanation, Rule};
pub use group::{ConceptMapGroup, ValueGroup};
pub use stream::ResultStream;
