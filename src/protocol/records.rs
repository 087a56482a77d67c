//! Undecoded answer payloads
//!
//! Concepts travel as generic [`ConceptRecord`]s tagged with a kind name; the
//! concept factory turns them into typed concepts on the driver side.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueRecord {
    Boolean(bool),
    Long(i64),
    Double(f64),
    String(String),
    /// Milliseconds since the Unix epoch, UTC
    DateTime(i64),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConceptRecord {
    pub kind: String,
    #[serde(default)]
    pub label: Option<String>,
    /// Relation type scoping a role label
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub iid: Option<String>,
    /// Type of a thing
    #[serde(default)]
    pub type_: Option<Box<ConceptRecord>>,
    #[serde(default)]
    pub value_type: Option<String>,
    #[serde(default)]
    pub value: Option<ValueRecord>,
    #[serde(default)]
    pub is_root: bool,
    #[serde(default)]
    pub is_abstract: bool,
    #[serde(default)]
    pub is_inferred: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplainableRecord {
    pub conjunction: String,
    pub id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipExplainableRecord {
    pub owner: String,
    pub attribute: String,
    pub explainable: ExplainableRecord,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplainablesRecord {
    #[serde(default)]
    pub relations: BTreeMap<String, ExplainableRecord>,
    #[serde(default)]
    pub attributes: BTreeMap<String, ExplainableRecord>,
    #[serde(default)]
    pub ownerships: Vec<OwnershipExplainableRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConceptMapRecord {
    pub concepts: BTreeMap<String, ConceptRecord>,
    #[serde(default)]
    pub explainables: ExplainablesRecord,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptMapGroupRecord {
    pub owner: ConceptRecord,
    pub concept_maps: Vec<ConceptMapRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueGroupRecord {
    pub owner: ConceptRecord,
    #[serde(default)]
    pub value: Option<ValueRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleRecord {
    pub label: String,
    pub when: String,
    pub then: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplanationRecord {
    pub rule: RuleRecord,
    pub conclusion: ConceptMapRecord,
    pub condition: ConceptMapRecord,
    pub variable_mapping: BTreeMap<String, Vec<String>>,
}

/// A single streamed answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerRecord {
    ConceptMap(ConceptMapRecord),
    ConceptMapGroup(ConceptMapGroupRecord),
    ValueGroup(ValueGroupRecord),
    /// Fetch documents are JSON text so that key order and number types
    /// survive the codec
    Json(String),
    Explanation(ExplanationRecord),
    Rule(RuleRecord),
}
