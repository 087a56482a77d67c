use std::collections::BTreeMap;
use std::fmt;

use crate::error::{DriverError, Result};
use crate::protocol::{ExplanationRecord, RuleRecord};

use super::concept_map::ConceptMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub label: String,
    pub when: String,
    pub then: String,
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rule {}: when {{ {} }} then {{ {} }};", self.label, self.when, self.then)
    }
}

impl From<RuleRecord> for Rule {
    fn from(record: RuleRecord) -> Self {
        Self {
            label: record.label,
            when: record.when,
            then: record.then,
        }
    }
}

/// How one inferred fact follows from a rule
#[derive(Debug, Clone, PartialEq)]
pub struct Explanation {
    rule: Rule,
    conclusion: ConceptMap,
    condition: ConceptMap,
    variable_mapping: BTreeMap<String, Vec<String>>,
}

impl Explanation {
    pub fn rule(&self) -> &Rule {
        &self.rule
    }

    /// Answer of the rule's `then` clause
    pub fn conclusion(&self) -> &ConceptMap {
        &self.conclusion
    }

    /// Answer of the rule's `when` clause that triggered it
    pub fn condition(&self) -> &ConceptMap {
        &self.condition
    }

    pub fn query_variables(&self) -> impl Iterator<Item = &str> {
        self.variable_mapping.keys().map(String::as_str)
    }

    /// Rule variables that the query variable `variable` maps to
    pub fn query_variable_mapping(&self, variable: &str) -> Result<&[String]> {
        self.variable_mapping
            .get(variable)
            .map(Vec::as_slice)
            .ok_or_else(|| DriverError::VariableDoesNotExist(variable.to_string()))
    }

    pub(crate) fn from_record(record: ExplanationRecord) -> Result<Self> {
        Ok(Self {
            rule: record.rule.into(),
            conclusion: ConceptMap::from_record(record.conclusion)?,
            condition: ConceptMap::from_record(record.condition)?,
            variable_mapping: record.variable_mapping,
        })
    }
}
