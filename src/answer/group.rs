use crate::concept::{Concept, ConceptFactory, Value};
use crate::error::Result;
use crate::protocol::{ConceptMapGroupRecord, ValueGroupRecord};

use super::concept_map::ConceptMap;

/// Answers of a `group` query that share the same owner
#[derive(Debug, Clone, PartialEq)]
pub struct ConceptMapGroup {
    owner: Concept,
    concept_maps: Vec<ConceptMap>,
}

impl ConceptMapGroup {
    pub fn owner(&self) -> &Concept {
        &self.owner
    }

    pub fn concept_maps(&self) -> &[ConceptMap] {
        &self.concept_maps
    }

    pub(crate) fn from_record(record: ConceptMapGroupRecord) -> Result<Self> {
        Ok(Self {
            owner: ConceptFactory::decode(record.owner)?,
            concept_maps: record
                .concept_maps
                .into_iter()
                .map(ConceptMap::from_record)
                .collect::<Result<_>>()?,
        })
    }
}

/// Aggregate computed per owner; empty when nothing was aggregated
#[derive(Debug, Clone, PartialEq)]
pub struct ValueGroup {
    owner: Concept,
    value: Option<Value>,
}

impl ValueGroup {
    pub fn owner(&self) -> &Concept {
        &self.owner
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub(crate) fn from_record(record: ValueGroupRecord) -> Result<Self> {
        Ok(Self {
            owner: ConceptFactory::decode(record.owner)?,
            value: record.value.map(Value::from_record).transpose()?,
        })
    }
}
