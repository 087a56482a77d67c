use std::collections::BTreeMap;

use crate::concept::{Concept, ConceptFactory};
use crate::error::{DriverError, Result};
use crate::protocol::{ConceptMapRecord, ExplainableRecord, ExplainablesRecord};

/// Handle on an inferred fact that can be passed to
/// [`QueryManager::explain`](crate::QueryManager::explain)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Explainable {
    pub conjunction: String,
    pub id: i64,
}

impl From<ExplainableRecord> for Explainable {
    fn from(record: ExplainableRecord) -> Self {
        Self {
            conjunction: record.conjunction,
            id: record.id,
        }
    }
}

/// Explainable facts of one answer, keyed by the variables they bind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Explainables {
    relations: BTreeMap<String, Explainable>,
    attributes: BTreeMap<String, Explainable>,
    ownerships: BTreeMap<(String, String), Explainable>,
}

impl Explainables {
    pub fn relation(&self, variable: &str) -> Result<&Explainable> {
        self.relations
            .get(variable)
            .ok_or_else(|| DriverError::NonexistentExplainableConcept(variable.to_string()))
    }

    pub fn attribute(&self, variable: &str) -> Result<&Explainable> {
        self.attributes
            .get(variable)
            .ok_or_else(|| DriverError::NonexistentExplainableConcept(variable.to_string()))
    }

    pub fn ownership(&self, owner: &str, attribute: &str) -> Result<&Explainable> {
        self.ownerships
            .get(&(owner.to_string(), attribute.to_string()))
            .ok_or_else(|| DriverError::NonexistentExplainableOwnership {
                owner: owner.to_string(),
                attribute: attribute.to_string(),
            })
    }

    pub fn relations(&self) -> impl Iterator<Item = (&str, &Explainable)> {
        self.relations.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &Explainable)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// `((owner, attribute), explainable)` pairs
    pub fn ownerships(&self) -> impl Iterator<Item = ((&str, &str), &Explainable)> {
        self.ownerships
            .iter()
            .map(|((owner, attribute), v)| ((owner.as_str(), attribute.as_str()), v))
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty() && self.attributes.is_empty() && self.ownerships.is_empty()
    }

    pub(crate) fn from_record(record: ExplainablesRecord) -> Self {
        Self {
            relations: record
                .relations
                .into_iter()
                .map(|(var, e)| (var, e.into()))
                .collect(),
            attributes: record
                .attributes
                .into_iter()
                .map(|(var, e)| (var, e.into()))
                .collect(),
            ownerships: record
                .ownerships
                .into_iter()
                .map(|o| ((o.owner, o.attribute), o.explainable.into()))
                .collect(),
        }
    }
}

/// One row of a match answer: variable name to concept
#[derive(Debug, Clone, PartialEq)]
pub struct ConceptMap {
    concepts: BTreeMap<String, Concept>,
    explainables: Explainables,
}

impl ConceptMap {
    pub fn new(concepts: BTreeMap<String, Concept>, explainables: Explainables) -> Self {
        Self {
            concepts,
            explainables,
        }
    }

    /// Concept bound to `variable`, given without the leading `$`
    pub fn get(&self, variable: &str) -> Result<&Concept> {
        self.concepts
            .get(variable)
            .ok_or_else(|| DriverError::VariableDoesNotExist(variable.to_string()))
    }

    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.concepts.keys().map(String::as_str)
    }

    pub fn concepts(&self) -> impl Iterator<Item = &Concept> {
        self.concepts.values()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Concept)> {
        self.concepts.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.concepts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.concepts.is_empty()
    }

    pub fn explainables(&self) -> &Explainables {
        &self.explainables
    }

    pub(crate) fn from_record(record: ConceptMapRecord) -> Result<Self> {
        let concepts = record
            .concepts
            .into_iter()
            .map(|(var, concept)| Ok((var, ConceptFactory::decode(concept)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;
        Ok(Self {
            concepts,
            explainables: Explainables::from_record(record.explainables),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concept::EntityType;
    use crate::protocol::{ConceptRecord, OwnershipExplainableRecord};

    fn record() -> ConceptMapRecord {
        let mut concepts = BTreeMap::new();
        concepts.insert(
            "t".to_string(),
            ConceptRecord {
                kind: "entity_type".to_string(),
                label: Some("person".to_string()),
                ..Default::default()
            },
        );
        let mut explainables = ExplainablesRecord::default();
        explainables.ownerships.push(OwnershipExplainableRecord {
            owner: "x".to_string(),
            attribute: "n".to_string(),
            explainable: ExplainableRecord {
                conjunction: "{ $x isa person; }".to_string(),
                id: 7,
            },
        });
        ConceptMapRecord {
            concepts,
            explainables,
        }
    }

    #[test]
    fn test_lookup_by_variable() {
        let map = ConceptMap::from_record(record()).unwrap();

        assert_eq!(map.variables().collect::<Vec<_>>(), vec!["t"]);
        assert_eq!(map.get("t").unwrap().as_entity_type().unwrap(), &EntityType::new("person", false));
        assert_eq!(map.get("t").unwrap().as_type().unwrap().label(), "person");

        let err = map.get("x").unwrap_err();
        assert_eq!(err, DriverError::VariableDoesNotExist("x".to_string()));
    }

    #[test]
    fn test_explainable_lookups() {
        let map = ConceptMap::from_record(record()).unwrap();
        let explainables = map.explainables();

        assert_eq!(explainables.ownership("x", "n").unwrap().id, 7);
        assert!(matches!(
            explainables.ownership("x", "age"),
            Err(DriverError::NonexistentExplainableOwnership { .. })
        ));
        assert_eq!(
            explainables.relation("r").unwrap_err(),
            DriverError::NonexistentExplainableConcept("r".to_string())
        );
    }
}
