//! Schema and data held by one database version

use std::collections::{BTreeMap, BTreeSet};

use crate::concept::{ConceptKind, Value, ValueType};
use crate::protocol::{ConceptRecord, ServerError, ServerErrorCode};

pub(crate) const THING: &str = "thing";
pub(crate) const ENTITY: &str = "entity";
pub(crate) const RELATION: &str = "relation";
pub(crate) const ATTRIBUTE: &str = "attribute";
pub(crate) const ROLE: &str = "role";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TypeKind {
    Entity,
    Relation,
    Attribute,
}

impl TypeKind {
    pub(crate) fn root(&self) -> &'static str {
        match self {
            TypeKind::Entity => ENTITY,
            TypeKind::Relation => RELATION,
            TypeKind::Attribute => ATTRIBUTE,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct TypeDef {
    pub label: String,
    pub kind: TypeKind,
    /// `None` for the entity, relation and attribute roots
    pub parent: Option<String>,
    pub is_abstract: bool,
    pub value_type: Option<ValueType>,
    pub owns: BTreeSet<String>,
    pub relates: BTreeSet<String>,
}

impl TypeDef {
    fn root(kind: TypeKind) -> Self {
        Self {
            label: kind.root().to_string(),
            kind,
            parent: None,
            is_abstract: true,
            value_type: (kind == TypeKind::Attribute).then_some(ValueType::Object),
            owns: BTreeSet::new(),
            relates: if kind == TypeKind::Relation {
                BTreeSet::from([ROLE.to_string()])
            } else {
                BTreeSet::new()
            },
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Thing {
    pub iid: String,
    pub type_label: String,
    pub value: Option<Value>,
    pub inferred: bool,
    /// Owned attribute iids; `Some(rule)` marks an ownership inferred by that rule
    pub has: BTreeMap<String, Option<String>>,
}

/// `rule label: when { $x isa premise; } then { $x has attribute value; };`
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RuleDef {
    pub label: String,
    pub premise: String,
    pub attribute: String,
    pub value: Value,
}

impl RuleDef {
    pub(crate) fn when_text(&self) -> String {
        format!("$x isa {};", self.premise)
    }

    pub(crate) fn then_text(&self) -> String {
        format!("$x has {} {};", self.attribute, literal(&self.value))
    }
}

/// Render a value the way the query language spells it
pub(crate) fn literal(value: &Value) -> String {
    match value {
        Value::String(s) => format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
        Value::DateTime(dt) => dt.format("%Y-%m-%dT%H:%M:%S%.3f").to_string(),
        other => other.to_string(),
    }
}

pub(crate) fn schema_error(message: impl Into<String>) -> ServerError {
    ServerError::new(ServerErrorCode::SchemaViolation, message)
}

#[derive(Debug, Clone)]
pub(crate) struct Graph {
    types: BTreeMap<String, TypeDef>,
    things: BTreeMap<String, Thing>,
    rules: BTreeMap<String, RuleDef>,
    next_iid: u64,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub(crate) fn new() -> Self {
        let types = [TypeKind::Entity, TypeKind::Relation, TypeKind::Attribute]
            .into_iter()
            .map(|kind| (kind.root().to_string(), TypeDef::root(kind)))
            .collect();
        Self {
            types,
            things: BTreeMap::new(),
            rules: BTreeMap::new(),
            next_iid: 1,
        }
    }

    // ==================== Schema ====================

    pub(crate) fn type_def(&self, label: &str) -> Result<&TypeDef, ServerError> {
        self.types.get(label).ok_or_else(|| {
            ServerError::new(
                ServerErrorCode::TypeNotFound,
                format!("Type '{}' does not exist", label),
            )
        })
    }

    pub(crate) fn type_def_mut(&mut self, label: &str) -> Result<&mut TypeDef, ServerError> {
        self.types.get_mut(label).ok_or_else(|| {
            ServerError::new(
                ServerErrorCode::TypeNotFound,
                format!("Type '{}' does not exist", label),
            )
        })
    }

    pub(crate) fn contains_type(&self, label: &str) -> bool {
        label == THING || self.types.contains_key(label)
    }

    pub(crate) fn insert_type(&mut self, def: TypeDef) {
        self.types.insert(def.label.clone(), def);
    }

    pub(crate) fn remove_type(&mut self, label: &str) -> Result<(), ServerError> {
        let def = self.type_def(label)?;
        if def.parent.is_none() {
            return Err(schema_error(format!("Root type '{}' cannot be undefined", label)));
        }
        if self.types.values().any(|t| t.parent.as_deref() == Some(label)) {
            return Err(schema_error(format!("Type '{}' has subtypes", label)));
        }
        if self.things.values().any(|t| t.type_label == label) {
            return Err(schema_error(format!("Type '{}' has instances", label)));
        }
        if self.rules.values().any(|r| r.premise == label || r.attribute == label) {
            return Err(schema_error(format!("Type '{}' is used by a rule", label)));
        }
        self.types.remove(label);
        for other in self.types.values_mut() {
            other.owns.remove(label);
        }
        Ok(())
    }

    /// `label` followed by its supertypes, nearest first, ending at its root
    pub(crate) fn supertypes(&self, label: &str) -> Vec<&TypeDef> {
        let mut chain = Vec::new();
        let mut current = self.types.get(label);
        while let Some(def) = current {
            chain.push(def);
            current = def.parent.as_deref().and_then(|p| self.types.get(p));
        }
        chain
    }

    pub(crate) fn is_subtype(&self, label: &str, ancestor: &str) -> bool {
        if ancestor == THING {
            return self.contains_type(label);
        }
        self.supertypes(label).iter().any(|t| t.label == ancestor)
    }

    /// `ancestor` and every type below it; `thing` comes first when included
    pub(crate) fn subtypes(&self, ancestor: &str) -> Vec<String> {
        let mut labels = Vec::new();
        if ancestor == THING {
            labels.push(THING.to_string());
        }
        labels.extend(
            self.types
                .keys()
                .filter(|label| self.is_subtype(label, ancestor))
                .cloned(),
        );
        labels
    }

    pub(crate) fn value_type(&self, label: &str) -> Option<ValueType> {
        self.supertypes(label).iter().find_map(|t| t.value_type)
    }

    /// Whether instances of `owner` may own instances of `attribute`
    pub(crate) fn can_own(&self, owner: &str, attribute: &str) -> bool {
        let attribute_chain: Vec<&str> = self
            .supertypes(attribute)
            .iter()
            .map(|t| t.label.as_str())
            .collect();
        self.supertypes(owner)
            .iter()
            .any(|t| t.owns.iter().any(|a| attribute_chain.contains(&a.as_str())))
    }

    /// Every role as `(relation type, role name)`
    pub(crate) fn roles(&self) -> Vec<(String, String)> {
        self.types
            .values()
            .filter(|t| t.kind == TypeKind::Relation)
            .flat_map(|t| t.relates.iter().map(move |r| (t.label.clone(), r.clone())))
            .collect()
    }

    pub(crate) fn rules(&self) -> impl Iterator<Item = &RuleDef> {
        self.rules.values()
    }

    pub(crate) fn rule(&self, label: &str) -> Option<&RuleDef> {
        self.rules.get(label)
    }

    pub(crate) fn insert_rule(&mut self, rule: RuleDef) {
        self.rules.insert(rule.label.clone(), rule);
    }

    pub(crate) fn remove_rule(&mut self, label: &str) -> Result<(), ServerError> {
        self.rules
            .remove(label)
            .map(|_| ())
            .ok_or_else(|| schema_error(format!("Rule '{}' does not exist", label)))
    }

    /// Schema as define statements, supertypes before subtypes
    pub(crate) fn schema_text(&self) -> String {
        let mut lines = vec!["define".to_string()];
        let mut user_types: Vec<&TypeDef> =
            self.types.values().filter(|t| t.parent.is_some()).collect();
        user_types.sort_by_key(|t| (self.supertypes(&t.label).len(), t.label.clone()));

        for def in user_types {
            let mut clauses = vec![format!("sub {}", def.parent.as_deref().unwrap_or(THING))];
            if def.is_abstract {
                clauses.push("abstract".to_string());
            }
            if let Some(value_type) = def.value_type {
                clauses.push(format!("value {}", value_type));
            }
            clauses.extend(def.owns.iter().map(|a| format!("owns {}", a)));
            clauses.extend(def.relates.iter().map(|r| format!("relates {}", r)));
            lines.push(format!("{} {};", def.label, clauses.join(", ")));
        }
        for rule in self.rules.values() {
            lines.push(format!(
                "rule {}: when {{ {} }} then {{ {} }};",
                rule.label,
                rule.when_text(),
                rule.then_text()
            ));
        }
        lines.join("\n")
    }

    // ==================== Data ====================

    pub(crate) fn thing(&self, iid: &str) -> Result<&Thing, ServerError> {
        self.things.get(iid).ok_or_else(|| {
            ServerError::new(
                ServerErrorCode::Internal,
                format!("Thing '{}' does not exist", iid),
            )
        })
    }

    pub(crate) fn things(&self) -> impl Iterator<Item = &Thing> {
        self.things.values()
    }

    fn allocate_iid(&mut self) -> String {
        let iid = format!("0x{:016x}", self.next_iid);
        self.next_iid += 1;
        iid
    }

    /// Insert an instance of `type_label`. Attributes are unique per type
    /// and value, so inserting an existing one returns its iid.
    pub(crate) fn insert_thing(
        &mut self,
        type_label: &str,
        value: Option<Value>,
        inferred: bool,
    ) -> Result<String, ServerError> {
        let def = self.type_def(type_label)?;
        if def.is_abstract {
            return Err(schema_error(format!("Type '{}' is abstract", type_label)));
        }
        let kind = def.kind;

        let value = match (kind, value) {
            (TypeKind::Attribute, Some(value)) => {
                let expected = self.value_type(type_label);
                if expected != Some(value.value_type()) {
                    return Err(schema_error(format!(
                        "Attribute '{}' expects {} values, got {}",
                        type_label,
                        expected.unwrap_or(ValueType::Object),
                        value.value_type()
                    )));
                }
                if let Some(existing) = self
                    .things
                    .values()
                    .find(|t| t.type_label == type_label && t.value.as_ref() == Some(&value))
                {
                    return Ok(existing.iid.clone());
                }
                Some(value)
            }
            (TypeKind::Attribute, None) => {
                return Err(schema_error(format!(
                    "Attribute '{}' needs a value",
                    type_label
                )))
            }
            (_, Some(_)) => {
                return Err(schema_error(format!(
                    "Type '{}' cannot hold a value",
                    type_label
                )))
            }
            (_, None) => None,
        };

        let iid = self.allocate_iid();
        self.things.insert(
            iid.clone(),
            Thing {
                iid: iid.clone(),
                type_label: type_label.to_string(),
                value,
                inferred,
                has: BTreeMap::new(),
            },
        );
        Ok(iid)
    }

    pub(crate) fn add_ownership(
        &mut self,
        owner: &str,
        attribute: &str,
        rule: Option<String>,
    ) -> Result<(), ServerError> {
        let attribute_type = self.thing(attribute)?.type_label.clone();
        let owner_type = self.thing(owner)?.type_label.clone();
        if self.type_def(&attribute_type)?.kind != TypeKind::Attribute {
            return Err(schema_error(format!("'{}' is not an attribute type", attribute_type)));
        }
        if !self.can_own(&owner_type, &attribute_type) {
            return Err(schema_error(format!(
                "Type '{}' does not own '{}'",
                owner_type, attribute_type
            )));
        }
        if let Some(thing) = self.things.get_mut(owner) {
            // A stored ownership is never downgraded to an inferred one
            thing.has.entry(attribute.to_string()).or_insert(rule);
        }
        Ok(())
    }

    pub(crate) fn remove_ownership(&mut self, owner: &str, attribute: &str) -> bool {
        self.things
            .get_mut(owner)
            .map(|thing| thing.has.remove(attribute).is_some())
            .unwrap_or(false)
    }

    pub(crate) fn delete_thing(&mut self, iid: &str) -> bool {
        if self.things.remove(iid).is_none() {
            return false;
        }
        for thing in self.things.values_mut() {
            thing.has.remove(iid);
        }
        true
    }

    /// Copy of this graph with every rule conclusion materialised
    pub(crate) fn with_inferences(&self) -> Graph {
        let mut view = self.clone();
        let rules: Vec<RuleDef> = self.rules.values().cloned().collect();
        for rule in rules {
            let owners: Vec<String> = view
                .things
                .values()
                .filter(|t| !t.inferred && view.is_subtype(&t.type_label, &rule.premise))
                .map(|t| t.iid.clone())
                .collect();
            if owners.is_empty() {
                continue;
            }
            let existing = view
                .things
                .values()
                .find(|t| t.type_label == rule.attribute && t.value.as_ref() == Some(&rule.value))
                .map(|t| t.iid.clone());
            let attribute = match existing {
                Some(iid) => iid,
                None => match view.insert_thing(&rule.attribute, Some(rule.value.clone()), true) {
                    Ok(iid) => iid,
                    Err(e) => {
                        tracing::debug!("Rule {} cannot conclude: {}", rule.label, e);
                        continue;
                    }
                },
            };
            for owner in owners {
                if let Err(e) = view.add_ownership(&owner, &attribute, Some(rule.label.clone())) {
                    tracing::debug!("Rule {} skipped {}: {}", rule.label, owner, e);
                }
            }
        }
        view
    }

    // ==================== Records ====================

    pub(crate) fn type_record(&self, label: &str) -> ConceptRecord {
        if label == THING {
            return ConceptRecord {
                kind: ConceptKind::ThingType.tag().to_string(),
                label: Some(THING.to_string()),
                is_root: true,
                is_abstract: true,
                ..Default::default()
            };
        }
        let Some(def) = self.types.get(label) else {
            return ConceptRecord {
                kind: ConceptKind::ThingType.tag().to_string(),
                label: Some(label.to_string()),
                ..Default::default()
            };
        };
        let kind = match def.kind {
            TypeKind::Entity => ConceptKind::EntityType,
            TypeKind::Relation => ConceptKind::RelationType,
            TypeKind::Attribute => ConceptKind::AttributeType,
        };
        ConceptRecord {
            kind: kind.tag().to_string(),
            label: Some(def.label.clone()),
            value_type: (def.kind == TypeKind::Attribute)
                .then(|| self.value_type(label).unwrap_or(ValueType::Object).name().to_string()),
            is_root: def.parent.is_none(),
            is_abstract: def.is_abstract,
            ..Default::default()
        }
    }

    pub(crate) fn role_record(&self, scope: &str, name: &str) -> ConceptRecord {
        ConceptRecord {
            kind: ConceptKind::RoleType.tag().to_string(),
            label: Some(name.to_string()),
            scope: Some(scope.to_string()),
            is_root: scope == RELATION && name == ROLE,
            is_abstract: scope == RELATION && name == ROLE,
            ..Default::default()
        }
    }

    pub(crate) fn thing_record(&self, iid: &str) -> Result<ConceptRecord, ServerError> {
        let thing = self.thing(iid)?;
        let def = self.type_def(&thing.type_label)?;
        let kind = match def.kind {
            TypeKind::Entity => ConceptKind::Entity,
            TypeKind::Relation => ConceptKind::Relation,
            TypeKind::Attribute => ConceptKind::Attribute,
        };
        Ok(ConceptRecord {
            kind: kind.tag().to_string(),
            iid: Some(thing.iid.clone()),
            type_: Some(Box::new(self.type_record(&thing.type_label))),
            value: thing.value.as_ref().map(Value::to_record),
            is_inferred: thing.inferred,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Graph {
        let mut graph = Graph::new();
        graph.insert_type(TypeDef {
            label: "name".to_string(),
            kind: TypeKind::Attribute,
            parent: Some(ATTRIBUTE.to_string()),
            is_abstract: false,
            value_type: Some(ValueType::String),
            owns: BTreeSet::new(),
            relates: BTreeSet::new(),
        });
        graph.insert_type(TypeDef {
            label: "person".to_string(),
            kind: TypeKind::Entity,
            parent: Some(ENTITY.to_string()),
            is_abstract: false,
            value_type: None,
            owns: BTreeSet::from(["name".to_string()]),
            relates: BTreeSet::new(),
        });
        graph
    }

    #[test]
    fn test_subtypes_of_thing() {
        let graph = schema();
        assert_eq!(
            graph.subtypes(THING),
            vec!["thing", "attribute", "entity", "name", "person", "relation"]
        );
        assert!(graph.is_subtype("person", ENTITY));
        assert!(!graph.is_subtype("person", ATTRIBUTE));
    }

    #[test]
    fn test_attributes_are_unique_per_value() {
        let mut graph = schema();
        let a = graph.insert_thing("name", Some(Value::from("Alice")), false).unwrap();
        let b = graph.insert_thing("name", Some(Value::from("Alice")), false).unwrap();
        assert_eq!(a, b);

        let err = graph.insert_thing("name", Some(Value::Long(1)), false).unwrap_err();
        assert_eq!(err.code, ServerErrorCode::SchemaViolation);
    }

    #[test]
    fn test_ownership_requires_owns() {
        let mut graph = schema();
        let person = graph.insert_thing("person", None, false).unwrap();
        let name = graph.insert_thing("name", Some(Value::from("Bob")), false).unwrap();
        graph.add_ownership(&person, &name, None).unwrap();

        let err = graph.add_ownership(&name, &name, None).unwrap_err();
        assert_eq!(err.code, ServerErrorCode::SchemaViolation);

        assert!(graph.delete_thing(&name));
        assert!(graph.thing(&person).unwrap().has.is_empty());
    }

    #[test]
    fn test_rule_conclusions_are_inferred() {
        let mut graph = schema();
        let person = graph.insert_thing("person", None, false).unwrap();
        graph.insert_rule(RuleDef {
            label: "default-name".to_string(),
            premise: "person".to_string(),
            attribute: "name".to_string(),
            value: Value::from("Anonymous"),
        });

        let view = graph.with_inferences();
        let owner = view.thing(&person).unwrap();
        let (attribute, rule) = owner.has.iter().next().unwrap();
        assert_eq!(rule.as_deref(), Some("default-name"));
        assert!(view.thing(attribute).unwrap().inferred);
        assert!(graph.thing(&person).unwrap().has.is_empty());
    }
}
