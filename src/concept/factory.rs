//! Record to concept conversion
//!
//! Each concept kind maps to exactly one constructor. Constructors for
//! abstract kinds narrow to the concrete kind the record carries.

use once_cell::sync::Lazy;
use std::collections::HashMap;

use super::thing::{Attribute, Entity, Relation};
use super::types::{AttributeType, EntityType, RelationType, RoleType, RootThingType, ScopedLabel};
use super::value::{Value, ValueType};
use super::{Concept, ConceptKind};
use crate::error::{DriverError, Result};
use crate::protocol::ConceptRecord;

type Constructor = fn(ConceptRecord) -> Result<Concept>;

static CONSTRUCTORS: Lazy<HashMap<ConceptKind, Constructor>> = Lazy::new(|| {
    let mut table: HashMap<ConceptKind, Constructor> = HashMap::new();
    table.insert(ConceptKind::Type, build_type);
    table.insert(ConceptKind::RoleType, build_role_type);
    table.insert(ConceptKind::ThingType, build_thing_type);
    table.insert(ConceptKind::EntityType, build_entity_type);
    table.insert(ConceptKind::AttributeType, build_attribute_type);
    table.insert(ConceptKind::RelationType, build_relation_type);
    table.insert(ConceptKind::Thing, build_thing);
    table.insert(ConceptKind::Entity, build_entity);
    table.insert(ConceptKind::Attribute, build_attribute);
    table.insert(ConceptKind::Relation, build_relation);
    table.insert(ConceptKind::Value, build_value);
    table
});

pub struct ConceptFactory;

impl ConceptFactory {
    /// Materialise a record as the concrete kind it is tagged with.
    pub fn decode(record: ConceptRecord) -> Result<Concept> {
        let kind = record.kind.parse::<ConceptKind>()?;
        Self::create(kind, record)
    }

    /// Materialise a record that is expected to be of kind `expected` or
    /// one of its descendants.
    pub fn create(expected: ConceptKind, record: ConceptRecord) -> Result<Concept> {
        let constructor = CONSTRUCTORS.get(&expected).ok_or_else(|| {
            DriverError::IllegalState(format!("no constructor registered for {}", expected))
        })?;
        constructor(record)
    }
}

fn record_kind(record: &ConceptRecord) -> Result<ConceptKind> {
    record.kind.parse()
}

/// Dispatch an abstract request to the record's concrete constructor.
fn narrow(expected: ConceptKind, record: ConceptRecord) -> Result<Concept> {
    let actual = record_kind(&record)?;
    if !actual.is_a(expected) {
        return Err(DriverError::InvalidConceptCast {
            from: actual,
            to: expected,
        });
    }
    if actual == expected {
        return Err(DriverError::UnexpectedNativeValue(format!(
            "record tagged with abstract kind '{}'",
            actual
        )));
    }
    ConceptFactory::create(actual, record)
}

fn expect_exact(expected: ConceptKind, record: &ConceptRecord) -> Result<()> {
    let actual = record_kind(record)?;
    if actual == expected {
        Ok(())
    } else {
        Err(DriverError::InvalidConceptCast {
            from: actual,
            to: expected,
        })
    }
}

fn required<T>(field: Option<T>, name: &str, kind: ConceptKind) -> Result<T> {
    field.ok_or_else(|| {
        DriverError::UnexpectedNativeValue(format!("{} record without '{}'", kind, name))
    })
}

fn build_type(record: ConceptRecord) -> Result<Concept> {
    narrow(ConceptKind::Type, record)
}

fn build_thing(record: ConceptRecord) -> Result<Concept> {
    narrow(ConceptKind::Thing, record)
}

fn build_thing_type(record: ConceptRecord) -> Result<Concept> {
    if record_kind(&record)? == ConceptKind::ThingType {
        Ok(Concept::RootThingType(RootThingType::new()))
    } else {
        narrow(ConceptKind::ThingType, record)
    }
}

fn entity_type(record: ConceptRecord) -> Result<EntityType> {
    expect_exact(ConceptKind::EntityType, &record)?;
    let label = required(record.label, "label", ConceptKind::EntityType)?;
    Ok(EntityType::new(label, record.is_abstract))
}

fn relation_type(record: ConceptRecord) -> Result<RelationType> {
    expect_exact(ConceptKind::RelationType, &record)?;
    let label = required(record.label, "label", ConceptKind::RelationType)?;
    Ok(RelationType::new(label, record.is_abstract))
}

fn attribute_type(record: ConceptRecord) -> Result<AttributeType> {
    expect_exact(ConceptKind::AttributeType, &record)?;
    let label = required(record.label, "label", ConceptKind::AttributeType)?;
    let value_type = match record.value_type {
        Some(name) => name.parse::<ValueType>()?,
        None => ValueType::Object,
    };
    Ok(AttributeType::new(label, record.is_abstract, value_type))
}

fn thing_type_of(record: ConceptRecord, kind: ConceptKind) -> Result<(String, ConceptRecord)> {
    let iid = required(record.iid, "iid", kind)?;
    let type_ = required(record.type_, "type", kind)?;
    Ok((iid, *type_))
}

fn build_entity_type(record: ConceptRecord) -> Result<Concept> {
    entity_type(record).map(Concept::EntityType)
}

fn build_relation_type(record: ConceptRecord) -> Result<Concept> {
    relation_type(record).map(Concept::RelationType)
}

fn build_attribute_type(record: ConceptRecord) -> Result<Concept> {
    attribute_type(record).map(Concept::AttributeType)
}

fn build_role_type(record: ConceptRecord) -> Result<Concept> {
    expect_exact(ConceptKind::RoleType, &record)?;
    let scope = required(record.scope, "scope", ConceptKind::RoleType)?;
    let name = required(record.label, "label", ConceptKind::RoleType)?;
    Ok(Concept::RoleType(RoleType::new(
        ScopedLabel::new(scope, name),
        record.is_abstract,
    )))
}

fn build_entity(record: ConceptRecord) -> Result<Concept> {
    expect_exact(ConceptKind::Entity, &record)?;
    let is_inferred = record.is_inferred;
    let (iid, type_) = thing_type_of(record, ConceptKind::Entity)?;
    Ok(Concept::Entity(Entity::new(iid, entity_type(type_)?, is_inferred)))
}

fn build_relation(record: ConceptRecord) -> Result<Concept> {
    expect_exact(ConceptKind::Relation, &record)?;
    let is_inferred = record.is_inferred;
    let (iid, type_) = thing_type_of(record, ConceptKind::Relation)?;
    Ok(Concept::Relation(Relation::new(iid, relation_type(type_)?, is_inferred)))
}

fn build_attribute(record: ConceptRecord) -> Result<Concept> {
    expect_exact(ConceptKind::Attribute, &record)?;
    let is_inferred = record.is_inferred;
    let value = required(record.value.clone(), "value", ConceptKind::Attribute)?;
    let (iid, type_) = thing_type_of(record, ConceptKind::Attribute)?;
    Ok(Concept::Attribute(Attribute::new(
        iid,
        attribute_type(type_)?,
        Value::from_record(value)?,
        is_inferred,
    )))
}

fn build_value(record: ConceptRecord) -> Result<Concept> {
    expect_exact(ConceptKind::Value, &record)?;
    let value = required(record.value, "value", ConceptKind::Value)?;
    Ok(Concept::Value(Value::from_record(value)?))
}
