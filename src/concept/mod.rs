//! Typed concepts
//!
//! A [`Concept`] is one of a closed set of concrete variants. Every variant
//! also belongs to one or more abstract kinds (`Type`, `ThingType`, `Thing`),
//! which is what the `is_*` predicates and the `as_*` casts test against.

pub mod factory;
pub mod thing;
pub mod types;
pub mod value;

use std::fmt;
use std::str::FromStr;

use crate::error::{DriverError, Result};

pub use factory::ConceptFactory;
pub use thing::{Attribute, Entity, Relation, ThingApi};
pub use types::{AttributeType, EntityType, RelationType, RoleType, RootThingType, ScopedLabel, TypeApi};
pub use value::{Value, ValueType};

/// Tag naming a concept kind, abstract or concrete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConceptKind {
    Type,
    RoleType,
    ThingType,
    EntityType,
    AttributeType,
    RelationType,
    Thing,
    Entity,
    Attribute,
    Relation,
    Value,
}

impl ConceptKind {
    pub const ALL: [ConceptKind; 11] = [
        ConceptKind::Type,
        ConceptKind::RoleType,
        ConceptKind::ThingType,
        ConceptKind::EntityType,
        ConceptKind::AttributeType,
        ConceptKind::RelationType,
        ConceptKind::Thing,
        ConceptKind::Entity,
        ConceptKind::Attribute,
        ConceptKind::Relation,
        ConceptKind::Value,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ConceptKind::Type => "Type",
            ConceptKind::RoleType => "RoleType",
            ConceptKind::ThingType => "ThingType",
            ConceptKind::EntityType => "EntityType",
            ConceptKind::AttributeType => "AttributeType",
            ConceptKind::RelationType => "RelationType",
            ConceptKind::Thing => "Thing",
            ConceptKind::Entity => "Entity",
            ConceptKind::Attribute => "Attribute",
            ConceptKind::Relation => "Relation",
            ConceptKind::Value => "Value",
        }
    }

    /// Tag used in concept records
    pub fn tag(&self) -> &'static str {
        match self {
            ConceptKind::Type => "type",
            ConceptKind::RoleType => "role_type",
            ConceptKind::ThingType => "thing_type",
            ConceptKind::EntityType => "entity_type",
            ConceptKind::AttributeType => "attribute_type",
            ConceptKind::RelationType => "relation_type",
            ConceptKind::Thing => "thing",
            ConceptKind::Entity => "entity",
            ConceptKind::Attribute => "attribute",
            ConceptKind::Relation => "relation",
            ConceptKind::Value => "value",
        }
    }

    pub fn parent(&self) -> Option<ConceptKind> {
        match self {
            ConceptKind::Type | ConceptKind::Thing | ConceptKind::Value => None,
            ConceptKind::RoleType | ConceptKind::ThingType => Some(ConceptKind::Type),
            ConceptKind::EntityType | ConceptKind::AttributeType | ConceptKind::RelationType => {
                Some(ConceptKind::ThingType)
            }
            ConceptKind::Entity | ConceptKind::Attribute | ConceptKind::Relation => {
                Some(ConceptKind::Thing)
            }
        }
    }

    /// Whether `self` is `other` or one of its descendants
    pub fn is_a(&self, other: ConceptKind) -> bool {
        let mut current = Some(*self);
        while let Some(kind) = current {
            if kind == other {
                return true;
            }
            current = kind.parent();
        }
        false
    }

    /// Abstract kinds have no concept of their own; `ThingType` is concrete
    /// for the root `thing` type only.
    pub fn is_abstract(&self) -> bool {
        matches!(self, ConceptKind::Type | ConceptKind::Thing)
    }
}

impl fmt::Display for ConceptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ConceptKind {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self> {
        ConceptKind::ALL
            .into_iter()
            .find(|kind| kind.tag() == s)
            .ok_or_else(|| DriverError::UnexpectedNativeValue(format!("unknown concept kind '{}'", s)))
    }
}

/// A concept returned in an answer
#[derive(Debug, Clone, PartialEq)]
pub enum Concept {
    RootThingType(RootThingType),
    EntityType(EntityType),
    RelationType(RelationType),
    AttributeType(AttributeType),
    RoleType(RoleType),
    Entity(Entity),
    Relation(Relation),
    Attribute(Attribute),
    Value(Value),
}

impl Concept {
    pub fn kind(&self) -> ConceptKind {
        match self {
            Concept::RootThingType(_) => ConceptKind::ThingType,
            Concept::EntityType(_) => ConceptKind::EntityType,
            Concept::RelationType(_) => ConceptKind::RelationType,
            Concept::AttributeType(_) => ConceptKind::AttributeType,
            Concept::RoleType(_) => ConceptKind::RoleType,
            Concept::Entity(_) => ConceptKind::Entity,
            Concept::Relation(_) => ConceptKind::Relation,
            Concept::Attribute(_) => ConceptKind::Attribute,
            Concept::Value(_) => ConceptKind::Value,
        }
    }

    pub fn is_type(&self) -> bool {
        self.kind().is_a(ConceptKind::Type)
    }

    pub fn is_thing_type(&self) -> bool {
        self.kind().is_a(ConceptKind::ThingType)
    }

    pub fn is_entity_type(&self) -> bool {
        self.kind() == ConceptKind::EntityType
    }

    pub fn is_relation_type(&self) -> bool {
        self.kind() == ConceptKind::RelationType
    }

    pub fn is_attribute_type(&self) -> bool {
        self.kind() == ConceptKind::AttributeType
    }

    pub fn is_role_type(&self) -> bool {
        self.kind() == ConceptKind::RoleType
    }

    pub fn is_thing(&self) -> bool {
        self.kind().is_a(ConceptKind::Thing)
    }

    pub fn is_entity(&self) -> bool {
        self.kind() == ConceptKind::Entity
    }

    pub fn is_relation(&self) -> bool {
        self.kind() == ConceptKind::Relation
    }

    pub fn is_attribute(&self) -> bool {
        self.kind() == ConceptKind::Attribute
    }

    pub fn is_value(&self) -> bool {
        self.kind() == ConceptKind::Value
    }

    pub fn as_type(&self) -> Result<&dyn TypeApi> {
        match self {
            Concept::RoleType(role) => Ok(role),
            _ => self
                .as_thing_type()
                .map_err(|_| self.cast_error(ConceptKind::Type)),
        }
    }

    pub fn as_thing_type(&self) -> Result<&dyn TypeApi> {
        match self {
            Concept::RootThingType(root) => Ok(root),
            Concept::EntityType(entity_type) => Ok(entity_type),
            Concept::RelationType(relation_type) => Ok(relation_type),
            Concept::AttributeType(attribute_type) => Ok(attribute_type),
            _ => Err(self.cast_error(ConceptKind::ThingType)),
        }
    }

    pub fn as_entity_type(&self) -> Result<&EntityType> {
        match self {
            Concept::EntityType(entity_type) => Ok(entity_type),
            _ => Err(self.cast_error(ConceptKind::EntityType)),
        }
    }

    pub fn as_relation_type(&self) -> Result<&RelationType> {
        match self {
            Concept::RelationType(relation_type) => Ok(relation_type),
            _ => Err(self.cast_error(ConceptKind::RelationType)),
        }
    }

    pub fn as_attribute_type(&self) -> Result<&AttributeType> {
        match self {
            Concept::AttributeType(attribute_type) => Ok(attribute_type),
            _ => Err(self.cast_error(ConceptKind::AttributeType)),
        }
    }

    pub fn as_role_type(&self) -> Result<&RoleType> {
        match self {
            Concept::RoleType(role) => Ok(role),
            _ => Err(self.cast_error(ConceptKind::RoleType)),
        }
    }

    pub fn as_thing(&self) -> Result<&dyn ThingApi> {
        match self {
            Concept::Entity(entity) => Ok(entity),
            Concept::Relation(relation) => Ok(relation),
            Concept::Attribute(attribute) => Ok(attribute),
            _ => Err(self.cast_error(ConceptKind::Thing)),
        }
    }

    pub fn as_entity(&self) -> Result<&Entity> {
        match self {
            Concept::Entity(entity) => Ok(entity),
            _ => Err(self.cast_error(ConceptKind::Entity)),
        }
    }

    pub fn as_relation(&self) -> Result<&Relation> {
        match self {
            Concept::Relation(relation) => Ok(relation),
            _ => Err(self.cast_error(ConceptKind::Relation)),
        }
    }

    pub fn as_attribute(&self) -> Result<&Attribute> {
        match self {
            Concept::Attribute(attribute) => Ok(attribute),
            _ => Err(self.cast_error(ConceptKind::Attribute)),
        }
    }

    pub fn as_value(&self) -> Result<&Value> {
        match self {
            Concept::Value(value) => Ok(value),
            _ => Err(self.cast_error(ConceptKind::Value)),
        }
    }

    /// Label of a type; role types are rendered as `scope:name`
    pub fn label(&self) -> Option<String> {
        match self {
            Concept::RoleType(role) => Some(role.scoped_label().to_string()),
            _ => self.as_thing_type().ok().map(|t| t.label().to_string()),
        }
    }

    fn cast_error(&self, to: ConceptKind) -> DriverError {
        DriverError::InvalidConceptCast {
            from: self.kind(),
            to,
        }
    }
}

impl fmt::Display for Concept {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Concept::RoleType(role) => write!(f, "{}", role.scoped_label()),
            Concept::Value(value) => write!(f, "{}", value),
            Concept::Attribute(attribute) => {
                write!(f, "{}:{}", attribute.type_().label(), attribute.value())
            }
            Concept::Entity(entity) => write!(f, "{}:{}", entity.type_().label(), entity.iid()),
            Concept::Relation(relation) => {
                write!(f, "{}:{}", relation.type_().label(), relation.iid())
            }
            other => match other.as_thing_type() {
                Ok(t) => f.write_str(t.label()),
                Err(_) => f.write_str(other.kind().name()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_hierarchy() {
        assert!(ConceptKind::EntityType.is_a(ConceptKind::ThingType));
        assert!(ConceptKind::EntityType.is_a(ConceptKind::Type));
        assert!(ConceptKind::RoleType.is_a(ConceptKind::Type));
        assert!(!ConceptKind::RoleType.is_a(ConceptKind::ThingType));
        assert!(ConceptKind::Attribute.is_a(ConceptKind::Thing));
        assert!(!ConceptKind::Value.is_a(ConceptKind::Thing));
        assert!(!ConceptKind::Thing.is_a(ConceptKind::Type));
    }

    #[test]
    fn test_kind_tags_parse_back() {
        for kind in ConceptKind::ALL {
            assert_eq!(kind.tag().parse::<ConceptKind>().unwrap(), kind);
        }
        let err = "function".parse::<ConceptKind>().unwrap_err();
        assert!(matches!(err, DriverError::UnexpectedNativeValue(_)));
    }

    #[test]
    fn test_casts() {
        let person = Concept::EntityType(EntityType::new("person", false));

        assert!(person.is_type());
        assert!(person.is_thing_type());
        assert!(!person.is_thing());
        assert_eq!(person.as_type().unwrap().label(), "person");
        assert_eq!(person.label().as_deref(), Some("person"));

        let err = person.as_attribute().unwrap_err();
        assert_eq!(
            err,
            DriverError::InvalidConceptCast {
                from: ConceptKind::EntityType,
                to: ConceptKind::Attribute,
            }
        );
        assert_eq!(
            person.as_thing().unwrap_err(),
            DriverError::InvalidConceptCast {
                from: ConceptKind::EntityType,
                to: ConceptKind::Thing,
            }
        );
    }

    #[test]
    fn test_role_type_label_is_scoped() {
        let role = Concept::RoleType(RoleType::new(ScopedLabel::new("employment", "employee"), false));
        assert!(role.is_type());
        assert!(!role.is_thing_type());
        assert_eq!(role.label().as_deref(), Some("employment:employee"));
        assert_eq!(role.as_type().unwrap().label(), "employee");
    }
}
