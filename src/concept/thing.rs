use std::fmt;

use super::types::{AttributeType, EntityType, RelationType, TypeApi};
use super::value::Value;

/// Behaviour shared by every thing concept
pub trait ThingApi: fmt::Debug + Send + Sync {
    /// Service-assigned instance id
    fn iid(&self) -> &str;

    fn type_label(&self) -> &str;

    /// Whether the thing was produced by a rule rather than stored
    fn is_inferred(&self) -> bool;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    iid: String,
    type_: EntityType,
    is_inferred: bool,
}

impl Entity {
    pub fn new(iid: impl Into<String>, type_: EntityType, is_inferred: bool) -> Self {
        Self {
            iid: iid.into(),
            type_,
            is_inferred,
        }
    }

    pub fn type_(&self) -> &EntityType {
        &self.type_
    }
}

impl ThingApi for Entity {
    fn iid(&self) -> &str {
        &self.iid
    }

    fn type_label(&self) -> &str {
        self.type_.label()
    }

    fn is_inferred(&self) -> bool {
        self.is_inferred
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    iid: String,
    type_: RelationType,
    is_inferred: bool,
}

impl Relation {
    pub fn new(iid: impl Into<String>, type_: RelationType, is_inferred: bool) -> Self {
        Self {
            iid: iid.into(),
            type_,
            is_inferred,
        }
    }

    pub fn type_(&self) -> &RelationType {
        &self.type_
    }
}

impl ThingApi for Relation {
    fn iid(&self) -> &str {
        &self.iid
    }

    fn type_label(&self) -> &str {
        self.type_.label()
    }

    fn is_inferred(&self) -> bool {
        self.is_inferred
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    iid: String,
    type_: AttributeType,
    value: Value,
    is_inferred: bool,
}

impl Attribute {
    pub fn new(iid: impl Into<String>, type_: AttributeType, value: Value, is_inferred: bool) -> Self {
        Self {
            iid: iid.into(),
            type_,
            value,
            is_inferred,
        }
    }

    pub fn type_(&self) -> &AttributeType {
        &self.type_
    }

    pub fn value(&self) -> &Value {
        &self.value
    }
}

impl ThingApi for Attribute {
    fn iid(&self) -> &str {
        &self.iid
    }

    fn type_label(&self) -> &str {
        self.type_.label()
    }

    fn is_inferred(&self) -> bool {
        self.is_inferred
    }
}
