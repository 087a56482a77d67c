use std::fmt;

use super::value::ValueType;

/// Behaviour shared by every type concept
pub trait TypeApi: fmt::Debug + Send + Sync {
    fn label(&self) -> &str;

    fn is_root(&self) -> bool;

    fn is_abstract(&self) -> bool;
}

/// The root `thing` type, supertype of every entity, relation and attribute type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RootThingType {
    label: String,
}

impl RootThingType {
    pub const LABEL: &'static str = "thing";

    pub fn new() -> Self {
        Self {
            label: Self::LABEL.to_string(),
        }
    }
}

impl Default for RootThingType {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeApi for RootThingType {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_root(&self) -> bool {
        true
    }

    fn is_abstract(&self) -> bool {
        true
    }
}

macro_rules! thing_type {
    ($name:ident, $root:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub struct $name {
            label: String,
            is_abstract: bool,
        }

        impl $name {
            pub const ROOT_LABEL: &'static str = $root;

            pub fn new(label: impl Into<String>, is_abstract: bool) -> Self {
                Self {
                    label: label.into(),
                    is_abstract,
                }
            }
        }

        impl TypeApi for $name {
            fn label(&self) -> &str {
                &self.label
            }

            fn is_root(&self) -> bool {
                self.label == Self::ROOT_LABEL
            }

            fn is_abstract(&self) -> bool {
                self.is_abstract
            }
        }
    };
}

thing_type!(EntityType, "entity");
thing_type!(RelationType, "relation");

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributeType {
    label: String,
    is_abstract: bool,
    value_type: ValueType,
}

impl AttributeType {
    pub const ROOT_LABEL: &'static str = "attribute";

    pub fn new(label: impl Into<String>, is_abstract: bool, value_type: ValueType) -> Self {
        Self {
            label: label.into(),
            is_abstract,
            value_type,
        }
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }
}

impl TypeApi for AttributeType {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_root(&self) -> bool {
        self.label == Self::ROOT_LABEL
    }

    fn is_abstract(&self) -> bool {
        self.is_abstract
    }
}

/// Role label qualified by its relation type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopedLabel {
    pub scope: String,
    pub name: String,
}

impl ScopedLabel {
    pub fn new(scope: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ScopedLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scope, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoleType {
    label: ScopedLabel,
    is_abstract: bool,
}

impl RoleType {
    pub fn new(label: ScopedLabel, is_abstract: bool) -> Self {
        Self { label, is_abstract }
    }

    pub fn scoped_label(&self) -> &ScopedLabel {
        &self.label
    }
}

impl TypeApi for RoleType {
    /// Unscoped role name
    fn label(&self) -> &str {
        &self.label.name
    }

    fn is_root(&self) -> bool {
        self.label.scope == RelationType::ROOT_LABEL && self.label.name == "role"
    }

    fn is_abstract(&self) -> bool {
        self.is_abstract
    }
}
