//! Static type model for host expression trees.
//!
//! Every node of an [`Expr`](super::Expr) carries the static type the host
//! compiler assigned to it. Translators consult these types for their
//! preconditions ("comparand must be boolean", "index must be integral") and
//! the serializer registry uses them as its lookup key.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A static host type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    Boolean,
    Int32,
    Int64,
    Double,
    Decimal128,
    String,
    DateTime,
    ObjectId,
    /// Untyped value (`object` / raw document values)
    Object,
    Nullable(Box<Type>),
    /// Arrays, lists and other in-memory sequences
    Array(Box<Type>),
    Document(Arc<DocumentType>),
    Enum(Arc<EnumType>),
    /// Result element of a `GroupBy`: key type and element type
    Grouping(Box<Type>, Box<Type>),
    /// A queryable collection of documents (pipeline source)
    Queryable(Box<Type>),
}

/// A composite (class-like) host type with named members.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentType {
    pub name: String,
    pub members: Vec<MemberType>,
}

/// One member of a [`DocumentType`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemberType {
    pub name: String,
    pub ty: Type,
}

/// An enumeration type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnumType {
    pub name: String,
    /// Integral type the enum values are stored as
    pub underlying: Type,
    pub values: Vec<(String, i64)>,
    /// Whether values combine as bit flags
    #[serde(default)]
    pub flags: bool,
}

impl DocumentType {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            members: Vec::new(),
        }
    }

    /// Add a member
    pub fn with_member<S: Into<String>>(mut self, name: S, ty: Type) -> Self {
        self.members.push(MemberType {
            name: name.into(),
            ty,
        });
        self
    }

    /// Look up a member's type by name
    pub fn member(&self, name: &str) -> Option<&Type> {
        self.members.iter().find(|m| m.name == name).map(|m| &m.ty)
    }

    /// Finish building and wrap as a [`Type::Document`]
    pub fn into_type(self) -> Type {
        Type::Document(Arc::new(self))
    }
}

impl EnumType {
    pub fn new<S: Into<String>>(name: S, values: Vec<(&str, i64)>) -> Self {
        Self {
            name: name.into(),
            underlying: Type::Int32,
            values: values
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
            flags: false,
        }
    }

    pub fn with_flags(mut self) -> Self {
        self.flags = true;
        self
    }

    /// Name of the enum value with the given numeric value
    pub fn name_of(&self, value: i64) -> Option<&str> {
        self.values
            .iter()
            .find(|(_, v)| *v == value)
            .map(|(name, _)| name.as_str())
    }

    /// Numeric value of the enum member with the given name
    pub fn value_of(&self, name: &str) -> Option<i64> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, value)| *value)
    }

    pub fn into_type(self) -> Type {
        Type::Enum(Arc::new(self))
    }
}

impl Type {
    pub fn nullable(inner: Type) -> Self {
        Type::Nullable(Box::new(inner))
    }

    pub fn array(item: Type) -> Self {
        Type::Array(Box::new(item))
    }

    pub fn queryable(item: Type) -> Self {
        Type::Queryable(Box::new(item))
    }

    pub fn grouping(key: Type, element: Type) -> Self {
        Type::Grouping(Box::new(key), Box::new(element))
    }

    /// Strip one level of `Nullable`
    pub fn non_nullable(&self) -> &Type {
        match self {
            Type::Nullable(inner) => inner,
            other => other,
        }
    }

    pub fn is_nullable(&self) -> bool {
        matches!(self, Type::Nullable(_))
    }

    pub fn is_boolean(&self) -> bool {
        matches!(self.non_nullable(), Type::Boolean)
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Type::String)
    }

    pub fn is_integral(&self) -> bool {
        matches!(self.non_nullable(), Type::Int32 | Type::Int64)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self.non_nullable(),
            Type::Int32 | Type::Int64 | Type::Double | Type::Decimal128
        )
    }

    pub fn is_enum(&self) -> bool {
        matches!(self.non_nullable(), Type::Enum(_))
    }

    pub fn is_date_time(&self) -> bool {
        matches!(self.non_nullable(), Type::DateTime)
    }

    /// Element type of a sequence-shaped type
    pub fn item_type(&self) -> Option<&Type> {
        match self {
            Type::Array(item) | Type::Queryable(item) => Some(item),
            Type::Grouping(_, element) => Some(element),
            _ => None,
        }
    }

    /// Whether values of this type are sequences (arrays, groupings, queryables)
    pub fn is_sequence(&self) -> bool {
        self.item_type().is_some()
    }

    pub fn as_document(&self) -> Option<&DocumentType> {
        match self {
            Type::Document(doc) => Some(doc),
            _ => None,
        }
    }

    pub fn as_enum(&self) -> Option<&EnumType> {
        match self.non_nullable() {
            Type::Enum(e) => Some(e),
            _ => None,
        }
    }

    /// Short display name used in diagnostics
    pub fn name(&self) -> String {
        match self {
            Type::Boolean => "Boolean".to_string(),
            Type::Int32 => "Int32".to_string(),
            Type::Int64 => "Int64".to_string(),
            Type::Double => "Double".to_string(),
            Type::Decimal128 => "Decimal128".to_string(),
            Type::String => "String".to_string(),
            Type::DateTime => "DateTime".to_string(),
            Type::ObjectId => "ObjectId".to_string(),
            Type::Object => "Object".to_string(),
            Type::Nullable(inner) => format!("{}?", inner.name()),
            Type::Array(item) => format!("{}[]", item.name()),
            Type::Document(doc) => doc.name.clone(),
            Type::Enum(e) => e.name.clone(),
            Type::Grouping(key, element) => {
                format!("IGrouping<{}, {}>", key.name(), element.name())
            }
            Type::Queryable(item) => format!("IQueryable<{}>", item.name()),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
