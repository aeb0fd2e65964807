//! Built-in serializers.
//!
//! Every serializer is created through an explicit constructor; the registry
//! decides which one applies to a type.

use super::{serializers_equal, ItemSerializationInfo, MemberSerializationInfo, Serializer};
use crate::error::{Error, Result};
use crate::expression::{EnumType, Type};
use bson::oid::ObjectId;
use bson::{Bson, Document};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::Arc;

fn mismatch(value: &Bson, ty: &Type) -> Error {
    Error::Serialization(format!("cannot serialize {} as {}", value, ty))
}

// === Primitives ===

/// Scalars stored as the matching BSON type.
#[derive(Debug, Clone, PartialEq)]
pub struct PrimitiveSerializer {
    ty: Type,
}

impl PrimitiveSerializer {
    pub fn new(ty: Type) -> Self {
        Self { ty }
    }
}

impl Serializer for PrimitiveSerializer {
    fn value_type(&self) -> &Type {
        &self.ty
    }

    fn serialize(&self, value: &Bson) -> Result<Bson> {
        let serialized = match (&self.ty, value) {
            (_, Bson::Null) => Bson::Null,
            (Type::Object, other) => other.clone(),
            (Type::Boolean, Bson::Boolean(b)) => Bson::Boolean(*b),
            (Type::Int32, Bson::Int32(i)) => Bson::Int32(*i),
            (Type::Int32, Bson::Int64(i)) => {
                Bson::Int32(i32::try_from(*i).map_err(|_| mismatch(value, &self.ty))?)
            }
            (Type::Int64, Bson::Int32(i)) => Bson::Int64(i64::from(*i)),
            (Type::Int64, Bson::Int64(i)) => Bson::Int64(*i),
            (Type::Double, Bson::Int32(i)) => Bson::Double(f64::from(*i)),
            (Type::Double, Bson::Int64(i)) => Bson::Double(*i as f64),
            (Type::Double, Bson::Double(d)) => Bson::Double(*d),
            (Type::Decimal128, Bson::Decimal128(d)) => Bson::Decimal128(*d),
            (Type::String, Bson::String(s)) => Bson::String(s.clone()),
            (Type::DateTime, Bson::DateTime(d)) => Bson::DateTime(*d),
            (Type::ObjectId, Bson::ObjectId(id)) => Bson::ObjectId(*id),
            (Type::ObjectId, Bson::String(s)) => {
                Bson::ObjectId(ObjectId::parse_str(s).map_err(|_| mismatch(value, &self.ty))?)
            }
            _ => return Err(mismatch(value, &self.ty)),
        };
        Ok(serialized)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn equals(&self, other: &dyn Serializer) -> bool {
        other.downcast_ref::<Self>().map_or(false, |o| self == o)
    }
}

// === Nullable ===

#[derive(Debug, Clone)]
pub struct NullableSerializer {
    ty: Type,
    inner: Arc<dyn Serializer>,
}

impl NullableSerializer {
    pub fn new(inner: Arc<dyn Serializer>) -> Self {
        Self {
            ty: Type::nullable(inner.value_type().clone()),
            inner,
        }
    }

    pub fn inner(&self) -> &Arc<dyn Serializer> {
        &self.inner
    }
}

impl PartialEq for NullableSerializer {
    fn eq(&self, other: &Self) -> bool {
        self.ty == other.ty && serializers_equal(&self.inner, &other.inner)
    }
}

impl Serializer for NullableSerializer {
    fn value_type(&self) -> &Type {
        &self.ty
    }

    fn try_get_member_serialization_info(&self, member: &str) -> Option<MemberSerializationInfo> {
        self.inner.try_get_member_serialization_info(member)
    }

    fn serialize(&self, value: &Bson) -> Result<Bson> {
        match value {
            Bson::Null => Ok(Bson::Null),
            other => self.inner.serialize(other),
        }
    }

    fn deserialize(&self, value: &Bson) -> Result<Bson> {
        match value {
            Bson::Null => Ok(Bson::Null),
            other => self.inner.deserialize(other),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn equals(&self, other: &dyn Serializer) -> bool {
        other.downcast_ref::<Self>().map_or(false, |o| self == o)
    }
}

// === Arrays ===

#[derive(Debug, Clone)]
pub struct ArraySerializer {
    ty: Type,
    item: Arc<dyn Serializer>,
}

impl ArraySerializer {
    pub fn new(item: Arc<dyn Serializer>) -> Self {
        Self {
            ty: Type::array(item.value_type().clone()),
            item,
        }
    }

    pub fn item(&self) -> &Arc<dyn Serializer> {
        &self.item
    }
}

impl PartialEq for ArraySerializer {
    fn eq(&self, other: &Self) -> bool {
        self.ty == other.ty && serializers_equal(&self.item, &other.item)
    }
}

fn serialize_items(items: &Bson, item: &Arc<dyn Serializer>, ty: &Type) -> Result<Bson> {
    match items {
        Bson::Null => Ok(Bson::Null),
        Bson::Array(items) => Ok(Bson::Array(
            items
                .iter()
                .map(|i| item.serialize(i))
                .collect::<Result<Vec<_>>>()?,
        )),
        other => Err(mismatch(other, ty)),
    }
}

fn deserialize_items(items: &Bson, item: &Arc<dyn Serializer>) -> Result<Bson> {
    match items {
        Bson::Array(items) => Ok(Bson::Array(
            items
                .iter()
                .map(|i| item.deserialize(i))
                .collect::<Result<Vec<_>>>()?,
        )),
        other => Ok(other.clone()),
    }
}

impl Serializer for ArraySerializer {
    fn value_type(&self) -> &Type {
        &self.ty
    }

    fn try_get_item_serialization_info(&self) -> Option<ItemSerializationInfo> {
        Some(ItemSerializationInfo {
            element_name: None,
            item_type: self.item.value_type().clone(),
            serializer: self.item.clone(),
        })
    }

    fn serialize(&self, value: &Bson) -> Result<Bson> {
        serialize_items(value, &self.item, &self.ty)
    }

    fn deserialize(&self, value: &Bson) -> Result<Bson> {
        deserialize_items(value, &self.item)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn equals(&self, other: &dyn Serializer) -> bool {
        other.downcast_ref::<Self>().map_or(false, |o| self == o)
    }
}

// === Enums ===

/// How enum values are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnumRepresentation {
    Int32,
    Int64,
    String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumSerializer {
    ty: Type,
    enum_type: Arc<EnumType>,
    representation: EnumRepresentation,
}

impl EnumSerializer {
    /// Integer representation matching the enum's underlying type
    pub fn new(enum_type: Arc<EnumType>) -> Self {
        let representation = match enum_type.underlying {
            Type::Int64 => EnumRepresentation::Int64,
            _ => EnumRepresentation::Int32,
        };
        Self::with_representation(enum_type, representation)
    }

    pub fn with_representation(enum_type: Arc<EnumType>, representation: EnumRepresentation) -> Self {
        Self {
            ty: Type::Enum(enum_type.clone()),
            enum_type,
            representation,
        }
    }

    pub fn representation(&self) -> EnumRepresentation {
        self.representation
    }

    pub fn enum_type(&self) -> &EnumType {
        &self.enum_type
    }

    fn numeric_value(&self, value: &Bson) -> Result<i64> {
        match value {
            Bson::Int32(i) => Ok(i64::from(*i)),
            Bson::Int64(i) => Ok(*i),
            Bson::String(name) => self
                .enum_type
                .value_of(name)
                .ok_or_else(|| mismatch(value, &self.ty)),
            other => Err(mismatch(other, &self.ty)),
        }
    }

    fn name_of(&self, value: i64) -> Result<String> {
        if let Some(name) = self.enum_type.name_of(value) {
            return Ok(name.to_string());
        }
        if self.enum_type.flags && value != 0 {
            let mut remaining = value;
            let mut names = Vec::new();
            for (name, flag) in &self.enum_type.values {
                if *flag != 0 && value & flag == *flag {
                    names.push(name.as_str());
                    remaining &= !flag;
                }
            }
            if remaining == 0 {
                return Ok(names.join(", "));
            }
        }
        Err(Error::Serialization(format!(
            "{} is not a defined value of {}",
            value, self.enum_type.name
        )))
    }
}

impl Serializer for EnumSerializer {
    fn value_type(&self) -> &Type {
        &self.ty
    }

    fn serialize(&self, value: &Bson) -> Result<Bson> {
        if let Bson::Null = value {
            return Ok(Bson::Null);
        }
        let numeric = self.numeric_value(value)?;
        match self.representation {
            EnumRepresentation::Int32 => i32::try_from(numeric)
                .map(Bson::Int32)
                .map_err(|_| mismatch(value, &self.ty)),
            EnumRepresentation::Int64 => Ok(Bson::Int64(numeric)),
            EnumRepresentation::String => self.name_of(numeric).map(Bson::String),
        }
    }

    fn deserialize(&self, value: &Bson) -> Result<Bson> {
        match value {
            Bson::String(name) => self
                .enum_type
                .value_of(name)
                .map(Bson::Int64)
                .ok_or_else(|| Error::Serialization(format!("unknown {} value {:?}", self.enum_type.name, name))),
            other => Ok(other.clone()),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn equals(&self, other: &dyn Serializer) -> bool {
        other.downcast_ref::<Self>().map_or(false, |o| self == o)
    }
}

// === Documents ===

/// One member of a document class map.
#[derive(Debug, Clone)]
pub struct MemberMap {
    pub member_name: String,
    pub element_name: String,
    pub serializer: Arc<dyn Serializer>,
}

impl MemberMap {
    pub fn new<S: Into<String>>(member_name: S, element_name: S, serializer: Arc<dyn Serializer>) -> Self {
        Self {
            member_name: member_name.into(),
            element_name: element_name.into(),
            serializer,
        }
    }
}

impl PartialEq for MemberMap {
    fn eq(&self, other: &Self) -> bool {
        self.member_name == other.member_name
            && self.element_name == other.element_name
            && serializers_equal(&self.serializer, &other.serializer)
    }
}

/// Composite values stored as documents, one element per mapped member.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSerializer {
    ty: Type,
    members: Vec<MemberMap>,
}

impl DocumentSerializer {
    pub fn new(ty: Type, members: Vec<MemberMap>) -> Self {
        Self { ty, members }
    }

    pub fn members(&self) -> &[MemberMap] {
        &self.members
    }

    pub fn member_by_element_name(&self, element_name: &str) -> Option<&MemberMap> {
        self.members.iter().find(|m| m.element_name == element_name)
    }
}

impl Serializer for DocumentSerializer {
    fn value_type(&self) -> &Type {
        &self.ty
    }

    fn try_get_member_serialization_info(&self, member: &str) -> Option<MemberSerializationInfo> {
        self.members
            .iter()
            .find(|m| m.member_name == member)
            .map(|m| MemberSerializationInfo {
                element_name: m.element_name.clone(),
                serializer: m.serializer.clone(),
            })
    }

    /// Host documents are keyed by member name; stored documents by element
    /// name
    fn serialize(&self, value: &Bson) -> Result<Bson> {
        let document = match value {
            Bson::Null => return Ok(Bson::Null),
            Bson::Document(document) => document,
            other => return Err(mismatch(other, &self.ty)),
        };
        let mut serialized = Document::new();
        for (name, member_value) in document {
            let member = self
                .members
                .iter()
                .find(|m| &m.member_name == name)
                .ok_or_else(|| {
                    Error::Serialization(format!("{} has no member named {}", self.ty, name))
                })?;
            serialized.insert(member.element_name.clone(), member.serializer.serialize(member_value)?);
        }
        Ok(Bson::Document(serialized))
    }

    fn deserialize(&self, value: &Bson) -> Result<Bson> {
        let document = match value {
            Bson::Document(document) => document,
            other => return Ok(other.clone()),
        };
        let mut deserialized = Document::new();
        for (element, element_value) in document {
            match self.member_by_element_name(element) {
                Some(member) => {
                    deserialized.insert(
                        member.member_name.clone(),
                        member.serializer.deserialize(element_value)?,
                    );
                }
                None => {
                    deserialized.insert(element.clone(), element_value.clone());
                }
            }
        }
        Ok(Bson::Document(deserialized))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn equals(&self, other: &dyn Serializer) -> bool {
        other.downcast_ref::<Self>().map_or(false, |o| self == o)
    }
}

// === Wrapped values ===

/// A value carried as the single field of a document (`{ _v: value }`).
#[derive(Debug, Clone)]
pub struct WrappedValueSerializer {
    field_name: String,
    value_serializer: Arc<dyn Serializer>,
}

impl WrappedValueSerializer {
    pub fn new<S: Into<String>>(field_name: S, value_serializer: Arc<dyn Serializer>) -> Self {
        Self {
            field_name: field_name.into(),
            value_serializer,
        }
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    pub fn value_serializer(&self) -> &Arc<dyn Serializer> {
        &self.value_serializer
    }
}

impl PartialEq for WrappedValueSerializer {
    fn eq(&self, other: &Self) -> bool {
        self.field_name == other.field_name
            && serializers_equal(&self.value_serializer, &other.value_serializer)
    }
}

impl Serializer for WrappedValueSerializer {
    fn value_type(&self) -> &Type {
        self.value_serializer.value_type()
    }

    fn try_get_member_serialization_info(&self, member: &str) -> Option<MemberSerializationInfo> {
        (member == self.field_name).then(|| MemberSerializationInfo {
            element_name: self.field_name.clone(),
            serializer: self.value_serializer.clone(),
        })
    }

    fn serialize(&self, value: &Bson) -> Result<Bson> {
        let mut document = Document::new();
        document.insert(self.field_name.clone(), self.value_serializer.serialize(value)?);
        Ok(Bson::Document(document))
    }

    fn deserialize(&self, value: &Bson) -> Result<Bson> {
        match value {
            Bson::Document(document) => match document.get(&self.field_name) {
                Some(inner) => self.value_serializer.deserialize(inner),
                None => Ok(Bson::Null),
            },
            other => Err(Error::Serialization(format!(
                "expected a document wrapping {:?}, got {}",
                self.field_name, other
            ))),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn equals(&self, other: &dyn Serializer) -> bool {
        other.downcast_ref::<Self>().map_or(false, |o| self == o)
    }
}

// === Groupings ===

/// Result of a `$group` stage: the key under `_id` and the grouped elements
/// under `_elements`.
#[derive(Debug, Clone)]
pub struct GroupingSerializer {
    ty: Type,
    key: Arc<dyn Serializer>,
    element: Arc<dyn Serializer>,
}

impl GroupingSerializer {
    pub const KEY_ELEMENT: &'static str = "_id";
    pub const ELEMENTS_ELEMENT: &'static str = "_elements";

    pub fn new(key: Arc<dyn Serializer>, element: Arc<dyn Serializer>) -> Self {
        Self {
            ty: Type::grouping(key.value_type().clone(), element.value_type().clone()),
            key,
            element,
        }
    }

    pub fn key_serializer(&self) -> &Arc<dyn Serializer> {
        &self.key
    }

    pub fn element_serializer(&self) -> &Arc<dyn Serializer> {
        &self.element
    }
}

impl PartialEq for GroupingSerializer {
    fn eq(&self, other: &Self) -> bool {
        serializers_equal(&self.key, &other.key) && serializers_equal(&self.element, &other.element)
    }
}

impl Serializer for GroupingSerializer {
    fn value_type(&self) -> &Type {
        &self.ty
    }

    fn try_get_member_serialization_info(&self, member: &str) -> Option<MemberSerializationInfo> {
        (member == "Key").then(|| MemberSerializationInfo {
            element_name: Self::KEY_ELEMENT.to_string(),
            serializer: self.key.clone(),
        })
    }

    fn try_get_item_serialization_info(&self) -> Option<ItemSerializationInfo> {
        Some(ItemSerializationInfo {
            element_name: Some(Self::ELEMENTS_ELEMENT.to_string()),
            item_type: self.element.value_type().clone(),
            serializer: self.element.clone(),
        })
    }

    fn serialize(&self, value: &Bson) -> Result<Bson> {
        Err(Error::Serialization(format!(
            "groupings cannot be used as constants: {}",
            value
        )))
    }

    fn deserialize(&self, value: &Bson) -> Result<Bson> {
        match value {
            Bson::Document(document) => {
                let mut deserialized = Document::new();
                if let Some(key) = document.get(Self::KEY_ELEMENT) {
                    deserialized.insert("Key", self.key.deserialize(key)?);
                }
                if let Some(elements) = document.get(Self::ELEMENTS_ELEMENT) {
                    deserialized.insert("Elements", deserialize_items(elements, &self.element)?);
                }
                Ok(Bson::Document(deserialized))
            }
            other => Ok(other.clone()),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn equals(&self, other: &dyn Serializer) -> bool {
        other.downcast_ref::<Self>().map_or(false, |o| self == o)
    }
}

// === Queryables ===

/// A queryable sequence of documents.
#[derive(Debug, Clone)]
pub struct QueryableSerializer {
    ty: Type,
    item: Arc<dyn Serializer>,
}

impl QueryableSerializer {
    pub fn new(item: Arc<dyn Serializer>) -> Self {
        Self {
            ty: Type::queryable(item.value_type().clone()),
            item,
        }
    }
}

impl PartialEq for QueryableSerializer {
    fn eq(&self, other: &Self) -> bool {
        serializers_equal(&self.item, &other.item)
    }
}

impl Serializer for QueryableSerializer {
    fn value_type(&self) -> &Type {
        &self.ty
    }

    fn try_get_item_serialization_info(&self) -> Option<ItemSerializationInfo> {
        Some(ItemSerializationInfo {
            element_name: None,
            item_type: self.item.value_type().clone(),
            serializer: self.item.clone(),
        })
    }

    fn serialize(&self, value: &Bson) -> Result<Bson> {
        serialize_items(value, &self.item, &self.ty)
    }

    fn deserialize(&self, value: &Bson) -> Result<Bson> {
        deserialize_items(value, &self.item)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn equals(&self, other: &dyn Serializer) -> bool {
        other.downcast_ref::<Self>().map_or(false, |o| self == o)
    }
}
