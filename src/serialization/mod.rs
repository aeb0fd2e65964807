//! Serializer lookup.
//!
//! A [`Serializer`] describes how values of one host type are stored in a
//! document: which element name each member is stored under, how array items
//! are encoded, and how a host constant turns into BSON. Translators pair every
//! AST node they emit with the serializer of the value it produces, so that
//! constants compared against a field are encoded the way the field is stored
//! (an enum stored as a string compares against `"Red"`, not `0`).
//!
//! Serializers are shared as `Arc<dyn Serializer>` and obtained from the
//! [`SerializerRegistry`].

pub mod registry;
pub mod serializers;

pub use registry::{ClassMap, MemberOptions, SerializerProvider, SerializerRegistry};
pub use serializers::{
    ArraySerializer, DocumentSerializer, EnumRepresentation, EnumSerializer, GroupingSerializer,
    MemberMap, NullableSerializer, PrimitiveSerializer, QueryableSerializer,
    WrappedValueSerializer,
};

use crate::error::Result;
use crate::expression::Type;
use bson::Bson;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Where and how a member of a composite value is stored.
#[derive(Debug, Clone)]
pub struct MemberSerializationInfo {
    /// Element (storage) name of the member
    pub element_name: String,
    pub serializer: Arc<dyn Serializer>,
}

/// How the items of a sequence value are stored.
#[derive(Debug, Clone)]
pub struct ItemSerializationInfo {
    /// Element holding the items when the sequence is embedded in a document
    /// (`_elements` for groupings); `None` when the value is the array itself
    pub element_name: Option<String>,
    pub item_type: Type,
    pub serializer: Arc<dyn Serializer>,
}

/// Encoding strategy for values of one host type.
pub trait Serializer: fmt::Debug + Send + Sync + 'static {
    /// The host type this serializer encodes
    fn value_type(&self) -> &Type;

    /// Member lookup for composite values
    fn try_get_member_serialization_info(&self, _member: &str) -> Option<MemberSerializationInfo> {
        None
    }

    /// Item lookup for sequence values
    fn try_get_item_serialization_info(&self) -> Option<ItemSerializationInfo> {
        None
    }

    /// Encode a host constant as it is stored
    fn serialize(&self, value: &Bson) -> Result<Bson>;

    /// Decode a stored value back into its host form
    fn deserialize(&self, value: &Bson) -> Result<Bson> {
        Ok(value.clone())
    }

    fn as_any(&self) -> &dyn Any;

    /// Value equality with another serializer
    fn equals(&self, other: &dyn Serializer) -> bool;
}

impl dyn Serializer {
    pub fn downcast_ref<T: Serializer>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn is<T: Serializer>(&self) -> bool {
        self.as_any().is::<T>()
    }
}

/// Two serializers are interchangeable when they are the same instance or
/// value-equal.
pub fn serializers_equal(a: &Arc<dyn Serializer>, b: &Arc<dyn Serializer>) -> bool {
    Arc::ptr_eq(a, b) || a.equals(b.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::DocumentType;

    #[test]
    fn test_serializers_equal_by_identity_and_value() {
        let a: Arc<dyn Serializer> = Arc::new(PrimitiveSerializer::new(Type::Int32));
        let b: Arc<dyn Serializer> = Arc::new(PrimitiveSerializer::new(Type::Int32));
        let c: Arc<dyn Serializer> = Arc::new(PrimitiveSerializer::new(Type::String));
        assert!(serializers_equal(&a, &a));
        assert!(serializers_equal(&a, &b));
        assert!(!serializers_equal(&a, &c));
    }

    #[test]
    fn test_downcast() {
        let registry = SerializerRegistry::new();
        let ty = DocumentType::new("Person")
            .with_member("Age", Type::Int32)
            .into_type();
        let serializer = registry.get_serializer(&ty).unwrap();
        assert!(serializer.is::<DocumentSerializer>());
        assert!(serializer.downcast_ref::<ArraySerializer>().is_none());
    }
}
