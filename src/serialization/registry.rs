//! Serializer registry - maps types to serializers

use super::serializers::{
    ArraySerializer, DocumentSerializer, EnumRepresentation, EnumSerializer, GroupingSerializer,
    MemberMap, NullableSerializer, PrimitiveSerializer, QueryableSerializer,
};
use super::Serializer;
use crate::error::{Error, Result};
use crate::expression::{DocumentType, Type};
use dashmap::DashMap;
use lazy_static::lazy_static;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

lazy_static! {
    static ref GLOBAL_REGISTRY: Arc<SerializerRegistry> = Arc::new(SerializerRegistry::new());
}

/// Supplies serializers for types the built-in factories do not cover (or
/// overrides them). Providers are consulted in registration order.
pub trait SerializerProvider: Send + Sync {
    /// Returns `None` when this provider does not handle `ty`
    fn get_serializer(
        &self,
        ty: &Type,
        registry: &SerializerRegistry,
    ) -> Option<Result<Arc<dyn Serializer>>>;
}

/// Per-member storage options of a document type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemberOptions {
    /// Element name override (defaults to the member name, `_id` for `Id`)
    #[serde(default)]
    pub element_name: Option<String>,
    /// Enum representation override
    #[serde(default)]
    pub representation: Option<EnumRepresentation>,
}

/// Storage options for one document type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassMap {
    pub type_name: String,
    #[serde(default)]
    pub members: HashMap<String, MemberOptions>,
}

impl ClassMap {
    pub fn new<S: Into<String>>(type_name: S) -> Self {
        Self {
            type_name: type_name.into(),
            members: HashMap::new(),
        }
    }

    pub fn map_member<S: Into<String>>(mut self, member: S, element_name: S) -> Self {
        self.members.entry(member.into()).or_default().element_name = Some(element_name.into());
        self
    }

    pub fn represent_as<S: Into<String>>(mut self, member: S, representation: EnumRepresentation) -> Self {
        self.members.entry(member.into()).or_default().representation = Some(representation);
        self
    }
}

/// Serializer registry
///
/// Serializers are created on first lookup and cached per type; concurrent
/// lookups of the same type all observe the first cached instance.
pub struct SerializerRegistry {
    providers: RwLock<Vec<Arc<dyn SerializerProvider>>>,
    class_maps: RwLock<HashMap<String, ClassMap>>,
    cache: DashMap<Type, Arc<dyn Serializer>>,
}

impl SerializerRegistry {
    pub fn new() -> Self {
        Self {
            providers: RwLock::new(Vec::new()),
            class_maps: RwLock::new(HashMap::new()),
            cache: DashMap::new(),
        }
    }

    /// Process-wide default registry
    pub fn global() -> Arc<SerializerRegistry> {
        GLOBAL_REGISTRY.clone()
    }

    /// Register a custom provider
    pub fn register_provider(&self, provider: Arc<dyn SerializerProvider>) {
        self.providers.write().push(provider);
        self.cache.clear();
    }

    /// Register a class map for a document type
    pub fn register_class_map(&self, class_map: ClassMap) -> Result<()> {
        let mut class_maps = self.class_maps.write();
        if class_maps.contains_key(&class_map.type_name) {
            return Err(Error::InvalidArgument(format!(
                "class map for '{}' already registered",
                class_map.type_name
            )));
        }
        debug!(type_name = %class_map.type_name, "registering class map");
        class_maps.insert(class_map.type_name.clone(), class_map);
        self.cache.clear();
        Ok(())
    }

    /// Get the serializer for a type
    pub fn get_serializer(&self, ty: &Type) -> Result<Arc<dyn Serializer>> {
        if let Some(cached) = self.cache.get(ty) {
            return Ok(cached.value().clone());
        }
        // Built outside the entry lock: nested lookups may hit the same shard
        let created = self.create_serializer(ty)?;
        let entry = self.cache.entry(ty.clone()).or_insert(created);
        Ok(entry.value().clone())
    }

    /// Number of cached serializers
    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }

    fn create_serializer(&self, ty: &Type) -> Result<Arc<dyn Serializer>> {
        let providers: Vec<_> = self.providers.read().iter().cloned().collect();
        for provider in providers {
            if let Some(result) = provider.get_serializer(ty, self) {
                return result;
            }
        }

        let serializer: Arc<dyn Serializer> = match ty {
            Type::Boolean
            | Type::Int32
            | Type::Int64
            | Type::Double
            | Type::Decimal128
            | Type::String
            | Type::DateTime
            | Type::ObjectId
            | Type::Object => Arc::new(PrimitiveSerializer::new(ty.clone())),
            Type::Nullable(inner) => Arc::new(NullableSerializer::new(self.get_serializer(inner)?)),
            Type::Array(item) => Arc::new(ArraySerializer::new(self.get_serializer(item)?)),
            Type::Enum(enum_type) => Arc::new(EnumSerializer::new(enum_type.clone())),
            Type::Document(document) => Arc::new(self.create_document_serializer(ty, document)?),
            Type::Grouping(key, element) => Arc::new(GroupingSerializer::new(
                self.get_serializer(key)?,
                self.get_serializer(element)?,
            )),
            Type::Queryable(item) => Arc::new(QueryableSerializer::new(self.get_serializer(item)?)),
        };
        debug!(ty = %ty, "created serializer");
        Ok(serializer)
    }

    fn create_document_serializer(&self, ty: &Type, document: &DocumentType) -> Result<DocumentSerializer> {
        let class_map = self.class_maps.read().get(&document.name).cloned();
        let mut members = Vec::with_capacity(document.members.len());
        for member in &document.members {
            let options = class_map
                .as_ref()
                .and_then(|map| map.members.get(&member.name))
                .cloned()
                .unwrap_or_default();
            let element_name = match options.element_name {
                Some(name) => name,
                None if member.name == "Id" => "_id".to_string(),
                None => member.name.clone(),
            };
            let serializer = match options.representation {
                Some(representation) => self.with_representation(&member.ty, representation)?,
                None => self.get_serializer(&member.ty)?,
            };
            members.push(MemberMap::new(member.name.clone(), element_name, serializer));
        }
        Ok(DocumentSerializer::new(ty.clone(), members))
    }

    fn with_representation(
        &self,
        ty: &Type,
        representation: EnumRepresentation,
    ) -> Result<Arc<dyn Serializer>> {
        match ty {
            Type::Enum(enum_type) => Ok(Arc::new(EnumSerializer::with_representation(
                enum_type.clone(),
                representation,
            ))),
            Type::Nullable(inner) => Ok(Arc::new(NullableSerializer::new(
                self.with_representation(inner, representation)?,
            ))),
            Type::Array(item) => Ok(Arc::new(ArraySerializer::new(
                self.with_representation(item, representation)?,
            ))),
            other => Err(Error::InvalidArgument(format!(
                "representation {:?} does not apply to {}",
                representation, other
            ))),
        }
    }
}

impl Default for SerializerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SerializerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerializerRegistry")
            .field("providers", &self.providers.read().len())
            .field("class_maps", &self.class_maps.read().len())
            .field("cached", &self.cache.len())
            .finish()
    }
}
