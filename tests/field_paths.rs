//! Field path translation

use photonql::expression::{DocumentType, Expr, Parameter, Type};
use photonql::serialization::{ClassMap, Serializer, SerializerRegistry};
use photonql::{translate_field_path, QueryTranslator, TranslationOptions};
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn line() -> Type {
    DocumentType::new("Line")
        .with_member("Sku", Type::String)
        .with_member("Quantity", Type::Int32)
        .into_type()
}

fn order() -> Type {
    DocumentType::new("Order")
        .with_member("Id", Type::ObjectId)
        .with_member("Customer", DocumentType::new("Ref").with_member("Name", Type::String).into_type())
        .with_member("Total", Type::Double)
        .with_member("Lines", Type::array(line()))
        .into_type()
}

fn access(body: impl FnOnce(Expr) -> Expr) -> Expr {
    let o = Parameter::new("o", order());
    let body = body(Expr::parameter(&o));
    Expr::lambda(vec![o], body)
}

fn setup(registry: SerializerRegistry) -> (QueryTranslator, Arc<dyn Serializer>) {
    let translator = QueryTranslator::new(Arc::new(registry));
    let serializer = translator
        .registry()
        .get_serializer(&order())
        .expect("order serializer");
    (translator, serializer)
}

#[test]
fn test_paths_use_element_names() {
    let registry = SerializerRegistry::new();
    registry
        .register_class_map(ClassMap::new("Ref").map_member("Name", "n"))
        .expect("class map");
    let (translator, serializer) = setup(registry);

    let (path, field) = translator
        .translate_field_path(&access(|o| o.field("Customer").field("Name")), &serializer)
        .unwrap();
    assert_eq!(path, "Customer.n");
    assert_eq!(field.value_type(), &Type::String);

    let (path, field) = translator
        .translate_field_path(&access(|o| o.field("Id")), &serializer)
        .unwrap();
    assert_eq!(path, "_id");
    assert_eq!(field.value_type(), &Type::ObjectId);
}

#[test]
fn test_array_path() {
    let (translator, serializer) = setup(SerializerRegistry::new());
    let (path, field) = translator
        .translate_field_path(&access(|o| o.field("Lines")), &serializer)
        .unwrap();
    assert_eq!(path, "Lines");
    assert!(field.try_get_item_serialization_info().is_some());
}

#[test]
fn test_non_paths_are_rejected() {
    let (translator, serializer) = setup(SerializerRegistry::new());
    let doubled = access(|o| o.field("Total").mul(Expr::constant(2.0)));
    assert!(translator.translate_field_path(&doubled, &serializer).is_err());
    assert!(translator
        .translate_field_path(&access(|o| o), &serializer)
        .is_err());
    assert!(translator
        .translate_field_path(&Expr::constant("Total"), &serializer)
        .is_err());
}

#[test]
fn test_global_entry_point() {
    let serializer = SerializerRegistry::global()
        .get_serializer(&order())
        .expect("serializer");
    let (path, _) = translate_field_path(
        &access(|o| o.field("Total")),
        &serializer,
        &TranslationOptions::default(),
    )
    .unwrap();
    assert_eq!(path, "Total");
}
