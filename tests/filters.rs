//! Filter translation through the public API

use bson::{doc, Bson, Document, Regex};
use photonql::expression::{BinaryOp, DocumentType, EnumType, Expr, MethodId, Parameter, Type, UnaryOp};
use photonql::serialization::{ClassMap, EnumRepresentation, SerializerRegistry};
use photonql::{QueryTranslator, ServerVersion, TranslationOptions};
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn status() -> Type {
    EnumType::new("Status", vec![("Pending", 0), ("Active", 1), ("Closed", 2)]).into_type()
}

fn account() -> Type {
    DocumentType::new("Account")
        .with_member("Id", Type::Int32)
        .with_member("Name", Type::String)
        .with_member("Balance", Type::Int32)
        .with_member("Limit", Type::Int32)
        .with_member("Status", status())
        .with_member("Tags", Type::array(Type::String))
        .into_type()
}

struct Fixture {
    translator: QueryTranslator,
    x: Parameter,
}

impl Fixture {
    fn new() -> Self {
        Self::with_registry(SerializerRegistry::new(), TranslationOptions::default())
    }

    fn with_registry(registry: SerializerRegistry, options: TranslationOptions) -> Self {
        Self {
            translator: QueryTranslator::with_options(Arc::new(registry), options),
            x: Parameter::new("x", account()),
        }
    }

    fn x(&self) -> Expr {
        Expr::parameter(&self.x)
    }

    fn filter(&self, body: Expr) -> photonql::error::Result<Document> {
        let serializer = self
            .translator
            .registry()
            .get_serializer(&account())
            .expect("account serializer");
        let predicate = Expr::lambda(vec![self.x.clone()], body);
        self.translator.translate_filter(&predicate, &serializer)
    }

    fn render(&self, body: Expr) -> Document {
        self.filter(body).expect("filter translates")
    }
}

fn regex(pattern: &str, options: &str) -> Bson {
    Bson::RegularExpression(Regex {
        pattern: pattern.to_string(),
        options: options.to_string(),
    })
}

#[test]
fn test_constant_on_the_left_flips_the_comparison() {
    let f = Fixture::new();
    let body = Expr::constant(3).lt(f.x().field("Balance"));
    assert_eq!(f.render(body), doc! { "Balance": { "$gt": 3 } });
}

#[test]
fn test_field_to_field_comparison_uses_expr() {
    let f = Fixture::new();
    let body = f.x().field("Balance").gt(f.x().field("Limit"));
    assert_eq!(
        f.render(body),
        doc! { "$expr": { "$gt": ["$Balance", "$Limit"] } }
    );
}

#[test]
fn test_mixed_conjunction_falls_back_per_node() {
    let f = Fixture::new();
    let body = f
        .x()
        .field("Name")
        .eq(Expr::constant("a"))
        .and_also(f.x().field("Balance").gt(f.x().field("Limit")));
    assert_eq!(
        f.render(body),
        doc! { "Name": "a", "$expr": { "$gt": ["$Balance", "$Limit"] } }
    );
}

#[test]
fn test_enum_string_representation() {
    let registry = SerializerRegistry::new();
    registry
        .register_class_map(
            ClassMap::new("Account").represent_as("Status", EnumRepresentation::String),
        )
        .expect("class map");
    let f = Fixture::with_registry(registry, TranslationOptions::default());
    let body = f.x().field("Status").eq(Expr::typed_constant(1, status()));
    assert_eq!(f.render(body), doc! { "Status": "Active" });

    let f = Fixture::new();
    let body = f.x().field("Status").eq(Expr::typed_constant(1, status()));
    assert_eq!(f.render(body), doc! { "Status": 1 });
}

#[test]
fn test_id_member_maps_to_underscore_id() {
    let f = Fixture::new();
    let body = f.x().field("Id").ne(Expr::constant(7));
    assert_eq!(f.render(body), doc! { "_id": { "$ne": 7 } });
}

#[test]
fn test_array_size_tricks() {
    let f = Fixture::new();
    let count = f.x().field("Tags").call(MethodId::Count, vec![], Type::Int32);
    assert_eq!(
        f.render(count.gt(Expr::constant(2))),
        doc! { "Tags.2": { "$exists": true } }
    );

    let length = Expr::unary(UnaryOp::ArrayLength, f.x().field("Tags"), Type::Int32);
    assert_eq!(
        f.render(length.eq(Expr::constant(0))),
        doc! { "Tags": { "$size": 0 } }
    );
}

#[test]
fn test_modulo() {
    let f = Fixture::new();
    let body = f
        .x()
        .field("Balance")
        .modulo(Expr::constant(2))
        .eq(Expr::constant(0));
    assert_eq!(f.render(body), doc! { "Balance": { "$mod": [2, 0] } });
}

#[test]
fn test_case_insensitive_equality() {
    let f = Fixture::new();
    let lower = f
        .x()
        .field("Name")
        .call(MethodId::StringToLower, vec![], Type::String);
    assert_eq!(
        f.render(lower.clone().eq(Expr::constant("a.b"))),
        doc! { "Name": regex("^a\\.b$", "i") }
    );

    // a mixed-case constant can never match a lowered string
    let translated = f.render(lower.eq(Expr::constant("Ab")));
    assert!(translated.contains_key("$expr"));
}

#[test]
fn test_tags_any_with_predicate() {
    let f = Fixture::new();
    let t = Parameter::new("t", Type::String);
    let body = f.x().field("Tags").call(
        MethodId::Any,
        vec![Expr::lambda(
            vec![t.clone()],
            Expr::parameter(&t).eq(Expr::constant("vip")),
        )],
        Type::Boolean,
    );
    assert_eq!(
        f.render(body),
        doc! { "Tags": { "$elemMatch": { "$eq": "vip" } } }
    );
}

#[test]
fn test_double_negation_is_removed() {
    let f = Fixture::new();
    let body = Expr::not(Expr::not(f.x().field("Name").eq(Expr::constant("a"))));
    assert_eq!(f.render(body), doc! { "Name": "a" });
}

#[test]
fn test_simplification_can_be_disabled() {
    let f = Fixture::with_registry(
        SerializerRegistry::new(),
        TranslationOptions::default().without_simplification(),
    );
    let body = Expr::not(f.x().field("Name").eq(Expr::constant("a")));
    assert_eq!(f.render(body), doc! { "$nor": [{ "Name": "a" }] });
}

#[test]
fn test_unsupported_shapes_are_rejected() {
    let f = Fixture::new();

    // unsupported method
    let grouped = f.x().field("Tags").call(
        MethodId::GroupBy,
        vec![Expr::lambda(
            vec![Parameter::new("t", Type::String)],
            Expr::constant(1),
        )],
        Type::Int32,
    );
    assert!(f.filter(grouped.eq(Expr::constant(1))).is_err());

    // unsupported operator
    let shifted = Expr::binary(BinaryOp::LeftShift, f.x().field("Balance"), Expr::constant(1));
    assert!(f.filter(shifted.eq(Expr::constant(2))).is_err());

    // unsupported conversion
    let converted = Expr::convert(f.x().field("Name"), Type::DateTime);
    assert!(f
        .filter(converted.gt(Expr::typed_constant(Bson::Null, Type::DateTime)))
        .is_err());
}

#[test]
fn test_has_flag_on_integer_enum() {
    let flags = EnumType::new("Access", vec![("Read", 1), ("Write", 2)])
        .with_flags()
        .into_type();
    let grant = DocumentType::new("Grant")
        .with_member("Access", flags.clone())
        .into_type();
    let g = Parameter::new("g", grant.clone());
    let has_write = Expr::parameter(&g).field("Access").call(
        MethodId::EnumHasFlag,
        vec![Expr::typed_constant(2, flags)],
        Type::Boolean,
    );
    let predicate = Expr::lambda(vec![g.clone()], has_write);

    let translator = QueryTranslator::with_options(
        Arc::new(SerializerRegistry::new()),
        TranslationOptions::default().with_compatibility_level(ServerVersion::V4_4),
    );
    let serializer = translator.registry().get_serializer(&grant).expect("serializer");
    assert_eq!(
        translator.translate_filter(&predicate, &serializer).expect("filter"),
        doc! { "Access": { "$bitsAllSet": 2 } }
    );
}
