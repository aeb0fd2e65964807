//! Aggregation-expression translators.
//!
//! [`translate`] dispatches on the shape of the host node; every translator
//! recurses back through it for its operands. Each result pairs the AST with
//! the serializer of the value it produces.

mod binary;
mod conditional;
mod member;
mod methods;
mod new;
mod unary;

pub(crate) use methods::sequence::{translate_source, SequenceSource};
pub(crate) use methods::string::{escape_regex, ignore_case_option, literal_pattern};

use super::context::{Symbol, TranslationContext};
use crate::ast::expressions::is_safe_field_name;
use crate::ast::{AstExpression, AstVar, AstVarBinding};
use crate::error::{Error, Result};
use crate::expression::{Expr, Lambda, Parameter, Type};
use crate::serialization::{EnumRepresentation, EnumSerializer, NullableSerializer, Serializer};
use bson::Bson;
use std::sync::Arc;
use tracing::trace;

/// An AST expression together with the host node it came from and the
/// serializer of its value.
#[derive(Debug, Clone)]
pub struct TranslatedExpression<'e> {
    pub expression: &'e Expr,
    pub ast: AstExpression,
    pub serializer: Arc<dyn Serializer>,
}

impl<'e> TranslatedExpression<'e> {
    pub fn new(expression: &'e Expr, ast: AstExpression, serializer: Arc<dyn Serializer>) -> Self {
        Self {
            expression,
            ast,
            serializer,
        }
    }
}

/// Translate a host expression into an aggregation expression
pub fn translate<'e>(ctx: &TranslationContext, expr: &'e Expr) -> Result<TranslatedExpression<'e>> {
    trace!(expression = %expr, "translating expression");
    match expr {
        Expr::Constant { value, ty } => translate_constant(ctx, expr, value, ty),
        Expr::Parameter(parameter) => translate_parameter(ctx, expr, parameter),
        Expr::Member { target, member, .. } => member::translate_member(ctx, expr, target, member),
        Expr::Unary { op, operand, ty } => unary::translate_unary(ctx, expr, *op, operand, ty),
        Expr::Binary {
            op, left, right, ..
        } => binary::translate_binary(ctx, expr, *op, left, right),
        Expr::Conditional { .. } => conditional::translate_conditional(ctx, expr),
        Expr::Call {
            method,
            target,
            args,
            ..
        } => methods::translate_call(ctx, expr, *method, target.as_deref(), args),
        Expr::New { members, ty } => new::translate_new(ctx, expr, members, ty),
        Expr::NewArray { elements, ty } => new::translate_new_array(ctx, expr, elements, ty),
        Expr::Source { .. } => Err(Error::unsupported_because(
            expr,
            "a query source cannot appear inside an expression",
        )),
        Expr::Lambda(_) => Err(Error::unsupported_because(
            expr,
            "a lambda can only appear as a method argument",
        )),
    }
}

fn translate_constant<'e>(
    ctx: &TranslationContext,
    expr: &'e Expr,
    value: &Bson,
    ty: &Type,
) -> Result<TranslatedExpression<'e>> {
    let serializer = ctx.serializer_for(ty)?;
    let serialized = serializer.serialize(value)?;
    Ok(TranslatedExpression::new(
        expr,
        AstExpression::constant(serialized),
        serializer,
    ))
}

fn translate_parameter<'e>(
    ctx: &TranslationContext,
    expr: &'e Expr,
    parameter: &Parameter,
) -> Result<TranslatedExpression<'e>> {
    let symbol = ctx.resolve(parameter)?;
    let ast = symbol
        .ast()
        .cloned()
        .ok_or_else(|| Error::unsupported_because(expr, "the parameter has no value here"))?;
    Ok(TranslatedExpression::new(expr, ast, symbol.serializer().clone()))
}

/// Translate a constant using another operand's serializer so that it is
/// encoded the same way as the value it is combined with
pub(crate) fn translate_constant_as<'e>(
    ctx: &TranslationContext,
    expr: &'e Expr,
    serializer: &Arc<dyn Serializer>,
) -> Result<TranslatedExpression<'e>> {
    match expr {
        Expr::Constant { value, ty } => {
            let serialized = serialize_constant(ctx, value, ty, serializer)?;
            Ok(TranslatedExpression::new(
                expr,
                AstExpression::constant(serialized),
                serializer.clone(),
            ))
        }
        _ => translate(ctx, expr),
    }
}

/// Serialize `value` with `serializer`. Numeric constants the serializer
/// rejects (a fractional value against an integer field) keep their own
/// numeric encoding.
pub(crate) fn serialize_constant(
    ctx: &TranslationContext,
    value: &Bson,
    ty: &Type,
    serializer: &Arc<dyn Serializer>,
) -> Result<Bson> {
    match serializer.serialize(value) {
        Ok(serialized) => Ok(serialized),
        Err(_) if ty.is_numeric() && serializer.value_type().is_numeric() => {
            ctx.serializer_for(ty)?.serialize(value)
        }
        Err(e) => Err(e),
    }
}

/// Translate two operands; a constant on either side takes the other side's
/// serializer
pub(crate) fn translate_pair<'e>(
    ctx: &TranslationContext,
    left: &'e Expr,
    right: &'e Expr,
) -> Result<(TranslatedExpression<'e>, TranslatedExpression<'e>)> {
    if left.is_constant() && !right.is_constant() {
        let right = translate(ctx, right)?;
        let left = translate_constant_as(ctx, left, &right.serializer)?;
        return Ok((left, right));
    }
    let left = translate(ctx, left)?;
    let right = if right.is_constant() {
        translate_constant_as(ctx, right, &left.serializer)?
    } else {
        translate(ctx, right)?
    };
    Ok((left, right))
}

/// The lambda argument of a method call, checked for arity
pub(crate) fn lambda_arg<'e>(expr: &Expr, arg: &'e Expr, arity: usize) -> Result<&'e Lambda> {
    match arg.as_lambda() {
        Some(lambda) if lambda.parameters.len() == arity => Ok(lambda),
        Some(_) => Err(Error::unsupported_because(
            expr,
            format!("expected a lambda with {} parameter(s)", arity),
        )),
        None => Err(Error::unsupported_because(expr, "expected a lambda argument")),
    }
}

/// Translate a lambda body with its parameters bound to `symbols`
pub(crate) fn translate_lambda_body<'e>(
    ctx: &TranslationContext,
    lambda: &'e Lambda,
    symbols: Vec<Symbol>,
) -> Result<TranslatedExpression<'e>> {
    translate(&ctx.with_symbols(symbols), &lambda.body)
}

/// Integer value of a constant argument
pub(crate) fn constant_i64(expr: &Expr) -> Option<i64> {
    match expr.as_constant()? {
        Bson::Int32(value) => Some(i64::from(*value)),
        Bson::Int64(value) => Some(*value),
        _ => None,
    }
}

/// The enum representation behind a (possibly nullable) enum serializer
pub(crate) fn enum_representation(serializer: &Arc<dyn Serializer>) -> Option<EnumRepresentation> {
    if let Some(nullable) = serializer.downcast_ref::<NullableSerializer>() {
        return enum_representation(nullable.inner());
    }
    serializer
        .downcast_ref::<EnumSerializer>()
        .map(EnumSerializer::representation)
}

/// Access `name` on `input`, as a field path whenever possible
pub(crate) fn get_field(
    ctx: &TranslationContext,
    expr: &Expr,
    input: AstExpression,
    name: &str,
) -> Result<AstExpression> {
    if is_safe_field_name(name) {
        match &input {
            AstExpression::Var(var) if var.is_current() => return AstExpression::field(name),
            AstExpression::Var(var) => {
                return AstExpression::field_path(format!("{}.{}", var.render(), name))
            }
            AstExpression::FieldPath(path) => {
                return AstExpression::field_path(format!("{}.{}", path.as_str(), name))
            }
            _ => {}
        }
        if !ctx.options().compatibility_level.supports_get_field() {
            let var = ctx.fresh_var("doc")?;
            let body = AstExpression::field_path(format!("{}.{}", var.render(), name))?;
            return AstExpression::let_(vec![AstVarBinding::new(var, input)], body);
        }
    } else if !ctx.options().compatibility_level.supports_get_field() {
        return Err(Error::unsupported_because(
            expr,
            format!(
                "field name {:?} requires $getField (server 5.0 or later)",
                name
            ),
        ));
    }
    AstExpression::get_field(input, name)
}

/// Reference to a bound aggregation variable
pub(crate) fn var_ref(var: &AstVar) -> AstExpression {
    AstExpression::var(var.clone())
}

/// Unsupported unless the target server is at least the given version
pub(crate) fn require(expr: &Expr, supported: bool, requirement: &str) -> Result<()> {
    if supported {
        Ok(())
    } else {
        Err(Error::unsupported_because(
            expr,
            format!("it requires {}", requirement),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ServerVersion, TranslationOptions};
    use crate::expression::{BinaryOp, DocumentType, EnumType, MethodId};
    use crate::serialization::{ClassMap, SerializerRegistry};
    use pretty_assertions::assert_eq;

    fn color() -> Type {
        EnumType::new("Color", vec![("Red", 0), ("Green", 1), ("Blue", 2)]).into_type()
    }

    fn person() -> Type {
        DocumentType::new("Person")
            .with_member("Id", Type::ObjectId)
            .with_member("Name", Type::String)
            .with_member("Age", Type::Int32)
            .with_member("Score", Type::Double)
            .with_member("Nickname", Type::nullable(Type::String))
            .with_member("Born", Type::DateTime)
            .with_member("Tags", Type::array(Type::String))
            .with_member("Color", color())
            .with_member(
                "Address",
                DocumentType::new("Address")
                    .with_member("City", Type::String)
                    .into_type(),
            )
            .into_type()
    }

    struct Fixture {
        ctx: TranslationContext,
        x: Parameter,
    }

    fn fixture_with(registry: SerializerRegistry, options: TranslationOptions) -> Fixture {
        let ctx = TranslationContext::new(Arc::new(registry), options);
        let x = Parameter::new("x", person());
        let serializer = ctx.serializer_for(&x.ty).unwrap();
        let symbol = ctx.create_root_symbol(&x, &serializer).unwrap();
        Fixture {
            ctx: ctx.with_symbol(symbol),
            x,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(SerializerRegistry::new(), TranslationOptions::default())
    }

    fn render(f: &Fixture, expr: &Expr) -> Bson {
        translate(&f.ctx, expr).unwrap().ast.render()
    }

    fn x(f: &Fixture) -> Expr {
        Expr::parameter(&f.x)
    }

    #[test]
    fn test_member_access_on_current_document() {
        let f = fixture();
        assert_eq!(render(&f, &x(&f).field("Age")), Bson::from("$Age"));
        assert_eq!(render(&f, &x(&f).field("Id")), Bson::from("$_id"));
        assert_eq!(
            render(&f, &x(&f).field("Address").field("City")),
            Bson::from("$Address.City")
        );
    }

    #[test]
    fn test_parameter_is_current() {
        let f = fixture();
        assert_eq!(render(&f, &x(&f)), Bson::from("$$CURRENT"));
    }

    #[test]
    fn test_arithmetic() {
        let f = fixture();
        let expr = x(&f).field("Age").add(Expr::constant(1)).mul(Expr::constant(2));
        assert_eq!(
            render(&f, &expr),
            Bson::Document(bson::doc! { "$multiply": [{ "$add": ["$Age", 1] }, 2] })
        );
    }

    #[test]
    fn test_string_concatenation() {
        let f = fixture();
        let expr = x(&f).field("Name").add(Expr::constant("!"));
        assert_eq!(
            render(&f, &expr),
            Bson::Document(bson::doc! { "$concat": ["$Name", "!"] })
        );
    }

    #[test]
    fn test_constant_takes_field_serializer() {
        let registry = SerializerRegistry::new();
        registry
            .register_class_map(
                ClassMap::new("Person").represent_as("Color", EnumRepresentation::String),
            )
            .unwrap();
        let f = fixture_with(registry, TranslationOptions::default());
        let expr = x(&f)
            .field("Color")
            .eq(Expr::typed_constant(1, color()));
        assert_eq!(
            render(&f, &expr),
            Bson::Document(bson::doc! { "$eq": ["$Color", "Green"] })
        );
        let flipped = Expr::typed_constant(2, color()).eq(x(&f).field("Color"));
        assert_eq!(
            render(&f, &flipped),
            Bson::Document(bson::doc! { "$eq": ["Blue", "$Color"] })
        );
    }

    #[test]
    fn test_fractional_constant_against_integer_field() {
        let f = fixture();
        let expr = x(&f).field("Age").gt(Expr::constant(2.5));
        assert_eq!(
            render(&f, &expr),
            Bson::Document(bson::doc! { "$gt": ["$Age", 2.5] })
        );
    }

    #[test]
    fn test_comparison_serializer_is_boolean() {
        let f = fixture();
        let expr = x(&f).field("Age").lt(Expr::constant(3));
        let translated = translate(&f.ctx, &expr).unwrap();
        assert_eq!(translated.serializer.value_type(), &Type::Boolean);
    }

    #[test]
    fn test_shift_is_unsupported() {
        let f = fixture();
        let expr = Expr::binary(BinaryOp::LeftShift, x(&f).field("Age"), Expr::constant(1));
        assert!(matches!(
            translate(&f.ctx, &expr),
            Err(Error::UnsupportedExpression { .. })
        ));
    }

    #[test]
    fn test_bitwise_gated_by_server_version() {
        let expr_for = |f: &Fixture| Expr::binary(BinaryOp::And, x(f).field("Age"), Expr::constant(4));
        let f = fixture();
        assert_eq!(
            render(&f, &expr_for(&f)),
            Bson::Document(bson::doc! { "$bitAnd": ["$Age", 4] })
        );
        let old = fixture_with(
            SerializerRegistry::new(),
            TranslationOptions::default().with_compatibility_level(ServerVersion::V6_0),
        );
        assert!(translate(&old.ctx, &expr_for(&old)).is_err());
    }

    #[test]
    fn test_unresolvable_parameter() {
        let f = fixture();
        let y = Parameter::new("y", Type::Int32);
        assert!(matches!(
            translate(&f.ctx, &Expr::parameter(&y)),
            Err(Error::UnresolvableSymbol(name)) if name == "y"
        ));
    }

    #[test]
    fn test_unknown_member_is_unsupported() {
        let f = fixture();
        let expr = x(&f).member("Missing", Type::Int32);
        assert!(matches!(
            translate(&f.ctx, &expr),
            Err(Error::UnsupportedExpression { .. })
        ));
    }

    #[test]
    fn test_dollar_string_constant_is_quoted() {
        let f = fixture();
        let expr = x(&f).field("Name").eq(Expr::constant("$money"));
        assert_eq!(
            render(&f, &expr),
            Bson::Document(bson::doc! { "$eq": ["$Name", { "$literal": "$money" }] })
        );
    }

    #[test]
    fn test_call_dispatch_reaches_methods() {
        let f = fixture();
        let expr = x(&f)
            .field("Name")
            .call(MethodId::StringToUpper, vec![], Type::String);
        assert_eq!(
            render(&f, &expr),
            Bson::Document(bson::doc! { "$toUpper": "$Name" })
        );
    }

    #[test]
    fn test_get_field_fallback_for_unsafe_names() {
        let f = fixture();
        let ast = get_field(&f.ctx, &x(&f), AstExpression::current(), "a.b").unwrap();
        assert_eq!(
            ast.render(),
            Bson::Document(bson::doc! { "$getField": { "field": "a.b", "input": "$$CURRENT" } })
        );
        let old = fixture_with(
            SerializerRegistry::new(),
            TranslationOptions::default().with_compatibility_level(ServerVersion::V4_4),
        );
        assert!(get_field(&old.ctx, &x(&old), AstExpression::current(), "a.b").is_err());
    }
}
