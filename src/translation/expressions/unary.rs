use super::{enum_representation, translate, translate_source, TranslatedExpression};
use crate::ast::{AstBinaryOperator, AstExpression, AstUnaryOperator};
use crate::error::{Error, Result};
use crate::expression::{Expr, Type, UnaryOp};
use crate::serialization::{EnumRepresentation, NullableSerializer};
use crate::translation::context::TranslationContext;

pub(super) fn translate_unary<'e>(
    ctx: &TranslationContext,
    expr: &'e Expr,
    op: UnaryOp,
    operand: &'e Expr,
    ty: &Type,
) -> Result<TranslatedExpression<'e>> {
    match op {
        UnaryOp::Not => {
            if !operand.ty().is_boolean() {
                return Err(Error::unsupported_because(expr, "the operand is not boolean"));
            }
            let operand = translate(ctx, operand)?;
            let ast = AstExpression::unary(AstUnaryOperator::Not, operand.ast);
            Ok(TranslatedExpression::new(expr, ast, operand.serializer))
        }
        UnaryOp::Negate => {
            if !operand.ty().is_numeric() {
                return Err(Error::unsupported_because(expr, "the operand is not numeric"));
            }
            let operand = translate(ctx, operand)?;
            let ast = AstExpression::binary(
                AstBinaryOperator::Subtract,
                AstExpression::constant(0),
                operand.ast,
            );
            Ok(TranslatedExpression::new(expr, ast, operand.serializer))
        }
        UnaryOp::ArrayLength => {
            let source = translate_source(ctx, operand)?;
            let ast = AstExpression::unary(AstUnaryOperator::Size, source.ast);
            Ok(TranslatedExpression::new(expr, ast, ctx.serializer_for(&Type::Int32)?))
        }
        UnaryOp::BitwiseNot => Err(Error::unsupported_because(
            expr,
            "bitwise complement has no server equivalent",
        )),
        UnaryOp::Convert => translate_convert(ctx, expr, operand, ty),
    }
}

fn translate_convert<'e>(
    ctx: &TranslationContext,
    expr: &'e Expr,
    operand: &'e Expr,
    to: &Type,
) -> Result<TranslatedExpression<'e>> {
    let from = operand.ty();
    let translated = translate(ctx, operand)?;

    // Nullable wrap/unwrap
    if from.non_nullable() == to.non_nullable() {
        let serializer = if to.is_nullable() && !from.is_nullable() {
            std::sync::Arc::new(NullableSerializer::new(translated.serializer.clone()))
        } else if from.is_nullable() && !to.is_nullable() {
            match translated.serializer.downcast_ref::<NullableSerializer>() {
                Some(nullable) => nullable.inner().clone(),
                None => translated.serializer.clone(),
            }
        } else {
            translated.serializer.clone()
        };
        return Ok(TranslatedExpression::new(expr, translated.ast, serializer));
    }

    if matches!(to, Type::Object) {
        return Ok(translated);
    }

    if from.is_enum() && to.is_integral() {
        return match enum_representation(&translated.serializer) {
            Some(EnumRepresentation::String) | None => Err(Error::unsupported_because(
                expr,
                "the enum is not stored as an integer",
            )),
            Some(_) => Ok(TranslatedExpression::new(expr, translated.ast, translated.serializer)),
        };
    }

    if from.is_integral() && to.is_enum() {
        let serializer = ctx.serializer_for(to)?;
        return match enum_representation(&serializer) {
            Some(EnumRepresentation::String) | None => Err(Error::unsupported_because(
                expr,
                "the enum is not stored as an integer",
            )),
            Some(_) => Ok(TranslatedExpression::new(expr, translated.ast, serializer)),
        };
    }

    let target = match to.non_nullable() {
        Type::Boolean if from.is_numeric() => Some("bool"),
        Type::DateTime if from.is_integral() => Some("date"),
        _ => None,
    };
    if let Some(target) = target {
        let ast = AstExpression::convert(translated.ast, target);
        return Ok(TranslatedExpression::new(expr, ast, ctx.serializer_for(to)?));
    }

    let conversion = match to.non_nullable() {
        Type::Int32 if from.is_numeric() => AstUnaryOperator::ToInt,
        Type::Int64 if from.is_numeric() => AstUnaryOperator::ToLong,
        Type::Double if from.is_numeric() => AstUnaryOperator::ToDouble,
        Type::Decimal128 if from.is_numeric() => AstUnaryOperator::ToDecimal,
        Type::String => AstUnaryOperator::ToString,
        _ => {
            return Err(Error::unsupported_because(
                expr,
                format!("conversion from {} to {} is not supported", from, to),
            ))
        }
    };
    let ast = AstExpression::unary(conversion, translated.ast);
    Ok(TranslatedExpression::new(expr, ast, ctx.serializer_for(to)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TranslationOptions;
    use crate::expression::{DocumentType, EnumType, Parameter};
    use crate::serialization::{ClassMap, SerializerRegistry};
    use bson::{doc, Bson};
    use std::sync::Arc;

    fn status() -> Type {
        EnumType::new("Status", vec![("Active", 1), ("Closed", 2)]).into_type()
    }

    fn setup(registry: SerializerRegistry) -> (TranslationContext, Parameter) {
        let ty = DocumentType::new("Account")
            .with_member("Balance", Type::Int32)
            .with_member("Limit", Type::nullable(Type::Int32))
            .with_member("Open", Type::Boolean)
            .with_member("Status", status())
            .with_member("Tags", Type::array(Type::String))
            .into_type();
        let ctx = TranslationContext::new(Arc::new(registry), TranslationOptions::default());
        let x = Parameter::new("x", ty);
        let serializer = ctx.serializer_for(&x.ty).unwrap();
        let symbol = ctx.create_root_symbol(&x, &serializer).unwrap();
        (ctx.with_symbol(symbol), x)
    }

    fn render(ctx: &TranslationContext, expr: &Expr) -> Result<Bson> {
        translate(ctx, expr).map(|t| t.ast.render())
    }

    #[test]
    fn test_not_and_negate() {
        let (ctx, x) = setup(SerializerRegistry::new());
        let not = Expr::not(Expr::parameter(&x).field("Open"));
        assert_eq!(render(&ctx, &not).unwrap(), Bson::Document(doc! { "$not": "$Open" }));
        let negate = Expr::negate(Expr::parameter(&x).field("Balance"));
        assert_eq!(
            render(&ctx, &negate).unwrap(),
            Bson::Document(doc! { "$subtract": [0, "$Balance"] })
        );
    }

    #[test]
    fn test_array_length() {
        let (ctx, x) = setup(SerializerRegistry::new());
        let expr = Expr::unary(UnaryOp::ArrayLength, Expr::parameter(&x).field("Tags"), Type::Int32);
        assert_eq!(render(&ctx, &expr).unwrap(), Bson::Document(doc! { "$size": "$Tags" }));
    }

    #[test]
    fn test_numeric_conversions() {
        let (ctx, x) = setup(SerializerRegistry::new());
        let to_double = Expr::convert(Expr::parameter(&x).field("Balance"), Type::Double);
        let translated = translate(&ctx, &to_double).unwrap();
        assert_eq!(translated.ast.render(), Bson::Document(doc! { "$toDouble": "$Balance" }));
        assert_eq!(translated.serializer.value_type(), &Type::Double);
        let to_string = Expr::convert(Expr::parameter(&x).field("Balance"), Type::String);
        assert_eq!(
            render(&ctx, &to_string).unwrap(),
            Bson::Document(doc! { "$toString": "$Balance" })
        );
    }

    #[test]
    fn test_convert_to_bool() {
        let (ctx, x) = setup(SerializerRegistry::new());
        let expr = Expr::convert(Expr::parameter(&x).field("Balance"), Type::Boolean);
        assert_eq!(
            render(&ctx, &expr).unwrap(),
            Bson::Document(doc! { "$convert": { "input": "$Balance", "to": "bool" } })
        );
    }

    #[test]
    fn test_nullable_conversions_pass_through() {
        let (ctx, x) = setup(SerializerRegistry::new());
        let widen = Expr::convert(Expr::parameter(&x).field("Balance"), Type::nullable(Type::Int32));
        let translated = translate(&ctx, &widen).unwrap();
        assert_eq!(translated.ast.render(), Bson::from("$Balance"));
        assert!(translated.serializer.value_type().is_nullable());
        let unwrap = Expr::convert(Expr::parameter(&x).field("Limit"), Type::Int32);
        let translated = translate(&ctx, &unwrap).unwrap();
        assert_eq!(translated.serializer.value_type(), &Type::Int32);
    }

    #[test]
    fn test_enum_conversion_depends_on_representation() {
        let (ctx, x) = setup(SerializerRegistry::new());
        let expr = Expr::convert(Expr::parameter(&x).field("Status"), Type::Int32);
        assert_eq!(render(&ctx, &expr).unwrap(), Bson::from("$Status"));

        let registry = SerializerRegistry::new();
        registry
            .register_class_map(ClassMap::new("Account").represent_as("Status", EnumRepresentation::String))
            .unwrap();
        let (ctx, x) = setup(registry);
        let expr = Expr::convert(Expr::parameter(&x).field("Status"), Type::Int32);
        assert!(matches!(render(&ctx, &expr), Err(Error::UnsupportedExpression { .. })));
    }

    #[test]
    fn test_unsupported_conversion() {
        let (ctx, x) = setup(SerializerRegistry::new());
        let expr = Expr::convert(Expr::parameter(&x).field("Open"), Type::DateTime);
        assert!(render(&ctx, &expr).is_err());
        let complement = Expr::unary(UnaryOp::BitwiseNot, Expr::parameter(&x).field("Balance"), Type::Int32);
        assert!(render(&ctx, &complement).is_err());
    }
}
