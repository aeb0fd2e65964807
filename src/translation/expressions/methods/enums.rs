use super::{expect_args, receiver};
use crate::ast::{AstBinaryOperator, AstExpression, AstNaryOperator};
use crate::error::{Error, Result};
use crate::expression::{Expr, Type};
use crate::serialization::EnumRepresentation;
use crate::translation::context::TranslationContext;
use crate::translation::expressions::{
    enum_representation, require, translate, translate_constant_as, TranslatedExpression,
};

/// `flags.HasFlag(f)` as `(flags & f) == f`
pub(super) fn translate_has_flag<'e>(
    ctx: &TranslationContext,
    expr: &'e Expr,
    target: Option<&'e Expr>,
    args: &'e [Expr],
) -> Result<TranslatedExpression<'e>> {
    let target = receiver(expr, target)?;
    expect_args(expr, args, 1, 1)?;
    if !args[0].is_constant() {
        return Err(Error::unsupported_because(expr, "the flag must be a constant"));
    }
    require(
        expr,
        ctx.options().compatibility_level.supports_bitwise(),
        "server version 6.3 or later",
    )?;

    let flags = translate(ctx, target)?;
    match enum_representation(&flags.serializer) {
        Some(EnumRepresentation::Int32) | Some(EnumRepresentation::Int64) => {}
        _ => {
            return Err(Error::unsupported_because(
                expr,
                "the enum is not stored as an integer",
            ))
        }
    }
    let flag = translate_constant_as(ctx, &args[0], &flags.serializer)?;
    let ast = AstExpression::binary(
        AstBinaryOperator::Eq,
        AstExpression::nary(AstNaryOperator::BitAnd, vec![flags.ast, flag.ast.clone()])?,
        flag.ast,
    );
    Ok(TranslatedExpression::new(expr, ast, ctx.serializer_for(&Type::Boolean)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ServerVersion, TranslationOptions};
    use crate::expression::{DocumentType, EnumType, MethodId, Parameter};
    use crate::serialization::{ClassMap, SerializerRegistry};
    use bson::{doc, Bson};
    use std::sync::Arc;

    fn permissions() -> Type {
        EnumType::new("Permissions", vec![("Read", 1), ("Write", 2), ("Delete", 4)])
            .with_flags()
            .into_type()
    }

    fn setup(registry: SerializerRegistry, options: TranslationOptions) -> (TranslationContext, Parameter) {
        let ty = DocumentType::new("User")
            .with_member("Permissions", permissions())
            .into_type();
        let ctx = TranslationContext::new(Arc::new(registry), options);
        let u = Parameter::new("u", ty);
        let serializer = ctx.serializer_for(&u.ty).unwrap();
        let symbol = ctx.create_root_symbol(&u, &serializer).unwrap();
        (ctx.with_symbol(symbol), u)
    }

    fn has_write(u: &Parameter) -> Expr {
        Expr::parameter(u).field("Permissions").call(
            MethodId::EnumHasFlag,
            vec![Expr::typed_constant(2, permissions())],
            Type::Boolean,
        )
    }

    #[test]
    fn test_has_flag() {
        let (ctx, u) = setup(SerializerRegistry::new(), TranslationOptions::default());
        assert_eq!(
            translate(&ctx, &has_write(&u)).unwrap().ast.render(),
            Bson::Document(doc! { "$eq": [{ "$bitAnd": ["$Permissions", 2] }, 2] })
        );
    }

    #[test]
    fn test_has_flag_requires_bitwise_operators() {
        let (ctx, u) = setup(
            SerializerRegistry::new(),
            TranslationOptions::default().with_compatibility_level(ServerVersion::V6_0),
        );
        assert!(matches!(
            translate(&ctx, &has_write(&u)),
            Err(Error::UnsupportedExpression { .. })
        ));
    }

    #[test]
    fn test_has_flag_on_string_enum() {
        let registry = SerializerRegistry::new();
        registry
            .register_class_map(ClassMap::new("User").represent_as("Permissions", EnumRepresentation::String))
            .unwrap();
        let (ctx, u) = setup(registry, TranslationOptions::default());
        assert!(translate(&ctx, &has_write(&u)).is_err());
    }
}
