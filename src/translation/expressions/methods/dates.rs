use super::{expect_args, receiver};
use crate::ast::{AstDateUnit, AstExpression, AstNaryOperator, AstUnaryOperator};
use crate::error::{Error, Result};
use crate::expression::{Expr, MethodId};
use crate::translation::context::TranslationContext;
use crate::translation::expressions::{require, translate, TranslatedExpression};

fn unit_of(method: MethodId) -> Option<(AstDateUnit, i64)> {
    match method {
        MethodId::DateTimeAddDays => Some((AstDateUnit::Day, 86_400_000)),
        MethodId::DateTimeAddHours => Some((AstDateUnit::Hour, 3_600_000)),
        MethodId::DateTimeAddMinutes => Some((AstDateUnit::Minute, 60_000)),
        MethodId::DateTimeAddSeconds => Some((AstDateUnit::Second, 1_000)),
        MethodId::DateTimeAddMilliseconds => Some((AstDateUnit::Millisecond, 1)),
        _ => None,
    }
}

/// `date.AddDays(n)` and friends. `$dateAdd` only takes whole amounts, so a
/// fractional amount is scaled to milliseconds and truncated.
pub(super) fn translate_date_add<'e>(
    ctx: &TranslationContext,
    expr: &'e Expr,
    method: MethodId,
    target: Option<&'e Expr>,
    args: &'e [Expr],
) -> Result<TranslatedExpression<'e>> {
    let target = receiver(expr, target)?;
    expect_args(expr, args, 1, 1)?;
    require(
        expr,
        ctx.options().compatibility_level.supports_date_add(),
        "server version 5.0 or later",
    )?;
    let (unit, millis) = unit_of(method)
        .ok_or_else(|| Error::unsupported_because(expr, format!("{} is not a date method", method)))?;
    if !target.ty().is_date_time() {
        return Err(Error::unsupported_because(expr, "the receiver is not a date"));
    }

    let start = translate(ctx, target)?;
    let amount = translate(ctx, &args[0])?;
    let ast = if args[0].ty().is_integral() {
        AstExpression::date_add(start.ast, unit, amount.ast)
    } else if args[0].ty().is_numeric() {
        let scaled = if millis == 1 {
            amount.ast
        } else {
            AstExpression::nary(
                AstNaryOperator::Multiply,
                vec![amount.ast, AstExpression::constant(millis)],
            )?
        };
        AstExpression::date_add(
            start.ast,
            AstDateUnit::Millisecond,
            AstExpression::unary(AstUnaryOperator::ToLong, scaled),
        )
    } else {
        return Err(Error::unsupported_because(expr, "the amount is not numeric"));
    };
    Ok(TranslatedExpression::new(expr, ast, start.serializer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ServerVersion, TranslationOptions};
    use crate::expression::{DocumentType, Parameter, Type};
    use crate::serialization::SerializerRegistry;
    use bson::{doc, Bson};
    use std::sync::Arc;

    fn setup(options: TranslationOptions) -> (TranslationContext, Parameter) {
        let ty = DocumentType::new("Order")
            .with_member("Placed", Type::DateTime)
            .with_member("Days", Type::Int32)
            .into_type();
        let ctx = TranslationContext::new(Arc::new(SerializerRegistry::new()), options);
        let o = Parameter::new("o", ty);
        let serializer = ctx.serializer_for(&o.ty).unwrap();
        let symbol = ctx.create_root_symbol(&o, &serializer).unwrap();
        (ctx.with_symbol(symbol), o)
    }

    fn add(o: &Parameter, method: MethodId, amount: Expr) -> Expr {
        Expr::parameter(o)
            .field("Placed")
            .call(method, vec![amount], Type::DateTime)
    }

    #[test]
    fn test_add_whole_days() {
        let (ctx, o) = setup(TranslationOptions::default());
        let expr = add(&o, MethodId::DateTimeAddDays, Expr::parameter(&o).field("Days"));
        assert_eq!(
            translate(&ctx, &expr).unwrap().ast.render(),
            Bson::Document(doc! {
                "$dateAdd": { "startDate": "$Placed", "unit": "day", "amount": "$Days" }
            })
        );
    }

    #[test]
    fn test_add_fractional_hours() {
        let (ctx, o) = setup(TranslationOptions::default());
        let expr = add(&o, MethodId::DateTimeAddHours, Expr::constant(1.5));
        assert_eq!(
            translate(&ctx, &expr).unwrap().ast.render(),
            Bson::Document(doc! {
                "$dateAdd": {
                    "startDate": "$Placed",
                    "unit": "millisecond",
                    "amount": { "$toLong": { "$multiply": [1.5, 3_600_000_i64] } },
                }
            })
        );
    }

    #[test]
    fn test_date_add_requires_5_0() {
        let (ctx, o) = setup(TranslationOptions::default().with_compatibility_level(ServerVersion::V4_4));
        let expr = add(&o, MethodId::DateTimeAddDays, Expr::constant(1));
        assert!(matches!(
            translate(&ctx, &expr),
            Err(Error::UnsupportedExpression { .. })
        ));
    }
}
