use super::{get_field, translate, translate_source, TranslatedExpression};
use crate::ast::{AstBinaryOperator, AstExpression, AstUnaryOperator};
use crate::error::{Error, Result};
use crate::expression::{Expr, Type};
use crate::serialization::NullableSerializer;
use crate::translation::context::TranslationContext;
use bson::Bson;

pub(super) fn translate_member<'e>(
    ctx: &TranslationContext,
    expr: &'e Expr,
    target: &'e Expr,
    member: &str,
) -> Result<TranslatedExpression<'e>> {
    let target_ty = target.ty();

    if target_ty.is_string() && member == "Length" {
        let target = translate(ctx, target)?;
        let ast = AstExpression::unary(AstUnaryOperator::StrLenCP, target.ast);
        return Ok(TranslatedExpression::new(expr, ast, ctx.serializer_for(&Type::Int32)?));
    }

    if matches!(target_ty, Type::Array(_)) && (member == "Count" || member == "Length") {
        let source = translate_source(ctx, target)?;
        let ast = AstExpression::unary(AstUnaryOperator::Size, source.ast);
        return Ok(TranslatedExpression::new(expr, ast, ctx.serializer_for(&Type::Int32)?));
    }

    if target_ty.is_nullable() {
        match member {
            "HasValue" => {
                let target = translate(ctx, target)?;
                let ast = AstExpression::binary(
                    AstBinaryOperator::Ne,
                    target.ast,
                    AstExpression::constant(Bson::Null),
                );
                return Ok(TranslatedExpression::new(
                    expr,
                    ast,
                    ctx.serializer_for(&Type::Boolean)?,
                ));
            }
            "Value" => {
                let target = translate(ctx, target)?;
                let serializer = match target.serializer.downcast_ref::<NullableSerializer>() {
                    Some(nullable) => nullable.inner().clone(),
                    None => target.serializer.clone(),
                };
                return Ok(TranslatedExpression::new(expr, target.ast, serializer));
            }
            _ => {}
        }
    }

    if target_ty.is_date_time() {
        if let Some(ast) = date_part(ctx, target, member)? {
            return Ok(TranslatedExpression::new(expr, ast, ctx.serializer_for(&Type::Int32)?));
        }
    }

    let target = translate(ctx, target)?;
    let info = target
        .serializer
        .try_get_member_serialization_info(member)
        .ok_or_else(|| {
            Error::unsupported_because(
                expr,
                format!(
                    "{} is not a serialized member of {}",
                    member,
                    target.serializer.value_type()
                ),
            )
        })?;
    let ast = get_field(ctx, expr, target.ast, &info.element_name)?;
    Ok(TranslatedExpression::new(expr, ast, info.serializer))
}

fn date_part(ctx: &TranslationContext, target: &Expr, member: &str) -> Result<Option<AstExpression>> {
    let op = match member {
        "Year" => AstUnaryOperator::Year,
        "Month" => AstUnaryOperator::Month,
        "Day" => AstUnaryOperator::DayOfMonth,
        "Hour" => AstUnaryOperator::Hour,
        "Minute" => AstUnaryOperator::Minute,
        "Second" => AstUnaryOperator::Second,
        "Millisecond" => AstUnaryOperator::Millisecond,
        "DayOfYear" => AstUnaryOperator::DayOfYear,
        "DayOfWeek" => AstUnaryOperator::DayOfWeek,
        _ => return Ok(None),
    };
    let date = translate(ctx, target)?;
    let part = AstExpression::unary(op, date.ast);
    // $dayOfWeek counts from 1 (Sunday); the host counts from 0
    if op == AstUnaryOperator::DayOfWeek {
        return Ok(Some(AstExpression::binary(
            AstBinaryOperator::Subtract,
            part,
            AstExpression::constant(1),
        )));
    }
    Ok(Some(part))
}
