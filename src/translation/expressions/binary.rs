use super::{require, translate, translate_pair, TranslatedExpression};
use crate::ast::{AstBinaryOperator, AstExpression, AstNaryOperator};
use crate::error::{Error, Result};
use crate::expression::{BinaryOp, Expr, Type};
use crate::serialization::NullableSerializer;
use crate::translation::context::TranslationContext;

pub(super) fn translate_binary<'e>(
    ctx: &TranslationContext,
    expr: &'e Expr,
    op: BinaryOp,
    left: &'e Expr,
    right: &'e Expr,
) -> Result<TranslatedExpression<'e>> {
    match op {
        BinaryOp::LeftShift | BinaryOp::RightShift => {
            return Err(Error::unsupported_because(
                expr,
                "shift operators have no server equivalent",
            ))
        }
        BinaryOp::ArrayIndex => return translate_array_index(ctx, expr, left, right),
        _ => {}
    }

    let (l, r) = translate_pair(ctx, left, right)?;
    let left_ty = left.ty();
    let right_ty = right.ty();

    if op.is_comparison() {
        let ast = AstExpression::binary(comparison_operator(op), l.ast, r.ast);
        return Ok(TranslatedExpression::new(
            expr,
            ast,
            ctx.serializer_for(&Type::Boolean)?,
        ));
    }

    let serializer = l.serializer.clone();
    let ast = match op {
        BinaryOp::Add if left_ty.is_string() || right_ty.is_string() => {
            AstExpression::nary(AstNaryOperator::Concat, vec![l.ast, r.ast])?
        }
        BinaryOp::Add => {
            require_numeric(expr, left_ty, right_ty)?;
            AstExpression::nary(AstNaryOperator::Add, vec![l.ast, r.ast])?
        }
        BinaryOp::Subtract => {
            if !(left_ty.is_date_time() && right_ty.is_date_time()) {
                require_numeric(expr, left_ty, right_ty)?;
            }
            AstExpression::binary(AstBinaryOperator::Subtract, l.ast, r.ast)
        }
        BinaryOp::Multiply => {
            require_numeric(expr, left_ty, right_ty)?;
            AstExpression::nary(AstNaryOperator::Multiply, vec![l.ast, r.ast])?
        }
        BinaryOp::Divide => {
            require_numeric(expr, left_ty, right_ty)?;
            AstExpression::binary(AstBinaryOperator::Divide, l.ast, r.ast)
        }
        BinaryOp::Modulo => {
            require_numeric(expr, left_ty, right_ty)?;
            AstExpression::binary(AstBinaryOperator::Mod, l.ast, r.ast)
        }
        BinaryOp::Power => {
            require_numeric(expr, left_ty, right_ty)?;
            let ast = AstExpression::binary(AstBinaryOperator::Pow, l.ast, r.ast);
            return Ok(TranslatedExpression::new(expr, ast, ctx.serializer_for(expr.ty())?));
        }
        BinaryOp::AndAlso | BinaryOp::OrElse => {
            require_boolean(expr, left_ty, right_ty)?;
            logical(op, l.ast, r.ast)?
        }
        BinaryOp::And | BinaryOp::Or if left_ty.is_boolean() && right_ty.is_boolean() => {
            logical(op, l.ast, r.ast)?
        }
        BinaryOp::And | BinaryOp::Or | BinaryOp::ExclusiveOr => {
            if !(left_ty.is_integral() && right_ty.is_integral()) {
                return Err(Error::unsupported_because(
                    expr,
                    "bitwise operators require integral operands",
                ));
            }
            require(
                expr,
                ctx.options().compatibility_level.supports_bitwise(),
                "server version 6.3 or later",
            )?;
            let nary = match op {
                BinaryOp::And => AstNaryOperator::BitAnd,
                BinaryOp::Or => AstNaryOperator::BitOr,
                _ => AstNaryOperator::BitXor,
            };
            AstExpression::nary(nary, vec![l.ast, r.ast])?
        }
        BinaryOp::Coalesce => {
            let serializer = match l.serializer.downcast_ref::<NullableSerializer>() {
                Some(nullable) => nullable.inner().clone(),
                None => l.serializer.clone(),
            };
            let ast = AstExpression::binary(AstBinaryOperator::IfNull, l.ast, r.ast);
            return Ok(TranslatedExpression::new(expr, ast, serializer));
        }
        _ => return Err(Error::unsupported(expr)),
    };
    Ok(TranslatedExpression::new(expr, ast, serializer))
}

fn comparison_operator(op: BinaryOp) -> AstBinaryOperator {
    match op {
        BinaryOp::Equal => AstBinaryOperator::Eq,
        BinaryOp::NotEqual => AstBinaryOperator::Ne,
        BinaryOp::LessThan => AstBinaryOperator::Lt,
        BinaryOp::LessThanOrEqual => AstBinaryOperator::Lte,
        BinaryOp::GreaterThan => AstBinaryOperator::Gt,
        _ => AstBinaryOperator::Gte,
    }
}

fn logical(op: BinaryOp, left: AstExpression, right: AstExpression) -> Result<AstExpression> {
    let nary = match op {
        BinaryOp::AndAlso | BinaryOp::And => AstNaryOperator::And,
        _ => AstNaryOperator::Or,
    };
    AstExpression::nary(nary, vec![left, right])
}

fn require_numeric(expr: &Expr, left: &Type, right: &Type) -> Result<()> {
    if left.is_numeric() && right.is_numeric() {
        Ok(())
    } else {
        Err(Error::unsupported_because(
            expr,
            format!("operands of type {} and {} are not numeric", left, right),
        ))
    }
}

fn require_boolean(expr: &Expr, left: &Type, right: &Type) -> Result<()> {
    if left.is_boolean() && right.is_boolean() {
        Ok(())
    } else {
        Err(Error::unsupported_because(
            expr,
            "logical operators require boolean operands",
        ))
    }
}

fn translate_array_index<'e>(
    ctx: &TranslationContext,
    expr: &'e Expr,
    array: &'e Expr,
    index: &'e Expr,
) -> Result<TranslatedExpression<'e>> {
    let array = translate(ctx, array)?;
    let item = array
        .serializer
        .try_get_item_serialization_info()
        .ok_or_else(|| Error::unsupported_because(expr, "the indexed value is not an array"))?;
    let index = translate(ctx, index)?;
    let ast = AstExpression::binary(AstBinaryOperator::ArrayElemAt, array.ast, index.ast);
    Ok(TranslatedExpression::new(expr, ast, item.serializer))
}
