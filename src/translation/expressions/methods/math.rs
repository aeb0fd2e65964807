use super::expect_args;
use crate::ast::{AstBinaryOperator, AstExpression, AstNaryOperator, AstUnaryOperator};
use crate::error::{Error, Result};
use crate::expression::{Expr, MethodId};
use crate::translation::context::TranslationContext;
use crate::translation::expressions::{translate, translate_pair, TranslatedExpression};

pub(super) fn translate_math_call<'e>(
    ctx: &TranslationContext,
    expr: &'e Expr,
    method: MethodId,
    args: &'e [Expr],
) -> Result<TranslatedExpression<'e>> {
    if let Some(arg) = args.iter().find(|arg| !arg.ty().is_numeric()) {
        return Err(Error::unsupported_because(
            expr,
            format!("{} is not numeric", arg),
        ));
    }

    // Operators that keep the operand's representation
    let same_representation = match method {
        MethodId::MathAbs => Some(AstUnaryOperator::Abs),
        MethodId::MathCeiling => Some(AstUnaryOperator::Ceil),
        MethodId::MathFloor => Some(AstUnaryOperator::Floor),
        MethodId::MathTruncate => Some(AstUnaryOperator::Trunc),
        _ => None,
    };
    if let Some(op) = same_representation {
        expect_args(expr, args, 1, 1)?;
        let value = translate(ctx, &args[0])?;
        let ast = AstExpression::unary(op, value.ast);
        return Ok(TranslatedExpression::new(expr, ast, value.serializer));
    }

    let ast = match method {
        MethodId::MathSqrt | MethodId::MathExp | MethodId::MathLog10 => {
            expect_args(expr, args, 1, 1)?;
            let op = match method {
                MethodId::MathSqrt => AstUnaryOperator::Sqrt,
                MethodId::MathExp => AstUnaryOperator::Exp,
                _ => AstUnaryOperator::Log10,
            };
            AstExpression::unary(op, translate(ctx, &args[0])?.ast)
        }
        MethodId::MathLog => {
            expect_args(expr, args, 1, 2)?;
            let value = translate(ctx, &args[0])?;
            match args.get(1) {
                None => AstExpression::unary(AstUnaryOperator::Ln, value.ast),
                Some(base) => AstExpression::binary(
                    AstBinaryOperator::Log,
                    value.ast,
                    translate(ctx, base)?.ast,
                ),
            }
        }
        MethodId::MathPow => {
            expect_args(expr, args, 2, 2)?;
            let base = translate(ctx, &args[0])?;
            let exponent = translate(ctx, &args[1])?;
            AstExpression::binary(AstBinaryOperator::Pow, base.ast, exponent.ast)
        }
        MethodId::MathRound => {
            expect_args(expr, args, 1, 2)?;
            let value = translate(ctx, &args[0])?;
            let place = match args.get(1) {
                Some(place) => translate(ctx, place)?.ast,
                None => AstExpression::constant(0),
            };
            let ast = AstExpression::binary(AstBinaryOperator::Round, value.ast, place);
            return Ok(TranslatedExpression::new(expr, ast, value.serializer));
        }
        MethodId::MathMax | MethodId::MathMin => {
            expect_args(expr, args, 2, 2)?;
            let (left, right) = translate_pair(ctx, &args[0], &args[1])?;
            let op = if method == MethodId::MathMax {
                AstNaryOperator::Max
            } else {
                AstNaryOperator::Min
            };
            let ast = AstExpression::nary(op, vec![left.ast, right.ast])?;
            return Ok(TranslatedExpression::new(expr, ast, left.serializer));
        }
        other => {
            return Err(Error::unsupported_because(
                expr,
                format!("{} is not a math method", other),
            ))
        }
    };
    Ok(TranslatedExpression::new(expr, ast, ctx.serializer_for(expr.ty())?))
}
