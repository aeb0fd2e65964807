//! Method-call translators, dispatched on [`MethodId`].

mod dates;
mod enums;
mod math;
pub(crate) mod sequence;
pub(crate) mod string;

use super::TranslatedExpression;
use crate::error::{Error, Result};
use crate::expression::{Expr, MethodId};
use crate::translation::context::TranslationContext;

pub(super) fn translate_call<'e>(
    ctx: &TranslationContext,
    expr: &'e Expr,
    method: MethodId,
    target: Option<&'e Expr>,
    args: &'e [Expr],
) -> Result<TranslatedExpression<'e>> {
    use MethodId::*;
    match method {
        StringToLower | StringToUpper | StringToLowerInvariant | StringToUpperInvariant
        | StringTrim | StringTrimStart | StringTrimEnd | StringStartsWith | StringEndsWith
        | StringContains | StringSubstring | StringIndexOf | StringSplit | StringReplace
        | StringConcat | StringIsNullOrEmpty | Equals | CompareTo | ToString | RegexIsMatch => {
            string::translate_string_call(ctx, expr, method, target, args)
        }
        MathAbs | MathCeiling | MathFloor | MathSqrt | MathExp | MathLog | MathLog10 | MathPow
        | MathRound | MathTruncate | MathMax | MathMin => {
            math::translate_math_call(ctx, expr, method, args)
        }
        EnumHasFlag => enums::translate_has_flag(ctx, expr, target, args),
        DateTimeAddDays | DateTimeAddHours | DateTimeAddMinutes | DateTimeAddSeconds
        | DateTimeAddMilliseconds => dates::translate_date_add(ctx, expr, method, target, args),
        _ => sequence::translate_sequence_call(ctx, expr, method, target, args),
    }
}

/// The receiver of an instance method
pub(super) fn receiver<'e>(expr: &Expr, target: Option<&'e Expr>) -> Result<&'e Expr> {
    target.ok_or_else(|| Error::unsupported_because(expr, "the method requires a receiver"))
}

/// Check the argument count against an inclusive range
pub(super) fn expect_args(expr: &Expr, args: &[Expr], min: usize, max: usize) -> Result<()> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            min.to_string()
        } else {
            format!("{} to {}", min, max)
        };
        return Err(Error::unsupported_because(
            expr,
            format!("expected {} argument(s), got {}", expected, args.len()),
        ));
    }
    Ok(())
}
