use super::{field_filter, resolve_field, resolve_sequence, FilterScope};
use crate::ast::{AstComparisonOperator, AstFilter, AstFilterOperation};
use crate::error::Result;
use crate::expression::{BinaryOp, Expr, MethodId, UnaryOp};
use crate::translation::context::TranslationContext;
use crate::translation::expressions::{constant_i64, escape_regex, serialize_constant};
use bson::Bson;

fn comparison_operator(op: BinaryOp) -> Option<AstComparisonOperator> {
    match op {
        BinaryOp::Equal => Some(AstComparisonOperator::Eq),
        BinaryOp::NotEqual => Some(AstComparisonOperator::Ne),
        BinaryOp::LessThan => Some(AstComparisonOperator::Lt),
        BinaryOp::LessThanOrEqual => Some(AstComparisonOperator::Lte),
        BinaryOp::GreaterThan => Some(AstComparisonOperator::Gt),
        BinaryOp::GreaterThanOrEqual => Some(AstComparisonOperator::Gte),
        _ => None,
    }
}

/// `field op constant`, with the constant on either side
pub(super) fn try_translate_comparison(
    ctx: &TranslationContext,
    op: BinaryOp,
    left: &Expr,
    right: &Expr,
    scope: FilterScope,
) -> Result<Option<AstFilter>> {
    let (op, left, right) = if left.is_constant() && !right.is_constant() {
        (op.flipped(), right, left)
    } else {
        (op, left, right)
    };
    let Some(value) = right.as_constant() else {
        return Ok(None);
    };

    if let Some(filter) = try_size(ctx, op, left, right, scope)? {
        return Ok(Some(filter));
    }
    if let Some(filter) = try_modulo(ctx, op, left, right, scope)? {
        return Ok(Some(filter));
    }
    if let Some(filter) = try_case_insensitive(ctx, op, left, value, scope)? {
        return Ok(Some(filter));
    }
    if let Some(filter) = try_compare_to(ctx, op, left, value, scope)? {
        return Ok(Some(filter));
    }
    if let Some(filter) = try_bits(ctx, op, left, value, scope)? {
        return Ok(Some(filter));
    }

    let Some(field) = resolve_field(ctx, left, scope)? else {
        return Ok(None);
    };
    let Some(comparison) = comparison_operator(op) else {
        return Ok(None);
    };
    let value = serialize_constant(ctx, value, right.ty(), &field.serializer)?;
    field_filter(&field, scope, AstFilterOperation::comparison(comparison, value))
}

/// The array whose length `expr` measures, if it measures one
fn measured_array(expr: &Expr) -> Option<&Expr> {
    match expr {
        Expr::Member { target, member, .. }
            if (member == "Count" || member == "Length") && target.ty().item_type().is_some() =>
        {
            Some(target)
        }
        Expr::Call {
            method: MethodId::Count | MethodId::LongCount,
            target: Some(target),
            args,
            ..
        } if args.is_empty() => Some(target),
        Expr::Unary {
            op: UnaryOp::ArrayLength,
            operand,
            ..
        } => Some(operand),
        _ => None,
    }
}

/// Array length comparisons: `$size` for (in)equality, existence of the
/// element at the boundary index for ordering
fn try_size(
    ctx: &TranslationContext,
    op: BinaryOp,
    left: &Expr,
    right: &Expr,
    scope: FilterScope,
) -> Result<Option<AstFilter>> {
    let (Some(array), Some(n)) = (measured_array(left), constant_i64(right)) else {
        return Ok(None);
    };
    let Some(sequence) = resolve_sequence(ctx, array, scope)? else {
        return Ok(None);
    };
    let field = sequence.field;
    let exists_at = |index: i64, exists: bool| -> Result<Option<AstFilter>> {
        let element = field.child(&index.to_string(), field.serializer.clone());
        field_filter(&element, scope, AstFilterOperation::Exists(exists))
    };
    match op {
        BinaryOp::Equal if n >= 0 => field_filter(&field, scope, AstFilterOperation::size(n)?),
        BinaryOp::NotEqual if n >= 0 => Ok(field_filter(&field, scope, AstFilterOperation::size(n)?)?
            .map(AstFilter::not)),
        // count > n  <=>  items[n] exists
        BinaryOp::GreaterThan if n >= 0 => exists_at(n, true),
        BinaryOp::GreaterThanOrEqual if n >= 1 => exists_at(n - 1, true),
        BinaryOp::LessThan if n >= 1 => exists_at(n - 1, false),
        BinaryOp::LessThanOrEqual if n >= 0 => exists_at(n, false),
        _ => Ok(None),
    }
}

/// `x.A % m == r`
fn try_modulo(
    ctx: &TranslationContext,
    op: BinaryOp,
    left: &Expr,
    right: &Expr,
    scope: FilterScope,
) -> Result<Option<AstFilter>> {
    let Expr::Binary {
        op: BinaryOp::Modulo,
        left: dividend,
        right: divisor,
        ..
    } = left
    else {
        return Ok(None);
    };
    let (Some(divisor), Some(remainder)) = (constant_i64(divisor), constant_i64(right)) else {
        return Ok(None);
    };
    if divisor == 0 || !dividend.ty().is_integral() {
        return Ok(None);
    }
    let Some(field) = resolve_field(ctx, dividend, scope)? else {
        return Ok(None);
    };
    let filter = field_filter(&field, scope, AstFilterOperation::modulo(divisor, remainder)?)?;
    match op {
        BinaryOp::Equal => Ok(filter),
        BinaryOp::NotEqual => Ok(filter.map(AstFilter::not)),
        _ => Ok(None),
    }
}

/// `x.Name.ToLower() == "abc"` as a case-insensitive regex. A constant that
/// is not already in the target case can never match, so it is left to
/// `$expr`.
fn try_case_insensitive(
    ctx: &TranslationContext,
    op: BinaryOp,
    left: &Expr,
    value: &Bson,
    scope: FilterScope,
) -> Result<Option<AstFilter>> {
    let Expr::Call {
        method,
        target: Some(target),
        args,
        ..
    } = left
    else {
        return Ok(None);
    };
    let Bson::String(value) = value else {
        return Ok(None);
    };
    let in_case = match method {
        MethodId::StringToLower | MethodId::StringToLowerInvariant => *value == value.to_lowercase(),
        MethodId::StringToUpper | MethodId::StringToUpperInvariant => *value == value.to_uppercase(),
        _ => return Ok(None),
    };
    if !args.is_empty() || !in_case {
        return Ok(None);
    }
    let Some(field) = resolve_field(ctx, target, scope)? else {
        return Ok(None);
    };
    let regex = AstFilterOperation::regex(format!("^{}$", escape_regex(value)), "i".to_string());
    let filter = field_filter(&field, scope, regex)?;
    match op {
        BinaryOp::Equal => Ok(filter),
        BinaryOp::NotEqual => Ok(filter.map(AstFilter::not)),
        _ => Ok(None),
    }
}

/// `x.Name.CompareTo("m") > 0` as `{ Name: { $gt: "m" } }`
fn try_compare_to(
    ctx: &TranslationContext,
    op: BinaryOp,
    left: &Expr,
    value: &Bson,
    scope: FilterScope,
) -> Result<Option<AstFilter>> {
    let Expr::Call {
        method: MethodId::CompareTo,
        target: Some(target),
        args,
        ..
    } = left
    else {
        return Ok(None);
    };
    if !matches!(value, Bson::Int32(0) | Bson::Int64(0)) || args.len() != 1 || !args[0].is_constant() {
        return Ok(None);
    }
    try_translate_comparison(ctx, op, target, &args[0], scope)
}

/// `(x.F & mask) == mask` and `(x.F & mask) != 0`
fn try_bits(
    ctx: &TranslationContext,
    op: BinaryOp,
    left: &Expr,
    value: &Bson,
    scope: FilterScope,
) -> Result<Option<AstFilter>> {
    let Expr::Binary {
        op: BinaryOp::And,
        left: operand,
        right: mask,
        ..
    } = left
    else {
        return Ok(None);
    };
    if !operand.ty().is_integral() && !operand.ty().is_enum() {
        return Ok(None);
    }
    let Some(mask) = constant_i64(mask) else {
        return Ok(None);
    };
    let compared = match value {
        Bson::Int32(v) => i64::from(*v),
        Bson::Int64(v) => *v,
        _ => return Ok(None),
    };
    let Some(field) = resolve_field(ctx, operand, scope)? else {
        return Ok(None);
    };
    match op {
        BinaryOp::Equal if compared == mask => {
            field_filter(&field, scope, AstFilterOperation::BitsAllSet(mask))
        }
        BinaryOp::NotEqual if compared == 0 => {
            field_filter(&field, scope, AstFilterOperation::BitsAnySet(mask))
        }
        _ => Ok(None),
    }
}
