use super::comparison::try_translate_comparison;
use super::{field_filter, resolve_field, resolve_sequence, translate_in_scope, FilterScope};
use crate::ast::{AstComparisonOperator, AstExpression, AstFilter, AstFilterOperation};
use crate::error::{Error, Result};
use crate::expression::{BinaryOp, Expr, MethodId};
use crate::serialization::EnumRepresentation;
use crate::translation::context::{Symbol, TranslationContext};
use crate::translation::expressions::{
    enum_representation, ignore_case_option, lambda_arg, literal_pattern, serialize_constant,
};
use bson::Bson;

pub(super) fn try_translate_call(
    ctx: &TranslationContext,
    expr: &Expr,
    method: MethodId,
    target: Option<&Expr>,
    args: &[Expr],
    scope: FilterScope,
) -> Result<Option<AstFilter>> {
    match (method, target) {
        (MethodId::StringStartsWith | MethodId::StringEndsWith | MethodId::StringContains, Some(target)) => {
            let Some(Bson::String(value)) = args.first().and_then(Expr::as_constant) else {
                return Ok(None);
            };
            let Some(field) = resolve_field(ctx, target, scope)? else {
                return Ok(None);
            };
            let options = ignore_case_option(expr, args)?;
            let regex = AstFilterOperation::regex(literal_pattern(method, value), options.to_string());
            field_filter(&field, scope, regex)
        }
        (MethodId::StringIsNullOrEmpty, None) if args.len() == 1 => {
            let Some(field) = resolve_field(ctx, &args[0], scope)? else {
                return Ok(None);
            };
            field_filter(
                &field,
                scope,
                AstFilterOperation::In(vec![Bson::Null, Bson::from("")]),
            )
        }
        (MethodId::RegexIsMatch, None) if args.len() >= 2 => {
            let (Some(Bson::String(pattern)), options) = (args[1].as_constant(), args.get(2)) else {
                return Ok(None);
            };
            let options = match options.map(Expr::as_constant) {
                None => String::new(),
                Some(Some(Bson::String(options))) => options.clone(),
                Some(_) => return Ok(None),
            };
            let Some(field) = resolve_field(ctx, &args[0], scope)? else {
                return Ok(None);
            };
            field_filter(&field, scope, AstFilterOperation::regex(pattern.clone(), options))
        }
        (MethodId::Contains, Some(source)) if args.len() == 1 => {
            try_contains(ctx, source, &args[0], scope)
        }
        (MethodId::Any, Some(source)) => try_any(ctx, expr, source, args, scope),
        (MethodId::EnumHasFlag, Some(target)) if args.len() == 1 => {
            try_has_flag(ctx, target, &args[0], scope)
        }
        (MethodId::Equals, Some(target)) if args.len() == 1 => {
            try_translate_comparison(ctx, BinaryOp::Equal, target, &args[0], scope)
        }
        (MethodId::Equals, None) if args.len() == 2 => {
            try_translate_comparison(ctx, BinaryOp::Equal, &args[0], &args[1], scope)
        }
        _ => Ok(None),
    }
}

/// `[a, b].Contains(x.F)` as `$in`, `x.Tags.Contains(c)` as `{ Tags: c }`
fn try_contains(
    ctx: &TranslationContext,
    source: &Expr,
    value: &Expr,
    scope: FilterScope,
) -> Result<Option<AstFilter>> {
    if let Expr::Constant {
        value: Bson::Array(items),
        ty,
    } = source
    {
        let Some(field) = resolve_field(ctx, value, scope)? else {
            return Ok(None);
        };
        let item_type = ty.item_type().unwrap_or(value.ty());
        let values = items
            .iter()
            .map(|item| serialize_constant(ctx, item, item_type, &field.serializer))
            .collect::<Result<Vec<_>>>()?;
        return field_filter(&field, scope, AstFilterOperation::In(values));
    }

    let Some(constant) = value.as_constant() else {
        return Ok(None);
    };
    let Some(sequence) = resolve_sequence(ctx, source, scope)? else {
        return Ok(None);
    };
    let serialized = serialize_constant(ctx, constant, value.ty(), &sequence.item_serializer)?;
    field_filter(
        &sequence.field,
        scope,
        AstFilterOperation::comparison(AstComparisonOperator::Eq, serialized),
    )
}

/// `Any()` as non-null and non-empty, `Any(p)` as `$elemMatch`
fn try_any(
    ctx: &TranslationContext,
    expr: &Expr,
    source: &Expr,
    args: &[Expr],
    scope: FilterScope,
) -> Result<Option<AstFilter>> {
    let Some(sequence) = resolve_sequence(ctx, source, scope)? else {
        return Ok(None);
    };
    let Some(predicate) = args.first() else {
        let non_null = field_filter(
            &sequence.field,
            scope,
            AstFilterOperation::comparison(AstComparisonOperator::Ne, Bson::Null),
        )?;
        let non_empty = field_filter(&sequence.field, scope, AstFilterOperation::size(0)?)?;
        return match (non_null, non_empty) {
            (Some(non_null), Some(empty)) => {
                AstFilter::and(vec![non_null, AstFilter::not(empty)]).map(Some)
            }
            _ => Ok(None),
        };
    };

    let lambda = lambda_arg(expr, predicate, 1)?;
    let item = &lambda.parameters[0];
    let symbol = Symbol::new(
        item,
        ctx.names().unique_name(&item.name),
        AstExpression::current(),
        sequence.item_serializer.clone(),
        true,
    );
    let element_ctx = ctx.with_symbol(symbol);
    let Some(inner) = translate_in_scope(&element_ctx, &lambda.body, FilterScope::Element(item.id))? else {
        return Ok(None);
    };
    if inner.references_element() && inner.render_element_operations().is_none() {
        return Ok(None);
    }
    field_filter(&sequence.field, scope, AstFilterOperation::elem_match(inner)?)
}

/// `x.Flags.HasFlag(f)` as `$bitsAllSet`; string-represented enums have no
/// bit form
fn try_has_flag(
    ctx: &TranslationContext,
    target: &Expr,
    flag: &Expr,
    scope: FilterScope,
) -> Result<Option<AstFilter>> {
    let Some(constant) = flag.as_constant() else {
        return Ok(None);
    };
    let Some(field) = resolve_field(ctx, target, scope)? else {
        return Ok(None);
    };
    match enum_representation(&field.serializer) {
        Some(EnumRepresentation::Int32) | Some(EnumRepresentation::Int64) => {}
        _ => return Ok(None),
    }
    let mask = match field.serializer.serialize(constant)? {
        Bson::Int32(mask) => i64::from(mask),
        Bson::Int64(mask) => mask,
        other => {
            return Err(Error::Serialization(format!(
                "flag {} did not serialize to an integer",
                other
            )))
        }
    };
    field_filter(&field, scope, AstFilterOperation::BitsAllSet(mask))
}
