//! Sequence operators over array-valued operands (including the elements of
//! a grouping).

use super::{expect_args, receiver};
use crate::ast::{
    AstBinaryOperator, AstExpression, AstNaryOperator, AstTernaryOperator, AstUnaryOperator, AstVar,
};
use crate::error::{Error, Result};
use crate::expression::{Expr, Lambda, MethodId, Type};
use crate::serialization::{serializers_equal, ArraySerializer, Serializer};
use crate::translation::context::TranslationContext;
use crate::translation::expressions::{
    get_field, lambda_arg, serialize_constant, translate, translate_constant_as,
    TranslatedExpression,
};
use bson::Bson;
use std::sync::Arc;

/// An array-valued operand ready to feed an array operator.
#[derive(Debug, Clone)]
pub(crate) struct SequenceSource {
    pub ast: AstExpression,
    pub item_serializer: Arc<dyn Serializer>,
    pub array_serializer: Arc<dyn Serializer>,
}

/// Translate an array-valued expression. Groupings are addressed through
/// their elements field.
pub(crate) fn translate_source(ctx: &TranslationContext, expr: &Expr) -> Result<SequenceSource> {
    let translated = translate(ctx, expr)?;
    let info = translated
        .serializer
        .try_get_item_serialization_info()
        .ok_or_else(|| Error::unsupported_because(expr, "it is not a sequence"))?;
    match info.element_name {
        Some(element_name) => Ok(SequenceSource {
            ast: get_field(ctx, expr, translated.ast, &element_name)?,
            array_serializer: Arc::new(ArraySerializer::new(info.serializer.clone())),
            item_serializer: info.serializer,
        }),
        None => Ok(SequenceSource {
            ast: translated.ast,
            item_serializer: info.serializer,
            array_serializer: translated.serializer,
        }),
    }
}

/// A single-parameter lambda bound to a fresh variable over the items
struct ItemLambda<'e> {
    var: AstVar,
    ctx: TranslationContext,
    lambda: &'e Lambda,
}

impl<'e> ItemLambda<'e> {
    fn bind(
        ctx: &TranslationContext,
        expr: &Expr,
        arg: &'e Expr,
        item_serializer: &Arc<dyn Serializer>,
    ) -> Result<Self> {
        let lambda = lambda_arg(expr, arg, 1)?;
        let parameter = &lambda.parameters[0];
        let var = AstVar::new(ctx.names().unique_name(&parameter.name))?;
        let symbol = ctx.create_var_symbol(parameter, var.clone(), item_serializer)?;
        Ok(Self {
            var,
            ctx: ctx.with_symbol(symbol),
            lambda,
        })
    }

    fn body(&self) -> Result<TranslatedExpression<'e>> {
        translate(&self.ctx, &self.lambda.body)
    }
}

fn filtered(
    ctx: &TranslationContext,
    expr: &Expr,
    source: &SequenceSource,
    predicate: &Expr,
) -> Result<AstExpression> {
    let lambda = ItemLambda::bind(ctx, expr, predicate, &source.item_serializer)?;
    let body = lambda.body()?;
    Ok(AstExpression::filter(source.ast.clone(), lambda.var, body.ast))
}

fn mapped<'e>(
    ctx: &TranslationContext,
    expr: &Expr,
    source: &SequenceSource,
    selector: &'e Expr,
) -> Result<(AstExpression, Arc<dyn Serializer>)> {
    let lambda = ItemLambda::bind(ctx, expr, selector, &source.item_serializer)?;
    let body = lambda.body()?;
    Ok((
        AstExpression::map(source.ast.clone(), lambda.var, body.ast),
        body.serializer,
    ))
}

pub(crate) fn translate_sequence_call<'e>(
    ctx: &TranslationContext,
    expr: &'e Expr,
    method: MethodId,
    target: Option<&'e Expr>,
    args: &'e [Expr],
) -> Result<TranslatedExpression<'e>> {
    let target = receiver(expr, target)?;

    if method == MethodId::Contains {
        return translate_contains(ctx, expr, target, args);
    }
    if method == MethodId::Aggregate {
        return translate_aggregate(ctx, expr, target, args);
    }

    let source = translate_source(ctx, target)?;
    let boolean = || ctx.serializer_for(&Type::Boolean);

    let (ast, serializer) = match method {
        MethodId::Where => {
            expect_args(expr, args, 1, 1)?;
            let ast = filtered(ctx, expr, &source, &args[0])?;
            (ast, source.array_serializer.clone())
        }
        MethodId::Select => {
            expect_args(expr, args, 1, 1)?;
            let (ast, item) = mapped(ctx, expr, &source, &args[0])?;
            (ast, Arc::new(ArraySerializer::new(item)) as Arc<dyn Serializer>)
        }
        MethodId::Any => {
            expect_args(expr, args, 0, 1)?;
            let ast = match args.first() {
                None => AstExpression::binary(
                    AstBinaryOperator::Gt,
                    AstExpression::unary(AstUnaryOperator::Size, source.ast.clone()),
                    AstExpression::constant(0),
                ),
                Some(predicate) => {
                    let (mapped, _) = mapped(ctx, expr, &source, predicate)?;
                    AstExpression::unary(AstUnaryOperator::AnyElementTrue, mapped)
                }
            };
            (ast, boolean()?)
        }
        MethodId::All => {
            expect_args(expr, args, 1, 1)?;
            let (mapped, _) = mapped(ctx, expr, &source, &args[0])?;
            (
                AstExpression::unary(AstUnaryOperator::AllElementsTrue, mapped),
                boolean()?,
            )
        }
        MethodId::Count | MethodId::LongCount => {
            expect_args(expr, args, 0, 1)?;
            let input = match args.first() {
                None => source.ast.clone(),
                Some(predicate) => filtered(ctx, expr, &source, predicate)?,
            };
            let ty = if method == MethodId::Count {
                Type::Int32
            } else {
                Type::Int64
            };
            (
                AstExpression::unary(AstUnaryOperator::Size, input),
                ctx.serializer_for(&ty)?,
            )
        }
        MethodId::First | MethodId::FirstOrDefault | MethodId::Last | MethodId::LastOrDefault => {
            expect_args(expr, args, 0, 1)?;
            let input = match args.first() {
                None => source.ast.clone(),
                Some(predicate) => filtered(ctx, expr, &source, predicate)?,
            };
            let first = matches!(method, MethodId::First | MethodId::FirstOrDefault);
            let ast = if ctx.options().compatibility_level.supports_first_last() {
                let op = if first {
                    AstUnaryOperator::First
                } else {
                    AstUnaryOperator::Last
                };
                AstExpression::unary(op, input)
            } else {
                let index = if first { 0 } else { -1 };
                AstExpression::binary(
                    AstBinaryOperator::ArrayElemAt,
                    input,
                    AstExpression::constant(index),
                )
            };
            (ast, source.item_serializer.clone())
        }
        MethodId::ElementAt => {
            expect_args(expr, args, 1, 1)?;
            let index = translate(ctx, &args[0])?;
            (
                AstExpression::binary(AstBinaryOperator::ArrayElemAt, source.ast.clone(), index.ast),
                source.item_serializer.clone(),
            )
        }
        MethodId::Sum | MethodId::Average | MethodId::Max | MethodId::Min => {
            expect_args(expr, args, 0, 1)?;
            let (input, value_serializer) = match args.first() {
                None => (source.ast.clone(), source.item_serializer.clone()),
                Some(selector) => mapped(ctx, expr, &source, selector)?,
            };
            let op = match method {
                MethodId::Sum => AstUnaryOperator::ArraySum,
                MethodId::Average => AstUnaryOperator::ArrayAvg,
                MethodId::Max => AstUnaryOperator::ArrayMax,
                _ => AstUnaryOperator::ArrayMin,
            };
            let serializer = if method == MethodId::Average {
                ctx.serializer_for(expr.ty())?
            } else {
                value_serializer
            };
            (AstExpression::unary(op, input), serializer)
        }
        MethodId::Take => {
            expect_args(expr, args, 1, 1)?;
            let count = translate(ctx, &args[0])?;
            (
                AstExpression::binary(AstBinaryOperator::Slice, source.ast.clone(), count.ast),
                source.array_serializer.clone(),
            )
        }
        MethodId::Skip => {
            expect_args(expr, args, 1, 1)?;
            let count = translate(ctx, &args[0])?;
            (
                AstExpression::ternary(
                    AstTernaryOperator::Slice,
                    source.ast.clone(),
                    count.ast,
                    AstExpression::constant(i32::MAX),
                ),
                source.array_serializer.clone(),
            )
        }
        MethodId::Distinct => {
            expect_args(expr, args, 0, 0)?;
            (
                AstExpression::nary(AstNaryOperator::SetUnion, vec![source.ast.clone()])?,
                source.array_serializer.clone(),
            )
        }
        MethodId::Concat | MethodId::Union | MethodId::Intersect => {
            expect_args(expr, args, 1, 1)?;
            let other = other_sequence(ctx, expr, &source, &args[0])?;
            let op = match method {
                MethodId::Concat => AstNaryOperator::ConcatArrays,
                MethodId::Union => AstNaryOperator::SetUnion,
                _ => AstNaryOperator::SetIntersection,
            };
            (
                AstExpression::nary(op, vec![source.ast.clone(), other])?,
                source.array_serializer.clone(),
            )
        }
        MethodId::Except => {
            expect_args(expr, args, 1, 1)?;
            let other = other_sequence(ctx, expr, &source, &args[0])?;
            (
                AstExpression::binary(AstBinaryOperator::SetDifference, source.ast.clone(), other),
                source.array_serializer.clone(),
            )
        }
        MethodId::Reverse => {
            expect_args(expr, args, 0, 0)?;
            (
                AstExpression::unary(AstUnaryOperator::ReverseArray, source.ast.clone()),
                source.array_serializer.clone(),
            )
        }
        MethodId::ToArray | MethodId::ToList => {
            expect_args(expr, args, 0, 0)?;
            (source.ast.clone(), source.array_serializer.clone())
        }
        other => {
            return Err(Error::unsupported_because(
                expr,
                format!("{} is not supported inside an expression", other),
            ))
        }
    };
    Ok(TranslatedExpression::new(expr, ast, serializer))
}

/// The second operand of a set operator; items must be serialized alike
fn other_sequence(
    ctx: &TranslationContext,
    expr: &Expr,
    source: &SequenceSource,
    other: &Expr,
) -> Result<AstExpression> {
    if other.is_constant() {
        return Ok(translate_constant_as(ctx, other, &source.array_serializer)?.ast);
    }
    let other = translate_source(ctx, other)?;
    if !serializers_equal(&source.item_serializer, &other.item_serializer) {
        return Err(Error::ambiguous(
            expr,
            "both sequences must serialize their items the same way",
        ));
    }
    Ok(other.ast)
}

fn translate_contains<'e>(
    ctx: &TranslationContext,
    expr: &'e Expr,
    target: &'e Expr,
    args: &'e [Expr],
) -> Result<TranslatedExpression<'e>> {
    expect_args(expr, args, 1, 1)?;
    let value = &args[0];
    let (value_ast, array_ast) = match target {
        // constant list searched for a computed value
        Expr::Constant {
            value: Bson::Array(items),
            ty,
        } if !value.is_constant() => {
            let value = translate(ctx, value)?;
            let item_ty = ty.item_type().cloned().unwrap_or(Type::Object);
            let items = items
                .iter()
                .map(|item| serialize_constant(ctx, item, &item_ty, &value.serializer))
                .collect::<Result<Vec<_>>>()?;
            (value.ast, AstExpression::constant(Bson::Array(items)))
        }
        _ => {
            let source = translate_source(ctx, target)?;
            let value = translate_constant_as(ctx, value, &source.item_serializer)?;
            (value.ast, source.ast)
        }
    };
    Ok(TranslatedExpression::new(
        expr,
        AstExpression::binary(AstBinaryOperator::In, value_ast, array_ast),
        ctx.serializer_for(&Type::Boolean)?,
    ))
}

/// `Aggregate(seed, (acc, item) => ...)` as `$reduce`, with the accumulator
/// bound to `$$value` and the item to `$$this`
fn translate_aggregate<'e>(
    ctx: &TranslationContext,
    expr: &'e Expr,
    target: &'e Expr,
    args: &'e [Expr],
) -> Result<TranslatedExpression<'e>> {
    expect_args(expr, args, 2, 2)?;
    let source = translate_source(ctx, target)?;
    let seed = translate(ctx, &args[0])?;
    let lambda = lambda_arg(expr, &args[1], 2)?;
    let accumulator = ctx.create_var_symbol(
        &lambda.parameters[0],
        AstVar::new("value")?,
        &seed.serializer,
    )?;
    let item = ctx.create_var_symbol(
        &lambda.parameters[1],
        AstVar::new("this")?,
        &source.item_serializer,
    )?;
    let body = translate(&ctx.with_symbols(vec![accumulator, item]), &lambda.body)?;
    Ok(TranslatedExpression::new(
        expr,
        AstExpression::reduce(source.ast, seed.ast, body.ast),
        seed.serializer,
    ))
}
