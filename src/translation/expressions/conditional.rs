use super::{serialize_constant, translate, TranslatedExpression};
use crate::ast::AstExpression;
use crate::error::{Error, Result};
use crate::expression::Expr;
use crate::serialization::{serializers_equal, Serializer};
use crate::translation::context::TranslationContext;
use std::sync::Arc;

/// `test ? a : b`, with chains of nested conditionals in the else branch
/// collapsed into one `$switch`
pub(super) fn translate_conditional<'e>(
    ctx: &TranslationContext,
    expr: &'e Expr,
) -> Result<TranslatedExpression<'e>> {
    let mut tests = Vec::new();
    let mut values = Vec::new();
    let mut current = expr;
    while let Expr::Conditional {
        test,
        if_true,
        if_false,
        ..
    } = current
    {
        if !test.ty().is_boolean() {
            return Err(Error::unsupported_because(expr, "the test is not boolean"));
        }
        tests.push(translate(ctx, test)?.ast);
        values.push(if_true.as_ref());
        current = if_false.as_ref();
    }
    values.push(current);

    let (asts, serializer) = translate_branches(ctx, expr, &values)?;
    let mut asts = asts.into_iter();
    let mut thens: Vec<AstExpression> = asts.by_ref().take(tests.len()).collect();
    let otherwise = asts.next().ok_or_else(|| Error::unsupported(expr))?;

    let ast = if tests.len() == 1 {
        let then = thens.remove(0);
        let test = tests.remove(0);
        AstExpression::cond(test, then, otherwise)
    } else {
        AstExpression::switch(tests.into_iter().zip(thens).collect(), Some(otherwise))?
    };
    Ok(TranslatedExpression::new(expr, ast, serializer))
}

/// Translate values that must share one serializer. Constants adopt the
/// serializer of the first non-constant value.
pub(super) fn translate_branches(
    ctx: &TranslationContext,
    expr: &Expr,
    values: &[&Expr],
) -> Result<(Vec<AstExpression>, Arc<dyn Serializer>)> {
    let mut translated = Vec::with_capacity(values.len());
    let mut reference: Option<Arc<dyn Serializer>> = None;
    for value in values.iter().filter(|v| !v.is_constant()) {
        let t = translate(ctx, value)?;
        match &reference {
            Some(expected) if !serializers_equal(expected, &t.serializer) => {
                return Err(Error::ambiguous(
                    expr,
                    format!(
                        "branches are serialized as {} and {}",
                        expected.value_type(),
                        t.serializer.value_type()
                    ),
                ));
            }
            Some(_) => {}
            None => reference = Some(t.serializer.clone()),
        }
        translated.push(t.ast);
    }

    let reference = match reference {
        Some(serializer) => serializer,
        None => match values.first() {
            Some(first) => ctx.serializer_for(first.ty())?,
            None => ctx.serializer_for(expr.ty())?,
        },
    };

    let mut non_constant = translated.into_iter();
    let mut asts = Vec::with_capacity(values.len());
    for value in values {
        match value {
            Expr::Constant { value: constant, ty } => asts.push(AstExpression::constant(
                serialize_constant(ctx, constant, ty, &reference)?,
            )),
            _ => asts.push(
                non_constant
                    .next()
                    .ok_or_else(|| Error::unsupported(expr))?,
            ),
        }
    }
    Ok((asts, reference))
}
