//! Predicates to match filters.
//!
//! Each predicate node is first tried in the query language. When a node has
//! no query-language form it is wrapped in `$expr` and translated with the
//! aggregation translators instead; the decision is made per node, so
//! `x.A == 1 && x.B.Length > x.C` keeps `{ A: 1 }` as a plain filter.
//!
//! Inside `$elemMatch` there is no `$expr` to fall back to, so element
//! filters report `None` and the enclosing `Any` falls back as a whole.

mod comparison;
mod methods;

use crate::ast::{AstComparisonOperator, AstFilter, AstFilterField, AstFilterOperation};
use crate::error::{Error, Result};
use crate::expression::{BinaryOp, Expr, ParameterId, Type, UnaryOp};
use crate::serialization::{NullableSerializer, Serializer};
use crate::translation::context::TranslationContext;
use crate::translation::expressions::translate;
use bson::Bson;
use std::sync::Arc;
use tracing::debug;

/// Where a predicate is being lowered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FilterScope {
    /// A top-level match filter; `$expr` is available
    Document,
    /// The body of an `$elemMatch` over the items bound to this parameter
    Element(ParameterId),
}

/// A value stored at a fixed path relative to the filtered document (or
/// the element itself, when `path` is `None`).
#[derive(Debug, Clone)]
pub(crate) struct ResolvedField {
    pub path: Option<String>,
    pub serializer: Arc<dyn Serializer>,
}

impl ResolvedField {
    fn child(&self, name: &str, serializer: Arc<dyn Serializer>) -> ResolvedField {
        let path = match &self.path {
            Some(path) => format!("{}.{}", path, name),
            None => name.to_string(),
        };
        ResolvedField {
            path: Some(path),
            serializer,
        }
    }

    /// The filter field for this path; the element itself can only be
    /// addressed inside `$elemMatch`
    pub fn filter_field(&self, scope: FilterScope) -> Result<Option<AstFilterField>> {
        match (&self.path, scope) {
            (Some(path), _) => AstFilterField::new(path.clone()).map(Some),
            (None, FilterScope::Element(_)) => Ok(Some(AstFilterField::element())),
            (None, FilterScope::Document) => Ok(None),
        }
    }
}

/// Translate a top-level predicate. Never fails for lack of a
/// query-language form.
pub(crate) fn translate_predicate(ctx: &TranslationContext, expr: &Expr) -> Result<AstFilter> {
    translate_in_scope(ctx, expr, FilterScope::Document)?
        .ok_or_else(|| Error::unsupported_because(expr, "it has no filter form"))
}

pub(crate) fn translate_in_scope(
    ctx: &TranslationContext,
    expr: &Expr,
    scope: FilterScope,
) -> Result<Option<AstFilter>> {
    if !expr.ty().non_nullable().is_boolean() {
        return Err(Error::unsupported_because(expr, "the predicate is not boolean"));
    }
    if let Some(filter) = try_translate(ctx, expr, scope)? {
        return Ok(Some(filter));
    }
    match scope {
        FilterScope::Document => {
            debug!(expression = %expr, "no query-language form, using $expr");
            let translated = translate(ctx, expr)?;
            Ok(Some(AstFilter::expr(translated.ast)))
        }
        FilterScope::Element(_) => Ok(None),
    }
}

fn try_translate(ctx: &TranslationContext, expr: &Expr, scope: FilterScope) -> Result<Option<AstFilter>> {
    match expr {
        Expr::Binary { op, left, right, .. } => match op {
            BinaryOp::AndAlso | BinaryOp::And if left.ty().is_boolean() => {
                let children = translate_children(ctx, expr, BinaryOp::AndAlso, BinaryOp::And, scope)?;
                children.map(AstFilter::and).transpose()
            }
            BinaryOp::OrElse | BinaryOp::Or if left.ty().is_boolean() => {
                let children = translate_children(ctx, expr, BinaryOp::OrElse, BinaryOp::Or, scope)?;
                children.map(AstFilter::or).transpose()
            }
            op if op.is_comparison() => {
                comparison::try_translate_comparison(ctx, *op, left, right, scope)
            }
            _ => Ok(None),
        },
        Expr::Unary {
            op: UnaryOp::Not,
            operand,
            ..
        } => Ok(translate_in_scope(ctx, operand, scope)?.map(AstFilter::not)),
        Expr::Call {
            method,
            target,
            args,
            ..
        } => methods::try_translate_call(ctx, expr, *method, target.as_deref(), args, scope),
        Expr::Member { target, member, .. } if member == "HasValue" && target.ty().is_nullable() => {
            let Some(field) = resolve_field(ctx, target, scope)? else {
                return Ok(None);
            };
            Ok(field.filter_field(scope)?.map(|field| {
                AstFilter::compare(field, AstComparisonOperator::Ne, Bson::Null)
            }))
        }
        Expr::Member { .. } | Expr::Parameter(_) => {
            // A boolean value used as a predicate
            let Some(field) = resolve_field(ctx, expr, scope)? else {
                return Ok(None);
            };
            let value = field.serializer.serialize(&Bson::Boolean(true))?;
            Ok(field
                .filter_field(scope)?
                .map(|field| AstFilter::eq(field, value)))
        }
        _ => Ok(None),
    }
}

/// Children of a chain of `&&` (or `||`), flattened. In element scope one
/// child without a filter form drops the whole chain.
fn translate_children(
    ctx: &TranslationContext,
    expr: &Expr,
    short_circuit: BinaryOp,
    logical: BinaryOp,
    scope: FilterScope,
) -> Result<Option<Vec<AstFilter>>> {
    let mut operands = Vec::new();
    collect_operands(expr, short_circuit, logical, &mut operands);
    let mut children = Vec::with_capacity(operands.len());
    for operand in operands {
        match translate_in_scope(ctx, operand, scope)? {
            Some(filter) => children.push(filter),
            None => return Ok(None),
        }
    }
    Ok(Some(children))
}

fn collect_operands<'a>(expr: &'a Expr, short_circuit: BinaryOp, logical: BinaryOp, out: &mut Vec<&'a Expr>) {
    match expr {
        Expr::Binary { op, left, right, .. }
            if (*op == short_circuit || *op == logical) && left.ty().is_boolean() =>
        {
            collect_operands(left, short_circuit, logical, out);
            collect_operands(right, short_circuit, logical, out);
        }
        other => out.push(other),
    }
}

/// Resolve an expression to a stored field, if it is one
pub(crate) fn resolve_field(
    ctx: &TranslationContext,
    expr: &Expr,
    scope: FilterScope,
) -> Result<Option<ResolvedField>> {
    match expr {
        Expr::Parameter(parameter) => {
            if let FilterScope::Element(element) = scope {
                if parameter.id != element {
                    return Ok(None);
                }
            }
            let symbol = ctx.resolve(parameter)?;
            if symbol.is_current() {
                return Ok(Some(ResolvedField {
                    path: None,
                    serializer: symbol.serializer().clone(),
                }));
            }
            match symbol.ast().and_then(|ast| ast.as_field_path()) {
                Some(path) if !path.as_str().starts_with("$$") => Ok(Some(ResolvedField {
                    path: Some(path.as_str().trim_start_matches('$').to_string()),
                    serializer: symbol.serializer().clone(),
                })),
                _ => Ok(None),
            }
        }
        Expr::Member { target, member, .. } => {
            if target.ty().is_nullable() && member == "Value" {
                return Ok(resolve_field(ctx, target, scope)?.map(|field| ResolvedField {
                    serializer: unwrap_nullable(&field.serializer),
                    path: field.path,
                }));
            }
            let Some(base) = resolve_field(ctx, target, scope)? else {
                return Ok(None);
            };
            match base.serializer.try_get_member_serialization_info(member) {
                Some(info) if is_plain_element_name(&info.element_name) => {
                    Ok(Some(base.child(&info.element_name, info.serializer)))
                }
                _ => Ok(None),
            }
        }
        Expr::Binary {
            op: BinaryOp::ArrayIndex,
            left,
            right,
            ..
        } => {
            let index = match right.as_constant() {
                Some(Bson::Int32(index)) if *index >= 0 => i64::from(*index),
                Some(Bson::Int64(index)) if *index >= 0 => *index,
                _ => return Ok(None),
            };
            let Some(array) = resolve_sequence(ctx, left, scope)? else {
                return Ok(None);
            };
            Ok(Some(array.field.child(&index.to_string(), array.item_serializer)))
        }
        Expr::Unary {
            op: UnaryOp::Convert,
            operand,
            ty,
        } => {
            let Some(field) = resolve_field(ctx, operand, scope)? else {
                return Ok(None);
            };
            let from = operand.ty();
            if from.non_nullable() == ty.non_nullable() || matches!(ty, Type::Object) {
                let serializer = if from.is_nullable() && !ty.is_nullable() {
                    unwrap_nullable(&field.serializer)
                } else {
                    field.serializer
                };
                return Ok(Some(ResolvedField {
                    path: field.path,
                    serializer,
                }));
            }
            if from.is_numeric() && ty.is_numeric() {
                return Ok(Some(ResolvedField {
                    path: field.path,
                    serializer: ctx.serializer_for(ty)?,
                }));
            }
            if from.is_enum() && ty.is_integral() {
                return Ok(Some(field));
            }
            Ok(None)
        }
        _ => Ok(None),
    }
}

/// An array-valued field and the serializer of its items
pub(crate) struct ResolvedSequence {
    pub field: ResolvedField,
    pub item_serializer: Arc<dyn Serializer>,
}

/// Resolve an array-valued expression. Grouping elements live under their
/// elements field.
pub(crate) fn resolve_sequence(
    ctx: &TranslationContext,
    expr: &Expr,
    scope: FilterScope,
) -> Result<Option<ResolvedSequence>> {
    let Some(field) = resolve_field(ctx, expr, scope)? else {
        return Ok(None);
    };
    let Some(info) = field.serializer.try_get_item_serialization_info() else {
        return Ok(None);
    };
    let field = match info.element_name {
        Some(element_name) => field.child(&element_name, field.serializer.clone()),
        None => field,
    };
    if field.path.is_none() {
        return Ok(None);
    }
    Ok(Some(ResolvedSequence {
        field,
        item_serializer: info.serializer,
    }))
}

fn unwrap_nullable(serializer: &Arc<dyn Serializer>) -> Arc<dyn Serializer> {
    match serializer.downcast_ref::<NullableSerializer>() {
        Some(nullable) => nullable.inner().clone(),
        None => serializer.clone(),
    }
}

fn is_plain_element_name(name: &str) -> bool {
    !name.is_empty() && !name.starts_with('$') && !name.contains('.')
}

/// `{ field: operation }` for a resolved field, when it has a filter field
pub(crate) fn field_filter(
    field: &ResolvedField,
    scope: FilterScope,
    operation: AstFilterOperation,
) -> Result<Option<AstFilter>> {
    Ok(field
        .filter_field(scope)?
        .map(|field| AstFilter::field(field, operation)))
}
