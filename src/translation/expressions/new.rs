use super::conditional::translate_branches;
use super::{translate, TranslatedExpression};
use crate::ast::expressions::is_safe_field_name;
use crate::ast::{AstComputedField, AstExpression};
use crate::error::{Error, Result};
use crate::expression::{Expr, Type};
use crate::serialization::{ArraySerializer, DocumentSerializer, MemberMap};
use crate::translation::context::TranslationContext;
use std::sync::Arc;

pub(super) fn translate_new<'e>(
    ctx: &TranslationContext,
    expr: &'e Expr,
    members: &'e [(String, Expr)],
    ty: &Type,
) -> Result<TranslatedExpression<'e>> {
    // Element names follow the constructed type's storage (class maps, `Id`
    // as `_id`); types the registry cannot describe keep their member names
    let declared = ctx.serializer_for(ty).ok();
    let mut fields = Vec::with_capacity(members.len());
    let mut maps = Vec::with_capacity(members.len());
    for (name, value) in members {
        let element_name = declared
            .as_ref()
            .and_then(|serializer| serializer.try_get_member_serialization_info(name))
            .map_or_else(|| name.clone(), |info| info.element_name);
        if !is_safe_field_name(&element_name) {
            return Err(Error::unsupported_because(
                expr,
                format!("{:?} cannot be used as a field name", element_name),
            ));
        }
        let value = translate(ctx, value)?;
        fields.push(AstComputedField::new(element_name.clone(), value.ast)?);
        maps.push(MemberMap::new(name.clone(), element_name, value.serializer));
    }
    let ast = AstExpression::computed_document(fields)?;
    let serializer = Arc::new(DocumentSerializer::new(ty.clone(), maps));
    Ok(TranslatedExpression::new(expr, ast, serializer))
}

pub(super) fn translate_new_array<'e>(
    ctx: &TranslationContext,
    expr: &'e Expr,
    elements: &'e [Expr],
    ty: &Type,
) -> Result<TranslatedExpression<'e>> {
    if elements.is_empty() {
        return Ok(TranslatedExpression::new(
            expr,
            AstExpression::computed_array(Vec::new()),
            ctx.serializer_for(ty)?,
        ));
    }
    let values: Vec<&Expr> = elements.iter().collect();
    let (items, item_serializer) = translate_branches(ctx, expr, &values)?;
    Ok(TranslatedExpression::new(
        expr,
        AstExpression::computed_array(items),
        Arc::new(ArraySerializer::new(item_serializer)),
    ))
}
