use super::context::TranslationContext;
use super::expressions::{lambda_arg, translate};
use crate::ast::Simplifier;
use crate::error::{Error, Result};
use crate::expression::Expr;
use crate::serialization::Serializer;
use std::sync::Arc;

/// `x => x.A.B` as the dotted path `"A.B"` and the serializer of the field
pub(crate) fn translate_field_path(
    ctx: &TranslationContext,
    field_access: &Expr,
    document_serializer: &Arc<dyn Serializer>,
) -> Result<(String, Arc<dyn Serializer>)> {
    let lambda = lambda_arg(field_access, field_access, 1)?;
    let symbol = ctx.create_root_symbol(&lambda.parameters[0], document_serializer)?;
    let translated = translate(&ctx.with_symbol(symbol), &lambda.body)?;
    let ast = if ctx.options().simplify {
        Simplifier::default().simplify_expression(translated.ast)
    } else {
        translated.ast
    };
    match ast.as_field_path() {
        Some(path) if !path.as_str().starts_with("$$") => {
            Ok((path.as_str()[1..].to_string(), translated.serializer))
        }
        _ => Err(Error::unsupported_because(
            field_access,
            format!("{} is not a field path", lambda.body),
        )),
    }
}
