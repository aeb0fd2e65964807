//! Projection construction, shared by `Select` stages and find projections.

use crate::ast::expressions::is_safe_field_name;
use crate::ast::{AstExpression, AstProjectSpecification};
use crate::error::Result;
use crate::expression::Expr;
use crate::serialization::{Serializer, WrappedValueSerializer};
use crate::translation::context::TranslationContext;
use crate::translation::expressions::translate;
use std::sync::Arc;
use tracing::debug;

/// Field holding a projected value that is not itself a document
pub(crate) const VALUE_FIELD: &str = "_v";

/// The result of projecting a document.
#[derive(Debug, Clone)]
pub(crate) enum Projection {
    /// The selector returns the document unchanged
    Identity,
    Specifications {
        specifications: Vec<AstProjectSpecification>,
        output_serializer: Arc<dyn Serializer>,
    },
}

/// Build the projection for a selector body, with its parameter already
/// bound in `ctx`
pub(crate) fn translate_projection_body(ctx: &TranslationContext, body: &Expr) -> Result<Projection> {
    if let Expr::Parameter(parameter) = body {
        if ctx.resolve(parameter)?.is_current() {
            return Ok(Projection::Identity);
        }
    }
    if let Some(projection) = try_include_field(ctx, body)? {
        return Ok(projection);
    }

    let translated = translate(ctx, body)?;
    // `new { }` must not become a bare `_id` exclusion, which keeps every other field
    if let AstExpression::ComputedDocument(fields) = &translated.ast {
        if fields.is_empty() {
            return wrap_value(translated.ast, translated.serializer);
        }
        let mut specifications = Vec::with_capacity(fields.len() + 1);
        for field in fields {
            specifications.push(AstProjectSpecification::set(field.path(), field.value().clone())?);
        }
        if !fields.iter().any(|field| field.path() == "_id") {
            specifications.push(AstProjectSpecification::exclude_id());
        }
        return Ok(Projection::Specifications {
            specifications,
            output_serializer: translated.serializer,
        });
    }

    debug!(selector = %body, "projecting a computed value under {}", VALUE_FIELD);
    wrap_value(translated.ast, translated.serializer)
}

fn wrap_value(value: AstExpression, serializer: Arc<dyn Serializer>) -> Result<Projection> {
    Ok(Projection::Specifications {
        specifications: vec![
            AstProjectSpecification::set(VALUE_FIELD, value)?,
            AstProjectSpecification::exclude_id(),
        ],
        output_serializer: Arc::new(WrappedValueSerializer::new(VALUE_FIELD, serializer)),
    })
}

/// `x => x.Field` as an inclusion, with the value wrapped under the field
fn try_include_field(ctx: &TranslationContext, body: &Expr) -> Result<Option<Projection>> {
    let Expr::Member { target, member, .. } = body else {
        return Ok(None);
    };
    let Expr::Parameter(parameter) = target.as_ref() else {
        return Ok(None);
    };
    let symbol = ctx.resolve(parameter)?;
    if !symbol.is_current() {
        return Ok(None);
    }
    let Some(info) = symbol.serializer().try_get_member_serialization_info(member) else {
        return Ok(None);
    };
    if !is_safe_field_name(&info.element_name) {
        return Ok(None);
    }
    let mut specifications = vec![AstProjectSpecification::include(info.element_name.clone())?];
    if info.element_name != "_id" {
        specifications.push(AstProjectSpecification::exclude_id());
    }
    Ok(Some(Projection::Specifications {
        specifications,
        output_serializer: Arc::new(WrappedValueSerializer::new(info.element_name, info.serializer)),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::render_projection;
    use crate::config::TranslationOptions;
    use crate::expression::{DocumentType, Parameter, Type};
    use crate::serialization::SerializerRegistry;
    use bson::doc;
    use pretty_assertions::assert_eq;

    fn setup() -> (TranslationContext, Parameter) {
        let ty = DocumentType::new("Item")
            .with_member("Id", Type::Int32)
            .with_member("Name", Type::String)
            .with_member("X", Type::Int32)
            .into_type();
        let ctx = TranslationContext::new(
            Arc::new(SerializerRegistry::new()),
            TranslationOptions::default(),
        );
        let x = Parameter::new("x", ty);
        let serializer = ctx.serializer_for(&x.ty).unwrap();
        let symbol = ctx.create_root_symbol(&x, &serializer).unwrap();
        (ctx.with_symbol(symbol), x)
    }

    fn specifications(projection: Projection) -> (Vec<AstProjectSpecification>, Arc<dyn Serializer>) {
        match projection {
            Projection::Specifications {
                specifications,
                output_serializer,
            } => (specifications, output_serializer),
            Projection::Identity => panic!("expected specifications"),
        }
    }

    #[test]
    fn test_identity() {
        let (ctx, x) = setup();
        assert!(matches!(
            translate_projection_body(&ctx, &Expr::parameter(&x)).unwrap(),
            Projection::Identity
        ));
    }

    #[test]
    fn test_single_field_is_included_and_wrapped() {
        let (ctx, x) = setup();
        let (specs, serializer) =
            specifications(translate_projection_body(&ctx, &Expr::parameter(&x).field("Name")).unwrap());
        assert_eq!(render_projection(&specs), doc! { "Name": 1, "_id": 0 });
        let wrapped = serializer.downcast_ref::<WrappedValueSerializer>().unwrap();
        assert_eq!(wrapped.field_name(), "Name");
    }

    #[test]
    fn test_id_field_keeps_id() {
        let (ctx, x) = setup();
        let (specs, _) =
            specifications(translate_projection_body(&ctx, &Expr::parameter(&x).field("Id")).unwrap());
        assert_eq!(render_projection(&specs), doc! { "_id": 1 });
    }

    #[test]
    fn test_computed_document() {
        let (ctx, x) = setup();
        let body = Expr::new_object(
            "Anon",
            vec![("V", Expr::parameter(&x).field("X")), ("One", Expr::constant(1))],
        );
        let (specs, serializer) = specifications(translate_projection_body(&ctx, &body).unwrap());
        assert_eq!(
            render_projection(&specs),
            doc! { "V": "$X", "One": { "$literal": 1 }, "_id": 0 }
        );
        assert!(serializer.try_get_member_serialization_info("V").is_some());
    }

    #[test]
    fn test_empty_document_is_wrapped() {
        let (ctx, _) = setup();
        let body = Expr::new_object("Empty", vec![]);
        let (specs, serializer) = specifications(translate_projection_body(&ctx, &body).unwrap());
        assert_eq!(
            render_projection(&specs),
            doc! { "_v": { "$literal": {} }, "_id": 0 }
        );
        assert_eq!(
            serializer.downcast_ref::<WrappedValueSerializer>().unwrap().field_name(),
            VALUE_FIELD
        );
    }

    #[test]
    fn test_computed_scalar_is_wrapped() {
        let (ctx, x) = setup();
        let body = Expr::parameter(&x).field("X").add(Expr::constant(1));
        let (specs, serializer) = specifications(translate_projection_body(&ctx, &body).unwrap());
        assert_eq!(
            render_projection(&specs),
            doc! { "_v": { "$add": ["$X", 1] }, "_id": 0 }
        );
        assert_eq!(
            serializer.downcast_ref::<WrappedValueSerializer>().unwrap().field_name(),
            VALUE_FIELD
        );
    }
}
