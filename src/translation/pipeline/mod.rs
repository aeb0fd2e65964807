//! Query-builder call chains to aggregation pipelines.
//!
//! A chain such as `source.Where(p).Select(s).Take(10)` is translated from
//! the source outwards. Every stage consumes the pipeline built so far and
//! the serializer of the documents it outputs, and produces the next one.
//! Terminal operators (`First`, `Count`, `Max`, ...) end the chain and yield
//! an [`ExecutableQuery`] that knows how to turn the result documents into
//! the single returned value.

mod projection;
mod stages;
mod terminal;

pub(crate) use projection::{translate_projection_body, Projection};
pub use terminal::{ExecutableQuery, Finalizer};

use crate::ast::{AstExpression, AstPipeline, AstStage};
use crate::error::{Error, Result};
use crate::expression::{Expr, Lambda, MethodId};
use crate::serialization::{Serializer, WrappedValueSerializer};
use crate::translation::context::TranslationContext;
use crate::translation::expressions::lambda_arg;
use std::sync::Arc;
use tracing::debug;

/// A pipeline and the serializer of the documents it outputs.
#[derive(Debug, Clone)]
pub struct TranslatedPipeline {
    pub ast: AstPipeline,
    pub output_serializer: Arc<dyn Serializer>,
}

impl TranslatedPipeline {
    /// An empty pipeline over documents described by `input_serializer`
    pub fn new(input_serializer: Arc<dyn Serializer>) -> Self {
        Self {
            ast: AstPipeline::empty(),
            output_serializer: input_serializer,
        }
    }

    pub fn with_stage(self, stage: AstStage, output_serializer: Arc<dyn Serializer>) -> Self {
        self.with_stages(vec![stage], output_serializer)
    }

    pub fn with_stages<I: IntoIterator<Item = AstStage>>(
        self,
        stages: I,
        output_serializer: Arc<dyn Serializer>,
    ) -> Self {
        Self {
            ast: self.ast.with_stages(stages),
            output_serializer,
        }
    }
}

/// Translate a chain of query operators rooted at a source.
pub(crate) fn translate_chain(
    ctx: &TranslationContext,
    expr: &Expr,
    input_serializer: &Arc<dyn Serializer>,
) -> Result<TranslatedPipeline> {
    match expr {
        Expr::Source { collection, .. } => {
            debug!(collection = %collection, "pipeline source");
            Ok(TranslatedPipeline::new(input_serializer.clone()))
        }
        Expr::Call {
            method,
            target: Some(source),
            args,
            ..
        } if method.is_query_operator() || matches!(method, MethodId::ToList | MethodId::ToArray) => {
            if let Expr::Call { method: previous, .. } = source.as_ref() {
                if previous.is_terminal() {
                    return Err(Error::unsupported_because(
                        expr,
                        format!("{} ends the query and cannot be followed by {}", previous, method),
                    ));
                }
            }
            let pipeline = translate_chain(ctx, source, input_serializer)?;
            let pipeline = stages::translate_stage(ctx, expr, *method, pipeline, args)?;
            debug!(method = %method, stages = pipeline.ast.len(), "translated stage");
            Ok(pipeline)
        }
        Expr::Call { method, .. } if method.is_terminal() => Err(Error::unsupported_because(
            expr,
            format!("{} produces a single value, not a sequence", method),
        )),
        _ => Err(Error::unsupported_because(expr, "it is not a query operator")),
    }
}

/// Translate a whole query: a chain ending in a terminal operator, or a
/// plain chain whose documents are returned as a list
pub(crate) fn translate_query(
    ctx: &TranslationContext,
    expr: &Expr,
    input_serializer: &Arc<dyn Serializer>,
) -> Result<ExecutableQuery> {
    match expr {
        Expr::Call {
            method,
            target: Some(source),
            args,
            ..
        } if method.is_terminal() => {
            let pipeline = translate_chain(ctx, source, input_serializer)?;
            terminal::translate_terminal(ctx, expr, *method, pipeline, args)
        }
        _ => {
            let pipeline = translate_chain(ctx, expr, input_serializer)?;
            Ok(ExecutableQuery::new(pipeline, Finalizer::ToList, expr.ty().clone()))
        }
    }
}

/// Bind the single parameter of a stage lambda to the documents flowing
/// through the pipeline
pub(crate) fn bind_stage_lambda<'e>(
    ctx: &TranslationContext,
    expr: &Expr,
    arg: &'e Expr,
    serializer: &Arc<dyn Serializer>,
) -> Result<(TranslationContext, &'e Lambda)> {
    let lambda = lambda_arg(expr, arg, 1)?;
    let symbol = ctx.create_root_symbol(&lambda.parameters[0], serializer)?;
    Ok((ctx.with_symbol(symbol), lambda))
}

/// The value of the documents described by `serializer` and the serializer
/// of that value: a wrapped field or the document itself
pub(crate) fn root_value(serializer: &Arc<dyn Serializer>) -> Result<(AstExpression, Arc<dyn Serializer>)> {
    match serializer.downcast_ref::<WrappedValueSerializer>() {
        Some(wrapped) => Ok((
            AstExpression::field(wrapped.field_name())?,
            wrapped.value_serializer().clone(),
        )),
        None => Ok((AstExpression::root(), serializer.clone())),
    }
}
