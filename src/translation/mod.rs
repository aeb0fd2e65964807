//! Expression-tree translation.
//!
//! [`QueryTranslator`] is the entry point: it owns the serializer registry and
//! the translation options, builds a fresh [`TranslationContext`] per call,
//! runs the translators, then the simplifier, then renders.
//!
//! The free functions use the process-wide registry.

pub mod context;
mod expressions;
mod field_path;
mod filters;
mod pipeline;

pub use context::{NameGenerator, Symbol, SymbolTable, TranslationContext};
pub use expressions::{translate, TranslatedExpression};
pub use pipeline::{ExecutableQuery, Finalizer, TranslatedPipeline};

use crate::ast::{Simplifier, SimplifierMode};
use crate::config::TranslationOptions;
use crate::error::Result;
use crate::expression::Expr;
use crate::render::{render_filter, render_pipeline, render_projection};
use crate::serialization::{Serializer, SerializerRegistry};
use bson::Document;
use pipeline::{bind_stage_lambda, translate_projection_body, Projection};
use std::sync::Arc;
use tracing::{debug, instrument};

/// A rendered find projection and the serializer of the projected values.
#[derive(Debug, Clone)]
pub struct ProjectionTranslation {
    /// `None` when the projection returns the documents unchanged
    pub projection: Option<Document>,
    pub output_serializer: Arc<dyn Serializer>,
}

/// Translates host expressions into query documents.
#[derive(Clone)]
pub struct QueryTranslator {
    registry: Arc<SerializerRegistry>,
    options: TranslationOptions,
}

impl QueryTranslator {
    pub fn new(registry: Arc<SerializerRegistry>) -> Self {
        Self::with_options(registry, TranslationOptions::default())
    }

    pub fn with_options(registry: Arc<SerializerRegistry>, options: TranslationOptions) -> Self {
        Self { registry, options }
    }

    pub fn options(&self) -> &TranslationOptions {
        &self.options
    }

    pub fn registry(&self) -> &Arc<SerializerRegistry> {
        &self.registry
    }

    fn context(&self) -> TranslationContext {
        TranslationContext::new(self.registry.clone(), self.options.clone())
    }

    fn simplifier(&self, mode: SimplifierMode) -> Option<Simplifier> {
        self.options.simplify.then(|| Simplifier::new(mode))
    }

    /// Translate a predicate lambda `x => ...` into a filter document
    #[instrument(skip_all)]
    pub fn translate_filter(
        &self,
        predicate: &Expr,
        document_serializer: &Arc<dyn Serializer>,
    ) -> Result<Document> {
        let ctx = self.context();
        let (lambda_ctx, lambda) = bind_stage_lambda(&ctx, predicate, predicate, document_serializer)?;
        let mut filter = filters::translate_predicate(&lambda_ctx, &lambda.body)?;
        if let Some(simplifier) = self.simplifier(SimplifierMode::Aggregation) {
            filter = simplifier.simplify_filter(filter);
        }
        let rendered = render_filter(&filter, &self.options);
        debug!(filter = %rendered, "translated filter");
        Ok(rendered)
    }

    /// Translate a chain of query operators into pipeline stages
    #[instrument(skip_all)]
    pub fn translate_pipeline(
        &self,
        query: &Expr,
        input_serializer: &Arc<dyn Serializer>,
    ) -> Result<(Vec<Document>, Arc<dyn Serializer>)> {
        let ctx = self.context();
        let translated = pipeline::translate_chain(&ctx, query, input_serializer)?;
        let mut ast = translated.ast;
        if let Some(simplifier) = self.simplifier(SimplifierMode::Aggregation) {
            ast = simplifier.simplify_pipeline(ast);
        }
        let stages = render_pipeline(&ast, &self.options);
        debug!(stages = stages.len(), "translated pipeline");
        Ok((stages, translated.output_serializer))
    }

    /// Translate a query, optionally ending in a terminal operator, into a
    /// pipeline plus the step that computes its value from the results
    #[instrument(skip_all)]
    pub fn translate_executable(
        &self,
        query: &Expr,
        input_serializer: &Arc<dyn Serializer>,
    ) -> Result<ExecutableQuery> {
        let ctx = self.context();
        let mut executable = pipeline::translate_query(&ctx, query, input_serializer)?;
        if let Some(simplifier) = self.simplifier(SimplifierMode::Aggregation) {
            executable.pipeline = simplifier.simplify_pipeline(executable.pipeline);
        }
        debug!(finalizer = %executable.finalizer, stages = executable.pipeline.len(), "translated query");
        Ok(executable)
    }

    /// Translate a selector lambda into a find projection
    #[instrument(skip_all)]
    pub fn translate_projection(
        &self,
        projection: &Expr,
        input_serializer: &Arc<dyn Serializer>,
    ) -> Result<ProjectionTranslation> {
        let ctx = self.context();
        let (lambda_ctx, lambda) = bind_stage_lambda(&ctx, projection, projection, input_serializer)?;
        match translate_projection_body(&lambda_ctx, &lambda.body)? {
            Projection::Identity => Ok(ProjectionTranslation {
                projection: None,
                output_serializer: input_serializer.clone(),
            }),
            Projection::Specifications {
                mut specifications,
                output_serializer,
            } => {
                if let Some(simplifier) = self.simplifier(SimplifierMode::FindProjection) {
                    specifications = simplifier.simplify_projection(specifications);
                }
                Ok(ProjectionTranslation {
                    projection: Some(render_projection(&specifications)),
                    output_serializer,
                })
            }
        }
    }

    /// Translate a field access lambda `x => x.A.B` into `"A.B"`
    #[instrument(skip_all)]
    pub fn translate_field_path(
        &self,
        field_access: &Expr,
        document_serializer: &Arc<dyn Serializer>,
    ) -> Result<(String, Arc<dyn Serializer>)> {
        field_path::translate_field_path(&self.context(), field_access, document_serializer)
    }
}

fn global_translator(options: &TranslationOptions) -> QueryTranslator {
    QueryTranslator::with_options(SerializerRegistry::global(), options.clone())
}

/// See [`QueryTranslator::translate_filter`]
pub fn translate_filter(
    predicate: &Expr,
    document_serializer: &Arc<dyn Serializer>,
    options: &TranslationOptions,
) -> Result<Document> {
    global_translator(options).translate_filter(predicate, document_serializer)
}

/// See [`QueryTranslator::translate_pipeline`]
pub fn translate_pipeline(
    query: &Expr,
    input_serializer: &Arc<dyn Serializer>,
    options: &TranslationOptions,
) -> Result<(Vec<Document>, Arc<dyn Serializer>)> {
    global_translator(options).translate_pipeline(query, input_serializer)
}

/// See [`QueryTranslator::translate_executable`]
pub fn translate_executable(
    query: &Expr,
    input_serializer: &Arc<dyn Serializer>,
    options: &TranslationOptions,
) -> Result<ExecutableQuery> {
    global_translator(options).translate_executable(query, input_serializer)
}

/// See [`QueryTranslator::translate_projection`]
pub fn translate_projection(
    projection: &Expr,
    input_serializer: &Arc<dyn Serializer>,
    options: &TranslationOptions,
) -> Result<ProjectionTranslation> {
    global_translator(options).translate_projection(projection, input_serializer)
}

/// See [`QueryTranslator::translate_field_path`]
pub fn translate_field_path(
    field_access: &Expr,
    document_serializer: &Arc<dyn Serializer>,
    options: &TranslationOptions,
) -> Result<(String, Arc<dyn Serializer>)> {
    global_translator(options).translate_field_path(field_access, document_serializer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{DocumentType, Parameter, Type};
    use bson::doc;
    use pretty_assertions::assert_eq;

    fn item() -> Type {
        DocumentType::new("Item")
            .with_member("A", Type::Int32)
            .with_member("B", Type::Int32)
            .into_type()
    }

    fn setup(options: TranslationOptions) -> (QueryTranslator, Arc<dyn Serializer>) {
        let translator = QueryTranslator::with_options(Arc::new(SerializerRegistry::new()), options);
        let serializer = translator.registry().get_serializer(&item()).unwrap();
        (translator, serializer)
    }

    fn not_a_or_b() -> Expr {
        let x = Parameter::new("x", item());
        let a = Expr::parameter(&x).field("A").eq(Expr::constant(1));
        let b = Expr::parameter(&x).field("B").eq(Expr::constant(2));
        Expr::lambda(vec![x.clone()], Expr::not(a.or_else(b)))
    }

    #[test]
    fn test_filter_keeps_nor_over_or() {
        let (translator, serializer) = setup(TranslationOptions::default());
        assert_eq!(
            translator.translate_filter(&not_a_or_b(), &serializer).unwrap(),
            doc! { "$nor": [{ "$or": [{ "A": 1 }, { "B": 2 }] }] }
        );
    }

    #[test]
    fn test_explicit_and_rendering() {
        let options = TranslationOptions {
            implicit_and: false,
            ..TranslationOptions::default()
        };
        let (translator, serializer) = setup(options);
        let x = Parameter::new("x", item());
        let predicate = Expr::lambda(
            vec![x.clone()],
            Expr::parameter(&x)
                .field("A")
                .eq(Expr::constant(1))
                .and_also(Expr::parameter(&x).field("B").eq(Expr::constant(2))),
        );
        assert_eq!(
            translator.translate_filter(&predicate, &serializer).unwrap(),
            doc! { "$and": [{ "A": 1 }, { "B": 2 }] }
        );
    }

    #[test]
    fn test_identity_projection() {
        let (translator, serializer) = setup(TranslationOptions::default());
        let x = Parameter::new("x", item());
        let projection = Expr::lambda(vec![x.clone()], Expr::parameter(&x));
        let translated = translator.translate_projection(&projection, &serializer).unwrap();
        assert_eq!(translated.projection, None);
    }

    #[test]
    fn test_find_projection_turns_self_assignment_into_include() {
        let (translator, serializer) = setup(TranslationOptions::default());
        let x = Parameter::new("x", item());
        let projection = Expr::lambda(
            vec![x.clone()],
            Expr::new_object("Anon", vec![("A", Expr::parameter(&x).field("A"))]),
        );
        let translated = translator.translate_projection(&projection, &serializer).unwrap();
        assert_eq!(translated.projection, Some(doc! { "A": 1, "_id": 0 }));

        let (unsimplified, serializer) = setup(TranslationOptions::default().without_simplification());
        let translated = unsimplified.translate_projection(&projection, &serializer).unwrap();
        assert_eq!(translated.projection, Some(doc! { "A": "$A", "_id": 0 }));
    }

    #[test]
    fn test_filter_requires_a_lambda() {
        let (translator, serializer) = setup(TranslationOptions::default());
        assert!(translator
            .translate_filter(&Expr::constant(true), &serializer)
            .is_err());
    }
}
