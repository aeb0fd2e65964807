//! Rendering entry points.
//!
//! Every AST node renders itself; these functions render whole filters,
//! pipelines and projections with the output options applied, and convert
//! rendered documents to relaxed extended JSON for display.

use crate::ast::{AstFilter, AstPipeline, AstProjectSpecification};
use crate::config::TranslationOptions;
use bson::{Bson, Document};
use serde_json::Value;

pub fn render_filter(filter: &AstFilter, options: &TranslationOptions) -> Document {
    filter.render_with(options.implicit_and)
}

pub fn render_pipeline(pipeline: &AstPipeline, options: &TranslationOptions) -> Vec<Document> {
    pipeline.render_with(options.implicit_and)
}

pub fn render_projection(specifications: &[AstProjectSpecification]) -> Document {
    crate::ast::render_projection(specifications)
}

/// A rendered document as relaxed extended JSON
pub fn to_relaxed_json(document: Document) -> Value {
    Bson::Document(document).into_relaxed_extjson()
}

/// Rendered stages as a relaxed extended JSON array
pub fn pipeline_to_relaxed_json(stages: Vec<Document>) -> Value {
    Value::Array(stages.into_iter().map(to_relaxed_json).collect())
}
