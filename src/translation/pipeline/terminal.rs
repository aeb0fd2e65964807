//! Terminal operators and the finalizers that turn their result documents
//! into a single value.

use super::projection::VALUE_FIELD;
use super::{bind_stage_lambda, root_value, TranslatedPipeline};
use crate::ast::{
    AstAccumulatorExpression, AstAccumulatorOperator, AstExpression, AstFilter, AstGroupField,
    AstPipeline, AstProjectSpecification, AstStage,
};
use crate::error::{Error, Result};
use crate::expression::{Expr, MethodId, Type};
use crate::serialization::{Serializer, WrappedValueSerializer};
use crate::translation::context::TranslationContext;
use crate::translation::expressions::{constant_i64, translate};
use crate::translation::filters::translate_predicate;
use bson::{Bson, Decimal128, Document};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Client-side step applied to the documents a pipeline returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finalizer {
    /// Every document, as a list
    ToList,
    First { or_default: bool },
    Single { or_default: bool },
    Last { or_default: bool },
    ElementAt,
    Count,
    Any,
    All,
    Sum,
    Average,
    Max,
    Min,
}

impl fmt::Display for Finalizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Finalizer::ToList => "ToList",
            Finalizer::First { or_default: false } => "First",
            Finalizer::First { or_default: true } => "FirstOrDefault",
            Finalizer::Single { or_default: false } => "Single",
            Finalizer::Single { or_default: true } => "SingleOrDefault",
            Finalizer::Last { or_default: false } => "Last",
            Finalizer::Last { or_default: true } => "LastOrDefault",
            Finalizer::ElementAt => "ElementAt",
            Finalizer::Count => "Count",
            Finalizer::Any => "Any",
            Finalizer::All => "All",
            Finalizer::Sum => "Sum",
            Finalizer::Average => "Average",
            Finalizer::Max => "Max",
            Finalizer::Min => "Min",
        };
        f.write_str(name)
    }
}

/// A pipeline ready to run, with the step that produces the query's value
/// from its results. Nothing can be appended to it.
#[derive(Debug, Clone)]
pub struct ExecutableQuery {
    pub pipeline: AstPipeline,
    pub output_serializer: Arc<dyn Serializer>,
    pub finalizer: Finalizer,
    /// Host type of the value [`finalize`](Self::finalize) returns
    pub result_type: Type,
}

impl ExecutableQuery {
    pub(crate) fn new(pipeline: TranslatedPipeline, finalizer: Finalizer, result_type: Type) -> Self {
        Self {
            pipeline: pipeline.ast,
            output_serializer: pipeline.output_serializer,
            finalizer,
            result_type,
        }
    }

    pub fn render(&self) -> Vec<Document> {
        self.pipeline.render()
    }

    pub fn render_with(&self, implicit_and: bool) -> Vec<Document> {
        self.pipeline.render_with(implicit_and)
    }

    /// Turn the documents returned by the server into the query's value
    pub fn finalize(&self, documents: Vec<Document>) -> Result<Bson> {
        match self.finalizer {
            Finalizer::ToList => documents
                .into_iter()
                .map(|document| self.decode(document))
                .collect::<Result<Vec<_>>>()
                .map(Bson::Array),
            Finalizer::First { or_default } | Finalizer::Last { or_default } => {
                self.single_value(documents.into_iter().next(), or_default)
            }
            Finalizer::ElementAt => {
                let Some(document) = documents.into_iter().next() else {
                    return Err(Error::InvalidOperation(
                        "index was out of range".to_string(),
                    ));
                };
                self.decode(document)
            }
            Finalizer::Single { or_default } => {
                if documents.len() > 1 {
                    return Err(Error::InvalidOperation(
                        "sequence contains more than one element".to_string(),
                    ));
                }
                self.single_value(documents.into_iter().next(), or_default)
            }
            Finalizer::Count | Finalizer::Sum => match documents.into_iter().next() {
                Some(document) => self.decode(document),
                None => Ok(zero(&self.result_type)),
            },
            Finalizer::Any => Ok(Bson::Boolean(!documents.is_empty())),
            Finalizer::All => Ok(Bson::Boolean(documents.is_empty())),
            Finalizer::Average | Finalizer::Max | Finalizer::Min => {
                self.single_value(documents.into_iter().next(), self.result_type.is_nullable())
            }
        }
    }

    fn single_value(&self, document: Option<Document>, or_default: bool) -> Result<Bson> {
        match document {
            Some(document) => self.decode(document),
            None if or_default => Ok(Bson::Null),
            None => Err(Error::InvalidOperation(
                "sequence contains no elements".to_string(),
            )),
        }
    }

    /// Decode one result document. A wrapped value whose wrapper field was
    /// replaced away by `$replaceRoot` is the document itself.
    fn decode(&self, document: Document) -> Result<Bson> {
        if let Some(wrapped) = self.output_serializer.downcast_ref::<WrappedValueSerializer>() {
            if !document.is_empty() && !document.contains_key(wrapped.field_name()) {
                return wrapped
                    .value_serializer()
                    .deserialize(&Bson::Document(document));
            }
        }
        self.output_serializer.deserialize(&Bson::Document(document))
    }
}

fn zero(ty: &Type) -> Bson {
    match ty.non_nullable() {
        Type::Int64 => Bson::Int64(0),
        Type::Double => Bson::Double(0.0),
        Type::Decimal128 => {
            let mut bytes = [0u8; 16];
            bytes[14] = 0x40;
            bytes[15] = 0x30;
            Bson::Decimal128(Decimal128::from_bytes(bytes))
        }
        _ => Bson::Int32(0),
    }
}

/// End a pipeline with a terminal operator
pub(super) fn translate_terminal(
    ctx: &TranslationContext,
    expr: &Expr,
    method: MethodId,
    pipeline: TranslatedPipeline,
    args: &[Expr],
) -> Result<ExecutableQuery> {
    let result_type = expr.ty().clone();
    let query = match method {
        MethodId::First | MethodId::FirstOrDefault => {
            let pipeline = with_optional_predicate(ctx, expr, pipeline, args)?;
            let serializer = pipeline.output_serializer.clone();
            let finalizer = Finalizer::First {
                or_default: method == MethodId::FirstOrDefault,
            };
            ExecutableQuery::new(
                pipeline.with_stage(AstStage::limit(1)?, serializer),
                finalizer,
                result_type,
            )
        }
        MethodId::Single | MethodId::SingleOrDefault => {
            let pipeline = with_optional_predicate(ctx, expr, pipeline, args)?;
            let serializer = pipeline.output_serializer.clone();
            let finalizer = Finalizer::Single {
                or_default: method == MethodId::SingleOrDefault,
            };
            ExecutableQuery::new(
                pipeline.with_stage(AstStage::limit(2)?, serializer),
                finalizer,
                result_type,
            )
        }
        MethodId::Last | MethodId::LastOrDefault => {
            let pipeline = with_optional_predicate(ctx, expr, pipeline, args)?;
            let serializer = pipeline.output_serializer.clone();
            let stages = vec![
                AstStage::group(
                    AstExpression::constant(Bson::Null),
                    vec![AstGroupField::new(
                        "_last",
                        AstAccumulatorExpression::new(
                            AstAccumulatorOperator::Last,
                            AstExpression::root(),
                        ),
                    )?],
                )?,
                AstStage::replace_root(AstExpression::field("_last")?),
            ];
            let finalizer = Finalizer::Last {
                or_default: method == MethodId::LastOrDefault,
            };
            ExecutableQuery::new(pipeline.with_stages(stages, serializer), finalizer, result_type)
        }
        MethodId::ElementAt => {
            let [index] = args else {
                return Err(Error::unsupported_because(expr, "ElementAt takes an index"));
            };
            let index = constant_i64(index)
                .ok_or_else(|| Error::unsupported_because(expr, "the index must be a constant integer"))?;
            let serializer = pipeline.output_serializer.clone();
            let stages = vec![AstStage::skip(index)?, AstStage::limit(1)?];
            ExecutableQuery::new(
                pipeline.with_stages(stages, serializer),
                Finalizer::ElementAt,
                result_type,
            )
        }
        MethodId::Count | MethodId::LongCount => {
            let pipeline = with_optional_predicate(ctx, expr, pipeline, args)?;
            let count_type = if method == MethodId::Count {
                Type::Int32
            } else {
                Type::Int64
            };
            let serializer: Arc<dyn Serializer> = Arc::new(WrappedValueSerializer::new(
                VALUE_FIELD,
                ctx.serializer_for(&count_type)?,
            ));
            ExecutableQuery::new(
                pipeline.with_stage(AstStage::count(VALUE_FIELD)?, serializer),
                Finalizer::Count,
                count_type,
            )
        }
        MethodId::Any => {
            let pipeline = with_optional_predicate(ctx, expr, pipeline, args)?;
            ExecutableQuery::new(with_exists_stages(ctx, pipeline)?, Finalizer::Any, Type::Boolean)
        }
        MethodId::All => {
            let [predicate] = args else {
                return Err(Error::unsupported_because(expr, "All takes a predicate"));
            };
            let (lambda_ctx, lambda) =
                bind_stage_lambda(ctx, expr, predicate, &pipeline.output_serializer)?;
            let filter = AstFilter::nor(vec![translate_predicate(&lambda_ctx, &lambda.body)?])?;
            let serializer = pipeline.output_serializer.clone();
            let pipeline = pipeline.with_stage(AstStage::match_(filter), serializer);
            ExecutableQuery::new(with_exists_stages(ctx, pipeline)?, Finalizer::All, Type::Boolean)
        }
        MethodId::Max | MethodId::Min | MethodId::Sum | MethodId::Average => {
            translate_accumulation(ctx, expr, method, pipeline, args)?
        }
        _ => return Err(Error::unsupported_because(expr, "it is not a terminal operator")),
    };
    debug!(finalizer = %query.finalizer, stages = query.pipeline.len(), "translated terminal operator");
    Ok(query)
}

/// `Op(p)` filters with `p` before the operator itself
fn with_optional_predicate(
    ctx: &TranslationContext,
    expr: &Expr,
    pipeline: TranslatedPipeline,
    args: &[Expr],
) -> Result<TranslatedPipeline> {
    match args {
        [] => Ok(pipeline),
        [predicate] => {
            let (lambda_ctx, lambda) =
                bind_stage_lambda(ctx, expr, predicate, &pipeline.output_serializer)?;
            let filter = translate_predicate(&lambda_ctx, &lambda.body)?;
            let serializer = pipeline.output_serializer.clone();
            Ok(pipeline.with_stage(AstStage::match_(filter), serializer))
        }
        _ => Err(Error::unsupported_because(
            expr,
            format!("expected at most 1 argument, got {}", args.len()),
        )),
    }
}

/// `$limit 1` and a constant `true` projection
fn with_exists_stages(ctx: &TranslationContext, pipeline: TranslatedPipeline) -> Result<TranslatedPipeline> {
    let stages = vec![
        AstStage::limit(1)?,
        AstStage::project(vec![
            AstProjectSpecification::exclude_id(),
            AstProjectSpecification::set(VALUE_FIELD, AstExpression::constant(true))?,
        ])?,
    ];
    let serializer: Arc<dyn Serializer> = Arc::new(WrappedValueSerializer::new(
        VALUE_FIELD,
        ctx.serializer_for(&Type::Boolean)?,
    ));
    Ok(pipeline.with_stages(stages, serializer))
}

/// `Max/Min/Sum/Average([selector])` as a `$group` over every document
fn translate_accumulation(
    ctx: &TranslationContext,
    expr: &Expr,
    method: MethodId,
    pipeline: TranslatedPipeline,
    args: &[Expr],
) -> Result<ExecutableQuery> {
    let (field, op, finalizer) = match method {
        MethodId::Max => ("_max", AstAccumulatorOperator::Max, Finalizer::Max),
        MethodId::Min => ("_min", AstAccumulatorOperator::Min, Finalizer::Min),
        MethodId::Sum => ("_sum", AstAccumulatorOperator::Sum, Finalizer::Sum),
        _ => ("_avg", AstAccumulatorOperator::Avg, Finalizer::Average),
    };
    let (value, value_serializer) = match args {
        [] => root_value(&pipeline.output_serializer)?,
        [selector] => {
            let (lambda_ctx, lambda) =
                bind_stage_lambda(ctx, expr, selector, &pipeline.output_serializer)?;
            let translated = translate(&lambda_ctx, &lambda.body)?;
            (translated.ast, translated.serializer)
        }
        _ => {
            return Err(Error::unsupported_because(
                expr,
                format!("{} takes an optional selector", method),
            ))
        }
    };
    let value_serializer = if method == MethodId::Average {
        ctx.serializer_for(expr.ty())?
    } else {
        value_serializer
    };

    let stages = vec![
        AstStage::group(
            AstExpression::constant(Bson::Null),
            vec![AstGroupField::new(field, AstAccumulatorExpression::new(op, value))?],
        )?,
        AstStage::replace_root(AstExpression::field(field)?),
    ];
    let serializer: Arc<dyn Serializer> =
        Arc::new(WrappedValueSerializer::new(field, value_serializer));
    Ok(ExecutableQuery::new(
        pipeline.with_stages(stages, serializer),
        finalizer,
        expr.ty().clone(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TranslationOptions;
    use crate::expression::{DocumentType, Parameter};
    use crate::serialization::SerializerRegistry;
    use crate::translation::pipeline::translate_query;
    use bson::doc;
    use pretty_assertions::assert_eq;

    fn item() -> Type {
        DocumentType::new("Item")
            .with_member("Name", Type::String)
            .with_member("Value", Type::Int32)
            .with_member("Price", Type::nullable(Type::Double))
            .into_type()
    }

    fn translate_terminal_call(method: MethodId, args: Vec<Expr>, ty: Type) -> ExecutableQuery {
        let ctx = TranslationContext::new(
            Arc::new(SerializerRegistry::new()),
            TranslationOptions::default(),
        );
        let serializer = ctx.serializer_for(&item()).unwrap();
        let expr = Expr::source("items", item()).call(method, args, ty);
        translate_query(&ctx, &expr, &serializer).unwrap()
    }

    fn value_selector() -> Expr {
        let x = Parameter::new("x", item());
        Expr::lambda(vec![x.clone()], Expr::parameter(&x).field("Value"))
    }

    fn value_is(n: i32) -> Expr {
        let x = Parameter::new("x", item());
        Expr::lambda(
            vec![x.clone()],
            Expr::parameter(&x).field("Value").eq(Expr::constant(n)),
        )
    }

    #[test]
    fn test_max_with_selector() {
        let query = translate_terminal_call(MethodId::Max, vec![value_selector()], Type::Int32);
        assert_eq!(
            query.render(),
            vec![
                doc! { "$group": { "_id": null, "_max": { "$max": "$Value" } } },
                doc! { "$replaceRoot": { "newRoot": "$_max" } },
            ]
        );
        assert_eq!(query.finalize(vec![doc! { "_max": 7 }]).unwrap(), Bson::Int32(7));
    }

    #[test]
    fn test_max_of_empty_sequence_fails() {
        let query = translate_terminal_call(MethodId::Max, vec![value_selector()], Type::Int32);
        assert!(matches!(
            query.finalize(vec![]),
            Err(Error::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_nullable_average_of_empty_sequence_is_null() {
        let x = Parameter::new("x", item());
        let selector = Expr::lambda(vec![x.clone()], Expr::parameter(&x).field("Price"));
        let query = translate_terminal_call(
            MethodId::Average,
            vec![selector],
            Type::nullable(Type::Double),
        );
        assert_eq!(
            query.render()[0],
            doc! { "$group": { "_id": null, "_avg": { "$avg": "$Price" } } }
        );
        assert_eq!(query.finalize(vec![]).unwrap(), Bson::Null);
    }

    #[test]
    fn test_sum_of_empty_sequence_is_zero() {
        let query = translate_terminal_call(MethodId::Sum, vec![value_selector()], Type::Int32);
        assert_eq!(query.finalize(vec![]).unwrap(), Bson::Int32(0));
    }

    #[test]
    fn test_first_with_predicate() {
        let query = translate_terminal_call(MethodId::First, vec![value_is(3)], item());
        assert_eq!(
            query.render(),
            vec![doc! { "$match": { "Value": 3 } }, doc! { "$limit": 1 }]
        );
        assert!(matches!(query.finalize(vec![]), Err(Error::InvalidOperation(_))));
        assert_eq!(
            query.finalize(vec![doc! { "Name": "a", "Value": 3 }]).unwrap(),
            Bson::Document(doc! { "Name": "a", "Value": 3 })
        );
    }

    #[test]
    fn test_first_or_default_of_empty_sequence_is_null() {
        let query = translate_terminal_call(MethodId::FirstOrDefault, vec![], item());
        assert_eq!(query.finalize(vec![]).unwrap(), Bson::Null);
    }

    #[test]
    fn test_single_rejects_two_results() {
        let query = translate_terminal_call(MethodId::Single, vec![], item());
        assert_eq!(query.render(), vec![doc! { "$limit": 2 }]);
        assert!(matches!(
            query.finalize(vec![doc! { "Value": 1 }, doc! { "Value": 2 }]),
            Err(Error::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_last() {
        let query = translate_terminal_call(MethodId::LastOrDefault, vec![], item());
        assert_eq!(
            query.render(),
            vec![
                doc! { "$group": { "_id": null, "_last": { "$last": "$$ROOT" } } },
                doc! { "$replaceRoot": { "newRoot": "$_last" } },
            ]
        );
    }

    #[test]
    fn test_element_at() {
        let query = translate_terminal_call(MethodId::ElementAt, vec![Expr::constant(4)], item());
        assert_eq!(query.render(), vec![doc! { "$skip": 4 }, doc! { "$limit": 1 }]);
    }

    #[test]
    fn test_count() {
        let query = translate_terminal_call(MethodId::Count, vec![value_is(1)], Type::Int32);
        assert_eq!(
            query.render(),
            vec![doc! { "$match": { "Value": 1 } }, doc! { "$count": "_v" }]
        );
        assert_eq!(query.finalize(vec![doc! { "_v": 12 }]).unwrap(), Bson::Int32(12));
        assert_eq!(query.finalize(vec![]).unwrap(), Bson::Int32(0));
    }

    #[test]
    fn test_long_count_of_empty_sequence() {
        let query = translate_terminal_call(MethodId::LongCount, vec![], Type::Int64);
        assert_eq!(query.finalize(vec![]).unwrap(), Bson::Int64(0));
    }

    #[test]
    fn test_any_and_all() {
        let any = translate_terminal_call(MethodId::Any, vec![], Type::Boolean);
        assert_eq!(
            any.render(),
            vec![
                doc! { "$limit": 1 },
                doc! { "$project": { "_id": 0, "_v": { "$literal": true } } },
            ]
        );
        assert_eq!(any.finalize(vec![doc! { "_v": true }]).unwrap(), Bson::Boolean(true));

        let all = translate_terminal_call(MethodId::All, vec![value_is(1)], Type::Boolean);
        assert_eq!(all.render()[0], doc! { "$match": { "$nor": [{ "Value": 1 }] } });
        assert_eq!(all.finalize(vec![]).unwrap(), Bson::Boolean(true));
        assert_eq!(all.finalize(vec![doc! { "_v": true }]).unwrap(), Bson::Boolean(false));
    }

    #[test]
    fn test_chain_without_terminal_is_a_list() {
        let query = translate_terminal_call(MethodId::Take, vec![Expr::constant(2)], Type::queryable(item()));
        assert_eq!(query.finalizer, Finalizer::ToList);
        assert_eq!(
            query.finalize(vec![doc! { "Value": 1 }]).unwrap(),
            Bson::Array(vec![Bson::Document(doc! { "Value": 1 })])
        );
    }
}
