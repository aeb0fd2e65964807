use super::{bind_stage_lambda, translate_projection_body, Projection, TranslatedPipeline};
use crate::ast::{
    AstAccumulatorExpression, AstAccumulatorOperator, AstExpression, AstFilter, AstGroupField, AstPipeline,
    AstProjectSpecification, AstSortField, AstSortOrder, AstStage,
};
use crate::error::{Error, Result};
use crate::expression::{Expr, MethodId};
use crate::serialization::{GroupingSerializer, Serializer, WrappedValueSerializer};
use crate::translation::context::TranslationContext;
use crate::translation::expressions::{constant_i64, lambda_arg, translate, translate_source};
use crate::translation::filters::translate_predicate;
use std::sync::Arc;

use super::projection::VALUE_FIELD;

const OUTER_FIELD: &str = "_outer";
const INNER_FIELD: &str = "_inner";

/// Append the stages for one query operator
pub(super) fn translate_stage(
    ctx: &TranslationContext,
    expr: &Expr,
    method: MethodId,
    pipeline: TranslatedPipeline,
    args: &[Expr],
) -> Result<TranslatedPipeline> {
    match method {
        MethodId::Where => {
            let (lambda_ctx, lambda) =
                bind_stage_lambda(ctx, expr, single_arg(expr, args)?, &pipeline.output_serializer)?;
            let filter = translate_predicate(&lambda_ctx, &lambda.body)?;
            let serializer = pipeline.output_serializer.clone();
            Ok(pipeline.with_stage(AstStage::match_(filter), serializer))
        }
        MethodId::Select => {
            let (lambda_ctx, lambda) =
                bind_stage_lambda(ctx, expr, single_arg(expr, args)?, &pipeline.output_serializer)?;
            match translate_projection_body(&lambda_ctx, &lambda.body)? {
                Projection::Identity => Ok(pipeline),
                Projection::Specifications {
                    specifications,
                    output_serializer,
                } => Ok(pipeline.with_stage(AstStage::project(specifications)?, output_serializer)),
            }
        }
        MethodId::OrderBy | MethodId::OrderByDescending => {
            let field = sort_field(ctx, expr, method, &pipeline.output_serializer, args)?;
            let serializer = pipeline.output_serializer.clone();
            Ok(pipeline.with_stage(AstStage::sort(vec![field])?, serializer))
        }
        MethodId::ThenBy | MethodId::ThenByDescending => {
            let field = sort_field(ctx, expr, method, &pipeline.output_serializer, args)?;
            let mut stages = pipeline.ast.into_stages();
            let Some(AstStage::Sort(mut fields)) = stages.pop() else {
                return Err(Error::unsupported_because(
                    expr,
                    format!("{} must follow OrderBy or another ThenBy", method),
                ));
            };
            fields.push(field);
            stages.push(AstStage::sort(fields)?);
            Ok(TranslatedPipeline {
                ast: AstPipeline::new(stages),
                output_serializer: pipeline.output_serializer,
            })
        }
        MethodId::Take | MethodId::Skip | MethodId::Sample => {
            let count = constant_count(expr, single_arg(expr, args)?)?;
            let stage = match method {
                // `$limit` must be positive
                MethodId::Take if count == 0 => {
                    AstStage::match_(AstFilter::expr(AstExpression::constant(false)))
                }
                MethodId::Take => AstStage::limit(count)?,
                MethodId::Skip => AstStage::skip(count)?,
                _ => AstStage::sample(count)?,
            };
            let serializer = pipeline.output_serializer.clone();
            Ok(pipeline.with_stage(stage, serializer))
        }
        MethodId::GroupBy => translate_group_by(ctx, expr, pipeline, args),
        MethodId::SelectMany => translate_select_many(ctx, expr, pipeline, args),
        MethodId::Distinct => {
            if !args.is_empty() {
                return Err(Error::unsupported_because(expr, "Distinct takes no comparer"));
            }
            let serializer = pipeline.output_serializer.clone();
            Ok(pipeline.with_stages(
                vec![
                    AstStage::group(AstExpression::root(), vec![])?,
                    AstStage::replace_root(AstExpression::field("_id")?),
                ],
                serializer,
            ))
        }
        MethodId::Join => translate_join(ctx, expr, pipeline, args),
        MethodId::ToList | MethodId::ToArray => Ok(pipeline),
        _ => Err(Error::unsupported_because(expr, "it is not a pipeline stage")),
    }
}

fn single_arg<'e>(expr: &Expr, args: &'e [Expr]) -> Result<&'e Expr> {
    match args {
        [arg] => Ok(arg),
        _ => Err(Error::unsupported_because(
            expr,
            format!("expected 1 argument, got {}", args.len()),
        )),
    }
}

fn constant_count(expr: &Expr, arg: &Expr) -> Result<i64> {
    constant_i64(arg)
        .ok_or_else(|| Error::unsupported_because(expr, "the count must be a constant integer"))
}

/// A key selector as a document path, relative to the documents described
/// by `serializer`
fn key_path(
    ctx: &TranslationContext,
    expr: &Expr,
    selector: &Expr,
    serializer: &Arc<dyn Serializer>,
) -> Result<String> {
    let (lambda_ctx, lambda) = bind_stage_lambda(ctx, expr, selector, serializer)?;
    let key = translate(&lambda_ctx, &lambda.body)?;
    match key.ast.as_field_path() {
        Some(path) if !path.as_str().starts_with("$$") => Ok(path.as_str()[1..].to_string()),
        _ => Err(Error::unsupported_because(
            expr,
            format!("key {} is not a field path", lambda.body),
        )),
    }
}

fn sort_field(
    ctx: &TranslationContext,
    expr: &Expr,
    method: MethodId,
    serializer: &Arc<dyn Serializer>,
    args: &[Expr],
) -> Result<AstSortField> {
    let path = key_path(ctx, expr, single_arg(expr, args)?, serializer)?;
    let order = match method {
        MethodId::OrderByDescending | MethodId::ThenByDescending => AstSortOrder::Descending,
        _ => AstSortOrder::Ascending,
    };
    AstSortField::new(path, order)
}

/// `GroupBy(key[, element])` as `$group` pushing each element
fn translate_group_by(
    ctx: &TranslationContext,
    expr: &Expr,
    pipeline: TranslatedPipeline,
    args: &[Expr],
) -> Result<TranslatedPipeline> {
    let (key_selector, element_selector) = match args {
        [key] => (key, None),
        [key, element] => (key, Some(element)),
        _ => {
            return Err(Error::unsupported_because(
                expr,
                "GroupBy takes a key selector and an optional element selector",
            ))
        }
    };

    let (key_ctx, key_lambda) =
        bind_stage_lambda(ctx, expr, key_selector, &pipeline.output_serializer)?;
    let key = translate(&key_ctx, &key_lambda.body)?;

    let (element, element_serializer) = match element_selector {
        Some(selector) => {
            let (element_ctx, element_lambda) =
                bind_stage_lambda(ctx, expr, selector, &pipeline.output_serializer)?;
            let element = translate(&element_ctx, &element_lambda.body)?;
            (element.ast, element.serializer)
        }
        None => (AstExpression::root(), pipeline.output_serializer.clone()),
    };

    let stage = AstStage::group(
        key.ast,
        vec![AstGroupField::new(
            GroupingSerializer::ELEMENTS_ELEMENT,
            AstAccumulatorExpression::new(AstAccumulatorOperator::Push, element),
        )?],
    )?;
    let serializer: Arc<dyn Serializer> =
        Arc::new(GroupingSerializer::new(key.serializer, element_serializer));
    Ok(pipeline.with_stage(stage, serializer))
}

/// `SelectMany(s)` as a projection of the inner sequence followed by
/// `$unwind`
fn translate_select_many(
    ctx: &TranslationContext,
    expr: &Expr,
    pipeline: TranslatedPipeline,
    args: &[Expr],
) -> Result<TranslatedPipeline> {
    let (lambda_ctx, lambda) =
        bind_stage_lambda(ctx, expr, single_arg(expr, args)?, &pipeline.output_serializer)?;
    let source = translate_source(&lambda_ctx, &lambda.body)?;
    let stages = vec![
        AstStage::project(vec![
            AstProjectSpecification::set(VALUE_FIELD, source.ast)?,
            AstProjectSpecification::exclude_id(),
        ])?,
        AstStage::unwind(VALUE_FIELD)?,
    ];
    let serializer: Arc<dyn Serializer> =
        Arc::new(WrappedValueSerializer::new(VALUE_FIELD, source.item_serializer));
    Ok(pipeline.with_stages(stages, serializer))
}

/// `Join(inner, outerKey, innerKey, result)` as `$lookup` plus `$unwind`,
/// then the result selector over `_outer` and `_inner`
fn translate_join(
    ctx: &TranslationContext,
    expr: &Expr,
    pipeline: TranslatedPipeline,
    args: &[Expr],
) -> Result<TranslatedPipeline> {
    let [inner, outer_key, inner_key, result] = args else {
        return Err(Error::unsupported_because(
            expr,
            "Join takes an inner source, two key selectors and a result selector",
        ));
    };
    let Expr::Source { collection, ty } = inner else {
        return Err(Error::unsupported_because(
            expr,
            "the inner sequence must be a collection",
        ));
    };
    let inner_type = ty
        .item_type()
        .ok_or_else(|| Error::unsupported_because(expr, "the inner source is not a sequence"))?;
    let inner_serializer = ctx.serializer_for(inner_type)?;
    let outer_serializer = pipeline.output_serializer.clone();

    let local_field = format!(
        "{}.{}",
        OUTER_FIELD,
        key_path(ctx, expr, outer_key, &outer_serializer)?
    );
    let foreign_field = key_path(ctx, expr, inner_key, &inner_serializer)?;

    let result_lambda = lambda_arg(expr, result, 2)?;
    let outer_symbol = ctx.create_embedded_symbol(
        &result_lambda.parameters[0],
        &format!("${}", OUTER_FIELD),
        &outer_serializer,
    )?;
    let inner_symbol = ctx.create_embedded_symbol(
        &result_lambda.parameters[1],
        &format!("${}", INNER_FIELD),
        &inner_serializer,
    )?;
    let result_ctx = ctx.with_symbols(vec![outer_symbol, inner_symbol]);
    let (specifications, output_serializer) =
        match translate_projection_body(&result_ctx, &result_lambda.body)? {
            Projection::Specifications {
                specifications,
                output_serializer,
            } => (specifications, output_serializer),
            Projection::Identity => {
                return Err(Error::unsupported_because(
                    expr,
                    "the result selector must project the joined documents",
                ))
            }
        };

    let stages = vec![
        AstStage::project(vec![
            AstProjectSpecification::set(OUTER_FIELD, AstExpression::root())?,
            AstProjectSpecification::exclude_id(),
        ])?,
        AstStage::lookup(collection, &local_field, &foreign_field, INNER_FIELD)?,
        AstStage::unwind(INNER_FIELD)?,
        AstStage::project(specifications)?,
    ];
    Ok(pipeline.with_stages(stages, output_serializer))
}

#[cfg(test)]
mod tests {
    use super::super::translate_chain;
    use crate::config::TranslationOptions;
    use crate::expression::{DocumentType, Expr, MethodId, Parameter, Type};
    use crate::serialization::{GroupingSerializer, SerializerRegistry, WrappedValueSerializer};
    use crate::translation::context::TranslationContext;
    use bson::{doc, Document};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn person() -> Type {
        DocumentType::new("Person")
            .with_member("Id", Type::Int32)
            .with_member("Name", Type::String)
            .with_member("Age", Type::Int32)
            .with_member("City", Type::String)
            .with_member("Tags", Type::array(Type::String))
            .into_type()
    }

    fn context() -> TranslationContext {
        TranslationContext::new(
            Arc::new(SerializerRegistry::new()),
            TranslationOptions::default(),
        )
    }

    fn people() -> Expr {
        Expr::source("people", person())
    }

    fn lambda(name: &str, ty: Type, body: impl FnOnce(Expr) -> Expr) -> Expr {
        let p = Parameter::new(name, ty);
        let body = body(Expr::parameter(&p));
        Expr::lambda(vec![p], body)
    }

    fn render(expr: &Expr) -> Vec<Document> {
        let ctx = context();
        let serializer = ctx.serializer_for(&person()).unwrap();
        translate_chain(&ctx, expr, &serializer).unwrap().ast.render()
    }

    fn query(source: Expr, method: MethodId, args: Vec<Expr>) -> Expr {
        let ty = source.ty().clone();
        source.call(method, args, ty)
    }

    #[test]
    fn test_where_select() {
        let expr = query(
            query(
                people(),
                MethodId::Where,
                vec![lambda("x", person(), |x| x.field("Age").gt(Expr::constant(30)))],
            ),
            MethodId::Select,
            vec![lambda("x", person(), |x| x.field("Name"))],
        );
        assert_eq!(
            render(&expr),
            vec![
                doc! { "$match": { "Age": { "$gt": 30 } } },
                doc! { "$project": { "Name": 1, "_id": 0 } },
            ]
        );
    }

    #[test]
    fn test_identity_select_adds_no_stage() {
        let expr = query(
            people(),
            MethodId::Select,
            vec![lambda("x", person(), |x| x)],
        );
        assert!(render(&expr).is_empty());
    }

    #[test]
    fn test_order_by_then_by() {
        let ordered = query(
            people(),
            MethodId::OrderBy,
            vec![lambda("x", person(), |x| x.field("Name"))],
        );
        let expr = query(
            ordered,
            MethodId::ThenByDescending,
            vec![lambda("x", person(), |x| x.field("Age"))],
        );
        assert_eq!(render(&expr), vec![doc! { "$sort": { "Name": 1, "Age": -1 } }]);
    }

    #[test]
    fn test_then_by_without_order_by_is_unsupported() {
        let expr = query(
            people(),
            MethodId::ThenBy,
            vec![lambda("x", person(), |x| x.field("Age"))],
        );
        let ctx = context();
        let serializer = ctx.serializer_for(&person()).unwrap();
        assert!(translate_chain(&ctx, &expr, &serializer).is_err());
    }

    #[test]
    fn test_computed_sort_key_is_unsupported() {
        let expr = query(
            people(),
            MethodId::OrderBy,
            vec![lambda("x", person(), |x| x.field("Age").add(Expr::constant(1)))],
        );
        let ctx = context();
        let serializer = ctx.serializer_for(&person()).unwrap();
        assert!(translate_chain(&ctx, &expr, &serializer).is_err());
    }

    #[test]
    fn test_skip_take_sample() {
        let expr = query(
            query(
                query(people(), MethodId::Skip, vec![Expr::constant(10)]),
                MethodId::Take,
                vec![Expr::constant(5)],
            ),
            MethodId::Sample,
            vec![Expr::constant(2)],
        );
        assert_eq!(
            render(&expr),
            vec![
                doc! { "$skip": 10 },
                doc! { "$limit": 5 },
                doc! { "$sample": { "size": 2 } },
            ]
        );
    }

    #[test]
    fn test_take_zero() {
        let expr = query(people(), MethodId::Take, vec![Expr::constant(0)]);
        assert_eq!(render(&expr), vec![doc! { "$match": { "$expr": false } }]);
    }

    #[test]
    fn test_group_by_then_select() {
        let grouping = Type::grouping(Type::String, person());
        let grouped = people().call(
            MethodId::GroupBy,
            vec![lambda("x", person(), |x| x.field("City"))],
            Type::queryable(grouping.clone()),
        );
        let expr = query(
            grouped,
            MethodId::Select,
            vec![lambda("g", grouping, |g| {
                Expr::new_object(
                    "Summary",
                    vec![
                        ("City", g.clone().member("Key", Type::String)),
                        ("Count", g.call(MethodId::Count, vec![], Type::Int32)),
                    ],
                )
            })],
        );
        assert_eq!(
            render(&expr),
            vec![
                doc! { "$group": { "_id": "$City", "_elements": { "$push": "$$ROOT" } } },
                doc! { "$project": { "City": "$_id", "Count": { "$size": "$_elements" }, "_id": 0 } },
            ]
        );
    }

    #[test]
    fn test_group_by_output_serializer() {
        let expr = query(
            people(),
            MethodId::GroupBy,
            vec![lambda("x", person(), |x| x.field("City"))],
        );
        let ctx = context();
        let serializer = ctx.serializer_for(&person()).unwrap();
        let pipeline = translate_chain(&ctx, &expr, &serializer).unwrap();
        assert!(pipeline.output_serializer.is::<GroupingSerializer>());
    }

    #[test]
    fn test_select_many() {
        let expr = query(
            people(),
            MethodId::SelectMany,
            vec![lambda("x", person(), |x| x.field("Tags"))],
        );
        let ctx = context();
        let serializer = ctx.serializer_for(&person()).unwrap();
        let pipeline = translate_chain(&ctx, &expr, &serializer).unwrap();
        assert_eq!(
            pipeline.ast.render(),
            vec![
                doc! { "$project": { "_v": "$Tags", "_id": 0 } },
                doc! { "$unwind": "$_v" },
            ]
        );
        let wrapped = pipeline
            .output_serializer
            .downcast_ref::<WrappedValueSerializer>()
            .unwrap();
        assert_eq!(wrapped.field_name(), "_v");
    }

    #[test]
    fn test_distinct() {
        let selected = query(
            people(),
            MethodId::Select,
            vec![lambda("x", person(), |x| x.field("City"))],
        );
        let expr = query(selected, MethodId::Distinct, vec![]);
        assert_eq!(
            render(&expr),
            vec![
                doc! { "$project": { "City": 1, "_id": 0 } },
                doc! { "$group": { "_id": "$$ROOT" } },
                doc! { "$replaceRoot": { "newRoot": "$_id" } },
            ]
        );
    }

    #[test]
    fn test_join() {
        let order = DocumentType::new("Order")
            .with_member("PersonId", Type::Int32)
            .with_member("Total", Type::Double)
            .into_type();
        let o = Parameter::new("o", order.clone());
        let p = Parameter::new("p", person());
        let expr = query(
            Expr::source("orders", order.clone()),
            MethodId::Join,
            vec![
                people(),
                lambda("o", order.clone(), |o| o.field("PersonId")),
                lambda("p", person(), |p| p.field("Id")),
                Expr::lambda(
                    vec![o.clone(), p.clone()],
                    Expr::new_object(
                        "Row",
                        vec![
                            ("Total", Expr::parameter(&o).field("Total")),
                            ("Name", Expr::parameter(&p).field("Name")),
                        ],
                    ),
                ),
            ],
        );
        let ctx = context();
        let serializer = ctx.serializer_for(&order).unwrap();
        let pipeline = translate_chain(&ctx, &expr, &serializer).unwrap();
        assert_eq!(
            pipeline.ast.render(),
            vec![
                doc! { "$project": { "_outer": "$$ROOT", "_id": 0 } },
                doc! { "$lookup": {
                    "from": "people",
                    "localField": "_outer.PersonId",
                    "foreignField": "_id",
                    "as": "_inner",
                } },
                doc! { "$unwind": "$_inner" },
                doc! { "$project": { "Total": "$_outer.Total", "Name": "$_inner.Name", "_id": 0 } },
            ]
        );
    }

    #[test]
    fn test_to_list_is_identity() {
        let expr = query(
            query(people(), MethodId::Take, vec![Expr::constant(1)]),
            MethodId::ToList,
            vec![],
        );
        assert_eq!(render(&expr), vec![doc! { "$limit": 1 }]);
    }

    #[test]
    fn test_stage_after_terminal_is_unsupported() {
        let counted = people().call(MethodId::Count, vec![], Type::Int32);
        let expr = query(counted, MethodId::Take, vec![Expr::constant(1)]);
        let ctx = context();
        let serializer = ctx.serializer_for(&person()).unwrap();
        assert!(translate_chain(&ctx, &expr, &serializer).is_err());
    }
}
