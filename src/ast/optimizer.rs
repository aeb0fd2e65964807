//! AST simplifier.
//!
//! A pure, bottom-up rewrite pass applied once after translation and before
//! rendering. Every rule preserves the meaning of the query; the point is
//! shorter and more index-friendly output (field paths instead of
//! `$getField`, flattened `$and`, merged `$match` stages, ...).

use super::expressions::{is_safe_field_name, AstExpression, AstVarBinding};
use super::filters::{AstComparisonOperator, AstFilter, AstFilterOperation};
use super::pipeline::AstPipeline;
use super::stages::{AstGroupField, AstProjectSpecification, AstStage};
use bson::Bson;
use tracing::{trace, warn};

/// Which rule set the simplifier applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SimplifierMode {
    /// Aggregation pipelines and filters
    #[default]
    Aggregation,
    /// Find projections, where `Set(f, "$f")` can become `Include(f)`
    FindProjection,
}

/// Rule-based AST simplifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct Simplifier {
    mode: SimplifierMode,
}

impl Simplifier {
    pub fn new(mode: SimplifierMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> SimplifierMode {
        self.mode
    }

    // === Pipelines ===

    pub fn simplify_pipeline(&self, pipeline: AstPipeline) -> AstPipeline {
        let mut stages: Vec<AstStage> = Vec::with_capacity(pipeline.len());
        for stage in pipeline.into_stages() {
            let stage = match self.simplify_stage(stage) {
                Some(stage) => stage,
                None => continue,
            };
            match (stages.last_mut(), stage) {
                (Some(AstStage::Match(previous)), AstStage::Match(next)) => {
                    trace!("merging adjacent $match stages");
                    let merged = AstFilter::And(vec![previous.clone(), next]);
                    *previous = self.simplify_filter(merged);
                }
                (Some(AstStage::Limit(previous)), AstStage::Limit(next)) => {
                    trace!("merging adjacent $limit stages");
                    *previous = (*previous).min(next);
                }
                (Some(AstStage::Skip(previous)), AstStage::Skip(next)) => {
                    trace!("merging adjacent $skip stages");
                    *previous = previous.saturating_add(next);
                }
                (_, stage) => stages.push(stage),
            }
        }
        AstPipeline::new(stages)
    }

    fn simplify_stage(&self, stage: AstStage) -> Option<AstStage> {
        match stage {
            AstStage::Match(filter) => Some(AstStage::Match(self.simplify_filter(filter))),
            AstStage::Project(specifications) => Some(AstStage::Project(
                self.simplify_projection(specifications),
            )),
            AstStage::Group { id, fields } => Some(AstStage::Group {
                id: self.simplify_expression(id),
                fields: fields
                    .into_iter()
                    .map(|mut field: AstGroupField| {
                        field.accumulator.arg = self.simplify_expression(field.accumulator.arg);
                        field
                    })
                    .collect(),
            }),
            AstStage::ReplaceRoot(new_root) => {
                let new_root = self.simplify_expression(new_root);
                if new_root.is_root_var() || new_root.is_current_var() {
                    trace!("dropping no-op $replaceRoot");
                    None
                } else {
                    Some(AstStage::ReplaceRoot(new_root))
                }
            }
            AstStage::Set(fields) => {
                let fields: Vec<_> = fields
                    .into_iter()
                    .map(|mut field| {
                        field.value = self.simplify_expression(field.value);
                        field
                    })
                    .filter(|field| {
                        let self_assignment = matches!(
                            field.value.as_field_path().and_then(|p| p.field_name()),
                            Some(name) if name == field.path
                        );
                        if self_assignment {
                            trace!(field = %field.path, "dropping self-assignment from $set");
                        }
                        !self_assignment
                    })
                    .collect();
                if fields.is_empty() {
                    warn!("dropping empty $set stage");
                    None
                } else {
                    Some(AstStage::Set(fields))
                }
            }
            other => Some(other),
        }
    }

    pub fn simplify_projection(
        &self,
        specifications: Vec<AstProjectSpecification>,
    ) -> Vec<AstProjectSpecification> {
        specifications
            .into_iter()
            .map(|specification| match specification {
                AstProjectSpecification::Set(path, value) => {
                    let value = self.simplify_expression(value);
                    let is_same_field = matches!(
                        value.as_field_path().and_then(|p| p.field_name()),
                        Some(name) if name == path
                    );
                    if self.mode == SimplifierMode::FindProjection && is_same_field {
                        trace!(field = %path, "turning self-projection into include");
                        AstProjectSpecification::Include(path)
                    } else {
                        AstProjectSpecification::Set(path, value)
                    }
                }
                other => other,
            })
            .collect()
    }

    // === Filters ===

    pub fn simplify_filter(&self, filter: AstFilter) -> AstFilter {
        match filter {
            AstFilter::And(children) => {
                let children = self.flatten_filters(children, |f| match f {
                    AstFilter::And(inner) => Ok(inner),
                    other => Err(other),
                });
                single_or(children, AstFilter::And)
            }
            AstFilter::Or(children) => {
                let children = self.flatten_filters(children, |f| match f {
                    AstFilter::Or(inner) => Ok(inner),
                    other => Err(other),
                });
                single_or(children, AstFilter::Or)
            }
            AstFilter::Nor(children) => {
                let mut children: Vec<AstFilter> = children
                    .into_iter()
                    .map(|child| self.simplify_filter(child))
                    .collect();
                if children.len() == 1 {
                    if let AstFilter::Nor(inner) = &mut children[0] {
                        trace!("removing double $nor");
                        let inner = std::mem::take(inner);
                        return single_or(inner, AstFilter::Or);
                    }
                }
                AstFilter::Nor(children)
            }
            AstFilter::Not(inner) => self.simplify_not(self.simplify_filter(*inner)),
            AstFilter::Field { field, operation } => AstFilter::Field {
                field,
                operation: self.simplify_operation(operation),
            },
            AstFilter::Expr(expression) => AstFilter::Expr(self.simplify_expression(expression)),
        }
    }

    fn simplify_not(&self, inner: AstFilter) -> AstFilter {
        match inner {
            AstFilter::Nor(children) => {
                trace!("removing $not over $nor");
                single_or(children, AstFilter::Or)
            }
            AstFilter::Not(inner) => {
                trace!("removing double $not");
                *inner
            }
            AstFilter::Field { field, operation } => {
                let operation = match operation {
                    AstFilterOperation::Comparison {
                        op: AstComparisonOperator::Eq,
                        value,
                    } => AstFilterOperation::comparison(AstComparisonOperator::Ne, value),
                    AstFilterOperation::Comparison {
                        op: AstComparisonOperator::Ne,
                        value,
                    } => AstFilterOperation::comparison(AstComparisonOperator::Eq, value),
                    AstFilterOperation::Exists(exists) => AstFilterOperation::Exists(!exists),
                    AstFilterOperation::Not(operation) => *operation,
                    other => AstFilterOperation::not(other),
                };
                AstFilter::Field { field, operation }
            }
            other => AstFilter::Not(Box::new(other)),
        }
    }

    fn simplify_operation(&self, operation: AstFilterOperation) -> AstFilterOperation {
        match operation {
            AstFilterOperation::ElemMatch(filter) => {
                AstFilterOperation::ElemMatch(Box::new(self.simplify_filter(*filter)))
            }
            AstFilterOperation::Not(inner) => {
                AstFilterOperation::Not(Box::new(self.simplify_operation(*inner)))
            }
            other => other,
        }
    }

    fn flatten_filters<F>(&self, children: Vec<AstFilter>, unwrap: F) -> Vec<AstFilter>
    where
        F: Fn(AstFilter) -> std::result::Result<Vec<AstFilter>, AstFilter> + Copy,
    {
        let mut flattened = Vec::with_capacity(children.len());
        for child in children {
            match unwrap(self.simplify_filter(child)) {
                Ok(inner) => {
                    trace!("flattening nested logical filter");
                    flattened.extend(inner);
                }
                Err(other) => flattened.push(other),
            }
        }
        flattened
    }

    // === Expressions ===

    pub fn simplify_expression(&self, expression: AstExpression) -> AstExpression {
        let expression = map_children(expression, &mut |child| self.simplify_expression(child));
        match expression {
            AstExpression::GetField { input, field } if is_safe_field_name(&field) => {
                match *input {
                    AstExpression::Var(var) if var.is_current() => {
                        trace!(field = %field, "getField on $$CURRENT to field path");
                        field_path_or(format!("${}", field), AstExpression::Var(var), field)
                    }
                    AstExpression::Var(var) => {
                        trace!(field = %field, "getField on variable to field path");
                        field_path_or(
                            format!("{}.{}", var.render(), field),
                            AstExpression::Var(var),
                            field,
                        )
                    }
                    AstExpression::FieldPath(path) => {
                        trace!(field = %field, "getField on field path to field path");
                        field_path_or(
                            format!("{}.{}", path.as_str(), field),
                            AstExpression::FieldPath(path),
                            field,
                        )
                    }
                    other => AstExpression::GetField {
                        input: Box::new(other),
                        field,
                    },
                }
            }
            AstExpression::Nary { op, args } if op.is_associative() => {
                let mut flattened = Vec::with_capacity(args.len());
                for arg in args {
                    match arg {
                        AstExpression::Nary {
                            op: inner_op,
                            args: inner,
                        } if inner_op == op => {
                            trace!(op = op.render(), "flattening nested operator");
                            flattened.extend(inner);
                        }
                        other => flattened.push(other),
                    }
                }
                AstExpression::Nary {
                    op,
                    args: flattened,
                }
            }
            AstExpression::Cond {
                test,
                then,
                otherwise,
            } => match test.as_constant() {
                Some(Bson::Boolean(true)) => {
                    trace!("$cond with constant true test");
                    *then
                }
                Some(Bson::Boolean(false)) => {
                    trace!("$cond with constant false test");
                    *otherwise
                }
                _ => AstExpression::Cond {
                    test,
                    then,
                    otherwise,
                },
            },
            AstExpression::Let { vars, body } => self.simplify_let(vars, *body),
            other => other,
        }
    }

    fn simplify_let(&self, vars: Vec<AstVarBinding>, body: AstExpression) -> AstExpression {
        let mut body = body;
        let mut kept = Vec::with_capacity(vars.len());
        for binding in vars.into_iter().rev() {
            let mut usage = VarUsage::default();
            count_references(&body, binding.var.name(), false, &mut usage);
            // `$$v.a` maps over arrays where `$getField` would not, and
            // `$getField` needs 5.0
            let path_safe = !usage.dotted
                || matches!(binding.value, AstExpression::Var(_) | AstExpression::FieldPath(_));
            let inlinable =
                usage.count == 0 || (usage.count == 1 && !usage.in_loop_body && path_safe);
            if inlinable {
                trace!(var = binding.var.name(), uses = usage.count, "inlining $let variable");
                body = substitute(body, binding.var.name(), &binding.value);
            } else {
                kept.push(binding);
            }
        }
        let body = self.simplify_expression(body);
        if kept.is_empty() {
            body
        } else {
            kept.reverse();
            AstExpression::Let {
                vars: kept,
                body: Box::new(body),
            }
        }
    }
}

fn single_or(mut children: Vec<AstFilter>, wrap: fn(Vec<AstFilter>) -> AstFilter) -> AstFilter {
    if children.len() == 1 {
        children.remove(0)
    } else {
        wrap(children)
    }
}

fn field_path_or(path: String, input: AstExpression, field: String) -> AstExpression {
    match AstExpression::field_path(path) {
        Ok(expression) => expression,
        Err(_) => AstExpression::GetField {
            input: Box::new(input),
            field,
        },
    }
}

#[derive(Debug, Default)]
struct VarUsage {
    count: usize,
    in_loop_body: bool,
    /// Referenced as `$$name.path`
    dotted: bool,
}

fn is_reference_to(path: &str, name: &str) -> bool {
    path.strip_prefix("$$")
        .and_then(|rest| rest.strip_prefix(name))
        .map_or(false, |rest| rest.is_empty() || rest.starts_with('.'))
}

fn count_references(expression: &AstExpression, name: &str, in_loop: bool, usage: &mut VarUsage) {
    let record = |usage: &mut VarUsage| {
        usage.count += 1;
        usage.in_loop_body |= in_loop;
    };
    match expression {
        AstExpression::Var(var) if var.name() == name => record(usage),
        AstExpression::FieldPath(path) if is_reference_to(path.as_str(), name) => {
            usage.dotted |= path.as_str().len() > 2 + name.len();
            record(usage)
        }
        AstExpression::Let { vars, body } => {
            for binding in vars {
                count_references(&binding.value, name, in_loop, usage);
            }
            if !vars.iter().any(|binding| binding.var.name() == name) {
                count_references(body, name, in_loop, usage);
            }
        }
        AstExpression::Map { input, var, body } => {
            count_references(input, name, in_loop, usage);
            if var.name() != name {
                count_references(body, name, true, usage);
            }
        }
        AstExpression::Filter { input, var, cond } => {
            count_references(input, name, in_loop, usage);
            if var.name() != name {
                count_references(cond, name, true, usage);
            }
        }
        AstExpression::Reduce {
            input,
            initial_value,
            body,
        } => {
            count_references(input, name, in_loop, usage);
            count_references(initial_value, name, in_loop, usage);
            count_references(body, name, true, usage);
        }
        other => for_each_child(other, &mut |child| count_references(child, name, in_loop, usage)),
    }
}

/// Replace references to `$$name` (including `$$name.a.b` paths) by `value`
fn substitute(expression: AstExpression, name: &str, value: &AstExpression) -> AstExpression {
    match expression {
        AstExpression::Var(var) if var.name() == name => value.clone(),
        AstExpression::FieldPath(path) if is_reference_to(path.as_str(), name) => {
            let mut result = value.clone();
            let prefix_len = 2 + name.len();
            let rest = &path.as_str()[prefix_len..];
            for segment in rest.split('.').filter(|s| !s.is_empty()) {
                result = AstExpression::GetField {
                    input: Box::new(result),
                    field: segment.to_string(),
                };
            }
            result
        }
        AstExpression::Let { vars, body } => {
            let shadows = vars.iter().any(|binding| binding.var.name() == name);
            let vars = vars
                .into_iter()
                .map(|binding| AstVarBinding {
                    var: binding.var,
                    value: substitute(binding.value, name, value),
                })
                .collect();
            let body = if shadows {
                body
            } else {
                Box::new(substitute(*body, name, value))
            };
            AstExpression::Let { vars, body }
        }
        AstExpression::Map { input, var, body } => {
            let body = if var.name() == name {
                body
            } else {
                Box::new(substitute(*body, name, value))
            };
            AstExpression::Map {
                input: Box::new(substitute(*input, name, value)),
                var,
                body,
            }
        }
        AstExpression::Filter { input, var, cond } => {
            let cond = if var.name() == name {
                cond
            } else {
                Box::new(substitute(*cond, name, value))
            };
            AstExpression::Filter {
                input: Box::new(substitute(*input, name, value)),
                var,
                cond,
            }
        }
        other => map_children(other, &mut |child| substitute(child, name, value)),
    }
}

fn for_each_child<F: FnMut(&AstExpression)>(expression: &AstExpression, f: &mut F) {
    match expression {
        AstExpression::Constant(_) | AstExpression::FieldPath(_) | AstExpression::Var(_) => {}
        AstExpression::Let { vars, body } => {
            for binding in vars {
                f(&binding.value);
            }
            f(body);
        }
        AstExpression::Unary { arg, .. } => f(arg),
        AstExpression::Binary { left, right, .. } => {
            f(left);
            f(right);
        }
        AstExpression::Nary { args, .. } | AstExpression::ComputedArray(args) => {
            args.iter().for_each(|arg| f(arg))
        }
        AstExpression::Ternary {
            first,
            second,
            third,
            ..
        } => {
            f(first);
            f(second);
            f(third);
        }
        AstExpression::Cond {
            test,
            then,
            otherwise,
        } => {
            f(test);
            f(then);
            f(otherwise);
        }
        AstExpression::Switch { branches, default } => {
            for branch in branches {
                f(&branch.case);
                f(&branch.then);
            }
            if let Some(default) = default {
                f(default);
            }
        }
        AstExpression::ComputedDocument(fields) => {
            fields.iter().for_each(|field| f(&field.value))
        }
        AstExpression::GetField { input, .. } => f(input),
        AstExpression::Map { input, body, .. } => {
            f(input);
            f(body);
        }
        AstExpression::Filter { input, cond, .. } => {
            f(input);
            f(cond);
        }
        AstExpression::Reduce {
            input,
            initial_value,
            body,
        } => {
            f(input);
            f(initial_value);
            f(body);
        }
        AstExpression::Trim { input, chars, .. } => {
            f(input);
            if let Some(chars) = chars {
                f(chars);
            }
        }
        AstExpression::ReplaceAll {
            input,
            find,
            replacement,
        } => {
            f(input);
            f(find);
            f(replacement);
        }
        AstExpression::RegexMatch { input, .. } => f(input),
        AstExpression::DateAdd {
            start_date, amount, ..
        } => {
            f(start_date);
            f(amount);
        }
        AstExpression::Convert { input, .. } => f(input),
    }
}

fn map_children<F: FnMut(AstExpression) -> AstExpression>(
    expression: AstExpression,
    f: &mut F,
) -> AstExpression {
    fn boxed<F: FnMut(AstExpression) -> AstExpression>(
        b: Box<AstExpression>,
        f: &mut F,
    ) -> Box<AstExpression> {
        Box::new(f(*b))
    }

    match expression {
        leaf @ (AstExpression::Constant(_) | AstExpression::FieldPath(_) | AstExpression::Var(_)) => {
            leaf
        }
        AstExpression::Let { vars, body } => AstExpression::Let {
            vars: vars
                .into_iter()
                .map(|binding| AstVarBinding {
                    var: binding.var,
                    value: f(binding.value),
                })
                .collect(),
            body: boxed(body, f),
        },
        AstExpression::Unary { op, arg } => AstExpression::Unary {
            op,
            arg: boxed(arg, f),
        },
        AstExpression::Binary { op, left, right } => AstExpression::Binary {
            op,
            left: boxed(left, f),
            right: boxed(right, f),
        },
        AstExpression::Nary { op, args } => AstExpression::Nary {
            op,
            args: args.into_iter().map(|arg| f(arg)).collect(),
        },
        AstExpression::Ternary {
            op,
            first,
            second,
            third,
        } => AstExpression::Ternary {
            op,
            first: boxed(first, f),
            second: boxed(second, f),
            third: boxed(third, f),
        },
        AstExpression::Cond {
            test,
            then,
            otherwise,
        } => AstExpression::Cond {
            test: boxed(test, f),
            then: boxed(then, f),
            otherwise: boxed(otherwise, f),
        },
        AstExpression::Switch { branches, default } => AstExpression::Switch {
            branches: branches
                .into_iter()
                .map(|mut branch| {
                    branch.case = f(branch.case);
                    branch.then = f(branch.then);
                    branch
                })
                .collect(),
            default: default.map(|d| boxed(d, f)),
        },
        AstExpression::ComputedDocument(fields) => AstExpression::ComputedDocument(
            fields
                .into_iter()
                .map(|mut field| {
                    field.value = f(field.value);
                    field
                })
                .collect(),
        ),
        AstExpression::ComputedArray(items) => {
            AstExpression::ComputedArray(items.into_iter().map(|item| f(item)).collect())
        }
        AstExpression::GetField { input, field } => AstExpression::GetField {
            input: boxed(input, f),
            field,
        },
        AstExpression::Map { input, var, body } => AstExpression::Map {
            input: boxed(input, f),
            var,
            body: boxed(body, f),
        },
        AstExpression::Filter { input, var, cond } => AstExpression::Filter {
            input: boxed(input, f),
            var,
            cond: boxed(cond, f),
        },
        AstExpression::Reduce {
            input,
            initial_value,
            body,
        } => AstExpression::Reduce {
            input: boxed(input, f),
            initial_value: boxed(initial_value, f),
            body: boxed(body, f),
        },
        AstExpression::Trim { op, input, chars } => AstExpression::Trim {
            op,
            input: boxed(input, f),
            chars: chars.map(|c| boxed(c, f)),
        },
        AstExpression::ReplaceAll {
            input,
            find,
            replacement,
        } => AstExpression::ReplaceAll {
            input: boxed(input, f),
            find: boxed(find, f),
            replacement: boxed(replacement, f),
        },
        AstExpression::RegexMatch {
            input,
            regex,
            options,
        } => AstExpression::RegexMatch {
            input: boxed(input, f),
            regex,
            options,
        },
        AstExpression::DateAdd {
            start_date,
            unit,
            amount,
        } => AstExpression::DateAdd {
            start_date: boxed(start_date, f),
            unit,
            amount: boxed(amount, f),
        },
        AstExpression::Convert { input, to } => AstExpression::Convert {
            input: boxed(input, f),
            to,
        },
    }
}

/// Simplify with the default (aggregation) rules
pub fn simplify_pipeline(pipeline: AstPipeline) -> AstPipeline {
    Simplifier::default().simplify_pipeline(pipeline)
}
