//! Aggregation expression nodes.
//!
//! An [`AstExpression`] is one node of an aggregation-language expression
//! (`{ $add: [...] }`, `"$field"`, `{ $cond: {...} }`, ...). Nodes are
//! immutable once built. Constructors that can receive invalid input
//! (empty paths, empty operand lists, malformed variable names) validate it
//! and return [`Error::InvalidArgument`]; rendering never fails.

use crate::error::{Error, Result};
use bson::{doc, Bson, Document};

/// Returns true when `name` can be used directly in a dotted field path
/// (non-empty, no dots, not starting with `$`).
pub fn is_safe_field_name(name: &str) -> bool {
    !name.is_empty() && !name.contains('.') && !name.starts_with('$')
}

/// Returns true when `name` is a valid aggregation variable name.
pub fn is_valid_var_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AstUnaryOperator {
    Abs,
    AllElementsTrue,
    AnyElementTrue,
    ArrayAvg,
    ArrayMax,
    ArrayMin,
    ArraySum,
    Ceil,
    DayOfMonth,
    DayOfWeek,
    DayOfYear,
    Exp,
    First,
    Floor,
    Hour,
    Last,
    Ln,
    Log10,
    Millisecond,
    Minute,
    Month,
    Not,
    ReverseArray,
    Second,
    Size,
    Sqrt,
    StrLenCP,
    ToDecimal,
    ToDouble,
    ToInt,
    ToLong,
    ToLower,
    ToString,
    ToUpper,
    Trunc,
    Year,
}

impl AstUnaryOperator {
    pub fn render(self) -> &'static str {
        match self {
            AstUnaryOperator::Abs => "$abs",
            AstUnaryOperator::AllElementsTrue => "$allElementsTrue",
            AstUnaryOperator::AnyElementTrue => "$anyElementTrue",
            AstUnaryOperator::ArrayAvg => "$avg",
            AstUnaryOperator::ArrayMax => "$max",
            AstUnaryOperator::ArrayMin => "$min",
            AstUnaryOperator::ArraySum => "$sum",
            AstUnaryOperator::Ceil => "$ceil",
            AstUnaryOperator::DayOfMonth => "$dayOfMonth",
            AstUnaryOperator::DayOfWeek => "$dayOfWeek",
            AstUnaryOperator::DayOfYear => "$dayOfYear",
            AstUnaryOperator::Exp => "$exp",
            AstUnaryOperator::First => "$first",
            AstUnaryOperator::Floor => "$floor",
            AstUnaryOperator::Hour => "$hour",
            AstUnaryOperator::Last => "$last",
            AstUnaryOperator::Ln => "$ln",
            AstUnaryOperator::Log10 => "$log10",
            AstUnaryOperator::Millisecond => "$millisecond",
            AstUnaryOperator::Minute => "$minute",
            AstUnaryOperator::Month => "$month",
            AstUnaryOperator::Not => "$not",
            AstUnaryOperator::ReverseArray => "$reverseArray",
            AstUnaryOperator::Second => "$second",
            AstUnaryOperator::Size => "$size",
            AstUnaryOperator::Sqrt => "$sqrt",
            AstUnaryOperator::StrLenCP => "$strLenCP",
            AstUnaryOperator::ToDecimal => "$toDecimal",
            AstUnaryOperator::ToDouble => "$toDouble",
            AstUnaryOperator::ToInt => "$toInt",
            AstUnaryOperator::ToLong => "$toLong",
            AstUnaryOperator::ToLower => "$toLower",
            AstUnaryOperator::ToString => "$toString",
            AstUnaryOperator::ToUpper => "$toUpper",
            AstUnaryOperator::Trunc => "$trunc",
            AstUnaryOperator::Year => "$year",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AstBinaryOperator {
    ArrayElemAt,
    Cmp,
    Divide,
    Eq,
    Gt,
    Gte,
    IfNull,
    In,
    IndexOfCP,
    Log,
    Lt,
    Lte,
    Mod,
    Ne,
    Pow,
    Round,
    SetDifference,
    Slice,
    Split,
    Subtract,
}

impl AstBinaryOperator {
    pub fn render(self) -> &'static str {
        match self {
            AstBinaryOperator::ArrayElemAt => "$arrayElemAt",
            AstBinaryOperator::Cmp => "$cmp",
            AstBinaryOperator::Divide => "$divide",
            AstBinaryOperator::Eq => "$eq",
            AstBinaryOperator::Gt => "$gt",
            AstBinaryOperator::Gte => "$gte",
            AstBinaryOperator::IfNull => "$ifNull",
            AstBinaryOperator::In => "$in",
            AstBinaryOperator::IndexOfCP => "$indexOfCP",
            AstBinaryOperator::Log => "$log",
            AstBinaryOperator::Lt => "$lt",
            AstBinaryOperator::Lte => "$lte",
            AstBinaryOperator::Mod => "$mod",
            AstBinaryOperator::Ne => "$ne",
            AstBinaryOperator::Pow => "$pow",
            AstBinaryOperator::Round => "$round",
            AstBinaryOperator::SetDifference => "$setDifference",
            AstBinaryOperator::Slice => "$slice",
            AstBinaryOperator::Split => "$split",
            AstBinaryOperator::Subtract => "$subtract",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            AstBinaryOperator::Eq
                | AstBinaryOperator::Ne
                | AstBinaryOperator::Gt
                | AstBinaryOperator::Gte
                | AstBinaryOperator::Lt
                | AstBinaryOperator::Lte
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AstNaryOperator {
    Add,
    And,
    BitAnd,
    BitOr,
    BitXor,
    Concat,
    ConcatArrays,
    Max,
    Min,
    Multiply,
    Or,
    SetIntersection,
    SetUnion,
}

impl AstNaryOperator {
    pub fn render(self) -> &'static str {
        match self {
            AstNaryOperator::Add => "$add",
            AstNaryOperator::And => "$and",
            AstNaryOperator::BitAnd => "$bitAnd",
            AstNaryOperator::BitOr => "$bitOr",
            AstNaryOperator::BitXor => "$bitXor",
            AstNaryOperator::Concat => "$concat",
            AstNaryOperator::ConcatArrays => "$concatArrays",
            AstNaryOperator::Max => "$max",
            AstNaryOperator::Min => "$min",
            AstNaryOperator::Multiply => "$multiply",
            AstNaryOperator::Or => "$or",
            AstNaryOperator::SetIntersection => "$setIntersection",
            AstNaryOperator::SetUnion => "$setUnion",
        }
    }

    /// Whether nested applications of the operator can be merged into one
    pub fn is_associative(self) -> bool {
        matches!(
            self,
            AstNaryOperator::Add
                | AstNaryOperator::And
                | AstNaryOperator::Concat
                | AstNaryOperator::ConcatArrays
                | AstNaryOperator::Multiply
                | AstNaryOperator::Or
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AstTernaryOperator {
    IndexOfCP,
    Slice,
    SubstrCP,
}

impl AstTernaryOperator {
    pub fn render(self) -> &'static str {
        match self {
            AstTernaryOperator::IndexOfCP => "$indexOfCP",
            AstTernaryOperator::Slice => "$slice",
            AstTernaryOperator::SubstrCP => "$substrCP",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AstTrimOperator {
    Trim,
    LTrim,
    RTrim,
}

impl AstTrimOperator {
    pub fn render(self) -> &'static str {
        match self {
            AstTrimOperator::Trim => "$trim",
            AstTrimOperator::LTrim => "$ltrim",
            AstTrimOperator::RTrim => "$rtrim",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AstDateUnit {
    Day,
    Hour,
    Minute,
    Second,
    Millisecond,
}

impl AstDateUnit {
    pub fn render(self) -> &'static str {
        match self {
            AstDateUnit::Day => "day",
            AstDateUnit::Hour => "hour",
            AstDateUnit::Minute => "minute",
            AstDateUnit::Second => "second",
            AstDateUnit::Millisecond => "millisecond",
        }
    }
}

/// A field path such as `"$a.b"` or `"$$x.a"`.
#[derive(Debug, Clone, PartialEq)]
pub struct AstFieldPath(String);

impl AstFieldPath {
    pub fn new<S: Into<String>>(path: S) -> Result<Self> {
        let path = path.into();
        if !path.starts_with('$') || path.len() < 2 || path.ends_with('.') {
            return Err(Error::InvalidArgument(format!(
                "invalid field path: {:?}",
                path
            )));
        }
        Ok(Self(path))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path without the leading `$` (only meaningful for document fields)
    pub fn field_name(&self) -> Option<&str> {
        if self.0.starts_with("$$") {
            None
        } else {
            Some(&self.0[1..])
        }
    }
}

/// A variable reference (`$$name`).
#[derive(Debug, Clone, PartialEq)]
pub struct AstVar {
    name: String,
    is_current: bool,
}

impl AstVar {
    pub const CURRENT: &'static str = "CURRENT";
    pub const ROOT: &'static str = "ROOT";

    pub fn new<S: Into<String>>(name: S) -> Result<Self> {
        let name = name.into();
        if name != Self::CURRENT && name != Self::ROOT && !is_valid_var_name(&name) {
            return Err(Error::InvalidArgument(format!(
                "invalid variable name: {:?}",
                name
            )));
        }
        Ok(Self {
            name,
            is_current: false,
        })
    }

    pub fn current() -> Self {
        Self {
            name: Self::CURRENT.to_string(),
            is_current: true,
        }
    }

    pub fn root() -> Self {
        Self {
            name: Self::ROOT.to_string(),
            is_current: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_current(&self) -> bool {
        self.is_current
    }

    pub fn render(&self) -> String {
        format!("$${}", self.name)
    }
}

/// One `name: value` entry of a computed document.
#[derive(Debug, Clone, PartialEq)]
pub struct AstComputedField {
    pub(crate) path: String,
    pub(crate) value: AstExpression,
}

impl AstComputedField {
    pub fn new<S: Into<String>>(path: S, value: AstExpression) -> Result<Self> {
        let path = path.into();
        if path.is_empty() || path.starts_with('$') {
            return Err(Error::InvalidArgument(format!(
                "invalid computed field name: {:?}",
                path
            )));
        }
        Ok(Self { path, value })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn value(&self) -> &AstExpression {
        &self.value
    }
}

/// A `$let` variable binding.
#[derive(Debug, Clone, PartialEq)]
pub struct AstVarBinding {
    pub(crate) var: AstVar,
    pub(crate) value: AstExpression,
}

impl AstVarBinding {
    pub fn new(var: AstVar, value: AstExpression) -> Self {
        Self { var, value }
    }

    pub fn var(&self) -> &AstVar {
        &self.var
    }

    pub fn value(&self) -> &AstExpression {
        &self.value
    }
}

/// One `{ case, then }` branch of a `$switch`.
#[derive(Debug, Clone, PartialEq)]
pub struct AstSwitchBranch {
    pub(crate) case: AstExpression,
    pub(crate) then: AstExpression,
}

/// An aggregation expression node.
#[derive(Debug, Clone, PartialEq)]
pub enum AstExpression {
    Constant(Bson),
    FieldPath(AstFieldPath),
    Var(AstVar),
    Let {
        vars: Vec<AstVarBinding>,
        body: Box<AstExpression>,
    },
    Unary {
        op: AstUnaryOperator,
        arg: Box<AstExpression>,
    },
    Binary {
        op: AstBinaryOperator,
        left: Box<AstExpression>,
        right: Box<AstExpression>,
    },
    Nary {
        op: AstNaryOperator,
        args: Vec<AstExpression>,
    },
    Ternary {
        op: AstTernaryOperator,
        first: Box<AstExpression>,
        second: Box<AstExpression>,
        third: Box<AstExpression>,
    },
    Cond {
        test: Box<AstExpression>,
        then: Box<AstExpression>,
        otherwise: Box<AstExpression>,
    },
    Switch {
        branches: Vec<AstSwitchBranch>,
        default: Option<Box<AstExpression>>,
    },
    ComputedDocument(Vec<AstComputedField>),
    ComputedArray(Vec<AstExpression>),
    GetField {
        input: Box<AstExpression>,
        field: String,
    },
    Map {
        input: Box<AstExpression>,
        var: AstVar,
        body: Box<AstExpression>,
    },
    Filter {
        input: Box<AstExpression>,
        var: AstVar,
        cond: Box<AstExpression>,
    },
    Reduce {
        input: Box<AstExpression>,
        initial_value: Box<AstExpression>,
        body: Box<AstExpression>,
    },
    Trim {
        op: AstTrimOperator,
        input: Box<AstExpression>,
        chars: Option<Box<AstExpression>>,
    },
    ReplaceAll {
        input: Box<AstExpression>,
        find: Box<AstExpression>,
        replacement: Box<AstExpression>,
    },
    RegexMatch {
        input: Box<AstExpression>,
        regex: String,
        options: String,
    },
    DateAdd {
        start_date: Box<AstExpression>,
        unit: AstDateUnit,
        amount: Box<AstExpression>,
    },
    /// `$convert` to a BSON type name (`"bool"`, `"objectId"`, ...)
    Convert {
        input: Box<AstExpression>,
        to: &'static str,
    },
}

// === Constructors ===

impl AstExpression {
    pub fn constant<V: Into<Bson>>(value: V) -> Self {
        AstExpression::Constant(value.into())
    }

    pub fn field_path<S: Into<String>>(path: S) -> Result<Self> {
        Ok(AstExpression::FieldPath(AstFieldPath::new(path)?))
    }

    /// `"$name"` for a top-level field of the current document
    pub fn field(name: &str) -> Result<Self> {
        Self::field_path(format!("${}", name))
    }

    pub fn var(var: AstVar) -> Self {
        AstExpression::Var(var)
    }

    pub fn current() -> Self {
        AstExpression::Var(AstVar::current())
    }

    pub fn root() -> Self {
        AstExpression::Var(AstVar::root())
    }

    pub fn let_(vars: Vec<AstVarBinding>, body: AstExpression) -> Result<Self> {
        if vars.is_empty() {
            return Err(Error::InvalidArgument(
                "$let requires at least one variable".to_string(),
            ));
        }
        Ok(AstExpression::Let {
            vars,
            body: Box::new(body),
        })
    }

    pub fn unary(op: AstUnaryOperator, arg: AstExpression) -> Self {
        AstExpression::Unary {
            op,
            arg: Box::new(arg),
        }
    }

    pub fn binary(op: AstBinaryOperator, left: AstExpression, right: AstExpression) -> Self {
        AstExpression::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn nary(op: AstNaryOperator, args: Vec<AstExpression>) -> Result<Self> {
        if args.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "{} requires at least one argument",
                op.render()
            )));
        }
        Ok(AstExpression::Nary { op, args })
    }

    pub fn ternary(
        op: AstTernaryOperator,
        first: AstExpression,
        second: AstExpression,
        third: AstExpression,
    ) -> Self {
        AstExpression::Ternary {
            op,
            first: Box::new(first),
            second: Box::new(second),
            third: Box::new(third),
        }
    }

    pub fn cond(test: AstExpression, then: AstExpression, otherwise: AstExpression) -> Self {
        AstExpression::Cond {
            test: Box::new(test),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        }
    }

    pub fn switch(
        branches: Vec<(AstExpression, AstExpression)>,
        default: Option<AstExpression>,
    ) -> Result<Self> {
        if branches.is_empty() {
            return Err(Error::InvalidArgument(
                "$switch requires at least one branch".to_string(),
            ));
        }
        Ok(AstExpression::Switch {
            branches: branches
                .into_iter()
                .map(|(case, then)| AstSwitchBranch { case, then })
                .collect(),
            default: default.map(Box::new),
        })
    }

    pub fn computed_document(fields: Vec<AstComputedField>) -> Result<Self> {
        for (i, field) in fields.iter().enumerate() {
            if fields[..i].iter().any(|other| other.path == field.path) {
                return Err(Error::InvalidArgument(format!(
                    "duplicate computed field: {:?}",
                    field.path
                )));
            }
        }
        Ok(AstExpression::ComputedDocument(fields))
    }

    pub fn computed_array(items: Vec<AstExpression>) -> Self {
        AstExpression::ComputedArray(items)
    }

    pub fn get_field<S: Into<String>>(input: AstExpression, field: S) -> Result<Self> {
        let field = field.into();
        if field.is_empty() {
            return Err(Error::InvalidArgument(
                "$getField requires a non-empty field name".to_string(),
            ));
        }
        Ok(AstExpression::GetField {
            input: Box::new(input),
            field,
        })
    }

    pub fn map(input: AstExpression, var: AstVar, body: AstExpression) -> Self {
        AstExpression::Map {
            input: Box::new(input),
            var,
            body: Box::new(body),
        }
    }

    pub fn filter(input: AstExpression, var: AstVar, cond: AstExpression) -> Self {
        AstExpression::Filter {
            input: Box::new(input),
            var,
            cond: Box::new(cond),
        }
    }

    pub fn reduce(input: AstExpression, initial_value: AstExpression, body: AstExpression) -> Self {
        AstExpression::Reduce {
            input: Box::new(input),
            initial_value: Box::new(initial_value),
            body: Box::new(body),
        }
    }

    pub fn trim(op: AstTrimOperator, input: AstExpression, chars: Option<AstExpression>) -> Self {
        AstExpression::Trim {
            op,
            input: Box::new(input),
            chars: chars.map(Box::new),
        }
    }

    pub fn replace_all(
        input: AstExpression,
        find: AstExpression,
        replacement: AstExpression,
    ) -> Self {
        AstExpression::ReplaceAll {
            input: Box::new(input),
            find: Box::new(find),
            replacement: Box::new(replacement),
        }
    }

    pub fn regex_match<S: Into<String>>(input: AstExpression, regex: S, options: S) -> Self {
        AstExpression::RegexMatch {
            input: Box::new(input),
            regex: regex.into(),
            options: options.into(),
        }
    }

    pub fn date_add(start_date: AstExpression, unit: AstDateUnit, amount: AstExpression) -> Self {
        AstExpression::DateAdd {
            start_date: Box::new(start_date),
            unit,
            amount: Box::new(amount),
        }
    }

    pub fn convert(input: AstExpression, to: &'static str) -> Self {
        AstExpression::Convert {
            input: Box::new(input),
            to,
        }
    }

    pub fn as_constant(&self) -> Option<&Bson> {
        match self {
            AstExpression::Constant(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_field_path(&self) -> Option<&AstFieldPath> {
        match self {
            AstExpression::FieldPath(path) => Some(path),
            _ => None,
        }
    }

    pub fn is_current_var(&self) -> bool {
        matches!(self, AstExpression::Var(var) if var.is_current())
    }

    pub fn is_root_var(&self) -> bool {
        matches!(self, AstExpression::Var(var) if var.name() == AstVar::ROOT)
    }
}

// === Rendering ===

fn render_args(args: &[AstExpression]) -> Bson {
    Bson::Array(args.iter().map(AstExpression::render).collect())
}

impl AstExpression {
    pub fn render(&self) -> Bson {
        match self {
            AstExpression::Constant(value) => match value {
                Bson::String(s) if s.starts_with('$') => {
                    Bson::Document(doc! { "$literal": s.clone() })
                }
                other => other.clone(),
            },
            AstExpression::FieldPath(path) => Bson::String(path.as_str().to_string()),
            AstExpression::Var(var) => Bson::String(var.render()),
            AstExpression::Let { vars, body } => {
                let mut rendered_vars = Document::new();
                for binding in vars {
                    rendered_vars.insert(binding.var.name().to_string(), binding.value.render());
                }
                Bson::Document(doc! { "$let": { "vars": rendered_vars, "in": body.render() } })
            }
            AstExpression::Unary { op, arg } => {
                // A bare array argument would be read as the argument list
                let rendered = match arg.render() {
                    Bson::Array(items) => Bson::Array(vec![Bson::Array(items)]),
                    other => other,
                };
                let mut document = Document::new();
                document.insert(op.render(), rendered);
                Bson::Document(document)
            }
            AstExpression::Binary { op, left, right } => {
                let mut document = Document::new();
                document.insert(op.render(), vec![left.render(), right.render()]);
                Bson::Document(document)
            }
            AstExpression::Nary { op, args } => {
                let mut document = Document::new();
                document.insert(op.render(), render_args(args));
                Bson::Document(document)
            }
            AstExpression::Ternary {
                op,
                first,
                second,
                third,
            } => {
                let mut document = Document::new();
                document.insert(
                    op.render(),
                    vec![first.render(), second.render(), third.render()],
                );
                Bson::Document(document)
            }
            AstExpression::Cond {
                test,
                then,
                otherwise,
            } => Bson::Document(doc! {
                "$cond": { "if": test.render(), "then": then.render(), "else": otherwise.render() }
            }),
            AstExpression::Switch { branches, default } => {
                let rendered_branches: Vec<Bson> = branches
                    .iter()
                    .map(|branch| {
                        Bson::Document(doc! { "case": branch.case.render(), "then": branch.then.render() })
                    })
                    .collect();
                let mut body = doc! { "branches": rendered_branches };
                if let Some(default) = default {
                    body.insert("default", default.render());
                }
                Bson::Document(doc! { "$switch": body })
            }
            AstExpression::ComputedDocument(fields) => {
                let mut document = Document::new();
                for field in fields {
                    document.insert(field.path.clone(), field.value.render());
                }
                Bson::Document(document)
            }
            AstExpression::ComputedArray(items) => render_args(items),
            AstExpression::GetField { input, field } => Bson::Document(doc! {
                "$getField": { "field": field.clone(), "input": input.render() }
            }),
            AstExpression::Map { input, var, body } => Bson::Document(doc! {
                "$map": { "input": input.render(), "as": var.name(), "in": body.render() }
            }),
            AstExpression::Filter { input, var, cond } => Bson::Document(doc! {
                "$filter": { "input": input.render(), "as": var.name(), "cond": cond.render() }
            }),
            AstExpression::Reduce {
                input,
                initial_value,
                body,
            } => Bson::Document(doc! {
                "$reduce": {
                    "input": input.render(),
                    "initialValue": initial_value.render(),
                    "in": body.render(),
                }
            }),
            AstExpression::Trim { op, input, chars } => {
                let mut body = doc! { "input": input.render() };
                if let Some(chars) = chars {
                    body.insert("chars", chars.render());
                }
                let mut document = Document::new();
                document.insert(op.render(), body);
                Bson::Document(document)
            }
            AstExpression::ReplaceAll {
                input,
                find,
                replacement,
            } => Bson::Document(doc! {
                "$replaceAll": {
                    "input": input.render(),
                    "find": find.render(),
                    "replacement": replacement.render(),
                }
            }),
            AstExpression::RegexMatch {
                input,
                regex,
                options,
            } => {
                let mut body = doc! { "input": input.render(), "regex": regex.clone() };
                if !options.is_empty() {
                    body.insert("options", options.clone());
                }
                Bson::Document(doc! { "$regexMatch": body })
            }
            AstExpression::DateAdd {
                start_date,
                unit,
                amount,
            } => Bson::Document(doc! {
                "$dateAdd": {
                    "startDate": start_date.render(),
                    "unit": unit.render(),
                    "amount": amount.render(),
                }
            }),
            AstExpression::Convert { input, to } => Bson::Document(doc! {
                "$convert": { "input": input.render(), "to": *to }
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AstAccumulatorOperator {
    AddToSet,
    Avg,
    First,
    Last,
    Max,
    Min,
    Push,
    Sum,
}

impl AstAccumulatorOperator {
    pub fn render(self) -> &'static str {
        match self {
            AstAccumulatorOperator::AddToSet => "$addToSet",
            AstAccumulatorOperator::Avg => "$avg",
            AstAccumulatorOperator::First => "$first",
            AstAccumulatorOperator::Last => "$last",
            AstAccumulatorOperator::Max => "$max",
            AstAccumulatorOperator::Min => "$min",
            AstAccumulatorOperator::Push => "$push",
            AstAccumulatorOperator::Sum => "$sum",
        }
    }
}

/// An accumulator inside a `$group` stage (`{ $sum: "$x" }`).
#[derive(Debug, Clone, PartialEq)]
pub struct AstAccumulatorExpression {
    pub(crate) op: AstAccumulatorOperator,
    pub(crate) arg: AstExpression,
}

impl AstAccumulatorExpression {
    pub fn new(op: AstAccumulatorOperator, arg: AstExpression) -> Self {
        Self { op, arg }
    }

    pub fn render(&self) -> Bson {
        let mut document = Document::new();
        document.insert(self.op.render(), self.arg.render());
        Bson::Document(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_path_validation() {
        assert!(AstFieldPath::new("$a.b").is_ok());
        assert!(AstFieldPath::new("a").is_err());
        assert!(AstFieldPath::new("$").is_err());
        assert!(AstFieldPath::new("$a.").is_err());
    }

    #[test]
    fn test_var_validation() {
        assert!(AstVar::new("x").is_ok());
        assert!(AstVar::new("item_1").is_ok());
        assert!(AstVar::new("X").is_err());
        assert!(AstVar::new("").is_err());
        assert!(AstVar::new("1x").is_err());
    }

    #[test]
    fn test_nary_requires_arguments() {
        assert!(AstExpression::nary(AstNaryOperator::Add, vec![]).is_err());
    }

    #[test]
    fn test_duplicate_computed_fields_rejected() {
        let fields = vec![
            AstComputedField::new("a", AstExpression::constant(1)).unwrap(),
            AstComputedField::new("a", AstExpression::constant(2)).unwrap(),
        ];
        assert!(AstExpression::computed_document(fields).is_err());
    }

    #[test]
    fn test_render_binary() {
        let ast = AstExpression::binary(
            AstBinaryOperator::Eq,
            AstExpression::field("Age").unwrap(),
            AstExpression::constant(3),
        );
        assert_eq!(ast.render(), Bson::Document(doc! { "$eq": ["$Age", 3] }));
    }

    #[test]
    fn test_render_unary_wraps_array_argument() {
        let ast = AstExpression::unary(
            AstUnaryOperator::Size,
            AstExpression::computed_array(vec![AstExpression::constant(1)]),
        );
        assert_eq!(ast.render(), Bson::Document(doc! { "$size": [[1]] }));
    }

    #[test]
    fn test_render_dollar_string_is_quoted() {
        let ast = AstExpression::constant("$notAField");
        assert_eq!(
            ast.render(),
            Bson::Document(doc! { "$literal": "$notAField" })
        );
        assert_eq!(AstExpression::constant("plain").render(), Bson::from("plain"));
    }

    #[test]
    fn test_render_vars() {
        assert_eq!(AstExpression::current().render(), Bson::from("$$CURRENT"));
        assert_eq!(AstExpression::root().render(), Bson::from("$$ROOT"));
    }

    #[test]
    fn test_render_let() {
        let x = AstVar::new("x").unwrap();
        let ast = AstExpression::let_(
            vec![AstVarBinding::new(x.clone(), AstExpression::constant(1))],
            AstExpression::var(x),
        )
        .unwrap();
        assert_eq!(
            ast.render(),
            Bson::Document(doc! { "$let": { "vars": { "x": 1 }, "in": "$$x" } })
        );
    }

    #[test]
    fn test_render_switch() {
        let ast = AstExpression::switch(
            vec![(AstExpression::field("a").unwrap(), AstExpression::constant(1))],
            Some(AstExpression::constant(0)),
        )
        .unwrap();
        assert_eq!(
            ast.render(),
            Bson::Document(doc! {
                "$switch": { "branches": [{ "case": "$a", "then": 1 }], "default": 0 }
            })
        );
    }

    #[test]
    fn test_safe_field_names() {
        assert!(is_safe_field_name("Age"));
        assert!(!is_safe_field_name("a.b"));
        assert!(!is_safe_field_name("$a"));
        assert!(!is_safe_field_name(""));
    }
}
