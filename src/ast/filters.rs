//! Query-language (match) filter nodes.

use super::expressions::AstExpression;
use crate::error::{Error, Result};
use bson::{doc, Bson, Document, Regex};

/// A field referenced by a filter.
///
/// Inside a scalar `$elemMatch` the element itself has no field name; it is
/// addressed through [`AstFilterField::ELEMENT`] and rendered in operator-only
/// form.
#[derive(Debug, Clone, PartialEq)]
pub struct AstFilterField {
    path: String,
}

impl AstFilterField {
    pub const ELEMENT: &'static str = "@<elem>";

    pub fn new<S: Into<String>>(path: S) -> Result<Self> {
        let path = path.into();
        if path.is_empty() || path.starts_with('$') {
            return Err(Error::InvalidArgument(format!(
                "invalid filter field path: {:?}",
                path
            )));
        }
        Ok(Self { path })
    }

    pub fn element() -> Self {
        Self {
            path: Self::ELEMENT.to_string(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_element(&self) -> bool {
        self.path == Self::ELEMENT
    }

    /// Path of a sub-field (`A` -> `A.B`)
    pub fn sub_field(&self, name: &str) -> Result<Self> {
        if self.is_element() {
            Self::new(name)
        } else {
            Self::new(format!("{}.{}", self.path, name))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AstComparisonOperator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl AstComparisonOperator {
    pub fn render(self) -> &'static str {
        match self {
            AstComparisonOperator::Eq => "$eq",
            AstComparisonOperator::Ne => "$ne",
            AstComparisonOperator::Gt => "$gt",
            AstComparisonOperator::Gte => "$gte",
            AstComparisonOperator::Lt => "$lt",
            AstComparisonOperator::Lte => "$lte",
        }
    }
}

/// The operation applied to a filter field.
#[derive(Debug, Clone, PartialEq)]
pub enum AstFilterOperation {
    Comparison {
        op: AstComparisonOperator,
        value: Bson,
    },
    Exists(bool),
    ElemMatch(Box<AstFilter>),
    In(Vec<Bson>),
    Nin(Vec<Bson>),
    Regex(Regex),
    Size(i64),
    Mod {
        divisor: i64,
        remainder: i64,
    },
    BitsAllSet(i64),
    BitsAnySet(i64),
    Not(Box<AstFilterOperation>),
}

impl AstFilterOperation {
    pub fn comparison(op: AstComparisonOperator, value: Bson) -> Self {
        AstFilterOperation::Comparison { op, value }
    }

    /// `$elemMatch`; element-addressed filters must be expressible in
    /// operator-only form
    pub fn elem_match(filter: AstFilter) -> Result<Self> {
        if filter.references_element() && filter.render_element_operations().is_none() {
            return Err(Error::InvalidArgument(
                "$elemMatch over scalar elements requires operator-only filters".to_string(),
            ));
        }
        Ok(AstFilterOperation::ElemMatch(Box::new(filter)))
    }

    pub fn regex<S: Into<String>>(pattern: S, options: S) -> Self {
        AstFilterOperation::Regex(Regex {
            pattern: pattern.into(),
            options: options.into(),
        })
    }

    pub fn size(size: i64) -> Result<Self> {
        if size < 0 {
            return Err(Error::InvalidArgument(format!(
                "$size must be non-negative, got {}",
                size
            )));
        }
        Ok(AstFilterOperation::Size(size))
    }

    pub fn modulo(divisor: i64, remainder: i64) -> Result<Self> {
        if divisor == 0 {
            return Err(Error::InvalidArgument("$mod divisor must be non-zero".to_string()));
        }
        Ok(AstFilterOperation::Mod { divisor, remainder })
    }

    pub fn not(operation: AstFilterOperation) -> Self {
        AstFilterOperation::Not(Box::new(operation))
    }

    /// Render as an operator document (`{ $gt: 5 }`)
    pub fn render(&self) -> Document {
        match self {
            AstFilterOperation::Comparison { op, value } => {
                let mut document = Document::new();
                document.insert(op.render(), value.clone());
                document
            }
            AstFilterOperation::Exists(exists) => doc! { "$exists": *exists },
            AstFilterOperation::ElemMatch(filter) => {
                let rendered = if filter.references_element() {
                    filter.render_element_operations().unwrap_or_default()
                } else {
                    filter.render()
                };
                doc! { "$elemMatch": rendered }
            }
            AstFilterOperation::In(values) => doc! { "$in": values.clone() },
            AstFilterOperation::Nin(values) => doc! { "$nin": values.clone() },
            AstFilterOperation::Regex(regex) => doc! { "$regex": regex.clone() },
            AstFilterOperation::Size(size) => doc! { "$size": int_bson(*size) },
            AstFilterOperation::Mod { divisor, remainder } => {
                doc! { "$mod": [int_bson(*divisor), int_bson(*remainder)] }
            }
            AstFilterOperation::BitsAllSet(mask) => doc! { "$bitsAllSet": int_bson(*mask) },
            AstFilterOperation::BitsAnySet(mask) => doc! { "$bitsAnySet": int_bson(*mask) },
            AstFilterOperation::Not(operation) => match operation.as_ref() {
                AstFilterOperation::Regex(regex) => doc! { "$not": regex.clone() },
                other => doc! { "$not": other.render() },
            },
        }
    }

    /// Render as the value of `{ field: <value> }`, using the equality and
    /// regex shorthands where they are unambiguous
    fn render_field_value(&self) -> Bson {
        match self {
            AstFilterOperation::Comparison {
                op: AstComparisonOperator::Eq,
                value,
            } if !needs_explicit_eq(value) => value.clone(),
            AstFilterOperation::Regex(regex) => Bson::RegularExpression(regex.clone()),
            other => Bson::Document(other.render()),
        }
    }
}

/// Values that the `{ f: v }` shorthand would misinterpret
fn needs_explicit_eq(value: &Bson) -> bool {
    match value {
        Bson::RegularExpression(_) => true,
        Bson::Document(document) => document.keys().next().map_or(false, |k| k.starts_with('$')),
        _ => false,
    }
}

/// Integers render as 32-bit when they fit
pub(crate) fn int_bson(value: i64) -> Bson {
    match i32::try_from(value) {
        Ok(value) => Bson::Int32(value),
        Err(_) => Bson::Int64(value),
    }
}

/// A match filter.
#[derive(Debug, Clone, PartialEq)]
pub enum AstFilter {
    And(Vec<AstFilter>),
    Or(Vec<AstFilter>),
    Nor(Vec<AstFilter>),
    Not(Box<AstFilter>),
    Field {
        field: AstFilterField,
        operation: AstFilterOperation,
    },
    Expr(AstExpression),
}

impl AstFilter {
    pub fn and(filters: Vec<AstFilter>) -> Result<Self> {
        if filters.is_empty() {
            return Err(Error::InvalidArgument("$and requires at least one filter".to_string()));
        }
        Ok(AstFilter::And(filters))
    }

    pub fn or(filters: Vec<AstFilter>) -> Result<Self> {
        if filters.is_empty() {
            return Err(Error::InvalidArgument("$or requires at least one filter".to_string()));
        }
        Ok(AstFilter::Or(filters))
    }

    pub fn nor(filters: Vec<AstFilter>) -> Result<Self> {
        if filters.is_empty() {
            return Err(Error::InvalidArgument("$nor requires at least one filter".to_string()));
        }
        Ok(AstFilter::Nor(filters))
    }

    pub fn not(filter: AstFilter) -> Self {
        AstFilter::Not(Box::new(filter))
    }

    pub fn field(field: AstFilterField, operation: AstFilterOperation) -> Self {
        AstFilter::Field { field, operation }
    }

    pub fn compare(field: AstFilterField, op: AstComparisonOperator, value: Bson) -> Self {
        AstFilter::field(field, AstFilterOperation::comparison(op, value))
    }

    pub fn eq(field: AstFilterField, value: Bson) -> Self {
        Self::compare(field, AstComparisonOperator::Eq, value)
    }

    pub fn expr(expression: AstExpression) -> Self {
        AstFilter::Expr(expression)
    }

    /// Whether any field in this filter addresses a scalar array element
    pub fn references_element(&self) -> bool {
        match self {
            AstFilter::And(filters) | AstFilter::Or(filters) | AstFilter::Nor(filters) => {
                filters.iter().any(AstFilter::references_element)
            }
            AstFilter::Not(filter) => filter.references_element(),
            AstFilter::Field { field, .. } => field.is_element(),
            AstFilter::Expr(_) => false,
        }
    }

    /// Operator-only rendering used by `$elemMatch` over scalar elements.
    ///
    /// Returns `None` when the filter cannot be written without field names
    /// (mixed fields, `$or`, `$expr`, or overlapping operators).
    pub fn render_element_operations(&self) -> Option<Document> {
        match self {
            AstFilter::Field { field, operation } if field.is_element() => {
                Some(operation.render())
            }
            AstFilter::Not(filter) => match filter.as_ref() {
                AstFilter::Field { field, operation } if field.is_element() => {
                    Some(AstFilterOperation::not(operation.clone()).render())
                }
                _ => None,
            },
            AstFilter::And(filters) => {
                let mut merged = Document::new();
                for filter in filters {
                    for (key, value) in filter.render_element_operations()? {
                        if merged.contains_key(&key) {
                            return None;
                        }
                        merged.insert(key, value);
                    }
                }
                Some(merged)
            }
            _ => None,
        }
    }

    /// Render with implicit `$and` (disjoint children merged into one
    /// document)
    pub fn render(&self) -> Document {
        self.render_with(true)
    }

    pub fn render_with(&self, implicit_and: bool) -> Document {
        match self {
            AstFilter::And(filters) => {
                let rendered: Vec<Document> =
                    filters.iter().map(|f| f.render_with(implicit_and)).collect();
                if implicit_and {
                    if let Some(merged) = merge_implicit_and(&rendered) {
                        return merged;
                    }
                }
                doc! { "$and": rendered }
            }
            AstFilter::Or(filters) => {
                let rendered: Vec<Document> =
                    filters.iter().map(|f| f.render_with(implicit_and)).collect();
                doc! { "$or": rendered }
            }
            AstFilter::Nor(filters) => {
                let rendered: Vec<Document> =
                    filters.iter().map(|f| f.render_with(implicit_and)).collect();
                doc! { "$nor": rendered }
            }
            AstFilter::Not(filter) => match filter.as_ref() {
                AstFilter::Field { field, operation } => {
                    let negated = match operation {
                        AstFilterOperation::Comparison {
                            op: AstComparisonOperator::Eq,
                            value,
                        } => AstFilterOperation::comparison(AstComparisonOperator::Ne, value.clone()),
                        other => AstFilterOperation::not(other.clone()),
                    };
                    let mut document = Document::new();
                    document.insert(field.path(), negated.render());
                    document
                }
                other => doc! { "$nor": [other.render_with(implicit_and)] },
            },
            AstFilter::Field { field, operation } => {
                let mut document = Document::new();
                document.insert(field.path(), operation.render_field_value());
                document
            }
            AstFilter::Expr(expression) => doc! { "$expr": expression.render() },
        }
    }
}

/// Merge `$and` children into a single document when no key collides and no
/// key is an operator. Two operator documents on the same field merge when
/// their operators are disjoint.
fn merge_implicit_and(children: &[Document]) -> Option<Document> {
    let mut merged = Document::new();
    for child in children {
        for (key, value) in child {
            if key.starts_with('$') {
                return None;
            }
            match merged.get_mut(key) {
                None => {
                    merged.insert(key.clone(), value.clone());
                }
                Some(Bson::Document(existing)) if is_operator_document(existing) => {
                    let addition = match value {
                        Bson::Document(addition) if is_operator_document(addition) => addition,
                        _ => return None,
                    };
                    for (op, operand) in addition {
                        if existing.contains_key(op) {
                            return None;
                        }
                        existing.insert(op.clone(), operand.clone());
                    }
                }
                Some(_) => return None,
            }
        }
    }
    Some(merged)
}

fn is_operator_document(document: &Document) -> bool {
    !document.is_empty() && document.keys().all(|k| k.starts_with('$'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::expressions::{AstBinaryOperator, AstExpression};

    fn field(path: &str) -> AstFilterField {
        AstFilterField::new(path).unwrap()
    }

    #[test]
    fn test_equality_shorthand() {
        let filter = AstFilter::eq(field("Age"), Bson::Int32(3));
        assert_eq!(filter.render(), doc! { "Age": 3 });
    }

    #[test]
    fn test_comparison() {
        let filter = AstFilter::compare(field("Age"), AstComparisonOperator::Gt, Bson::Int32(3));
        assert_eq!(filter.render(), doc! { "Age": { "$gt": 3 } });
    }

    #[test]
    fn test_implicit_and() {
        let filter = AstFilter::and(vec![
            AstFilter::eq(field("A"), Bson::Int32(1)),
            AstFilter::eq(field("B"), Bson::Int32(2)),
        ])
        .unwrap();
        assert_eq!(filter.render(), doc! { "A": 1, "B": 2 });
        assert_eq!(
            filter.render_with(false),
            doc! { "$and": [{ "A": 1 }, { "B": 2 }] }
        );
    }

    #[test]
    fn test_and_on_same_field_merges_operators() {
        let filter = AstFilter::and(vec![
            AstFilter::compare(field("A"), AstComparisonOperator::Gt, Bson::Int32(1)),
            AstFilter::compare(field("A"), AstComparisonOperator::Lt, Bson::Int32(5)),
        ])
        .unwrap();
        assert_eq!(filter.render(), doc! { "A": { "$gt": 1, "$lt": 5 } });
    }

    #[test]
    fn test_and_with_colliding_keys_is_explicit() {
        let filter = AstFilter::and(vec![
            AstFilter::eq(field("A"), Bson::Int32(1)),
            AstFilter::eq(field("A"), Bson::Int32(2)),
        ])
        .unwrap();
        assert_eq!(filter.render(), doc! { "$and": [{ "A": 1 }, { "A": 2 }] });
    }

    #[test]
    fn test_not_renders_by_shape() {
        let ne = AstFilter::not(AstFilter::eq(field("A"), Bson::Int32(1)));
        assert_eq!(ne.render(), doc! { "A": { "$ne": 1 } });

        let not_gt = AstFilter::not(AstFilter::compare(
            field("A"),
            AstComparisonOperator::Gt,
            Bson::Int32(1),
        ));
        assert_eq!(not_gt.render(), doc! { "A": { "$not": { "$gt": 1 } } });

        let nor = AstFilter::not(
            AstFilter::or(vec![
                AstFilter::eq(field("A"), Bson::Int32(1)),
                AstFilter::eq(field("B"), Bson::Int32(2)),
            ])
            .unwrap(),
        );
        assert_eq!(
            nor.render(),
            doc! { "$nor": [{ "$or": [{ "A": 1 }, { "B": 2 }] }] }
        );
    }

    #[test]
    fn test_scalar_elem_match() {
        let element = AstFilter::and(vec![
            AstFilter::compare(AstFilterField::element(), AstComparisonOperator::Gt, Bson::Int32(1)),
            AstFilter::compare(AstFilterField::element(), AstComparisonOperator::Lt, Bson::Int32(5)),
        ])
        .unwrap();
        let filter = AstFilter::field(field("Items"), AstFilterOperation::elem_match(element).unwrap());
        assert_eq!(
            filter.render(),
            doc! { "Items": { "$elemMatch": { "$gt": 1, "$lt": 5 } } }
        );
    }

    #[test]
    fn test_scalar_elem_match_rejects_or() {
        let element = AstFilter::or(vec![
            AstFilter::eq(AstFilterField::element(), Bson::Int32(1)),
            AstFilter::eq(AstFilterField::element(), Bson::Int32(2)),
        ])
        .unwrap();
        assert!(AstFilterOperation::elem_match(element).is_err());
    }

    #[test]
    fn test_regex_shorthand() {
        let filter = AstFilter::field(field("Name"), AstFilterOperation::regex("^abc", "i"));
        let rendered = filter.render();
        match rendered.get("Name") {
            Some(Bson::RegularExpression(regex)) => {
                assert_eq!(regex.pattern, "^abc");
                assert_eq!(regex.options, "i");
            }
            other => panic!("unexpected rendering: {:?}", other),
        }
    }

    #[test]
    fn test_expr_filter() {
        let filter = AstFilter::expr(AstExpression::binary(
            AstBinaryOperator::Gt,
            AstExpression::field("A").unwrap(),
            AstExpression::field("B").unwrap(),
        ));
        assert_eq!(filter.render(), doc! { "$expr": { "$gt": ["$A", "$B"] } });
    }

    #[test]
    fn test_validation() {
        assert!(AstFilterField::new("").is_err());
        assert!(AstFilterField::new("$a").is_err());
        assert!(AstFilter::and(vec![]).is_err());
        assert!(AstFilterOperation::size(-1).is_err());
        assert!(AstFilterOperation::modulo(0, 1).is_err());
    }
}
