//! Pipeline stage nodes.

use super::expressions::{
    is_safe_field_name, AstAccumulatorExpression, AstComputedField, AstExpression,
};
use super::filters::{int_bson, AstFilter};
use crate::error::{Error, Result};
use bson::{doc, Bson, Document};

/// One entry of a `$project` stage.
#[derive(Debug, Clone, PartialEq)]
pub enum AstProjectSpecification {
    Include(String),
    Exclude(String),
    Set(String, AstExpression),
}

fn validate_project_path(path: &str) -> Result<()> {
    if path.is_empty() || path.starts_with('$') {
        return Err(Error::InvalidArgument(format!(
            "invalid projection path: {:?}",
            path
        )));
    }
    Ok(())
}

impl AstProjectSpecification {
    pub fn include<S: Into<String>>(path: S) -> Result<Self> {
        let path = path.into();
        validate_project_path(&path)?;
        Ok(AstProjectSpecification::Include(path))
    }

    pub fn exclude<S: Into<String>>(path: S) -> Result<Self> {
        let path = path.into();
        validate_project_path(&path)?;
        Ok(AstProjectSpecification::Exclude(path))
    }

    pub fn exclude_id() -> Self {
        AstProjectSpecification::Exclude("_id".to_string())
    }

    pub fn set<S: Into<String>>(path: S, value: AstExpression) -> Result<Self> {
        let path = path.into();
        validate_project_path(&path)?;
        Ok(AstProjectSpecification::Set(path, value))
    }

    pub fn path(&self) -> &str {
        match self {
            AstProjectSpecification::Include(path)
            | AstProjectSpecification::Exclude(path)
            | AstProjectSpecification::Set(path, _) => path,
        }
    }

    fn render_value(&self) -> Bson {
        match self {
            AstProjectSpecification::Include(_) => Bson::Int32(1),
            AstProjectSpecification::Exclude(_) => Bson::Int32(0),
            AstProjectSpecification::Set(_, value) => match value {
                // Bare numbers and booleans would read as include/exclude flags
                AstExpression::Constant(
                    constant @ (Bson::Boolean(_)
                    | Bson::Int32(_)
                    | Bson::Int64(_)
                    | Bson::Double(_)
                    | Bson::Decimal128(_)
                    | Bson::Document(_)),
                ) => Bson::Document(doc! { "$literal": constant.clone() }),
                // An empty object is not a valid projection value
                AstExpression::ComputedDocument(fields) if fields.is_empty() => {
                    Bson::Document(doc! { "$literal": {} })
                }
                other => other.render(),
            },
        }
    }
}

/// Render a list of projection specifications as a projection document
pub fn render_projection(specifications: &[AstProjectSpecification]) -> Document {
    let mut document = Document::new();
    for specification in specifications {
        document.insert(specification.path(), specification.render_value());
    }
    document
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AstSortOrder {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AstSortField {
    pub(crate) path: String,
    pub(crate) order: AstSortOrder,
}

impl AstSortField {
    pub fn new<S: Into<String>>(path: S, order: AstSortOrder) -> Result<Self> {
        let path = path.into();
        if path.is_empty() || path.starts_with('$') {
            return Err(Error::InvalidArgument(format!("invalid sort path: {:?}", path)));
        }
        Ok(Self { path, order })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn order(&self) -> AstSortOrder {
        self.order
    }
}

/// An output field of a `$group` stage.
#[derive(Debug, Clone, PartialEq)]
pub struct AstGroupField {
    pub(crate) name: String,
    pub(crate) accumulator: AstAccumulatorExpression,
}

impl AstGroupField {
    pub fn new<S: Into<String>>(name: S, accumulator: AstAccumulatorExpression) -> Result<Self> {
        let name = name.into();
        if !is_safe_field_name(&name) || name == "_id" {
            return Err(Error::InvalidArgument(format!(
                "invalid $group field name: {:?}",
                name
            )));
        }
        Ok(Self { name, accumulator })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// `$lookup` with local/foreign key equality.
#[derive(Debug, Clone, PartialEq)]
pub struct AstLookup {
    pub(crate) from: String,
    pub(crate) local_field: String,
    pub(crate) foreign_field: String,
    pub(crate) as_field: String,
}

/// A pipeline stage.
#[derive(Debug, Clone, PartialEq)]
pub enum AstStage {
    Match(AstFilter),
    Project(Vec<AstProjectSpecification>),
    Group {
        id: AstExpression,
        fields: Vec<AstGroupField>,
    },
    Sort(Vec<AstSortField>),
    Limit(i64),
    Skip(i64),
    Unwind {
        path: String,
        preserve_null_and_empty_arrays: bool,
    },
    Lookup(AstLookup),
    ReplaceRoot(AstExpression),
    Set(Vec<AstComputedField>),
    Unset(Vec<String>),
    Sample(i64),
    Count(String),
}

impl AstStage {
    pub fn match_(filter: AstFilter) -> Self {
        AstStage::Match(filter)
    }

    pub fn project(specifications: Vec<AstProjectSpecification>) -> Result<Self> {
        if specifications.is_empty() {
            return Err(Error::InvalidArgument(
                "$project requires at least one specification".to_string(),
            ));
        }
        for (i, specification) in specifications.iter().enumerate() {
            if specifications[..i]
                .iter()
                .any(|other| other.path() == specification.path())
            {
                return Err(Error::InvalidArgument(format!(
                    "duplicate projection path: {:?}",
                    specification.path()
                )));
            }
        }
        Ok(AstStage::Project(specifications))
    }

    pub fn group(id: AstExpression, fields: Vec<AstGroupField>) -> Result<Self> {
        for (i, field) in fields.iter().enumerate() {
            if fields[..i].iter().any(|other| other.name == field.name) {
                return Err(Error::InvalidArgument(format!(
                    "duplicate $group field: {:?}",
                    field.name
                )));
            }
        }
        Ok(AstStage::Group { id, fields })
    }

    pub fn sort(fields: Vec<AstSortField>) -> Result<Self> {
        if fields.is_empty() {
            return Err(Error::InvalidArgument(
                "$sort requires at least one field".to_string(),
            ));
        }
        Ok(AstStage::Sort(fields))
    }

    pub fn limit(limit: i64) -> Result<Self> {
        if limit <= 0 {
            return Err(Error::InvalidArgument(format!(
                "$limit must be positive, got {}",
                limit
            )));
        }
        Ok(AstStage::Limit(limit))
    }

    pub fn skip(skip: i64) -> Result<Self> {
        if skip < 0 {
            return Err(Error::InvalidArgument(format!(
                "$skip must be non-negative, got {}",
                skip
            )));
        }
        Ok(AstStage::Skip(skip))
    }

    /// `$unwind` of a top-level field (given without the `$`)
    pub fn unwind<S: Into<String>>(path: S) -> Result<Self> {
        let path = path.into();
        validate_project_path(&path)?;
        Ok(AstStage::Unwind {
            path,
            preserve_null_and_empty_arrays: false,
        })
    }

    pub fn lookup(from: &str, local_field: &str, foreign_field: &str, as_field: &str) -> Result<Self> {
        for (what, value) in [
            ("from", from),
            ("localField", local_field),
            ("foreignField", foreign_field),
            ("as", as_field),
        ] {
            if value.is_empty() {
                return Err(Error::InvalidArgument(format!(
                    "$lookup requires a non-empty {}",
                    what
                )));
            }
        }
        Ok(AstStage::Lookup(AstLookup {
            from: from.to_string(),
            local_field: local_field.to_string(),
            foreign_field: foreign_field.to_string(),
            as_field: as_field.to_string(),
        }))
    }

    pub fn replace_root(new_root: AstExpression) -> Self {
        AstStage::ReplaceRoot(new_root)
    }

    pub fn set(fields: Vec<AstComputedField>) -> Self {
        AstStage::Set(fields)
    }

    pub fn unset(fields: Vec<String>) -> Result<Self> {
        if fields.is_empty() || fields.iter().any(|f| f.is_empty()) {
            return Err(Error::InvalidArgument(
                "$unset requires non-empty field names".to_string(),
            ));
        }
        Ok(AstStage::Unset(fields))
    }

    pub fn sample(size: i64) -> Result<Self> {
        if size <= 0 {
            return Err(Error::InvalidArgument(format!(
                "$sample size must be positive, got {}",
                size
            )));
        }
        Ok(AstStage::Sample(size))
    }

    pub fn count<S: Into<String>>(output_field: S) -> Result<Self> {
        let output_field = output_field.into();
        if !is_safe_field_name(&output_field) {
            return Err(Error::InvalidArgument(format!(
                "invalid $count field: {:?}",
                output_field
            )));
        }
        Ok(AstStage::Count(output_field))
    }

    /// Operator key of this stage (`"$match"`, ...)
    pub fn name(&self) -> &'static str {
        match self {
            AstStage::Match(_) => "$match",
            AstStage::Project(_) => "$project",
            AstStage::Group { .. } => "$group",
            AstStage::Sort(_) => "$sort",
            AstStage::Limit(_) => "$limit",
            AstStage::Skip(_) => "$skip",
            AstStage::Unwind { .. } => "$unwind",
            AstStage::Lookup(_) => "$lookup",
            AstStage::ReplaceRoot(_) => "$replaceRoot",
            AstStage::Set(_) => "$set",
            AstStage::Unset(_) => "$unset",
            AstStage::Sample(_) => "$sample",
            AstStage::Count(_) => "$count",
        }
    }

    pub fn render(&self) -> Document {
        self.render_with(true)
    }

    pub fn render_with(&self, implicit_and: bool) -> Document {
        let body: Bson = match self {
            AstStage::Match(filter) => Bson::Document(filter.render_with(implicit_and)),
            AstStage::Project(specifications) => {
                Bson::Document(render_projection(specifications))
            }
            AstStage::Group { id, fields } => {
                let mut document = doc! { "_id": id.render() };
                for field in fields {
                    document.insert(field.name.clone(), field.accumulator.render());
                }
                Bson::Document(document)
            }
            AstStage::Sort(fields) => {
                let mut document = Document::new();
                for field in fields {
                    let direction = match field.order {
                        AstSortOrder::Ascending => 1,
                        AstSortOrder::Descending => -1,
                    };
                    document.insert(field.path.clone(), direction);
                }
                Bson::Document(document)
            }
            AstStage::Limit(limit) => int_bson(*limit),
            AstStage::Skip(skip) => int_bson(*skip),
            AstStage::Unwind {
                path,
                preserve_null_and_empty_arrays,
            } => {
                if *preserve_null_and_empty_arrays {
                    Bson::Document(doc! {
                        "path": format!("${}", path),
                        "preserveNullAndEmptyArrays": true,
                    })
                } else {
                    Bson::String(format!("${}", path))
                }
            }
            AstStage::Lookup(lookup) => Bson::Document(doc! {
                "from": lookup.from.clone(),
                "localField": lookup.local_field.clone(),
                "foreignField": lookup.foreign_field.clone(),
                "as": lookup.as_field.clone(),
            }),
            AstStage::ReplaceRoot(new_root) => Bson::Document(doc! { "newRoot": new_root.render() }),
            AstStage::Set(fields) => {
                let mut document = Document::new();
                for field in fields {
                    document.insert(field.path.clone(), field.value.render());
                }
                Bson::Document(document)
            }
            AstStage::Unset(fields) => match fields.as_slice() {
                [single] => Bson::String(single.clone()),
                many => Bson::Array(many.iter().cloned().map(Bson::String).collect()),
            },
            AstStage::Sample(size) => Bson::Document(doc! { "size": int_bson(*size) }),
            AstStage::Count(field) => Bson::String(field.clone()),
        };
        let mut document = Document::new();
        document.insert(self.name(), body);
        document
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::expressions::AstAccumulatorOperator;
    use crate::ast::filters::AstFilterField;

    #[test]
    fn test_project_render() {
        let stage = AstStage::project(vec![
            AstProjectSpecification::include("Field").unwrap(),
            AstProjectSpecification::exclude_id(),
        ])
        .unwrap();
        assert_eq!(stage.render(), doc! { "$project": { "Field": 1, "_id": 0 } });
    }

    #[test]
    fn test_project_quotes_numeric_constants() {
        let stage = AstStage::project(vec![
            AstProjectSpecification::set("a", AstExpression::constant(true)).unwrap(),
            AstProjectSpecification::set("b", AstExpression::constant(0)).unwrap(),
            AstProjectSpecification::set("c", AstExpression::constant("text")).unwrap(),
            AstProjectSpecification::set("d", AstExpression::constant(doc! { "x": 1 })).unwrap(),
            AstProjectSpecification::set("e", AstExpression::ComputedDocument(vec![])).unwrap(),
        ])
        .unwrap();
        assert_eq!(
            stage.render(),
            doc! { "$project": {
                "a": { "$literal": true },
                "b": { "$literal": 0 },
                "c": "text",
                "d": { "$literal": { "x": 1 } },
                "e": { "$literal": {} },
            } }
        );
    }

    #[test]
    fn test_project_validation() {
        assert!(AstStage::project(vec![]).is_err());
        assert!(AstProjectSpecification::include("").is_err());
        assert!(AstStage::project(vec![
            AstProjectSpecification::include("a").unwrap(),
            AstProjectSpecification::exclude("a").unwrap(),
        ])
        .is_err());
    }

    #[test]
    fn test_group_render() {
        let stage = AstStage::group(
            AstExpression::constant(Bson::Null),
            vec![AstGroupField::new(
                "_max",
                AstAccumulatorExpression::new(
                    AstAccumulatorOperator::Max,
                    AstExpression::field("Value").unwrap(),
                ),
            )
            .unwrap()],
        )
        .unwrap();
        assert_eq!(
            stage.render(),
            doc! { "$group": { "_id": null, "_max": { "$max": "$Value" } } }
        );
    }

    #[test]
    fn test_numeric_stage_validation() {
        assert!(AstStage::limit(-1).is_err());
        assert!(AstStage::limit(0).is_err());
        assert!(AstStage::skip(-1).is_err());
        assert!(AstStage::sample(0).is_err());
        assert_eq!(AstStage::limit(1).unwrap().render(), doc! { "$limit": 1 });
    }

    #[test]
    fn test_misc_stage_rendering() {
        assert_eq!(AstStage::unwind("_v").unwrap().render(), doc! { "$unwind": "$_v" });
        assert_eq!(AstStage::count("_v").unwrap().render(), doc! { "$count": "_v" });
        assert_eq!(
            AstStage::sample(5).unwrap().render(),
            doc! { "$sample": { "size": 5 } }
        );
        assert_eq!(
            AstStage::sort(vec![
                AstSortField::new("A", AstSortOrder::Ascending).unwrap(),
                AstSortField::new("B", AstSortOrder::Descending).unwrap(),
            ])
            .unwrap()
            .render(),
            doc! { "$sort": { "A": 1, "B": -1 } }
        );
        assert_eq!(
            AstStage::match_(AstFilter::eq(AstFilterField::new("A").unwrap(), Bson::Int32(1)))
                .render(),
            doc! { "$match": { "A": 1 } }
        );
    }
}
