//! Intermediate query AST.
//!
//! The translators produce these nodes; the [`optimizer`] rewrites them; every
//! node renders itself to BSON. The AST is a closed set of node kinds mirroring
//! the target query language:
//!
//! - [`AstExpression`]: aggregation expressions (`{ $add: [...] }`, `"$a.b"`)
//! - [`AstFilter`]: match filters (`{ a: { $gt: 1 } }`)
//! - [`AstStage`] / [`AstPipeline`]: aggregation stages
//!
//! Constructors validate their inputs and fail with
//! [`Error::InvalidArgument`](crate::error::Error::InvalidArgument); once a
//! node exists, rendering it cannot fail.

pub mod expressions;
pub mod filters;
pub mod optimizer;
pub mod pipeline;
pub mod stages;

pub use expressions::{
    is_safe_field_name, is_valid_var_name, AstAccumulatorExpression, AstAccumulatorOperator,
    AstBinaryOperator, AstComputedField, AstDateUnit, AstExpression, AstFieldPath,
    AstNaryOperator, AstTernaryOperator, AstTrimOperator, AstUnaryOperator, AstVar,
    AstVarBinding,
};
pub use filters::{AstComparisonOperator, AstFilter, AstFilterField, AstFilterOperation};
pub use optimizer::{Simplifier, SimplifierMode};
pub use pipeline::AstPipeline;
pub use stages::{
    render_projection, AstGroupField, AstProjectSpecification, AstSortField, AstSortOrder,
    AstStage,
};
