// PhotonQL - Rust Implementation
// A typed query compiler for document databases

#![warn(rust_2018_idioms)]

//! PhotonQL translates typed host expression trees (filters, projections and
//! chained query-builder calls) into MongoDB-style BSON query documents.
//!
//! The pipeline is:
//!
//! 1. [`expression`]: the typed input tree ([`Expr`])
//! 2. [`translation`]: serializer-aware translators producing the [`ast`]
//! 3. [`ast::optimizer`]: semantics-preserving simplification
//! 4. [`render`]: BSON output
//!
//! ```rust,ignore
//! use photonql::expression::{DocumentType, Expr, Parameter, Type};
//! use photonql::{translate_filter, SerializerRegistry, TranslationOptions};
//!
//! let person = DocumentType::new("Person").with_member("Age", Type::Int32).into_type();
//! let serializer = SerializerRegistry::global().get_serializer(&person)?;
//! let x = Parameter::new("x", person);
//! let predicate = Expr::lambda(vec![x.clone()], Expr::parameter(&x).field("Age").eq(Expr::constant(3)));
//!
//! let filter = translate_filter(&predicate, &serializer, &TranslationOptions::default())?;
//! assert_eq!(filter, bson::doc! { "Age": 3 });
//! ```

pub mod ast;
pub mod config;
pub mod expression;
pub mod render;
pub mod serialization;
pub mod translation;

// Re-exports for convenience
pub use config::{ServerVersion, TranslationOptions};
pub use expression::{Expr, MethodId, Parameter, Type};
pub use serialization::{Serializer, SerializerRegistry};
pub use translation::{
    translate_executable, translate_field_path, translate_filter, translate_pipeline,
    translate_projection, ExecutableQuery, Finalizer, ProjectionTranslation, QueryTranslator,
};

/// PhotonQL error types
pub mod error {
    use crate::expression::Expr;
    use thiserror::Error;

    #[derive(Error, Debug, Clone, PartialEq)]
    pub enum Error {
        #[error("Expression not supported: {expression}{}", .reason.as_ref().map(|r| format!(" because {}", r)).unwrap_or_default())]
        UnsupportedExpression {
            expression: String,
            reason: Option<String>,
        },

        #[error("Unresolvable symbol: {0}")]
        UnresolvableSymbol(String),

        #[error("No serializer found for type {0}")]
        NoSerializerFound(String),

        #[error("Ambiguous serializer for {expression}: {reason}")]
        AmbiguousSerializer { expression: String, reason: String },

        #[error("Invalid argument: {0}")]
        InvalidArgument(String),

        #[error("Serialization error: {0}")]
        Serialization(String),

        #[error("Invalid operation: {0}")]
        InvalidOperation(String),

        #[error("Configuration error: {0}")]
        Config(String),
    }

    impl Error {
        pub fn unsupported(expression: &Expr) -> Self {
            Error::UnsupportedExpression {
                expression: expression.to_string(),
                reason: None,
            }
        }

        pub fn unsupported_because<S: Into<String>>(expression: &Expr, reason: S) -> Self {
            Error::UnsupportedExpression {
                expression: expression.to_string(),
                reason: Some(reason.into()),
            }
        }

        pub fn ambiguous<S: Into<String>>(expression: &Expr, reason: S) -> Self {
            Error::AmbiguousSerializer {
                expression: expression.to_string(),
                reason: reason.into(),
            }
        }
    }

    pub type Result<T> = std::result::Result<T, Error>;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::error::Error;
    use super::*;

    #[test]
    fn test_version_format() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_unsupported_message() {
        let x = Parameter::new("x", Type::Int32);
        let expr = Expr::parameter(&x);
        assert_eq!(
            Error::unsupported(&expr).to_string(),
            "Expression not supported: x"
        );
        assert_eq!(
            Error::unsupported_because(&expr, "it is not a field").to_string(),
            "Expression not supported: x because it is not a field"
        );
    }
}
