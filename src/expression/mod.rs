//! Host expression trees.
//!
//! This is the input side of the compiler: a typed expression tree describing
//! a filter, a projection, or a chain of query-builder calls. Every node
//! carries its static [`Type`]; method calls carry an interned [`MethodId`].
//!
//! # Example
//!
//! Building `x => x.Age == 3` over a `Person` document type:
//!
//! ```rust,ignore
//! use photonql::expression::{DocumentType, Expr, Parameter, Type};
//!
//! let person = DocumentType::new("Person").with_member("Age", Type::Int32).into_type();
//! let x = Parameter::new("x", person);
//! let predicate = Expr::lambda(
//!     vec![x.clone()],
//!     Expr::parameter(&x).field("Age").eq(Expr::constant(3)),
//! );
//! ```

mod display;
pub mod methods;
pub mod types;

pub use methods::MethodId;
pub use types::{DocumentType, EnumType, MemberType, Type};

use bson::Bson;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_PARAMETER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a bound variable. Two parameters with the same name are still
/// different variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParameterId(pub u64);

/// A lambda parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub id: ParameterId,
    pub name: String,
    pub ty: Type,
}

impl Parameter {
    /// Create a parameter with a fresh identity
    pub fn new<S: Into<String>>(name: S, ty: Type) -> Self {
        Self {
            id: ParameterId(NEXT_PARAMETER_ID.fetch_add(1, Ordering::Relaxed)),
            name: name.into(),
            ty,
        }
    }
}

/// A lambda expression: parameters and a body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lambda {
    pub parameters: Vec<Parameter>,
    pub body: Box<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Negate,
    /// Conversion to the node's static type
    Convert,
    ArrayLength,
    BitwiseNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Power,
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    AndAlso,
    OrElse,
    And,
    Or,
    ExclusiveOr,
    Coalesce,
    ArrayIndex,
    LeftShift,
    RightShift,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Equal
                | BinaryOp::NotEqual
                | BinaryOp::LessThan
                | BinaryOp::LessThanOrEqual
                | BinaryOp::GreaterThan
                | BinaryOp::GreaterThanOrEqual
        )
    }

    /// Operator with its operands swapped (`a < b` is `b > a`)
    pub fn flipped(self) -> Self {
        match self {
            BinaryOp::LessThan => BinaryOp::GreaterThan,
            BinaryOp::LessThanOrEqual => BinaryOp::GreaterThanOrEqual,
            BinaryOp::GreaterThan => BinaryOp::LessThan,
            BinaryOp::GreaterThanOrEqual => BinaryOp::LessThanOrEqual,
            other => other,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::Power => "**",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::LessThan => "<",
            BinaryOp::LessThanOrEqual => "<=",
            BinaryOp::GreaterThan => ">",
            BinaryOp::GreaterThanOrEqual => ">=",
            BinaryOp::AndAlso => "&&",
            BinaryOp::OrElse => "||",
            BinaryOp::And => "&",
            BinaryOp::Or => "|",
            BinaryOp::ExclusiveOr => "^",
            BinaryOp::Coalesce => "??",
            BinaryOp::ArrayIndex => "[]",
            BinaryOp::LeftShift => "<<",
            BinaryOp::RightShift => ">>",
        }
    }
}

/// A node of a host expression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Constant {
        value: Bson,
        ty: Type,
    },
    Parameter(Parameter),
    /// Root of a query: a collection of documents
    Source {
        collection: String,
        ty: Type,
    },
    Member {
        target: Box<Expr>,
        member: String,
        ty: Type,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        ty: Type,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
        ty: Type,
    },
    Conditional {
        test: Box<Expr>,
        if_true: Box<Expr>,
        if_false: Box<Expr>,
        ty: Type,
    },
    /// Method call; `target` is the receiver (or the source sequence of an
    /// extension-style operator) and is `None` for static methods
    Call {
        method: MethodId,
        target: Option<Box<Expr>>,
        args: Vec<Expr>,
        ty: Type,
    },
    /// Construction of a new composite value
    New {
        members: Vec<(String, Expr)>,
        ty: Type,
    },
    NewArray {
        elements: Vec<Expr>,
        ty: Type,
    },
    Lambda(Lambda),
}

impl Expr {
    /// Static type of this node
    pub fn ty(&self) -> &Type {
        match self {
            Expr::Constant { ty, .. }
            | Expr::Source { ty, .. }
            | Expr::Member { ty, .. }
            | Expr::Unary { ty, .. }
            | Expr::Binary { ty, .. }
            | Expr::Conditional { ty, .. }
            | Expr::Call { ty, .. }
            | Expr::New { ty, .. }
            | Expr::NewArray { ty, .. } => ty,
            Expr::Parameter(parameter) => &parameter.ty,
            Expr::Lambda(lambda) => lambda.body.ty(),
        }
    }

    pub fn as_constant(&self) -> Option<&Bson> {
        match self {
            Expr::Constant { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Expr::Constant { .. })
    }

    pub fn as_lambda(&self) -> Option<&Lambda> {
        match self {
            Expr::Lambda(lambda) => Some(lambda),
            _ => None,
        }
    }
}

// === Convenience constructors ===

impl Expr {
    /// Constant whose type is inferred from the BSON value
    pub fn constant<V: Into<Bson>>(value: V) -> Self {
        let value = value.into();
        let ty = infer_type(&value);
        Expr::Constant { value, ty }
    }

    pub fn typed_constant<V: Into<Bson>>(value: V, ty: Type) -> Self {
        Expr::Constant {
            value: value.into(),
            ty,
        }
    }

    pub fn null(ty: Type) -> Self {
        Expr::Constant {
            value: Bson::Null,
            ty,
        }
    }

    pub fn parameter(parameter: &Parameter) -> Self {
        Expr::Parameter(parameter.clone())
    }

    pub fn source<S: Into<String>>(collection: S, document_type: Type) -> Self {
        Expr::Source {
            collection: collection.into(),
            ty: Type::queryable(document_type),
        }
    }

    pub fn lambda(parameters: Vec<Parameter>, body: Expr) -> Self {
        Expr::Lambda(Lambda {
            parameters,
            body: Box::new(body),
        })
    }

    pub fn member<S: Into<String>>(self, member: S, ty: Type) -> Self {
        Expr::Member {
            target: Box::new(self),
            member: member.into(),
            ty,
        }
    }

    /// Member access whose type is taken from the target's document type
    /// (`Object` when the target is not a known document)
    pub fn field(self, member: &str) -> Self {
        let ty = self
            .ty()
            .as_document()
            .and_then(|doc| doc.member(member))
            .cloned()
            .unwrap_or(Type::Object);
        self.member(member, ty)
    }

    pub fn unary(op: UnaryOp, operand: Expr, ty: Type) -> Self {
        Expr::Unary {
            op,
            operand: Box::new(operand),
            ty,
        }
    }

    pub fn not(operand: Expr) -> Self {
        let ty = operand.ty().clone();
        Expr::unary(UnaryOp::Not, operand, ty)
    }

    pub fn negate(operand: Expr) -> Self {
        let ty = operand.ty().clone();
        Expr::unary(UnaryOp::Negate, operand, ty)
    }

    pub fn convert(operand: Expr, ty: Type) -> Self {
        Expr::unary(UnaryOp::Convert, operand, ty)
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        let ty = binary_result_type(op, left.ty(), right.ty());
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
            ty,
        }
    }

    pub fn eq(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::Equal, self, other)
    }

    pub fn ne(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::NotEqual, self, other)
    }

    pub fn lt(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::LessThan, self, other)
    }

    pub fn lte(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::LessThanOrEqual, self, other)
    }

    pub fn gt(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::GreaterThan, self, other)
    }

    pub fn gte(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::GreaterThanOrEqual, self, other)
    }

    pub fn and_also(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::AndAlso, self, other)
    }

    pub fn or_else(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::OrElse, self, other)
    }

    pub fn add(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::Add, self, other)
    }

    pub fn sub(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::Subtract, self, other)
    }

    pub fn mul(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::Multiply, self, other)
    }

    pub fn div(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::Divide, self, other)
    }

    pub fn modulo(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::Modulo, self, other)
    }

    pub fn coalesce(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::Coalesce, self, other)
    }

    pub fn index(self, index: Expr) -> Self {
        Expr::binary(BinaryOp::ArrayIndex, self, index)
    }

    pub fn conditional(test: Expr, if_true: Expr, if_false: Expr) -> Self {
        let ty = if_true.ty().clone();
        Expr::Conditional {
            test: Box::new(test),
            if_true: Box::new(if_true),
            if_false: Box::new(if_false),
            ty,
        }
    }

    /// Instance (or extension-style) method call on `self`
    pub fn call(self, method: MethodId, args: Vec<Expr>, ty: Type) -> Self {
        Expr::Call {
            method,
            target: Some(Box::new(self)),
            args,
            ty,
        }
    }

    pub fn static_call(method: MethodId, args: Vec<Expr>, ty: Type) -> Self {
        Expr::Call {
            method,
            target: None,
            args,
            ty,
        }
    }

    /// `new { name = value, ... }`; the document type is derived from the
    /// member values
    pub fn new_object<S: Into<String>>(type_name: S, members: Vec<(&str, Expr)>) -> Self {
        let mut doc = DocumentType::new(type_name);
        let members: Vec<(String, Expr)> = members
            .into_iter()
            .map(|(name, value)| {
                doc.members.push(MemberType {
                    name: name.to_string(),
                    ty: value.ty().clone(),
                });
                (name.to_string(), value)
            })
            .collect();
        Expr::New {
            members,
            ty: doc.into_type(),
        }
    }

    pub fn new_array(elements: Vec<Expr>, item_type: Type) -> Self {
        Expr::NewArray {
            elements,
            ty: Type::array(item_type),
        }
    }
}

/// Static type of a BSON constant
fn infer_type(value: &Bson) -> Type {
    match value {
        Bson::Boolean(_) => Type::Boolean,
        Bson::Int32(_) => Type::Int32,
        Bson::Int64(_) => Type::Int64,
        Bson::Double(_) => Type::Double,
        Bson::Decimal128(_) => Type::Decimal128,
        Bson::String(_) => Type::String,
        Bson::DateTime(_) => Type::DateTime,
        Bson::ObjectId(_) => Type::ObjectId,
        Bson::Array(items) => Type::array(items.first().map(infer_type).unwrap_or(Type::Object)),
        _ => Type::Object,
    }
}

fn numeric_rank(ty: &Type) -> u8 {
    match ty.non_nullable() {
        Type::Int32 => 1,
        Type::Int64 => 2,
        Type::Double => 3,
        Type::Decimal128 => 4,
        _ => 0,
    }
}

fn binary_result_type(op: BinaryOp, left: &Type, right: &Type) -> Type {
    match op {
        BinaryOp::Equal
        | BinaryOp::NotEqual
        | BinaryOp::LessThan
        | BinaryOp::LessThanOrEqual
        | BinaryOp::GreaterThan
        | BinaryOp::GreaterThanOrEqual
        | BinaryOp::AndAlso
        | BinaryOp::OrElse => Type::Boolean,
        BinaryOp::Coalesce => right.clone(),
        BinaryOp::ArrayIndex => left.item_type().cloned().unwrap_or(Type::Object),
        BinaryOp::Power => Type::Double,
        _ if left.is_string() || right.is_string() => Type::String,
        _ if numeric_rank(right) > numeric_rank(left) => right.clone(),
        _ => left.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person() -> Type {
        DocumentType::new("Person")
            .with_member("Age", Type::Int32)
            .with_member("Score", Type::Double)
            .with_member("Name", Type::String)
            .into_type()
    }

    #[test]
    fn test_parameters_have_distinct_identities() {
        let a = Parameter::new("x", Type::Int32);
        let b = Parameter::new("x", Type::Int32);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_field_takes_member_type() {
        let x = Parameter::new("x", person());
        let age = Expr::parameter(&x).field("Age");
        assert_eq!(age.ty(), &Type::Int32);
        let missing = Expr::parameter(&x).field("Nope");
        assert_eq!(missing.ty(), &Type::Object);
    }

    #[test]
    fn test_binary_result_types() {
        let x = Parameter::new("x", person());
        let age = Expr::parameter(&x).field("Age");
        let score = Expr::parameter(&x).field("Score");
        assert_eq!(age.clone().eq(Expr::constant(3)).ty(), &Type::Boolean);
        assert_eq!(age.clone().add(score).ty(), &Type::Double);
        assert_eq!(age.add(Expr::constant(1)).ty(), &Type::Int32);
    }

    #[test]
    fn test_constant_type_inference() {
        assert_eq!(Expr::constant(true).ty(), &Type::Boolean);
        assert_eq!(Expr::constant(5i64).ty(), &Type::Int64);
        assert_eq!(Expr::constant("a").ty(), &Type::String);
        assert_eq!(
            Expr::constant(vec![Bson::Int32(1)]).ty(),
            &Type::array(Type::Int32)
        );
    }

    #[test]
    fn test_new_object_derives_document_type() {
        let x = Parameter::new("x", person());
        let new = Expr::new_object("Anon", vec![("V", Expr::parameter(&x).field("Name"))]);
        let doc = new.ty().as_document().unwrap();
        assert_eq!(doc.member("V"), Some(&Type::String));
    }

    #[test]
    fn test_lambda_type_is_body_type() {
        let x = Parameter::new("x", person());
        let lambda = Expr::lambda(vec![x.clone()], Expr::parameter(&x).field("Age"));
        assert_eq!(lambda.ty(), &Type::Int32);
    }
}
