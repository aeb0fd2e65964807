//! Source-like rendering of expression trees for diagnostics.

use super::{BinaryOp, Expr, UnaryOp};
use std::fmt;

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Constant { value, .. } => write!(f, "{}", value),
            Expr::Parameter(parameter) => write!(f, "{}", parameter.name),
            Expr::Source { collection, .. } => write!(f, "{}", collection),
            Expr::Member { target, member, .. } => write!(f, "{}.{}", target, member),
            Expr::Unary { op, operand, ty } => match op {
                UnaryOp::Not => write!(f, "!{}", operand),
                UnaryOp::Negate => write!(f, "-{}", operand),
                UnaryOp::BitwiseNot => write!(f, "~{}", operand),
                UnaryOp::ArrayLength => write!(f, "{}.Length", operand),
                UnaryOp::Convert => write!(f, "({}){}", ty, operand),
            },
            Expr::Binary {
                op: BinaryOp::ArrayIndex,
                left,
                right,
                ..
            } => write!(f, "{}[{}]", left, right),
            Expr::Binary {
                op, left, right, ..
            } => write!(f, "({} {} {})", left, op.symbol(), right),
            Expr::Conditional {
                test,
                if_true,
                if_false,
                ..
            } => write!(f, "({} ? {} : {})", test, if_true, if_false),
            Expr::Call {
                method,
                target,
                args,
                ..
            } => {
                match target {
                    Some(target) => write!(f, "{}.{}(", target, method.name())?,
                    None => write!(f, "{}(", method.name())?,
                }
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
            Expr::New { members, .. } => {
                write!(f, "new {{ ")?;
                for (i, (name, value)) in members.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} = {}", name, value)?;
                }
                write!(f, " }}")
            }
            Expr::NewArray { elements, .. } => {
                write!(f, "[")?;
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", element)?;
                }
                write!(f, "]")
            }
            Expr::Lambda(lambda) => {
                if lambda.parameters.len() == 1 {
                    write!(f, "{} => {}", lambda.parameters[0].name, lambda.body)
                } else {
                    write!(f, "(")?;
                    for (i, parameter) in lambda.parameters.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", parameter.name)?;
                    }
                    write!(f, ") => {}", lambda.body)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::expression::{DocumentType, Expr, MethodId, Parameter, Type};

    #[test]
    fn test_display_lambda() {
        let ty = DocumentType::new("Person")
            .with_member("Age", Type::Int32)
            .into_type();
        let x = Parameter::new("x", ty);
        let lambda = Expr::lambda(
            vec![x.clone()],
            Expr::parameter(&x).field("Age").eq(Expr::constant(3)),
        );
        assert_eq!(lambda.to_string(), "x => (x.Age == 3)");
    }

    #[test]
    fn test_display_call() {
        let x = Parameter::new("x", Type::String);
        let call = Expr::parameter(&x).call(MethodId::StringToLower, vec![], Type::String);
        assert_eq!(call.to_string(), "x.ToLower()");
    }
}
