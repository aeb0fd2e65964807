//! String methods, plus the `Equals`/`CompareTo`/`ToString` family and
//! `Regex.IsMatch`.

use super::{expect_args, receiver};
use crate::ast::{
    AstBinaryOperator, AstExpression, AstNaryOperator, AstTernaryOperator, AstTrimOperator,
    AstUnaryOperator, AstVarBinding,
};
use crate::error::{Error, Result};
use crate::expression::{Expr, MethodId, Type};
use crate::translation::context::TranslationContext;
use crate::translation::expressions::{
    require, translate, translate_pair, var_ref, TranslatedExpression,
};
use bson::Bson;

/// Escape regex metacharacters so `s` matches literally
pub(crate) fn escape_regex(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        if "\\^$.|?*+()[]{}".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Regex pattern for a literal `StartsWith`/`EndsWith`/`Contains` argument
pub(crate) fn literal_pattern(method: MethodId, value: &str) -> String {
    let escaped = escape_regex(value);
    match method {
        MethodId::StringStartsWith => format!("^{}", escaped),
        MethodId::StringEndsWith => format!("{}$", escaped),
        _ => escaped,
    }
}

/// The optional ignore-case argument; only a constant flag is supported
pub(crate) fn ignore_case_option(expr: &Expr, args: &[Expr]) -> Result<&'static str> {
    match args.get(1) {
        None => Ok(""),
        Some(arg) => match arg.as_constant() {
            Some(Bson::Boolean(true)) => Ok("i"),
            Some(Bson::Boolean(false)) => Ok(""),
            _ => Err(Error::unsupported_because(
                expr,
                "the comparison option must be a constant boolean",
            )),
        },
    }
}

pub(super) fn translate_string_call<'e>(
    ctx: &TranslationContext,
    expr: &'e Expr,
    method: MethodId,
    target: Option<&'e Expr>,
    args: &'e [Expr],
) -> Result<TranslatedExpression<'e>> {
    let string = || ctx.serializer_for(&Type::String);
    let boolean = || ctx.serializer_for(&Type::Boolean);
    let int32 = || ctx.serializer_for(&Type::Int32);

    match method {
        MethodId::StringConcat => {
            let parts: Vec<&Expr> = match args {
                [Expr::NewArray { elements, .. }] => elements.iter().collect(),
                _ => args.iter().collect(),
            };
            if parts.is_empty() {
                return Err(Error::unsupported_because(expr, "nothing to concatenate"));
            }
            let parts = parts
                .into_iter()
                .map(|part| translate(ctx, part).map(|t| t.ast))
                .collect::<Result<Vec<_>>>()?;
            let ast = AstExpression::nary(AstNaryOperator::Concat, parts)?;
            return Ok(TranslatedExpression::new(expr, ast, string()?));
        }
        MethodId::StringIsNullOrEmpty => {
            expect_args(expr, args, 1, 1)?;
            let value = translate(ctx, &args[0])?;
            let ast = AstExpression::binary(
                AstBinaryOperator::In,
                value.ast,
                AstExpression::constant(Bson::Array(vec![Bson::Null, Bson::from("")])),
            );
            return Ok(TranslatedExpression::new(expr, ast, boolean()?));
        }
        MethodId::RegexIsMatch => {
            expect_args(expr, args, 2, 3)?;
            let input = translate(ctx, &args[0])?;
            let pattern = constant_string(expr, &args[1], "the pattern")?;
            let options = match args.get(2) {
                Some(options) => constant_string(expr, options, "the options")?,
                None => String::new(),
            };
            let ast = AstExpression::regex_match(input.ast, pattern, options);
            return Ok(TranslatedExpression::new(expr, ast, boolean()?));
        }
        MethodId::Equals if target.is_none() => {
            expect_args(expr, args, 2, 2)?;
            let (left, right) = translate_pair(ctx, &args[0], &args[1])?;
            let ast = AstExpression::binary(AstBinaryOperator::Eq, left.ast, right.ast);
            return Ok(TranslatedExpression::new(expr, ast, boolean()?));
        }
        _ => {}
    }

    let target = receiver(expr, target)?;
    match method {
        MethodId::Equals | MethodId::CompareTo => {
            expect_args(expr, args, 1, 1)?;
            let (left, right) = translate_pair(ctx, target, &args[0])?;
            let (op, serializer) = if method == MethodId::Equals {
                (AstBinaryOperator::Eq, boolean()?)
            } else {
                (AstBinaryOperator::Cmp, int32()?)
            };
            return Ok(TranslatedExpression::new(
                expr,
                AstExpression::binary(op, left.ast, right.ast),
                serializer,
            ));
        }
        MethodId::ToString => {
            expect_args(expr, args, 0, 0)?;
            let value = translate(ctx, target)?;
            if target.ty().is_string() {
                return Ok(value);
            }
            let ast = AstExpression::unary(AstUnaryOperator::ToString, value.ast);
            return Ok(TranslatedExpression::new(expr, ast, string()?));
        }
        _ => {}
    }

    if !target.ty().is_string() {
        return Err(Error::unsupported_because(expr, "the receiver is not a string"));
    }
    let input = translate(ctx, target)?;

    let (ast, serializer) = match method {
        MethodId::StringToLower | MethodId::StringToLowerInvariant => {
            expect_args(expr, args, 0, 0)?;
            (AstExpression::unary(AstUnaryOperator::ToLower, input.ast), input.serializer)
        }
        MethodId::StringToUpper | MethodId::StringToUpperInvariant => {
            expect_args(expr, args, 0, 0)?;
            (AstExpression::unary(AstUnaryOperator::ToUpper, input.ast), input.serializer)
        }
        MethodId::StringTrim | MethodId::StringTrimStart | MethodId::StringTrimEnd => {
            expect_args(expr, args, 0, 1)?;
            let op = match method {
                MethodId::StringTrim => AstTrimOperator::Trim,
                MethodId::StringTrimStart => AstTrimOperator::LTrim,
                _ => AstTrimOperator::RTrim,
            };
            let chars = match args.first() {
                None => None,
                Some(chars) => Some(trim_chars(ctx, expr, chars)?),
            };
            (AstExpression::trim(op, input.ast, chars), input.serializer)
        }
        MethodId::StringStartsWith | MethodId::StringEndsWith | MethodId::StringContains => {
            expect_args(expr, args, 1, 2)?;
            let options = ignore_case_option(expr, args)?;
            let ast = match args[0].as_constant() {
                Some(Bson::String(value)) => {
                    AstExpression::regex_match(input.ast, literal_pattern(method, value), options.to_string())
                }
                _ if !options.is_empty() => {
                    return Err(Error::unsupported_because(
                        expr,
                        "case-insensitive matching requires a constant argument",
                    ))
                }
                _ => {
                    let value = translate(ctx, &args[0])?;
                    computed_match(ctx, method, input.ast, value.ast)?
                }
            };
            (ast, boolean()?)
        }
        MethodId::StringSubstring => {
            expect_args(expr, args, 1, 2)?;
            let start = translate(ctx, &args[0])?;
            let length = match args.get(1) {
                Some(length) => translate(ctx, length)?.ast,
                None => AstExpression::binary(
                    AstBinaryOperator::Subtract,
                    AstExpression::unary(AstUnaryOperator::StrLenCP, input.ast.clone()),
                    start.ast.clone(),
                ),
            };
            (
                AstExpression::ternary(AstTernaryOperator::SubstrCP, input.ast, start.ast, length),
                input.serializer,
            )
        }
        MethodId::StringIndexOf => {
            expect_args(expr, args, 1, 2)?;
            let value = translate(ctx, &args[0])?;
            let ast = match args.get(1) {
                None => AstExpression::binary(AstBinaryOperator::IndexOfCP, input.ast, value.ast),
                Some(start) => AstExpression::ternary(
                    AstTernaryOperator::IndexOfCP,
                    input.ast,
                    value.ast,
                    translate(ctx, start)?.ast,
                ),
            };
            (ast, int32()?)
        }
        MethodId::StringSplit => {
            expect_args(expr, args, 1, 1)?;
            let separator = match &args[0] {
                Expr::NewArray { elements, .. } if elements.len() == 1 => &elements[0],
                other => other,
            };
            let separator = translate(ctx, separator)?;
            (
                AstExpression::binary(AstBinaryOperator::Split, input.ast, separator.ast),
                ctx.serializer_for(&Type::array(Type::String))?,
            )
        }
        MethodId::StringReplace => {
            expect_args(expr, args, 2, 2)?;
            require(
                expr,
                ctx.options().compatibility_level.supports_replace_all(),
                "server version 4.4 or later",
            )?;
            let find = translate(ctx, &args[0])?;
            let replacement = translate(ctx, &args[1])?;
            (
                AstExpression::replace_all(input.ast, find.ast, replacement.ast),
                input.serializer,
            )
        }
        other => return Err(Error::unsupported_because(expr, format!("{} is not supported", other))),
    };
    Ok(TranslatedExpression::new(expr, ast, serializer))
}

fn constant_string(expr: &Expr, arg: &Expr, what: &str) -> Result<String> {
    match arg.as_constant() {
        Some(Bson::String(s)) => Ok(s.clone()),
        _ => Err(Error::unsupported_because(
            expr,
            format!("{} must be a constant string", what),
        )),
    }
}

/// Characters to trim: a constant string or char array, or a computed string
fn trim_chars(ctx: &TranslationContext, expr: &Expr, chars: &Expr) -> Result<AstExpression> {
    match chars.as_constant() {
        Some(Bson::String(s)) => Ok(AstExpression::constant(s.clone())),
        Some(Bson::Array(items)) => {
            let mut joined = String::new();
            for item in items {
                match item {
                    Bson::String(s) => joined.push_str(s),
                    _ => {
                        return Err(Error::unsupported_because(
                            expr,
                            "trim characters must be strings",
                        ))
                    }
                }
            }
            Ok(AstExpression::constant(joined))
        }
        Some(_) => Err(Error::unsupported_because(expr, "trim characters must be strings")),
        None => Ok(translate(ctx, chars)?.ast),
    }
}

/// `StartsWith`/`Contains`/`EndsWith` against a computed value
fn computed_match(
    ctx: &TranslationContext,
    method: MethodId,
    input: AstExpression,
    value: AstExpression,
) -> Result<AstExpression> {
    match method {
        MethodId::StringStartsWith => Ok(AstExpression::binary(
            AstBinaryOperator::Eq,
            AstExpression::binary(AstBinaryOperator::IndexOfCP, input, value),
            AstExpression::constant(0),
        )),
        MethodId::StringContains => Ok(AstExpression::binary(
            AstBinaryOperator::Gte,
            AstExpression::binary(AstBinaryOperator::IndexOfCP, input, value),
            AstExpression::constant(0),
        )),
        _ => {
            let string = ctx.fresh_var("string")?;
            let suffix = ctx.fresh_var("suffix")?;
            let suffix_length = AstExpression::unary(AstUnaryOperator::StrLenCP, var_ref(&suffix));
            let start = AstExpression::binary(
                AstBinaryOperator::Subtract,
                AstExpression::unary(AstUnaryOperator::StrLenCP, var_ref(&string)),
                suffix_length.clone(),
            );
            let body = AstExpression::nary(
                AstNaryOperator::And,
                vec![
                    AstExpression::binary(AstBinaryOperator::Gte, start.clone(), AstExpression::constant(0)),
                    AstExpression::binary(
                        AstBinaryOperator::Eq,
                        AstExpression::ternary(
                            AstTernaryOperator::SubstrCP,
                            var_ref(&string),
                            start,
                            suffix_length,
                        ),
                        var_ref(&suffix),
                    ),
                ],
            )?;
            AstExpression::let_(
                vec![AstVarBinding::new(string, input), AstVarBinding::new(suffix, value)],
                body,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ServerVersion, TranslationOptions};
    use crate::expression::{DocumentType, Parameter};
    use crate::serialization::SerializerRegistry;
    use bson::doc;
    use std::sync::Arc;

    fn setup_with(options: TranslationOptions) -> (TranslationContext, Parameter) {
        let ty = DocumentType::new("Customer")
            .with_member("Name", Type::String)
            .with_member("Suffix", Type::String)
            .with_member("Age", Type::Int32)
            .into_type();
        let ctx = TranslationContext::new(Arc::new(SerializerRegistry::new()), options);
        let x = Parameter::new("x", ty);
        let serializer = ctx.serializer_for(&x.ty).unwrap();
        let symbol = ctx.create_root_symbol(&x, &serializer).unwrap();
        (ctx.with_symbol(symbol), x)
    }

    fn setup() -> (TranslationContext, Parameter) {
        setup_with(TranslationOptions::default())
    }

    fn name(x: &Parameter) -> Expr {
        Expr::parameter(x).field("Name")
    }

    fn render(ctx: &TranslationContext, expr: &Expr) -> Bson {
        translate(ctx, expr).unwrap().ast.render()
    }

    #[test]
    fn test_escape_regex() {
        assert_eq!(escape_regex("a.b*c"), "a\\.b\\*c");
        assert_eq!(escape_regex("(x)"), "\\(x\\)");
        assert_eq!(escape_regex("plain"), "plain");
    }

    #[test]
    fn test_starts_with_constant() {
        let (ctx, x) = setup();
        let expr = name(&x).call(MethodId::StringStartsWith, vec![Expr::constant("Jo.")], Type::Boolean);
        assert_eq!(
            render(&ctx, &expr),
            Bson::Document(doc! { "$regexMatch": { "input": "$Name", "regex": "^Jo\\." } })
        );
    }

    #[test]
    fn test_contains_ignore_case() {
        let (ctx, x) = setup();
        let expr = name(&x).call(
            MethodId::StringContains,
            vec![Expr::constant("an"), Expr::constant(true)],
            Type::Boolean,
        );
        assert_eq!(
            render(&ctx, &expr),
            Bson::Document(doc! { "$regexMatch": { "input": "$Name", "regex": "an", "options": "i" } })
        );
    }

    #[test]
    fn test_starts_with_computed_value() {
        let (ctx, x) = setup();
        let expr = name(&x).call(
            MethodId::StringStartsWith,
            vec![Expr::parameter(&x).field("Suffix")],
            Type::Boolean,
        );
        assert_eq!(
            render(&ctx, &expr),
            Bson::Document(doc! { "$eq": [{ "$indexOfCP": ["$Name", "$Suffix"] }, 0] })
        );
    }

    #[test]
    fn test_ends_with_computed_value_binds_let() {
        let (ctx, x) = setup();
        let expr = name(&x).call(
            MethodId::StringEndsWith,
            vec![Expr::parameter(&x).field("Suffix")],
            Type::Boolean,
        );
        let start = doc! { "$subtract": [{ "$strLenCP": "$$string" }, { "$strLenCP": "$$suffix" }] };
        assert_eq!(
            render(&ctx, &expr),
            Bson::Document(doc! {
                "$let": {
                    "vars": { "string": "$Name", "suffix": "$Suffix" },
                    "in": {
                        "$and": [
                            { "$gte": [start.clone(), 0] },
                            { "$eq": [
                                { "$substrCP": ["$$string", start, { "$strLenCP": "$$suffix" }] },
                                "$$suffix",
                            ] },
                        ]
                    }
                }
            })
        );
    }

    #[test]
    fn test_substring_without_length() {
        let (ctx, x) = setup();
        let expr = name(&x).call(MethodId::StringSubstring, vec![Expr::constant(2)], Type::String);
        assert_eq!(
            render(&ctx, &expr),
            Bson::Document(doc! {
                "$substrCP": ["$Name", 2, { "$subtract": [{ "$strLenCP": "$Name" }, 2] }]
            })
        );
    }

    #[test]
    fn test_trim_with_chars() {
        let (ctx, x) = setup();
        let expr = name(&x).call(
            MethodId::StringTrimEnd,
            vec![Expr::constant(vec![Bson::from("."), Bson::from("!")])],
            Type::String,
        );
        assert_eq!(
            render(&ctx, &expr),
            Bson::Document(doc! { "$rtrim": { "input": "$Name", "chars": ".!" } })
        );
    }

    #[test]
    fn test_replace_requires_4_4() {
        let args = |x: &Parameter| {
            name(x).call(
                MethodId::StringReplace,
                vec![Expr::constant("a"), Expr::constant("b")],
                Type::String,
            )
        };
        let (ctx, x) = setup();
        assert_eq!(
            render(&ctx, &args(&x)),
            Bson::Document(doc! { "$replaceAll": { "input": "$Name", "find": "a", "replacement": "b" } })
        );
        let (old, x) = setup_with(
            TranslationOptions::default().with_compatibility_level(ServerVersion::V4_2),
        );
        assert!(translate(&old, &args(&x)).is_err());
    }

    #[test]
    fn test_is_null_or_empty() {
        let (ctx, x) = setup();
        let expr = Expr::static_call(MethodId::StringIsNullOrEmpty, vec![name(&x)], Type::Boolean);
        assert_eq!(
            render(&ctx, &expr),
            Bson::Document(doc! { "$in": ["$Name", [null, ""]] })
        );
    }

    #[test]
    fn test_concat_and_compare() {
        let (ctx, x) = setup();
        let concat = Expr::static_call(
            MethodId::StringConcat,
            vec![name(&x), Expr::constant(" "), Expr::parameter(&x).field("Suffix")],
            Type::String,
        );
        assert_eq!(
            render(&ctx, &concat),
            Bson::Document(doc! { "$concat": ["$Name", " ", "$Suffix"] })
        );
        let compare = name(&x).call(MethodId::CompareTo, vec![Expr::constant("M")], Type::Int32);
        assert_eq!(
            render(&ctx, &compare),
            Bson::Document(doc! { "$cmp": ["$Name", "M"] })
        );
    }

    #[test]
    fn test_to_string_of_number() {
        let (ctx, x) = setup();
        let expr = Expr::parameter(&x).field("Age").call(MethodId::ToString, vec![], Type::String);
        assert_eq!(render(&ctx, &expr), Bson::Document(doc! { "$toString": "$Age" }));
    }

    #[test]
    fn test_regex_is_match() {
        let (ctx, x) = setup();
        let expr = Expr::static_call(
            MethodId::RegexIsMatch,
            vec![name(&x), Expr::constant("^a+$"), Expr::constant("i")],
            Type::Boolean,
        );
        assert_eq!(
            render(&ctx, &expr),
            Bson::Document(doc! { "$regexMatch": { "input": "$Name", "regex": "^a+$", "options": "i" } })
        );
    }

    #[test]
    fn test_string_method_on_non_string_is_unsupported() {
        let (ctx, x) = setup();
        let expr = Expr::parameter(&x).field("Age").call(MethodId::StringToLower, vec![], Type::String);
        assert!(matches!(translate(&ctx, &expr), Err(Error::UnsupportedExpression { .. })));
    }
}
