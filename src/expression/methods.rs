//! Known method identities.
//!
//! Host call sites are interned into the closed [`MethodId`] enumeration once,
//! at the boundary between the host expression tree and the translators.
//! Translators match on `MethodId` and never inspect method names.
//!
//! # Example
//!
//! ```rust,ignore
//! use photonql::expression::MethodId;
//!
//! let method = MethodId::resolve("Enumerable", "Where").unwrap();
//! assert_eq!(method, MethodId::Where);
//! assert_eq!(method.name(), "Where");
//! ```

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MethodId {
    // Query / sequence operators
    Where,
    Select,
    SelectMany,
    OrderBy,
    OrderByDescending,
    ThenBy,
    ThenByDescending,
    Take,
    Skip,
    GroupBy,
    Distinct,
    Join,
    Sample,
    First,
    FirstOrDefault,
    Single,
    SingleOrDefault,
    Last,
    LastOrDefault,
    ElementAt,
    Count,
    LongCount,
    Any,
    All,
    Max,
    Min,
    Sum,
    Average,
    Contains,
    Concat,
    Union,
    Intersect,
    Except,
    Reverse,
    ToArray,
    ToList,
    Aggregate,

    // String methods
    StringToLower,
    StringToUpper,
    StringToLowerInvariant,
    StringToUpperInvariant,
    StringTrim,
    StringTrimStart,
    StringTrimEnd,
    StringStartsWith,
    StringEndsWith,
    StringContains,
    StringSubstring,
    StringIndexOf,
    StringSplit,
    StringReplace,
    StringConcat,
    StringIsNullOrEmpty,

    // Math methods
    MathAbs,
    MathCeiling,
    MathFloor,
    MathSqrt,
    MathExp,
    MathLog,
    MathLog10,
    MathPow,
    MathRound,
    MathTruncate,
    MathMax,
    MathMin,

    // Enum methods
    EnumHasFlag,

    // DateTime methods
    DateTimeAddDays,
    DateTimeAddHours,
    DateTimeAddMinutes,
    DateTimeAddSeconds,
    DateTimeAddMilliseconds,

    // Regex
    RegexIsMatch,

    // Object methods
    Equals,
    CompareTo,
    ToString,
}

lazy_static! {
    /// Interning table: (declaring type, method name) -> method identity.
    static ref METHODS: HashMap<(&'static str, &'static str), MethodId> = {
        let mut table = HashMap::new();

        let sequence_operators = [
            ("Where", MethodId::Where),
            ("Select", MethodId::Select),
            ("SelectMany", MethodId::SelectMany),
            ("OrderBy", MethodId::OrderBy),
            ("OrderByDescending", MethodId::OrderByDescending),
            ("ThenBy", MethodId::ThenBy),
            ("ThenByDescending", MethodId::ThenByDescending),
            ("Take", MethodId::Take),
            ("Skip", MethodId::Skip),
            ("GroupBy", MethodId::GroupBy),
            ("Distinct", MethodId::Distinct),
            ("Join", MethodId::Join),
            ("First", MethodId::First),
            ("FirstOrDefault", MethodId::FirstOrDefault),
            ("Single", MethodId::Single),
            ("SingleOrDefault", MethodId::SingleOrDefault),
            ("Last", MethodId::Last),
            ("LastOrDefault", MethodId::LastOrDefault),
            ("ElementAt", MethodId::ElementAt),
            ("Count", MethodId::Count),
            ("LongCount", MethodId::LongCount),
            ("Any", MethodId::Any),
            ("All", MethodId::All),
            ("Max", MethodId::Max),
            ("Min", MethodId::Min),
            ("Sum", MethodId::Sum),
            ("Average", MethodId::Average),
            ("Contains", MethodId::Contains),
            ("Concat", MethodId::Concat),
            ("Union", MethodId::Union),
            ("Intersect", MethodId::Intersect),
            ("Except", MethodId::Except),
            ("Reverse", MethodId::Reverse),
            ("ToArray", MethodId::ToArray),
            ("ToList", MethodId::ToList),
            ("Aggregate", MethodId::Aggregate),
        ];
        for (name, id) in sequence_operators {
            table.insert(("Enumerable", name), id);
            table.insert(("Queryable", name), id);
        }
        table.insert(("List", "Contains"), MethodId::Contains);
        table.insert(("Array", "Contains"), MethodId::Contains);
        table.insert(("MongoQueryable", "Sample"), MethodId::Sample);

        let string_methods = [
            ("ToLower", MethodId::StringToLower),
            ("ToUpper", MethodId::StringToUpper),
            ("ToLowerInvariant", MethodId::StringToLowerInvariant),
            ("ToUpperInvariant", MethodId::StringToUpperInvariant),
            ("Trim", MethodId::StringTrim),
            ("TrimStart", MethodId::StringTrimStart),
            ("TrimEnd", MethodId::StringTrimEnd),
            ("StartsWith", MethodId::StringStartsWith),
            ("EndsWith", MethodId::StringEndsWith),
            ("Contains", MethodId::StringContains),
            ("Substring", MethodId::StringSubstring),
            ("IndexOf", MethodId::StringIndexOf),
            ("Split", MethodId::StringSplit),
            ("Replace", MethodId::StringReplace),
            ("Concat", MethodId::StringConcat),
            ("IsNullOrEmpty", MethodId::StringIsNullOrEmpty),
            ("Equals", MethodId::Equals),
            ("CompareTo", MethodId::CompareTo),
            ("ToString", MethodId::ToString),
        ];
        for (name, id) in string_methods {
            table.insert(("String", name), id);
        }

        let math_methods = [
            ("Abs", MethodId::MathAbs),
            ("Ceiling", MethodId::MathCeiling),
            ("Floor", MethodId::MathFloor),
            ("Sqrt", MethodId::MathSqrt),
            ("Exp", MethodId::MathExp),
            ("Log", MethodId::MathLog),
            ("Log10", MethodId::MathLog10),
            ("Pow", MethodId::MathPow),
            ("Round", MethodId::MathRound),
            ("Truncate", MethodId::MathTruncate),
            ("Max", MethodId::MathMax),
            ("Min", MethodId::MathMin),
        ];
        for (name, id) in math_methods {
            table.insert(("Math", name), id);
        }

        table.insert(("Enum", "HasFlag"), MethodId::EnumHasFlag);

        let date_methods = [
            ("AddDays", MethodId::DateTimeAddDays),
            ("AddHours", MethodId::DateTimeAddHours),
            ("AddMinutes", MethodId::DateTimeAddMinutes),
            ("AddSeconds", MethodId::DateTimeAddSeconds),
            ("AddMilliseconds", MethodId::DateTimeAddMilliseconds),
        ];
        for (name, id) in date_methods {
            table.insert(("DateTime", name), id);
        }

        table.insert(("Regex", "IsMatch"), MethodId::RegexIsMatch);

        table.insert(("Object", "Equals"), MethodId::Equals);
        table.insert(("Object", "ToString"), MethodId::ToString);
        table.insert(("IComparable", "CompareTo"), MethodId::CompareTo);

        table
    };
}

impl MethodId {
    /// Intern a host method by declaring type and name.
    ///
    /// Returns `None` for methods no translator knows about; such call sites
    /// cannot be represented in an [`Expr`](super::Expr) at all.
    pub fn resolve(declaring_type: &str, name: &str) -> Option<Self> {
        METHODS.get(&(declaring_type, name)).copied()
    }

    /// Whether this method is a query operator that can start or extend a
    /// pipeline (as opposed to an in-expression method)
    pub fn is_query_operator(self) -> bool {
        matches!(
            self,
            MethodId::Where
                | MethodId::Select
                | MethodId::SelectMany
                | MethodId::OrderBy
                | MethodId::OrderByDescending
                | MethodId::ThenBy
                | MethodId::ThenByDescending
                | MethodId::Take
                | MethodId::Skip
                | MethodId::GroupBy
                | MethodId::Distinct
                | MethodId::Join
                | MethodId::Sample
        )
    }

    /// Whether this method ends a pipeline and produces a single value
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MethodId::First
                | MethodId::FirstOrDefault
                | MethodId::Single
                | MethodId::SingleOrDefault
                | MethodId::Last
                | MethodId::LastOrDefault
                | MethodId::ElementAt
                | MethodId::Count
                | MethodId::LongCount
                | MethodId::Any
                | MethodId::All
                | MethodId::Max
                | MethodId::Min
                | MethodId::Sum
                | MethodId::Average
        )
    }

    /// Returns the method name as it appears in diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            MethodId::Where => "Where",
            MethodId::Select => "Select",
            MethodId::SelectMany => "SelectMany",
            MethodId::OrderBy => "OrderBy",
            MethodId::OrderByDescending => "OrderByDescending",
            MethodId::ThenBy => "ThenBy",
            MethodId::ThenByDescending => "ThenByDescending",
            MethodId::Take => "Take",
            MethodId::Skip => "Skip",
            MethodId::GroupBy => "GroupBy",
            MethodId::Distinct => "Distinct",
            MethodId::Join => "Join",
            MethodId::Sample => "Sample",
            MethodId::First => "First",
            MethodId::FirstOrDefault => "FirstOrDefault",
            MethodId::Single => "Single",
            MethodId::SingleOrDefault => "SingleOrDefault",
            MethodId::Last => "Last",
            MethodId::LastOrDefault => "LastOrDefault",
            MethodId::ElementAt => "ElementAt",
            MethodId::Count => "Count",
            MethodId::LongCount => "LongCount",
            MethodId::Any => "Any",
            MethodId::All => "All",
            MethodId::Max => "Max",
            MethodId::Min => "Min",
            MethodId::Sum => "Sum",
            MethodId::Average => "Average",
            MethodId::Contains => "Contains",
            MethodId::Concat => "Concat",
            MethodId::Union => "Union",
            MethodId::Intersect => "Intersect",
            MethodId::Except => "Except",
            MethodId::Reverse => "Reverse",
            MethodId::ToArray => "ToArray",
            MethodId::ToList => "ToList",
            MethodId::Aggregate => "Aggregate",
            MethodId::StringToLower => "ToLower",
            MethodId::StringToUpper => "ToUpper",
            MethodId::StringToLowerInvariant => "ToLowerInvariant",
            MethodId::StringToUpperInvariant => "ToUpperInvariant",
            MethodId::StringTrim => "Trim",
            MethodId::StringTrimStart => "TrimStart",
            MethodId::StringTrimEnd => "TrimEnd",
            MethodId::StringStartsWith => "StartsWith",
            MethodId::StringEndsWith => "EndsWith",
            MethodId::StringContains => "Contains",
            MethodId::StringSubstring => "Substring",
            MethodId::StringIndexOf => "IndexOf",
            MethodId::StringSplit => "Split",
            MethodId::StringReplace => "Replace",
            MethodId::StringConcat => "String.Concat",
            MethodId::StringIsNullOrEmpty => "String.IsNullOrEmpty",
            MethodId::MathAbs => "Math.Abs",
            MethodId::MathCeiling => "Math.Ceiling",
            MethodId::MathFloor => "Math.Floor",
            MethodId::MathSqrt => "Math.Sqrt",
            MethodId::MathExp => "Math.Exp",
            MethodId::MathLog => "Math.Log",
            MethodId::MathLog10 => "Math.Log10",
            MethodId::MathPow => "Math.Pow",
            MethodId::MathRound => "Math.Round",
            MethodId::MathTruncate => "Math.Truncate",
            MethodId::MathMax => "Math.Max",
            MethodId::MathMin => "Math.Min",
            MethodId::EnumHasFlag => "HasFlag",
            MethodId::DateTimeAddDays => "AddDays",
            MethodId::DateTimeAddHours => "AddHours",
            MethodId::DateTimeAddMinutes => "AddMinutes",
            MethodId::DateTimeAddSeconds => "AddSeconds",
            MethodId::DateTimeAddMilliseconds => "AddMilliseconds",
            MethodId::RegexIsMatch => "Regex.IsMatch",
            MethodId::Equals => "Equals",
            MethodId::CompareTo => "CompareTo",
            MethodId::ToString => "ToString",
        }
    }

    /// Whether the method is called statically (no receiver)
    pub fn is_static(&self) -> bool {
        matches!(
            self,
            MethodId::StringConcat
                | MethodId::StringIsNullOrEmpty
                | MethodId::MathAbs
                | MethodId::MathCeiling
                | MethodId::MathFloor
                | MethodId::MathSqrt
                | MethodId::MathExp
                | MethodId::MathLog
                | MethodId::MathLog10
                | MethodId::MathPow
                | MethodId::MathRound
                | MethodId::MathTruncate
                | MethodId::MathMax
                | MethodId::MathMin
                | MethodId::RegexIsMatch
        )
    }
}

impl std::fmt::Display for MethodId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
