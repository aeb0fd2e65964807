//! Symbols, symbol tables and the translation context.
//!
//! Every bound lambda parameter maps to a [`Symbol`]: the AST expression that
//! refers to its value (`$$CURRENT`, `$$x`, `"$_v"`, ...) and the serializer
//! describing that value. Symbol tables are persistent: binding a symbol
//! returns a new table and leaves the old one valid, so nested lambdas can
//! shadow outer ones without any bookkeeping on the way back out.

use crate::ast::{AstExpression, AstVar};
use crate::config::TranslationOptions;
use crate::error::{Error, Result};
use crate::expression::{Parameter, ParameterId, Type};
use crate::serialization::{Serializer, SerializerRegistry, WrappedValueSerializer};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

/// A bound variable.
#[derive(Debug, Clone)]
pub struct Symbol {
    parameter: ParameterId,
    name: String,
    var: Option<AstExpression>,
    serializer: Arc<dyn Serializer>,
    is_current: bool,
}

impl Symbol {
    pub fn new<S: Into<String>>(
        parameter: &Parameter,
        name: S,
        var: AstExpression,
        serializer: Arc<dyn Serializer>,
        is_current: bool,
    ) -> Self {
        Self {
            parameter: parameter.id,
            name: name.into(),
            var: Some(var),
            serializer,
            is_current,
        }
    }

    /// A symbol whose value has no AST form yet
    pub fn placeholder<S: Into<String>>(
        parameter: &Parameter,
        name: S,
        serializer: Arc<dyn Serializer>,
    ) -> Self {
        Self {
            parameter: parameter.id,
            name: name.into(),
            var: None,
            serializer,
            is_current: false,
        }
    }

    pub fn parameter(&self) -> ParameterId {
        self.parameter
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ast(&self) -> Option<&AstExpression> {
        self.var.as_ref()
    }

    pub fn serializer(&self) -> &Arc<dyn Serializer> {
        &self.serializer
    }

    pub fn is_current(&self) -> bool {
        self.is_current
    }

    /// The same binding referenced as an ordinary variable (`$$name`)
    pub fn as_not_current(&self) -> Result<Symbol> {
        Ok(Symbol {
            parameter: self.parameter,
            name: self.name.clone(),
            var: Some(AstExpression::var(AstVar::new(self.name.clone())?)),
            serializer: self.serializer.clone(),
            is_current: false,
        })
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.var {
            Some(var) => write!(f, "{} => {}", self.name, var.render()),
            None => write!(f, "{} => <placeholder>", self.name),
        }
    }
}

#[derive(Debug)]
struct SymbolNode {
    symbol: Symbol,
    next: Option<Rc<SymbolNode>>,
}

/// Immutable chain of symbols, innermost first.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    head: Option<Rc<SymbolNode>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new table with `symbol` bound innermost
    pub fn with_symbol(&self, symbol: Symbol) -> SymbolTable {
        SymbolTable {
            head: Some(Rc::new(SymbolNode {
                symbol,
                next: self.head.clone(),
            })),
        }
    }

    /// Bind symbols left to right; later symbols shadow earlier ones
    pub fn with_symbols<I: IntoIterator<Item = Symbol>>(&self, symbols: I) -> SymbolTable {
        symbols
            .into_iter()
            .fold(self.clone(), |table, symbol| table.with_symbol(symbol))
    }

    pub fn try_get_symbol(&self, parameter: &Parameter) -> Option<&Symbol> {
        self.iter().find(|symbol| symbol.parameter == parameter.id)
    }

    pub fn iter(&self) -> SymbolTableIter<'_> {
        SymbolTableIter {
            node: self.head.as_deref(),
        }
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }
}

pub struct SymbolTableIter<'a> {
    node: Option<&'a SymbolNode>,
}

impl<'a> Iterator for SymbolTableIter<'a> {
    type Item = &'a Symbol;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.node?;
        self.node = node.next.as_deref();
        Some(&node.symbol)
    }
}

#[derive(Debug, Default)]
struct NameState {
    used: HashSet<String>,
    counters: HashMap<String, usize>,
}

/// Allocates variable names unique within one translation.
#[derive(Debug, Clone)]
pub struct NameGenerator {
    state: Rc<RefCell<NameState>>,
}

impl NameGenerator {
    /// Names that would collide with system or `$reduce` variables
    const RESERVED: [&'static str; 4] = ["CURRENT", "ROOT", "this", "value"];

    pub fn new() -> Self {
        let mut state = NameState::default();
        state.used.extend(Self::RESERVED.iter().map(|s| s.to_string()));
        Self {
            state: Rc::new(RefCell::new(state)),
        }
    }

    /// A valid, unused variable name derived from `base` (`x`, `x1`, `x2`, ...)
    pub fn unique_name(&self, base: &str) -> String {
        let base = sanitize(base);
        let mut state = self.state.borrow_mut();
        if state.used.insert(base.clone()) {
            return base;
        }
        loop {
            let counter = state.counters.entry(base.clone()).or_insert(0);
            *counter += 1;
            let candidate = format!("{}{}", base, counter);
            if state.used.insert(candidate.clone()) {
                return candidate;
            }
        }
    }

    pub fn fresh_name(&self, prefix: &str) -> String {
        self.unique_name(prefix)
    }
}

impl Default for NameGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn sanitize(base: &str) -> String {
    let cleaned: String = base
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    let mut chars = cleaned.chars();
    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => cleaned,
        Some(first) if first.is_ascii_uppercase() => {
            format!("{}{}", first.to_ascii_lowercase(), chars.as_str())
        }
        _ => "v".to_string(),
    }
}

/// Everything a translator needs: bound symbols, name allocation, serializer
/// lookup and options. Cloning is cheap; `with_*` methods return new contexts.
#[derive(Debug, Clone)]
pub struct TranslationContext {
    symbols: SymbolTable,
    names: NameGenerator,
    registry: Arc<SerializerRegistry>,
    options: Rc<TranslationOptions>,
}

impl TranslationContext {
    pub fn new(registry: Arc<SerializerRegistry>, options: TranslationOptions) -> Self {
        Self {
            symbols: SymbolTable::new(),
            names: NameGenerator::new(),
            registry,
            options: Rc::new(options),
        }
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn options(&self) -> &TranslationOptions {
        &self.options
    }

    pub fn registry(&self) -> &Arc<SerializerRegistry> {
        &self.registry
    }

    pub fn names(&self) -> &NameGenerator {
        &self.names
    }

    pub fn with_symbol(&self, symbol: Symbol) -> Self {
        self.with_symbol_table(self.symbols.with_symbol(symbol))
    }

    pub fn with_symbols<I: IntoIterator<Item = Symbol>>(&self, symbols: I) -> Self {
        self.with_symbol_table(self.symbols.with_symbols(symbols))
    }

    pub fn with_symbol_table(&self, symbols: SymbolTable) -> Self {
        Self {
            symbols,
            names: self.names.clone(),
            registry: self.registry.clone(),
            options: self.options.clone(),
        }
    }

    pub fn resolve(&self, parameter: &Parameter) -> Result<&Symbol> {
        self.symbols
            .try_get_symbol(parameter)
            .ok_or_else(|| Error::UnresolvableSymbol(parameter.name.clone()))
    }

    pub fn serializer_for(&self, ty: &Type) -> Result<Arc<dyn Serializer>> {
        self.registry.get_serializer(ty)
    }

    pub fn fresh_var(&self, prefix: &str) -> Result<AstVar> {
        AstVar::new(self.names.fresh_name(prefix))
    }

    /// Symbol for the document flowing through a stage. Wrapped values are
    /// addressed through their wrapper field.
    pub fn create_root_symbol(
        &self,
        parameter: &Parameter,
        serializer: &Arc<dyn Serializer>,
    ) -> Result<Symbol> {
        let name = self.names.unique_name(&parameter.name);
        if let Some(wrapped) = serializer.downcast_ref::<WrappedValueSerializer>() {
            return Ok(Symbol::new(
                parameter,
                name,
                AstExpression::field(wrapped.field_name())?,
                wrapped.value_serializer().clone(),
                false,
            ));
        }
        Ok(Symbol::new(
            parameter,
            name,
            AstExpression::current(),
            serializer.clone(),
            true,
        ))
    }

    /// Symbol for a value stored under `base` (a field path such as
    /// `"$_outer"`)
    pub fn create_embedded_symbol(
        &self,
        parameter: &Parameter,
        base: &str,
        serializer: &Arc<dyn Serializer>,
    ) -> Result<Symbol> {
        let name = self.names.unique_name(&parameter.name);
        let (path, serializer) = match serializer.downcast_ref::<WrappedValueSerializer>() {
            Some(wrapped) => (
                format!("{}.{}", base, wrapped.field_name()),
                wrapped.value_serializer().clone(),
            ),
            None => (base.to_string(), serializer.clone()),
        };
        Ok(Symbol::new(
            parameter,
            name,
            AstExpression::field_path(path)?,
            serializer,
            false,
        ))
    }

    /// Symbol for a lambda parameter bound to the aggregation variable `var`
    pub fn create_var_symbol(
        &self,
        parameter: &Parameter,
        var: AstVar,
        serializer: &Arc<dyn Serializer>,
    ) -> Result<Symbol> {
        let name = var.name().to_string();
        let (ast, serializer) = match serializer.downcast_ref::<WrappedValueSerializer>() {
            Some(wrapped) => (
                AstExpression::get_field(AstExpression::var(var), wrapped.field_name())?,
                wrapped.value_serializer().clone(),
            ),
            None => (AstExpression::var(var), serializer.clone()),
        };
        Ok(Symbol::new(parameter, name, ast, serializer, false))
    }

    /// Allocate a variable for a lambda parameter and bind it
    pub fn create_lambda_symbol(
        &self,
        parameter: &Parameter,
        serializer: &Arc<dyn Serializer>,
    ) -> Result<Symbol> {
        let var = AstVar::new(self.names.unique_name(&parameter.name))?;
        self.create_var_symbol(parameter, var, serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serialization::PrimitiveSerializer;

    fn int_serializer() -> Arc<dyn Serializer> {
        Arc::new(PrimitiveSerializer::new(Type::Int32))
    }

    fn context() -> TranslationContext {
        TranslationContext::new(Arc::new(SerializerRegistry::new()), TranslationOptions::default())
    }

    #[test]
    fn test_shadowing_keeps_old_table_valid() {
        let x = Parameter::new("x", Type::Int32);
        let outer = SymbolTable::new().with_symbol(Symbol::new(
            &x,
            "x",
            AstExpression::current(),
            int_serializer(),
            true,
        ));
        let inner = outer.with_symbol(Symbol::new(
            &x,
            "x1",
            AstExpression::var(AstVar::new("x1").unwrap()),
            int_serializer(),
            false,
        ));
        assert_eq!(inner.try_get_symbol(&x).unwrap().name(), "x1");
        assert_eq!(outer.try_get_symbol(&x).unwrap().name(), "x");
        assert_eq!(inner.len(), 2);
    }

    #[test]
    fn test_with_symbols_later_shadow_earlier() {
        let x = Parameter::new("x", Type::Int32);
        let table = SymbolTable::new().with_symbols(vec![
            Symbol::placeholder(&x, "first", int_serializer()),
            Symbol::placeholder(&x, "second", int_serializer()),
        ]);
        assert_eq!(table.try_get_symbol(&x).unwrap().name(), "second");
    }

    #[test]
    fn test_lookup_is_by_identity() {
        let a = Parameter::new("x", Type::Int32);
        let b = Parameter::new("x", Type::Int32);
        let table = SymbolTable::new().with_symbol(Symbol::placeholder(&a, "x", int_serializer()));
        assert!(table.try_get_symbol(&a).is_some());
        assert!(table.try_get_symbol(&b).is_none());
    }

    #[test]
    fn test_unique_names() {
        let names = NameGenerator::new();
        assert_eq!(names.unique_name("x"), "x");
        assert_eq!(names.unique_name("x"), "x1");
        assert_eq!(names.unique_name("x"), "x2");
        assert_eq!(names.unique_name("Item"), "item");
        assert_eq!(names.unique_name("_tmp"), "v");
        assert_eq!(names.unique_name("value"), "value1");
    }

    #[test]
    fn test_name_generator_shared_across_derived_contexts() {
        let ctx = context();
        let x = Parameter::new("x", Type::Int32);
        let derived = ctx.with_symbol(Symbol::placeholder(&x, "x", int_serializer()));
        assert_eq!(ctx.names().unique_name("a"), "a");
        assert_eq!(derived.names().unique_name("a"), "a1");
    }

    #[test]
    fn test_unresolvable_symbol() {
        let ctx = context();
        let x = Parameter::new("x", Type::Int32);
        assert!(matches!(ctx.resolve(&x), Err(Error::UnresolvableSymbol(name)) if name == "x"));
    }

    #[test]
    fn test_root_symbol_for_wrapped_values() {
        let ctx = context();
        let x = Parameter::new("x", Type::Int32);
        let wrapped: Arc<dyn Serializer> =
            Arc::new(WrappedValueSerializer::new("_v", int_serializer()));
        let symbol = ctx.create_root_symbol(&x, &wrapped).unwrap();
        assert!(!symbol.is_current());
        assert_eq!(symbol.ast(), Some(&AstExpression::field("_v").unwrap()));
        assert_eq!(symbol.serializer().value_type(), &Type::Int32);

        let plain = ctx.create_root_symbol(&x, &int_serializer()).unwrap();
        assert!(plain.is_current());
        assert!(plain.ast().unwrap().is_current_var());
    }

    #[test]
    fn test_as_not_current() {
        let x = Parameter::new("x", Type::Int32);
        let symbol = Symbol::new(&x, "x", AstExpression::current(), int_serializer(), true);
        let not_current = symbol.as_not_current().unwrap();
        assert!(!not_current.is_current());
        assert_eq!(
            not_current.ast(),
            Some(&AstExpression::var(AstVar::new("x").unwrap()))
        );
    }
}
