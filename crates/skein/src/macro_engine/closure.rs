//! Closure capture for macro arguments.
//!
//! Each argument at a macro call site is packaged as a `ClosureRecord`:
//! the argument's source snippet plus the sub-map of the enclosing
//! declaration's references restricted to identifiers that occur free in
//! that argument. The record crosses the JSON bridge into the sandbox,
//! where the `Closure(...)` factory rebuilds it with a `Map`.

use deno_ast::swc::{
    ast::Expr,
    common::{sync::Lrc, Globals, Mark, SourceMap},
};
use serde::Serialize;

use crate::{
    code_generator::expr_to_code,
    declaration::{CanonicalName, Declaration},
    module_record::FxIndexMap,
    visitors::reference_collector,
};

#[derive(Debug, Clone, Serialize)]
pub struct ClosureRecord {
    pub expression: String,
    pub references: FxIndexMap<String, CanonicalName>,
}

/// Capture one macro-call argument.
pub fn capture_closure(
    argument: &Expr,
    enclosing_refs: &FxIndexMap<String, CanonicalName>,
    source_map: &Lrc<SourceMap>,
    globals: &Globals,
    unresolved_mark: Mark,
) -> ClosureRecord {
    let expression = expr_to_code(source_map, argument);

    let mut scratch = Declaration::DefaultExpr(Box::new(argument.clone()));
    let free = reference_collector::references_of(&mut scratch, globals, unresolved_mark);

    let mut references = FxIndexMap::default();
    for name in free {
        if let Some(canonical) = enclosing_refs.get(&name) {
            references.insert(name, canonical.clone());
        }
    }

    ClosureRecord {
        expression,
        references,
    }
}
