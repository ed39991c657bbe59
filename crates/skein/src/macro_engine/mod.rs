//! Compile-time macro expansion.
//!
//! A fixed-point loop over the declaration graph: every pass scans for
//! call expressions whose callee resolves to a macro-marked declaration,
//! captures the arguments as closures, runs the macro body in the
//! sandbox, splices the returned expression back into the AST and merges
//! the returned references into the graph. Expansion results may contain
//! further macro calls; those are picked up by the next pass rather than
//! evaluated nested. The pass count is capped.

pub mod closure;
pub mod sandbox;

use std::time::Duration;

use deno_ast::swc::{
    ast::{Callee, Expr},
    common::{sync::Lrc, Globals, Mark, SourceMap},
    visit::{noop_visit_mut_type, VisitMut, VisitMutWith},
};
use log::debug;
use petgraph::graph::NodeIndex;

use crate::{
    code_generator::expr_to_code,
    config::Config,
    declaration::{CanonicalName, Declaration},
    errors::{BundleError, Result},
    module_record::FxIndexMap,
    parser,
    source_graph::SourceGraph,
};

use closure::capture_closure;

pub struct MacroEngine {
    iteration_cap: usize,
    timeout: Duration,
}

impl MacroEngine {
    pub fn from_config(config: &Config) -> Self {
        Self {
            iteration_cap: config.macro_iteration_cap,
            timeout: config.macro_timeout,
        }
    }

    /// Expand macros to a fixed point. Returns the number of call sites
    /// replaced in total.
    pub fn expand(&self, graph: &mut SourceGraph) -> Result<usize> {
        let mut total = 0;
        for iteration in 0..self.iteration_cap {
            let replaced = self.expand_pass(graph)?;
            if replaced == 0 {
                if total > 0 {
                    debug!("macro expansion reached a fixed point after {iteration} iterations ({total} call sites)");
                }
                return Ok(total);
            }
            total += replaced;
        }
        Err(BundleError::MacroRecursion {
            cap: self.iteration_cap,
        })
    }

    /// One full scan over the graph in discovery order. Each rewritten
    /// declaration has its reference edges recomputed immediately, so a
    /// rewrite takes effect before the next pass.
    fn expand_pass(&self, graph: &mut SourceGraph) -> Result<usize> {
        let nodes: Vec<NodeIndex> = graph.graph.node_indices().collect();
        let mut replaced = 0;

        for nx in nodes {
            // Final macro bodies are never scanned for call sites, and
            // synthetic nodes carry no expandable AST.
            if !matches!(
                graph.graph[nx].declaration,
                Declaration::Expr(_)
                    | Declaration::Fn(_)
                    | Declaration::Class(_)
                    | Declaration::VarInit { .. }
                    | Declaration::DefaultExpr(_)
            ) {
                continue;
            }

            let local_refs = graph.local_references(nx);
            let mut macro_bodies: FxIndexMap<String, String> = FxIndexMap::default();
            let mut canonical_refs: FxIndexMap<String, CanonicalName> = FxIndexMap::default();
            for (name, target) in &local_refs {
                let target_node = &graph.graph[*target];
                canonical_refs.insert(name.clone(), target_node.canonical());
                if let Declaration::Macro { body } = &target_node.declaration {
                    macro_bodies.insert(
                        name.clone(),
                        expr_to_code(graph.registry.source_map(), body),
                    );
                }
            }
            if macro_bodies.is_empty() {
                continue;
            }

            let mut expander = CallSiteExpander {
                macro_bodies: &macro_bodies,
                enclosing_refs: &canonical_refs,
                source_map: graph.registry.source_map().clone(),
                globals: &graph.globals,
                unresolved_mark: graph.unresolved_mark,
                timeout: self.timeout,
                injected: FxIndexMap::default(),
                replaced: 0,
                error: None,
            };

            // Swap the declaration out so the expander can walk it while
            // the graph stays borrowable.
            let mut declaration =
                std::mem::replace(&mut graph.graph[nx].declaration, Declaration::TypeOnly);
            visit_declaration_ast(&mut declaration, &mut expander);
            graph.graph[nx].declaration = declaration;

            let CallSiteExpander {
                injected,
                replaced: node_replaced,
                error,
                ..
            } = expander;
            if let Some(err) = error {
                return Err(err);
            }
            if node_replaced == 0 {
                continue;
            }

            debug!(
                "expanded {node_replaced} macro call(s) in {}#{}",
                graph.graph[nx].uri, graph.graph[nx].name
            );
            graph.graph[nx].injected_refs.extend(injected);
            let created = graph.refresh_node(nx)?;
            graph.process_from(created)?;
            replaced += node_replaced;
        }

        Ok(replaced)
    }
}

/// Walk whichever AST fragment a declaration carries.
fn visit_declaration_ast(declaration: &mut Declaration, visitor: &mut impl VisitMut) {
    match declaration {
        Declaration::Expr(expr) | Declaration::DefaultExpr(expr) => {
            expr.visit_mut_with(visitor);
        }
        Declaration::VarInit {
            init: Some(expr), ..
        } => expr.visit_mut_with(visitor),
        Declaration::Fn(fn_decl) => fn_decl.function.visit_mut_with(visitor),
        Declaration::Class(class_decl) => class_decl.class.visit_mut_with(visitor),
        Declaration::VarInit { init: None, .. }
        | Declaration::Macro { .. }
        | Declaration::TypeOnly
        | Declaration::Namespace { .. }
        | Declaration::HostBinding { .. } => {}
    }
}

struct CallSiteExpander<'a> {
    macro_bodies: &'a FxIndexMap<String, String>,
    enclosing_refs: &'a FxIndexMap<String, CanonicalName>,
    source_map: Lrc<SourceMap>,
    globals: &'a Globals,
    unresolved_mark: Mark,
    timeout: Duration,
    /// Reference names returned by macros, to be merged into the node.
    injected: FxIndexMap<String, CanonicalName>,
    replaced: usize,
    error: Option<BundleError>,
}

impl CallSiteExpander<'_> {
    fn expand_call(&mut self, callee: &str, call: &deno_ast::swc::ast::CallExpr) -> Result<Expr> {
        let macro_body = self
            .macro_bodies
            .get(callee)
            .expect("caller checked membership");

        // Spread arguments contribute their inner expression as one more
        // closure in the sequence.
        let closures: Vec<closure::ClosureRecord> = call
            .args
            .iter()
            .map(|arg| {
                capture_closure(
                    &arg.expr,
                    self.enclosing_refs,
                    &self.source_map,
                    self.globals,
                    self.unresolved_mark,
                )
            })
            .collect();

        let expansion = sandbox::evaluate_macro(macro_body, &closures, self.timeout)?;

        let parsed = parser::parse_expr_snippet(
            &self.source_map,
            "(macro expansion)",
            &expansion.expression,
        )
        .map_err(|e| BundleError::MacroReturnShape {
            detail: format!("returned expression does not parse: {e}"),
        })?;

        for (name, canonical) in expansion.references {
            self.injected.insert(name, canonical);
        }
        Ok(*parsed)
    }
}

impl VisitMut for CallSiteExpander<'_> {
    noop_visit_mut_type!();

    fn visit_mut_expr(&mut self, expr: &mut Expr) {
        if self.error.is_some() {
            return;
        }
        if let Expr::Call(call) = expr {
            if let Callee::Expr(callee) = &call.callee {
                if let Expr::Ident(ident) = callee.as_ref() {
                    // Only module-scope callees count; a local binding
                    // shadowing the macro name is an ordinary call.
                    if ident.ctxt.has_mark(self.unresolved_mark)
                        && self.macro_bodies.contains_key(ident.sym.as_ref())
                    {
                        let name = ident.sym.to_string();
                        let call = call.clone();
                        match self.expand_call(&name, &call) {
                            Ok(replacement) => {
                                *expr = replacement;
                                self.replaced += 1;
                            }
                            Err(err) => self.error = Some(err),
                        }
                        // The replacement is handled by the next pass; do
                        // not descend into it.
                        return;
                    }
                }
            }
        }
        expr.visit_mut_children_with(self);
    }
}
