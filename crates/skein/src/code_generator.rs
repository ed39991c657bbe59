//! Code emission.
//!
//! Surviving declarations are renamed to stable `declaration_<N>` names
//! (N is the node's discovery index), their references rewritten, and the
//! results concatenated in dependency-first order behind the host-binding
//! preamble. The entry invocation is produced separately so `--emit`
//! output is exactly the executable output minus the driver tail.

use deno_ast::swc::{
    ast::{
        BlockStmt, BlockStmtOrExpr, ClassDecl, Decl, EsVersion, Expr, ExprStmt, FnDecl, Function,
        Ident, Module, ModuleItem, Param, Pat, ReturnStmt, Stmt, VarDecl, VarDeclKind,
        VarDeclarator,
    },
    codegen::{text_writer::JsWriter, Config as CodegenConfig, Emitter},
    common::{sync::Lrc, SourceMap, SyntaxContext, DUMMY_SP},
};
use indexmap::IndexSet;
use log::{debug, warn};
use petgraph::{
    graph::NodeIndex,
    visit::{DfsPostOrder, EdgeRef},
    Direction::Outgoing,
};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    declaration::{BindingKind, Declaration},
    errors::{BundleError, Result},
    host_modules, parser,
    source_graph::SourceGraph,
    visitors::{reference_collector, type_stripper::TypeStripper, using_lowering::UsingLowering},
};
use deno_ast::swc::visit::VisitMutWith;

/// The two segments of a bundle: everything, and the driver tail that
/// invokes the entry's default export.
#[derive(Debug, Clone)]
pub struct BundleCode {
    /// Preamble plus renamed declarations in topological order.
    pub code: String,
    /// `declaration_<N>();` for the entry's default export.
    pub entry_invocation: String,
}

impl BundleCode {
    /// The executable program: declarations plus the driver tail.
    pub fn executable(&self) -> String {
        format!("{}{}", self.code, self.entry_invocation)
    }
}

pub fn emit_name_for(node: NodeIndex) -> String {
    format!("declaration_{}", node.index())
}

/// Emit the bundle for a fully built, macro-expanded graph.
pub fn emit(graph: &SourceGraph) -> Result<BundleCode> {
    let source_map = graph.registry.source_map().clone();

    // Dependency-first order; the root lands last. Cycles are broken
    // arbitrarily and patched up by hoisting below.
    let mut order: Vec<NodeIndex> = Vec::new();
    let mut dfs = DfsPostOrder::new(&graph.graph, graph.root);
    while let Some(nx) = dfs.next(&graph.graph) {
        order.push(nx);
    }
    let mut position: FxHashMap<NodeIndex, usize> = FxHashMap::default();
    for (index, nx) in order.iter().enumerate() {
        position.insert(*nx, index);
    }

    // A declaration referenced before its emission position must be
    // hoistable; function-valued bindings are converted to function
    // declarations, real function declarations already hoist.
    let mut hoisted: FxHashSet<NodeIndex> = FxHashSet::default();
    for edge in graph.graph.edge_references() {
        let (from, to) = (edge.source(), edge.target());
        let (Some(&from_pos), Some(&to_pos)) = (position.get(&from), position.get(&to)) else {
            continue;
        };
        if to_pos <= from_pos || to == graph.root {
            continue;
        }
        match &graph.graph[to].declaration {
            Declaration::Fn(_) | Declaration::Class(_) => {}
            Declaration::VarInit {
                init: Some(init), ..
            }
            | Declaration::DefaultExpr(init)
                if function_valued(init) =>
            {
                hoisted.insert(to);
            }
            Declaration::Macro { .. } | Declaration::TypeOnly => {}
            other => {
                warn!(
                    "cycle places {} '{}' after a referencing declaration; emitting anyway",
                    other.kind_name(),
                    graph.graph[to].name
                );
            }
        }
    }

    let mut items: Vec<ModuleItem> = Vec::new();
    let mut used_namespaces: IndexSet<String> = IndexSet::new();

    for &nx in &order {
        if nx == graph.root {
            continue;
        }
        let node = &graph.graph[nx];
        if !node.declaration.is_emittable() {
            debug!(
                "skipping {} '{}' from emission",
                node.declaration.kind_name(),
                node.name
            );
            continue;
        }

        match &node.declaration {
            Declaration::HostBinding { namespace, export } => {
                used_namespaces.insert(namespace.clone());
                let stmt = parse_statement(
                    &source_map,
                    &format!(
                        "const {} = {}.{};",
                        emit_name_for(nx),
                        host_modules::preamble_var(namespace),
                        export
                    ),
                )?;
                items.push(ModuleItem::Stmt(stmt));
            }
            Declaration::Namespace { .. } => {
                items.push(ModuleItem::Stmt(namespace_object_stmt(
                    graph,
                    &source_map,
                    nx,
                )?));
            }
            _ => {
                items.push(ModuleItem::Stmt(emit_declaration(
                    graph,
                    nx,
                    hoisted.contains(&nx),
                )?));
            }
        }
    }

    let module = Module {
        span: DUMMY_SP,
        body: items,
        shebang: None,
    };
    let declarations_code = module_to_code(&source_map, &module);

    let entry_invocation = {
        let stmt = rename_for_emission(graph, graph.root)?;
        let module = Module {
            span: DUMMY_SP,
            body: vec![ModuleItem::Stmt(declaration_statement(
                stmt,
                &emit_name_for(graph.root),
                false,
            )?)],
            shebang: None,
        };
        module_to_code(&source_map, &module)
    };

    let preamble = host_modules::preamble(&used_namespaces);
    Ok(BundleCode {
        code: format!("{preamble}{declarations_code}"),
        entry_invocation,
    })
}

/// Clone a node's declaration and rewrite it for emission: strip types,
/// lower `using`, rename references to emit names.
fn rename_for_emission(graph: &SourceGraph, nx: NodeIndex) -> Result<Declaration> {
    let source_map = graph.registry.source_map().clone();
    let mut declaration = graph.graph[nx].declaration.clone();

    let mut stripper = TypeStripper;
    visit_declaration(&mut declaration, &mut stripper);

    let mut lowering = UsingLowering::new(source_map);
    visit_declaration(&mut declaration, &mut lowering);
    lowering.into_result()?;

    let mut replacements: FxHashMap<String, String> = FxHashMap::default();
    for edge in graph.graph.edges_directed(nx, Outgoing) {
        let target = edge.target();
        if graph.graph[target].declaration.is_macro() {
            warn!(
                "macro '{}' is still referenced by value from '{}'",
                graph.graph[target].name, graph.graph[nx].name
            );
        }
        replacements.insert(edge.weight().clone(), emit_name_for(target));
    }
    reference_collector::rename_references(
        &mut declaration,
        &replacements,
        &graph.globals,
        graph.unresolved_mark,
    );
    Ok(declaration)
}

fn emit_declaration(graph: &SourceGraph, nx: NodeIndex, hoist: bool) -> Result<Stmt> {
    let declaration = rename_for_emission(graph, nx)?;
    declaration_statement(declaration, &emit_name_for(nx), hoist)
}

/// Turn a renamed declaration into the statement the bundle carries.
fn declaration_statement(declaration: Declaration, emit_name: &str, hoist: bool) -> Result<Stmt> {
    match declaration {
        Declaration::Fn(mut fn_decl) => {
            fn_decl.ident = emit_ident(emit_name);
            Ok(Stmt::Decl(Decl::Fn(fn_decl)))
        }
        Declaration::Class(class_decl) => Ok(Stmt::Decl(Decl::Class(ClassDecl {
            ident: emit_ident(emit_name),
            declare: false,
            class: class_decl.class,
        }))),
        Declaration::VarInit { kind, init } => match init {
            Some(init) if hoist => hoisted_function(emit_name, *init),
            init => Ok(var_statement(emit_name, kind, init)),
        },
        Declaration::DefaultExpr(init) => {
            if hoist {
                hoisted_function(emit_name, *init)
            } else {
                Ok(var_statement(emit_name, BindingKind::Const, Some(init)))
            }
        }
        Declaration::Expr(expr) => Ok(Stmt::Expr(ExprStmt {
            span: DUMMY_SP,
            expr,
        })),
        other => Err(BundleError::EmitOrderingConflict {
            detail: format!(
                "{} '{emit_name}' reached declaration emission",
                other.kind_name()
            ),
        }),
    }
}

/// `const ns = { a: declaration_1, b: declaration_2 };` for a namespace
/// node, entries sorted by export name.
fn namespace_object_stmt(
    graph: &SourceGraph,
    source_map: &Lrc<SourceMap>,
    nx: NodeIndex,
) -> Result<Stmt> {
    let mut entries: Vec<(String, NodeIndex)> = graph
        .graph
        .edges_directed(nx, Outgoing)
        .map(|edge| (edge.weight().clone(), edge.target()))
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut fields: Vec<String> = Vec::new();
    for (name, target) in entries {
        if !graph.graph[target].declaration.is_emittable() {
            continue;
        }
        let key = if is_valid_ident(&name) {
            name
        } else {
            format!("{:?}", name)
        };
        fields.push(format!("{key}: {}", emit_name_for(target)));
    }

    parse_statement(
        source_map,
        &format!(
            "const {} = {{ {} }};",
            emit_name_for(nx),
            fields.join(", ")
        ),
    )
}

fn var_statement(emit_name: &str, kind: BindingKind, init: Option<Box<Expr>>) -> Stmt {
    Stmt::Decl(Decl::Var(Box::new(VarDecl {
        span: DUMMY_SP,
        ctxt: SyntaxContext::empty(),
        kind: match kind {
            BindingKind::Const => VarDeclKind::Const,
            BindingKind::Let => VarDeclKind::Let,
        },
        declare: false,
        decls: vec![VarDeclarator {
            span: DUMMY_SP,
            name: Pat::Ident(emit_ident(emit_name).into()),
            init,
            definite: false,
        }],
    })))
}

/// Hoist a function-valued binding into function-declaration form so
/// cyclic references resolve regardless of emission order.
fn hoisted_function(emit_name: &str, init: Expr) -> Result<Stmt> {
    let function = function_from_init(init).ok_or_else(|| BundleError::EmitOrderingConflict {
        detail: format!("'{emit_name}' needs hoisting but is not function-valued"),
    })?;
    Ok(Stmt::Decl(Decl::Fn(FnDecl {
        ident: emit_ident(emit_name),
        declare: false,
        function,
    })))
}

fn function_valued(expr: &Expr) -> bool {
    match expr {
        Expr::Fn(_) | Expr::Arrow(_) => true,
        Expr::Paren(paren) => function_valued(&paren.expr),
        _ => false,
    }
}

fn function_from_init(expr: Expr) -> Option<Box<Function>> {
    match expr {
        Expr::Paren(paren) => function_from_init(*paren.expr),
        Expr::Fn(fn_expr) => Some(fn_expr.function),
        Expr::Arrow(arrow) => {
            let body = match *arrow.body {
                BlockStmtOrExpr::BlockStmt(block) => block,
                BlockStmtOrExpr::Expr(value) => BlockStmt {
                    span: DUMMY_SP,
                    ctxt: SyntaxContext::empty(),
                    stmts: vec![Stmt::Return(ReturnStmt {
                        span: DUMMY_SP,
                        arg: Some(value),
                    })],
                },
            };
            Some(Box::new(Function {
                params: arrow
                    .params
                    .into_iter()
                    .map(|pat| Param {
                        span: DUMMY_SP,
                        decorators: Vec::new(),
                        pat,
                    })
                    .collect(),
                decorators: Vec::new(),
                span: arrow.span,
                ctxt: SyntaxContext::empty(),
                body: Some(body),
                is_generator: false,
                is_async: arrow.is_async,
                type_params: None,
                return_type: None,
            }))
        }
        _ => None,
    }
}

fn emit_ident(name: &str) -> Ident {
    Ident::new(name.into(), DUMMY_SP, SyntaxContext::empty())
}

fn is_valid_ident(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

fn visit_declaration(declaration: &mut Declaration, visitor: &mut impl deno_ast::swc::visit::VisitMut) {
    match declaration {
        Declaration::Expr(expr) | Declaration::DefaultExpr(expr) => expr.visit_mut_with(visitor),
        Declaration::VarInit {
            init: Some(expr), ..
        } => expr.visit_mut_with(visitor),
        Declaration::Fn(fn_decl) => fn_decl.function.visit_mut_with(visitor),
        Declaration::Class(class_decl) => class_decl.class.visit_mut_with(visitor),
        _ => {}
    }
}

fn parse_statement(source_map: &Lrc<SourceMap>, code: &str) -> Result<Stmt> {
    let module = parser::parse_module(source_map, "(emitted binding)", code)?;
    match module.body.into_iter().next() {
        Some(ModuleItem::Stmt(stmt)) => Ok(stmt),
        _ => Err(BundleError::EmitOrderingConflict {
            detail: format!("synthesized binding did not parse as a statement: {code}"),
        }),
    }
}

// ---- shared emission helpers ----

/// Emit a whole module with the default codegen configuration.
pub fn module_to_code(source_map: &Lrc<SourceMap>, module: &Module) -> String {
    let mut buf = Vec::new();
    {
        let writer = JsWriter::new(source_map.clone(), "\n", &mut buf, None);
        let mut emitter = Emitter {
            cfg: CodegenConfig::default().with_target(EsVersion::Es2022),
            cm: source_map.clone(),
            comments: None,
            wr: Box::new(writer),
        };
        emitter
            .emit_module(module)
            .expect("emitting to an in-memory buffer cannot fail");
    }
    String::from_utf8(buf).expect("codegen always produces UTF-8")
}

/// Emit a single expression, without a trailing semicolon.
pub fn expr_to_code(source_map: &Lrc<SourceMap>, expr: &Expr) -> String {
    let module = Module {
        span: DUMMY_SP,
        body: vec![ModuleItem::Stmt(Stmt::Expr(ExprStmt {
            span: DUMMY_SP,
            expr: Box::new(expr.clone()),
        }))],
        shebang: None,
    };
    module_to_code(source_map, &module)
        .trim()
        .trim_end_matches(';')
        .to_string()
}

/// Source text of a declaration's AST fragment. Test and diagnostic
/// helper; emission proper goes through `emit`.
pub fn declaration_to_snippet(source_map: &Lrc<SourceMap>, declaration: &Declaration) -> String {
    match declaration {
        Declaration::Expr(expr)
        | Declaration::DefaultExpr(expr)
        | Declaration::Macro { body: expr } => expr_to_code(source_map, expr),
        Declaration::VarInit {
            init: Some(expr), ..
        } => expr_to_code(source_map, expr),
        Declaration::Fn(fn_decl) => {
            let module = Module {
                span: DUMMY_SP,
                body: vec![ModuleItem::Stmt(Stmt::Decl(Decl::Fn(fn_decl.clone())))],
                shebang: None,
            };
            module_to_code(source_map, &module)
        }
        Declaration::Class(class_decl) => {
            let module = Module {
                span: DUMMY_SP,
                body: vec![ModuleItem::Stmt(Stmt::Decl(Decl::Class(class_decl.clone())))],
                shebang: None,
            };
            module_to_code(source_map, &module)
        }
        _ => String::new(),
    }
}
