//! The declaration graph.
//!
//! A worklist walk from the entry module's default export discovers every
//! transitively referenced declaration. Nodes are declarations keyed by
//! canonical name; edges carry the identifier as written at the referring
//! site. The graph is a directed multigraph and may contain cycles
//! (mutual recursion); emission deals with ordering.

use std::collections::VecDeque;

use deno_ast::swc::{
    ast::{CallExpr, Callee, Expr, Ident},
    common::{Globals, Mark, SyntaxContext, DUMMY_SP, GLOBALS},
};
use log::{debug, trace};
use petgraph::{
    graph::{DiGraph, NodeIndex},
    Direction::Outgoing,
};
use rustc_hash::FxHashSet;

use crate::{
    declaration::{CanonicalName, Declaration},
    errors::{BundleError, Result},
    export_resolver::{all_export_names, resolve_export, resolve_local, ResolvedSymbol},
    module_record::FxIndexMap,
    module_registry::ModuleRegistry,
    resolver::is_host_uri,
    visitors::reference_collector,
};

/// JavaScript globals the runtime provides; references to these never
/// become graph edges.
pub fn is_js_global(name: &str) -> bool {
    matches!(
        name,
        "Promise"
            | "Object"
            | "Array"
            | "JSON"
            | "Math"
            | "Number"
            | "String"
            | "Boolean"
            | "Symbol"
            | "Date"
            | "Error"
            | "Map"
            | "Set"
            | "RegExp"
            | "URL"
            | "URLSearchParams"
            | "Request"
            | "Response"
            | "Headers"
            | "Uint8Array"
            | "ArrayBuffer"
            | "AbortController"
            | "AbortSignal"
            | "console"
            | "globalThis"
            | "undefined"
            | "null"
            | "NaN"
            | "Infinity"
    )
}

/// Timer names double as globals and as `host://time` exports; both sites
/// share the host capability identity.
fn timer_host_export(name: &str) -> Option<&str> {
    match name {
        "setTimeout" | "clearTimeout" | "setInterval" | "clearInterval" => Some(name),
        _ => None,
    }
}

/// Internal name of a namespace object node. Never collides with real
/// declarations because `*` cannot appear in an identifier.
const NAMESPACE_NODE_NAME: &str = "*namespace*";

/// Name of the synthetic graph root (the entry invocation expression).
const ROOT_NODE_NAME: &str = "*entry*";

#[derive(Debug)]
pub struct DeclarationNode {
    /// Defining module of this declaration (resolved through any chain).
    pub uri: String,
    /// Original name in the defining module.
    pub name: String,
    pub declaration: Declaration,
    /// Reference names introduced by macro expansion results; these
    /// override lexical resolution when the node's edges are recomputed.
    pub injected_refs: FxIndexMap<String, CanonicalName>,
}

impl DeclarationNode {
    pub fn canonical(&self) -> CanonicalName {
        CanonicalName::new(self.uri.clone(), self.name.clone())
    }
}

pub struct SourceGraph {
    pub graph: DiGraph<DeclarationNode, String>,
    pub root: NodeIndex,
    pub registry: ModuleRegistry,
    pub globals: Globals,
    pub unresolved_mark: Mark,
    definitions: FxIndexMap<CanonicalName, NodeIndex>,
    processed: FxHashSet<NodeIndex>,
}

impl SourceGraph {
    /// Build the graph from the entry module's default export.
    pub fn load(entry_uri: &str, registry: ModuleRegistry) -> Result<Self> {
        let globals = Globals::default();
        let unresolved_mark = GLOBALS.set(&globals, Mark::new);

        let mut graph = DiGraph::new();
        let root = graph.add_node(DeclarationNode {
            uri: entry_uri.to_string(),
            name: ROOT_NODE_NAME.to_string(),
            declaration: Declaration::Expr(entry_invocation()),
            injected_refs: FxIndexMap::default(),
        });

        let mut this = Self {
            graph,
            root,
            registry,
            globals,
            unresolved_mark,
            definitions: FxIndexMap::default(),
            processed: FxHashSet::default(),
        };
        this.process_from(vec![root])?;
        debug!(
            "declaration graph built: {} nodes, {} edges",
            this.graph.node_count(),
            this.graph.edge_count()
        );
        Ok(this)
    }

    /// Process every queued node exactly once, breadth-first. Newly
    /// discovered declarations join the queue; discovery order fixes node
    /// indices and therefore emit names.
    pub fn process_from(&mut self, nodes: Vec<NodeIndex>) -> Result<()> {
        let mut queue: VecDeque<NodeIndex> = nodes.into();
        while let Some(nx) = queue.pop_front() {
            if !self.processed.insert(nx) {
                continue;
            }
            let created = self.connect_references(nx)?;
            queue.extend(created);
        }
        Ok(())
    }

    /// Recompute a node's outgoing edges after its AST was rewritten by
    /// macro expansion. Returns the nodes created along the way; the
    /// caller queues them through `process_from`.
    pub fn refresh_node(&mut self, nx: NodeIndex) -> Result<Vec<NodeIndex>> {
        while let Some(edge) = self.graph.first_edge(nx, Outgoing) {
            self.graph.remove_edge(edge);
        }
        self.connect_references(nx)
    }

    /// Local reference map of a node: identifier-as-written to the target
    /// node, derived from the graph edges.
    pub fn local_references(&self, nx: NodeIndex) -> FxIndexMap<String, NodeIndex> {
        let mut map = FxIndexMap::default();
        for edge in self.graph.edges_directed(nx, Outgoing) {
            use petgraph::visit::EdgeRef;
            map.insert(edge.weight().clone(), edge.target());
        }
        map
    }

    fn connect_references(&mut self, nx: NodeIndex) -> Result<Vec<NodeIndex>> {
        if let Declaration::Namespace { target_uri } = &self.graph[nx].declaration {
            let target_uri = target_uri.clone();
            return self.connect_namespace(nx, &target_uri);
        }

        let uri = self.graph[nx].uri.clone();
        let is_root = nx == self.root;
        let injected = self.graph[nx].injected_refs.clone();

        let references = {
            let node = &mut self.graph[nx];
            reference_collector::references_of(
                &mut node.declaration,
                &self.globals,
                self.unresolved_mark,
            )
        };
        trace!(
            "{}#{}: references {:?}",
            uri,
            self.graph[nx].name,
            references
        );

        let mut created = Vec::new();
        for ident in references {
            if is_js_global(&ident) {
                continue;
            }

            let symbol = if let Some(canonical) = injected.get(&ident) {
                symbol_for_canonical(canonical)
            } else if let Some(export) = timer_host_export(&ident) {
                ResolvedSymbol::Host {
                    namespace: "time".to_string(),
                    export: export.to_string(),
                }
            } else if is_root {
                resolve_export(&mut self.registry, &uri, &ident)?
            } else {
                match resolve_local(&mut self.registry, &uri, &ident)? {
                    Some(symbol) => symbol,
                    None => {
                        return Err(BundleError::UnresolvedReference {
                            scope: uri,
                            name: ident,
                        });
                    }
                }
            };

            let (target, is_new) = self.ensure_symbol_node(symbol)?;
            self.graph.add_edge(nx, target, ident.clone());
            if is_new {
                created.push(target);
            }
        }
        Ok(created)
    }

    fn connect_namespace(&mut self, nx: NodeIndex, target_uri: &str) -> Result<Vec<NodeIndex>> {
        let names = all_export_names(&mut self.registry, target_uri)?;
        let mut created = Vec::new();
        for name in names {
            let symbol = resolve_export(&mut self.registry, target_uri, &name)?;
            let (target, is_new) = self.ensure_symbol_node(symbol)?;
            self.graph.add_edge(nx, target, name);
            if is_new {
                created.push(target);
            }
        }
        Ok(created)
    }

    fn ensure_symbol_node(&mut self, symbol: ResolvedSymbol) -> Result<(NodeIndex, bool)> {
        let (canonical, build): (CanonicalName, Box<dyn FnOnce(&mut Self) -> Result<Declaration>>) =
            match symbol {
                ResolvedSymbol::Declaration(canonical) => {
                    let for_build = canonical.clone();
                    (
                        canonical,
                        Box::new(move |this: &mut Self| this.materialize(&for_build)),
                    )
                }
                ResolvedSymbol::Host { namespace, export } => {
                    let canonical =
                        CanonicalName::new(format!("host://{namespace}"), export.clone());
                    (
                        canonical,
                        Box::new(move |_| {
                            Ok(Declaration::HostBinding { namespace, export })
                        }),
                    )
                }
                ResolvedSymbol::Namespace { target_uri } => {
                    let canonical = CanonicalName::new(target_uri.clone(), NAMESPACE_NODE_NAME);
                    (
                        canonical,
                        Box::new(move |_| Ok(Declaration::Namespace { target_uri })),
                    )
                }
            };

        if let Some(&existing) = self.definitions.get(&canonical) {
            return Ok((existing, false));
        }

        let declaration = build(self)?;
        if declaration.is_macro() {
            debug!("macro declaration discovered: {canonical}");
        }
        let node = DeclarationNode {
            uri: canonical.uri.clone(),
            name: canonical.name.clone(),
            declaration,
            injected_refs: FxIndexMap::default(),
        };
        let nx = self.graph.add_node(node);
        self.definitions.insert(canonical, nx);
        Ok((nx, true))
    }

    /// Load the declaration a canonical name points at, promoting
    /// `createMacro(...)` bindings to macro declarations when the callee
    /// really resolves to `createMacro`.
    fn materialize(&mut self, canonical: &CanonicalName) -> Result<Declaration> {
        self.registry.ensure(&canonical.uri)?;
        let seed = self
            .registry
            .get(&canonical.uri)
            .expect("ensured above")
            .declarations
            .get(&canonical.name)
            .cloned()
            .ok_or_else(|| BundleError::MissingExport {
                module: canonical.uri.clone(),
                name: canonical.name.clone(),
            })?;

        if let Some(body) = seed.macro_candidate {
            if self.create_macro_in_scope(&canonical.uri)? {
                return Ok(Declaration::Macro { body });
            }
        }
        Ok(seed.declaration)
    }

    /// `createMacro` must resolve (through any chain) to a declaration of
    /// that name for a binding site to count as a macro definition.
    fn create_macro_in_scope(&mut self, uri: &str) -> Result<bool> {
        match resolve_local(&mut self.registry, uri, "createMacro") {
            Ok(Some(ResolvedSymbol::Declaration(canonical))) => {
                Ok(canonical.name == "createMacro")
            }
            Ok(_) => Ok(false),
            // A missing createMacro import surfaces later as an
            // unresolved reference on the binding itself.
            Err(_) => Ok(false),
        }
    }
}

fn symbol_for_canonical(canonical: &CanonicalName) -> ResolvedSymbol {
    if is_host_uri(&canonical.uri) {
        let namespace = canonical
            .uri
            .strip_prefix("host://")
            .unwrap_or_default()
            .to_string();
        ResolvedSymbol::Host {
            namespace,
            export: canonical.name.clone(),
        }
    } else {
        ResolvedSymbol::Declaration(canonical.clone())
    }
}

/// The driver expression the graph is rooted at: `default()`.
fn entry_invocation() -> Box<Expr> {
    Box::new(Expr::Call(CallExpr {
        span: DUMMY_SP,
        ctxt: SyntaxContext::empty(),
        callee: Callee::Expr(Box::new(Expr::Ident(Ident::new(
            "default".into(),
            DUMMY_SP,
            SyntaxContext::empty(),
        )))),
        type_args: None,
        args: vec![],
    }))
}
