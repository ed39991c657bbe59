//! The declaration data model.
//!
//! Declarations are the atoms of bundling: the graph is keyed by them,
//! tree shaking keeps or drops them, and emission renames them. Identity
//! throughout the pipeline is the canonical `(uri, name)` pair of the
//! defining module — aliases never fork identity.

use std::fmt;

use deno_ast::swc::ast::{ClassDecl, Expr, FnDecl};
use serde::{Deserialize, Serialize};

/// `(uri, name)` pair uniquely identifying a declaration, independent of
/// how imports alias it along the way.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CanonicalName {
    pub uri: String,
    pub name: String,
}

impl CanonicalName {
    pub fn new(uri: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for CanonicalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.uri, self.name)
    }
}

/// Whether a variable binding was declared `const` or `let`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    Const,
    Let,
}

/// An emittable (or deliberately non-emitted) top-level binding.
#[derive(Debug, Clone)]
pub enum Declaration {
    /// A bare expression; only the graph root (the entry invocation) uses
    /// this.
    Expr(Box<Expr>),
    /// `function f(...) {...}`
    Fn(FnDecl),
    /// `class C {...}`
    Class(ClassDecl),
    /// `const x = init` / `let x` binding.
    VarInit {
        kind: BindingKind,
        init: Option<Box<Expr>>,
    },
    /// Anonymous default export: `export default <expr>`.
    DefaultExpr(Box<Expr>),
    /// Binding whose initializer is `createMacro(fn)`; holds the macro
    /// body. Never emitted — call sites are replaced at bundle time.
    Macro { body: Box<Expr> },
    /// Interface or type alias; participates in resolution, never emitted.
    TypeOnly,
    /// `import * as ns` object over another module's exports.
    Namespace { target_uri: String },
    /// One export of a `host://` module, bound via the bundle preamble.
    HostBinding { namespace: String, export: String },
}

impl Declaration {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Declaration::Expr(_) => "expression",
            Declaration::Fn(_) => "function",
            Declaration::Class(_) => "class",
            Declaration::VarInit {
                kind: BindingKind::Const,
                ..
            } => "const-binding",
            Declaration::VarInit {
                kind: BindingKind::Let,
                ..
            } => "let-binding",
            Declaration::DefaultExpr(_) => "default-export-expression",
            Declaration::Macro { .. } => "macro",
            Declaration::TypeOnly => "type-only",
            Declaration::Namespace { .. } => "namespace",
            Declaration::HostBinding { .. } => "host-binding",
        }
    }

    pub fn is_macro(&self) -> bool {
        matches!(self, Declaration::Macro { .. })
    }

    /// Declarations that produce output text. Macros and type-only
    /// declarations vanish from the bundle.
    pub fn is_emittable(&self) -> bool {
        !matches!(self, Declaration::Macro { .. } | Declaration::TypeOnly)
    }
}
