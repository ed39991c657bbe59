//! Lowering for `using` / `await using` declarations.
//!
//! Explicit resource management is syntactic sugar for a try/finally
//! around a symbol-keyed dispose call; the target runtime is not assumed
//! to support the syntax, so every block containing a `using` declaration
//! is rewritten before codegen. Later statements move into the `try`
//! body; the `finally` block disposes in reverse declaration order.

use deno_ast::swc::{
    ast::{BlockStmt, Decl, Module, ModuleItem, Stmt, TryStmt, VarDecl, VarDeclKind},
    common::{sync::Lrc, SourceMap, SyntaxContext, DUMMY_SP},
    visit::{noop_visit_mut_type, VisitMut, VisitMutWith},
};

use crate::{
    errors::{BundleError, Result},
    parser,
};

pub struct UsingLowering {
    source_map: Lrc<SourceMap>,
    error: Option<BundleError>,
}

impl UsingLowering {
    pub fn new(source_map: Lrc<SourceMap>) -> Self {
        Self {
            source_map,
            error: None,
        }
    }

    /// The first error hit while lowering, if any.
    pub fn into_result(self) -> Result<()> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn lower_stmts(&mut self, stmts: Vec<Stmt>) -> Vec<Stmt> {
        let Some(position) = stmts
            .iter()
            .position(|stmt| matches!(stmt, Stmt::Decl(Decl::Using(_))))
        else {
            return stmts;
        };

        let mut out: Vec<Stmt> = Vec::with_capacity(position + 2);
        let mut iter = stmts.into_iter();
        for _ in 0..position {
            out.push(iter.next().expect("position is in bounds"));
        }
        let using = match iter.next() {
            Some(Stmt::Decl(Decl::Using(using))) => using,
            _ => unreachable!("position points at a using declaration"),
        };
        let rest: Vec<Stmt> = iter.collect();
        let rest = self.lower_stmts(rest);

        // Bindings survive as consts in the enclosing scope.
        out.push(Stmt::Decl(Decl::Var(Box::new(VarDecl {
            span: using.span,
            ctxt: SyntaxContext::empty(),
            kind: VarDeclKind::Const,
            declare: false,
            decls: using.decls.clone(),
        }))));

        let mut finalizer_stmts: Vec<Stmt> = Vec::new();
        for declarator in using.decls.iter().rev() {
            let name = match &declarator.name {
                deno_ast::swc::ast::Pat::Ident(binding) => binding.id.sym.to_string(),
                _ => {
                    self.error.get_or_insert(BundleError::UnsupportedSyntax {
                        uri: "(using lowering)".to_string(),
                        construct: "destructuring in a using declaration".to_string(),
                    });
                    continue;
                }
            };
            match self.dispose_stmt(&name, using.is_await) {
                Ok(stmt) => finalizer_stmts.push(stmt),
                Err(err) => {
                    self.error.get_or_insert(err);
                }
            }
        }

        out.push(Stmt::Try(Box::new(TryStmt {
            span: DUMMY_SP,
            block: BlockStmt {
                span: DUMMY_SP,
                ctxt: SyntaxContext::empty(),
                stmts: rest,
            },
            handler: None,
            finalizer: Some(BlockStmt {
                span: DUMMY_SP,
                ctxt: SyntaxContext::empty(),
                stmts: finalizer_stmts,
            }),
        })));
        out
    }

    /// Synthesize the dispose call for one binding. Parsing a template
    /// keeps the construction readable; the binding and `Symbol` names
    /// print verbatim, which is exactly what the lowered code needs.
    fn dispose_stmt(&self, name: &str, is_await: bool) -> Result<Stmt> {
        let source = if is_await {
            format!(
                "if ({name} != null) {{ const __dispose = {name}[Symbol.asyncDispose] ?? {name}[Symbol.dispose]; if (__dispose) await __dispose.call({name}); }}"
            )
        } else {
            format!(
                "if ({name} != null) {{ const __dispose = {name}[Symbol.dispose]; if (__dispose) __dispose.call({name}); }}"
            )
        };
        let module = parser::parse_module(&self.source_map, "(using lowering)", &source)?;
        let Some(ModuleItem::Stmt(stmt)) = module.body.into_iter().next() else {
            return Err(BundleError::EmitOrderingConflict {
                detail: "using lowering template produced no statement".to_string(),
            });
        };
        Ok(stmt)
    }
}

impl VisitMut for UsingLowering {
    noop_visit_mut_type!();

    fn visit_mut_block_stmt(&mut self, block: &mut BlockStmt) {
        block.visit_mut_children_with(self);
        if block
            .stmts
            .iter()
            .any(|stmt| matches!(stmt, Stmt::Decl(Decl::Using(_))))
        {
            let stmts = std::mem::take(&mut block.stmts);
            block.stmts = self.lower_stmts(stmts);
        }
    }
}

/// Lower `using` declarations inside a whole module body (test helper and
/// future module-level support share this path).
pub fn lower_module(source_map: &Lrc<SourceMap>, module: &mut Module) -> Result<()> {
    let mut lowering = UsingLowering::new(source_map.clone());
    module.visit_mut_with(&mut lowering);
    lowering.into_result()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowers_await_using_to_try_finally() {
        let cm: Lrc<SourceMap> = Lrc::new(SourceMap::default());
        let mut module = parser::parse_module(
            &cm,
            "/test/using.ts",
            r#"
async function run() {
    await using dir = makeTempDir();
    work(dir);
    return done(dir);
}
"#,
        )
        .expect("module should parse");

        lower_module(&cm, &mut module).expect("lowering should succeed");
        let code = crate::code_generator::module_to_code(&cm, &module);

        assert!(code.contains("const dir = makeTempDir()"));
        assert!(code.contains("try {"));
        assert!(code.contains("finally"));
        assert!(code.contains("Symbol.asyncDispose"));
        assert!(code.contains("await __dispose.call(dir)"));
        assert!(!code.contains("using dir"));
    }

    #[test]
    fn sync_using_does_not_await() {
        let cm: Lrc<SourceMap> = Lrc::new(SourceMap::default());
        let mut module = parser::parse_module(
            &cm,
            "/test/using-sync.ts",
            "function run() { using handle = open(); return read(handle); }",
        )
        .expect("module should parse");

        lower_module(&cm, &mut module).expect("lowering should succeed");
        let code = crate::code_generator::module_to_code(&cm, &module);
        assert!(code.contains("Symbol.dispose"));
        assert!(!code.contains("asyncDispose"));
        assert!(!code.contains("await"));
    }
}
