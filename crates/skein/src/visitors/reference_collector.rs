//! Free-identifier collection and reference renaming.
//!
//! Both passes run the swc resolver over a declaration fragment so every
//! identifier that is not bound inside the fragment carries the shared
//! unresolved mark. Collection records those identifiers in visit order;
//! renaming rewrites them to their assigned emit names.

use deno_ast::swc::{
    ast::{Expr, Ident, IdentName, KeyValueProp, Prop, PropName},
    common::{Globals, Mark, GLOBALS},
    transforms::base::resolver,
    visit::{noop_visit_mut_type, noop_visit_type, Visit, VisitMut, VisitMutWith, VisitWith},
};
use indexmap::IndexSet;
use rustc_hash::FxHashMap;

use crate::declaration::Declaration;

/// Free identifiers of a declaration body, in source order.
pub fn references_of(
    declaration: &mut Declaration,
    globals: &Globals,
    unresolved_mark: Mark,
) -> IndexSet<String> {
    match declaration {
        Declaration::Expr(expr) | Declaration::DefaultExpr(expr) => {
            collect_in(&mut **expr, globals, unresolved_mark)
        }
        Declaration::VarInit {
            init: Some(expr), ..
        } => collect_in(&mut **expr, globals, unresolved_mark),
        Declaration::Macro { body } => collect_in(&mut **body, globals, unresolved_mark),
        Declaration::Fn(fn_decl) => collect_in(&mut *fn_decl.function, globals, unresolved_mark),
        Declaration::Class(class_decl) => {
            collect_in(&mut *class_decl.class, globals, unresolved_mark)
        }
        Declaration::VarInit { init: None, .. }
        | Declaration::TypeOnly
        | Declaration::Namespace { .. }
        | Declaration::HostBinding { .. } => IndexSet::new(),
    }
}

/// Rewrite every unresolved identifier of `declaration` according to
/// `replacements` (local name → emit name).
pub fn rename_references(
    declaration: &mut Declaration,
    replacements: &FxHashMap<String, String>,
    globals: &Globals,
    unresolved_mark: Mark,
) {
    match declaration {
        Declaration::Expr(expr) | Declaration::DefaultExpr(expr) => {
            rename_in(&mut **expr, replacements, globals, unresolved_mark);
        }
        Declaration::VarInit {
            init: Some(expr), ..
        } => rename_in(&mut **expr, replacements, globals, unresolved_mark),
        Declaration::Macro { body } => rename_in(&mut **body, replacements, globals, unresolved_mark),
        Declaration::Fn(fn_decl) => {
            rename_in(&mut *fn_decl.function, replacements, globals, unresolved_mark);
        }
        Declaration::Class(class_decl) => {
            rename_in(&mut *class_decl.class, replacements, globals, unresolved_mark);
        }
        Declaration::VarInit { init: None, .. }
        | Declaration::TypeOnly
        | Declaration::Namespace { .. }
        | Declaration::HostBinding { .. } => {}
    }
}

/// Run the resolver over `ast` so unresolved identifiers carry
/// `unresolved_mark`, then collect them.
fn collect_in<T>(ast: &mut T, globals: &Globals, unresolved_mark: Mark) -> IndexSet<String>
where
    T: VisitMutWith<dyn VisitMut> + VisitWith<FreeIdentCollector>,
{
    GLOBALS.set(globals, || {
        let resolver_pass = &mut resolver(unresolved_mark, Mark::new(), true);
        ast.visit_mut_with(resolver_pass as &mut dyn VisitMut);

        let mut collector = FreeIdentCollector {
            unresolved_mark,
            references: IndexSet::new(),
        };
        ast.visit_with(&mut collector);
        collector.references
    })
}

fn rename_in<T>(
    ast: &mut T,
    replacements: &FxHashMap<String, String>,
    globals: &Globals,
    unresolved_mark: Mark,
) where
    T: VisitMutWith<dyn VisitMut> + for<'r> VisitMutWith<RenameReferences<'r>>,
{
    GLOBALS.set(globals, || {
        let resolver_pass = &mut resolver(unresolved_mark, Mark::new(), true);
        ast.visit_mut_with(resolver_pass as &mut dyn VisitMut);

        ast.visit_mut_with(&mut RenameReferences {
            unresolved_mark,
            replacements,
        });
    });
}

pub struct FreeIdentCollector {
    unresolved_mark: Mark,
    pub references: IndexSet<String>,
}

impl Visit for FreeIdentCollector {
    noop_visit_type!();

    fn visit_ident(&mut self, ident: &Ident) {
        if ident.ctxt.has_mark(self.unresolved_mark) {
            self.references.insert(ident.sym.to_string());
        }
    }
}

pub struct RenameReferences<'a> {
    unresolved_mark: Mark,
    replacements: &'a FxHashMap<String, String>,
}

impl VisitMut for RenameReferences<'_> {
    noop_visit_mut_type!();

    fn visit_mut_ident(&mut self, ident: &mut Ident) {
        if ident.ctxt.has_mark(self.unresolved_mark) {
            if let Some(new_name) = self.replacements.get(ident.sym.as_ref()) {
                ident.sym = new_name.clone().into();
            }
        }
    }

    // Shorthand properties must keep their key when the value is renamed:
    // `{ helper }` becomes `{ helper: declaration_3 }`.
    fn visit_mut_prop(&mut self, prop: &mut Prop) {
        if let Prop::Shorthand(ident) = prop {
            if ident.ctxt.has_mark(self.unresolved_mark) {
                if let Some(new_name) = self.replacements.get(ident.sym.as_ref()) {
                    *prop = Prop::KeyValue(KeyValueProp {
                        key: PropName::Ident(IdentName::new(ident.sym.clone(), ident.span)),
                        value: Box::new(Expr::Ident(Ident::new(
                            new_name.clone().into(),
                            ident.span,
                            ident.ctxt,
                        ))),
                    });
                    return;
                }
            }
        }
        prop.visit_mut_children_with(self);
    }
}

#[cfg(test)]
mod tests {
    use deno_ast::swc::common::{sync::Lrc, SourceMap};

    use super::*;
    use crate::parser::parse_expr_snippet;

    fn free_idents(code: &str) -> Vec<String> {
        let cm: Lrc<SourceMap> = Lrc::new(SourceMap::default());
        let expr = parse_expr_snippet(&cm, "(test)", code).expect("snippet should parse");
        let globals = Globals::default();
        let mark = GLOBALS.set(&globals, Mark::new);
        let mut declaration = Declaration::DefaultExpr(expr);
        references_of(&mut declaration, &globals, mark)
            .into_iter()
            .collect()
    }

    #[test]
    fn collects_free_identifiers_only() {
        let refs = free_idents("(x) => helper(x) + other");
        assert_eq!(refs, vec!["helper".to_string(), "other".to_string()]);
    }

    #[test]
    fn nested_scopes_shadow_correctly() {
        let refs = free_idents("(a) => { const b = inner(a); return (c) => b + c + outer; }");
        assert_eq!(refs, vec!["inner".to_string(), "outer".to_string()]);
    }

    #[test]
    fn renames_references_and_preserves_shorthand_keys() {
        let cm: Lrc<SourceMap> = Lrc::new(SourceMap::default());
        let expr =
            parse_expr_snippet(&cm, "(test)", "() => ({ helper, x: helper(1) })").expect("parse");
        let globals = Globals::default();
        let mark = GLOBALS.set(&globals, Mark::new);
        let mut declaration = Declaration::DefaultExpr(expr);

        let mut replacements = FxHashMap::default();
        replacements.insert("helper".to_string(), "declaration_7".to_string());
        rename_references(&mut declaration, &replacements, &globals, mark);

        let code = crate::code_generator::declaration_to_snippet(&cm, &declaration);
        assert!(code.contains("declaration_7(1)"));
        assert!(code.contains("helper: declaration_7"));
        assert!(!code.contains("helper,"));
    }
}
