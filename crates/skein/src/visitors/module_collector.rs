//! Module table collection.
//!
//! One linear pass over a parsed module's top-level items produces the
//! export table, the import table and the declaration seeds. Only
//! top-level bindings become declarations; statement-level code inside a
//! module body is not part of the declaration-keyed walk.

use deno_ast::swc::ast::{
    ClassDecl, Decl, DefaultDecl, ExportSpecifier, Expr, FnDecl, ImportSpecifier, Module,
    ModuleDecl, ModuleExportName, ModuleItem, VarDecl, VarDeclKind,
};

use crate::{
    declaration::{BindingKind, Declaration},
    errors::{BundleError, Result},
    module_record::{
        DeclarationSeed, ExportTable, ExportTarget, FxIndexMap, ImportRecord, ImportedName,
        ReExportName,
    },
};

pub struct ModuleTables {
    pub exports: ExportTable,
    pub imports: Vec<ImportRecord>,
    pub side_effect_imports: Vec<String>,
    pub declarations: FxIndexMap<String, DeclarationSeed>,
}

pub fn collect(uri: &str, module: &Module) -> Result<ModuleTables> {
    let mut collector = Collector {
        uri,
        tables: ModuleTables {
            exports: ExportTable::default(),
            imports: Vec::new(),
            side_effect_imports: Vec::new(),
            declarations: FxIndexMap::default(),
        },
    };

    for item in &module.body {
        match item {
            ModuleItem::ModuleDecl(decl) => collector.collect_module_decl(decl)?,
            ModuleItem::Stmt(stmt) => {
                if let deno_ast::swc::ast::Stmt::Decl(decl) = stmt {
                    collector.collect_decl(decl, false)?;
                }
                // Other top-level statements are side effects the
                // declaration walk never reaches.
            }
        }
    }

    Ok(collector.tables)
}

struct Collector<'a> {
    uri: &'a str,
    tables: ModuleTables,
}

impl Collector<'_> {
    fn collect_module_decl(&mut self, decl: &ModuleDecl) -> Result<()> {
        match decl {
            ModuleDecl::Import(import) => self.collect_import(import),
            ModuleDecl::ExportDecl(export) => self.collect_decl(&export.decl, true),
            ModuleDecl::ExportNamed(named) => self.collect_named_export(named),
            ModuleDecl::ExportDefaultDecl(default_decl) => {
                self.collect_default_decl(&default_decl.decl)
            }
            ModuleDecl::ExportDefaultExpr(default_expr) => {
                self.add_declaration(
                    "default",
                    Declaration::DefaultExpr(default_expr.expr.clone()),
                    detect_macro_candidate(&default_expr.expr),
                )?;
                self.export_local("default", "default");
                Ok(())
            }
            ModuleDecl::ExportAll(star) => {
                if !star.type_only {
                    self.tables.exports.stars.push(star.src.value.to_string());
                }
                Ok(())
            }
            ModuleDecl::TsImportEquals(_)
            | ModuleDecl::TsExportAssignment(_)
            | ModuleDecl::TsNamespaceExport(_) => Err(self.unsupported("TypeScript module assignment")),
        }
    }

    fn collect_import(&mut self, import: &deno_ast::swc::ast::ImportDecl) -> Result<()> {
        let specifier = import.src.value.to_string();
        if import.specifiers.is_empty() {
            self.tables.side_effect_imports.push(specifier);
            return Ok(());
        }

        for spec in &import.specifiers {
            let record = match spec {
                ImportSpecifier::Named(named) => {
                    let imported_name = named
                        .imported
                        .as_ref()
                        .map(export_name_text)
                        .unwrap_or_else(|| named.local.sym.to_string());
                    let imported = if imported_name == "default" {
                        ImportedName::Default
                    } else {
                        ImportedName::Named(imported_name)
                    };
                    ImportRecord {
                        local: named.local.sym.to_string(),
                        specifier: specifier.clone(),
                        imported,
                        type_only: import.type_only || named.is_type_only,
                    }
                }
                ImportSpecifier::Default(default) => ImportRecord {
                    local: default.local.sym.to_string(),
                    specifier: specifier.clone(),
                    imported: ImportedName::Default,
                    type_only: import.type_only,
                },
                ImportSpecifier::Namespace(star) => ImportRecord {
                    local: star.local.sym.to_string(),
                    specifier: specifier.clone(),
                    imported: ImportedName::Namespace,
                    type_only: import.type_only,
                },
            };
            self.tables.imports.push(record);
        }
        Ok(())
    }

    fn collect_named_export(&mut self, named: &deno_ast::swc::ast::NamedExport) -> Result<()> {
        if named.type_only {
            return Ok(());
        }
        let source = named.src.as_ref().map(|s| s.value.to_string());

        for spec in &named.specifiers {
            match spec {
                ExportSpecifier::Named(entry) => {
                    let original = export_name_text(&entry.orig);
                    let exported = entry
                        .exported
                        .as_ref()
                        .map(export_name_text)
                        .unwrap_or_else(|| original.clone());
                    let target = match &source {
                        Some(specifier) => ExportTarget::ReExport {
                            specifier: specifier.clone(),
                            original: if original == "default" {
                                ReExportName::Default
                            } else {
                                ReExportName::Named(original)
                            },
                        },
                        None => ExportTarget::Local(original),
                    };
                    self.tables.exports.named.insert(exported, target);
                }
                ExportSpecifier::Namespace(_) => {
                    return Err(self.unsupported("namespace re-export (export * as ns from ...)"));
                }
                ExportSpecifier::Default(_) => {
                    return Err(self.unsupported("default export shorthand re-export"));
                }
            }
        }
        Ok(())
    }

    fn collect_default_decl(&mut self, decl: &DefaultDecl) -> Result<()> {
        match decl {
            DefaultDecl::Fn(fn_expr) => match &fn_expr.ident {
                Some(ident) => {
                    let name = ident.sym.to_string();
                    self.add_declaration(
                        &name,
                        Declaration::Fn(FnDecl {
                            ident: ident.clone(),
                            declare: false,
                            function: fn_expr.function.clone(),
                        }),
                        None,
                    )?;
                    self.export_local("default", &name);
                }
                None => {
                    self.add_declaration(
                        "default",
                        Declaration::DefaultExpr(Box::new(Expr::Fn(fn_expr.clone()))),
                        None,
                    )?;
                    self.export_local("default", "default");
                }
            },
            DefaultDecl::Class(class_expr) => match &class_expr.ident {
                Some(ident) => {
                    let name = ident.sym.to_string();
                    self.add_declaration(
                        &name,
                        Declaration::Class(ClassDecl {
                            ident: ident.clone(),
                            declare: false,
                            class: class_expr.class.clone(),
                        }),
                        None,
                    )?;
                    self.export_local("default", &name);
                }
                None => {
                    self.add_declaration(
                        "default",
                        Declaration::DefaultExpr(Box::new(Expr::Class(class_expr.clone()))),
                        None,
                    )?;
                    self.export_local("default", "default");
                }
            },
            DefaultDecl::TsInterfaceDecl(interface) => {
                let name = interface.id.sym.to_string();
                self.add_declaration(&name, Declaration::TypeOnly, None)?;
                self.export_local("default", &name);
            }
        }
        Ok(())
    }

    fn collect_decl(&mut self, decl: &Decl, exported: bool) -> Result<()> {
        match decl {
            Decl::Fn(fn_decl) => {
                if fn_decl.declare {
                    return Ok(());
                }
                let name = fn_decl.ident.sym.to_string();
                self.add_declaration(&name, Declaration::Fn(fn_decl.clone()), None)?;
                if exported {
                    self.export_local(&name, &name);
                }
                Ok(())
            }
            Decl::Class(class_decl) => {
                if class_decl.declare {
                    return Ok(());
                }
                let name = class_decl.ident.sym.to_string();
                self.add_declaration(&name, Declaration::Class(class_decl.clone()), None)?;
                if exported {
                    self.export_local(&name, &name);
                }
                Ok(())
            }
            Decl::Var(var) => self.collect_var(var, exported),
            Decl::TsInterface(interface) => {
                let name = interface.id.sym.to_string();
                self.add_declaration(&name, Declaration::TypeOnly, None)?;
                if exported {
                    self.export_local(&name, &name);
                }
                Ok(())
            }
            Decl::TsTypeAlias(alias) => {
                let name = alias.id.sym.to_string();
                self.add_declaration(&name, Declaration::TypeOnly, None)?;
                if exported {
                    self.export_local(&name, &name);
                }
                Ok(())
            }
            Decl::TsEnum(ts_enum) => Err(self.unsupported(&format!(
                "TypeScript enum '{}'",
                ts_enum.id.sym
            ))),
            Decl::TsModule(_) => Err(self.unsupported("TypeScript namespace")),
            Decl::Using(_) => Err(self.unsupported("top-level using declaration")),
        }
    }

    fn collect_var(&mut self, var: &VarDecl, exported: bool) -> Result<()> {
        if var.declare {
            return Ok(());
        }
        let kind = match var.kind {
            VarDeclKind::Const => BindingKind::Const,
            VarDeclKind::Let | VarDeclKind::Var => BindingKind::Let,
        };
        for declarator in &var.decls {
            let binding = match &declarator.name {
                deno_ast::swc::ast::Pat::Ident(binding) => binding,
                _ => return Err(self.unsupported("destructuring in a top-level binding")),
            };
            let name = binding.id.sym.to_string();
            let macro_candidate = declarator
                .init
                .as_deref()
                .and_then(detect_macro_candidate);
            self.add_declaration(
                &name,
                Declaration::VarInit {
                    kind,
                    init: declarator.init.clone(),
                },
                macro_candidate,
            )?;
            if exported {
                self.export_local(&name, &name);
            }
        }
        Ok(())
    }

    fn add_declaration(
        &mut self,
        name: &str,
        declaration: Declaration,
        macro_candidate: Option<Box<Expr>>,
    ) -> Result<()> {
        if self.tables.declarations.contains_key(name) {
            return Err(BundleError::DuplicateDeclaration {
                uri: self.uri.to_string(),
                name: name.to_string(),
            });
        }
        self.tables.declarations.insert(
            name.to_string(),
            DeclarationSeed {
                declaration,
                macro_candidate,
            },
        );
        Ok(())
    }

    fn export_local(&mut self, exported: &str, local: &str) {
        self.tables
            .exports
            .named
            .insert(exported.to_string(), ExportTarget::Local(local.to_string()));
    }

    fn unsupported(&self, construct: &str) -> BundleError {
        BundleError::UnsupportedSyntax {
            uri: self.uri.to_string(),
            construct: construct.to_string(),
        }
    }
}

/// `createMacro(fn)` at a binding site, detected syntactically. The graph
/// build later verifies that the callee actually resolves to the
/// `createMacro` symbol before promoting the seed to a macro.
fn detect_macro_candidate(init: &Expr) -> Option<Box<Expr>> {
    let Expr::Call(call) = init else {
        return None;
    };
    let deno_ast::swc::ast::Callee::Expr(callee) = &call.callee else {
        return None;
    };
    let Expr::Ident(ident) = callee.as_ref() else {
        return None;
    };
    if ident.sym.as_ref() != "createMacro" {
        return None;
    }
    let first = call.args.first()?;
    if first.spread.is_some() {
        return None;
    }
    Some(first.expr.clone())
}

fn export_name_text(name: &ModuleExportName) -> String {
    match name {
        ModuleExportName::Ident(ident) => ident.sym.to_string(),
        ModuleExportName::Str(s) => s.value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use deno_ast::swc::common::{sync::Lrc, SourceMap};

    use super::*;
    use crate::parser::parse_module;

    fn tables_for(source: &str) -> ModuleTables {
        let cm: Lrc<SourceMap> = Lrc::new(SourceMap::default());
        let module = parse_module(&cm, "/test/mod.ts", source).expect("module should parse");
        collect("/test/mod.ts", &module).expect("collection should succeed")
    }

    #[test]
    fn collects_exports_imports_and_declarations() {
        let tables = tables_for(
            r#"
import { helper as aliased } from "./impl.ts";
import other from "./other.ts";
import * as ns from "./ns.ts";
import "./side-effect.ts";

export const used = () => aliased();
function internal() { return other; }
export { internal as renamed };
export { a as b } from "./re.ts";
export * from "./star.ts";
export default function main() { return ns; }
"#,
        );

        assert_eq!(tables.imports.len(), 3);
        assert!(matches!(
            tables.imports[0].imported,
            ImportedName::Named(ref n) if n == "helper"
        ));
        assert_eq!(tables.imports[0].local, "aliased");
        assert!(matches!(tables.imports[1].imported, ImportedName::Default));
        assert!(matches!(tables.imports[2].imported, ImportedName::Namespace));
        assert_eq!(tables.side_effect_imports, vec!["./side-effect.ts"]);

        assert!(matches!(
            tables.exports.named.get("used"),
            Some(ExportTarget::Local(n)) if n == "used"
        ));
        assert!(matches!(
            tables.exports.named.get("renamed"),
            Some(ExportTarget::Local(n)) if n == "internal"
        ));
        assert!(matches!(
            tables.exports.named.get("b"),
            Some(ExportTarget::ReExport { specifier, original: ReExportName::Named(n) })
                if specifier == "./re.ts" && n == "a"
        ));
        assert_eq!(tables.exports.stars, vec!["./star.ts"]);
        assert!(matches!(
            tables.exports.named.get("default"),
            Some(ExportTarget::Local(n)) if n == "main"
        ));

        assert!(tables.declarations.contains_key("used"));
        assert!(tables.declarations.contains_key("internal"));
        assert!(tables.declarations.contains_key("main"));
    }

    #[test]
    fn detects_macro_candidates_at_binding_sites() {
        let tables = tables_for(
            r#"
import { createMacro } from "./macros.ts";
export const addOne = createMacro((arg) => ({ expression: "(" + arg.expression + ") + 1", references: new Map() }));
const notAMacro = somethingElse(1);
"#,
        );
        assert!(tables.declarations["addOne"].macro_candidate.is_some());
        assert!(tables.declarations["notAMacro"].macro_candidate.is_none());
    }

    #[test]
    fn anonymous_default_export_is_a_default_expression() {
        let tables = tables_for("export default async function () { return 1; }");
        assert!(matches!(
            tables.declarations["default"].declaration,
            Declaration::DefaultExpr(_)
        ));
    }

    #[test]
    fn type_only_declarations_are_recorded_but_inert() {
        let tables = tables_for(
            r#"
export interface Shape { area(): number; }
export type Alias = string;
"#,
        );
        assert!(matches!(
            tables.declarations["Shape"].declaration,
            Declaration::TypeOnly
        ));
        assert!(matches!(
            tables.declarations["Alias"].declaration,
            Declaration::TypeOnly
        ));
    }

    #[test]
    fn duplicate_declarations_are_rejected() {
        let cm: Lrc<SourceMap> = Lrc::new(SourceMap::default());
        let module = parse_module(
            &cm,
            "/test/dup.ts",
            "const x = 1;\nfunction x() {}\n",
        )
        .expect("module should parse");
        let err = collect("/test/dup.ts", &module).expect_err("duplicate should fail");
        assert!(matches!(err, BundleError::DuplicateDeclaration { .. }));
    }
}
