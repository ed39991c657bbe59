//! Per-module record: source, AST, export/import tables and declaration
//! seeds.
//!
//! A `ModuleRecord` is what the registry stores per URI. Its tables are
//! built once at parse time by the module collector; the source graph and
//! the export resolver read them but never mutate them.

use deno_ast::swc::ast::Module;
use indexmap::IndexMap;
use rustc_hash::FxHasher;

use crate::{
    declaration::Declaration,
    errors::{BundleError, Result},
    fetcher::ModuleProvenance,
    host_modules,
    visitors::module_collector,
};

pub type FxIndexMap<K, V> = IndexMap<K, V, std::hash::BuildHasherDefault<FxHasher>>;

/// The original name a re-export points at in its source module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReExportName {
    Named(String),
    Default,
}

/// What an exported name maps to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportTarget {
    /// A binding declared in this module, under its original name.
    Local(String),
    /// `export { original as name } from "specifier"` — recorded as a
    /// reference, not materialized.
    ReExport {
        specifier: String,
        original: ReExportName,
    },
}

/// A module's export surface.
#[derive(Debug, Clone, Default)]
pub struct ExportTable {
    pub named: FxIndexMap<String, ExportTarget>,
    /// Specifiers of `export * from "..."`, in source order.
    pub stars: Vec<String>,
}

/// What an imported local name refers to in the source module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportedName {
    Named(String),
    Default,
    Namespace,
}

/// One binding introduced by an import statement.
#[derive(Debug, Clone)]
pub struct ImportRecord {
    pub local: String,
    pub specifier: String,
    pub imported: ImportedName,
    pub type_only: bool,
}

/// A top-level binding as collected from the AST, before the graph decides
/// whether it is a macro.
#[derive(Debug, Clone)]
pub struct DeclarationSeed {
    pub declaration: Declaration,
    /// Set when the initializer is syntactically `createMacro(fn)`; holds
    /// the macro body. Promoted to `Declaration::Macro` once the callee is
    /// confirmed to resolve to `createMacro`.
    pub macro_candidate: Option<Box<deno_ast::swc::ast::Expr>>,
}

#[derive(Debug)]
pub struct ModuleRecord {
    pub uri: String,
    pub source: String,
    pub ast: Option<Module>,
    pub provenance: ModuleProvenance,
    pub exports: ExportTable,
    pub imports: Vec<ImportRecord>,
    /// Bare `import "./x"` specifiers; retained for provenance only — the
    /// declaration-keyed walk pulls nothing from them.
    pub side_effect_imports: Vec<String>,
    pub declarations: FxIndexMap<String, DeclarationSeed>,
}

impl ModuleRecord {
    /// Build a record from a parsed module.
    pub fn from_ast(
        uri: &str,
        source: String,
        ast: Module,
        provenance: ModuleProvenance,
    ) -> Result<Self> {
        let tables = module_collector::collect(uri, &ast)?;
        Ok(Self {
            uri: uri.to_string(),
            source,
            ast: Some(ast),
            provenance,
            exports: tables.exports,
            imports: tables.imports,
            side_effect_imports: tables.side_effect_imports,
            declarations: tables.declarations,
        })
    }

    /// Synthesize a `host://` module from the fixed registry.
    pub fn synthetic_host(uri: &str) -> Result<Self> {
        let namespace = host_modules::namespace_of(uri).ok_or_else(|| BundleError::NotFound {
            uri: uri.to_string(),
        })?;
        let exports_list =
            host_modules::exports_of(namespace).ok_or_else(|| BundleError::NotFound {
                uri: uri.to_string(),
            })?;

        let mut exports = ExportTable::default();
        let mut declarations = FxIndexMap::default();
        for export in exports_list {
            exports
                .named
                .insert(export.to_string(), ExportTarget::Local(export.to_string()));
            declarations.insert(
                export.to_string(),
                DeclarationSeed {
                    declaration: Declaration::HostBinding {
                        namespace: namespace.to_string(),
                        export: export.to_string(),
                    },
                    macro_candidate: None,
                },
            );
        }

        Ok(Self {
            uri: uri.to_string(),
            source: String::new(),
            ast: None,
            provenance: ModuleProvenance::Synthetic,
            exports,
            imports: Vec::new(),
            side_effect_imports: Vec::new(),
            declarations,
        })
    }

    /// Find the import record binding `local`, skipping type-only imports
    /// (they never resolve in value position).
    pub fn find_import(&self, local: &str) -> Option<&ImportRecord> {
        self.imports
            .iter()
            .find(|record| record.local == local && !record.type_only)
    }
}
