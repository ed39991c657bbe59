//! Cross-module export resolution.
//!
//! For every `(module, name)` the bundler cares about, chase re-export
//! chains, import aliases and star re-exports until the *defining*
//! declaration (or a `host://` synthetic export) is found. The canonical
//! name recorded at the destination is the identity used by the graph,
//! the macro engine and the emitter — aliases never fork it.

use indexmap::IndexSet;
use log::trace;

use crate::{
    declaration::CanonicalName,
    errors::{BundleError, Result},
    host_modules,
    module_record::{ExportTarget, ImportedName, ReExportName},
    module_registry::ModuleRegistry,
    resolver::{is_host_uri, resolve_specifier},
};

/// Where a symbol ultimately lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedSymbol {
    /// A declaration defined in a source module.
    Declaration(CanonicalName),
    /// An export of a synthetic `host://` module.
    Host { namespace: String, export: String },
    /// A whole-module namespace object (`import * as ns`).
    Namespace { target_uri: String },
}

/// Resolve the export `name` of module `uri` to its defining symbol.
pub fn resolve_export(registry: &mut ModuleRegistry, uri: &str, name: &str) -> Result<ResolvedSymbol> {
    let mut visited = IndexSet::new();
    resolve_export_inner(registry, uri, name, &mut visited)?.ok_or_else(|| {
        BundleError::MissingExport {
            module: uri.to_string(),
            name: name.to_string(),
        }
    })
}

/// Resolve a local identifier of `uri` — a module-level declaration or an
/// import binding. Returns `None` when the name is not in module scope.
pub fn resolve_local(
    registry: &mut ModuleRegistry,
    uri: &str,
    ident: &str,
) -> Result<Option<ResolvedSymbol>> {
    let mut visited = IndexSet::new();
    resolve_local_inner(registry, uri, ident, &mut visited)
}

/// Every name a namespace object over `uri` carries: explicit exports
/// (including `default`) plus star-provided names (excluding `default`).
pub fn all_export_names(registry: &mut ModuleRegistry, uri: &str) -> Result<Vec<String>> {
    let mut names: IndexSet<String> = IndexSet::new();
    let mut visited_modules: IndexSet<String> = IndexSet::new();
    collect_export_names(registry, uri, true, &mut names, &mut visited_modules)?;
    Ok(names.into_iter().collect())
}

type Visited = IndexSet<(String, String)>;

fn resolve_export_inner(
    registry: &mut ModuleRegistry,
    uri: &str,
    name: &str,
    visited: &mut Visited,
) -> Result<Option<ResolvedSymbol>> {
    let key = (uri.to_string(), name.to_string());
    if !visited.insert(key) {
        return Err(BundleError::ReExportCycle {
            module: uri.to_string(),
            name: name.to_string(),
        });
    }

    if is_host_uri(uri) {
        let namespace = host_modules::namespace_of(uri).unwrap_or_default();
        let provided = host_modules::exports_of(namespace)
            .map(|exports| exports.contains(&name))
            .unwrap_or(false);
        if !provided {
            return Ok(None);
        }
        return Ok(Some(ResolvedSymbol::Host {
            namespace: namespace.to_string(),
            export: name.to_string(),
        }));
    }

    registry.ensure(uri)?;
    let record = registry.get(uri).expect("ensured above");

    if let Some(target) = record.exports.named.get(name).cloned() {
        return match target {
            ExportTarget::Local(local) => {
                trace!("export {name} of {uri} is local binding {local}");
                resolve_local_inner(registry, uri, &local, visited)
            }
            ExportTarget::ReExport {
                specifier,
                original,
            } => {
                let target_uri = resolve_specifier(&specifier, uri, registry.config())?;
                let original_name = match original {
                    ReExportName::Named(n) => n,
                    ReExportName::Default => "default".to_string(),
                };
                resolve_export_inner(registry, &target_uri, &original_name, visited)
            }
        };
    }

    // Star re-exports union the target modules' exports, excluding the
    // default export. An explicit export always wins (handled above).
    if name == "default" {
        return Ok(None);
    }
    let stars = registry
        .get(uri)
        .expect("ensured above")
        .exports
        .stars
        .clone();
    let mut found: Vec<ResolvedSymbol> = Vec::new();
    for specifier in stars {
        let target_uri = resolve_specifier(&specifier, uri, registry.config())?;
        let mut probe_visited = visited.clone();
        if let Some(symbol) =
            resolve_export_inner(registry, &target_uri, name, &mut probe_visited)?
        {
            if !found.contains(&symbol) {
                found.push(symbol);
            }
        }
    }
    match found.len() {
        0 => Ok(None),
        1 => Ok(Some(found.pop().expect("one element"))),
        _ => Err(BundleError::AmbiguousStarExport {
            module: uri.to_string(),
            name: name.to_string(),
        }),
    }
}

fn resolve_local_inner(
    registry: &mut ModuleRegistry,
    uri: &str,
    ident: &str,
    visited: &mut Visited,
) -> Result<Option<ResolvedSymbol>> {
    registry.ensure(uri)?;
    let record = registry.get(uri).expect("ensured above");

    if record.declarations.contains_key(ident) {
        return Ok(Some(ResolvedSymbol::Declaration(CanonicalName::new(
            uri, ident,
        ))));
    }

    let Some(import) = record.find_import(ident).cloned() else {
        return Ok(None);
    };
    let target_uri = resolve_specifier(&import.specifier, uri, registry.config())?;
    match import.imported {
        ImportedName::Named(original) => {
            let resolved = resolve_export_inner(registry, &target_uri, &original, visited)?;
            match resolved {
                Some(symbol) => Ok(Some(symbol)),
                None => Err(BundleError::MissingExport {
                    module: target_uri,
                    name: original,
                }),
            }
        }
        ImportedName::Default => {
            let resolved = resolve_export_inner(registry, &target_uri, "default", visited)?;
            match resolved {
                Some(symbol) => Ok(Some(symbol)),
                None => Err(BundleError::MissingExport {
                    module: target_uri,
                    name: "default".to_string(),
                }),
            }
        }
        ImportedName::Namespace => Ok(Some(ResolvedSymbol::Namespace { target_uri })),
    }
}

fn collect_export_names(
    registry: &mut ModuleRegistry,
    uri: &str,
    include_default: bool,
    names: &mut IndexSet<String>,
    visited_modules: &mut IndexSet<String>,
) -> Result<()> {
    if !visited_modules.insert(uri.to_string()) {
        return Ok(());
    }

    if is_host_uri(uri) {
        let namespace = host_modules::namespace_of(uri).unwrap_or_default();
        if let Some(exports) = host_modules::exports_of(namespace) {
            for export in exports {
                names.insert((*export).to_string());
            }
        }
        return Ok(());
    }

    registry.ensure(uri)?;
    let record = registry.get(uri).expect("ensured above");
    let named: Vec<String> = record.exports.named.keys().cloned().collect();
    let stars = record.exports.stars.clone();

    for name in named {
        if name == "default" && !include_default {
            continue;
        }
        names.insert(name);
    }
    for specifier in stars {
        let target_uri = resolve_specifier(&specifier, uri, registry.config())?;
        collect_export_names(registry, &target_uri, false, names, visited_modules)?;
    }
    Ok(())
}
