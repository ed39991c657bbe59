//! Pipeline driver.
//!
//! One call takes an entry path through fetch → parse → resolve → graph
//! build → macro expansion → tree shake → emit and returns the bundle
//! segments plus the bookkeeping the CLI and watch mode need.

use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::{
    code_generator::{self, BundleCode},
    config::Config,
    errors::{BundleError, Result},
    macro_engine::MacroEngine,
    module_registry::ModuleRegistry,
    resolver::{scheme_of, UriScheme},
    source_graph::SourceGraph,
    tree_shaking::TreeShaker,
};

#[derive(Debug)]
pub struct BundleOutput {
    pub bundle: BundleCode,
    /// Local files the surviving graph references; the watch driver's
    /// observation set.
    pub watch_files: Vec<PathBuf>,
    /// URLs fetched over the network during this bundle.
    pub fetched_urls: Vec<String>,
}

/// Bundle the entry module into a single executable source unit.
pub fn bundle_entry(entry: &Path, config: &Config) -> Result<BundleOutput> {
    let entry_uri = absolutize(entry)?;
    info!("bundling {entry_uri}");

    let registry = ModuleRegistry::new(config.clone())?;
    let mut graph = SourceGraph::load(&entry_uri, registry)?;

    let expanded = MacroEngine::from_config(config).expand(&mut graph)?;
    if expanded > 0 {
        debug!("macro expansion replaced {expanded} call site(s)");
    }

    let shaker = TreeShaker::analyze(&graph);
    debug!(
        "emitting {} declaration(s)",
        shaker.surviving_count(&graph)
    );

    let bundle = code_generator::emit(&graph)?;

    let mut watch_files: Vec<PathBuf> = graph
        .graph
        .node_indices()
        .filter(|&nx| shaker.is_reachable(nx))
        .map(|nx| graph.graph[nx].uri.clone())
        .filter(|uri| scheme_of(uri) == UriScheme::File)
        .map(PathBuf::from)
        .collect();
    watch_files.sort();
    watch_files.dedup();

    Ok(BundleOutput {
        bundle,
        watch_files,
        fetched_urls: graph.registry.fetched_urls().to_vec(),
    })
}

fn absolutize(entry: &Path) -> Result<String> {
    let absolute = if entry.is_absolute() {
        entry.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| BundleError::io(entry.display().to_string(), e))?
            .join(entry)
    };
    Ok(absolute.to_string_lossy().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle_fixture(files: &[(&str, &str)], entry: &str) -> Result<BundleOutput> {
        let dir = tempfile::tempdir().expect("tempdir");
        for (name, source) in files {
            std::fs::write(dir.path().join(name), source).expect("write");
        }
        let config = Config {
            cache_dir: dir.path().join(".cache"),
            ..Config::default()
        };
        bundle_entry(&dir.path().join(entry), &config)
    }

    #[test]
    fn unused_exports_do_not_reach_the_bundle() {
        let output = bundle_fixture(
            &[
                (
                    "entry.ts",
                    "import { used } from \"./utils.ts\";\nexport default function () { return used(); }",
                ),
                (
                    "utils.ts",
                    r#"
export function used() { return "kept"; }
export function unused() { return "unused function - should NOT appear"; }
export function alsoUnused() { return "also unused - should NOT appear"; }
"#,
                ),
            ],
            "entry.ts",
        )
        .expect("bundle should build");

        let code = &output.bundle.code;
        assert!(code.contains("kept"));
        assert!(!code.contains("unused function - should NOT appear"));
        assert!(!code.contains("also unused - should NOT appear"));
    }

    #[test]
    fn emit_output_is_a_prefix_of_executable_output() {
        let output = bundle_fixture(
            &[(
                "entry.ts",
                "export default function main() { return 42; }",
            )],
            "entry.ts",
        )
        .expect("bundle should build");

        let executable = output.bundle.executable();
        assert!(executable.starts_with(&output.bundle.code));
        let tail = &executable[output.bundle.code.len()..];
        assert_eq!(tail, output.bundle.entry_invocation);
        assert!(tail.contains("declaration_"));
        assert!(tail.trim_end().ends_with("();"));
    }

    #[test]
    fn bundling_twice_is_byte_identical() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("entry.ts"),
            "import { a } from \"./a.ts\";\nexport default function () { return a() + 1; }",
        )
        .expect("write");
        std::fs::write(
            dir.path().join("a.ts"),
            "import { b } from \"./b.ts\";\nexport function a() { return b(); }",
        )
        .expect("write");
        std::fs::write(dir.path().join("b.ts"), "export function b() { return 7; }")
            .expect("write");
        let config = Config {
            cache_dir: dir.path().join(".cache"),
            ..Config::default()
        };

        let first = bundle_entry(&dir.path().join("entry.ts"), &config).expect("first bundle");
        let second = bundle_entry(&dir.path().join("entry.ts"), &config).expect("second bundle");
        assert_eq!(first.bundle.executable(), second.bundle.executable());
    }

    #[test]
    fn bundle_has_no_import_statements() {
        let output = bundle_fixture(
            &[
                (
                    "entry.ts",
                    r#"
import { log } from "host://console";
import { helper } from "./helper.ts";
export default function () { log(helper()); }
"#,
                ),
                ("helper.ts", "export function helper() { return \"hi\"; }"),
            ],
            "entry.ts",
        )
        .expect("bundle should build");

        let code = &output.bundle.code;
        assert!(!code.contains("import "));
        assert!(code.contains("__host_console"));
    }

    #[test]
    fn macro_calls_vanish_from_emitted_output() {
        let output = bundle_fixture(
            &[
                (
                    "entry.ts",
                    r#"
import { createMacro } from "./macro-lib.ts";
import { log } from "host://console";
const addOne = createMacro((arg) => ({ expression: "(" + arg.expression + ") + 1", references: new Map() }));
export default function () { log(addOne(5)); }
"#,
                ),
                (
                    "macro-lib.ts",
                    "export function createMacro(fn) { throw new Error(\"CreateMacroUnexpanded: macro survived bundling\"); }",
                ),
            ],
            "entry.ts",
        )
        .expect("bundle should build");

        let code = &output.bundle.code;
        assert!(code.contains("5) + 1"), "bundle: {code}");
        assert!(!code.contains("createMacro"));
        assert!(!code.contains("addOne"));
    }

    #[test]
    fn watch_files_cover_every_local_module() {
        let output = bundle_fixture(
            &[
                (
                    "entry.ts",
                    "import { helper } from \"./helper.ts\";\nexport default function () { return helper(); }",
                ),
                ("helper.ts", "export function helper() { return 1; }"),
            ],
            "entry.ts",
        )
        .expect("bundle should build");

        assert_eq!(output.watch_files.len(), 2);
        assert!(output
            .watch_files
            .iter()
            .any(|p| p.ends_with("entry.ts")));
        assert!(output
            .watch_files
            .iter()
            .any(|p| p.ends_with("helper.ts")));
    }

    #[test]
    fn missing_import_errors_name_the_symbol() {
        let err = bundle_fixture(
            &[
                (
                    "entry.ts",
                    "import { doesNotExist } from \"./x.ts\";\nexport default function () { return doesNotExist; }",
                ),
                ("x.ts", "export const somethingElse = 1;"),
            ],
            "entry.ts",
        )
        .expect_err("missing export should fail");
        assert!(err.to_string().contains("doesNotExist"));
    }
}
