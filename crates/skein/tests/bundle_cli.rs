//! End-to-end scenarios through the skein binary.

use std::{fs, path::Path, process::Command};

fn skein() -> Command {
    Command::new(env!("CARGO_BIN_EXE_skein"))
}

struct Fixture {
    dir: tempfile::TempDir,
}

impl Fixture {
    fn new(files: &[(&str, &str)]) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        for (name, source) in files {
            fs::write(dir.path().join(name), source).expect("write fixture");
        }
        Self { dir }
    }

    fn path(&self, name: &str) -> String {
        self.dir
            .path()
            .join(name)
            .to_str()
            .expect("utf-8 path")
            .to_string()
    }

    fn cache(&self) -> &Path {
        self.dir.path()
    }
}

fn run_skein(fixture: &Fixture, args: &[&str]) -> std::process::Output {
    skein()
        .args(args)
        .env("SKEIN_CACHE_DIR", fixture.cache().join(".cache"))
        .output()
        .expect("binary should run")
}

const MACRO_LIB: &str = r#"
export function createMacro(fn) { throw new Error("CreateMacroUnexpanded: macro survived bundling"); }
"#;

#[test]
fn unused_exports_are_shaken_out_of_the_emitted_bundle() {
    let fixture = Fixture::new(&[
        (
            "entry.ts",
            r#"
import { used } from "./utils.ts";
export default function () { return used(); }
"#,
        ),
        (
            "utils.ts",
            r#"
export function used() { return 1; }
export function unused() { return "unused function - should NOT appear"; }
export function alsoUnused() { return "also unused - should NOT appear"; }
"#,
        ),
    ]);

    let output = run_skein(&fixture, &["--emit", &fixture.path("entry.ts")]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let bundle = String::from_utf8_lossy(&output.stdout);
    assert!(!bundle.contains("unused function - should NOT appear"));
    assert!(!bundle.contains("also unused - should NOT appear"));
    assert!(!bundle.contains("import "));
}

#[test]
fn barrel_chains_run_to_stdout() {
    let fixture = Fixture::new(&[
        (
            "entry.ts",
            r#"
import { log } from "host://console";
import { aliased } from "./barrel.ts";
export default function () { log(aliased()); }
"#,
        ),
        (
            "barrel.ts",
            "export { helper as aliased } from \"./impl.ts\";",
        ),
        (
            "impl.ts",
            "export function helper() { return \"helper called\"; }",
        ),
    ]);

    let output = run_skein(&fixture, &[&fixture.path("entry.ts")]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert!(String::from_utf8_lossy(&output.stdout).contains("helper called"));
}

#[test]
fn macro_expansion_computes_at_bundle_time_and_runs() {
    let fixture = Fixture::new(&[
        (
            "entry.ts",
            r#"
import { log } from "host://console";
import { createMacro } from "./macro-lib.ts";
const addOne = createMacro((arg) => ({ expression: "(" + arg.expression + ") + 1", references: new Map() }));
export default function () { log(addOne(5)); }
"#,
        ),
        ("macro-lib.ts", MACRO_LIB),
    ]);

    // Run: the expanded program prints 6.
    let run = run_skein(&fixture, &[&fixture.path("entry.ts")]);
    assert!(run.status.success(), "stderr: {}", String::from_utf8_lossy(&run.stderr));
    assert!(String::from_utf8_lossy(&run.stdout).contains('6'));

    // Emit: the call site is replaced, the macro machinery is gone.
    let emit = run_skein(&fixture, &["--emit", &fixture.path("entry.ts")]);
    assert!(emit.status.success());
    let bundle = String::from_utf8_lossy(&emit.stdout);
    assert!(bundle.contains("5) + 1"), "bundle: {bundle}");
    assert!(!bundle.contains("createMacro"));
    assert!(!bundle.contains("addOne"));
}

#[test]
fn self_expanding_macro_fails_with_the_iteration_message() {
    let fixture = Fixture::new(&[
        (
            "entry.ts",
            r#"
import { createMacro } from "./macro-lib.ts";
const forever = createMacro((arg) => ({ expression: "forever(" + arg.expression + ")", references: new Map() }));
export default function () { return forever(1); }
"#,
        ),
        ("macro-lib.ts", MACRO_LIB),
    ]);

    let output = run_skein(&fixture, &[&fixture.path("entry.ts")]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr)
        .contains("Macro expansion exceeded max iterations"));
}

#[test]
fn macro_closures_capture_cross_file_references() {
    let fixture = Fixture::new(&[
        (
            "entry.ts",
            r#"
import { log } from "host://console";
import { createMacro } from "./macro-lib.ts";
import { add } from "./other.ts";
const whereIs = createMacro((arg) => {
    const target = arg.references.get("add");
    return { expression: JSON.stringify(target.uri + "|" + target.name), references: new Map() };
});
export default function () { log(whereIs(add)); }
"#,
        ),
        ("other.ts", "export function add(a, b) { return a + b; }"),
        ("macro-lib.ts", MACRO_LIB),
    ]);

    let output = run_skein(&fixture, &[&fixture.path("entry.ts")]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("other.ts|add"),
        "captured reference should name the defining module: {stdout}"
    );
}

#[test]
fn missing_import_names_the_symbol_and_fails() {
    let fixture = Fixture::new(&[
        (
            "entry.ts",
            r#"
import { doesNotExist } from "./x.ts";
export default function () { return doesNotExist; }
"#,
        ),
        ("x.ts", "export const somethingElse = 1;"),
    ]);

    let output = run_skein(&fixture, &[&fixture.path("entry.ts")]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("doesNotExist"));
}

#[test]
fn syntax_errors_mention_parsing_and_fail() {
    let fixture = Fixture::new(&[("entry.ts", "export default function ( { ohno")]);

    let output = run_skein(&fixture, &[&fixture.path("entry.ts")]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr).to_lowercase();
    assert!(
        stderr.contains("parse") || stderr.contains("expected") || stderr.contains("error"),
        "stderr: {stderr}"
    );
}

#[test]
fn version_flag_prints_and_exits_zero() {
    let output = skein().arg("--version").output().expect("binary should run");
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn cli_misuse_exits_with_two() {
    let output = skein().output().expect("binary should run");
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn emitting_twice_is_byte_identical() {
    let fixture = Fixture::new(&[
        (
            "entry.ts",
            r#"
import { helper } from "./helper.ts";
export default async function () { return helper(); }
"#,
        ),
        ("helper.ts", "export function helper() { return 1; }"),
    ]);

    let first = run_skein(&fixture, &["--emit", &fixture.path("entry.ts")]);
    let second = run_skein(&fixture, &["--emit", &fixture.path("entry.ts")]);
    assert!(first.status.success());
    assert_eq!(first.stdout, second.stdout);
}

#[test]
fn mutual_recursion_emits_both_declarations_once() {
    let fixture = Fixture::new(&[(
        "entry.ts",
        r#"
import { log } from "host://console";
const even = (n) => n === 0 ? true : odd(n - 1);
const odd = (n) => n === 0 ? false : even(n - 1);
export default function () { log(even(4) ? "even" : "odd"); }
"#,
    )]);

    let run = run_skein(&fixture, &[&fixture.path("entry.ts")]);
    assert!(run.status.success(), "stderr: {}", String::from_utf8_lossy(&run.stderr));
    assert!(String::from_utf8_lossy(&run.stdout).contains("even"));

    let emit = run_skein(&fixture, &["--emit", &fixture.path("entry.ts")]);
    let bundle = String::from_utf8_lossy(&emit.stdout);
    // Each declaration appears exactly once, as a hoisted function.
    assert_eq!(bundle.matches("=== 0 ? true").count(), 1);
    assert_eq!(bundle.matches("=== 0 ? false").count(), 1);
}
