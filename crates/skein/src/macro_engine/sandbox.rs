//! The isolated macro evaluator.
//!
//! Every macro invocation gets a fresh `JsRuntime` whose heap is thrown
//! away afterwards. No extensions are registered, so the isolate exposes
//! nothing beyond ECMAScript built-ins plus the injected `Closure` /
//! `Definition` factories — macros cannot reach the filesystem or the
//! network. A watchdog thread cuts off runaway bodies.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc,
    },
    thread,
    time::Duration,
};

use deno_core::{JsRuntime, RuntimeOptions};
use log::trace;
use serde::Deserialize;

use crate::{
    declaration::CanonicalName,
    errors::{BundleError, Result},
    macro_engine::closure::ClosureRecord,
    module_record::FxIndexMap,
};

/// What a macro must hand back: a replacement expression and the
/// canonical names of every identifier free in it.
#[derive(Debug, Clone, Deserialize)]
pub struct MacroExpansion {
    pub expression: String,
    pub references: FxIndexMap<String, CanonicalName>,
}

/// Marker thrown by the validation epilogue so shape violations are
/// distinguishable from arbitrary macro exceptions.
const SHAPE_MARKER: &str = "__skein_macro_shape__";

const PRELUDE: &str = r#"
const Closure = (expression, references) => ({
    expression: String(expression),
    references: references instanceof Map ? references : new Map(Object.entries(references ?? {})),
});
const Definition = (declaration, references) => ({
    declaration: String(declaration),
    references: references instanceof Map ? references : new Map(Object.entries(references ?? {})),
});
globalThis.Closure = Closure;
globalThis.Definition = Definition;
"#;

const EPILOGUE: &str = r#"
if (__result === null || typeof __result !== "object" || typeof __result.expression !== "string") {
    throw new Error("__skein_macro_shape__ missing string expression");
}
let __references = __result.references;
if (__references == null) {
    throw new Error("__skein_macro_shape__ missing references");
}
if (!(__references instanceof Map)) {
    if (typeof __references === "object") {
        __references = new Map(Object.entries(__references));
    } else {
        throw new Error("__skein_macro_shape__ references must be a Map or plain object");
    }
}
const __plain = {};
for (const [__name, __target] of __references) {
    if (__target === null || typeof __target !== "object"
        || typeof __target.uri !== "string" || typeof __target.name !== "string") {
        throw new Error("__skein_macro_shape__ reference entries need {uri, name}");
    }
    __plain[__name] = { uri: __target.uri, name: __target.name };
}
JSON.stringify({ expression: __result.expression, references: __plain })
"#;

/// Run one macro body against its captured arguments.
pub fn evaluate_macro(
    macro_body: &str,
    args: &[ClosureRecord],
    timeout: Duration,
) -> Result<MacroExpansion> {
    let args_json = serde_json::to_string(args).map_err(|e| BundleError::MacroEvaluation {
        detail: format!("could not serialize closure arguments: {e}"),
    })?;

    let script = format!(
        "{PRELUDE}\nconst __macro = ({macro_body});\nconst __args = ({args_json}).map((arg) => Closure(arg.expression, arg.references));\nconst __result = __macro(...__args);\n{EPILOGUE}"
    );
    trace!("macro sandbox script:\n{script}");

    let mut runtime = JsRuntime::new(RuntimeOptions::default());

    // Wall-clock guard: terminate the isolate if the body runs too long.
    let isolate_handle = runtime.v8_isolate().thread_safe_handle();
    let timed_out = Arc::new(AtomicBool::new(false));
    let watchdog_flag = timed_out.clone();
    let (finished_tx, finished_rx) = mpsc::channel::<()>();
    let watchdog = thread::spawn(move || {
        if finished_rx.recv_timeout(timeout).is_err() {
            watchdog_flag.store(true, Ordering::SeqCst);
            isolate_handle.terminate_execution();
        }
    });

    let outcome = runtime.execute_script("skein:macro", script);
    let _ = finished_tx.send(());
    let _ = watchdog.join();

    let global = match outcome {
        Ok(value) => value,
        Err(error) => {
            if timed_out.load(Ordering::SeqCst) {
                return Err(BundleError::MacroTimeout {
                    secs: timeout.as_secs().max(1),
                });
            }
            let detail = error.to_string();
            if let Some(at) = detail.find(SHAPE_MARKER) {
                let tail = detail[at + SHAPE_MARKER.len()..]
                    .lines()
                    .next()
                    .unwrap_or("")
                    .trim()
                    .to_string();
                return Err(BundleError::MacroReturnShape { detail: tail });
            }
            return Err(BundleError::MacroEvaluation { detail });
        }
    };

    let json = {
        deno_core::scope!(scope, &mut runtime);
        let local = deno_core::v8::Local::new(scope, global);
        local.to_rust_string_lossy(scope)
    };

    serde_json::from_str(&json).map_err(|e| BundleError::MacroReturnShape {
        detail: format!("result did not round-trip as JSON: {e}"),
    })
}
