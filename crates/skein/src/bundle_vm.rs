//! The embedded runtime that executes emitted bundles.
//!
//! A single-threaded `deno_core` isolate with one extension registering
//! the operation handles the bundle preamble binds (`host_modules`). The
//! event loop runs on a current-thread tokio runtime until every pending
//! op has settled, so an async entry default export runs to completion.
//!
//! Fallible ops return JSON envelopes (`{"type":"ok",...}` /
//! `{"type":"error",...}`); the preamble glue unwraps them on the JS
//! side.

use std::{
    collections::HashMap,
    path::Path,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, LazyLock, Mutex,
    },
};

use anyhow::Context;
use deno_core::{op2, JsRuntime, PollEventLoopOptions, RuntimeOptions};
use log::debug;
use notify::{Config as NotifyConfig, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use rand::RngCore;
use serde::Serialize;
use tokio::sync::oneshot;

/// Result envelope for fallible ops.
#[derive(Serialize)]
#[serde(tag = "type")]
enum OpResult<T: Serialize> {
    #[serde(rename = "ok")]
    Ok { value: T },
    #[serde(rename = "error")]
    Err { error: String },
}

fn envelope<T: Serialize>(result: OpResult<T>) -> String {
    serde_json::to_string(&result)
        .unwrap_or_else(|e| format!(r#"{{"type":"error","error":"{e}"}}"#))
}

// ---- console ----

#[op2(fast)]
fn op_console_log(#[string] message: &str) {
    println!("{message}");
}

#[op2(fast)]
fn op_console_debug(#[string] message: &str) {
    println!("[DEBUG] {message}");
}

// ---- fs ----

#[op2]
#[string]
fn op_fs_read_file(#[string] path: &str) -> String {
    envelope(match std::fs::read_to_string(path) {
        Ok(content) => OpResult::Ok { value: content },
        Err(e) => OpResult::Err {
            error: format!("readFile failed: {e}"),
        },
    })
}

#[op2]
#[string]
fn op_fs_read_file_binary(#[string] path: &str) -> String {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    envelope(match std::fs::read(path) {
        Ok(bytes) => OpResult::Ok {
            value: STANDARD.encode(&bytes),
        },
        Err(e) => OpResult::Err {
            error: format!("readFileBinary failed: {e}"),
        },
    })
}

#[op2]
#[string]
fn op_fs_write_file(#[string] path: &str, #[string] content: &str) -> String {
    envelope::<()>(match std::fs::write(path, content) {
        Ok(()) => OpResult::Ok { value: () },
        Err(e) => OpResult::Err {
            error: format!("writeFile failed: {e}"),
        },
    })
}

#[op2]
#[string]
fn op_fs_write_file_binary(#[string] path: &str, #[string] content_base64: &str) -> String {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    envelope::<()>(match STANDARD.decode(content_base64) {
        Ok(bytes) => match std::fs::write(path, bytes) {
            Ok(()) => OpResult::Ok { value: () },
            Err(e) => OpResult::Err {
                error: format!("writeFileBinary failed: {e}"),
            },
        },
        Err(e) => OpResult::Err {
            error: format!("writeFileBinary base64 decode failed: {e}"),
        },
    })
}

#[op2(fast)]
fn op_fs_is_file(#[string] path: &str) -> bool {
    Path::new(path).is_file()
}

#[op2(fast)]
fn op_fs_exists(#[string] path: &str) -> bool {
    Path::new(path).exists()
}

#[derive(Serialize)]
struct FileStats {
    size: u64,
    is_file: bool,
    is_directory: bool,
    is_symlink: bool,
    modified_ms: Option<u64>,
}

#[op2]
#[string]
fn op_fs_lstat(#[string] path: &str) -> String {
    envelope(match std::fs::symlink_metadata(path) {
        Ok(metadata) => OpResult::Ok {
            value: FileStats {
                size: metadata.len(),
                is_file: metadata.is_file(),
                is_directory: metadata.is_dir(),
                is_symlink: metadata.file_type().is_symlink(),
                modified_ms: metadata.modified().ok().and_then(|t| {
                    t.duration_since(std::time::UNIX_EPOCH)
                        .ok()
                        .map(|d| d.as_millis() as u64)
                }),
            },
        },
        Err(e) => OpResult::Err {
            error: format!("lstat failed: {e}"),
        },
    })
}

#[op2]
#[string]
fn op_fs_mkdir(#[string] path: &str) -> String {
    envelope::<()>(match std::fs::create_dir_all(path) {
        Ok(()) => OpResult::Ok { value: () },
        Err(e) => OpResult::Err {
            error: format!("mkdir failed: {e}"),
        },
    })
}

#[op2]
#[string]
fn op_fs_readdir(#[string] path: &str) -> String {
    envelope(match std::fs::read_dir(path) {
        Ok(entries) => {
            let names: Result<Vec<String>, _> = entries
                .map(|entry| entry.map(|e| e.file_name().to_string_lossy().to_string()))
                .collect();
            match names {
                Ok(list) => OpResult::Ok { value: list },
                Err(e) => OpResult::Err {
                    error: format!("readdir failed: {e}"),
                },
            }
        }
        Err(e) => OpResult::Err {
            error: format!("readdir failed: {e}"),
        },
    })
}

#[op2]
#[string]
fn op_fs_tmpdir() -> String {
    std::env::temp_dir().to_string_lossy().to_string()
}

// ---- crypto ----

#[op2]
#[string]
fn op_random_bytes(length: u32) -> String {
    let mut bytes = vec![0u8; length as usize];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

// ---- timers ----

static TIMER_CANCELLERS: LazyLock<Mutex<HashMap<u32, oneshot::Sender<()>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));
static NEXT_TIMER_ID: AtomicU32 = AtomicU32::new(1);

#[op2(fast)]
fn op_timer_start() -> u32 {
    NEXT_TIMER_ID.fetch_add(1, Ordering::SeqCst)
}

/// Wait out the delay; resolves `false` when cancelled.
#[op2]
async fn op_timer_wait(timer_id: u32, delay_ms: u32) -> bool {
    let (tx, rx) = oneshot::channel();
    TIMER_CANCELLERS
        .lock()
        .expect("timer map lock")
        .insert(timer_id, tx);

    tokio::select! {
        _ = tokio::time::sleep(std::time::Duration::from_millis(u64::from(delay_ms))) => {
            TIMER_CANCELLERS.lock().expect("timer map lock").remove(&timer_id);
            true
        }
        _ = rx => false,
    }
}

#[op2(fast)]
fn op_timer_cancel(timer_id: u32) -> bool {
    match TIMER_CANCELLERS
        .lock()
        .expect("timer map lock")
        .remove(&timer_id)
    {
        Some(sender) => {
            let _ = sender.send(());
            true
        }
        None => false,
    }
}

// ---- http ----

#[derive(Serialize)]
struct FetchResponse {
    status: u16,
    #[serde(rename = "statusText")]
    status_text: String,
    headers: HashMap<String, String>,
    body: String,
    url: String,
    redirected: bool,
}

#[op2]
#[string]
async fn op_http_fetch(
    #[string] method: String,
    #[string] url: String,
    #[string] headers_json: String,
    #[string] body: String,
) -> String {
    match fetch_inner(method, url, headers_json, body).await {
        Ok(response) => serde_json::to_string(&response)
            .unwrap_or_else(|e| format!(r#"{{"error":"{e}"}}"#)),
        Err(error) => {
            serde_json::to_string(&serde_json::json!({ "error": error }))
                .unwrap_or_else(|e| format!(r#"{{"error":"{e}"}}"#))
        }
    }
}

async fn fetch_inner(
    method: String,
    url: String,
    headers_json: String,
    body: String,
) -> Result<FetchResponse, String> {
    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .map_err(|e| e.to_string())?;

    let method = reqwest::Method::from_bytes(method.to_uppercase().as_bytes())
        .map_err(|e| format!("unsupported HTTP method: {e}"))?;
    let mut request = client.request(method, &url);

    let headers: HashMap<String, String> =
        serde_json::from_str(&headers_json).map_err(|e| format!("invalid headers JSON: {e}"))?;
    for (key, value) in headers {
        request = request.header(&key, &value);
    }
    if !body.is_empty() {
        request = request.body(body);
    }

    let response = request.send().await.map_err(|e| e.to_string())?;
    let status = response.status().as_u16();
    let status_text = response
        .status()
        .canonical_reason()
        .unwrap_or("")
        .to_string();
    let final_url = response.url().to_string();
    let redirected = final_url != url;
    let headers = response
        .headers()
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
        .collect();
    let body = response.text().await.map_err(|e| e.to_string())?;

    Ok(FetchResponse {
        status,
        status_text,
        headers,
        body,
        url: final_url,
        redirected,
    })
}

// ---- process ----

#[op2]
#[string]
fn op_process_spawn(#[string] cmd_json: &str, #[string] cwd: &str) -> String {
    let cmd: Vec<String> = match serde_json::from_str(cmd_json) {
        Ok(cmd) => cmd,
        Err(e) => {
            return envelope::<()>(OpResult::Err {
                error: format!("invalid command JSON: {e}"),
            });
        }
    };
    if cmd.is_empty() {
        return envelope::<()>(OpResult::Err {
            error: "command array cannot be empty".to_string(),
        });
    }

    let mut command = std::process::Command::new(&cmd[0]);
    command.args(&cmd[1..]);
    if !cwd.is_empty() {
        command.current_dir(cwd);
    }

    match command.output() {
        Ok(output) => envelope(OpResult::Ok {
            value: serde_json::json!({
                "code": output.status.code(),
                "success": output.status.success(),
                "stdout": String::from_utf8_lossy(&output.stdout),
                "stderr": String::from_utf8_lossy(&output.stderr),
            }),
        }),
        Err(e) => envelope::<()>(OpResult::Err {
            error: format!("spawn failed: {e}"),
        }),
    }
}

// ---- watch ----

#[derive(Clone, Serialize)]
struct WatchEvent {
    kind: String,
    path: String,
}

struct WatcherState {
    _watcher: RecommendedWatcher,
    events: Arc<Mutex<Vec<WatchEvent>>>,
}

static WATCHERS: LazyLock<Mutex<HashMap<u32, WatcherState>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));
static NEXT_WATCHER_ID: AtomicU32 = AtomicU32::new(1);

fn event_kind_name(kind: &EventKind) -> &'static str {
    match kind {
        EventKind::Create(_) => "create",
        EventKind::Modify(_) => "modify",
        EventKind::Remove(_) => "remove",
        EventKind::Access(_) => "access",
        EventKind::Other => "other",
        EventKind::Any => "any",
    }
}

#[op2]
#[string]
fn op_watch_start(#[string] path: &str, recursive: bool) -> String {
    let events: Arc<Mutex<Vec<WatchEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();

    let watcher = RecommendedWatcher::new(
        move |result: Result<notify::Event, notify::Error>| {
            if let Ok(event) = result {
                let kind = event_kind_name(&event.kind);
                let mut queue = sink.lock().expect("watch event lock");
                for path in event.paths {
                    queue.push(WatchEvent {
                        kind: kind.to_string(),
                        path: path.to_string_lossy().to_string(),
                    });
                }
            }
        },
        NotifyConfig::default(),
    );

    match watcher {
        Ok(mut watcher) => {
            let mode = if recursive {
                RecursiveMode::Recursive
            } else {
                RecursiveMode::NonRecursive
            };
            if let Err(e) = watcher.watch(Path::new(path), mode) {
                return envelope::<()>(OpResult::Err {
                    error: format!("watch failed: {e}"),
                });
            }
            let id = NEXT_WATCHER_ID.fetch_add(1, Ordering::SeqCst);
            WATCHERS.lock().expect("watcher map lock").insert(
                id,
                WatcherState {
                    _watcher: watcher,
                    events,
                },
            );
            envelope(OpResult::Ok { value: id })
        }
        Err(e) => envelope::<()>(OpResult::Err {
            error: format!("watcher setup failed: {e}"),
        }),
    }
}

#[op2]
#[string]
fn op_watch_poll(watcher_id: u32) -> String {
    let watchers = WATCHERS.lock().expect("watcher map lock");
    match watchers.get(&watcher_id) {
        Some(state) => {
            let mut events = state.events.lock().expect("watch event lock");
            if events.is_empty() {
                "null".to_string()
            } else {
                let drained: Vec<WatchEvent> = events.drain(..).collect();
                serde_json::to_string(&drained).unwrap_or_else(|_| "[]".to_string())
            }
        }
        None => "null".to_string(),
    }
}

#[op2(fast)]
fn op_watch_stop(watcher_id: u32) {
    WATCHERS
        .lock()
        .expect("watcher map lock")
        .remove(&watcher_id);
}

// ---- http server (names bound, serving not provided) ----

#[op2]
#[string]
fn op_server_unsupported() -> String {
    r#"{"error":"host://http/server is not available in this runtime build"}"#.to_string()
}

deno_core::extension!(
    skein_host,
    ops = [
        op_console_log,
        op_console_debug,
        op_fs_read_file,
        op_fs_read_file_binary,
        op_fs_write_file,
        op_fs_write_file_binary,
        op_fs_is_file,
        op_fs_exists,
        op_fs_lstat,
        op_fs_mkdir,
        op_fs_readdir,
        op_fs_tmpdir,
        op_random_bytes,
        op_timer_start,
        op_timer_wait,
        op_timer_cancel,
        op_http_fetch,
        op_process_spawn,
        op_watch_start,
        op_watch_poll,
        op_watch_stop,
        op_server_unsupported,
    ],
);

/// Execute an emitted bundle to completion.
pub fn run(code: &str) -> anyhow::Result<()> {
    let tokio_runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building the runtime event loop")?;

    tokio_runtime.block_on(async move {
        let mut js = JsRuntime::new(RuntimeOptions {
            extensions: vec![skein_host::init()],
            ..Default::default()
        });
        debug!("executing bundle ({} bytes)", code.len());
        js.execute_script("skein:bundle", code.to_string())
            .map_err(anyhow::Error::from)
            .context("bundle execution failed")?;
        js.run_event_loop(PollEventLoopOptions::default())
            .await
            .map_err(anyhow::Error::from)
            .context("bundle event loop failed")?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_a_console_bundle() {
        let code = r#"
const __host_console = {
    log: (...args) => Deno.core.ops.op_console_log(args.join(" ")),
    debug: (...args) => Deno.core.ops.op_console_debug(args.join(" ")),
};
const declaration_1 = __host_console.log;
function declaration_0() { declaration_1("helper called"); }
declaration_0();
"#;
        run(code).expect("bundle should run");
    }

    #[test]
    fn async_entry_points_run_to_settlement() {
        let code = r#"
const __host_time = {
    setTimeout: (callback, delay, ...args) => {
        const id = Deno.core.ops.op_timer_start();
        Deno.core.ops.op_timer_wait(id, delay ?? 0).then((fired) => { if (fired) callback(...args); });
        return id;
    },
};
async function declaration_0() {
    await new Promise((resolve) => __host_time.setTimeout(resolve, 10));
}
declaration_0();
"#;
        run(code).expect("async bundle should settle");
    }

    #[test]
    fn failing_bundles_surface_an_error() {
        let err = run("throw new Error('bundle exploded');").expect_err("throw should fail");
        assert!(format!("{err:#}").contains("bundle exploded"));
    }
}
