//! The fixed `host://` module registry.
//!
//! Host modules have no source text; each is a hard-coded export list the
//! fetcher synthesizes without I/O. The emitter binds used namespaces in a
//! bundle preamble to objects of operation handles the embedded runtime
//! registers (`bundle_vm`).

use indexmap::IndexSet;

/// Exports of a `host://` namespace, or `None` for unknown namespaces.
pub fn exports_of(namespace: &str) -> Option<&'static [&'static str]> {
    Some(match namespace {
        "fs" => &[
            "readFile",
            "readFileBinary",
            "writeFile",
            "writeFileBinary",
            "isFile",
            "exists",
            "lstat",
            "mkdir",
            "readdir",
            "tmpdir",
        ],
        "http" => &["fetch"],
        "http/server" => &["serve", "createResponse", "createJsonResponse"],
        "process" => &["spawn"],
        "time" => &["setTimeout", "clearTimeout", "setInterval", "clearInterval"],
        "watch" => &[
            "watchStart",
            "watchPoll",
            "watchStop",
            "watchFile",
            "watchDirectory",
        ],
        "crypto" => &["randomBytes"],
        "console" => &["log", "debug"],
        _ => return None,
    })
}

/// Namespace part of a `host://` URI, e.g. `http/server` for
/// `host://http/server`.
pub fn namespace_of(uri: &str) -> Option<&str> {
    uri.strip_prefix("host://")
}

/// The preamble variable a namespace's bindings read from.
pub fn preamble_var(namespace: &str) -> String {
    format!("__host_{}", namespace.replace('/', "_"))
}

/// Generate the bundle preamble for the given namespaces. Namespaces are
/// emitted in sorted order so bundles are byte-stable.
pub fn preamble(namespaces: &IndexSet<String>) -> String {
    let mut sorted: Vec<&String> = namespaces.iter().collect();
    sorted.sort();

    let mut out = String::new();
    for namespace in sorted {
        out.push_str(&format!(
            "const {} = {};\n",
            preamble_var(namespace),
            namespace_object(namespace)
        ));
    }
    out
}

/// The object literal binding one namespace to the runtime's ops.
fn namespace_object(namespace: &str) -> &'static str {
    match namespace {
        "fs" => r#"{
    readFile: (path) => JSON.parse(Deno.core.ops.op_fs_read_file(path)),
    readFileBinary: (path) => JSON.parse(Deno.core.ops.op_fs_read_file_binary(path)),
    writeFile: (path, content) => JSON.parse(Deno.core.ops.op_fs_write_file(path, content)),
    writeFileBinary: (path, contentBase64) => JSON.parse(Deno.core.ops.op_fs_write_file_binary(path, contentBase64)),
    isFile: (path) => Deno.core.ops.op_fs_is_file(path),
    exists: (path) => Deno.core.ops.op_fs_exists(path),
    lstat: (path) => JSON.parse(Deno.core.ops.op_fs_lstat(path)),
    mkdir: (path) => JSON.parse(Deno.core.ops.op_fs_mkdir(path)),
    readdir: (path) => JSON.parse(Deno.core.ops.op_fs_readdir(path)),
    tmpdir: () => Deno.core.ops.op_fs_tmpdir()
}"#,

        "http" => r#"{
    fetch: (url, init) => Deno.core.ops.op_http_fetch(
        (init && init.method) || "GET",
        url,
        JSON.stringify((init && init.headers) || {}),
        (init && init.body) || ""
    ).then((raw) => {
        const response = JSON.parse(raw);
        if (response.error) throw new Error(response.error);
        return response;
    })
}"#,

        "http/server" => r#"{
    serve: () => { throw new Error(JSON.parse(Deno.core.ops.op_server_unsupported()).error); },
    createResponse: (body, init) => ({ body, status: (init && init.status) || 200, headers: (init && init.headers) || {} }),
    createJsonResponse: (data, init) => ({ body: JSON.stringify(data), status: (init && init.status) || 200, headers: { "content-type": "application/json", ...((init && init.headers) || {}) } })
}"#,

        "process" => r#"{
    spawn: (cmd, options) => JSON.parse(Deno.core.ops.op_process_spawn(JSON.stringify(cmd), (options && options.cwd) || ""))
}"#,

        "time" => r#"{
    setTimeout: (callback, delay, ...args) => {
        const id = Deno.core.ops.op_timer_start();
        Deno.core.ops.op_timer_wait(id, delay ?? 0).then((fired) => { if (fired) callback(...args); });
        return id;
    },
    clearTimeout: (id) => { Deno.core.ops.op_timer_cancel(id); },
    setInterval: (callback, delay, ...args) => {
        const id = Deno.core.ops.op_timer_start();
        const tick = () => Deno.core.ops.op_timer_wait(id, delay ?? 0).then((fired) => { if (fired) { callback(...args); tick(); } });
        tick();
        return id;
    },
    clearInterval: (id) => { Deno.core.ops.op_timer_cancel(id); }
}"#,

        "watch" => r#"{
    watchStart: (path, recursive) => JSON.parse(Deno.core.ops.op_watch_start(path, recursive ?? false)),
    watchPoll: (watcherId) => JSON.parse(Deno.core.ops.op_watch_poll(watcherId)),
    watchStop: (watcherId) => { Deno.core.ops.op_watch_stop(watcherId); },
    watchFile: (path) => JSON.parse(Deno.core.ops.op_watch_start(path, false)),
    watchDirectory: (path) => JSON.parse(Deno.core.ops.op_watch_start(path, true))
}"#,

        "crypto" => r#"{
    randomBytes: (length) => {
        const hexed = Deno.core.ops.op_random_bytes(length);
        const bytes = new Uint8Array(length);
        for (let i = 0; i < length; i++) {
            bytes[i] = parseInt(hexed.substr(i * 2, 2), 16);
        }
        return bytes;
    }
}"#,

        "console" => r#"{
    log: (...args) => Deno.core.ops.op_console_log(args.map((a) => typeof a === "string" ? a : JSON.stringify(a)).join(" ")),
    debug: (...args) => Deno.core.ops.op_console_debug(args.map((a) => typeof a === "string" ? a : JSON.stringify(a)).join(" "))
}"#,

        _ => "{}",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_covers_the_documented_namespaces() {
        for namespace in [
            "fs",
            "http",
            "http/server",
            "process",
            "time",
            "watch",
            "crypto",
            "console",
        ] {
            assert!(exports_of(namespace).is_some(), "missing {namespace}");
        }
        assert!(exports_of("gpu").is_none());
    }

    #[test]
    fn fs_exports_match_the_interface_table() {
        let exports = exports_of("fs").expect("fs exists");
        assert_eq!(
            exports,
            &[
                "readFile",
                "readFileBinary",
                "writeFile",
                "writeFileBinary",
                "isFile",
                "exists",
                "lstat",
                "mkdir",
                "readdir",
                "tmpdir"
            ]
        );
    }

    #[test]
    fn preamble_is_sorted_and_sanitized() {
        let mut namespaces = IndexSet::new();
        namespaces.insert("time".to_string());
        namespaces.insert("http/server".to_string());
        namespaces.insert("console".to_string());

        let text = preamble(&namespaces);
        let console_at = text.find("__host_console").expect("console bound");
        let server_at = text.find("__host_http_server").expect("server bound");
        let time_at = text.find("__host_time").expect("time bound");
        assert!(console_at < server_at && server_at < time_at);
    }
}
