//! Isolated subprocess execution for packaged tools.
//!
//! Packaged tools run under an external JS runner (`bun` by default), never
//! inside the host process. The protocol is file/line based: params and
//! context go into a uniquely named JSON file in the package root, the
//! fixed-content bootstrap script imports the entry and prints exactly one
//! JSON line on stdout. Everything the tool writes via `console.*` is
//! redirected to stderr so the stdout protocol stays parseable.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use tokio::process::Command;
use uuid::Uuid;

use grimoire_core::{ExecutionContext, RunnerConfig, ToolError, ToolResult};

/// Bootstrap script name, written into each packaged tool's root.
pub const RUNNER_FILE_NAME: &str = ".grimoire-runner.mjs";

/// Prefix of per-invocation input files.
const INPUT_FILE_PREFIX: &str = ".grimoire-input-";

/// Fixed bootstrap source. Byte-compared on every run and rewritten on
/// drift, so manual edits do not survive.
pub const RUNNER_SOURCE: &str = r#"// Managed by grimoire. Do not edit; this file is rewritten on every run.
import { readFileSync, unlinkSync } from "node:fs";

const entry = process.env.GRIMOIRE_TOOL_ENTRY;
const inputPath = process.env.GRIMOIRE_TOOL_INPUT;

// Tool console output goes to stderr; stdout carries only the result line.
const emit = process.stdout.write.bind(process.stdout);
for (const level of ["log", "info", "warn", "error", "debug"]) {
    console[level] = (...args) => process.stderr.write(args.map(String).join(" ") + "\n");
}

if (typeof Bun !== "undefined" && Bun.plugin) {
    Bun.plugin({
        name: "grimoire-aliases",
        setup(build) {
            build.module("@grimoire/tools", () => ({
                loader: "object",
                exports: {
                    defineTool: (definition) => definition,
                    default: { defineTool: (definition) => definition },
                },
            }));
            build.module("@grimoire/fetch", () => ({
                loader: "object",
                exports: { fetch: globalThis.fetch, default: globalThis.fetch },
            }));
            build.onResolve({ filter: /^@grimoire\// }, (args) => ({
                path: args.path,
                namespace: "grimoire-empty",
            }));
            build.onLoad({ filter: /.*/, namespace: "grimoire-empty" }, () => ({
                loader: "object",
                exports: { default: {} },
            }));
        },
    });
}

async function main() {
    if (!entry || !inputPath) {
        throw new Error("GRIMOIRE_TOOL_ENTRY and GRIMOIRE_TOOL_INPUT must be set");
    }
    const { params, context } = JSON.parse(readFileSync(inputPath, "utf8"));
    const imported = await import(entry);
    const definition = imported.default ?? imported;
    if (!definition || typeof definition.execute !== "function") {
        throw new Error("tool entry has no execute function on its default export");
    }
    const result = await definition.execute(params, context);
    emit(JSON.stringify({ ok: true, result: result ?? null }) + "\n");
}

main()
    .catch((error) => {
        emit(
            JSON.stringify({
                ok: false,
                error: String((error && error.message) || error),
                stack: (error && error.stack) || undefined,
            }) + "\n",
        );
        process.exitCode = 1;
    })
    .finally(() => {
        try {
            unlinkSync(inputPath);
        } catch {
            // The host removes it as well; missing is fine.
        }
    });
"#;

/// Stub `@grimoire/tools` package installed under the tool's
/// `node_modules` for runners without a plugin API.
const STUB_TOOLS_MANIFEST: &str =
    r#"{"name":"@grimoire/tools","version":"0.0.0","type":"module","main":"index.js"}"#;
const STUB_TOOLS_INDEX: &str =
    "export function defineTool(definition) { return definition; }\nexport default { defineTool };\n";

/// Stub `@grimoire/fetch` package.
const STUB_FETCH_MANIFEST: &str =
    r#"{"name":"@grimoire/fetch","version":"0.0.0","type":"module","main":"index.js"}"#;
const STUB_FETCH_INDEX: &str =
    "const fetchImpl = (...args) => globalThis.fetch(...args);\nexport const fetch = fetchImpl;\nexport default fetchImpl;\n";

/// One parsed stdout result line.
#[derive(Debug, Deserialize)]
struct RunnerOutcome {
    ok: bool,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    stack: Option<String>,
}

/// Executes packaged tools via the external runner process.
pub struct SubprocessExecutor {
    runner_bin: String,
    timeout: Duration,
}

impl SubprocessExecutor {
    /// Creates an executor from the host runner configuration.
    #[must_use]
    pub fn new(config: &RunnerConfig) -> Self {
        Self {
            runner_bin: config.bun_bin.clone(),
            timeout: Duration::from_secs(config.timeout_seconds),
        }
    }

    /// Executes `entry` inside `package_root` with the given params.
    ///
    /// # Errors
    /// Returns an execute-stage error when the runner cannot be spawned,
    /// exits reporting failure, times out, or its output cannot be parsed.
    pub async fn execute(
        &self,
        package_root: &Path,
        entry: &Path,
        params: &Value,
        context: &ExecutionContext,
    ) -> ToolResult<Value> {
        ensure_runner(package_root).await?;
        ensure_stub_packages(package_root).await?;

        let input_path = package_root.join(format!("{INPUT_FILE_PREFIX}{}.json", Uuid::new_v4()));
        let payload = json!({ "params": params, "context": context });
        tokio::fs::write(&input_path, serde_json::to_vec(&payload)?).await?;

        let outcome = self.spawn_runner(package_root, entry, &input_path).await;

        // The bootstrap also unlinks the input; this covers spawn failures
        // and timeouts.
        if let Err(err) = tokio::fs::remove_file(&input_path).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("failed to remove {}: {err}", input_path.display());
            }
        }

        outcome
    }

    async fn spawn_runner(
        &self,
        package_root: &Path,
        entry: &Path,
        input_path: &Path,
    ) -> ToolResult<Value> {
        let runner_path = package_root.join(RUNNER_FILE_NAME);
        let mut command = Command::new(&self.runner_bin);
        command
            .arg(&runner_path)
            .current_dir(package_root)
            .env("GRIMOIRE_TOOL_ENTRY", entry)
            .env("GRIMOIRE_TOOL_INPUT", input_path)
            .kill_on_drop(true);

        tracing::debug!(
            "spawning {} for {} in {}",
            self.runner_bin,
            entry.display(),
            package_root.display()
        );

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| {
                ToolError::Execute(format!(
                    "tool subprocess timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|err| {
                ToolError::Execute(format!("failed to spawn {}: {err}", self.runner_bin))
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        parse_runner_output(&stdout, &stderr)
    }
}

/// Parses the last non-empty stdout line as the result protocol.
fn parse_runner_output(stdout: &str, stderr: &str) -> ToolResult<Value> {
    let Some(line) = stdout.lines().rev().find(|line| !line.trim().is_empty()) else {
        return Err(ToolError::Execute(format!(
            "tool subprocess produced no output; stderr: {}",
            summarize(stderr)
        )));
    };

    let outcome: RunnerOutcome = serde_json::from_str(line).map_err(|err| {
        ToolError::Execute(format!(
            "unparseable tool output ({err}); stdout line: {line}; stderr: {}",
            summarize(stderr)
        ))
    })?;

    if outcome.ok {
        Ok(outcome.result)
    } else {
        let message = outcome
            .error
            .unwrap_or_else(|| "tool reported failure without a message".to_owned());
        match outcome.stack {
            Some(stack) => Err(ToolError::Execute(format!("{message}\n{stack}"))),
            None => Err(ToolError::Execute(message)),
        }
    }
}

fn summarize(text: &str) -> &str {
    let trimmed = text.trim();
    if trimmed.is_empty() { "<empty>" } else { trimmed }
}

/// Writes the bootstrap script if absent or different from the fixed
/// content.
async fn ensure_runner(package_root: &Path) -> ToolResult<PathBuf> {
    let runner_path = package_root.join(RUNNER_FILE_NAME);
    ensure_file(&runner_path, RUNNER_SOURCE).await?;
    Ok(runner_path)
}

/// Ensures the stub `@grimoire/*` packages exist under `node_modules` so
/// plain `import "@grimoire/tools"` resolves even without the plugin layer.
async fn ensure_stub_packages(package_root: &Path) -> ToolResult<()> {
    let scope_dir = package_root.join("node_modules").join("@grimoire");
    for (name, manifest, index) in [
        ("tools", STUB_TOOLS_MANIFEST, STUB_TOOLS_INDEX),
        ("fetch", STUB_FETCH_MANIFEST, STUB_FETCH_INDEX),
    ] {
        let package_dir = scope_dir.join(name);
        tokio::fs::create_dir_all(&package_dir).await?;
        ensure_file(&package_dir.join("package.json"), manifest).await?;
        ensure_file(&package_dir.join("index.js"), index).await?;
    }
    Ok(())
}

/// Writes `contents` to `path` unless the file already matches byte for
/// byte.
async fn ensure_file(path: &Path, contents: &str) -> ToolResult<()> {
    match tokio::fs::read(path).await {
        Ok(existing) if existing == contents.as_bytes() => return Ok(()),
        Ok(_) => tracing::debug!("rewriting drifted {}", path.display()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
    }
    tokio::fs::write(path, contents).await?;
    Ok(())
}

#[cfg(test)]
#[cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, reason = "Allow for tests")
)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_ensure_runner_writes_and_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = ensure_runner(dir.path()).await.unwrap();
        let first = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(first, RUNNER_SOURCE);

        ensure_runner(dir.path()).await.unwrap();
        let second = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(second, RUNNER_SOURCE);
    }

    #[tokio::test]
    async fn test_ensure_runner_rewrites_drifted_script() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(RUNNER_FILE_NAME);
        tokio::fs::write(&path, "// edited by hand").await.unwrap();

        ensure_runner(dir.path()).await.unwrap();
        let restored = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(restored, RUNNER_SOURCE);
    }

    #[tokio::test]
    async fn test_ensure_stub_packages_tree() {
        let dir = TempDir::new().unwrap();
        ensure_stub_packages(dir.path()).await.unwrap();
        assert!(
            dir.path()
                .join("node_modules/@grimoire/tools/package.json")
                .is_file()
        );
        assert!(
            dir.path()
                .join("node_modules/@grimoire/fetch/index.js")
                .is_file()
        );
    }

    #[test]
    fn test_parse_last_nonempty_line_success() {
        let stdout = "tool noise\n\n{\"ok\":true,\"result\":{\"count\":3}}\n\n";
        let value = parse_runner_output(stdout, "").unwrap();
        assert_eq!(value, json!({"count": 3}));
    }

    #[test]
    fn test_parse_failure_line_includes_stack() {
        let stdout = r#"{"ok":false,"error":"boom","stack":"at tool.tsx:3"}"#;
        let error = parse_runner_output(stdout, "").unwrap_err();
        let message = error.to_string();
        assert!(message.contains("boom"));
        assert!(message.contains("tool.tsx:3"));
    }

    #[test]
    fn test_parse_empty_output_surfaces_stderr() {
        let error = parse_runner_output("", "segfault near line 1").unwrap_err();
        assert!(error.to_string().contains("segfault"));
        assert_eq!(error.stage(), "execute");
    }

    #[test]
    fn test_parse_garbage_output_is_error() {
        let error = parse_runner_output("not json at all", "").unwrap_err();
        assert!(error.to_string().contains("unparseable"));
    }

    #[test]
    fn test_runner_source_protocol_markers() {
        assert!(RUNNER_SOURCE.contains("GRIMOIRE_TOOL_ENTRY"));
        assert!(RUNNER_SOURCE.contains("GRIMOIRE_TOOL_INPUT"));
        assert!(RUNNER_SOURCE.contains(r#"ok: true"#));
        assert!(RUNNER_SOURCE.contains("process.stderr.write"));
    }
}
