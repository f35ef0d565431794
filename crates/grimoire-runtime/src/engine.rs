//! In-process tool evaluation on QuickJS.
//!
//! Every operation builds a fresh sandboxed runtime, wires the module loader
//! to the plugin-scoped resolver, declares the compiled entry as an ES
//! module, and works with its default export. Nothing is cached between
//! operations; a tool picked up on the next load pass always reflects what
//! is on disk.

use std::path::PathBuf;
use std::time::Duration;

use rquickjs::{
    AsyncContext, AsyncRuntime, CatchResultExt as _, Ctx, Error as QuickJsError, Function, Module,
    Object, Value as JsValue, async_with,
    loader::{Loader, Resolver},
    module::Declared,
};
use serde_json::Value;

use grimoire_compiler::{CompiledModule, MISSING_STUB, ModuleResolver, ResolvedModule,
    builtin_stub, compile_dependency};
use grimoire_core::{ExecutionContext, ToolError, ToolResult};

use crate::conversion::{js_value_to_json, json_to_js_value};
use crate::fetch::install_fetch;

/// Maximum execution time for in-process tool code.
const MAX_EXECUTION_TIME: Duration = Duration::from_secs(30);

/// Maximum memory usage in bytes (64MB).
const MAX_MEMORY_BYTES: usize = 64 * 1024 * 1024;

/// Maximum stack size in bytes (1MB).
const MAX_STACK_SIZE: usize = 1024 * 1024;

/// Name prefix for in-memory stub modules.
const STUB_PREFIX: &str = "stub:";
/// Name prefix for specifiers that resolved to nothing.
const MISSING_PREFIX: &str = "missing:";

/// Renderer selector for [`ToolEngine::render`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Renderer {
    /// In-progress view, `renderToolDoing(params)`.
    Doing,
    /// Completed view, `renderToolResult(params, output)`.
    Result,
}

impl Renderer {
    /// Flat definition key for this renderer.
    fn key(self) -> &'static str {
        match self {
            Self::Doing => "renderToolDoing",
            Self::Result => "renderToolResult",
        }
    }

    /// Key inside a nested `ui: {...}` object.
    fn ui_key(self) -> &'static str {
        match self {
            Self::Doing => "Doing",
            Self::Result => "Result",
        }
    }
}

/// Metadata read off a tool module's default export.
#[derive(Debug, Clone, Default)]
pub struct DefinitionMeta {
    /// Declared tool name, when present.
    pub name: Option<String>,
    /// Declared description, when present.
    pub description: Option<String>,
    /// Whether an `inputSchema` field is present on the definition.
    pub has_input_schema: bool,
    /// Whether concurrent invocations are allowed.
    pub can_concurrent: bool,
    /// Whether the tool is hidden from listings.
    pub hidden: bool,
    /// Declared permission tags.
    pub permissions: Vec<String>,
    /// Whether the definition has a callable `execute`.
    pub has_execute: bool,
    /// Whether an in-progress renderer exists (flat or nested form).
    pub has_render_doing: bool,
    /// Whether a result renderer exists (flat or nested form).
    pub has_render_result: bool,
}

/// Sandboxed evaluation engine scoped to one tool.
pub struct ToolEngine {
    resolver: ModuleResolver,
    timeout: Duration,
    memory_limit: usize,
    allow_network: bool,
}

impl ToolEngine {
    /// Creates an engine with default limits and no network access.
    #[must_use]
    pub fn new(resolver: ModuleResolver) -> Self {
        Self {
            resolver,
            timeout: MAX_EXECUTION_TIME,
            memory_limit: MAX_MEMORY_BYTES,
            allow_network: false,
        }
    }

    /// Sets the execution timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the memory limit.
    #[must_use]
    pub fn with_memory_limit(mut self, limit: usize) -> Self {
        self.memory_limit = limit;
        self
    }

    /// Grants the `fetch` global network access.
    #[must_use]
    pub fn with_network(mut self, allow_network: bool) -> Self {
        self.allow_network = allow_network;
        self
    }

    /// Builds a fresh runtime/context pair with limits and the module
    /// loader installed.
    async fn build_context(&self) -> ToolResult<(AsyncRuntime, AsyncContext)> {
        let runtime = AsyncRuntime::new()
            .map_err(|err| ToolError::Execute(format!("Failed to create runtime: {err}")))?;

        runtime.set_max_stack_size(MAX_STACK_SIZE).await;
        runtime.set_memory_limit(self.memory_limit).await;
        runtime
            .set_loader(
                EngineResolver {
                    inner: self.resolver.clone(),
                },
                EngineLoader,
            )
            .await;
        runtime.idle().await;

        let context = AsyncContext::full(&runtime)
            .await
            .map_err(|err| ToolError::Execute(format!("Failed to create context: {err}")))?;
        Ok((runtime, context))
    }

    /// Evaluates the compiled entry module and reads definition metadata
    /// from its default export.
    ///
    /// # Errors
    /// Returns an execute-stage error when evaluation throws or the default
    /// export is not an object.
    pub async fn evaluate_definition(&self, module: &CompiledModule) -> ToolResult<DefinitionMeta> {
        let (_runtime, context) = self.build_context().await?;
        let allow_network = self.allow_network;
        let filename = module.filename.clone();
        let code = module.code.clone();

        let evaluation = async_with!(context => |ctx| {
            install_fetch(&ctx, allow_network)?;
            let definition = evaluate_default(&ctx, &filename, &code).await?;
            read_definition_meta(&definition)
        });

        tokio::time::timeout(self.timeout, evaluation)
            .await
            .map_err(|_| ToolError::Execute(format!("evaluation of {} timed out", module.filename)))?
    }

    /// Runs the definition's `execute(params, context)` and converts the
    /// (awaited) result to JSON.
    ///
    /// # Errors
    /// Returns an execute-stage error when the definition has no `execute`,
    /// the call throws, or execution times out.
    pub async fn execute(
        &self,
        module: &CompiledModule,
        params: &Value,
        execution: &ExecutionContext,
    ) -> ToolResult<Value> {
        let (_runtime, context) = self.build_context().await?;
        let allow_network = self.allow_network;
        let filename = module.filename.clone();
        let code = module.code.clone();
        let params = params.clone();
        let execution_json = serde_json::to_value(execution)?;

        let run = async_with!(context => |ctx| {
            install_fetch(&ctx, allow_network)?;
            let definition = evaluate_default(&ctx, &filename, &code).await?;

            let function: Function = definition
                .get(EXECUTE_KEY)
                .map_err(|_| ToolError::Execute(format!(
                    "tool {filename} has no execute function"
                )))?;

            let params_js = json_to_js_value(&ctx, &params)
                .map_err(|err| ToolError::Execute(format!("param conversion failed: {err}")))?;
            let context_js = json_to_js_value(&ctx, &execution_json)
                .map_err(|err| ToolError::Execute(format!("context conversion failed: {err}")))?;

            let result: JsValue = function
                .call((params_js, context_js))
                .catch(&ctx)
                .map_err(|err| ToolError::Execute(err.to_string()))?;
            resolve_js_result(&ctx, result).await
        });

        tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| ToolError::Execute(format!("execution of {} timed out", module.filename)))?
    }

    /// Invokes one of the definition's renderers and returns the element
    /// tree as JSON.
    ///
    /// Looks for the flat `renderToolDoing`/`renderToolResult` key first,
    /// then the nested `ui.{Doing,Result}` form.
    ///
    /// # Errors
    /// Returns a render-stage error when no such renderer exists or the
    /// call throws.
    pub async fn render(
        &self,
        module: &CompiledModule,
        renderer: Renderer,
        args: &[Value],
    ) -> ToolResult<Value> {
        let (_runtime, context) = self.build_context().await?;
        let allow_network = self.allow_network;
        let filename = module.filename.clone();
        let code = module.code.clone();
        let args = args.to_vec();

        let run = async_with!(context => |ctx| {
            install_fetch(&ctx, allow_network)?;
            let definition = evaluate_default(&ctx, &filename, &code).await?;

            let function = find_renderer(&definition, renderer).ok_or_else(|| {
                ToolError::Render(format!("tool {filename} has no {} renderer", renderer.key()))
            })?;

            let mut js_args = Vec::with_capacity(args.len());
            for arg in &args {
                js_args.push(json_to_js_value(&ctx, arg).map_err(|err| {
                    ToolError::Render(format!("renderer argument conversion failed: {err}"))
                })?);
            }

            let result: JsValue = match js_args.len() {
                0 => function.call(()),
                1 => function.call((js_args.remove(0),)),
                _ => {
                    let second = js_args.remove(1);
                    let first = js_args.remove(0);
                    function.call((first, second))
                }
            }
            .catch(&ctx)
            .map_err(|err| ToolError::Render(err.to_string()))?;

            match resolve_js_result(&ctx, result).await {
                Ok(value) => Ok(value),
                Err(ToolError::Execute(message)) => Err(ToolError::Render(message)),
                Err(other) => Err(other),
            }
        });

        tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| ToolError::Render(format!("rendering for {} timed out", module.filename)))?
    }
}

/// Key of the callable entry point on a definition object.
const EXECUTE_KEY: &str = "execute";

/// Declares and evaluates the entry module, returning its default export as
/// an object.
async fn evaluate_default<'js>(
    ctx: &Ctx<'js>,
    filename: &str,
    code: &str,
) -> ToolResult<Object<'js>> {
    let declared = Module::declare(ctx.clone(), filename, code)
        .catch(ctx)
        .map_err(|err| ToolError::Execute(format!("module declaration failed: {err}")))?;

    let (evaluated, promise) = declared
        .eval()
        .catch(ctx)
        .map_err(|err| ToolError::Execute(format!("module evaluation failed: {err}")))?;
    promise
        .into_future::<()>()
        .await
        .catch(ctx)
        .map_err(|err| ToolError::Execute(format!("module evaluation failed: {err}")))?;

    let namespace = evaluated
        .namespace()
        .map_err(|err| ToolError::Execute(format!("module namespace unavailable: {err}")))?;

    let default: JsValue = namespace
        .get("default")
        .map_err(|_| ToolError::Execute(format!("{filename} has no default export")))?;
    default
        .into_object()
        .ok_or_else(|| ToolError::Execute(format!("{filename} default export is not an object")))
}

/// Awaits a promise result if the call returned one, then converts to JSON.
async fn resolve_js_result<'js>(ctx: &Ctx<'js>, result: JsValue<'js>) -> ToolResult<Value> {
    if let Some(promise) = result.as_promise() {
        let resolved: JsValue = promise
            .clone()
            .into_future()
            .await
            .catch(ctx)
            .map_err(|err| ToolError::Execute(err.to_string()))?;
        js_value_to_json(&resolved)
    } else {
        js_value_to_json(&result)
    }
}

/// Reads definition metadata off the default-export object.
fn read_definition_meta(definition: &Object<'_>) -> ToolResult<DefinitionMeta> {
    let get_string = |key: &str| -> Option<String> {
        definition
            .get::<_, JsValue>(key)
            .ok()
            .and_then(|value| value.as_string().and_then(|text| text.to_string().ok()))
    };
    let get_bool = |key: &str| -> bool {
        definition
            .get::<_, JsValue>(key)
            .ok()
            .and_then(|value| value.as_bool())
            .unwrap_or(false)
    };
    let is_function = |key: &str| -> bool {
        definition
            .get::<_, JsValue>(key)
            .is_ok_and(|value| value.is_function())
    };

    let permissions = definition
        .get::<_, JsValue>("permissions")
        .ok()
        .and_then(|value| js_value_to_json(&value).ok())
        .and_then(|value| match value {
            Value::Array(items) => Some(
                items
                    .into_iter()
                    .filter_map(|item| match item {
                        Value::String(tag) => Some(tag),
                        _ => None,
                    })
                    .collect(),
            ),
            _ => None,
        })
        .unwrap_or_default();

    Ok(DefinitionMeta {
        name: get_string("name"),
        description: get_string("description"),
        has_input_schema: definition
            .get::<_, JsValue>("inputSchema")
            .is_ok_and(|value| !value.is_undefined() && !value.is_null()),
        can_concurrent: get_bool("canConcurrent"),
        hidden: get_bool("hidden"),
        permissions,
        has_execute: is_function(EXECUTE_KEY),
        has_render_doing: is_function(Renderer::Doing.key())
            || nested_renderer(definition, Renderer::Doing).is_some(),
        has_render_result: is_function(Renderer::Result.key())
            || nested_renderer(definition, Renderer::Result).is_some(),
    })
}

/// Finds a renderer function: flat key first, then `ui.{Doing,Result}`.
fn find_renderer<'js>(definition: &Object<'js>, renderer: Renderer) -> Option<Function<'js>> {
    if let Ok(function) = definition.get::<_, Function>(renderer.key()) {
        return Some(function);
    }
    nested_renderer(definition, renderer)
}

fn nested_renderer<'js>(definition: &Object<'js>, renderer: Renderer) -> Option<Function<'js>> {
    let ui: Object<'js> = definition.get("ui").ok()?;
    ui.get::<_, Function>(renderer.ui_key()).ok()
}

/// Bridges the plugin-scoped resolver into the QuickJS loader API.
///
/// Resolved names carry their kind as a prefix so the loader can serve
/// stubs from memory, files from disk, and misses as the inert placeholder.
struct EngineResolver {
    inner: ModuleResolver,
}

impl Resolver for EngineResolver {
    fn resolve(&mut self, _ctx: &Ctx<'_>, base: &str, name: &str) -> rquickjs::Result<String> {
        // Stub modules have no imports; fall back to the base name itself
        // when it is not a real path.
        let referrer = if base.starts_with(STUB_PREFIX) || base.starts_with(MISSING_PREFIX) {
            PathBuf::from(".")
        } else {
            PathBuf::from(base)
        };

        match self.inner.resolve(name, &referrer) {
            Ok(ResolvedModule::Stub(_)) => Ok(format!("{STUB_PREFIX}{name}")),
            Ok(ResolvedModule::File(path)) => Ok(path.display().to_string()),
            Ok(ResolvedModule::Missing) => {
                tracing::debug!("module {name} (from {base}) did not resolve; deferring failure");
                Ok(format!("{MISSING_PREFIX}{name}"))
            }
            Err(err) => {
                tracing::warn!("refusing to resolve {name} from {base}: {err}");
                Err(rquickjs::Error::new_resolving(base.to_owned(), name.to_owned()))
            }
        }
    }
}

/// Loads modules named by [`EngineResolver`].
struct EngineLoader;

impl Loader for EngineLoader {
    fn load<'js>(
        &mut self,
        ctx: &Ctx<'js>,
        name: &str,
    ) -> rquickjs::Result<Module<'js, Declared>> {
        let source = if let Some(stub_name) = name.strip_prefix(STUB_PREFIX) {
            builtin_stub(stub_name)
                .ok_or_else(|| loading_error(name))?
                .to_owned()
        } else if name.starts_with(MISSING_PREFIX) {
            MISSING_STUB.to_owned()
        } else {
            let raw = std::fs::read_to_string(name).map_err(|err| {
                tracing::warn!("failed to read module {name}: {err}");
                loading_error(name)
            })?;
            compile_dependency(&raw, name)
                .map_err(|err| {
                    tracing::warn!("failed to compile module {name}: {err}");
                    loading_error(name)
                })?
                .code
        };

        Module::declare(ctx.clone(), name, source)
    }
}

fn loading_error(name: &str) -> QuickJsError {
    QuickJsError::new_loading(name.to_owned())
}

#[cfg(test)]
#[cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, reason = "Allow for tests")
)]
mod tests {
    use super::*;
    use grimoire_compiler::compile_tool;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn engine_for(dir: &TempDir) -> ToolEngine {
        ToolEngine::new(ModuleResolver::single_file(dir.path().to_path_buf()))
    }

    fn compile_in(dir: &TempDir, name: &str, source: &str) -> CompiledModule {
        let path = dir.path().join(name);
        fs::write(&path, source).unwrap();
        compile_tool(source, &path.display().to_string()).unwrap()
    }

    #[tokio::test]
    async fn test_evaluate_minimal_definition() {
        let dir = TempDir::new().unwrap();
        let module = compile_in(
            &dir,
            "echo-tool.ts",
            r"
export default {
    name: 'echo',
    description: 'Echoes params back',
    canConcurrent: true,
    execute: async (params: any) => params,
};
",
        );
        let meta = engine_for(&dir).evaluate_definition(&module).await.unwrap();
        assert_eq!(meta.name.as_deref(), Some("echo"));
        assert_eq!(meta.description.as_deref(), Some("Echoes params back"));
        assert!(meta.can_concurrent);
        assert!(!meta.hidden);
        assert!(meta.has_execute);
        assert!(!meta.has_render_doing);
    }

    #[tokio::test]
    async fn test_nested_ui_renderers_detected() {
        let dir = TempDir::new().unwrap();
        let module = compile_in(
            &dir,
            "ui-tool.ts",
            r"
export default {
    name: 'ui',
    execute: async () => null,
    ui: {
        Doing: (params: any) => 'working',
        Result: (params: any, output: any) => String(output),
    },
};
",
        );
        let meta = engine_for(&dir).evaluate_definition(&module).await.unwrap();
        assert!(meta.has_render_doing);
        assert!(meta.has_render_result);
    }

    #[tokio::test]
    async fn test_execute_returns_json_result() {
        let dir = TempDir::new().unwrap();
        let module = compile_in(
            &dir,
            "sum-tool.ts",
            r"
export default {
    name: 'sum',
    execute: async (params: { a: number, b: number }) => ({ total: params.a + params.b }),
};
",
        );
        let context = ExecutionContext {
            task_id: Some("task-1".to_owned()),
            tool_id: "sum".to_owned(),
        };
        let result = engine_for(&dir)
            .execute(&module, &json!({"a": 2, "b": 3}), &context)
            .await
            .unwrap();
        assert_eq!(result, json!({"total": 5}));
    }

    #[tokio::test]
    async fn test_execute_receives_context() {
        let dir = TempDir::new().unwrap();
        let module = compile_in(
            &dir,
            "ctx-tool.ts",
            r"
export default {
    name: 'ctx',
    execute: async (params: any, context: any) => context.taskId,
};
",
        );
        let context = ExecutionContext {
            task_id: Some("task-42".to_owned()),
            tool_id: "ctx".to_owned(),
        };
        let result = engine_for(&dir)
            .execute(&module, &json!({}), &context)
            .await
            .unwrap();
        assert_eq!(result, json!("task-42"));
    }

    #[tokio::test]
    async fn test_execute_error_surfaces_message() {
        let dir = TempDir::new().unwrap();
        let module = compile_in(
            &dir,
            "fail-tool.ts",
            r"
export default {
    name: 'fail',
    execute: async () => { throw new Error('deliberate'); },
};
",
        );
        let context = ExecutionContext {
            task_id: Some("t".to_owned()),
            tool_id: "fail".to_owned(),
        };
        let error = engine_for(&dir)
            .execute(&module, &json!({}), &context)
            .await
            .unwrap_err();
        assert_eq!(error.stage(), "execute");
    }

    #[tokio::test]
    async fn test_define_tool_stub_import() {
        let dir = TempDir::new().unwrap();
        let module = compile_in(
            &dir,
            "defined-tool.ts",
            r"
import { defineTool } from '@grimoire/tools';
export default defineTool({
    name: 'defined',
    execute: async () => 'ok',
});
",
        );
        let meta = engine_for(&dir).evaluate_definition(&module).await.unwrap();
        assert_eq!(meta.name.as_deref(), Some("defined"));
        assert!(meta.has_execute);
    }

    #[tokio::test]
    async fn test_relative_import_resolved() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("shared.js"), "export const label = 'shared';").unwrap();
        let module = compile_in(
            &dir,
            "uses-shared-tool.ts",
            r"
import { label } from './shared';
export default {
    name: 'uses-shared',
    execute: async () => label,
};
",
        );
        let context = ExecutionContext {
            task_id: Some("t".to_owned()),
            tool_id: "uses-shared".to_owned(),
        };
        let result = engine_for(&dir)
            .execute(&module, &json!(null), &context)
            .await
            .unwrap();
        assert_eq!(result, json!("shared"));
    }

    #[tokio::test]
    async fn test_missing_import_defers_until_required() {
        let dir = TempDir::new().unwrap();
        // The specifier does not resolve; the module still evaluates and the
        // failure only surfaces when require() runs.
        let module = compile_in(
            &dir,
            "lazy-tool.js",
            r#"
export default {
    name: 'lazy',
    execute: async () => {
        const dep = require("never-installed");
        return dep;
    },
};
"#,
        );
        let engine = engine_for(&dir);
        let meta = engine.evaluate_definition(&module).await.unwrap();
        assert!(meta.has_execute);

        let context = ExecutionContext {
            task_id: Some("t".to_owned()),
            tool_id: "lazy".to_owned(),
        };
        let error = engine
            .execute(&module, &json!({}), &context)
            .await
            .unwrap_err();
        assert!(error.to_string().contains("import not found"));
    }

    #[tokio::test]
    async fn test_render_result_renderer() {
        let dir = TempDir::new().unwrap();
        let module = compile_in(
            &dir,
            "render-tool.tsx",
            r"
export default {
    name: 'render',
    execute: async () => 'done',
    renderToolResult: (params: any, output: any) => <div>{output}</div>,
};
",
        );
        let rendered = engine_for(&dir)
            .render(&module, Renderer::Result, &[json!({}), json!("done")])
            .await
            .unwrap();
        assert_eq!(rendered["type"], json!("div"));
        assert_eq!(rendered["props"]["children"], json!("done"));
    }

    #[tokio::test]
    async fn test_render_missing_renderer_is_render_stage() {
        let dir = TempDir::new().unwrap();
        let module = compile_in(
            &dir,
            "bare-tool.ts",
            "export default { name: 'bare', execute: async () => 1 };",
        );
        let error = engine_for(&dir)
            .render(&module, Renderer::Doing, &[json!({})])
            .await
            .unwrap_err();
        assert_eq!(error.stage(), "render");
    }

    #[tokio::test]
    async fn test_fetch_denied_without_permission() {
        let dir = TempDir::new().unwrap();
        let module = compile_in(
            &dir,
            "net-tool.ts",
            r"
export default {
    name: 'net',
    execute: async () => fetch('http://127.0.0.1:1/none'),
};
",
        );
        let context = ExecutionContext {
            task_id: Some("t".to_owned()),
            tool_id: "net".to_owned(),
        };
        let error = engine_for(&dir)
            .execute(&module, &json!({}), &context)
            .await
            .unwrap_err();
        // The denial must carry the permission name so authors can fix
        // their manifest instead of chasing a message-less throw.
        assert!(error.to_string().contains("'network' permission"));
    }
}
