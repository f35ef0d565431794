//! Tool registry and execution adapter.
//!
//! The registry owns the merged name-to-definition map. Collisions are
//! resolved by source priority (`custom > workspace > user`), ties by last
//! write, and every shadowing decision is logged so a user whose tool
//! silently "disappeared" can find out why. The adapter wraps one
//! registered definition with parameter validation, execution dispatch, and
//! default renderables.

use std::collections::HashMap;
use std::collections::HashSet;

use serde_json::{Value, json};

use grimoire_compiler::{ModuleResolver, compile_tool};
use grimoire_core::{
    ExecutionContext, RunnerConfig, ToolDefinition, ToolError, ToolKind, ToolLoadResult,
    ToolResult, ToolSource,
};
use grimoire_runtime::{NETWORK_PERMISSION, Renderer, SubprocessExecutor, ToolEngine};

use crate::package::declared_dependencies;
use crate::package::validate_package;

/// Merged view of all loaded tools.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolDefinition>,
    generation: u64,
}

impl ToolRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges successful load results into the registry.
    ///
    /// A higher-priority source wins a name collision; equal priority means
    /// last write wins. Either way the loser is logged.
    pub fn merge(&mut self, results: &[ToolLoadResult]) {
        for result in results {
            let Some(definition) = &result.definition else {
                continue;
            };
            self.insert(definition.clone());
        }
        self.generation += 1;
    }

    /// Atomically replaces the custom-sourced subset of tools and bumps the
    /// generation counter so downstream schema caches re-fetch.
    pub fn replace_custom_tools(&mut self, results: &[ToolLoadResult]) {
        self.tools
            .retain(|_, definition| definition.source != ToolSource::Custom);
        for result in results {
            let Some(definition) = &result.definition else {
                continue;
            };
            if definition.source == ToolSource::Custom {
                self.insert(definition.clone());
            }
        }
        self.generation += 1;
    }

    fn insert(&mut self, definition: ToolDefinition) {
        match self.tools.get(&definition.name) {
            Some(existing) if existing.source.priority() > definition.source.priority() => {
                tracing::warn!(
                    "tool {} from {:?} is shadowed by the {:?} version",
                    definition.name,
                    definition.source,
                    existing.source
                );
            }
            Some(existing) => {
                tracing::warn!(
                    "tool {} from {:?} replaces the {:?} version",
                    definition.name,
                    definition.source,
                    existing.source
                );
                self.tools.insert(definition.name.clone(), definition);
            }
            None => {
                self.tools.insert(definition.name.clone(), definition);
            }
        }
    }

    /// Looks up a tool by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name)
    }

    /// All registered tools, sorted by name.
    #[must_use]
    pub fn list(&self) -> Vec<&ToolDefinition> {
        let mut tools: Vec<&ToolDefinition> = self.tools.values().collect();
        tools.sort_by(|left, right| left.name.cmp(&right.name));
        tools
    }

    /// Monotonic counter bumped on every mutation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Wraps a registered tool in an execution adapter.
    #[must_use]
    pub fn adapter(&self, name: &str, runner: &RunnerConfig) -> Option<AdaptedTool> {
        self.get(name)
            .map(|definition| AdaptedTool::new(definition.clone(), runner.clone()))
    }
}

/// One registered tool, ready to execute and render.
pub struct AdaptedTool {
    definition: ToolDefinition,
    runner: RunnerConfig,
}

impl AdaptedTool {
    /// Creates an adapter around a loaded definition.
    #[must_use]
    pub fn new(definition: ToolDefinition, runner: RunnerConfig) -> Self {
        Self { definition, runner }
    }

    /// The wrapped definition.
    #[must_use]
    pub fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    /// Validates parameters and executes the tool through the path its kind
    /// requires: packaged tools in a subprocess, single-file tools
    /// in-process.
    ///
    /// # Errors
    /// Returns a schema-stage error on invalid parameters and an
    /// execute-stage error on execution failure.
    pub async fn execute(&self, params: &Value, context: &ExecutionContext) -> ToolResult<Value> {
        let validated = self.definition.input_schema.safe_parse(params)?;

        match self.definition.kind {
            ToolKind::Packaged => {
                let Some(root) = &self.definition.package_root else {
                    return Err(ToolError::Execute(format!(
                        "packaged tool {} has no package root",
                        self.definition.name
                    )));
                };
                let executor = SubprocessExecutor::new(&self.runner);
                executor
                    .execute(root, &self.definition.entry_path, &validated, context)
                    .await
            }
            ToolKind::SingleFile => self.execute_in_process(&validated, context).await,
        }
    }

    /// In-process execution path. Refuses packaged tools: those must go
    /// through the subprocess runner.
    ///
    /// # Errors
    /// Returns an execute-stage error for packaged tools and for execution
    /// failures.
    pub async fn execute_in_process(
        &self,
        params: &Value,
        context: &ExecutionContext,
    ) -> ToolResult<Value> {
        if self.definition.kind == ToolKind::Packaged {
            return Err(ToolError::Execute(format!(
                "packaged tool {} must execute via the subprocess runner",
                self.definition.name
            )));
        }
        let (module, engine) = self.compile_and_engine().await?;
        engine.execute(&module, params, context).await
    }

    /// Renders the in-progress view, or a default when the tool has none.
    ///
    /// # Errors
    /// Returns a render-stage error when the tool's renderer fails.
    pub async fn render_doing(&self, params: &Value) -> ToolResult<Value> {
        if !self.definition.has_render_doing {
            return Ok(default_doing(&self.definition.name));
        }
        let (module, engine) = self.compile_and_engine().await?;
        engine
            .render(&module, Renderer::Doing, std::slice::from_ref(params))
            .await
    }

    /// Renders the completed view, or a default when the tool has none.
    ///
    /// # Errors
    /// Returns a render-stage error when the tool's renderer fails.
    pub async fn render_result(&self, params: &Value, output: &Value) -> ToolResult<Value> {
        if !self.definition.has_render_result {
            return Ok(default_result(output));
        }
        let (module, engine) = self.compile_and_engine().await?;
        engine
            .render(
                &module,
                Renderer::Result,
                &[params.clone(), output.clone()],
            )
            .await
    }

    /// Compiles the entry fresh and builds an engine scoped to this tool.
    async fn compile_and_engine(
        &self,
    ) -> ToolResult<(grimoire_compiler::CompiledModule, ToolEngine)> {
        let source = tokio::fs::read_to_string(&self.definition.entry_path).await?;
        let filename = self.definition.entry_path.display().to_string();
        let module = compile_tool(&source, &filename)?;

        let resolver = match &self.definition.package_root {
            Some(root) => {
                let package = validate_package(root).await?;
                let declared: HashSet<String> =
                    declared_dependencies(&package).await?.into_iter().collect();
                ModuleResolver::packaged(root.clone(), declared)
            }
            None => {
                let entry_dir = self
                    .definition
                    .entry_path
                    .parent()
                    .unwrap_or(&self.definition.entry_path)
                    .to_path_buf();
                ModuleResolver::single_file(entry_dir)
            }
        };

        let engine = ToolEngine::new(resolver)
            .with_network(self.definition.has_permission(NETWORK_PERMISSION));
        Ok((module, engine))
    }
}

/// Default in-progress renderable.
fn default_doing(name: &str) -> Value {
    json!({
        "type": "div",
        "props": {},
        "children": [format!("Running {name}...")],
    })
}

/// Default result renderable: strings pass through, everything else is
/// pretty-printed JSON.
fn default_result(output: &Value) -> Value {
    let text = match output {
        Value::String(text) => text.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    };
    json!({
        "type": "pre",
        "props": {},
        "children": [text],
    })
}

#[cfg(test)]
#[cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, reason = "Allow for tests")
)]
mod tests {
    use super::*;
    use grimoire_core::InputSchema;
    use std::path::PathBuf;

    fn definition(name: &str, source: ToolSource) -> ToolDefinition {
        ToolDefinition {
            name: name.to_owned(),
            description: String::new(),
            input_schema: InputSchema::Permissive,
            kind: ToolKind::SingleFile,
            entry_path: PathBuf::from(format!("/tools/{name}-tool.ts")),
            package_root: None,
            source,
            can_concurrent: false,
            hidden: false,
            permissions: Vec::new(),
            has_render_doing: false,
            has_render_result: false,
        }
    }

    fn loaded(name: &str, source: ToolSource) -> ToolLoadResult {
        ToolLoadResult::loaded(definition(name, source), None)
    }

    #[test]
    fn test_merge_priority_wins() {
        let mut registry = ToolRegistry::new();
        registry.merge(&[loaded("shared", ToolSource::User)]);
        registry.merge(&[loaded("shared", ToolSource::Workspace)]);

        assert_eq!(registry.get("shared").unwrap().source, ToolSource::Workspace);

        // Lower priority does not displace the workspace version.
        registry.merge(&[loaded("shared", ToolSource::User)]);
        assert_eq!(registry.get("shared").unwrap().source, ToolSource::Workspace);
    }

    #[test]
    fn test_merge_tie_is_last_write() {
        let mut registry = ToolRegistry::new();
        let mut first = definition("dup", ToolSource::Workspace);
        first.description = "first".to_owned();
        let mut second = definition("dup", ToolSource::Workspace);
        second.description = "second".to_owned();

        registry.merge(&[
            ToolLoadResult::loaded(first, None),
            ToolLoadResult::loaded(second, None),
        ]);
        assert_eq!(registry.get("dup").unwrap().description, "second");
    }

    #[test]
    fn test_merge_skips_errored_results() {
        let mut registry = ToolRegistry::new();
        registry.merge(&[ToolLoadResult::failed(
            "broken",
            PathBuf::from("/tools/broken-tool.ts"),
            ToolSource::User,
            "compile error: nope",
        )]);
        assert!(registry.get("broken").is_none());
    }

    #[test]
    fn test_replace_custom_tools_swaps_subset_and_bumps_generation() {
        let mut registry = ToolRegistry::new();
        registry.merge(&[
            loaded("keep", ToolSource::Workspace),
            loaded("old", ToolSource::Custom),
        ]);
        let before = registry.generation();

        registry.replace_custom_tools(&[loaded("new", ToolSource::Custom)]);

        assert!(registry.get("keep").is_some());
        assert!(registry.get("old").is_none());
        assert!(registry.get("new").is_some());
        assert!(registry.generation() > before);
    }

    #[test]
    fn test_list_sorted_by_name() {
        let mut registry = ToolRegistry::new();
        registry.merge(&[
            loaded("zeta", ToolSource::User),
            loaded("alpha", ToolSource::User),
        ]);
        let names: Vec<&str> = registry.list().iter().map(|tool| tool.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_default_renderables_shape() {
        let doing = default_doing("weather");
        assert_eq!(doing["type"], json!("div"));
        assert!(doing["children"][0].as_str().unwrap().contains("weather"));

        let result = default_result(&json!({"count": 2}));
        assert_eq!(result["type"], json!("pre"));
        assert!(result["children"][0].as_str().unwrap().contains("count"));

        let passthrough = default_result(&json!("plain text"));
        assert_eq!(passthrough["children"][0], json!("plain text"));
    }
}
