//! Tool discovery and loading.
//!
//! Scans the configured tool directories, classifies each entry as a
//! single-file or packaged tool candidate, and runs the full load pipeline
//! per candidate. Failures never abort a scan: each candidate yields exactly
//! one [`ToolLoadResult`], loaded or errored, so hosts can report
//! diagnostics for every tool the user authored.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use grimoire_compiler::{ModuleResolver, compile_tool, extract_input_schema};
use grimoire_core::{
    GrimoireConfig, InputSchema, PackageInfo, ToolDefinition, ToolError, ToolKind, ToolLoadResult,
    ToolResult, ToolSource, USER_TOOLS_DIR, WORKSPACE_TOOLS_DIR,
};
use grimoire_runtime::ToolEngine;

use crate::install::{CommandInstaller, Installer, ensure_tool_dependencies};
use crate::package::{declared_dependencies, validate_package};

/// Filename suffix (before the extension) marking single-file tools.
const TOOL_SUFFIX: &str = "-tool";

/// Discovers and loads custom tools.
pub struct ToolLoader {
    workspace_root: PathBuf,
    config: GrimoireConfig,
    installer: Arc<dyn Installer>,
}

impl ToolLoader {
    /// Creates a loader using the command-line package managers from the
    /// host configuration.
    #[must_use]
    pub fn new(workspace_root: PathBuf, config: GrimoireConfig) -> Self {
        let installer = Arc::new(CommandInstaller::new(&config.runner));
        Self {
            workspace_root,
            config,
            installer,
        }
    }

    /// Swaps the installer seam, used by tests and hosts with their own
    /// package management.
    #[must_use]
    pub fn with_installer(mut self, installer: Arc<dyn Installer>) -> Self {
        self.installer = installer;
        self
    }

    /// Directories to scan, tagged with their source.
    ///
    /// An explicitly configured directory replaces the conventional pair;
    /// otherwise the workspace and user directories are scanned, duplicates
    /// removed by normalized path.
    #[must_use]
    pub fn scan_roots(&self) -> Vec<(PathBuf, ToolSource)> {
        if let Some(custom) = &self.config.tools_dir {
            return vec![(custom.clone(), ToolSource::Custom)];
        }

        let mut roots = vec![(
            self.workspace_root.join(WORKSPACE_TOOLS_DIR),
            ToolSource::Workspace,
        )];
        if let Some(home) = dirs::home_dir() {
            roots.push((home.join(USER_TOOLS_DIR), ToolSource::User));
        }

        let mut seen = HashSet::new();
        roots.retain(|(path, _)| {
            let normalized = path.canonicalize().unwrap_or_else(|_| path.clone());
            seen.insert(normalized)
        });
        roots
    }

    /// Loads every candidate in every scan root.
    pub async fn load_all(&self) -> Vec<ToolLoadResult> {
        let mut results = Vec::new();
        for (root, source) in self.scan_roots() {
            let mut entries = match tokio::fs::read_dir(&root).await {
                Ok(entries) => entries,
                Err(err) => {
                    tracing::debug!("skipping tools dir {}: {err}", root.display());
                    continue;
                }
            };

            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(err) => {
                        tracing::warn!("error while scanning {}: {err}", root.display());
                        break;
                    }
                };
                let path = entry.path();
                if path.is_dir() || is_single_file_candidate(&path) {
                    results.push(self.load_candidate(&path, source).await);
                }
            }
        }
        results
    }

    /// Runs the load pipeline for one candidate, converting any failure
    /// into an errored result.
    pub async fn load_candidate(&self, path: &Path, source: ToolSource) -> ToolLoadResult {
        let fallback_name = candidate_name(path);
        if path.is_dir() {
            match self.load_package(path, source).await {
                Ok((definition, package)) => ToolLoadResult::loaded(definition, Some(package)),
                Err(err) => {
                    tracing::warn!("failed to load packaged tool {}: {err}", path.display());
                    ToolLoadResult::failed(fallback_name, path.to_path_buf(), source, err.to_string())
                }
            }
        } else {
            match self.load_single_file(path, source).await {
                Ok(definition) => ToolLoadResult::loaded(definition, None),
                Err(err) => {
                    tracing::warn!("failed to load tool file {}: {err}", path.display());
                    ToolLoadResult::failed(fallback_name, path.to_path_buf(), source, err.to_string())
                }
            }
        }
    }

    /// Loads a single-file tool: read, compile, evaluate, describe.
    async fn load_single_file(
        &self,
        path: &Path,
        source: ToolSource,
    ) -> ToolResult<ToolDefinition> {
        let source_text = tokio::fs::read_to_string(path).await?;
        let static_schema = extract_input_schema(&source_text);

        let filename = path.display().to_string();
        let module = compile_tool(&source_text, &filename)?;

        let entry_dir = path.parent().unwrap_or(path).to_path_buf();
        let engine = ToolEngine::new(ModuleResolver::single_file(entry_dir));
        let meta = engine.evaluate_definition(&module).await?;

        if !meta.has_execute {
            return Err(ToolError::Resolve(format!(
                "tool {} default export has no execute function",
                path.display()
            )));
        }
        if meta.has_input_schema && static_schema.is_none() {
            tracing::warn!(
                "tool {} declares a runtime input schema that could not be extracted \
                 statically; parameters will not be validated",
                path.display()
            );
        }

        let name = meta.name.unwrap_or_else(|| candidate_name(path));
        Ok(ToolDefinition {
            name,
            description: meta.description.unwrap_or_default(),
            input_schema: static_schema.map_or(InputSchema::Permissive, InputSchema::Object),
            kind: ToolKind::SingleFile,
            entry_path: path.to_path_buf(),
            package_root: None,
            source,
            can_concurrent: meta.can_concurrent,
            hidden: meta.hidden,
            permissions: meta.permissions,
            has_render_doing: meta.has_render_doing,
            has_render_result: meta.has_render_result,
        })
    }

    /// Loads a packaged tool: validate, install, evaluate entry for
    /// metadata only. Execution happens out-of-process later.
    async fn load_package(
        &self,
        dir: &Path,
        source: ToolSource,
    ) -> ToolResult<(ToolDefinition, PackageInfo)> {
        let package = validate_package(dir).await?;
        ensure_tool_dependencies(&package, self.installer.as_ref()).await?;

        let source_text = tokio::fs::read_to_string(&package.entry).await?;
        let static_schema = extract_input_schema(&source_text);

        let filename = package.entry.display().to_string();
        let module = compile_tool(&source_text, &filename)?;

        let declared = declared_dependencies(&package).await?.into_iter().collect();
        let engine = ToolEngine::new(ModuleResolver::packaged(package.root.clone(), declared));
        let meta = engine.evaluate_definition(&module).await?;

        if !meta.has_execute {
            return Err(ToolError::Resolve(format!(
                "tool {} default export has no execute function",
                package.entry.display()
            )));
        }
        if meta.has_input_schema && static_schema.is_none() {
            tracing::warn!(
                "tool {} declares a runtime input schema that could not be extracted \
                 statically; parameters will not be validated",
                package.entry.display()
            );
        }

        let name = meta
            .name
            .or_else(|| package.name.clone())
            .unwrap_or_else(|| candidate_name(dir));
        let definition = ToolDefinition {
            name,
            description: meta.description.unwrap_or_default(),
            input_schema: static_schema.map_or(InputSchema::Permissive, InputSchema::Object),
            kind: ToolKind::Packaged,
            entry_path: package.entry.clone(),
            package_root: Some(package.root.clone()),
            source,
            can_concurrent: meta.can_concurrent,
            hidden: meta.hidden,
            permissions: meta.permissions,
            has_render_doing: meta.has_render_doing,
            has_render_result: meta.has_render_result,
        };
        Ok((definition, package))
    }
}

/// Whether a file path names a single-file tool candidate.
fn is_single_file_candidate(path: &Path) -> bool {
    let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
        return false;
    };
    if file_name.ends_with(".d.ts") {
        return false;
    }
    let Some(stem) = file_name
        .strip_suffix(".ts")
        .or_else(|| file_name.strip_suffix(".tsx"))
    else {
        return false;
    };
    stem.ends_with(TOOL_SUFFIX)
}

/// Best-effort tool name from a candidate path: file stem minus the
/// `-tool` suffix.
fn candidate_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("tool");
    stem.strip_suffix(TOOL_SUFFIX).unwrap_or(stem).to_owned()
}

#[cfg(test)]
#[cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, reason = "Allow for tests")
)]
mod tests {
    use super::*;

    #[test]
    fn test_single_file_candidate_matching() {
        assert!(is_single_file_candidate(Path::new("weather-tool.ts")));
        assert!(is_single_file_candidate(Path::new("weather-tool.tsx")));
        assert!(!is_single_file_candidate(Path::new("weather-tool.d.ts")));
        assert!(!is_single_file_candidate(Path::new("weather.ts")));
        assert!(!is_single_file_candidate(Path::new("weather-tool.js")));
        assert!(!is_single_file_candidate(Path::new("notes.md")));
    }

    #[test]
    fn test_candidate_name_strips_suffix() {
        assert_eq!(candidate_name(Path::new("/x/weather-tool.ts")), "weather");
        assert_eq!(candidate_name(Path::new("/x/weather.ts")), "weather");
        assert_eq!(candidate_name(Path::new("/x/my-pkg")), "my-pkg");
    }

    #[test]
    fn test_custom_dir_replaces_conventional_roots() {
        let config = GrimoireConfig {
            tools_dir: Some(PathBuf::from("/opt/tools")),
            ..GrimoireConfig::default()
        };
        let loader = ToolLoader::new(PathBuf::from("/workspace"), config);
        let roots = loader.scan_roots();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].1, ToolSource::Custom);
        assert_eq!(roots[0].0, PathBuf::from("/opt/tools"));
    }

    #[test]
    fn test_conventional_roots_workspace_first() {
        let loader = ToolLoader::new(PathBuf::from("/workspace"), GrimoireConfig::default());
        let roots = loader.scan_roots();
        assert!(!roots.is_empty());
        assert_eq!(roots[0].1, ToolSource::Workspace);
        assert!(roots[0].0.ends_with(".grimoire/tools"));
    }
}
