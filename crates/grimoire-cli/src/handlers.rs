//! Command handlers for CLI operations.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result, bail};
use tracing_subscriber::EnvFilter;

use grimoire_core::{ExecutionContext, GrimoireConfig, LoadStatus, ToolKind};
use grimoire_loader::{ToolLoader, ToolRegistry, validate_tool};

/// Initializes tracing to stderr; stdout is reserved for command output.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "grimoire=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn loader_for(project: &Path) -> Result<(ToolLoader, GrimoireConfig)> {
    let workspace_root = project
        .canonicalize()
        .with_context(|| format!("project directory {} not found", project.display()))?;
    let config = GrimoireConfig::load(&workspace_root)?;
    let loader = ToolLoader::new(workspace_root, config.clone());
    Ok((loader, config))
}

/// Scans the tool directories and prints one line per load result.
///
/// # Errors
/// Returns an error when the project directory or configuration is
/// unreadable.
pub async fn handle_list(project: PathBuf) -> Result<()> {
    let (loader, _config) = loader_for(&project)?;
    let results = loader.load_all().await;

    if results.is_empty() {
        println!("no custom tools found");
        return Ok(());
    }

    for result in &results {
        let kind = result.definition.as_ref().map_or("-", |definition| {
            match definition.kind {
                ToolKind::SingleFile => "file",
                ToolKind::Packaged => "package",
            }
        });
        match result.status {
            LoadStatus::Loaded => {
                println!(
                    "{:<24} {:<10} {:<8} {}",
                    result.name,
                    format!("{:?}", result.source).to_lowercase(),
                    kind,
                    result.path.display()
                );
            }
            LoadStatus::Error => {
                println!(
                    "{:<24} {:<10} {:<8} ERROR: {}",
                    result.name,
                    format!("{:?}", result.source).to_lowercase(),
                    kind,
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
    }
    Ok(())
}

/// Loads all tools, then executes the named one with the given parameters.
///
/// # Errors
/// Returns an error when the tool is unknown, parameters are not valid
/// JSON, or execution fails.
pub async fn handle_run(
    project: PathBuf,
    name: String,
    params: String,
    task_id: Option<String>,
) -> Result<()> {
    let (loader, config) = loader_for(&project)?;
    let params: serde_json::Value =
        serde_json::from_str(&params).context("--params must be valid JSON")?;

    let results = loader.load_all().await;
    let mut registry = ToolRegistry::new();
    registry.merge(&results);

    let Some(adapter) = registry.adapter(&name, &config.runner) else {
        bail!("no tool named {name} (run `grimoire list` to see what loaded)");
    };

    let context = ExecutionContext {
        task_id,
        tool_id: name,
    };
    let output = adapter
        .execute(&params, &context)
        .await
        .context("tool execution failed")?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Validates a single tool candidate and reports the outcome.
///
/// # Errors
/// Returns an error when the candidate fails any diagnostic check.
pub async fn handle_check(project: PathBuf, path: PathBuf) -> Result<()> {
    let (loader, config) = loader_for(&project)?;
    let candidate = path
        .canonicalize()
        .with_context(|| format!("tool path {} not found", path.display()))?;

    match validate_tool(&loader, &config.runner, &candidate).await {
        Ok(definition) => {
            println!("{} OK", definition.name);
            println!("  kind:        {:?}", definition.kind);
            println!("  description: {}", definition.description);
            println!("  renderers:   doing={} result={}",
                definition.has_render_doing, definition.has_render_result);
            Ok(())
        }
        Err(err) => bail!("{} failed validation: {err}", candidate.display()),
    }
}
