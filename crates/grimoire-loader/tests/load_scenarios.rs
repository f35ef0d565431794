//! Cross-module load scenarios: scanning, packaged tools, and registry
//! merging against real fixture trees.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;

use grimoire_core::{
    GrimoireConfig, InputSchema, PackageInfo, ToolKind, ToolLoadResult, ToolResult, ToolSource,
};
use grimoire_loader::{Installer, MARKER_FILE_NAME, ToolLoader, ToolRegistry, validate_tool};

struct CountingInstaller {
    calls: AtomicUsize,
}

impl CountingInstaller {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Installer for CountingInstaller {
    async fn install(&self, _package: &PackageInfo) -> ToolResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn write_tool(dir: &Path, name: &str, tool_name: &str) -> PathBuf {
    let path = dir.join(name);
    let source = format!(
        r"
export default {{
    name: '{tool_name}',
    description: 'fixture tool',
    execute: async (params: any) => params,
}};
"
    );
    fs::write(&path, source).expect("write tool file");
    path
}

fn write_packaged_tool(root: &Path) {
    fs::create_dir_all(root).expect("create package dir");
    fs::write(
        root.join("package.json"),
        r#"{"name": "packaged-fixture", "dependencies": {"zod": "^3.0.0"}}"#,
    )
    .expect("write manifest");
    fs::write(root.join("bun.lockb"), b"lock").expect("write lockfile");
    fs::write(
        root.join("tool.tsx"),
        r"
export default {
    name: 'packaged-fixture',
    description: 'packaged fixture tool',
    execute: async () => 'unreachable in-process',
};
",
    )
    .expect("write entry");
}

fn loader_for(workspace: &TempDir, installer: Arc<dyn Installer>) -> ToolLoader {
    ToolLoader::new(workspace.path().to_path_buf(), GrimoireConfig::default())
        .with_installer(installer)
}

#[tokio::test]
async fn two_root_merge_prefers_workspace() {
    let workspace = TempDir::new().expect("tempdir");
    let user_dir = TempDir::new().expect("tempdir");
    let workspace_tools = workspace.path().join(".grimoire/tools");
    fs::create_dir_all(&workspace_tools).expect("mkdir");

    let workspace_path = write_tool(&workspace_tools, "shared-tool.ts", "shared");
    let ws_only_path = write_tool(&workspace_tools, "ws-only-tool.ts", "ws-only");
    let user_path = write_tool(user_dir.path(), "shared-tool.ts", "shared");
    let home_path = write_tool(user_dir.path(), "home-tool.ts", "home");

    let loader = loader_for(&workspace, CountingInstaller::new());
    let from_workspace = loader
        .load_candidate(&workspace_path, ToolSource::Workspace)
        .await;
    let from_ws_only = loader
        .load_candidate(&ws_only_path, ToolSource::Workspace)
        .await;
    let from_user = loader.load_candidate(&user_path, ToolSource::User).await;
    let from_home = loader.load_candidate(&home_path, ToolSource::User).await;

    let mut registry = ToolRegistry::new();
    registry.merge(&[from_user, from_home, from_workspace, from_ws_only]);

    // Both roots contribute their unique tools; the collision keeps the
    // workspace copy.
    let names: Vec<&str> = registry
        .list()
        .iter()
        .map(|tool| tool.name.as_str())
        .collect();
    assert_eq!(names, vec!["home", "shared", "ws-only"]);

    let shared = registry.get("shared").expect("shared tool registered");
    assert_eq!(shared.source, ToolSource::Workspace);
    assert_eq!(shared.entry_path, workspace_path);

    // Merging the user copy again does not displace the workspace one.
    let loader = loader_for(&workspace, CountingInstaller::new());
    let from_user_again = loader.load_candidate(&user_path, ToolSource::User).await;
    registry.merge(&[from_user_again]);
    assert_eq!(
        registry.get("shared").expect("still registered").source,
        ToolSource::Workspace
    );
}

#[tokio::test]
async fn scan_loads_files_and_reports_failures() {
    let workspace = TempDir::new().expect("tempdir");
    let tools = workspace.path().join(".grimoire/tools");
    fs::create_dir_all(&tools).expect("mkdir");

    write_tool(&tools, "good-tool.ts", "good");
    fs::write(tools.join("broken-tool.ts"), "const x = ;").expect("write broken tool");
    // Not a candidate: wrong suffix.
    fs::write(tools.join("ignored.ts"), "export default {};").expect("write ignored file");

    let loader = loader_for(&workspace, CountingInstaller::new());
    let results: Vec<ToolLoadResult> = loader
        .load_all()
        .await
        .into_iter()
        .filter(|result| result.source == ToolSource::Workspace)
        .collect();

    assert_eq!(results.len(), 2);
    let good = results
        .iter()
        .find(|result| result.name == "good")
        .expect("good tool present");
    assert!(good.definition.is_some());

    let broken = results
        .iter()
        .find(|result| result.name == "broken")
        .expect("broken tool reported");
    assert!(broken.definition.is_none());
    assert!(broken.error.as_deref().expect("error message").contains("compile"));
}

#[tokio::test]
async fn packaged_tool_loads_with_one_install() {
    let workspace = TempDir::new().expect("tempdir");
    let package_root = workspace.path().join(".grimoire/tools/packaged-fixture");
    write_packaged_tool(&package_root);

    let installer = CountingInstaller::new();
    let loader = loader_for(&workspace, Arc::clone(&installer) as Arc<dyn Installer>);

    let result = loader
        .load_candidate(&package_root, ToolSource::Workspace)
        .await;
    let definition = result.definition.expect("packaged tool loads");
    assert_eq!(definition.kind, ToolKind::Packaged);
    assert_eq!(definition.name, "packaged-fixture");
    assert!(definition.package_root.is_some());
    assert_eq!(installer.count(), 1);
    assert!(package_root.join(MARKER_FILE_NAME).is_file());

    // Second load pass hits the marker cache.
    let result = loader
        .load_candidate(&package_root, ToolSource::Workspace)
        .await;
    assert!(result.definition.is_some());
    assert_eq!(installer.count(), 1);
}

#[tokio::test]
async fn packaged_tool_refuses_in_process_execution() {
    let workspace = TempDir::new().expect("tempdir");
    let package_root = workspace.path().join(".grimoire/tools/packaged-fixture");
    write_packaged_tool(&package_root);

    let loader = loader_for(&workspace, CountingInstaller::new());
    let result = loader
        .load_candidate(&package_root, ToolSource::Workspace)
        .await;

    let mut registry = ToolRegistry::new();
    registry.merge(&[result]);

    let config = GrimoireConfig::default();
    let adapter = registry
        .adapter("packaged-fixture", &config.runner)
        .expect("adapter");
    let context = grimoire_core::ExecutionContext {
        task_id: None,
        tool_id: "packaged-fixture".to_owned(),
    };
    let error = adapter
        .execute_in_process(&json!({}), &context)
        .await
        .expect_err("in-process execution must be refused");
    assert!(error.to_string().contains("subprocess"));
}

#[tokio::test]
async fn runtime_only_schema_falls_back_to_permissive() {
    let workspace = TempDir::new().expect("tempdir");
    let tools = workspace.path().join(".grimoire/tools");
    fs::create_dir_all(&tools).expect("mkdir");

    // The definition carries a runtime schema object, but there is no
    // `const inputSchema = z.object(...)` declaration to extract.
    let path = tools.join("opaque-tool.ts");
    fs::write(
        &path,
        r"
const schema = { kind: 'opaque' };
export default {
    name: 'opaque',
    inputSchema: schema,
    execute: async (params: any) => params,
};
",
    )
    .expect("write tool");

    let loader = loader_for(&workspace, CountingInstaller::new());
    let result = loader.load_candidate(&path, ToolSource::Workspace).await;
    let definition = result.definition.expect("tool loads despite opaque schema");
    assert!(matches!(definition.input_schema, InputSchema::Permissive));
}

#[tokio::test]
async fn loading_twice_yields_identical_definitions() {
    let workspace = TempDir::new().expect("tempdir");
    let tools = workspace.path().join(".grimoire/tools");
    fs::create_dir_all(&tools).expect("mkdir");
    let path = write_tool(&tools, "stable-tool.ts", "stable");

    let loader = loader_for(&workspace, CountingInstaller::new());
    let first = loader.load_candidate(&path, ToolSource::Workspace).await;
    let second = loader.load_candidate(&path, ToolSource::Workspace).await;

    let first = first.definition.expect("first load");
    let second = second.definition.expect("second load");
    assert_eq!(first.name, second.name);
    assert_eq!(first.description, second.description);
    assert_eq!(first.kind, second.kind);
}

#[tokio::test]
async fn packaged_tool_without_lockfile_fails() {
    let workspace = TempDir::new().expect("tempdir");
    let package_root = workspace.path().join(".grimoire/tools/no-lock");
    write_packaged_tool(&package_root);
    fs::remove_file(package_root.join("bun.lockb")).expect("drop lockfile");

    let loader = loader_for(&workspace, CountingInstaller::new());
    let result = loader
        .load_candidate(&package_root, ToolSource::Workspace)
        .await;

    assert!(result.definition.is_none());
    assert!(result.error.as_deref().expect("error message").contains("lockfile"));
}

#[tokio::test]
async fn validate_tool_checks_renderer_output() {
    let workspace = TempDir::new().expect("tempdir");
    let tools = workspace.path().join(".grimoire/tools");
    fs::create_dir_all(&tools).expect("mkdir");

    let path = tools.join("pretty-tool.tsx");
    fs::write(
        &path,
        r"
export default {
    name: 'pretty',
    execute: async (params: any) => params,
    renderToolResult: (params: any, output: any) => <pre>{String(output)}</pre>,
};
",
    )
    .expect("write tool");

    let config = GrimoireConfig::default();
    let loader = loader_for(&workspace, CountingInstaller::new());
    let definition = validate_tool(&loader, &config.runner, &path)
        .await
        .expect("tool validates");
    assert_eq!(definition.name, "pretty");
    assert!(definition.has_render_result);
}

#[tokio::test]
async fn registry_adapter_executes_single_file_tool() {
    let workspace = TempDir::new().expect("tempdir");
    let tools = workspace.path().join(".grimoire/tools");
    fs::create_dir_all(&tools).expect("mkdir");
    let path = write_tool(&tools, "echo-tool.ts", "echo");

    let loader = loader_for(&workspace, CountingInstaller::new());
    let result = loader.load_candidate(&path, ToolSource::Workspace).await;

    let mut registry = ToolRegistry::new();
    registry.merge(&[result]);

    let config = GrimoireConfig::default();
    let adapter = registry.adapter("echo", &config.runner).expect("adapter");
    let context = grimoire_core::ExecutionContext {
        task_id: None,
        tool_id: "echo".to_owned(),
    };
    let output = adapter
        .execute(&json!({"value": 7}), &context)
        .await
        .expect("execution succeeds");
    assert_eq!(output, json!({"value": 7}));
}
