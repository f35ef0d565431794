//! Packaged-tool manifest validation.
//!
//! A packaged tool is a directory with its own `package.json`, lockfile,
//! and dependency tree. Validation is deliberately strict: the manifest
//! exists to declare runtime dependencies and nothing else, so build hooks
//! and development tooling are rejected outright.

use std::path::Path;

use serde_json::Value;

use grimoire_core::{LockfileKind, PackageInfo, ToolError, ToolResult};

/// Default entry file when the manifest does not override it.
pub const DEFAULT_ENTRY: &str = "tool.tsx";

/// Binary lockfile name, preferred when both flavors are present.
const BUN_LOCKFILE: &str = "bun.lockb";
/// JSON lockfile name.
const NPM_LOCKFILE: &str = "package-lock.json";

/// Validates the package directory at `root` and describes it.
///
/// All of the following must hold: `package.json` exists and parses;
/// `dependencies` is present and non-empty; no `devDependencies`; no
/// `scripts` of any kind; a lockfile exists; the entry file exists. The
/// entry defaults to [`DEFAULT_ENTRY`] and can be overridden by a top-level
/// `toolEntry` or the namespaced `grimoire.toolEntry`.
///
/// # Errors
/// Returns a schema-stage error describing the first violated constraint.
pub async fn validate_package(root: &Path) -> ToolResult<PackageInfo> {
    let manifest_path = root.join("package.json");
    if !manifest_path.is_file() {
        return Err(ToolError::Schema(format!(
            "packaged tool {} has no package.json",
            root.display()
        )));
    }

    let raw = tokio::fs::read_to_string(&manifest_path).await?;
    let manifest: Value = serde_json::from_str(&raw).map_err(|err| {
        ToolError::Schema(format!("invalid package.json in {}: {err}", root.display()))
    })?;

    let dependencies = manifest.get("dependencies").and_then(Value::as_object);
    if dependencies.is_none_or(serde_json::Map::is_empty) {
        return Err(ToolError::Schema(format!(
            "packaged tool {} must declare at least one dependency (use a single-file tool otherwise)",
            root.display()
        )));
    }

    if manifest
        .get("devDependencies")
        .and_then(Value::as_object)
        .is_some_and(|map| !map.is_empty())
    {
        return Err(ToolError::Schema(format!(
            "packaged tool {} must not declare devDependencies",
            root.display()
        )));
    }

    if manifest
        .get("scripts")
        .and_then(Value::as_object)
        .is_some_and(|map| !map.is_empty())
    {
        return Err(ToolError::Schema(format!(
            "packaged tool {} must not declare scripts",
            root.display()
        )));
    }

    let (lockfile_path, lockfile_kind) = if root.join(BUN_LOCKFILE).is_file() {
        (root.join(BUN_LOCKFILE), LockfileKind::Bun)
    } else if root.join(NPM_LOCKFILE).is_file() {
        (root.join(NPM_LOCKFILE), LockfileKind::Npm)
    } else {
        return Err(ToolError::Schema(format!(
            "packaged tool {} has no lockfile ({BUN_LOCKFILE} or {NPM_LOCKFILE})",
            root.display()
        )));
    };

    let entry_name = manifest
        .get("toolEntry")
        .and_then(Value::as_str)
        .or_else(|| {
            manifest
                .get("grimoire")
                .and_then(|section| section.get("toolEntry"))
                .and_then(Value::as_str)
        })
        .unwrap_or(DEFAULT_ENTRY);
    let entry = root.join(entry_name);
    if !entry.is_file() {
        return Err(ToolError::Schema(format!(
            "packaged tool {} entry file {entry_name} does not exist",
            root.display()
        )));
    }

    Ok(PackageInfo {
        root: root.to_path_buf(),
        entry,
        manifest_path,
        lockfile_path,
        lockfile_kind,
        name: manifest
            .get("name")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned),
    })
}

/// Names of the dependencies declared in an already-validated manifest.
///
/// # Errors
/// Returns a schema-stage error if the manifest cannot be re-read.
pub async fn declared_dependencies(info: &PackageInfo) -> ToolResult<Vec<String>> {
    let raw = tokio::fs::read_to_string(&info.manifest_path).await?;
    let manifest: Value = serde_json::from_str(&raw).map_err(|err| {
        ToolError::Schema(format!(
            "invalid package.json in {}: {err}",
            info.root.display()
        ))
    })?;
    Ok(manifest
        .get("dependencies")
        .and_then(Value::as_object)
        .map(|map| map.keys().cloned().collect())
        .unwrap_or_default())
}

#[cfg(test)]
#[cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, reason = "Allow for tests")
)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_package(dir: &TempDir, manifest: &str, lockfile: Option<&str>, entry: Option<&str>) {
        fs::write(dir.path().join("package.json"), manifest).unwrap();
        if let Some(lockfile) = lockfile {
            fs::write(dir.path().join(lockfile), b"lock").unwrap();
        }
        if let Some(entry) = entry {
            fs::write(dir.path().join(entry), "export default {};").unwrap();
        }
    }

    #[tokio::test]
    async fn test_valid_package() {
        let dir = TempDir::new().unwrap();
        write_package(
            &dir,
            r#"{"name": "weather", "dependencies": {"zod": "^3.0.0"}}"#,
            Some("bun.lockb"),
            Some("tool.tsx"),
        );
        let info = validate_package(dir.path()).await.unwrap();
        assert_eq!(info.name.as_deref(), Some("weather"));
        assert_eq!(info.lockfile_kind, LockfileKind::Bun);
        assert!(info.entry.ends_with("tool.tsx"));
    }

    #[tokio::test]
    async fn test_missing_manifest() {
        let dir = TempDir::new().unwrap();
        let error = validate_package(dir.path()).await.unwrap_err();
        assert_eq!(error.stage(), "schema");
        assert!(error.to_string().contains("package.json"));
    }

    #[tokio::test]
    async fn test_empty_dependencies_rejected() {
        let dir = TempDir::new().unwrap();
        write_package(
            &dir,
            r#"{"dependencies": {}}"#,
            Some("bun.lockb"),
            Some("tool.tsx"),
        );
        let error = validate_package(dir.path()).await.unwrap_err();
        assert!(error.to_string().contains("at least one dependency"));
    }

    #[tokio::test]
    async fn test_dev_dependencies_rejected() {
        let dir = TempDir::new().unwrap();
        write_package(
            &dir,
            r#"{"dependencies": {"zod": "1"}, "devDependencies": {"typescript": "5"}}"#,
            Some("bun.lockb"),
            Some("tool.tsx"),
        );
        let error = validate_package(dir.path()).await.unwrap_err();
        assert!(error.to_string().contains("devDependencies"));
    }

    #[tokio::test]
    async fn test_scripts_rejected() {
        let dir = TempDir::new().unwrap();
        write_package(
            &dir,
            r#"{"dependencies": {"zod": "1"}, "scripts": {"postinstall": "curl evil"}}"#,
            Some("bun.lockb"),
            Some("tool.tsx"),
        );
        let error = validate_package(dir.path()).await.unwrap_err();
        assert!(error.to_string().contains("scripts"));
    }

    #[tokio::test]
    async fn test_missing_lockfile_rejected() {
        let dir = TempDir::new().unwrap();
        write_package(
            &dir,
            r#"{"dependencies": {"zod": "1"}}"#,
            None,
            Some("tool.tsx"),
        );
        let error = validate_package(dir.path()).await.unwrap_err();
        assert!(error.to_string().contains("lockfile"));
    }

    #[tokio::test]
    async fn test_bun_lockfile_preferred_over_npm() {
        let dir = TempDir::new().unwrap();
        write_package(
            &dir,
            r#"{"dependencies": {"zod": "1"}}"#,
            Some("bun.lockb"),
            Some("tool.tsx"),
        );
        fs::write(dir.path().join("package-lock.json"), "{}").unwrap();
        let info = validate_package(dir.path()).await.unwrap();
        assert_eq!(info.lockfile_kind, LockfileKind::Bun);
    }

    #[tokio::test]
    async fn test_tool_entry_override() {
        let dir = TempDir::new().unwrap();
        write_package(
            &dir,
            r#"{"dependencies": {"zod": "1"}, "toolEntry": "src/main.tsx"}"#,
            Some("package-lock.json"),
            None,
        );
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/main.tsx"), "export default {};").unwrap();
        let info = validate_package(dir.path()).await.unwrap();
        assert!(info.entry.ends_with("src/main.tsx"));
        assert_eq!(info.lockfile_kind, LockfileKind::Npm);
    }

    #[tokio::test]
    async fn test_namespaced_entry_override() {
        let dir = TempDir::new().unwrap();
        write_package(
            &dir,
            r#"{"dependencies": {"zod": "1"}, "grimoire": {"toolEntry": "entry.ts"}}"#,
            Some("bun.lockb"),
            None,
        );
        fs::write(dir.path().join("entry.ts"), "export default {};").unwrap();
        let info = validate_package(dir.path()).await.unwrap();
        assert!(info.entry.ends_with("entry.ts"));
    }

    #[tokio::test]
    async fn test_missing_entry_rejected() {
        let dir = TempDir::new().unwrap();
        write_package(&dir, r#"{"dependencies": {"zod": "1"}}"#, Some("bun.lockb"), None);
        let error = validate_package(dir.path()).await.unwrap_err();
        assert!(error.to_string().contains("tool.tsx"));
    }

    #[tokio::test]
    async fn test_declared_dependencies_listing() {
        let dir = TempDir::new().unwrap();
        write_package(
            &dir,
            r#"{"dependencies": {"zod": "1", "@scope/util": "2"}}"#,
            Some("bun.lockb"),
            Some("tool.tsx"),
        );
        let info = validate_package(dir.path()).await.unwrap();
        let mut deps = declared_dependencies(&info).await.unwrap();
        deps.sort();
        assert_eq!(deps, vec!["@scope/util".to_owned(), "zod".to_owned()]);
    }
}
