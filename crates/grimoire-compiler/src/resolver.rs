//! Node-style module resolution for plugin dependencies.
//!
//! Resolves import specifiers encountered while loading a plugin module:
//! built-in stubs first, then relative paths probed with the usual extension
//! set, then bare specifiers walked through `node_modules` directories with
//! conditional-`exports` support. Every filesystem answer is checked to stay
//! inside the plugin's package root so a crafted specifier cannot escape it.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde_json::Value;

use grimoire_core::{ToolError, ToolResult};

use crate::stubs::builtin_stub;

/// Outcome of resolving one specifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedModule {
    /// Host-provided source, served from memory.
    Stub(&'static str),
    /// A file on disk inside the package root.
    File(PathBuf),
    /// Nothing matched. Bound to a placeholder so the failure only surfaces
    /// if the module is required at run time.
    Missing,
}

/// Resolver scoped to a single plugin.
///
/// Single-file tools have no package root and resolve only stubs and
/// relative siblings; packaged tools additionally search `node_modules`
/// under their root.
#[derive(Debug, Clone)]
pub struct ModuleResolver {
    package_root: Option<PathBuf>,
    /// Dependency names declared in the manifest, when known. Bare
    /// specifiers outside this set short-circuit to `Missing` without
    /// touching the filesystem.
    declared: Option<HashSet<String>>,
}

/// Extensions probed, in order, for extensionless paths.
const PROBE_EXTENSIONS: &[&str] = &["js", "cjs", "mjs", "json"];

impl ModuleResolver {
    /// Resolver for a single-file tool: stubs and relative imports next to
    /// `entry_dir` only.
    #[must_use]
    pub fn single_file(entry_dir: PathBuf) -> Self {
        Self {
            package_root: Some(entry_dir),
            declared: None,
        }
    }

    /// Resolver for a packaged tool rooted at `package_root`.
    #[must_use]
    pub fn packaged(package_root: PathBuf, declared: HashSet<String>) -> Self {
        Self {
            package_root: Some(package_root),
            declared: Some(declared),
        }
    }

    /// Resolves `specifier` as imported from the module at `referrer`.
    ///
    /// # Errors
    /// Returns a resolve-stage error on filesystem failures other than
    /// not-found; an absent module is `Ok(Missing)`, not an error.
    pub fn resolve(&self, specifier: &str, referrer: &Path) -> ToolResult<ResolvedModule> {
        if let Some(stub) = builtin_stub(specifier) {
            return Ok(ResolvedModule::Stub(stub));
        }

        if specifier.starts_with("./") || specifier.starts_with("../") {
            let base = referrer.parent().unwrap_or(referrer);
            let candidate = base.join(specifier);
            return self.contain(self.probe_path(&candidate));
        }

        if Path::new(specifier).is_absolute() {
            // Absolute imports are never allowed out of plugin code.
            return Ok(ResolvedModule::Missing);
        }

        self.resolve_bare(specifier, referrer)
    }

    /// Resolves a bare specifier through `node_modules`, walking up from the
    /// referrer's directory to the package root.
    fn resolve_bare(&self, specifier: &str, referrer: &Path) -> ToolResult<ResolvedModule> {
        let Some(root) = &self.package_root else {
            return Ok(ResolvedModule::Missing);
        };

        let (package_name, subpath) = split_specifier(specifier);
        if let Some(declared) = &self.declared {
            if !declared.contains(package_name) {
                return Ok(ResolvedModule::Missing);
            }
        }

        let mut dir = referrer.parent().unwrap_or(referrer).to_path_buf();
        loop {
            let package_dir = dir.join("node_modules").join(package_name);
            if package_dir.is_dir() {
                return self.contain(resolve_in_package(&package_dir, subpath)?);
            }
            if !dir.starts_with(root) || dir == *root {
                return Ok(ResolvedModule::Missing);
            }
            let Some(parent) = dir.parent() else {
                return Ok(ResolvedModule::Missing);
            };
            dir = parent.to_path_buf();
        }
    }

    /// Probes a path as a file directly, with extensions, and as a
    /// directory index.
    fn probe_path(&self, candidate: &Path) -> ResolvedModule {
        if candidate.is_file() {
            return ResolvedModule::File(candidate.to_path_buf());
        }
        for extension in PROBE_EXTENSIONS {
            let with_extension = candidate.with_extension(extension);
            if with_extension.is_file() {
                return ResolvedModule::File(with_extension);
            }
        }
        if candidate.is_dir() {
            for extension in PROBE_EXTENSIONS {
                let index = candidate.join(format!("index.{extension}"));
                if index.is_file() {
                    return ResolvedModule::File(index);
                }
            }
        }
        ResolvedModule::Missing
    }

    /// Rejects resolved files that escape the package root.
    fn contain(&self, resolved: ResolvedModule) -> ToolResult<ResolvedModule> {
        let ResolvedModule::File(path) = &resolved else {
            return Ok(resolved);
        };
        let Some(root) = &self.package_root else {
            return Ok(resolved);
        };
        let canonical_root = root
            .canonicalize()
            .map_err(|err| ToolError::Resolve(format!("cannot canonicalize package root: {err}")))?;
        let canonical_path = path
            .canonicalize()
            .map_err(|err| ToolError::Resolve(format!("cannot canonicalize {}: {err}", path.display())))?;
        if canonical_path.starts_with(&canonical_root) {
            Ok(ResolvedModule::File(canonical_path))
        } else {
            Err(ToolError::Resolve(format!(
                "import of {} escapes the tool package root",
                path.display()
            )))
        }
    }
}

/// Splits a bare specifier into package name and optional subpath, handling
/// `@scope/name` prefixes.
fn split_specifier(specifier: &str) -> (&str, Option<&str>) {
    let boundary = if specifier.starts_with('@') {
        specifier
            .find('/')
            .and_then(|first| specifier[first + 1..].find('/').map(|second| first + 1 + second))
    } else {
        specifier.find('/')
    };
    match boundary {
        Some(index) => (&specifier[..index], Some(&specifier[index + 1..])),
        None => (specifier, None),
    }
}

/// Resolves an entry inside an installed package directory: the `exports`
/// map when present, otherwise `module`/`main`/index fallbacks.
fn resolve_in_package(package_dir: &Path, subpath: Option<&str>) -> ToolResult<ResolvedModule> {
    let manifest_path = package_dir.join("package.json");
    let manifest: Option<Value> = if manifest_path.is_file() {
        let raw = std::fs::read_to_string(&manifest_path)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::debug!(
                    "Ignoring malformed {}: {err}",
                    manifest_path.display()
                );
                None
            }
        }
    } else {
        None
    };

    if let Some(manifest) = &manifest {
        if let Some(exports) = manifest.get("exports") {
            if let Some(target) = resolve_exports(exports, subpath) {
                let resolved = package_dir.join(target.trim_start_matches("./"));
                if resolved.is_file() {
                    return Ok(ResolvedModule::File(resolved));
                }
                // A declared but absent target is a broken install, not a
                // resolvable miss.
                return Ok(ResolvedModule::Missing);
            }
            return Ok(ResolvedModule::Missing);
        }
    }

    if let Some(subpath) = subpath {
        return Ok(probe_in_dir(&package_dir.join(subpath)));
    }

    if let Some(manifest) = &manifest {
        for field in ["module", "main"] {
            if let Some(target) = manifest.get(field).and_then(Value::as_str) {
                let resolved = package_dir.join(target.trim_start_matches("./"));
                let probed = probe_in_dir(&resolved);
                if probed != ResolvedModule::Missing {
                    return Ok(probed);
                }
            }
        }
    }

    Ok(probe_in_dir(&package_dir.join("index")))
}

fn probe_in_dir(candidate: &Path) -> ResolvedModule {
    if candidate.is_file() {
        return ResolvedModule::File(candidate.to_path_buf());
    }
    for extension in PROBE_EXTENSIONS {
        let with_extension = candidate.with_extension(extension);
        if with_extension.is_file() {
            return ResolvedModule::File(with_extension);
        }
    }
    if candidate.is_dir() {
        for extension in PROBE_EXTENSIONS {
            let index = candidate.join(format!("index.{extension}"));
            if index.is_file() {
                return ResolvedModule::File(index);
            }
        }
    }
    ResolvedModule::Missing
}

/// Conditions honored when descending into a conditional-exports object, in
/// preference order.
const EXPORT_CONDITIONS: &[&str] = &["import", "default", "require"];

/// Resolves a subpath against a `package.json` `exports` value to a relative
/// target path, or `None` when the map does not cover it.
fn resolve_exports(exports: &Value, subpath: Option<&str>) -> Option<String> {
    let key = match subpath {
        Some(subpath) => format!("./{subpath}"),
        None => ".".to_owned(),
    };

    match exports {
        Value::String(target) => {
            // Shorthand form covers the root entry only.
            (key == ".").then(|| target.clone())
        }
        Value::Object(map) => {
            if let Some(entry) = map.get(&key) {
                return resolve_export_target(entry);
            }
            // An object with no "./..." keys is itself a conditions object
            // for the root entry.
            let has_subpath_keys = map.keys().any(|map_key| map_key.starts_with('.'));
            if !has_subpath_keys && key == "." {
                return resolve_export_target(exports);
            }
            None
        }
        _ => None,
    }
}

/// Descends through a conditions object until a string target is found.
fn resolve_export_target(entry: &Value) -> Option<String> {
    match entry {
        Value::String(target) => Some(target.clone()),
        Value::Object(map) => {
            for condition in EXPORT_CONDITIONS {
                if let Some(nested) = map.get(*condition) {
                    if let Some(target) = resolve_export_target(nested) {
                        return Some(target);
                    }
                }
            }
            // Last resort: any string leaf keeps a nonstandard map usable.
            map.values().find_map(resolve_export_target)
        }
        _ => None,
    }
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

    fn write(root: &Path, relative: &str, contents: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_split_specifier() {
        assert_eq!(split_specifier("zod"), ("zod", None));
        assert_eq!(split_specifier("zod/v4"), ("zod", Some("v4")));
        assert_eq!(split_specifier("@scope/pkg"), ("@scope/pkg", None));
        assert_eq!(
            split_specifier("@scope/pkg/deep/path"),
            ("@scope/pkg", Some("deep/path"))
        );
    }

    #[test]
    fn test_stub_takes_priority_over_disk() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "node_modules/@grimoire/tools/index.js",
            "export const fake = true;",
        );
        let resolver = ModuleResolver::packaged(
            dir.path().to_path_buf(),
            HashSet::from(["@grimoire/tools".to_owned()]),
        );
        let resolved = resolver
            .resolve("@grimoire/tools", &dir.path().join("tool.tsx"))
            .unwrap();
        assert!(matches!(resolved, ResolvedModule::Stub(_)));
    }

    #[test]
    fn test_relative_probing_adds_extension() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "helper.js", "export const x = 1;");
        let resolver = ModuleResolver::single_file(dir.path().to_path_buf());
        let resolved = resolver
            .resolve("./helper", &dir.path().join("main-tool.ts"))
            .unwrap();
        let ResolvedModule::File(path) = resolved else {
            panic!("expected file");
        };
        assert!(path.ends_with("helper.js"));
    }

    #[test]
    fn test_relative_directory_index() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "lib/index.js", "export default 1;");
        let resolver = ModuleResolver::single_file(dir.path().to_path_buf());
        let resolved = resolver
            .resolve("./lib", &dir.path().join("main-tool.ts"))
            .unwrap();
        assert!(matches!(resolved, ResolvedModule::File(_)));
    }

    #[test]
    fn test_traversal_outside_root_rejected() {
        let outer = TempDir::new().unwrap();
        let root = outer.path().join("pkg");
        fs::create_dir_all(&root).unwrap();
        write(outer.path(), "secret.js", "export const leak = true;");
        let resolver = ModuleResolver::single_file(root.clone());
        let result = resolver.resolve("../secret", &root.join("tool.ts"));
        assert!(result.is_err());
    }

    #[test]
    fn test_undeclared_bare_specifier_is_missing() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "node_modules/lodash/index.js", "module.exports = {};");
        let resolver = ModuleResolver::packaged(dir.path().to_path_buf(), HashSet::new());
        let resolved = resolver
            .resolve("lodash", &dir.path().join("tool.tsx"))
            .unwrap();
        assert_eq!(resolved, ResolvedModule::Missing);
    }

    #[test]
    fn test_bare_specifier_main_field() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "node_modules/leftpad/package.json",
            r#"{"name": "leftpad", "main": "./lib/entry.js"}"#,
        );
        write(dir.path(), "node_modules/leftpad/lib/entry.js", "module.exports = 1;");
        let resolver = ModuleResolver::packaged(
            dir.path().to_path_buf(),
            HashSet::from(["leftpad".to_owned()]),
        );
        let resolved = resolver
            .resolve("leftpad", &dir.path().join("tool.tsx"))
            .unwrap();
        let ResolvedModule::File(path) = resolved else {
            panic!("expected file");
        };
        assert!(path.ends_with("lib/entry.js"));
    }

    #[test]
    fn test_exports_map_conditions() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "node_modules/zod/package.json",
            r#"{"name": "zod", "exports": {".": {"import": "./esm/index.js", "require": "./cjs/index.js"}, "./v4": "./esm/v4.js"}}"#,
        );
        write(dir.path(), "node_modules/zod/esm/index.js", "export const z = 1;");
        write(dir.path(), "node_modules/zod/esm/v4.js", "export const z4 = 1;");
        let resolver = ModuleResolver::packaged(
            dir.path().to_path_buf(),
            HashSet::from(["zod".to_owned()]),
        );

        let root_entry = resolver.resolve("zod", &dir.path().join("tool.tsx")).unwrap();
        let ResolvedModule::File(path) = root_entry else {
            panic!("expected file");
        };
        assert!(path.ends_with("esm/index.js"));

        let subpath = resolver.resolve("zod/v4", &dir.path().join("tool.tsx")).unwrap();
        let ResolvedModule::File(path) = subpath else {
            panic!("expected file");
        };
        assert!(path.ends_with("esm/v4.js"));
    }

    #[test]
    fn test_exports_map_miss_is_missing() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "node_modules/strict/package.json",
            r#"{"name": "strict", "exports": {".": "./index.js"}}"#,
        );
        write(dir.path(), "node_modules/strict/index.js", "export default 1;");
        write(dir.path(), "node_modules/strict/hidden.js", "export default 2;");
        let resolver = ModuleResolver::packaged(
            dir.path().to_path_buf(),
            HashSet::from(["strict".to_owned()]),
        );
        let resolved = resolver
            .resolve("strict/hidden", &dir.path().join("tool.tsx"))
            .unwrap();
        assert_eq!(resolved, ResolvedModule::Missing);
    }

    #[test]
    fn test_scoped_package_resolution() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "node_modules/@acme/util/package.json",
            r#"{"name": "@acme/util", "main": "index.js"}"#,
        );
        write(dir.path(), "node_modules/@acme/util/index.js", "module.exports = 1;");
        let resolver = ModuleResolver::packaged(
            dir.path().to_path_buf(),
            HashSet::from(["@acme/util".to_owned()]),
        );
        let resolved = resolver
            .resolve("@acme/util", &dir.path().join("tool.tsx"))
            .unwrap();
        assert!(matches!(resolved, ResolvedModule::File(_)));
    }
}
