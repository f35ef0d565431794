//! Core data types for the custom tool subsystem.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::schema::InputSchema;

/// Where a tool was discovered.
///
/// Sources form a total priority order used to break name collisions:
/// `Custom > Workspace > User`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolSource {
    /// An explicitly configured tools directory.
    Custom,
    /// The workspace-relative conventional tools directory.
    Workspace,
    /// The user-home conventional tools directory.
    User,
}

impl ToolSource {
    /// Priority rank; higher wins a name collision.
    pub fn priority(self) -> u8 {
        match self {
            Self::Custom => 2,
            Self::Workspace => 1,
            Self::User => 0,
        }
    }
}

/// How a tool is distributed and executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    /// One source file with no external dependencies, executed in-process.
    SingleFile,
    /// A directory with its own manifest, lockfile, and dependency tree,
    /// executed out-of-process.
    Packaged,
}

/// Lockfile flavor detected in a packaged tool directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockfileKind {
    /// Binary lockfile (`bun.lockb`); preferred when both are present.
    Bun,
    /// JSON lockfile (`package-lock.json`).
    Npm,
}

/// Description of a packaged (multi-file, dependency-bearing) tool.
///
/// Built once per scan of a directory containing a manifest file and
/// re-validated on every load pass; never cached across passes.
#[derive(Debug, Clone)]
pub struct PackageInfo {
    /// Package root directory.
    pub root: PathBuf,
    /// Resolved entry file path.
    pub entry: PathBuf,
    /// Path to `package.json`.
    pub manifest_path: PathBuf,
    /// Path to the detected lockfile.
    pub lockfile_path: PathBuf,
    /// Which lockfile flavor was detected.
    pub lockfile_kind: LockfileKind,
    /// Package name declared in the manifest, if any.
    pub name: Option<String>,
}

/// Persisted record of a successful dependency install.
///
/// Trusted only when both the recorded lockfile path and its recorded
/// modification time match the lockfile currently on disk; any mismatch
/// forces a reinstall.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallMarker {
    /// Lockfile path recorded at install time.
    pub lockfile_path: PathBuf,
    /// Lockfile modification time in milliseconds since the epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lockfile_mtime_ms: Option<u64>,
}

/// A loaded custom tool definition.
///
/// Immutable once loaded. Execution state is intentionally not cached here:
/// every evaluation recompiles the entry source in a fresh engine, trading
/// compile cost for freshness.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Parameter validation contract.
    pub input_schema: InputSchema,
    /// Single-file or packaged.
    pub kind: ToolKind,
    /// Path to the entry source file.
    pub entry_path: PathBuf,
    /// Package root for packaged tools.
    pub package_root: Option<PathBuf>,
    /// Which scan root produced this tool.
    pub source: ToolSource,
    /// Whether concurrent invocations are allowed.
    pub can_concurrent: bool,
    /// Whether the tool is hidden from listings.
    pub hidden: bool,
    /// Capability tags declared by the tool (e.g. `network`).
    pub permissions: Vec<String>,
    /// Whether the source exports a doing-state renderer.
    pub has_render_doing: bool,
    /// Whether the source exports a result-state renderer.
    pub has_render_result: bool,
}

impl ToolDefinition {
    /// Whether the tool declared the given capability tag.
    pub fn has_permission(&self, tag: &str) -> bool {
        self.permissions.iter().any(|perm| perm == tag)
    }
}

/// Outcome status of one load candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    /// The candidate produced a usable tool definition.
    Loaded,
    /// The candidate failed at some pipeline stage.
    Error,
}

/// Outcome of attempting to load one candidate file or directory.
///
/// Ephemeral: exists only for the duration of one scan pass and its
/// reporting.
#[derive(Debug)]
pub struct ToolLoadResult {
    /// Load outcome.
    pub status: LoadStatus,
    /// Resolved tool name (or best-effort candidate name on error).
    pub name: String,
    /// Path of the candidate file or directory.
    pub path: PathBuf,
    /// Which scan root the candidate came from.
    pub source: ToolSource,
    /// The loaded definition on success.
    pub definition: Option<ToolDefinition>,
    /// Package description for packaged tools.
    pub package: Option<PackageInfo>,
    /// Error message on failure.
    pub error: Option<String>,
}

impl ToolLoadResult {
    /// Builds a success result.
    pub fn loaded(definition: ToolDefinition, package: Option<PackageInfo>) -> Self {
        Self {
            status: LoadStatus::Loaded,
            name: definition.name.clone(),
            path: definition.entry_path.clone(),
            source: definition.source,
            definition: Some(definition),
            package,
            error: None,
        }
    }

    /// Builds an error result for one candidate.
    pub fn failed(
        name: impl Into<String>,
        path: PathBuf,
        source: ToolSource,
        error: impl Into<String>,
    ) -> Self {
        Self {
            status: LoadStatus::Error,
            name: name.into(),
            path,
            source,
            definition: None,
            package: None,
            error: Some(error.into()),
        }
    }
}

/// Minimal execution context passed through to a tool's `execute`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    /// Identifier of the owning task/conversation, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// Identifier of this tool invocation.
    pub tool_id: String,
}

#[cfg(test)]
#[cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, reason = "Allow for tests")
)]
mod tests {
    use super::*;
    use serde_json::{from_str, to_string};

    #[test]
    fn test_source_priority_order() {
        assert!(ToolSource::Custom.priority() > ToolSource::Workspace.priority());
        assert!(ToolSource::Workspace.priority() > ToolSource::User.priority());
    }

    #[test]
    fn test_install_marker_round_trip() {
        let marker = InstallMarker {
            lockfile_path: PathBuf::from("/tools/pkg/bun.lockb"),
            lockfile_mtime_ms: Some(1_700_000_000_123),
        };
        let serialized = to_string(&marker).unwrap();
        assert!(serialized.contains("lockfilePath"));
        assert!(serialized.contains("lockfileMtimeMs"));

        let parsed: InstallMarker = from_str(&serialized).unwrap();
        assert_eq!(parsed, marker);
    }

    #[test]
    fn test_install_marker_mtime_optional() {
        let parsed: InstallMarker = from_str(r#"{"lockfilePath": "a/b"}"#).unwrap();
        assert_eq!(parsed.lockfile_mtime_ms, None);
    }

    #[test]
    fn test_execution_context_camel_case() {
        let context = ExecutionContext {
            task_id: Some("task-1".to_owned()),
            tool_id: "tool-1".to_owned(),
        };
        let serialized = to_string(&context).unwrap();
        assert!(serialized.contains("taskId"));
        assert!(serialized.contains("toolId"));
    }
}
