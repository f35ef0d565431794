//! Idempotent dependency installation for packaged tools.
//!
//! Installation is cached through an [`InstallMarker`] persisted next to the
//! manifest. The marker is trusted only when both the recorded lockfile path
//! and its modification time match the lockfile currently on disk; anything
//! else forces a reinstall and rewrites the marker.

use std::path::Path;
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use tokio::process::Command;

use grimoire_core::{InstallMarker, LockfileKind, PackageInfo, RunnerConfig, ToolError, ToolResult};

/// Marker file name, written into the package root.
pub const MARKER_FILE_NAME: &str = ".grimoire-installed.json";

/// Runs the actual install command. A seam so tests can count invocations
/// without spawning package managers.
#[async_trait]
pub trait Installer: Send + Sync {
    /// Installs the package's dependencies from its lockfile.
    ///
    /// # Errors
    /// Returns an install-stage error when the command fails.
    async fn install(&self, package: &PackageInfo) -> ToolResult<()>;
}

/// Installer that shells out to `bun` or `npm` depending on lockfile kind.
pub struct CommandInstaller {
    bun_bin: String,
    npm_bin: String,
}

impl CommandInstaller {
    /// Creates an installer from the host runner configuration.
    #[must_use]
    pub fn new(config: &RunnerConfig) -> Self {
        Self {
            bun_bin: config.bun_bin.clone(),
            npm_bin: config.npm_bin.clone(),
        }
    }
}

#[async_trait]
impl Installer for CommandInstaller {
    async fn install(&self, package: &PackageInfo) -> ToolResult<()> {
        // Scripts are disabled on top of the manifest-level rejection; a
        // dependency's own lifecycle hooks must not run either.
        let (bin, args): (&str, &[&str]) = match package.lockfile_kind {
            LockfileKind::Bun => (
                self.bun_bin.as_str(),
                ["install", "--frozen-lockfile", "--ignore-scripts"].as_slice(),
            ),
            LockfileKind::Npm => (self.npm_bin.as_str(), ["ci", "--ignore-scripts"].as_slice()),
        };

        tracing::debug!("installing dependencies in {} via {bin}", package.root.display());
        let output = Command::new(bin)
            .args(args)
            .current_dir(&package.root)
            .output()
            .await
            .map_err(|err| ToolError::Install(format!("failed to spawn {bin}: {err}")))?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let detail = if !stderr.trim().is_empty() {
            stderr.trim().to_owned()
        } else if !stdout.trim().is_empty() {
            stdout.trim().to_owned()
        } else {
            format!("{bin} exited with {}", output.status)
        };
        Err(ToolError::Install(detail))
    }
}

/// Ensures the package's dependencies are installed, running the installer
/// only when the marker does not match the current lockfile. Returns whether
/// an install actually ran.
///
/// # Errors
/// Returns an install-stage error when the installer fails; marker
/// read/write problems are not fatal beyond forcing a reinstall.
pub async fn ensure_tool_dependencies(
    package: &PackageInfo,
    installer: &dyn Installer,
) -> ToolResult<bool> {
    let marker_path = package.root.join(MARKER_FILE_NAME);
    let current_mtime = lockfile_mtime_ms(&package.lockfile_path).await;

    if let Some(marker) = read_marker(&marker_path).await {
        if marker.lockfile_path == package.lockfile_path
            && marker.lockfile_mtime_ms == current_mtime
        {
            tracing::debug!(
                "dependencies in {} are up to date, skipping install",
                package.root.display()
            );
            return Ok(false);
        }
    }

    installer.install(package).await?;

    let marker = InstallMarker {
        lockfile_path: package.lockfile_path.clone(),
        lockfile_mtime_ms: lockfile_mtime_ms(&package.lockfile_path).await,
    };
    let serialized = serde_json::to_vec_pretty(&marker)?;
    tokio::fs::write(&marker_path, serialized).await?;
    Ok(true)
}

/// Reads the marker, treating a missing or corrupt file as absent.
async fn read_marker(path: &Path) -> Option<InstallMarker> {
    let raw = tokio::fs::read_to_string(path).await.ok()?;
    match serde_json::from_str(&raw) {
        Ok(marker) => Some(marker),
        Err(err) => {
            tracing::warn!("ignoring corrupt install marker {}: {err}", path.display());
            None
        }
    }
}

/// Lockfile modification time in milliseconds since the epoch, when
/// readable.
async fn lockfile_mtime_ms(path: &Path) -> Option<u64> {
    let metadata = tokio::fs::metadata(path).await.ok()?;
    let modified = metadata.modified().ok()?;
    let elapsed = modified.duration_since(UNIX_EPOCH).ok()?;
    u64::try_from(elapsed.as_millis()).ok()
}

#[cfg(test)]
#[cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, reason = "Allow for tests")
)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct CountingInstaller {
        calls: AtomicUsize,
    }

    impl CountingInstaller {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
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

    fn package_in(dir: &TempDir) -> PackageInfo {
        std::fs::write(dir.path().join("bun.lockb"), b"lock").unwrap();
        PackageInfo {
            root: dir.path().to_path_buf(),
            entry: dir.path().join("tool.tsx"),
            manifest_path: dir.path().join("package.json"),
            lockfile_path: dir.path().join("bun.lockb"),
            lockfile_kind: LockfileKind::Bun,
            name: None,
        }
    }

    #[tokio::test]
    async fn test_first_install_runs_and_writes_marker() {
        let dir = TempDir::new().unwrap();
        let package = package_in(&dir);
        let installer = CountingInstaller::new();

        let ran = ensure_tool_dependencies(&package, &installer).await.unwrap();
        assert!(ran);
        assert_eq!(installer.count(), 1);
        assert!(dir.path().join(MARKER_FILE_NAME).is_file());
    }

    #[tokio::test]
    async fn test_second_install_skipped_when_marker_matches() {
        let dir = TempDir::new().unwrap();
        let package = package_in(&dir);
        let installer = CountingInstaller::new();

        ensure_tool_dependencies(&package, &installer).await.unwrap();
        let ran = ensure_tool_dependencies(&package, &installer).await.unwrap();
        assert!(!ran);
        assert_eq!(installer.count(), 1);
    }

    #[tokio::test]
    async fn test_lockfile_touch_forces_reinstall() {
        let dir = TempDir::new().unwrap();
        let package = package_in(&dir);
        let installer = CountingInstaller::new();

        ensure_tool_dependencies(&package, &installer).await.unwrap();

        // Bump the lockfile mtime well past the recorded one.
        let bumped = filetime::FileTime::from_unix_time(4_000_000_000, 0);
        filetime::set_file_mtime(&package.lockfile_path, bumped).unwrap();

        let ran = ensure_tool_dependencies(&package, &installer).await.unwrap();
        assert!(ran);
        assert_eq!(installer.count(), 2);
    }

    #[tokio::test]
    async fn test_marker_path_mismatch_forces_reinstall() {
        let dir = TempDir::new().unwrap();
        let package = package_in(&dir);
        let installer = CountingInstaller::new();

        let stale = InstallMarker {
            lockfile_path: PathBuf::from("/somewhere/else/bun.lockb"),
            lockfile_mtime_ms: Some(1),
        };
        std::fs::write(
            dir.path().join(MARKER_FILE_NAME),
            serde_json::to_vec(&stale).unwrap(),
        )
        .unwrap();

        let ran = ensure_tool_dependencies(&package, &installer).await.unwrap();
        assert!(ran);
        assert_eq!(installer.count(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_marker_forces_reinstall() {
        let dir = TempDir::new().unwrap();
        let package = package_in(&dir);
        let installer = CountingInstaller::new();

        std::fs::write(dir.path().join(MARKER_FILE_NAME), "{not json").unwrap();
        let ran = ensure_tool_dependencies(&package, &installer).await.unwrap();
        assert!(ran);
        assert_eq!(installer.count(), 1);
    }

    #[tokio::test]
    async fn test_failed_install_leaves_no_marker() {
        struct FailingInstaller;

        #[async_trait]
        impl Installer for FailingInstaller {
            async fn install(&self, _package: &PackageInfo) -> ToolResult<()> {
                Err(ToolError::Install("registry unreachable".to_owned()))
            }
        }

        let dir = TempDir::new().unwrap();
        let package = package_in(&dir);
        let error = ensure_tool_dependencies(&package, &FailingInstaller)
            .await
            .unwrap_err();
        assert_eq!(error.stage(), "install");
        assert!(!dir.path().join(MARKER_FILE_NAME).exists());
    }
}
