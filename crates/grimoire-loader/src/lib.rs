//! Tool discovery, validation, installation, and registry for grimoire.
//!
//! This crate ties the pipeline together: scan the configured directories,
//! validate packaged-tool manifests, install dependencies idempotently,
//! load each candidate through the compiler and runtime, and merge the
//! results into a priority-resolved registry with an execution adapter.
#![cfg_attr(
    test,
    allow(
        dead_code,
        clippy::expect_used,
        clippy::unwrap_used,
        clippy::panic,
        clippy::missing_panics_doc,
        clippy::missing_errors_doc,
        reason = "Allow for tests"
    )
)]

/// Dependency installation with marker-based caching.
pub mod install;
/// Directory scanning and per-candidate loading.
pub mod loader;
/// Packaged-tool manifest validation.
pub mod package;
/// Registry merge and execution adapter.
pub mod registry;
/// Diagnostic validation (`grimoire check`).
pub mod validate;

pub use install::{CommandInstaller, Installer, MARKER_FILE_NAME, ensure_tool_dependencies};
pub use loader::ToolLoader;
pub use package::{DEFAULT_ENTRY, declared_dependencies, validate_package};
pub use registry::{AdaptedTool, ToolRegistry};
pub use validate::{is_renderable, validate_tool};
