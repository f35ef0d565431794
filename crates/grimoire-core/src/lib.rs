//! Core types for the grimoire custom-tool subsystem.
//!
//! This crate provides the shared data model (tool definitions, package
//! descriptions, load results), the input-schema validator model, the error
//! taxonomy, and host configuration used across the workspace.
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

/// Host configuration loading.
pub mod config;
/// Error types and result definitions.
pub mod error;
/// Input-schema validator model.
pub mod schema;
/// Core data types for tools, packages, and load results.
pub mod types;

pub use config::{GrimoireConfig, RunnerConfig, USER_TOOLS_DIR, WORKSPACE_TOOLS_DIR};
pub use error::{ToolError, ToolResult};
pub use schema::{FieldSchema, InputSchema, ObjectSchema, SchemaType};
pub use types::{
    ExecutionContext, InstallMarker, LoadStatus, LockfileKind, PackageInfo, ToolDefinition,
    ToolKind, ToolLoadResult, ToolSource,
};
