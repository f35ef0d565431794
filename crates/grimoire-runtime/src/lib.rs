//! Tool execution runtimes for grimoire.
//!
//! Two execution paths: single-file tools run in-process on a sandboxed
//! QuickJS engine with memory/stack/time limits and a permission-gated
//! `fetch` global; packaged tools run in an isolated subprocess under an
//! external JS runner with a file/stdout-line IPC protocol.
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

/// QuickJS/JSON value conversion.
pub mod conversion;
/// In-process QuickJS evaluation engine.
pub mod engine;
/// Permission-gated `fetch` global.
pub mod fetch;
/// Subprocess execution of packaged tools.
pub mod subprocess;

pub use conversion::{js_value_to_json, json_to_js_value};
pub use engine::{DefinitionMeta, Renderer, ToolEngine};
pub use fetch::NETWORK_PERMISSION;
pub use subprocess::{RUNNER_FILE_NAME, RUNNER_SOURCE, SubprocessExecutor};
