//! TypeScript compilation and module resolution for grimoire tools.
//!
//! This crate turns user-authored `.ts`/`.tsx` plugin sources into
//! executable ES modules (SWC transpile, JSX automatic-runtime rewrite,
//! require-preloading wrapper), resolves their imports Node-style inside the
//! plugin's package root, and extracts input schemas from `z.object(...)`
//! declarations without executing any code.
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

/// Static input-schema extraction from tool source text.
pub mod extract;
/// JSX to automatic-runtime rewriting.
pub mod jsx;
/// Node-style module resolution scoped to a plugin package.
pub mod resolver;
/// Built-in module stubs for the framework surface.
pub mod stubs;
/// SWC transpilation and module wrapping.
pub mod transpile;

pub use extract::extract_input_schema;
pub use jsx::JSX_RUNTIME_SPECIFIER;
pub use resolver::{ModuleResolver, ResolvedModule};
pub use stubs::{FETCH_SPECIFIER, MISSING_STUB, TOOLS_SPECIFIER, TOOLS_STUB, builtin_stub};
pub use transpile::{CompiledModule, compile_dependency, compile_tool, scan_requires};
