//! Built-in module stubs served by the resolver.
//!
//! These take priority over anything on disk so plugin code importing the
//! framework surface (`@grimoire/tools`, `react/jsx-runtime`) always gets the
//! host-provided implementation, never a package from `node_modules`.

use crate::jsx::JSX_RUNTIME_SPECIFIER;

/// Specifier for the tool-authoring surface.
pub const TOOLS_SPECIFIER: &str = "@grimoire/tools";

/// Specifier for the host-provided fetch wrapper.
pub const FETCH_SPECIFIER: &str = "@grimoire/fetch";

/// `@grimoire/tools` stub. `defineTool` is an identity function so the host
/// receives the author's definition object unchanged; typing lives entirely
/// in the published `.d.ts` and has no runtime counterpart.
pub const TOOLS_STUB: &str = r"
export function defineTool(definition) {
    return definition;
}
export default { defineTool };
";

/// `@grimoire/fetch` stub. Defers to the host-installed `fetch` global,
/// which enforces the `network` permission.
pub const FETCH_STUB: &str = r"
const fetchImpl = (...args) => globalThis.fetch(...args);
export const fetch = fetchImpl;
export default fetchImpl;
";

/// `react/jsx-runtime` stub. Renderable output is a plain-object element
/// tree, not live React components, so the factory just records the call.
pub const JSX_RUNTIME_STUB: &str = r#"
export const Fragment = Symbol.for("grimoire.fragment");
function element(type, props, key) {
    return { "$$typeof": "grimoire.element", type, props: props ?? {}, key: key ?? null };
}
export const jsx = element;
export const jsxs = element;
export default { Fragment, jsx, jsxs };
"#;

/// Placeholder module bound for specifiers whose preload failed. The flag is
/// checked by the `require` shim so a failed preload only surfaces when the
/// module is actually required at run time.
pub const MISSING_STUB: &str = "export const __grimoire_missing = true;\nexport default undefined;\n";

/// Returns the stub source for `specifier`, if it names a built-in module.
#[must_use]
pub fn builtin_stub(specifier: &str) -> Option<&'static str> {
    match specifier {
        TOOLS_SPECIFIER => Some(TOOLS_STUB),
        FETCH_SPECIFIER => Some(FETCH_STUB),
        JSX_RUNTIME_SPECIFIER => Some(JSX_RUNTIME_STUB),
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

    #[test]
    fn test_builtin_stub_lookup() {
        assert!(builtin_stub("@grimoire/tools").is_some());
        assert!(builtin_stub("@grimoire/fetch").is_some());
        assert!(builtin_stub("react/jsx-runtime").is_some());
        assert!(builtin_stub("zod").is_none());
        assert!(builtin_stub("./helper").is_none());
    }
}
