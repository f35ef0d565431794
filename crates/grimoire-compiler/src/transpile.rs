//! TypeScript/JSX transpilation and module wrapping.
//!
//! Turns one plugin source string into an executable ES module: SWC parses
//! the TypeScript (TSX selected by filename), strips type syntax, the JSX
//! pass rewrites elements to automatic-runtime calls, and ES2022 code is
//! emitted. The wrapper then prepends a self-contained loader so that
//! CommonJS-style `require(...)` call sites inside the compiled body are
//! served from a table of modules resolved *before* evaluation.

use std::rc::Rc;
use std::sync::OnceLock;

use regex::Regex;
use swc_common::{FileName, GLOBALS, Globals, Mark, SourceMap, sync::Lrc};
use swc_ecma_ast::EsVersion;
use swc_ecma_codegen::{Config as CodegenConfig, Emitter, text_writer::JsWriter};
use swc_ecma_parser::{Syntax, TsSyntax, parse_file_as_program};
use swc_ecma_transforms_typescript::strip;

use grimoire_core::{ToolError, ToolResult};

use crate::jsx::rewrite_jsx;

/// A transient, single-use executable unit produced per compilation.
///
/// Instantiated once to obtain the exported tool definition, then discarded;
/// nothing is cached across loads (freshness over compile cost).
#[derive(Debug, Clone)]
pub struct CompiledModule {
    /// Logical filename the module was compiled from.
    pub filename: String,
    /// Wrapped, executable module source.
    pub code: String,
    /// Distinct `require(...)` specifiers found in the compiled body, in
    /// first-appearance order. These are preloaded best-effort before the
    /// body runs.
    pub requires: Vec<String>,
}

/// Extensions that go through the SWC pipeline.
fn needs_transpile(filename: &str) -> bool {
    filename.ends_with(".ts")
        || filename.ends_with(".tsx")
        || filename.ends_with(".jsx")
        || filename.ends_with(".mts")
        || filename.ends_with(".cts")
}

/// Whether the filename enables JSX parsing.
fn is_jsx(filename: &str) -> bool {
    filename.ends_with(".tsx") || filename.ends_with(".jsx")
}

/// Compiles a plugin entry source to a wrapped, executable ES module.
///
/// # Errors
/// Returns a compile-stage error when parsing or code generation fails;
/// such failures are never retried.
pub fn compile_tool(source: &str, filename: &str) -> ToolResult<CompiledModule> {
    let body = if needs_transpile(filename) {
        transpile(source, filename)?
    } else {
        source.to_owned()
    };
    Ok(wrap_module(&body, filename))
}

/// Compiles a dependency file fed to the module loader during resolution.
///
/// JSON modules become a default export of their parsed value; TypeScript
/// sources are transpiled; plain JavaScript passes through. All of them get
/// the same require-preloading wrapper as the entry module so transitive
/// CommonJS dependencies keep working.
///
/// # Errors
/// Returns a compile-stage error when transpilation fails.
pub fn compile_dependency(source: &str, filename: &str) -> ToolResult<CompiledModule> {
    if filename.ends_with(".json") {
        let value: serde_json::Value = serde_json::from_str(source)
            .map_err(|err| ToolError::Compile(format!("invalid JSON module {filename}: {err}")))?;
        return Ok(CompiledModule {
            filename: filename.to_owned(),
            code: format!("export default {value};"),
            requires: Vec::new(),
        });
    }
    compile_tool(source, filename)
}

/// Transpiles TypeScript/JSX to plain ES2022 JavaScript using SWC.
fn transpile(source: &str, filename: &str) -> ToolResult<String> {
    let source_map: Lrc<SourceMap> = Lrc::new(SourceMap::default());
    let source_file = source_map.new_source_file(
        Lrc::new(FileName::Custom(filename.to_owned())),
        source.to_owned(),
    );

    let syntax = Syntax::Typescript(TsSyntax {
        tsx: is_jsx(filename),
        decorators: false,
        dts: false,
        no_early_errors: true,
        disallow_ambiguous_jsx_like: false,
    });

    let mut errors = vec![];
    let program = parse_file_as_program(&source_file, syntax, EsVersion::Es2022, None, &mut errors)
        .map_err(|error| ToolError::Compile(format!("failed to parse {filename}: {error:?}")))?;

    // Recoverable parse errors are tolerated; SWC still produces a usable AST.
    if !errors.is_empty() {
        tracing::debug!("SWC parse warnings for {filename} (non-fatal): {errors:?}");
    }

    let mut program = GLOBALS.set(&Globals::default(), || {
        let unresolved_mark = Mark::new();
        let top_level_mark = Mark::new();
        let pass = strip(unresolved_mark, top_level_mark);
        program.apply(pass)
    });

    if rewrite_jsx(&mut program) {
        tracing::debug!("Rewrote JSX to automatic-runtime calls in {filename}");
    }

    let mut buf = vec![];
    {
        let writer = JsWriter::new(Rc::clone(&source_map), "\n", &mut buf, None);
        let config = CodegenConfig::default()
            .with_minify(false)
            .with_target(EsVersion::Es2022);

        let mut emitter = Emitter {
            cfg: config,
            cm: source_map,
            comments: None,
            wr: writer,
        };

        emitter
            .emit_program(&program)
            .map_err(|error| ToolError::Compile(format!("failed to generate code: {error:?}")))?;
    }

    String::from_utf8(buf)
        .map_err(|error| ToolError::Compile(format!("generated code is not UTF-8: {error}")))
}

fn require_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        #[allow(clippy::expect_used, reason = "Pattern is a compile-time constant")]
        Regex::new(r#"require\s*\(\s*(?:"([^"\\]+)"|'([^'\\]+)')\s*\)"#)
            .expect("require pattern is valid")
    })
}

/// Scans compiled code for `require(<string literal>)` call sites.
pub fn scan_requires(code: &str) -> Vec<String> {
    let mut specifiers = Vec::new();
    for captures in require_regex().captures_iter(code) {
        let specifier = captures
            .get(1)
            .or_else(|| captures.get(2))
            .map(|group| group.as_str().to_owned());
        if let Some(specifier) = specifier {
            if !specifiers.contains(&specifier) {
                specifiers.push(specifier);
            }
        }
    }
    specifiers
}

/// Whether the compiled body looks like CommonJS and needs a module shim.
fn is_commonjs(code: &str) -> bool {
    code.contains("module.exports") || code.contains("exports.") || code.contains("exports[")
}

/// Wraps a compiled body in the self-contained loader.
///
/// The wrapper hoists one namespace import per distinct required specifier
/// (resolved by the module loader before the body evaluates), then defines a
/// synchronous `require` shim that serves only from that preloaded table and
/// throws `import not found` for anything else. CommonJS bodies additionally
/// get `module`/`exports` bindings and a trailing default export.
fn wrap_module(body: &str, filename: &str) -> CompiledModule {
    let requires = scan_requires(body);
    let commonjs = is_commonjs(body);

    if requires.is_empty() && !commonjs {
        return CompiledModule {
            filename: filename.to_owned(),
            code: body.to_owned(),
            requires,
        };
    }

    let mut code = String::new();
    let mut table_entries = Vec::new();
    for (index, specifier) in requires.iter().enumerate() {
        let quoted = serde_json::Value::String(specifier.clone()).to_string();
        code.push_str(&format!(
            "import * as __grimoire_mod{index} from {quoted};\n"
        ));
        table_entries.push(format!("[{quoted}, __grimoire_mod{index}]"));
    }
    code.push_str(&format!(
        "const __grimoire_preloaded = new Map([{}]);\n",
        table_entries.join(", ")
    ));
    code.push_str(
        "function require(specifier) {\n    \
         const entry = __grimoire_preloaded.get(specifier);\n    \
         if (entry === undefined || entry.__grimoire_missing === true) {\n        \
         throw new Error(\"import not found: \" + specifier);\n    \
         }\n    \
         return entry.default ?? entry;\n\
         }\n",
    );

    if commonjs {
        code.push_str("const module = { exports: {} };\nconst exports = module.exports;\n");
    }
    code.push_str(body);
    if commonjs {
        code.push_str("\nexport default module.exports;\n");
    }

    CompiledModule {
        filename: filename.to_owned(),
        code,
        requires,
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
    fn test_transpile_strips_types() {
        let source = r"
interface Params { path: string }
const limit: number = 10;
export default { limit };
";
        let compiled = compile_tool(source, "sample-tool.ts").unwrap();
        assert!(!compiled.code.contains("interface"));
        assert!(!compiled.code.contains(": number"));
        assert!(compiled.code.contains("export default"));
    }

    #[test]
    fn test_transpile_error_is_compile_stage() {
        let error = compile_tool("const x = ;", "bad-tool.ts").unwrap_err();
        assert_eq!(error.stage(), "compile");
    }

    #[test]
    fn test_jsx_rewritten_to_runtime_calls() {
        let source = r#"
export default {
    renderToolDoing: (params: any) => <div className="doing">Working</div>,
};
"#;
        let compiled = compile_tool(source, "render-tool.tsx").unwrap();
        assert!(compiled.code.contains("_jsx("));
        assert!(compiled.code.contains("react/jsx-runtime"));
        assert!(!compiled.code.contains("<div"));
    }

    #[test]
    fn test_jsx_multiple_children_use_jsxs() {
        let source = "export default () => <ul><li>a</li><li>b</li></ul>;";
        let compiled = compile_tool(source, "list-tool.tsx").unwrap();
        assert!(compiled.code.contains("_jsxs("));
    }

    #[test]
    fn test_scan_requires_dedupes_and_keeps_order() {
        let code = r#"
const zod = require("zod");
const helper = require('./helper');
const again = require("zod");
"#;
        assert_eq!(scan_requires(code), vec!["zod".to_owned(), "./helper".to_owned()]);
    }

    #[test]
    fn test_wrap_adds_preload_table_for_requires() {
        let source = r#"const z = require("zod"); module.exports = { name: "t" };"#;
        let compiled = compile_tool(source, "cjs-tool.js").unwrap();
        assert!(compiled.code.contains(r#"import * as __grimoire_mod0 from "zod";"#));
        assert!(compiled.code.contains("__grimoire_preloaded"));
        assert!(compiled.code.contains("import not found"));
        assert!(compiled.code.contains("export default module.exports;"));
        assert_eq!(compiled.requires, vec!["zod".to_owned()]);
    }

    #[test]
    fn test_pure_esm_left_unwrapped() {
        let source = "export default { name: 'plain' };";
        let compiled = compile_tool(source, "plain-tool.js").unwrap();
        assert_eq!(compiled.code, source);
        assert!(compiled.requires.is_empty());
    }

    #[test]
    fn test_json_dependency_module() {
        let compiled = compile_dependency(r#"{"version": 3}"#, "package.json").unwrap();
        assert_eq!(compiled.code, r#"export default {"version":3};"#);
    }

    #[test]
    fn test_json_dependency_rejects_invalid() {
        assert!(compile_dependency("{oops", "data.json").is_err());
    }
}
