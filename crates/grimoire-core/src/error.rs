use std::io::Error as IoError;

use serde_json::Error as SerdeJsonError;
use thiserror::Error;
use toml::de::Error as TomlError;

/// Result type for tool-subsystem operations.
pub type ToolResult<T> = Result<T, ToolError>;

/// Errors that can occur while loading or running a custom tool.
///
/// Every variant is scoped to a single candidate tool; a failure in one
/// candidate's pipeline never aborts the scan of the remaining candidates.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Transpilation failed or the source file was missing/unreadable.
    #[error("compile error: {0}")]
    Compile(String),

    /// The evaluated module's default export was missing or not an object,
    /// or an import specifier could not be resolved.
    #[error("resolve error: {0}")]
    Resolve(String),

    /// Parameter validation against the declared input schema failed, or the
    /// package manifest was malformed.
    #[error("schema error: {0}")]
    Schema(String),

    /// The tool's `execute` threw, or the subprocess exited abnormally or
    /// produced unparseable output.
    #[error("execute error: {0}")]
    Execute(String),

    /// A renderer returned a value that is not renderable.
    #[error("render error: {0}")]
    Render(String),

    /// Dependency installation failed.
    #[error("install error: {0}")]
    Install(String),

    /// An I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// Failed to serialize or deserialize JSON data.
    #[error("JSON serialization error: {0}")]
    Json(#[from] SerdeJsonError),

    /// TOML deserialization failed while reading configuration.
    #[error("TOML deserialization error: {0}")]
    Toml(#[from] TomlError),
}

impl ToolError {
    /// Returns the pipeline stage this error belongs to.
    ///
    /// Used when converting an error into a per-candidate load result so
    /// diagnostics can say where in the pipeline a tool broke.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Compile(_) => "compile",
            Self::Resolve(_) => "resolve",
            Self::Schema(_) => "schema",
            Self::Execute(_) => "execute",
            Self::Render(_) => "render",
            Self::Install(_) => "install",
            Self::Io(_) | Self::Json(_) | Self::Toml(_) => "io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ToolError::Compile("unexpected token".to_owned());
        assert_eq!(error.to_string(), "compile error: unexpected token");

        let error = ToolError::Install("bun exited with code 1".to_owned());
        assert_eq!(error.to_string(), "install error: bun exited with code 1");
    }

    #[test]
    fn test_error_stage() {
        assert_eq!(ToolError::Compile(String::new()).stage(), "compile");
        assert_eq!(ToolError::Schema(String::new()).stage(), "schema");
        assert_eq!(ToolError::Install(String::new()).stage(), "install");
    }
}
