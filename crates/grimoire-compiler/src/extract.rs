//! Static input-schema extraction.
//!
//! Packaged tools may declare dependencies that are unsafe or unavailable
//! to execute in-process before installation, so their `inputSchema`
//! declaration is reconstructed from raw source text instead of being
//! evaluated. The parser is deliberately narrow: it recognizes the
//! `const inputSchema = z.object({...})` pattern and a restricted call-chain
//! grammar per field. Anything outside that grammar degrades to a
//! permissive "unknown" field rather than failing the whole extraction.

use regex::Regex;
use serde_json::{Number, Value};
use std::sync::OnceLock;

use grimoire_core::schema::{FieldSchema, ObjectSchema, SchemaType};

/// Anchor for the schema declaration keyword.
fn declaration_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        #[allow(clippy::expect_used, reason = "Pattern is a compile-time constant")]
        Regex::new(r"(?:export\s+)?const\s+inputSchema\s*=\s*z\s*\.\s*(object|strictObject)\s*\(")
            .expect("schema declaration pattern is valid")
    })
}

/// Extracts an input schema from raw tool source text without executing it.
///
/// Returns `None` when no recognizable declaration is present or when the
/// declaration yields no parseable field; callers fall back to a fully
/// permissive schema in that case. Never panics on malformed input.
pub fn extract_input_schema(source: &str) -> Option<ObjectSchema> {
    let captures = declaration_regex().captures(source)?;
    let strict = captures.get(1).is_some_and(|kind| kind.as_str() == "strictObject");
    let after = captures.get(0)?.end();

    let literal = balanced_object(&source[after..]).or_else(|| {
        tracing::debug!("inputSchema declaration found but object literal did not balance");
        None
    })?;

    let mut fields = Vec::new();
    for entry in split_top_level(literal, ',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        match parse_field(entry) {
            Some(field) => fields.push(field),
            None => tracing::debug!("Skipping unparseable schema entry: {entry}"),
        }
    }

    if fields.is_empty() {
        return None;
    }

    Some(ObjectSchema { fields, strict })
}

/// Returns the contents of the first balanced `{...}` literal in `text`,
/// tracking string-quote state and escape sequences.
fn balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0_usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (index, character) in text[start..].char_indices() {
        if let Some(active) = quote {
            if escaped {
                escaped = false;
            } else if character == '\\' {
                escaped = true;
            } else if character == active {
                quote = None;
            }
            continue;
        }
        match character {
            '\'' | '"' | '`' => quote = Some(character),
            '{' | '[' | '(' => depth += 1,
            '}' | ']' | ')' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[start + 1..start + index]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Splits `text` on `separator` at depth zero, treating parentheses, braces,
/// brackets, and string literals as opaque.
fn split_top_level(text: &str, separator: char) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut depth = 0_usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut piece_start = 0;

    for (index, character) in text.char_indices() {
        if let Some(active) = quote {
            if escaped {
                escaped = false;
            } else if character == '\\' {
                escaped = true;
            } else if character == active {
                quote = None;
            }
            continue;
        }
        match character {
            '\'' | '"' | '`' => quote = Some(character),
            '(' | '{' | '[' => depth += 1,
            ')' | '}' | ']' => depth = depth.saturating_sub(1),
            _ if character == separator && depth == 0 => {
                pieces.push(&text[piece_start..index]);
                piece_start = index + character.len_utf8();
            }
            _ => {}
        }
    }
    pieces.push(&text[piece_start..]);
    pieces
}

/// Parses one `key: z.<type>()...` entry into a field schema.
fn parse_field(entry: &str) -> Option<FieldSchema> {
    let colon = find_top_level(entry, ':')?;
    let key = entry[..colon].trim();
    let key = key
        .strip_prefix(['\'', '"'])
        .and_then(|rest| rest.strip_suffix(['\'', '"']))
        .unwrap_or(key);
    if key.is_empty() {
        return None;
    }

    let expression = entry[colon + 1..].trim();
    let chain = parse_call_chain(expression);

    let Some(chain) = chain else {
        // Not a z.* call chain at all; keep the field but accept anything.
        return Some(FieldSchema {
            name: key.to_owned(),
            ty: SchemaType::Unknown,
            description: None,
            default: None,
            optional: true,
        });
    };

    let mut ty = SchemaType::Unknown;
    let mut description = None;
    let mut default = None;
    let mut optional = false;
    let mut supported = true;

    for (position, (method, args)) in chain.iter().enumerate() {
        if position == 0 {
            ty = parse_base_type(method, args);
            continue;
        }
        match method.as_str() {
            "describe" => description = parse_string_literal(args.trim()),
            "default" => default = parse_literal(args.trim()),
            "optional" | "nullish" => optional = true,
            _ => supported = false,
        }
    }

    if !supported {
        // A chain method outside the grammar; degrade to permissive rather
        // than guessing at semantics.
        ty = SchemaType::Unknown;
        optional = true;
    }

    Some(FieldSchema {
        name: key.to_owned(),
        ty,
        description,
        default,
        optional,
    })
}

/// Finds `needle` at depth zero outside string literals.
fn find_top_level(text: &str, needle: char) -> Option<usize> {
    let mut depth = 0_usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (index, character) in text.char_indices() {
        if let Some(active) = quote {
            if escaped {
                escaped = false;
            } else if character == '\\' {
                escaped = true;
            } else if character == active {
                quote = None;
            }
            continue;
        }
        match character {
            '\'' | '"' | '`' => quote = Some(character),
            '(' | '{' | '[' => depth += 1,
            ')' | '}' | ']' => depth = depth.saturating_sub(1),
            _ if character == needle && depth == 0 => return Some(index),
            _ => {}
        }
    }
    None
}

/// Parses a `z.method(args).method(args)...` chain into (method, args)
/// segments. Returns `None` when the expression is not rooted at `z`.
fn parse_call_chain(expression: &str) -> Option<Vec<(String, String)>> {
    let mut rest = expression.trim().strip_prefix('z')?;
    let mut segments = Vec::new();

    loop {
        rest = rest.trim_start();
        let Some(after_dot) = rest.strip_prefix('.') else {
            break;
        };
        let after_dot = after_dot.trim_start();
        let name_end = after_dot
            .char_indices()
            .find(|(_, character)| {
                !(character.is_alphanumeric() || *character == '_' || *character == '$')
            })
            .map_or(after_dot.len(), |(index, _)| index);
        if name_end == 0 {
            return None;
        }
        let method = &after_dot[..name_end];
        let after_name = after_dot[name_end..].trim_start();
        let args_text = balanced_parens(after_name)?;
        let consumed = after_name.find('(')? + args_text.len() + 2;
        segments.push((method.to_owned(), args_text.to_owned()));
        rest = &after_name[consumed..];
        if rest.trim().is_empty() {
            break;
        }
    }

    if segments.is_empty() { None } else { Some(segments) }
}

/// Returns the contents of the first balanced `(...)` group.
fn balanced_parens(text: &str) -> Option<&str> {
    let start = text.find('(')?;
    let mut depth = 0_usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (index, character) in text[start..].char_indices() {
        if let Some(active) = quote {
            if escaped {
                escaped = false;
            } else if character == '\\' {
                escaped = true;
            } else if character == active {
                quote = None;
            }
            continue;
        }
        match character {
            '\'' | '"' | '`' => quote = Some(character),
            '(' | '{' | '[' => depth += 1,
            ')' | '}' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[start + 1..start + index]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Maps a base call (`z.string()`, `z.enum([...])`, ...) onto a schema type.
fn parse_base_type(method: &str, args: &str) -> SchemaType {
    match method {
        "string" => SchemaType::String,
        "number" => SchemaType::Number,
        "boolean" => SchemaType::Boolean,
        "record" => SchemaType::Record,
        "enum" => parse_enum_variants(args).map_or(SchemaType::Unknown, SchemaType::Enum),
        "array" => {
            let inner = parse_call_chain(args.trim())
                .and_then(|chain| chain.first().cloned())
                .map_or(SchemaType::Unknown, |(base, base_args)| {
                    parse_base_type(&base, &base_args)
                });
            SchemaType::Array(Box::new(inner))
        }
        _ => SchemaType::Unknown,
    }
}

/// Parses `["a", "b", ...]` enum variants.
fn parse_enum_variants(args: &str) -> Option<Vec<String>> {
    let inner = args.trim();
    let inner = inner.strip_prefix('[')?.strip_suffix(']')?;
    let mut variants = Vec::new();
    for piece in split_top_level(inner, ',') {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        variants.push(parse_string_literal(piece)?);
    }
    if variants.is_empty() { None } else { Some(variants) }
}

/// Parses a quoted string literal, unescaping common escape sequences.
fn parse_string_literal(text: &str) -> Option<String> {
    let mut characters = text.chars();
    let quote = characters.next()?;
    if !matches!(quote, '\'' | '"' | '`') || !text.ends_with(quote) || text.len() < 2 {
        return None;
    }
    let inner = &text[quote.len_utf8()..text.len() - quote.len_utf8()];

    let mut result = String::with_capacity(inner.len());
    let mut pending_escape = false;
    for character in inner.chars() {
        if pending_escape {
            let unescaped = match character {
                'n' => '\n',
                't' => '\t',
                'r' => '\r',
                '0' => '\0',
                other => other,
            };
            result.push(unescaped);
            pending_escape = false;
        } else if character == '\\' {
            pending_escape = true;
        } else {
            result.push(character);
        }
    }
    Some(result)
}

/// Coerces a `.default(...)` argument to a JSON value.
///
/// Supports string, number, boolean, and null literals; anything else is
/// rejected so the field falls back to "no default" rather than a wrong one.
fn parse_literal(text: &str) -> Option<Value> {
    if let Some(string) = parse_string_literal(text) {
        return Some(Value::String(string));
    }
    match text {
        "true" => return Some(Value::Bool(true)),
        "false" => return Some(Value::Bool(false)),
        "null" => return Some(Value::Null),
        _ => {}
    }
    if let Ok(integer) = text.parse::<i64>() {
        return Some(Value::Number(integer.into()));
    }
    if let Ok(float) = text.parse::<f64>() {
        return Number::from_f64(float).map(Value::Number);
    }
    None
}

#[cfg(test)]
#[cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, reason = "Allow for tests")
)]
mod tests {
    use super::*;
    use grimoire_core::InputSchema;
    use serde_json::json;

    #[test]
    fn test_extract_basic_object() {
        let source = r#"
import { z } from "zod";

export const inputSchema = z.object({
    path: z.string().describe("File path to read"),
    limit: z.number().default(100),
    recursive: z.boolean().optional(),
});
"#;
        let schema = extract_input_schema(source).unwrap();
        assert!(!schema.strict);
        assert_eq!(schema.fields.len(), 3);

        let path = schema.field("path").unwrap();
        assert_eq!(path.ty, SchemaType::String);
        assert_eq!(path.description.as_deref(), Some("File path to read"));
        assert!(!path.optional);

        let limit = schema.field("limit").unwrap();
        assert_eq!(limit.default, Some(json!(100)));

        let recursive = schema.field("recursive").unwrap();
        assert!(recursive.optional);
    }

    #[test]
    fn test_extract_strict_object() {
        let source = "const inputSchema = z.strictObject({ name: z.string() });";
        let schema = extract_input_schema(source).unwrap();
        assert!(schema.strict);
    }

    #[test]
    fn test_extract_enum_and_array() {
        let source = r#"
const inputSchema = z.object({
    mode: z.enum(["fast", "slow"]).default("fast"),
    tags: z.array(z.string()),
    options: z.record(z.string()),
});
"#;
        let schema = extract_input_schema(source).unwrap();
        assert_eq!(
            schema.field("mode").unwrap().ty,
            SchemaType::Enum(vec!["fast".to_owned(), "slow".to_owned()])
        );
        assert_eq!(
            schema.field("tags").unwrap().ty,
            SchemaType::Array(Box::new(SchemaType::String))
        );
        assert_eq!(schema.field("options").unwrap().ty, SchemaType::Record);
    }

    #[test]
    fn test_unsupported_expression_degrades_to_unknown() {
        let source = r"
const inputSchema = z.object({
    payload: z.union([z.string(), z.number()]),
    count: z.number().min(1).max(10),
});
";
        let schema = extract_input_schema(source).unwrap();
        assert_eq!(schema.field("payload").unwrap().ty, SchemaType::Unknown);
        // `.min()` is outside the grammar, so the whole field degrades.
        assert_eq!(schema.field("count").unwrap().ty, SchemaType::Unknown);
        assert!(schema.field("count").unwrap().optional);
    }

    #[test]
    fn test_no_declaration_returns_none() {
        assert!(extract_input_schema("export default { name: 'x' };").is_none());
        assert!(extract_input_schema("").is_none());
        assert!(extract_input_schema("const schema = z.object({ a: z.string() });").is_none());
    }

    #[test]
    fn test_malformed_input_never_panics() {
        assert!(extract_input_schema("const inputSchema = z.object({").is_none());
        assert!(extract_input_schema("const inputSchema = z.object(").is_none());
        assert!(extract_input_schema("const inputSchema = z.object({ 'unterminated: ").is_none());
    }

    #[test]
    fn test_nested_objects_are_opaque_to_the_splitter() {
        let source = r#"
const inputSchema = z.object({
    query: z.string().describe("Search, with {braces} and (parens), ok"),
    filters: z.record(z.string()).default({}),
});
"#;
        let schema = extract_input_schema(source).unwrap();
        assert_eq!(schema.fields.len(), 2);
        assert_eq!(
            schema.field("query").unwrap().description.as_deref(),
            Some("Search, with {braces} and (parens), ok")
        );
        // `{}` is not a supported literal; the default is dropped.
        assert_eq!(schema.field("filters").unwrap().default, None);
    }

    #[test]
    fn test_default_literals() {
        let source = r#"
const inputSchema = z.object({
    a: z.string().default("hi\nthere"),
    b: z.number().default(2.5),
    c: z.boolean().default(false),
    d: z.string().nullish().default(null),
});
"#;
        let schema = extract_input_schema(source).unwrap();
        assert_eq!(schema.field("a").unwrap().default, Some(json!("hi\nthere")));
        assert_eq!(schema.field("b").unwrap().default, Some(json!(2.5)));
        assert_eq!(schema.field("c").unwrap().default, Some(json!(false)));
        assert_eq!(schema.field("d").unwrap().default, Some(Value::Null));
        assert!(schema.field("d").unwrap().optional);
    }

    #[test]
    fn test_extracted_schema_matches_handwritten_equivalent() {
        let source = r#"
export const inputSchema = z.object({
    path: z.string(),
    limit: z.number().default(10),
});
"#;
        let extracted = InputSchema::Object(extract_input_schema(source).unwrap());
        let parsed = extracted.safe_parse(&json!({"path": "x"})).unwrap();
        assert_eq!(parsed, json!({"path": "x", "limit": 10}));
    }

    #[test]
    fn test_quoted_keys() {
        let source = r#"const inputSchema = z.object({ "dry-run": z.boolean().default(false) });"#;
        let schema = extract_input_schema(source).unwrap();
        assert_eq!(schema.fields[0].name, "dry-run");
    }
}
