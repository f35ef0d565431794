//! Host-provided `fetch` global for in-process tools.
//!
//! Tools reach the network only through this global (directly or via the
//! `@grimoire/fetch` stub). It is installed into every evaluation context;
//! whether a call is allowed depends on the tool declaring the `network`
//! permission, checked per invocation.

use rquickjs::{
    Ctx, Exception, Function, Value as JsValue, function::Async, prelude::Rest,
};
use serde_json::{Map as JsonMap, Value, json};
use tokio::task::spawn;

use grimoire_core::{ToolError, ToolResult};

use crate::conversion::{js_value_to_json, json_to_js_value};

/// Permission tag a tool must declare for `fetch` to be allowed.
pub const NETWORK_PERMISSION: &str = "network";

/// Installs the `fetch` global into `ctx`.
///
/// When `allow_network` is false the function still exists but every call
/// fails with a permission message, so tools get a diagnosable error rather
/// than a `ReferenceError`.
///
/// # Errors
/// Returns an execute-stage error if the function cannot be created or
/// bound.
pub fn install_fetch<'js>(ctx: &Ctx<'js>, allow_network: bool) -> ToolResult<()> {
    let func = Function::new(
        ctx.clone(),
        Async(move |ctx_fetch: Ctx<'js>, args: Rest<JsValue<'js>>| {
            async move {
                if !allow_network {
                    tracing::warn!(
                        "fetch called by a tool without the '{NETWORK_PERMISSION}' permission"
                    );
                    return Err(Exception::throw_message(
                        &ctx_fetch,
                        &format!(
                            "fetch requires the '{NETWORK_PERMISSION}' permission; declare it \
                             in the tool's permissions list"
                        ),
                    ));
                }

                let mut json_args = args.0.iter().filter_map(|arg| js_value_to_json(arg).ok());
                let Some(Value::String(url)) = json_args.next() else {
                    return Err(Exception::throw_message(
                        &ctx_fetch,
                        "fetch requires a URL string as its first argument",
                    ));
                };
                let init = json_args.next().unwrap_or(Value::Null);

                let response = spawn(async move { perform_fetch(&url, &init).await })
                    .await
                    .map_err(|join_err| {
                        Exception::throw_message(
                            &ctx_fetch,
                            &format!("fetch task join failed: {join_err}"),
                        )
                    })?
                    .map_err(|err| {
                        Exception::throw_message(&ctx_fetch, &format!("fetch failed: {err}"))
                    })?;

                json_to_js_value(&ctx_fetch, &response)
            }
        }),
    )
    .map_err(|err| ToolError::Execute(format!("Failed to create fetch function: {err}")))?;

    ctx.globals()
        .set("fetch", func)
        .map_err(|err| ToolError::Execute(format!("Failed to set fetch global: {err}")))
}

/// Performs the HTTP request and shapes the response for JS consumption:
/// `{status, ok, statusText, headers, body, json}` where `json` is the
/// parsed body when it is valid JSON, otherwise `null`.
async fn perform_fetch(url: &str, init: &Value) -> ToolResult<Value> {
    let client = reqwest::Client::new();
    let method = init
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or("GET")
        .to_uppercase();

    let method = reqwest::Method::from_bytes(method.as_bytes())
        .map_err(|err| ToolError::Execute(format!("invalid fetch method: {err}")))?;
    let mut request = client.request(method, url);

    if let Some(headers) = init.get("headers").and_then(Value::as_object) {
        for (name, value) in headers {
            if let Some(value) = value.as_str() {
                request = request.header(name, value);
            }
        }
    }
    if let Some(body) = init.get("body") {
        match body {
            Value::String(text) => request = request.body(text.clone()),
            other => request = request.json(other),
        }
    }

    let response = request
        .send()
        .await
        .map_err(|err| ToolError::Execute(format!("fetch request failed: {err}")))?;

    let status = response.status();
    let mut headers = JsonMap::new();
    for (name, value) in response.headers() {
        if let Ok(value) = value.to_str() {
            headers.insert(name.to_string(), Value::String(value.to_owned()));
        }
    }

    let body = response
        .text()
        .await
        .map_err(|err| ToolError::Execute(format!("fetch body read failed: {err}")))?;
    let parsed: Value = serde_json::from_str(&body).unwrap_or(Value::Null);

    Ok(json!({
        "status": status.as_u16(),
        "ok": status.is_success(),
        "statusText": status.canonical_reason().unwrap_or(""),
        "headers": headers,
        "body": body,
        "json": parsed,
    }))
}
