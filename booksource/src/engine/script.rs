//! Sandboxed evaluation of `@js:` rule bodies.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{RuleError, RuleResult};

use super::context::RuleContext;
use super::scope::Matched;

/// Names a script body can see.
pub const ENV_NAMES: [&str; 11] = [
    "source", "book", "chapter", "keyword", "page", "pageIndex", "baseUrl", "url", "result",
    "host", "flowVars",
];

/// Host globals bound to `undefined` inside the wrapper.
const HIDDEN_GLOBALS: [&str; 12] = [
    "window", "self", "globalThis", "document", "parent", "top", "frames", "fetch",
    "XMLHttpRequest", "WebSocket", "localStorage", "sessionStorage",
];

/**
    One script invocation: the expression body, its environment object, and
    the source's helper library.
*/
#[derive(Debug, Clone, Copy)]
pub struct ScriptCall<'a> {
    pub body: &'a str,
    pub env: &'a Value,
    pub lib: Option<&'a str>,
}

impl ScriptCall<'_> {
    /**
        Render the call as a self-contained JavaScript expression.

        The body runs as an expression inside a strict async function called
        with no `this`. Host globals are bound to `undefined` in its scope.
        The wrapper alone does not reset the realm; runtimes evaluate each
        call in a fresh page so globals written through other paths are gone
        by the next call.
    */
    pub fn to_javascript(&self) -> String {
        format!(
            "(async function (__env) {{ 'use strict'; const {{{names}}} = __env; const {hidden}; {lib}\nreturn ({body}\n); }}).call(undefined, {env})",
            names = ENV_NAMES.join(", "),
            hidden = HIDDEN_GLOBALS
                .iter()
                .map(|name| format!("{} = undefined", name))
                .collect::<Vec<_>>()
                .join(", "),
            lib = self.lib.unwrap_or_default(),
            body = self.body,
            env = self.env,
        )
    }
}

/**
    Something that can evaluate a [`ScriptCall`] and hand back JSON.
*/
#[async_trait]
pub trait ScriptRuntime: Send + Sync {
    async fn eval(&self, call: ScriptCall<'_>) -> anyhow::Result<Value>;
}

/**
    Run a script body under `ctx` with a deadline.

    A missing runtime is an `UnknownError`, an expired deadline a
    `NetworkError`, and a script fault a `ParseError` carrying the fault.
*/
pub async fn run(
    runtime: Option<&dyn ScriptRuntime>,
    body: &str,
    ctx: &RuleContext,
    timeout: Duration,
) -> RuleResult<Value> {
    let source_id = ctx.source.id.as_str();

    let Some(runtime) = runtime else {
        return Err(RuleError::unknown("no script runtime configured")
            .with_source_id(source_id)
            .with_expr(body));
    };

    let env = ctx.script_env();
    let call = ScriptCall {
        body,
        env: &env,
        lib: ctx.source.js_lib.as_deref(),
    };

    tracing::debug!(source = source_id, "evaluating script");

    match tokio::time::timeout(timeout, runtime.eval(call)).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(fault)) => Err(RuleError::parse(format!("script failed: {}", fault))
            .with_cause(fault)
            .with_source_id(source_id)
            .with_expr(body)),
        Err(_) => Err(RuleError::network(format!(
            "script timed out after {}ms",
            timeout.as_millis()
        ))
        .with_source_id(source_id)
        .with_expr(body)),
    }
}

/// Strings are text, arrays become one match per item, `null` is no match.
pub fn into_matches(value: Value) -> Vec<Matched> {
    match value {
        Value::Array(items) => items.into_iter().filter_map(Matched::from_json).collect(),
        other => Matched::from_json(other).into_iter().collect(),
    }
}
