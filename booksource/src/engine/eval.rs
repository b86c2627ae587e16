//! The rule engine: plan cache, combinator evaluation, put directives, and
//! page loading.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::{Map, Value, json};

use crate::error::{RuleError, RuleResult};

use super::config::EngineConfig;
use super::context::RuleContext;
use super::expr::{self, Combinator, EvalPlan, Expr, Leaf, Mode, Syntax};
use super::fetch::Fetcher;
use super::interpolate::{Target, interpolate};
use super::post;
use super::request::{Method, RequestConfig, ResolvedRequest};
use super::scope::{Matched, Scope};
use super::script::{self, ScriptRuntime};
use super::select;

/// Whether the caller wants one value or every value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Scalar,
    List,
}

/**
    Evaluates rule expressions against pages fetched through a [`Fetcher`].

    Parsed expressions are cached by `(expression, mode)`.
*/
pub struct RuleEngine {
    fetcher: Arc<dyn Fetcher>,
    scripts: Option<Arc<dyn ScriptRuntime>>,
    config: EngineConfig,
    plans: RwLock<HashMap<(String, Mode), Arc<Expr>>>,
}

impl RuleEngine {
    pub fn new(fetcher: Arc<dyn Fetcher>, config: EngineConfig) -> Self {
        Self {
            fetcher,
            scripts: None,
            config,
            plans: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_scripts(mut self, scripts: Arc<dyn ScriptRuntime>) -> Self {
        self.scripts = Some(scripts);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /**
        Parse `raw` for `mode`, reusing an earlier parse when there is one.
    */
    pub fn compile(&self, raw: &str, mode: Mode) -> RuleResult<Arc<Expr>> {
        let key = (raw.to_string(), mode);

        if let Some(expr) = self
            .plans
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
        {
            return Ok(expr.clone());
        }

        let expr = Arc::new(expr::parse(raw, mode)?);
        self.plans
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, expr.clone());
        Ok(expr)
    }

    /// First non-blank value, trimmed.
    pub async fn eval_string(
        &self,
        raw: &str,
        mode: Mode,
        ctx: &mut RuleContext,
    ) -> RuleResult<Option<String>> {
        let expr = self.compile(raw, mode)?;
        let matches = self.eval_expr(&expr, Shape::Scalar, ctx).await?;
        Ok(matches
            .into_iter()
            .next()
            .map(|m| m.into_string().trim().to_string())
            .filter(|s| !s.is_empty()))
    }

    /// Every non-blank value, trimmed, in order.
    pub async fn eval_strings(
        &self,
        raw: &str,
        mode: Mode,
        ctx: &mut RuleContext,
    ) -> RuleResult<Vec<String>> {
        let expr = self.compile(raw, mode)?;
        let matches = self.eval_expr(&expr, Shape::List, ctx).await?;
        Ok(matches
            .into_iter()
            .map(|m| m.into_string().trim().to_string())
            .filter(|s| !s.is_empty())
            .collect())
    }

    /// Matches as scopes for further evaluation, e.g. the items of a list rule.
    pub async fn eval_scopes(
        &self,
        raw: &str,
        mode: Mode,
        ctx: &mut RuleContext,
    ) -> RuleResult<Vec<Scope>> {
        let expr = self.compile(raw, mode)?;
        let matches = self.eval_expr(&expr, Shape::List, ctx).await?;
        Ok(matches.into_iter().map(Matched::into_scope).collect())
    }

    fn eval_expr<'a>(
        &'a self,
        expr: &'a Expr,
        shape: Shape,
        ctx: &'a mut RuleContext,
    ) -> BoxFuture<'a, RuleResult<Vec<Matched>>> {
        async move {
            let matches = self
                .eval_plan(&expr.plan, shape, ctx)
                .await
                .map_err(|e| e.with_expr(&expr.raw))?;

            if !expr.puts.is_empty() {
                self.apply_puts(expr, &matches, shape, ctx).await?;
            }

            Ok(matches)
        }
        .boxed()
    }

    /// Store each put directive's value; the main result is left untouched.
    async fn apply_puts(
        &self,
        expr: &Expr,
        matches: &[Matched],
        shape: Shape,
        ctx: &mut RuleContext,
    ) -> RuleResult<()> {
        let value = match shape {
            Shape::Scalar => matches
                .first()
                .map(|m| Value::String(m.clone().into_string()))
                .unwrap_or(Value::Null),
            Shape::List => Value::Array(matches.iter().map(Matched::to_json).collect()),
        };

        let saved = ctx.result.replace(value);

        let mut outcome = Ok(());
        for put in &expr.puts {
            match self.eval_expr(&put.expr, Shape::Scalar, ctx).await {
                Ok(found) => {
                    let stored = found
                        .into_iter()
                        .next()
                        .map(|m| m.into_string())
                        .unwrap_or_default();
                    tracing::debug!(key = %put.key, value = %stored, "put");
                    ctx.vars.insert(put.key.clone(), stored);
                }
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }

        ctx.result = saved;
        outcome
    }

    fn eval_plan<'a>(
        &'a self,
        plan: &'a EvalPlan,
        shape: Shape,
        ctx: &'a mut RuleContext,
    ) -> BoxFuture<'a, RuleResult<Vec<Matched>>> {
        async move {
            match plan {
                EvalPlan::Leaf(leaf) => self.eval_leaf(leaf, ctx).await,
                EvalPlan::Combinator {
                    op: Combinator::Or,
                    children,
                } => {
                    for child in children {
                        let found = self.eval_plan(child, shape, ctx).await?;
                        if !is_blank(&found) {
                            return Ok(found);
                        }
                    }
                    Ok(Vec::new())
                }
                EvalPlan::Combinator {
                    op: Combinator::And,
                    children,
                } => {
                    let mut joined = Vec::new();
                    let mut text = String::new();
                    for child in children {
                        let found = self.eval_plan(child, shape, ctx).await?;
                        match shape {
                            Shape::List => joined.extend(found),
                            Shape::Scalar => {
                                if let Some(first) = found.into_iter().next() {
                                    text.push_str(&first.into_string());
                                }
                            }
                        }
                    }
                    if shape == Shape::Scalar && !text.is_empty() {
                        joined.push(Matched::Text(text));
                    }
                    Ok(joined)
                }
                EvalPlan::Combinator {
                    op: Combinator::Zip,
                    children,
                } => {
                    let mut columns = Vec::with_capacity(children.len());
                    for child in children {
                        columns.push(self.eval_plan(child, Shape::List, ctx).await?);
                    }
                    zip(columns)
                }
            }
        }
        .boxed()
    }

    async fn eval_leaf(&self, leaf: &Leaf, ctx: &mut RuleContext) -> RuleResult<Vec<Matched>> {
        let raw = match leaf.syntax {
            Syntax::Script => {
                let value = script::run(
                    self.scripts.as_deref(),
                    &leaf.body,
                    ctx,
                    self.config.script_timeout,
                )
                .await?;
                script::into_matches(value)
            }
            syntax => {
                let body = if leaf.body.contains("{{") {
                    let target = match syntax {
                        Syntax::Regex => Target::Pattern,
                        _ => Target::Plain,
                    };
                    Cow::Owned(interpolate(&leaf.body, ctx, target)?)
                } else {
                    Cow::Borrowed(leaf.body.as_str())
                };
                select::select(syntax, &body, &ctx.scope)?
            }
        };

        Ok(post::apply(leaf, raw))
    }

    // ── Requests ─────────────────────────────────────────────────────────────

    /**
        Expand a request's templates, run its `preJs`, and make its URL absolute
        against the current page.
    */
    pub async fn resolve_request(
        &self,
        request: &RequestConfig,
        ctx: &mut RuleContext,
    ) -> RuleResult<ResolvedRequest> {
        let source = ctx.source.clone();

        let mut url = interpolate(&request.url, ctx, Target::Url)?;
        let mut method = request.method;

        let mut headers = source.headers.clone();
        for (key, value) in &request.headers {
            headers.insert(key.clone(), interpolate(value, ctx, Target::Plain)?);
        }

        let mut body = match &request.body {
            Some(body) => Some(interpolate(body, ctx, Target::Url)?),
            None => None,
        };

        if let Some(pre_js) = &request.pre_js {
            let method_name = match method {
                Method::Get => "GET",
                Method::Post => "POST",
            };
            let draft = json!({
                "url": url,
                "method": method_name,
                "headers": headers,
                "body": body,
            });
            let saved = ctx.result.replace(draft);
            let outcome =
                script::run(self.scripts.as_deref(), pre_js, ctx, self.config.script_timeout)
                    .await;
            ctx.result = saved;

            match outcome? {
                Value::String(rewritten) => url = rewritten,
                Value::Object(overrides) => {
                    apply_overrides(overrides, &mut url, &mut method, &mut headers, &mut body)
                }
                _ => {}
            }
        }

        let timeout = request
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.config.request_timeout);

        Ok(ResolvedRequest {
            source_id: source.id.clone(),
            url: post::absolutize(&ctx.base_url, &url),
            action: request.mode(),
            method,
            headers,
            body,
            timeout_ms: timeout.as_millis() as u64,
            web_view: request.web_view,
            web_js: request.web_js.clone(),
            charset: source.charset.clone(),
            rate_limit_ms: source.rate_limit,
        })
    }

    /**
        Fetch a page and make it the context's scope. Returns the requested URL.
    */
    pub async fn load_page(
        &self,
        request: &RequestConfig,
        ctx: &mut RuleContext,
    ) -> RuleResult<String> {
        let resolved = self.resolve_request(request, ctx).await?;

        let response = self
            .fetcher
            .request(&resolved)
            .await
            .map_err(|e| e.with_source_id(&resolved.source_id).with_url(&resolved.url))?;

        ctx.base_url = if response.final_url.is_empty() {
            resolved.url.clone()
        } else {
            response.final_url
        };
        ctx.scope = Scope::from_response(&response.body, request.mode());
        ctx.result = None;

        Ok(resolved.url)
    }
}

fn apply_overrides(
    overrides: Map<String, Value>,
    url: &mut String,
    method: &mut Method,
    headers: &mut HashMap<String, String>,
    body: &mut Option<String>,
) {
    for (key, value) in overrides {
        match (key.as_str(), value) {
            ("url", Value::String(v)) => *url = v,
            ("method", Value::String(v)) => {
                *method = if v.eq_ignore_ascii_case("post") {
                    Method::Post
                } else {
                    Method::Get
                }
            }
            ("headers", Value::Object(map)) => {
                for (k, v) in map {
                    let v = match v {
                        Value::String(s) => s,
                        other => other.to_string(),
                    };
                    headers.insert(k, v);
                }
            }
            ("body", Value::String(v)) => *body = Some(v),
            ("body", Value::Null) => *body = None,
            ("body", other) => *body = Some(other.to_string()),
            _ => {}
        }
    }
}

fn is_blank(matches: &[Matched]) -> bool {
    matches.iter().all(|m| match m {
        Matched::Text(s) => s.trim().is_empty(),
        Matched::Json(Value::Null) => true,
        _ => false,
    })
}

/// Interleave equally long sequences: `a0 b0 a1 b1 ...`.
fn zip(columns: Vec<Vec<Matched>>) -> RuleResult<Vec<Matched>> {
    let Some(len) = columns.first().map(Vec::len) else {
        return Ok(Vec::new());
    };

    if let Some(bad) = columns.iter().find(|c| c.len() != len) {
        return Err(RuleError::parse(format!(
            "`%%` operands have different lengths ({} and {})",
            len,
            bad.len()
        )));
    }

    let mut iters: Vec<_> = columns.into_iter().map(Vec::into_iter).collect();
    let mut out = Vec::with_capacity(len * iters.len());
    for _ in 0..len {
        for column in iters.iter_mut() {
            out.extend(column.next());
        }
    }
    Ok(out)
}
