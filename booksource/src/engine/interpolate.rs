use std::sync::OnceLock;

use regex::Regex;

use crate::error::{RuleError, RuleResult};

use super::context::RuleContext;

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*(@get:)?([A-Za-z_][A-Za-z0-9_.-]*)\s*\}\}")
            .expect("placeholder regex should compile")
    })
}

/**
    Where an interpolated string is going. Keywords are percent-encoded in URLs
    and request bodies, escaped in regex patterns, and inserted as-is into
    other selectors.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Url,
    Pattern,
    Plain,
}

/**
    Replace `{{name}}` and `{{@get:name}}` placeholders with values from the context.

    Lookup order for plain names: built-ins (`keyword`, `page`, `pageIndex`,
    `host`, `baseUrl`), template parameters, put variables, source variables.
    `{{@get:name}}` reads put and source variables and yields an empty string
    when the variable was never set. Any other unknown name is an error.
*/
pub fn interpolate(template: &str, ctx: &RuleContext, target: Target) -> RuleResult<String> {
    if !template.contains("{{") {
        return Ok(template.to_string());
    }

    let mut result = String::with_capacity(template.len());
    let mut last = 0;

    for caps in placeholder_regex().captures_iter(template) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        let name = &caps[2];

        let value = if caps.get(1).is_some() {
            ctx.get_var(name).unwrap_or_default().to_string()
        } else {
            lookup(name, ctx, target).ok_or_else(|| {
                RuleError::parse(format!("undefined variable `{}` in `{}`", name, template))
                    .with_source_id(&ctx.source.id)
            })?
        };

        result.push_str(&template[last..whole.start()]);
        result.push_str(&value);
        last = whole.end();
    }

    result.push_str(&template[last..]);
    Ok(result)
}

fn lookup(name: &str, ctx: &RuleContext, target: Target) -> Option<String> {
    match name {
        "keyword" => {
            let keyword = ctx.keyword.as_deref()?;
            Some(match target {
                Target::Url => url::form_urlencoded::byte_serialize(keyword.as_bytes()).collect(),
                Target::Pattern => regex::escape(keyword),
                Target::Plain => keyword.to_string(),
            })
        }
        "page" => Some(ctx.page.to_string()),
        "pageIndex" => Some(ctx.page_index.to_string()),
        "host" => Some(ctx.source.host.clone()),
        "baseUrl" => Some(ctx.base_url.clone()),
        _ => ctx
            .params
            .get(name)
            .cloned()
            .or_else(|| ctx.get_var(name).map(str::to_string)),
    }
}
