//! Selector back-ends: CSS, XPath, JSONPath and regex.

use std::str::FromStr;
use std::sync::Arc;

use jsonpath_rust::JsonPath;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use sxd_document::dom::ChildOfRoot;
use sxd_xpath::nodeset::Node as XNode;

use crate::error::{RuleError, RuleResult};

use super::expr::Syntax;
use super::html;
use super::scope::{Matched, Scope};

/**
    Check that a selector body compiles, without running it.
*/
pub fn validate(syntax: Syntax, body: &str) -> RuleResult<()> {
    match syntax {
        Syntax::Css if body.is_empty() => Ok(()),
        Syntax::Css => css_selector(body).map(|_| ()),
        Syntax::XPath => xpath(body).map(|_| ()),
        Syntax::JsonPath => json_path(body).map(|_| ()),
        Syntax::Regex => Regex::new(body).map(|_| ()).map_err(RuleError::from),
        Syntax::Script => Ok(()),
    }
}

/**
    Run a non-script selector against a scope, returning matches in document order.
*/
pub fn select(syntax: Syntax, body: &str, scope: &Scope) -> RuleResult<Vec<Matched>> {
    match syntax {
        Syntax::Css => select_css(body, scope),
        Syntax::XPath => select_xpath(body, scope),
        Syntax::JsonPath => select_json(body, scope),
        Syntax::Regex => select_regex(body, scope),
        Syntax::Script => Err(RuleError::unknown(
            "script selectors are evaluated by the script runtime",
        )),
    }
}

// ── CSS ──────────────────────────────────────────────────────────────────────

fn css_selector(body: &str) -> RuleResult<Selector> {
    Selector::parse(body)
        .map_err(|e| RuleError::parse(format!("invalid CSS selector '{}': {:?}", body, e)))
}

fn select_css(body: &str, scope: &Scope) -> RuleResult<Vec<Matched>> {
    let Some((markup, is_document)) = scope.as_markup() else {
        return Ok(Vec::new());
    };

    let selector = if body.is_empty() {
        None
    } else {
        Some(css_selector(body)?)
    };

    let collect = |root: ElementRef<'_>, include_root: bool| -> Vec<Matched> {
        match &selector {
            None => vec![Matched::Element(Arc::from(root.html()))],
            Some(selector) => root
                .select(selector)
                .filter(|el| include_root || el.id() != root.id())
                .map(|el| Matched::Element(Arc::from(el.html())))
                .collect(),
        }
    };

    if is_document {
        let document = Html::parse_document(markup);
        return Ok(match &selector {
            Some(selector) => document
                .select(selector)
                .map(|el| Matched::Element(Arc::from(el.html())))
                .collect(),
            None => collect(document.root_element(), true),
        });
    }

    Ok(html::with_element(markup, |root| collect(root, false)).unwrap_or_default())
}

// ── XPath ────────────────────────────────────────────────────────────────────

fn xpath(body: &str) -> RuleResult<sxd_xpath::XPath> {
    sxd_xpath::Factory::new()
        .build(body)
        .map_err(|e| RuleError::parse(format!("invalid XPath '{}': {:?}", body, e)))?
        .ok_or_else(|| RuleError::parse(format!("XPath '{}' is empty", body)))
}

fn select_xpath(body: &str, scope: &Scope) -> RuleResult<Vec<Matched>> {
    let Some((markup, is_document)) = scope.as_markup() else {
        return Ok(Vec::new());
    };

    let xml = if is_document {
        let document = Html::parse_document(markup);
        Some(html::to_xml(document.root_element()))
    } else {
        html::with_element(markup, html::to_xml)
    };
    let Some(xml) = xml else {
        return Ok(Vec::new());
    };

    let package = sxd_document::parser::parse(&xml)
        .map_err(|e| RuleError::parse(format!("failed to parse document for XPath: {:?}", e)))?;
    let document = package.as_document();

    let context_node: XNode<'_> = if is_document {
        document.root().into()
    } else {
        let root_element = document.root().children().into_iter().find_map(|child| match child {
            ChildOfRoot::Element(element) => Some(element),
            _ => None,
        });
        match root_element {
            Some(element) => element.into(),
            None => return Ok(Vec::new()),
        }
    };

    let xpath = xpath(body)?;
    let context = sxd_xpath::Context::new();
    let value = xpath
        .evaluate(&context, context_node)
        .map_err(|e| RuleError::parse(format!("XPath evaluation failed for '{}': {:?}", body, e)))?;

    Ok(match value {
        sxd_xpath::Value::Nodeset(nodes) => nodes
            .document_order()
            .into_iter()
            .map(|node| match node {
                XNode::Element(element) => Matched::Element(Arc::from(html::xml_to_html(element))),
                XNode::Attribute(attr) => Matched::Text(attr.value().to_string()),
                XNode::Text(text) => Matched::Text(text.text().to_string()),
                other => Matched::Text(other.string_value()),
            })
            .collect(),
        sxd_xpath::Value::String(s) if s.is_empty() => Vec::new(),
        sxd_xpath::Value::String(s) => vec![Matched::Text(s)],
        sxd_xpath::Value::Number(n) if n.is_nan() => Vec::new(),
        sxd_xpath::Value::Number(n) if n.fract() == 0.0 => vec![Matched::Text((n as i64).to_string())],
        sxd_xpath::Value::Number(n) => vec![Matched::Text(n.to_string())],
        sxd_xpath::Value::Boolean(b) => vec![Matched::Text(b.to_string())],
    })
}

// ── JSONPath ─────────────────────────────────────────────────────────────────

fn json_path(body: &str) -> RuleResult<JsonPath> {
    JsonPath::from_str(body)
        .map_err(|e| RuleError::parse(format!("invalid JSONPath '{}': {}", body, e)))
}

/// A path that lands on an array yields the array's items.
fn select_json(body: &str, scope: &Scope) -> RuleResult<Vec<Matched>> {
    let owned;
    let json = match scope {
        Scope::Json(json) => json,
        other => match serde_json::from_str::<Value>(&other.as_text()) {
            Ok(parsed) => {
                owned = parsed;
                &owned
            }
            Err(_) => return Ok(Vec::new()),
        },
    };

    let path = json_path(body)?;
    let mut matches = Vec::new();
    for found in path.find_slice(json) {
        match found.to_data() {
            Value::Array(items) => matches.extend(items.into_iter().filter_map(Matched::from_json)),
            other => matches.extend(Matched::from_json(other)),
        }
    }
    Ok(matches)
}

// ── Regex ────────────────────────────────────────────────────────────────────

/// Each match yields its participating groups, or the whole match when the pattern has none.
fn select_regex(body: &str, scope: &Scope) -> RuleResult<Vec<Matched>> {
    let re = Regex::new(body)?;
    let text = scope.as_text();

    let mut matches = Vec::new();
    for caps in re.captures_iter(&text) {
        if caps.len() == 1 {
            if let Some(m) = caps.get(0) {
                matches.push(Matched::Text(m.as_str().to_string()));
            }
            continue;
        }
        matches.extend(
            caps.iter()
                .skip(1)
                .flatten()
                .map(|m| Matched::Text(m.as_str().to_string())),
        );
    }
    Ok(matches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PAGE: &str = r#"<html><body>
        <ul class="books">
            <li><a href="/b/1">One</a><span class="author">Ann</span></li>
            <li><a href="/b/2">Two</a><span class="author">Bob</span></li>
            <li><a href="/b/3">Three</a></li>
        </ul>
    </body></html>"#;

    fn doc() -> Scope {
        Scope::Document(Arc::from(PAGE))
    }

    fn texts(matches: Vec<Matched>) -> Vec<String> {
        matches.into_iter().map(Matched::into_string).collect()
    }

    #[test]
    fn test_css_document_order() {
        let found = select(Syntax::Css, "ul.books li a", &doc()).unwrap();
        assert_eq!(texts(found), vec!["One", "Two", "Three"]);
    }

    #[test]
    fn test_css_within_element_scope() {
        let items = select(Syntax::Css, "ul.books li", &doc()).unwrap();
        let second = items[1].clone().into_scope();
        let author = select(Syntax::Css, ".author", &second).unwrap();
        assert_eq!(texts(author), vec!["Bob"]);

        let missing = select(Syntax::Css, ".author", &items[2].clone().into_scope()).unwrap();
        assert!(missing.is_empty());

        let itself = select(Syntax::Css, "", &second).unwrap();
        assert_eq!(itself.len(), 1);
    }

    #[test]
    fn test_css_element_scope_excludes_itself() {
        let scope = Scope::Element(Arc::from("<div><div>inner</div></div>"));
        let found = select(Syntax::Css, "div", &scope).unwrap();
        assert_eq!(texts(found), vec!["inner"]);
    }

    #[test]
    fn test_xpath_on_document_and_element() {
        let found = select(Syntax::XPath, "//ul/li/a/@href", &doc()).unwrap();
        assert_eq!(texts(found), vec!["/b/1", "/b/2", "/b/3"]);

        let items = select(Syntax::XPath, "//li", &doc()).unwrap();
        assert_eq!(items.len(), 3);
        let first = items[0].clone().into_scope();
        let author = select(Syntax::XPath, "./span/text()", &first).unwrap();
        assert_eq!(texts(author), vec!["Ann"]);
    }

    #[test]
    fn test_xpath_scalar_values() {
        let count = select(Syntax::XPath, "count(//li)", &doc()).unwrap();
        assert_eq!(texts(count), vec!["3"]);
    }

    #[test]
    fn test_jsonpath_flattens_arrays() {
        let scope = Scope::Json(json!({"data": {"list": [{"n": "a"}, {"n": "b"}], "name": "x"}}));

        let list = select(Syntax::JsonPath, "$.data.list", &scope).unwrap();
        assert_eq!(list.len(), 2);

        let names = select(Syntax::JsonPath, "$.data.list[*].n", &scope).unwrap();
        assert_eq!(texts(names), vec!["a", "b"]);

        let missing = select(Syntax::JsonPath, "$.data.nothing", &scope).unwrap();
        assert!(missing.is_empty());
    }

    #[test]
    fn test_regex_groups() {
        let scope = Scope::Text("id=12;id=34".to_string());
        let ids = select(Syntax::Regex, r"id=(\d+)", &scope).unwrap();
        assert_eq!(texts(ids), vec!["12", "34"]);

        let whole = select(Syntax::Regex, r"id=\d+", &scope).unwrap();
        assert_eq!(texts(whole), vec!["id=12", "id=34"]);
    }

    #[test]
    fn test_validate() {
        assert!(validate(Syntax::Css, "div > a").is_ok());
        assert!(validate(Syntax::Css, "div >>> [").is_err());
        assert!(validate(Syntax::XPath, "//a[").is_err());
        assert!(validate(Syntax::JsonPath, "$.a.b").is_ok());
        assert!(validate(Syntax::Regex, "(").is_err());
    }
}
