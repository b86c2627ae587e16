use std::sync::Arc;

use serde_json::Value;

use super::expr::Mode;
use super::html;

/**
    The node an expression is evaluated against.

    HTML is kept as markup and parsed on demand, so scopes are cheap to clone
    and safe to carry across await points.
*/
#[derive(Debug, Clone, PartialEq)]
pub enum Scope {
    /// A full HTML document.
    Document(Arc<str>),
    /// A single element, as its outer HTML.
    Element(Arc<str>),
    Json(Value),
    Text(String),
}

impl Scope {
    /**
        Build the root scope for a fetched response body.

        Rendered pages are always HTML. Raw fetches are JSON when the body
        parses as JSON, plain text otherwise.
    */
    pub fn from_response(body: &str, mode: Mode) -> Self {
        match mode {
            Mode::LoadUrl => Scope::Document(Arc::from(body)),
            Mode::Fetch => match serde_json::from_str::<Value>(body) {
                Ok(json) => Scope::Json(json),
                Err(_) => Scope::Text(body.to_string()),
            },
        }
    }

    /// Markup or text to run a regex over.
    pub fn as_text(&self) -> String {
        match self {
            Scope::Document(html) | Scope::Element(html) => html.to_string(),
            Scope::Json(Value::String(s)) => s.clone(),
            Scope::Json(json) => json.to_string(),
            Scope::Text(text) => text.clone(),
        }
    }

    /// Value exposed to scripts as `source`.
    pub fn to_json(&self) -> Value {
        match self {
            Scope::Document(html) | Scope::Element(html) => Value::String(html.to_string()),
            Scope::Json(json) => json.clone(),
            Scope::Text(text) => Value::String(text.clone()),
        }
    }

    /// HTML for DOM selectors. JSON strings and plain text are treated as markup.
    pub(crate) fn as_markup(&self) -> Option<(&str, bool)> {
        match self {
            Scope::Document(html) => Some((html, true)),
            Scope::Element(html) => Some((html, false)),
            Scope::Json(Value::String(s)) => Some((s, true)),
            Scope::Text(text) => Some((text, true)),
            Scope::Json(_) => None,
        }
    }
}

/**
    One unit produced by a selector.
*/
#[derive(Debug, Clone, PartialEq)]
pub enum Matched {
    /// Outer HTML of a matched element.
    Element(Arc<str>),
    Json(Value),
    Text(String),
}

impl Matched {
    pub fn into_scope(self) -> Scope {
        match self {
            Matched::Element(html) => Scope::Element(html),
            Matched::Json(json) => Scope::Json(json),
            Matched::Text(text) => Scope::Text(text),
        }
    }

    /// Elements stringify as their trimmed text, JSON strings unquoted.
    pub fn into_string(self) -> String {
        match self {
            Matched::Element(markup) => html::element_text(&markup).unwrap_or_default(),
            Matched::Json(Value::String(s)) => s,
            Matched::Json(Value::Null) => String::new(),
            Matched::Json(json) => json.to_string(),
            Matched::Text(text) => text,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Matched::Element(markup) => Value::String(markup.to_string()),
            Matched::Json(json) => json.clone(),
            Matched::Text(text) => Value::String(text.clone()),
        }
    }

    pub(crate) fn from_json(value: Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::String(s) => Some(Matched::Text(s)),
            other => Some(Matched::Json(other)),
        }
    }
}
