//! HTML helpers shared by the selector back-ends.

use std::collections::HashSet;

use scraper::{ElementRef, Html, Node, Selector};
use sxd_document::dom::{ChildOfElement, Element as XmlElement};

const SKIPPED_FOR_XPATH: [&str; 3] = ["script", "style", "noscript"];

const VOID_TAGS: [&str; 14] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/**
    Parse the outer HTML of a single element and hand the element to `f`.

    Table parts and options are wrapped in the parents the HTML parser
    requires, otherwise they would be dropped when parsed as a fragment.
*/
pub fn with_element<R>(markup: &str, f: impl FnOnce(ElementRef<'_>) -> R) -> Option<R> {
    let tag = leading_tag(markup)?;

    if matches!(tag.as_str(), "html" | "head" | "body") {
        let document = Html::parse_document(markup);
        let selector = Selector::parse(&tag).ok()?;
        let element = document.select(&selector).next()?;
        return Some(f(element));
    }

    let (open, close, depth) = match tag.as_str() {
        "tr" => ("<table><tbody>", "</tbody></table>", 2),
        "td" | "th" => ("<table><tbody><tr>", "</tr></tbody></table>", 3),
        "tbody" | "thead" | "tfoot" | "caption" | "colgroup" => ("<table>", "</table>", 1),
        "option" | "optgroup" => ("<select>", "</select>", 1),
        _ => ("", "", 0),
    };

    let fragment = Html::parse_fragment(&format!("{}{}{}", open, markup, close));
    let mut element = fragment.root_element();
    for _ in 0..=depth {
        element = element.children().find_map(ElementRef::wrap)?;
    }
    Some(f(element))
}

fn leading_tag(markup: &str) -> Option<String> {
    let rest = markup.trim_start().strip_prefix('<')?;
    let name: String = rest
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect();
    (!name.is_empty()).then(|| name.to_ascii_lowercase())
}

/// Trimmed text content of an element given as outer HTML.
pub fn element_text(markup: &str) -> Option<String> {
    with_element(markup, text)
}

pub fn text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// Text of direct child text nodes only.
pub fn own_text(element: ElementRef<'_>) -> String {
    element
        .children()
        .filter_map(|child| child.value().as_text().map(|t| t.to_string()))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Each non-blank direct child text node, trimmed.
pub fn text_nodes(element: ElementRef<'_>) -> Vec<String> {
    element
        .children()
        .filter_map(|child| child.value().as_text())
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

// ── XPath bridge ─────────────────────────────────────────────────────────────

/**
    Render an element subtree as well-formed XML for the XPath engine.

    Script and style bodies are dropped, names are sanitized to valid XML
    names without namespace prefixes, and duplicate attributes are removed.
*/
pub fn to_xml(element: ElementRef<'_>) -> String {
    let mut out = String::new();
    write_xml(element, &mut out);
    out
}

fn write_xml(element: ElementRef<'_>, out: &mut String) {
    let name = xml_name(element.value().name());
    out.push('<');
    out.push_str(&name);

    let mut seen = HashSet::new();
    for (attr, value) in element.value().attrs() {
        if attr.starts_with("xmlns") {
            continue;
        }
        let attr = xml_name(attr);
        if !seen.insert(attr.clone()) {
            continue;
        }
        out.push_str(&format!(" {}=\"{}\"", attr, escape(value, true)));
    }
    out.push('>');

    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(&escape(text, false)),
            Node::Element(inner) if SKIPPED_FOR_XPATH.contains(&inner.name()) => {}
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    write_xml(child, out);
                }
            }
            _ => {}
        }
    }

    out.push_str(&format!("</{}>", name));
}

fn xml_name(name: &str) -> String {
    let mut out: String = name
        .to_ascii_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if !out.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
        out.insert(0, '_');
    }
    out
}

fn escape(text: &str, attribute: bool) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            '\t' | '\n' | '\r' => out.push(c),
            c if c < ' ' || c == '\u{FFFE}' || c == '\u{FFFF}' => {}
            c => out.push(c),
        }
    }
    out
}

/// Serialize an XPath element result back to HTML so it can scope further selectors.
pub fn xml_to_html(element: XmlElement<'_>) -> String {
    let mut out = String::new();
    write_html(element, &mut out);
    out
}

fn write_html(element: XmlElement<'_>, out: &mut String) {
    let name = element.name().local_part();
    out.push('<');
    out.push_str(name);
    for attr in element.attributes() {
        out.push_str(&format!(
            " {}=\"{}\"",
            attr.name().local_part(),
            escape(attr.value(), true)
        ));
    }

    let children = element.children();
    if children.is_empty() && VOID_TAGS.contains(&name) {
        out.push_str("/>");
        return;
    }
    out.push('>');

    for child in children {
        match child {
            ChildOfElement::Element(inner) => write_html(inner, out),
            ChildOfElement::Text(text) => out.push_str(&escape(text.text(), false)),
            _ => {}
        }
    }

    out.push_str(&format!("</{}>", name));
}
