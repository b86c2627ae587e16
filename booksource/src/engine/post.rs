//! Post-processing of selector matches: attribute pick, slice, regex replace,
//! and URL absolutization.

use url::Url;

use super::expr::Leaf;
use super::html;
use super::scope::Matched;

/**
    Apply a leaf's suffixes to its raw matches, in attribute, slice, replace order.
*/
pub fn apply(leaf: &Leaf, matches: Vec<Matched>) -> Vec<Matched> {
    let matches = match &leaf.attr {
        Some(attr) => pick_attribute(matches, attr),
        None => matches,
    };

    let matches = match &leaf.slice {
        Some(slice) => slice.apply(matches),
        None => matches,
    };

    match &leaf.replace {
        Some(replace) => matches
            .into_iter()
            .map(|m| Matched::Text(replace.apply(&m.into_string())))
            .collect(),
        None => matches,
    }
}

/**
    Replace each element match with the requested attribute.

    JSON and text matches pass through untouched. Elements lacking a named
    attribute are dropped; `textNodes` may turn one element into several matches.
*/
pub fn pick_attribute(matches: Vec<Matched>, attr: &str) -> Vec<Matched> {
    let mut picked = Vec::with_capacity(matches.len());

    for m in matches {
        let markup = match m {
            Matched::Element(markup) => markup,
            other => {
                picked.push(other);
                continue;
            }
        };

        let values = html::with_element(&markup, |el| match attr {
            "text" => vec![html::text(el)],
            "ownText" => vec![html::own_text(el)],
            "html" => vec![el.inner_html()],
            "outerHtml" => vec![el.html()],
            "textNodes" => html::text_nodes(el),
            name => el.value().attr(name).map(str::to_string).into_iter().collect(),
        })
        .unwrap_or_default();

        picked.extend(values.into_iter().map(Matched::Text));
    }

    picked
}

/**
    Resolve `href` against `base`.

    Absolute URLs pass through, protocol-relative URLs take the base scheme,
    and resolving an already resolved URL is a no-op. Blank input stays blank
    and an unparseable base leaves `href` unchanged.
*/
pub fn absolutize(base: &str, href: &str) -> String {
    let href = href.trim();
    if href.is_empty() || href.starts_with("data:") || href.starts_with("javascript:") {
        return href.to_string();
    }

    if let Ok(absolute) = Url::parse(href) {
        return absolute.to_string();
    }

    match Url::parse(base).and_then(|base| base.join(href)) {
        Ok(resolved) => resolved.to_string(),
        Err(_) => href.to_string(),
    }
}
