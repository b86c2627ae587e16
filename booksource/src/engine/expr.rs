//! Parsing of rule expressions into evaluation plans.
//!
//! An expression reads left to right as
//! `[prefix]body[@attr][slice][##pattern##replacement]`, optionally joined
//! with one combinator kind (`||`, `&&`, `%%`) per nesting level, and
//! optionally followed by `@put:{key:expr}` directives.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{RuleError, RuleResult};

use super::select;

/// Whether the page an expression runs against came from a rendered page load
/// or a raw `fetch`. Only `LoadUrl` pages may be queried with CSS or XPath.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Mode {
    LoadUrl,
    Fetch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syntax {
    Css,
    XPath,
    JsonPath,
    Regex,
    Script,
}

impl fmt::Display for Syntax {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Syntax::Css => "CSS",
            Syntax::XPath => "XPath",
            Syntax::JsonPath => "JSONPath",
            Syntax::Regex => "Regex",
            Syntax::Script => "Script",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combinator {
    Or,
    And,
    Zip,
}

impl Combinator {
    pub fn token(self) -> &'static str {
        match self {
            Combinator::Or => "||",
            Combinator::And => "&&",
            Combinator::Zip => "%%",
        }
    }

    fn from_bytes(pair: &[u8]) -> Option<Self> {
        match pair {
            b"||" => Some(Combinator::Or),
            b"&&" => Some(Combinator::And),
            b"%%" => Some(Combinator::Zip),
            _ => None,
        }
    }
}

/**
    Index or slice over an ordered sequence, with Python slice semantics.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceSpec {
    Index(i64),
    Range {
        start: Option<i64>,
        end: Option<i64>,
        step: i64,
    },
}

impl SliceSpec {
    pub fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        let len = items.len() as i64;
        match *self {
            SliceSpec::Index(index) => {
                let index = if index < 0 { index + len } else { index };
                if index < 0 || index >= len {
                    return Vec::new();
                }
                items.into_iter().nth(index as usize).into_iter().collect()
            }
            SliceSpec::Range { start, end, step } => {
                let (lower, upper) = if step > 0 { (0, len) } else { (-1, len - 1) };
                let clamp = |bound: i64| {
                    if bound < 0 {
                        (bound + len).max(lower)
                    } else {
                        bound.min(upper)
                    }
                };
                let start = start.map(clamp).unwrap_or(if step > 0 { lower } else { upper });
                let end = end.map(clamp).unwrap_or(if step > 0 { upper } else { lower });

                let mut picked = Vec::new();
                let mut i = start;
                while (step > 0 && i < end) || (step < 0 && i > end) {
                    picked.push(i as usize);
                    match i.checked_add(step) {
                        Some(next) => i = next,
                        None => break,
                    }
                }

                let mut slots: Vec<Option<T>> = items.into_iter().map(Some).collect();
                picked
                    .into_iter()
                    .filter_map(|i| slots.get_mut(i).and_then(Option::take))
                    .collect()
            }
        }
    }
}

/// `##pattern##replacement` applied to each matched string.
#[derive(Debug, Clone)]
pub struct Replace {
    pub pattern: Regex,
    pub replacement: String,
}

impl Replace {
    pub fn apply(&self, value: &str) -> String {
        self.pattern
            .replace_all(value, self.replacement.as_str())
            .into_owned()
    }
}

#[derive(Debug, Clone)]
pub struct Leaf {
    pub syntax: Syntax,
    pub body: String,
    pub attr: Option<String>,
    pub slice: Option<SliceSpec>,
    pub replace: Option<Replace>,
}

#[derive(Debug, Clone)]
pub enum EvalPlan {
    Leaf(Leaf),
    Combinator {
        op: Combinator,
        children: Vec<EvalPlan>,
    },
}

/// A stored side effect: evaluate `expr` against the main result and keep it as `key`.
#[derive(Debug, Clone)]
pub struct PutDirective {
    pub key: String,
    pub expr: Expr,
}

/**
    A parsed rule expression.
*/
#[derive(Debug, Clone)]
pub struct Expr {
    pub raw: String,
    pub mode: Mode,
    pub plan: EvalPlan,
    pub puts: Vec<PutDirective>,
}

/**
    Parse a rule expression for the given page mode.
*/
pub fn parse(raw: &str, mode: Mode) -> RuleResult<Expr> {
    parse_expr(raw, mode).map_err(|e| e.with_expr(raw))
}

fn parse_expr(raw: &str, mode: Mode) -> RuleResult<Expr> {
    let (main, puts) = split_puts(raw)?;
    if main.trim().is_empty() {
        return Err(RuleError::parse("empty expression"));
    }

    let plan = parse_plan(main, mode)?;

    let puts = puts
        .into_iter()
        .map(|(key, sub)| {
            Ok(PutDirective {
                key,
                expr: parse_expr(&sub, mode)?,
            })
        })
        .collect::<RuleResult<Vec<_>>>()?;

    Ok(Expr {
        raw: raw.to_string(),
        mode,
        plan,
        puts,
    })
}

// ── Put directives ───────────────────────────────────────────────────────────

fn split_puts(raw: &str) -> RuleResult<(&str, Vec<(String, String)>)> {
    let mut rest = raw.trim_end();
    let mut blocks = Vec::new();

    while rest.ends_with('}') {
        let Some(open) = matching_open(rest, b'{', b'}') else {
            break;
        };
        let Some(head) = rest[..open].strip_suffix("@put:") else {
            break;
        };
        blocks.push(&rest[open + 1..rest.len() - 1]);
        rest = head.trim_end();
    }

    let mut directives = Vec::new();
    for block in blocks.into_iter().rev() {
        directives.extend(parse_put_block(block)?);
    }

    Ok((rest, directives))
}

fn parse_put_block(block: &str) -> RuleResult<Vec<(String, String)>> {
    let block = block.trim();

    if block.starts_with('"') {
        let map: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(&format!("{{{}}}", block))
                .map_err(|e| RuleError::parse(format!("invalid @put block `{}`: {}", block, e)))?;
        return map
            .into_iter()
            .map(|(key, value)| match value {
                serde_json::Value::String(expr) => Ok((key, expr)),
                other => Err(RuleError::parse(format!(
                    "@put value for `{}` must be a string, got {}",
                    key, other
                ))),
            })
            .collect();
    }

    put_pairs(block)
        .into_iter()
        .map(|pair| {
            let (key, expr) = pair.split_once(':').ok_or_else(|| {
                RuleError::parse(format!("@put entry `{}` is not `key:expr`", pair))
            })?;
            let (key, expr) = (key.trim(), expr.trim());
            if key.is_empty() || expr.is_empty() {
                return Err(RuleError::parse(format!(
                    "@put entry `{}` needs both a key and an expression",
                    pair
                )));
            }
            Ok((key.to_string(), expr.to_string()))
        })
        .collect()
}

/// Split at top-level commas that start a new `key:` entry, so selector lists stay intact.
fn put_pairs(block: &str) -> Vec<&str> {
    let bytes = block.as_bytes();
    let mut pairs = Vec::new();
    let mut start = 0;
    let mut depth = 0i32;
    let mut quote: Option<u8> = None;

    for (i, &b) in bytes.iter().enumerate() {
        if let Some(q) = quote {
            if b == q {
                quote = None;
            }
            continue;
        }
        match b {
            b'\'' | b'"' => quote = Some(b),
            b'[' | b'(' | b'{' => depth += 1,
            b']' | b')' | b'}' => depth -= 1,
            b',' if depth == 0 && put_key_regex().is_match(&block[i + 1..]) => {
                pairs.push(&block[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    pairs.push(&block[start..]);
    pairs
}

fn put_key_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*[A-Za-z_][A-Za-z0-9_]*\s*:(?:[^A-Za-z]|$)")
            .expect("put key regex should compile")
    })
}

/// Byte index of the opener matching the closer at the end of `s`.
fn matching_open(s: &str, open: u8, close: u8) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut depth = 0usize;
    for i in (0..bytes.len()).rev() {
        let escaped = i > 0 && bytes[i - 1] == b'\\';
        if escaped {
            continue;
        }
        if bytes[i] == close {
            depth += 1;
        } else if bytes[i] == open {
            depth = depth.checked_sub(1)?;
            if depth == 0 {
                return Some(i);
            }
        }
    }
    None
}

// ── Combinators ──────────────────────────────────────────────────────────────

fn parse_plan(text: &str, mode: Mode) -> RuleResult<EvalPlan> {
    let (segments, op) = split_combinators(text)?;

    let Some(op) = op else {
        return parse_segment(text, mode);
    };

    let children = segments
        .into_iter()
        .map(|segment| {
            if segment.trim().is_empty() {
                return Err(RuleError::parse(format!(
                    "empty operand around `{}` in `{}`",
                    op.token(),
                    text
                )));
            }
            parse_segment(segment, mode)
        })
        .collect::<RuleResult<Vec<_>>>()?;

    Ok(EvalPlan::Combinator { op, children })
}

/// A segment is a leaf, or a parenthesised group opening a new nesting level.
fn parse_segment(segment: &str, mode: Mode) -> RuleResult<EvalPlan> {
    let trimmed = segment.trim();

    if trimmed.starts_with('(')
        && trimmed.ends_with(')')
        && matching_open(trimmed, b'(', b')') == Some(0)
    {
        let inner = &trimmed[1..trimmed.len() - 1];
        let (_, op) = split_combinators(inner)?;
        if op.is_some() {
            return parse_plan(inner, mode);
        }
    }

    parse_leaf(trimmed, mode).map(EvalPlan::Leaf)
}

/**
    Split `text` at top-level combinators.

    Brackets, parentheses, braces, quoted strings inside them, the pattern part
    of `##pattern##replacement`, and everything after an `@js:` prefix are
    opaque. Returns the segments and the single operator joining them.
*/
fn split_combinators(text: &str) -> RuleResult<(Vec<&str>, Option<Combinator>)> {
    let bytes = text.as_bytes();
    let mut segments = Vec::new();
    let mut op: Option<Combinator> = None;
    let mut seg_start = 0;
    let mut depth = 0i32;
    let mut quote: Option<u8> = None;
    let mut in_pattern = false;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];

        if b == b'\\' {
            i += 2;
            continue;
        }

        if let Some(q) = quote {
            if b == q {
                quote = None;
            }
            i += 1;
            continue;
        }

        if b == b'@'
            && depth == 0
            && !in_pattern
            && bytes[i..].starts_with(b"@js:")
            && text[seg_start..i].trim().is_empty()
        {
            break;
        }

        let pair = bytes.get(i..i + 2);

        if depth == 0 && pair == Some(b"##".as_slice()) {
            in_pattern = !in_pattern;
            i += 2;
            continue;
        }

        if in_pattern {
            i += 1;
            continue;
        }

        match b {
            b'[' | b'(' | b'{' => depth += 1,
            b']' | b')' | b'}' => depth -= 1,
            b'\'' | b'"' if depth > 0 => quote = Some(b),
            _ => {}
        }

        if depth == 0
            && let Some(found) = pair.and_then(Combinator::from_bytes)
        {
            match op {
                Some(existing) if existing != found => {
                    return Err(RuleError::parse(format!(
                        "mixed combinators `{}` and `{}` at one level in `{}`; group with parentheses",
                        existing.token(),
                        found.token(),
                        text
                    )));
                }
                _ => op = Some(found),
            }
            segments.push(&text[seg_start..i]);
            i += 2;
            seg_start = i;
            // Lookahead resets for the next operand.
            in_pattern = false;
            continue;
        }

        i += 1;
    }

    segments.push(&text[seg_start..]);
    Ok((segments, op))
}

// ── Leaves ───────────────────────────────────────────────────────────────────

fn parse_leaf(segment: &str, mode: Mode) -> RuleResult<Leaf> {
    let (syntax, rest) = classify(segment);

    if matches!(syntax, Syntax::Css | Syntax::XPath) && mode == Mode::Fetch {
        return Err(RuleError::parse(format!(
            "{} selector `{}` is not allowed for fetch requests",
            syntax, segment
        )));
    }

    if syntax == Syntax::Script {
        let body = rest.trim();
        if body.is_empty() {
            return Err(RuleError::parse("empty @js: body"));
        }
        return Ok(Leaf {
            syntax,
            body: body.to_string(),
            attr: None,
            slice: None,
            replace: None,
        });
    }

    let (rest, replace) = split_replace(rest)?;

    let (rest, slice, attr) = match syntax {
        Syntax::Css | Syntax::XPath => {
            let (rest, slice) = split_slice(rest, syntax)?;
            let (rest, attr) = split_attr(rest, syntax);
            (rest, slice, attr)
        }
        // Matched arrays are flattened, so a trailing index applies to the
        // match sequence the same way it would inside the path.
        Syntax::JsonPath => {
            let (rest, slice) = split_slice(rest, syntax)?;
            (rest, slice, None)
        }
        _ => (rest, None, None),
    };

    let mut body = rest.trim().to_string();
    if syntax == Syntax::JsonPath && !body.starts_with('$') {
        body = format!("$.{}", body);
    }

    if body.is_empty() && attr.is_none() && syntax != Syntax::Css {
        return Err(RuleError::parse(format!(
            "empty {} selector in `{}`",
            syntax, segment
        )));
    }

    if !body.contains("{{") {
        select::validate(syntax, &body)?;
    }

    Ok(Leaf {
        syntax,
        body,
        attr,
        slice,
        replace,
    })
}

fn classify(segment: &str) -> (Syntax, &str) {
    const PREFIXES: [(&str, Syntax); 5] = [
        ("@js:", Syntax::Script),
        ("@regex:", Syntax::Regex),
        ("@json:", Syntax::JsonPath),
        ("@xpath:", Syntax::XPath),
        ("@css:", Syntax::Css),
    ];

    for (prefix, syntax) in PREFIXES {
        if let Some(rest) = segment.strip_prefix(prefix) {
            return (syntax, rest);
        }
    }

    if segment.starts_with("$.") || segment.starts_with("$[") {
        return (Syntax::JsonPath, segment);
    }
    if segment.starts_with("//") {
        return (Syntax::XPath, segment);
    }

    (Syntax::Css, segment)
}

fn split_replace(text: &str) -> RuleResult<(&str, Option<Replace>)> {
    let Some(first) = find_top_level(text, "##") else {
        return Ok((text, None));
    };

    let tail = &text[first + 2..];
    let (pattern, replacement) = match tail.find("##") {
        Some(second) => (&tail[..second], &tail[second + 2..]),
        None => (tail, ""),
    };

    if pattern.is_empty() {
        return Err(RuleError::parse(format!(
            "empty replace pattern in `{}`",
            text
        )));
    }

    let pattern = Regex::new(pattern).map_err(|e| {
        RuleError::parse(format!("invalid replace pattern `{}`: {}", pattern, e)).with_cause(e)
    })?;

    Ok((
        &text[..first],
        Some(Replace {
            pattern,
            replacement: replacement.to_string(),
        }),
    ))
}

fn find_top_level(text: &str, needle: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0i32;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                i += 2;
                continue;
            }
            b'[' | b'(' => depth += 1,
            b']' | b')' => depth -= 1,
            _ => {}
        }
        if depth == 0 && bytes[i..].starts_with(needle.as_bytes()) {
            return Some(i);
        }
        i += 1;
    }
    None
}

fn split_slice(text: &str, syntax: Syntax) -> RuleResult<(&str, Option<SliceSpec>)> {
    let trimmed = text.trim_end();
    if !trimmed.ends_with(']') {
        return Ok((text, None));
    }
    let Some(open) = matching_open(trimmed, b'[', b']') else {
        return Ok((text, None));
    };

    let inner = &trimmed[open + 1..trimmed.len() - 1];
    let Some(spec) = parse_slice(inner)? else {
        return Ok((text, None));
    };

    // `//li[2]` is an XPath positional predicate, not an engine index.
    if syntax == Syntax::XPath && matches!(spec, SliceSpec::Index(i) if i >= 0) {
        return Ok((text, None));
    }

    Ok((&trimmed[..open], Some(spec)))
}

/// `None` when `inner` is not slice syntax at all (e.g. a CSS attribute selector).
fn parse_slice(inner: &str) -> RuleResult<Option<SliceSpec>> {
    let parts: Vec<&str> = inner.split(':').map(str::trim).collect();
    if parts.len() > 3 || parts.iter().all(|p| p.is_empty()) {
        return Ok(None);
    }

    let mut numbers = Vec::with_capacity(parts.len());
    for part in &parts {
        if part.is_empty() {
            numbers.push(None);
        } else {
            match part.parse::<i64>() {
                Ok(n) => numbers.push(Some(n)),
                Err(_) => return Ok(None),
            }
        }
    }

    if numbers.len() == 1 {
        return Ok(numbers[0].map(SliceSpec::Index));
    }

    let step = numbers.get(2).copied().flatten().unwrap_or(1);
    if step == 0 {
        return Err(RuleError::parse(format!("slice step cannot be zero in `[{}]`", inner)));
    }

    Ok(Some(SliceSpec::Range {
        start: numbers[0],
        end: numbers[1],
        step,
    }))
}

fn split_attr(text: &str, syntax: Syntax) -> (&str, Option<String>) {
    let trimmed = text.trim_end();
    let Some(at) = trimmed.rfind('@') else {
        return (text, None);
    };

    let name = &trimmed[at + 1..];
    let valid = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | ':' | '.'));
    if !valid {
        return (text, None);
    }

    let head = &trimmed[..at];
    if syntax == Syntax::XPath && (head.ends_with('/') || head.ends_with('[')) {
        return (text, None);
    }

    (head, Some(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(plan: &EvalPlan) -> &Leaf {
        match plan {
            EvalPlan::Leaf(leaf) => leaf,
            other => panic!("expected leaf, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_prefixes() {
        let cases = [
            ("div.title", Syntax::Css, "div.title"),
            ("@css:div.title", Syntax::Css, "div.title"),
            ("//div[@id='x']", Syntax::XPath, "//div[@id='x']"),
            ("@xpath://a", Syntax::XPath, "//a"),
            ("$.data.name", Syntax::JsonPath, "$.data.name"),
            ("$[0].name", Syntax::JsonPath, "$[0].name"),
            ("@json:data.name", Syntax::JsonPath, "$.data.name"),
            ("@regex:id=(\\d+)", Syntax::Regex, "id=(\\d+)"),
            ("@js:result.trim()", Syntax::Script, "result.trim()"),
        ];

        for (raw, syntax, body) in cases {
            let expr = parse(raw, Mode::LoadUrl).unwrap();
            let leaf = leaf(&expr.plan);
            assert_eq!(leaf.syntax, syntax, "{}", raw);
            assert_eq!(leaf.body, body, "{}", raw);
        }
    }

    #[test]
    fn test_suffixes_bind_in_order() {
        let expr = parse(".list a@href[1:3]##\\?.*$##", Mode::LoadUrl).unwrap();
        let leaf = leaf(&expr.plan);
        assert_eq!(leaf.body, ".list a");
        assert_eq!(leaf.attr.as_deref(), Some("href"));
        assert_eq!(
            leaf.slice,
            Some(SliceSpec::Range {
                start: Some(1),
                end: Some(3),
                step: 1
            })
        );
        let replace = leaf.replace.as_ref().unwrap();
        assert_eq!(replace.apply("/book/1?from=list"), "/book/1");
    }

    #[test]
    fn test_css_attribute_selector_is_not_a_slice() {
        let expr = parse("a[href]@href", Mode::LoadUrl).unwrap();
        let leaf = leaf(&expr.plan);
        assert_eq!(leaf.body, "a[href]");
        assert_eq!(leaf.slice, None);
    }

    #[test]
    fn test_xpath_keeps_predicates_and_attribute_steps() {
        let expr = parse("//ul/li[1]/a/@href", Mode::LoadUrl).unwrap();
        let step = leaf(&expr.plan);
        assert_eq!(step.body, "//ul/li[1]/a/@href");
        assert_eq!(step.attr, None);
        assert_eq!(step.slice, None);

        let expr = parse("//li/a@href[-1]", Mode::LoadUrl).unwrap();
        let leaf = leaf(&expr.plan);
        assert_eq!(leaf.body, "//li/a");
        assert_eq!(leaf.attr.as_deref(), Some("href"));
        assert_eq!(leaf.slice, Some(SliceSpec::Index(-1)));
    }

    #[test]
    fn test_slice_semantics() {
        let items = vec![0, 1, 2, 3, 4];
        assert_eq!(SliceSpec::Index(-1).apply(items.clone()), vec![4]);
        assert_eq!(SliceSpec::Index(4).apply(items.clone()), vec![4]);
        assert_eq!(SliceSpec::Index(9).apply(items.clone()), Vec::<i32>::new());
        assert_eq!(
            SliceSpec::Range { start: None, end: None, step: 2 }.apply(items.clone()),
            vec![0, 2, 4]
        );
        assert_eq!(
            SliceSpec::Range { start: None, end: None, step: -1 }.apply(items.clone()),
            vec![4, 3, 2, 1, 0]
        );
        assert_eq!(
            SliceSpec::Range { start: Some(-2), end: None, step: 1 }.apply(items.clone()),
            vec![3, 4]
        );
        assert_eq!(
            SliceSpec::Range { start: Some(10), end: Some(20), step: 1 }.apply(items),
            Vec::<i32>::new()
        );
    }

    #[test]
    fn test_huge_step_stops_without_overflow() {
        let expr = parse(&format!("li@text[1::{}]", i64::MAX), Mode::LoadUrl).unwrap();
        let slice = leaf(&expr.plan).slice.unwrap();
        assert_eq!(slice.apply(vec![0, 1, 2]), vec![1]);

        let back = SliceSpec::Range { start: Some(2), end: None, step: i64::MIN };
        assert_eq!(back.apply(vec![0, 1, 2]), vec![2]);
    }

    #[test]
    fn test_json_path_trailing_slice_is_split() {
        let expr = parse("$.list[*].n[-1]", Mode::Fetch).unwrap();
        let step = leaf(&expr.plan);
        assert_eq!(step.body, "$.list[*].n");
        assert_eq!(step.slice, Some(SliceSpec::Index(-1)));

        let expr = parse("@json:items[1:3]", Mode::Fetch).unwrap();
        let step = leaf(&expr.plan);
        assert_eq!(step.body, "$.items");
        assert_eq!(
            step.slice,
            Some(SliceSpec::Range { start: Some(1), end: Some(3), step: 1 })
        );

        let expr = parse("$.list[*]", Mode::Fetch).unwrap();
        let step = leaf(&expr.plan);
        assert_eq!(step.body, "$.list[*]");
        assert_eq!(step.slice, None);
    }

    #[test]
    fn test_zero_step_is_rejected() {
        let err = parse("li[::0]", Mode::LoadUrl).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Parse);
    }

    #[test]
    fn test_combinators() {
        let expr = parse(".a@text || .b@text || .c@text", Mode::LoadUrl).unwrap();
        match &expr.plan {
            EvalPlan::Combinator { op, children } => {
                assert_eq!(*op, Combinator::Or);
                assert_eq!(children.len(), 3);
            }
            other => panic!("expected combinator, got {:?}", other),
        }
    }

    #[test]
    fn test_mixed_combinators_rejected() {
        let err = parse("a||b&&c", Mode::LoadUrl).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Parse);
        assert!(err.message.contains("mixed combinators"));
        assert_eq!(err.context.expr.as_deref(), Some("a||b&&c"));
    }

    #[test]
    fn test_grouping_opens_a_new_level() {
        let expr = parse("(.a||.b)&&.c", Mode::LoadUrl).unwrap();
        let EvalPlan::Combinator { op, children } = &expr.plan else {
            panic!("expected combinator");
        };
        assert_eq!(*op, Combinator::And);
        assert!(matches!(
            &children[0],
            EvalPlan::Combinator {
                op: Combinator::Or,
                ..
            }
        ));
    }

    #[test]
    fn test_operators_inside_opaque_regions_do_not_split() {
        let expr = parse("a[title='x||y']@title", Mode::LoadUrl).unwrap();
        assert!(matches!(expr.plan, EvalPlan::Leaf(_)));

        let expr = parse(".name##a||b##", Mode::LoadUrl).unwrap();
        assert!(matches!(expr.plan, EvalPlan::Leaf(_)));

        let expr = parse("@js:result || 'none'", Mode::Fetch).unwrap();
        let leaf = leaf(&expr.plan);
        assert_eq!(leaf.body, "result || 'none'");
    }

    #[test]
    fn test_replacement_then_combinator() {
        let expr = parse(".a##x##y||.b", Mode::LoadUrl).unwrap();
        let EvalPlan::Combinator { op, children } = &expr.plan else {
            panic!("expected combinator");
        };
        assert_eq!(*op, Combinator::Or);
        assert_eq!(children.len(), 2);
        assert_eq!(leaf(&children[0]).replace.as_ref().unwrap().replacement, "y");
    }

    #[test]
    fn test_fetch_mode_rejects_dom_selectors() {
        assert!(parse("div.title", Mode::Fetch).is_err());
        assert!(parse("//div", Mode::Fetch).is_err());
        assert!(parse("$.title", Mode::Fetch).is_ok());
        assert!(parse("@regex:title=(\\w+)", Mode::Fetch).is_ok());
    }

    #[test]
    fn test_put_directives() {
        let expr = parse(".title@text @put:{bid: .id@text} @put:{tag: .tag@text}", Mode::LoadUrl)
            .unwrap();
        assert_eq!(leaf(&expr.plan).body, ".title");
        assert_eq!(expr.puts.len(), 2);
        assert_eq!(expr.puts[0].key, "bid");
        assert_eq!(expr.puts[1].key, "tag");
        assert_eq!(leaf(&expr.puts[0].expr.plan).body, ".id");
    }

    #[test]
    fn test_put_block_with_several_entries() {
        let expr = parse(".title @put:{bid: .id@text, tags: .a, .b}", Mode::LoadUrl).unwrap();
        assert_eq!(expr.puts.len(), 2);
        assert_eq!(expr.puts[1].key, "tags");
        assert_eq!(expr.puts[1].expr.raw, ".a, .b");
    }

    #[test]
    fn test_put_json_block() {
        let expr = parse(r#"$.name @put:{"bid":"$.id","cat":"$.category"}"#, Mode::Fetch).unwrap();
        let keys: Vec<_> = expr.puts.iter().map(|p| p.key.as_str()).collect();
        assert!(keys.contains(&"bid"));
        assert!(keys.contains(&"cat"));
    }

    #[test]
    fn test_parsing_is_deterministic() {
        let raw = ".a@href[::2]##x##y||$.b";
        let first = format!("{:?}", parse(raw, Mode::LoadUrl).unwrap().plan);
        let second = format!("{:?}", parse(raw, Mode::LoadUrl).unwrap().plan);
        assert_eq!(first, second);
    }

    #[test]
    fn test_invalid_selector_fails_at_parse_time() {
        assert!(parse("div[", Mode::LoadUrl).is_err());
        assert!(parse("@regex:(unclosed", Mode::Fetch).is_err());
    }
}
