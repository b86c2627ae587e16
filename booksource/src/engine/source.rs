use std::collections::HashMap;
use std::path::Path;

use include_dir::{Dir, include_dir};
use serde::{Deserialize, Serialize};

use crate::book::types::{Category, ContentKind};
use crate::error::{RuleError, RuleResult};

use super::paginate::Pagination;
use super::request::RequestConfig;

/// Embedded source definitions.
static SOURCES_DIR: Dir = include_dir!("$CARGO_MANIFEST_DIR/sources");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceKind {
    Novel,
    Comic,
    Audio,
    Video,
}

/**
    One site's rule set: identity, request defaults, and per-module rules.
*/
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub id: String,
    pub name: String,
    pub host: String,
    #[serde(rename = "type")]
    pub kind: SourceKind,
    pub enabled: bool,
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub charset: Option<String>,
    /// Minimum interval between requests to this source, in milliseconds.
    #[serde(default)]
    pub rate_limit: Option<u64>,
    #[serde(default)]
    pub login_url: Option<String>,
    /// Helper functions made available to every script of this source.
    #[serde(default)]
    pub js_lib: Option<String>,
    #[serde(default)]
    pub vars: HashMap<String, String>,
    pub search: SearchRule,
    pub chapter: ChapterRule,
    pub content: ContentRule,
    #[serde(default)]
    pub detail: Option<DetailRule>,
    #[serde(default)]
    pub discover: Option<DiscoverRule>,
}

/// Book field expressions shared by search, discover and detail.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookFields {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub cover: Option<String>,
    #[serde(default, alias = "intro")]
    pub description: Option<String>,
    #[serde(default)]
    pub latest_chapter: Option<String>,
    #[serde(default)]
    pub word_count: Option<String>,
    #[serde(default, alias = "kind")]
    pub tags: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub update_time: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRule {
    pub request: RequestConfig,
    pub list: String,
    #[serde(flatten)]
    pub fields: BookFields,
    #[serde(default)]
    pub pagination: Option<Pagination>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailRule {
    /// Defaults to loading the book URL.
    #[serde(default)]
    pub request: Option<RequestConfig>,
    #[serde(flatten)]
    pub fields: BookFields,
    #[serde(default)]
    pub chapter_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterRule {
    /// Defaults to loading the table-of-contents URL.
    #[serde(default)]
    pub request: Option<RequestConfig>,
    pub list: String,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub time: Option<String>,
    /// The site lists newest first.
    #[serde(default)]
    pub reverse: bool,
    #[serde(default)]
    pub pagination: Option<Pagination>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentRule {
    /// Defaults to loading the chapter URL.
    #[serde(default)]
    pub request: Option<RequestConfig>,
    pub content: String,
    #[serde(default)]
    pub kind: Option<ContentKind>,
    #[serde(default)]
    pub purify: Vec<PurifyRule>,
    #[serde(default)]
    pub pagination: Option<Pagination>,
}

/// Regex replacement applied to each text unit of chapter content.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(from = "RawPurify")]
pub struct PurifyRule {
    pub pattern: String,
    pub replacement: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPurify {
    Pattern(String),
    Rule {
        pattern: String,
        #[serde(default)]
        replacement: String,
    },
}

impl From<RawPurify> for PurifyRule {
    fn from(raw: RawPurify) -> Self {
        match raw {
            RawPurify::Pattern(pattern) => PurifyRule {
                pattern,
                replacement: String::new(),
            },
            RawPurify::Rule {
                pattern,
                replacement,
            } => PurifyRule {
                pattern,
                replacement,
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoverRule {
    pub categories: Categories,
    /// Page request per category. Defaults to loading `{{categoryUrl}}`.
    #[serde(default = "default_category_request")]
    pub request: RequestConfig,
    pub list: String,
    #[serde(flatten)]
    pub fields: BookFields,
    #[serde(default)]
    pub pagination: Option<Pagination>,
}

fn default_category_request() -> RequestConfig {
    RequestConfig::get("{{categoryUrl}}")
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Categories {
    Static(Vec<Category>),
    Dynamic {
        request: RequestConfig,
        list: String,
        name: String,
        url: String,
    },
}

impl Source {
    /**
        Check structural requirements serde cannot express.
    */
    pub fn validate(&self) -> RuleResult<()> {
        let fail = |msg: String| Err(RuleError::invalid_source(msg).with_source_id(&self.id));

        for (label, value) in [("id", &self.id), ("name", &self.name), ("host", &self.host)] {
            if value.trim().is_empty() {
                return fail(format!("`{}` must not be empty", label));
            }
        }

        require_fields("search", &self.search.fields).map_err(|e| e.with_source_id(&self.id))?;
        if let Some(discover) = &self.discover {
            require_fields("discover", &discover.fields)
                .map_err(|e| e.with_source_id(&self.id))?;
        }

        for (label, value) in [
            ("search.list", &self.search.list),
            ("chapter.list", &self.chapter.list),
            ("chapter.name", &self.chapter.name),
            ("chapter.url", &self.chapter.url),
            ("content.content", &self.content.content),
        ] {
            if value.trim().is_empty() {
                return fail(format!("`{}` must not be empty", label));
            }
        }

        Ok(())
    }

    pub fn content_kind(&self) -> ContentKind {
        match (self.content.kind, self.kind) {
            (Some(kind), _) => kind,
            (None, SourceKind::Comic) => ContentKind::Image,
            (None, _) => ContentKind::Text,
        }
    }
}

fn require_fields(module: &str, fields: &BookFields) -> RuleResult<()> {
    for (label, value) in [("name", &fields.name), ("url", &fields.url)] {
        if value.as_deref().is_none_or(|v| v.trim().is_empty()) {
            return Err(RuleError::invalid_source(format!(
                "`{}.{}` is required",
                module, label
            ))
            .with_module(module));
        }
    }
    Ok(())
}

/**
    Parse one source file, choosing JSON or YAML by extension.
*/
pub fn parse_source(path: &Path, content: &str) -> RuleResult<Source> {
    let is_json = path.extension().is_some_and(|e| e == "json");

    let source: Source = if is_json {
        serde_json::from_str(content).map_err(|e| {
            RuleError::invalid_source(format!("failed to parse {:?}: {}", path, e)).with_cause(e)
        })?
    } else {
        serde_yaml::from_str(content).map_err(|e| {
            RuleError::invalid_source(format!("failed to parse {:?}: {}", path, e)).with_cause(e)
        })?
    };

    source.validate()?;
    Ok(source)
}

fn is_source_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "json" || e == "yaml" || e == "yml")
        .unwrap_or(false)
}

/// Load the sources bundled with the binary.
pub fn load_embedded() -> RuleResult<Vec<Source>> {
    let mut sources = Vec::new();

    for file in SOURCES_DIR.files() {
        let path = file.path();
        if !is_source_file(path) {
            continue;
        }

        let content = file.contents_utf8().ok_or_else(|| {
            RuleError::invalid_source(format!("failed to read {:?} as UTF-8", path))
        })?;

        sources.push(parse_source(path, content)?);
    }

    sources.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(sources)
}

/// Load every source file in `dir` (not recursive).
pub fn load_dir(dir: &Path) -> RuleResult<Vec<Source>> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        RuleError::invalid_source(format!("failed to read source directory {:?}", dir)).with_cause(e)
    })?;

    let mut sources = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|e| RuleError::invalid_source("failed to list source directory").with_cause(e))?
            .path();
        if !path.is_file() || !is_source_file(&path) {
            continue;
        }

        let content = std::fs::read_to_string(&path).map_err(|e| {
            RuleError::invalid_source(format!("failed to read {:?}", path)).with_cause(e)
        })?;

        sources.push(parse_source(&path, &content)?);
    }

    sources.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(sources)
}

/// Find a source by ID (exact, then case-insensitive partial match).
pub fn find_by_id<'a>(sources: &'a [Source], id: &str) -> RuleResult<&'a Source> {
    if let Some(source) = sources.iter().find(|s| s.id == id) {
        return Ok(source);
    }

    let id_lower = id.to_lowercase();
    sources
        .iter()
        .find(|s| s.id.to_lowercase().contains(&id_lower))
        .ok_or_else(|| RuleError::invalid_source(format!("source '{}' not found", id)))
}
