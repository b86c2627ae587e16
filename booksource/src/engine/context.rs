use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value, json};

use crate::book::types::{Book, Chapter};

use super::scope::Scope;
use super::source::Source;

/**
    Everything one evaluation can see: the current scope, the page it came
    from, the source, and whatever earlier steps of the same call chain stored.

    A context is created per extraction call chain. Concurrent pages each get
    a clone of the chain's starting state.
*/
#[derive(Debug, Clone)]
pub struct RuleContext {
    pub source: Arc<Source>,
    pub scope: Scope,
    /// Output of the previous step, exposed to scripts and put directives as `result`.
    pub result: Option<Value>,
    pub base_url: String,
    pub book: Option<Book>,
    pub chapter: Option<Chapter>,
    pub keyword: Option<String>,
    pub page: i64,
    pub page_index: usize,
    /// Set while paginating chapter content.
    pub next_chapter_url: Option<String>,
    /// Written by `@put`, read by `{{@get:name}}`.
    pub vars: HashMap<String, String>,
    /// Template parameters such as `bookUrl`, `chapterUrl` or the page parameter.
    pub params: HashMap<String, String>,
}

impl RuleContext {
    pub fn new(source: Arc<Source>) -> Self {
        let base_url = source.host.clone();
        Self {
            source,
            scope: Scope::Text(String::new()),
            result: None,
            base_url,
            book: None,
            chapter: None,
            keyword: None,
            page: 1,
            page_index: 0,
            next_chapter_url: None,
            vars: HashMap::new(),
            params: HashMap::new(),
        }
    }

    pub fn with_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keyword = Some(keyword.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_book(mut self, book: Book) -> Self {
        self.params.insert("bookUrl".to_string(), book.url.clone());
        self.book = Some(book);
        self
    }

    pub fn with_chapter(mut self, chapter: Chapter) -> Self {
        self.params.insert("chapterUrl".to_string(), chapter.url.clone());
        self.chapter = Some(chapter);
        self
    }

    /// Put variables shadow the source's global variables.
    pub fn get_var(&self, name: &str) -> Option<&str> {
        self.vars
            .get(name)
            .or_else(|| self.source.vars.get(name))
            .map(String::as_str)
    }

    /**
        Build the object a script sees. Only these names are visible.
    */
    pub fn script_env(&self) -> Value {
        let mut flow_vars: Map<String, Value> = self
            .source
            .vars
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        for (k, v) in &self.vars {
            flow_vars.insert(k.clone(), Value::String(v.clone()));
        }

        let result = self.result.clone().unwrap_or_else(|| self.scope.to_json());

        json!({
            "source": serde_json::to_value(&*self.source).unwrap_or_default(),
            "book": self.book,
            "chapter": self.chapter,
            "keyword": self.keyword,
            "page": self.page,
            "pageIndex": self.page_index,
            "baseUrl": self.base_url,
            "url": self.base_url,
            "result": result,
            "host": self.source.host,
            "flowVars": Value::Object(flow_vars),
        })
    }
}
