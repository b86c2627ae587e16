//! In-memory fakes for the transport and script seams.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::Value;

use crate::engine::fetch::{FetchResponse, Fetcher};
use crate::engine::request::ResolvedRequest;
use crate::engine::script::{ScriptCall, ScriptRuntime};
use crate::engine::source::{Source, parse_source};
use crate::error::{RuleError, RuleResult};

pub const SOURCE_JSON: &str = r##"{
    "id": "test",
    "name": "Test Books",
    "host": "https://books.example",
    "type": "novel",
    "enabled": true,
    "headers": {"Referer": "https://books.example/"},
    "vars": {"lang": "en"},
    "search": {
        "request": "/search?q={{keyword}}",
        "list": ".result",
        "name": ".title@text",
        "url": "a@href"
    },
    "chapter": {"list": "#toc li", "name": "a@text", "url": "a@href"},
    "content": {"content": "#content p@text"}
}"##;

pub fn source() -> Arc<Source> {
    source_from(SOURCE_JSON)
}

pub fn source_from(json: &str) -> Arc<Source> {
    Arc::new(parse_source(Path::new("test.json"), json).expect("test source should parse"))
}

#[derive(Clone)]
struct FakePage {
    body: String,
    delay: Duration,
}

/**
    Serves canned bodies by exact URL and records every request.
*/
#[derive(Default)]
pub struct FakeFetcher {
    pages: HashMap<String, FakePage>,
    requests: Mutex<Vec<ResolvedRequest>>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(self, url: &str, body: &str) -> Self {
        self.slow_page(url, body, Duration::ZERO)
    }

    pub fn slow_page(mut self, url: &str, body: &str, delay: Duration) -> Self {
        self.pages.insert(
            url.to_string(),
            FakePage {
                body: body.to_string(),
                delay,
            },
        );
        self
    }

    pub fn requests(&self) -> Vec<ResolvedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn urls(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.url).collect()
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn request(&self, request: &ResolvedRequest) -> RuleResult<FetchResponse> {
        self.requests.lock().unwrap().push(request.clone());

        let Some(page) = self.pages.get(&request.url).cloned() else {
            return Err(RuleError::network("HTTP status 404 Not Found").with_url(&request.url));
        };

        if !page.delay.is_zero() {
            tokio::time::sleep(page.delay).await;
        }

        Ok(FetchResponse {
            body: page.body,
            final_url: request.url.clone(),
            status: 200,
        })
    }
}

type ScriptFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

#[derive(Clone)]
enum Behavior {
    Respond(Value),
    Compute(ScriptFn),
    Fail(String),
    Hang,
}

/**
    Answers scripts by exact body and counts calls.
*/
#[derive(Clone, Default)]
pub struct FakeScripts {
    behaviors: HashMap<String, Behavior>,
    calls: Arc<AtomicUsize>,
}

impl FakeScripts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, body: &str, value: Value) -> Self {
        self.behaviors
            .insert(body.to_string(), Behavior::Respond(value));
        self
    }

    pub fn with(mut self, body: &str, f: impl Fn(&Value) -> Value + Send + Sync + 'static) -> Self {
        self.behaviors
            .insert(body.to_string(), Behavior::Compute(Arc::new(f)));
        self
    }

    pub fn fail(mut self, body: &str, message: &str) -> Self {
        self.behaviors
            .insert(body.to_string(), Behavior::Fail(message.to_string()));
        self
    }

    pub fn hang(mut self, body: &str) -> Self {
        self.behaviors.insert(body.to_string(), Behavior::Hang);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScriptRuntime for FakeScripts {
    async fn eval(&self, call: ScriptCall<'_>) -> anyhow::Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        match self.behaviors.get(call.body).cloned() {
            Some(Behavior::Respond(value)) => Ok(value),
            Some(Behavior::Compute(f)) => Ok(f(call.env)),
            Some(Behavior::Fail(message)) => Err(anyhow!(message)),
            Some(Behavior::Hang) => {
                std::future::pending::<()>().await;
                Ok(Value::Null)
            }
            None => Err(anyhow!("no fake script for `{}`", call.body)),
        }
    }
}
