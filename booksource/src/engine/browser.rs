//! Headless Chrome: rendered page fetches and the `@js:` runtime.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrome_browser::{ChromeBrowser, ChromeBrowserTab, ChromeLaunchOptions};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::{RuleError, RuleResult};

use super::fetch::{FetchResponse, Fetcher, HttpFetcher};
use super::request::{Method, ResolvedRequest};
use super::script::{ScriptCall, ScriptRuntime};

const BLANK_PAGE: &str = "about:blank";

#[derive(Debug, Clone, Default)]
pub struct BrowserOptions {
    pub headless: bool,
    pub proxy: Option<String>,
}

struct Launched {
    browser: ChromeBrowser,
    tab: ChromeBrowserTab,
}

/**
    One lazily launched browser with a single tab.

    Callers take turns on the tab; a navigation and the reads that follow it
    happen under one lock so they see the same page.
*/
pub struct BrowserSession {
    options: BrowserOptions,
    state: Mutex<Option<Launched>>,
}

impl BrowserSession {
    pub fn new(options: BrowserOptions) -> Self {
        Self {
            options,
            state: Mutex::new(None),
        }
    }

    async fn launch(&self) -> RuleResult<Launched> {
        let mut options = ChromeLaunchOptions::default()
            .headless(self.options.headless)
            .devtools(false)
            .enable_gpu(self.options.headless);

        if let Some(ref proxy) = self.options.proxy {
            options = options.proxy_server(proxy);
        }

        tracing::info!(headless = self.options.headless, "launching browser");

        let browser = ChromeBrowser::new(options)
            .await
            .map_err(|e| browser_error("failed to launch browser", anyhow::Error::from(e)))?;
        let tab = browser
            .get_tab(0)
            .await
            .ok_or_else(|| RuleError::unknown("no browser tab available"))?;

        Ok(Launched { browser, tab })
    }

    /// Render `url`, run `web_js` in it if given, and return the page's HTML.
    pub async fn render(&self, url: &str, web_js: Option<&str>) -> RuleResult<String> {
        let mut state = self.state.lock().await;
        if state.is_none() {
            *state = Some(self.launch().await?);
        }
        let Some(launched) = state.as_ref() else {
            return Err(RuleError::unknown("browser is not running"));
        };
        let tab = &launched.tab;

        tab.navigate(url).await.map_err(|e| {
            browser_error("navigation failed", anyhow::Error::from(e)).with_url(url)
        })?;

        if let Some(script) = web_js {
            tab.eval_json(script.to_string(), true).await.map_err(|e| {
                browser_error("webJs failed", anyhow::Error::from(e)).with_url(url)
            })?;
        }

        let html = tab
            .eval_json("document.documentElement.outerHTML", false)
            .await
            .map_err(|e| browser_error("failed to read page", anyhow::Error::from(e)).with_url(url))?;

        Ok(match html {
            Value::String(s) => s,
            other => other.to_string(),
        })
    }

    /// Evaluate `script` in a blank page loaded for this call alone.
    async fn eval(&self, script: String) -> anyhow::Result<Value> {
        let mut state = self.state.lock().await;
        if state.is_none() {
            *state = Some(self.launch().await?);
        }
        let Some(launched) = state.as_ref() else {
            anyhow::bail!("browser is not running");
        };
        launched.tab.navigate(BLANK_PAGE).await?;
        Ok(launched.tab.eval_json(script, true).await?)
    }

    pub async fn close(&self) {
        if let Some(launched) = self.state.lock().await.take() {
            let _ = launched.tab.navigate(BLANK_PAGE).await;
            let _ = launched.browser.close().await;
            tracing::debug!("browser closed");
        }
    }
}

fn browser_error(message: &str, e: anyhow::Error) -> RuleError {
    RuleError::network(format!("{}: {}", message, e)).with_cause(e)
}

/**
    Sends `webView` requests through the browser and everything else over
    plain HTTP.
*/
pub struct BrowserFetcher {
    http: HttpFetcher,
    session: Arc<BrowserSession>,
}

impl BrowserFetcher {
    pub fn new(http: HttpFetcher, session: Arc<BrowserSession>) -> Self {
        Self { http, session }
    }
}

#[async_trait]
impl Fetcher for BrowserFetcher {
    async fn request(&self, request: &ResolvedRequest) -> RuleResult<FetchResponse> {
        if !request.web_view {
            return self.http.request(request).await;
        }

        if request.method == Method::Post {
            tracing::warn!(url = %request.url, "webView request ignores POST method and body");
        }

        tracing::debug!(source = %request.source_id, url = %request.url, "rendering");

        let timeout = Duration::from_millis(request.timeout_ms);
        let body = tokio::time::timeout(
            timeout,
            self.session.render(&request.url, request.web_js.as_deref()),
        )
        .await
        .map_err(|_| {
            RuleError::network(format!("render timed out after {}ms", request.timeout_ms))
                .with_url(&request.url)
        })??;

        Ok(FetchResponse {
            body,
            final_url: request.url.clone(),
            status: 200,
        })
    }
}

/**
    Evaluates `@js:` bodies in the browser's script engine.

    Each call reloads a blank page first, so nothing a script leaves on the
    global object is visible to the next one and no rendered site is in
    reach.
*/
pub struct BrowserScriptRuntime {
    session: Arc<BrowserSession>,
}

impl BrowserScriptRuntime {
    pub fn new(session: Arc<BrowserSession>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl ScriptRuntime for BrowserScriptRuntime {
    async fn eval(&self, call: ScriptCall<'_>) -> anyhow::Result<Value> {
        self.session.eval(call.to_javascript()).await
    }
}
