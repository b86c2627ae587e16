use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::expr::Mode;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    #[serde(alias = "get")]
    Get,
    #[serde(alias = "post")]
    Post,
}

/**
    How a module's page is requested. Written in source files either as a bare
    URL template or as an object.
*/
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(from = "RawRequest", rename_all = "camelCase")]
pub struct RequestConfig {
    pub url: String,
    pub action: Mode,
    pub method: Method,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
    /// Falls back to the engine's request timeout.
    pub timeout_ms: Option<u64>,
    /// Render the page in the browser before reading it.
    pub web_view: bool,
    /// Script run in the rendered page before its HTML is read.
    pub web_js: Option<String>,
    /// Script run before the request; may rewrite the URL, method, headers or body.
    pub pre_js: Option<String>,
}

impl RequestConfig {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            action: Mode::LoadUrl,
            method: Method::Get,
            headers: HashMap::new(),
            body: None,
            timeout_ms: None,
            web_view: false,
            web_js: None,
            pre_js: None,
        }
    }

    pub fn mode(&self) -> Mode {
        self.action
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawRequest {
    Url(String),
    Full(FullRequest),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FullRequest {
    url: String,
    #[serde(default)]
    action: Option<Mode>,
    #[serde(default)]
    method: Method,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    timeout: Option<u64>,
    #[serde(default)]
    web_view: bool,
    #[serde(default)]
    web_js: Option<String>,
    #[serde(default)]
    pre_js: Option<String>,
}

impl From<RawRequest> for RequestConfig {
    fn from(raw: RawRequest) -> Self {
        match raw {
            RawRequest::Url(url) => RequestConfig::get(url),
            RawRequest::Full(full) => RequestConfig {
                url: full.url,
                action: full.action.unwrap_or(Mode::LoadUrl),
                method: full.method,
                headers: full.headers,
                body: full.body,
                timeout_ms: full.timeout,
                web_view: full.web_view,
                web_js: full.web_js,
                pre_js: full.pre_js,
            },
        }
    }
}

/**
    A request with every template expanded and the URL made absolute,
    ready for a [`Fetcher`](super::fetch::Fetcher).
*/
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRequest {
    pub source_id: String,
    pub url: String,
    pub action: Mode,
    pub method: Method,
    /// Source defaults merged under request headers.
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
    pub timeout_ms: u64,
    pub web_view: bool,
    pub web_js: Option<String>,
    pub charset: Option<String>,
    pub rate_limit_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_from_string() {
        let req: RequestConfig = serde_json::from_str(r#""/search?q={{keyword}}""#).unwrap();
        assert_eq!(req, RequestConfig::get("/search?q={{keyword}}"));
        assert_eq!(req.timeout_ms, None);
    }

    #[test]
    fn test_request_from_object() {
        let req: RequestConfig = serde_json::from_str(
            r#"{
                "url": "/api/search",
                "action": "fetch",
                "method": "post",
                "headers": {"X-Token": "abc"},
                "body": "q={{keyword}}",
                "timeout": 3000,
                "webView": false
            }"#,
        )
        .unwrap();
        assert_eq!(req.mode(), Mode::Fetch);
        assert_eq!(req.method, Method::Post);
        assert_eq!(req.timeout_ms, Some(3000));
        assert_eq!(req.headers.get("X-Token").map(String::as_str), Some("abc"));
    }
}
