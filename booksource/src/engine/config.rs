use std::time::Duration;

/**
    Engine-wide limits and transport settings.
*/
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Fallback for requests; a request's own `timeout` wins.
    pub request_timeout: Duration,
    pub script_timeout: Duration,
    /// Budget for one fetch-and-parse cycle during pagination.
    pub page_timeout: Duration,
    /// Hard cap on pages per pagination run, whatever the source declares.
    pub max_pages: usize,
    /// In-flight pages for parallel pagination when the source sets no limit.
    pub max_concurrent: usize,
    pub user_agent: Option<String>,
    pub proxy: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(15),
            script_timeout: Duration::from_secs(10),
            page_timeout: Duration::from_secs(60),
            max_pages: 200,
            max_concurrent: 4,
            user_agent: None,
            proxy: None,
        }
    }
}
