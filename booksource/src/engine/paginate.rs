//! Multi-page extraction: `nextUrl` chains and page-parameter runs.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{RuleError, RuleResult};

use super::context::RuleContext;
use super::eval::RuleEngine;
use super::interpolate::{Target, interpolate};
use super::post::absolutize;
use super::request::{Method, RequestConfig};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PageStrategy {
    #[default]
    Sequential,
    Parallel,
}

/**
    When to stop paginating. Any condition that holds after a page is parsed
    ends the run; that page's items are kept.
*/
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopCondition {
    #[serde(default)]
    pub max_pages: Option<usize>,
    /// Expression whose value, when equal to the previous page's URL, ends the run.
    #[serde(default)]
    pub url_equals: Option<String>,
    #[serde(default)]
    pub empty_result: bool,
    /// Content only: stop before following a link to the next chapter.
    #[serde(default)]
    pub equals_next_chapter: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "RawPagination", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Pagination {
    NextUrl {
        next_url: String,
        stop: StopCondition,
    },
    PageParam {
        name: String,
        start: i64,
        step: i64,
        stop: StopCondition,
        strategy: PageStrategy,
        max_concurrent: Option<usize>,
    },
}

impl Pagination {
    pub fn stop(&self) -> &StopCondition {
        match self {
            Pagination::NextUrl { stop, .. } | Pagination::PageParam { stop, .. } => stop,
        }
    }

    /**
        The same pagination, begun at 1-based `page` instead of the first page.

        Page-parameter runs move `start` forward by whole steps. A `nextUrl`
        chain can only be entered at its first page and is returned as is.
    */
    pub fn from_page(&self, page: i64) -> Pagination {
        match self {
            Pagination::PageParam {
                name,
                start,
                step,
                stop,
                strategy,
                max_concurrent,
            } => Pagination::PageParam {
                name: name.clone(),
                start: start + (page.max(1) - 1) * step,
                step: *step,
                stop: stop.clone(),
                strategy: *strategy,
                max_concurrent: *max_concurrent,
            },
            Pagination::NextUrl { .. } => {
                if page > 1 {
                    tracing::warn!(page, "nextUrl pagination always starts at the first page");
                }
                self.clone()
            }
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPagination {
    #[serde(default)]
    next_url: Option<String>,
    #[serde(default)]
    page_param: Option<RawPageParam>,
    #[serde(default)]
    stop: StopCondition,
    #[serde(default)]
    strategy: Option<PageStrategy>,
    #[serde(default)]
    max_concurrent: Option<usize>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPageParam {
    name: String,
    #[serde(default = "default_one")]
    start: i64,
    #[serde(default = "default_one")]
    step: i64,
    #[serde(default)]
    strategy: Option<PageStrategy>,
    #[serde(default)]
    max_concurrent: Option<usize>,
}

fn default_one() -> i64 {
    1
}

impl TryFrom<RawPagination> for Pagination {
    type Error = String;

    fn try_from(raw: RawPagination) -> Result<Self, Self::Error> {
        match (raw.next_url, raw.page_param) {
            (Some(_), Some(_)) => Err("pagination declares both `nextUrl` and `pageParam`".into()),
            (None, None) => Err("pagination needs `nextUrl` or `pageParam`".into()),
            (Some(next_url), None) => {
                if raw.strategy == Some(PageStrategy::Parallel) {
                    return Err("`nextUrl` pagination cannot be parallel".into());
                }
                if next_url.trim().is_empty() {
                    return Err("`nextUrl` must not be empty".into());
                }
                Ok(Pagination::NextUrl {
                    next_url,
                    stop: raw.stop,
                })
            }
            (None, Some(param)) => {
                if param.step == 0 {
                    return Err("`pageParam.step` must not be zero".into());
                }
                let max_concurrent = param.max_concurrent.or(raw.max_concurrent);
                if max_concurrent == Some(0) {
                    return Err("`maxConcurrent` must be at least 1".into());
                }
                Ok(Pagination::PageParam {
                    name: param.name,
                    start: param.start,
                    step: param.step,
                    stop: raw.stop,
                    strategy: param.strategy.or(raw.strategy).unwrap_or_default(),
                    max_concurrent,
                })
            }
        }
    }
}

/**
    Turns one loaded page (the context's scope) into items.
*/
#[async_trait]
pub trait PageParser: Send + Sync {
    type Item: Send;

    async fn parse_page(
        &self,
        engine: &RuleEngine,
        ctx: &mut RuleContext,
    ) -> RuleResult<Vec<Self::Item>>;
}

struct PageOutcome<T> {
    url: String,
    items: Vec<T>,
    url_equals: Option<String>,
}

fn check_stop<T>(
    stop: &StopCondition,
    outcome: &PageOutcome<T>,
    previous_url: Option<&str>,
) -> Option<&'static str> {
    if stop.empty_result && outcome.items.is_empty() {
        return Some("empty result");
    }
    if let (Some(value), Some(previous)) = (outcome.url_equals.as_deref(), previous_url)
        && value == previous
    {
        return Some("url equals previous page");
    }
    None
}

impl RuleEngine {
    /**
        Load and parse the first page of `request`, then follow `pagination`
        until a stop condition holds. Items come back in page order.
    */
    pub async fn paginate<P: PageParser>(
        &self,
        request: &RequestConfig,
        pagination: Option<&Pagination>,
        ctx: &mut RuleContext,
        parser: &P,
    ) -> RuleResult<Vec<P::Item>> {
        if let Some(paged) = pagination
            && let Pagination::PageParam {
                strategy: PageStrategy::Parallel,
                max_concurrent,
                ..
            } = paged
        {
            let window = max_concurrent.unwrap_or(self.config().max_concurrent).max(1);
            return self
                .paginate_parallel(request, paged, window, ctx, parser)
                .await;
        }

        self.paginate_sequential(request, pagination, ctx, parser).await
    }

    fn page_limit(&self, pagination: Option<&Pagination>) -> usize {
        let Some(pagination) = pagination else {
            return 1;
        };
        pagination
            .stop()
            .max_pages
            .unwrap_or(usize::MAX)
            .min(self.config().max_pages)
    }

    fn enter_page(pagination: Option<&Pagination>, index: usize, ctx: &mut RuleContext) {
        match pagination {
            Some(Pagination::PageParam {
                name, start, step, ..
            }) => {
                let page = start + index as i64 * step;
                ctx.page = page;
                ctx.page_index = index;
                ctx.params.insert(name.clone(), page.to_string());
            }
            Some(Pagination::NextUrl { .. }) => {
                ctx.page = index as i64 + 1;
                ctx.page_index = index;
            }
            None => {}
        }
    }

    fn page_url(
        request: &RequestConfig,
        pagination: &Pagination,
        index: usize,
        ctx: &RuleContext,
    ) -> RuleResult<String> {
        let mut peek = ctx.clone();
        Self::enter_page(Some(pagination), index, &mut peek);
        let url = interpolate(&request.url, &peek, Target::Url)?;
        Ok(absolutize(&ctx.base_url, &url))
    }

    async fn run_page<P: PageParser>(
        &self,
        request: &RequestConfig,
        stop: &StopCondition,
        ctx: &mut RuleContext,
        parser: &P,
    ) -> RuleResult<PageOutcome<P::Item>> {
        let page = ctx.page;
        let source_id = ctx.source.id.clone();

        let work = async {
            let url = self.load_page(request, ctx).await?;
            let items = parser.parse_page(self, ctx).await?;

            let url_equals = match &stop.url_equals {
                Some(expr) => self
                    .eval_string(expr, request.mode(), ctx)
                    .await?
                    .map(|value| absolutize(&ctx.base_url, &value)),
                None => None,
            };

            tracing::debug!(source = %ctx.source.id, page, url = %url, items = items.len(), "page parsed");

            Ok::<_, RuleError>(PageOutcome {
                url,
                items,
                url_equals,
            })
        };

        match tokio::time::timeout(self.config().page_timeout, work).await {
            Ok(outcome) => outcome,
            Err(_) => Err(RuleError::network(format!(
                "page {} timed out after {}ms",
                page,
                self.config().page_timeout.as_millis()
            ))
            .with_source_id(source_id)),
        }
    }

    async fn paginate_sequential<P: PageParser>(
        &self,
        request: &RequestConfig,
        pagination: Option<&Pagination>,
        ctx: &mut RuleContext,
        parser: &P,
    ) -> RuleResult<Vec<P::Item>> {
        let default_stop = StopCondition::default();
        let stop = pagination.map(Pagination::stop).unwrap_or(&default_stop);
        let limit = self.page_limit(pagination);

        let mut items = Vec::new();
        let mut visited = HashSet::new();
        let mut previous_url: Option<String> = None;
        let mut page_request = request.clone();

        for index in 0.. {
            Self::enter_page(pagination, index, ctx);

            let outcome = self.run_page(&page_request, stop, ctx, parser).await?;
            let halt = check_stop(stop, &outcome, previous_url.as_deref());
            visited.insert(outcome.url.clone());
            items.extend(outcome.items);

            if let Some(reason) = halt {
                tracing::debug!(source = %ctx.source.id, page = ctx.page, reason, "pagination stopped");
                break;
            }
            if index + 1 >= limit {
                if pagination.is_some() && limit == self.config().max_pages {
                    tracing::warn!(source = %ctx.source.id, limit, "pagination hit the page cap");
                }
                break;
            }

            let next_url = match pagination {
                None => break,
                Some(Pagination::NextUrl { next_url, .. }) => {
                    match self.eval_string(next_url, request.mode(), ctx).await? {
                        Some(next) => absolutize(&ctx.base_url, &next),
                        None => break,
                    }
                }
                Some(paged @ Pagination::PageParam { .. }) if stop.equals_next_chapter => {
                    Self::page_url(request, paged, index + 1, ctx)?
                }
                Some(Pagination::PageParam { .. }) => String::new(),
            };

            if stop.equals_next_chapter
                && !next_url.is_empty()
                && ctx.next_chapter_url.as_deref() == Some(next_url.as_str())
            {
                tracing::debug!(source = %ctx.source.id, url = %next_url, "next page is the next chapter");
                break;
            }

            if let Some(Pagination::NextUrl { .. }) = pagination {
                if visited.contains(&next_url) {
                    tracing::warn!(source = %ctx.source.id, url = %next_url, "pagination revisited a page");
                    break;
                }
                page_request = RequestConfig {
                    url: next_url,
                    method: Method::Get,
                    body: None,
                    pre_js: None,
                    ..request.clone()
                };
            }

            previous_url = Some(outcome.url);
        }

        Ok(items)
    }

    /**
        Run page-parameter pages through a sliding window of `window` in-flight
        fetches. Finished pages wait in slots until every earlier page has been
        drained, so items keep page order. A stop on page k cancels the rest.
        With `equalsNextChapter`, no page at or past the next chapter's URL is
        started.
    */
    async fn paginate_parallel<P: PageParser>(
        &self,
        request: &RequestConfig,
        pagination: &Pagination,
        window: usize,
        ctx: &mut RuleContext,
        parser: &P,
    ) -> RuleResult<Vec<P::Item>> {
        let stop = pagination.stop();
        let mut limit = self.page_limit(Some(pagination));
        let seed = ctx.clone();
        let root = CancellationToken::new();

        let mut in_flight = FuturesUnordered::new();
        let mut slots: BTreeMap<usize, RuleResult<PageOutcome<P::Item>>> = BTreeMap::new();
        let mut tokens: BTreeMap<usize, CancellationToken> = BTreeMap::new();
        let mut next_index = 0;
        let mut drain_index = 0;
        let mut previous_url: Option<String> = None;
        let mut items = Vec::new();

        loop {
            while in_flight.len() < window && next_index < limit {
                let index = next_index;
                if index > 0
                    && stop.equals_next_chapter
                    && let Some(next_chapter) = seed.next_chapter_url.as_deref()
                    && Self::page_url(request, pagination, index, &seed)? == next_chapter
                {
                    tracing::debug!(source = %seed.source.id, url = next_chapter, "next page is the next chapter");
                    limit = index;
                    break;
                }
                next_index += 1;

                let token = root.child_token();
                tokens.insert(index, token.clone());

                let mut page_ctx = seed.clone();
                Self::enter_page(Some(pagination), index, &mut page_ctx);

                in_flight.push(async move {
                    let outcome = tokio::select! {
                        _ = token.cancelled() => Err(RuleError::unknown(format!("page {} cancelled", index))),
                        outcome = self.run_page(request, stop, &mut page_ctx, parser) => outcome,
                    };
                    (index, outcome)
                });
            }

            let Some((index, outcome)) = in_flight.next().await else {
                break;
            };
            slots.insert(index, outcome);

            while let Some(outcome) = slots.remove(&drain_index) {
                tokens.remove(&drain_index);
                drain_index += 1;

                let outcome = match outcome {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        root.cancel();
                        return Err(e);
                    }
                };

                let halt = check_stop(stop, &outcome, previous_url.as_deref());
                previous_url = Some(outcome.url);
                items.extend(outcome.items);

                if let Some(reason) = halt {
                    for token in tokens.values() {
                        token.cancel();
                    }
                    tracing::debug!(
                        source = %seed.source.id,
                        page = drain_index,
                        reason,
                        discarded = slots.len() + in_flight.len(),
                        "pagination stopped"
                    );
                    return Ok(items);
                }
            }
        }

        if limit == self.config().max_pages && drain_index == limit {
            tracing::warn!(source = %seed.source.id, limit, "pagination hit the page cap");
        }

        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::engine::config::EngineConfig;
    use crate::engine::expr::Mode;
    use crate::error::ErrorKind;
    use crate::testing::{self, FakeFetcher};

    /// Collects `li` texts from a page.
    struct Items;

    #[async_trait]
    impl PageParser for Items {
        type Item = String;

        async fn parse_page(
            &self,
            engine: &RuleEngine,
            ctx: &mut RuleContext,
        ) -> RuleResult<Vec<String>> {
            engine.eval_strings("li@text", Mode::LoadUrl, ctx).await
        }
    }

    fn list_page(items: &[&str], next: Option<&str>) -> String {
        let lis: String = items.iter().map(|i| format!("<li>{}</li>", i)).collect();
        let next = next
            .map(|n| format!("<a class=\"next\" href=\"{}\">next</a>", n))
            .unwrap_or_default();
        format!("<html><body><ul>{}</ul>{}</body></html>", lis, next)
    }

    fn pagination(json: &str) -> Pagination {
        serde_json::from_str(json).unwrap()
    }

    async fn run(
        fetcher: Arc<FakeFetcher>,
        pagination: Option<&Pagination>,
    ) -> RuleResult<Vec<String>> {
        let engine = RuleEngine::new(fetcher, EngineConfig::default());
        let mut ctx = RuleContext::new(testing::source());
        let request = RequestConfig::get("/list?p={{page}}");
        engine.paginate(&request, pagination, &mut ctx, &Items).await
    }

    fn numbered_site(pages: usize) -> FakeFetcher {
        let mut fetcher = FakeFetcher::new();
        for p in 1..=pages {
            fetcher = fetcher.page(
                &format!("https://books.example/list?p={}", p),
                &list_page(&[&format!("item{}", p)], None),
            );
        }
        fetcher
    }

    #[test]
    fn test_pagination_validation() {
        assert!(serde_json::from_str::<Pagination>(r#"{"nextUrl": "a.next@href"}"#).is_ok());
        assert!(
            serde_json::from_str::<Pagination>(
                r#"{"nextUrl": "a@href", "pageParam": {"name": "p"}}"#
            )
            .is_err()
        );
        assert!(serde_json::from_str::<Pagination>(r#"{"stop": {"maxPages": 2}}"#).is_err());
        assert!(
            serde_json::from_str::<Pagination>(r#"{"nextUrl": "a@href", "strategy": "parallel"}"#)
                .is_err()
        );
        assert!(
            serde_json::from_str::<Pagination>(
                r#"{"pageParam": {"name": "p", "maxConcurrent": 0}}"#
            )
            .is_err()
        );
    }

    #[tokio::test]
    async fn test_without_pagination_loads_one_page() {
        let fetcher = Arc::new(numbered_site(3));
        let items = run(fetcher.clone(), None).await.unwrap();
        assert_eq!(items, vec!["item1"]);
        assert_eq!(fetcher.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_page_param_max_pages() {
        let fetcher = Arc::new(numbered_site(10));
        let p = pagination(r#"{"pageParam": {"name": "p"}, "stop": {"maxPages": 3}}"#);
        let items = run(fetcher.clone(), Some(&p)).await.unwrap();
        assert_eq!(items, vec!["item1", "item2", "item3"]);
        assert_eq!(fetcher.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_parallel_max_pages_fetches_exactly() {
        let fetcher = Arc::new(numbered_site(10));
        let p = pagination(
            r#"{"pageParam": {"name": "p", "strategy": "parallel", "maxConcurrent": 2}, "stop": {"maxPages": 3}}"#,
        );
        let items = run(fetcher.clone(), Some(&p)).await.unwrap();
        assert_eq!(items, vec!["item1", "item2", "item3"]);
        assert_eq!(fetcher.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_empty_result_halts() {
        let fetcher = Arc::new(
            numbered_site(2)
                .page("https://books.example/list?p=3", &list_page(&[], None))
                .page("https://books.example/list?p=4", &list_page(&["item4"], None)),
        );
        let p = pagination(r#"{"pageParam": {"name": "p"}, "stop": {"emptyResult": true}}"#);
        let items = run(fetcher.clone(), Some(&p)).await.unwrap();
        assert_eq!(items, vec!["item1", "item2"]);
        assert_eq!(fetcher.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_page_param_start_and_step() {
        let fetcher = Arc::new(
            FakeFetcher::new()
                .page("https://books.example/list?p=0", &list_page(&["a"], None))
                .page("https://books.example/list?p=20", &list_page(&["b"], None)),
        );
        let engine = RuleEngine::new(fetcher.clone(), EngineConfig::default());
        let mut ctx = RuleContext::new(testing::source());
        let request = RequestConfig::get("/list?p={{offset}}");
        let p = pagination(
            r#"{"pageParam": {"name": "offset", "start": 0, "step": 20}, "stop": {"maxPages": 2}}"#,
        );

        let items = engine.paginate(&request, Some(&p), &mut ctx, &Items).await.unwrap();
        assert_eq!(items, vec!["a", "b"]);
        assert_eq!(ctx.page_index, 1);
    }

    #[tokio::test]
    async fn test_next_url_chain() {
        let fetcher = Arc::new(
            FakeFetcher::new()
                .page("https://books.example/list?p=1", &list_page(&["a"], Some("/more/2")))
                .page("https://books.example/more/2", &list_page(&["b"], Some("/more/3")))
                .page("https://books.example/more/3", &list_page(&["c"], None)),
        );
        let p = pagination(r#"{"nextUrl": "a.next@href"}"#);
        let items = run(fetcher.clone(), Some(&p)).await.unwrap();
        assert_eq!(items, vec!["a", "b", "c"]);
        assert_eq!(
            fetcher.urls(),
            vec![
                "https://books.example/list?p=1",
                "https://books.example/more/2",
                "https://books.example/more/3",
            ]
        );
    }

    #[tokio::test]
    async fn test_next_url_cycle_halts() {
        let fetcher = Arc::new(
            FakeFetcher::new()
                .page("https://books.example/list?p=1", &list_page(&["a"], Some("/more/2")))
                .page("https://books.example/more/2", &list_page(&["b"], Some("/list?p=1"))),
        );
        let p = pagination(r#"{"nextUrl": "a.next@href"}"#);
        let items = run(fetcher.clone(), Some(&p)).await.unwrap();
        assert_eq!(items, vec!["a", "b"]);
        assert_eq!(fetcher.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_equals_next_chapter_stops_before_fetching() {
        let fetcher = Arc::new(
            FakeFetcher::new()
                .page("https://books.example/list?p=1", &list_page(&["a"], Some("/c/2"))),
        );
        let engine = RuleEngine::new(fetcher.clone(), EngineConfig::default());
        let mut ctx = RuleContext::new(testing::source());
        ctx.next_chapter_url = Some("https://books.example/c/2".to_string());
        let request = RequestConfig::get("/list?p={{page}}");
        let p = pagination(r#"{"nextUrl": "a.next@href", "stop": {"equalsNextChapter": true}}"#);

        let items = engine.paginate(&request, Some(&p), &mut ctx, &Items).await.unwrap();
        assert_eq!(items, vec!["a"]);
        assert_eq!(fetcher.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_url_equals_previous_page() {
        let fetcher = Arc::new(
            FakeFetcher::new()
                .page(
                    "https://books.example/list?p=1",
                    &list_page(&["a"], Some("/list?p=1")),
                )
                .page(
                    "https://books.example/list?p=2",
                    &list_page(&["b"], Some("/list?p=1")),
                )
                .page(
                    "https://books.example/list?p=3",
                    &list_page(&["c"], Some("/list?p=2")),
                ),
        );
        let p = pagination(r#"{"pageParam": {"name": "p"}, "stop": {"urlEquals": "a.next@href"}}"#);
        let items = run(fetcher.clone(), Some(&p)).await.unwrap();
        assert_eq!(items, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_parallel_keeps_page_order() {
        let mut fetcher = FakeFetcher::new();
        for p in 1..=4u64 {
            fetcher = fetcher.slow_page(
                &format!("https://books.example/list?p={}", p),
                &list_page(&[&format!("item{}", p)], None),
                Duration::from_millis(40 - p * 10),
            );
        }
        let p = pagination(
            r#"{"pageParam": {"name": "p", "strategy": "parallel", "maxConcurrent": 4}, "stop": {"maxPages": 4}}"#,
        );
        let items = run(Arc::new(fetcher), Some(&p)).await.unwrap();
        assert_eq!(items, vec!["item1", "item2", "item3", "item4"]);
    }

    #[tokio::test]
    async fn test_parallel_stop_discards_later_pages() {
        let fetcher = Arc::new(
            FakeFetcher::new()
                .slow_page(
                    "https://books.example/list?p=1",
                    &list_page(&["item1"], None),
                    Duration::from_millis(30),
                )
                .page("https://books.example/list?p=2", &list_page(&[], None))
                .page("https://books.example/list?p=3", &list_page(&["item3"], None))
                .page("https://books.example/list?p=4", &list_page(&["item4"], None)),
        );
        let p = pagination(
            r#"{"pageParam": {"name": "p", "strategy": "parallel", "maxConcurrent": 3}, "stop": {"emptyResult": true, "maxPages": 4}}"#,
        );
        let items = run(fetcher.clone(), Some(&p)).await.unwrap();
        assert_eq!(items, vec!["item1"]);
    }

    #[tokio::test]
    async fn test_equals_next_chapter_bounds_page_param_runs() {
        for strategy in ["sequential", "parallel"] {
            let fetcher = Arc::new(numbered_site(4));
            let engine = RuleEngine::new(fetcher.clone(), EngineConfig::default());
            let mut ctx = RuleContext::new(testing::source());
            ctx.next_chapter_url = Some("https://books.example/list?p=3".to_string());
            let request = RequestConfig::get("/list?p={{page}}");
            let p = pagination(&format!(
                r#"{{"pageParam": {{"name": "p", "strategy": "{}", "maxConcurrent": 4}}, "stop": {{"equalsNextChapter": true, "maxPages": 4}}}}"#,
                strategy
            ));

            let items = engine.paginate(&request, Some(&p), &mut ctx, &Items).await.unwrap();
            assert_eq!(items, vec!["item1", "item2"], "{}", strategy);
            assert_eq!(fetcher.requests().len(), 2, "{}", strategy);
        }
    }

    /// Reports the `seen` variable as it was on arrival, then overwrites it.
    struct Remember;

    #[async_trait]
    impl PageParser for Remember {
        type Item = String;

        async fn parse_page(
            &self,
            engine: &RuleEngine,
            ctx: &mut RuleContext,
        ) -> RuleResult<Vec<String>> {
            let before = ctx.get_var("seen").unwrap_or("-").to_string();
            engine
                .eval_string("li@text @put:{seen: li@text}", Mode::LoadUrl, ctx)
                .await?;
            Ok(vec![before])
        }
    }

    #[tokio::test]
    async fn test_parallel_pages_get_their_own_vars() {
        let engine = RuleEngine::new(Arc::new(numbered_site(3)), EngineConfig::default());
        let mut ctx = RuleContext::new(testing::source());
        ctx.vars.insert("seen".to_string(), "start".to_string());
        let request = RequestConfig::get("/list?p={{page}}");
        let p = pagination(
            r#"{"pageParam": {"name": "p", "strategy": "parallel", "maxConcurrent": 1}, "stop": {"maxPages": 3}}"#,
        );

        let seen = engine.paginate(&request, Some(&p), &mut ctx, &Remember).await.unwrap();
        assert_eq!(seen, vec!["start", "start", "start"]);
        assert_eq!(ctx.vars.get("seen").map(String::as_str), Some("start"));
    }

    #[tokio::test]
    async fn test_sequential_pages_share_vars() {
        let engine = RuleEngine::new(Arc::new(numbered_site(3)), EngineConfig::default());
        let mut ctx = RuleContext::new(testing::source());
        let request = RequestConfig::get("/list?p={{page}}");
        let p = pagination(r#"{"pageParam": {"name": "p"}, "stop": {"maxPages": 3}}"#);

        let seen = engine.paginate(&request, Some(&p), &mut ctx, &Remember).await.unwrap();
        assert_eq!(seen, vec!["-", "item1", "item2"]);
        assert_eq!(ctx.vars.get("seen").map(String::as_str), Some("item3"));
    }

    #[test]
    fn test_from_page_moves_start() {
        let p = pagination(r#"{"pageParam": {"name": "offset", "start": 0, "step": 20}}"#);
        let Pagination::PageParam { start, .. } = p.from_page(3) else {
            panic!("expected pageParam");
        };
        assert_eq!(start, 40);

        let p = pagination(r#"{"nextUrl": "a.next@href"}"#);
        assert_eq!(p.from_page(3), p);
    }

    #[tokio::test]
    async fn test_page_error_surfaces() {
        let fetcher = Arc::new(numbered_site(1));
        let p = pagination(r#"{"pageParam": {"name": "p"}, "stop": {"maxPages": 3}}"#);
        let err = run(fetcher, Some(&p)).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Network);
        assert_eq!(err.context.url.as_deref(), Some("https://books.example/list?p=2"));
    }

    #[tokio::test]
    async fn test_page_timeout() {
        let fetcher = Arc::new(FakeFetcher::new().slow_page(
            "https://books.example/list?p=1",
            &list_page(&["a"], None),
            Duration::from_secs(5),
        ));
        let config = EngineConfig {
            page_timeout: Duration::from_millis(20),
            ..EngineConfig::default()
        };
        let engine = RuleEngine::new(fetcher, config);
        let mut ctx = RuleContext::new(testing::source());
        let request = RequestConfig::get("/list?p={{page}}");
        let p = pagination(r#"{"pageParam": {"name": "p"}}"#);

        let err = engine.paginate(&request, Some(&p), &mut ctx, &Items).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Network);
        assert!(err.message.contains("timed out"));
    }
}
