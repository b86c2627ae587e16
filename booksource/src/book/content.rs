use std::sync::Arc;

use async_trait::async_trait;

use crate::engine::context::RuleContext;
use crate::engine::eval::RuleEngine;
use crate::engine::expr::Mode;
use crate::engine::paginate::PageParser;
use crate::engine::post::absolutize;
use crate::engine::request::RequestConfig;
use crate::engine::source::Source;
use crate::error::{RuleError, RuleResult};

use super::fields::{pagination_exprs, precompile};
use super::purify::Purifier;
use super::types::{Book, Chapter, Content, ContentKind};

struct ContentPage<'a> {
    content: &'a str,
    kind: ContentKind,
    mode: Mode,
}

#[async_trait]
impl PageParser for ContentPage<'_> {
    type Item = String;

    async fn parse_page(&self, engine: &RuleEngine, ctx: &mut RuleContext) -> RuleResult<Vec<String>> {
        let units = engine
            .eval_strings(self.content, self.mode, ctx)
            .await
            .map_err(|e| e.with_field("content.content"))?;

        // Image URLs resolve against the page they were found on.
        Ok(match self.kind {
            ContentKind::Text => units,
            ContentKind::Image => units
                .into_iter()
                .map(|unit| absolutize(&ctx.base_url, &unit))
                .collect(),
        })
    }
}

/**
    Load one chapter's body.

    `next_chapter_url` lets an `equalsNextChapter` stop end pagination before
    it walks into the following chapter.
*/
pub async fn chapter_content(
    engine: &RuleEngine,
    source: Arc<Source>,
    book: Option<&Book>,
    chapter: &Chapter,
    next_chapter_url: Option<&str>,
) -> RuleResult<Content> {
    let rule = &source.content;
    let request = rule
        .request
        .clone()
        .unwrap_or_else(|| RequestConfig::get("{{chapterUrl}}"));
    let mode = request.mode();
    let kind = source.content_kind();
    let source_id = source.id.clone();

    precompile(
        engine,
        mode,
        "content",
        std::iter::once(rule.content.as_str()).chain(pagination_exprs(rule.pagination.as_ref())),
    )
    .map_err(|e| e.with_source_id(&source_id))?;

    let purifier = match kind {
        ContentKind::Text => Some(
            Purifier::compile(&rule.purify)
                .map_err(|e| e.with_module("content").with_source_id(&source_id))?,
        ),
        ContentKind::Image => None,
    };

    let mut ctx = RuleContext::new(source.clone());
    if let Some(book) = book {
        ctx = ctx.with_book(book.clone());
    }
    ctx = ctx.with_chapter(chapter.clone());
    ctx.next_chapter_url = next_chapter_url.map(str::to_string);

    let parser = ContentPage {
        content: &rule.content,
        kind,
        mode,
    };

    let units = engine
        .paginate(&request, rule.pagination.as_ref(), &mut ctx, &parser)
        .await
        .map_err(|e| e.with_module("content").with_source_id(&source_id))?;

    let units = match purifier {
        Some(purifier) => purifier.apply(units),
        None => units.into_iter().filter(|u| !u.trim().is_empty()).collect(),
    };

    if units.is_empty() {
        return Err(RuleError::parse("chapter content is empty")
            .with_field("content.content")
            .with_module("content")
            .with_source_id(&source_id)
            .with_url(&chapter.url));
    }

    tracing::info!(source = %source_id, chapter = %chapter.name, units = units.len(), "content loaded");

    Ok(Content {
        chapter_url: chapter.url.clone(),
        kind,
        units,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::EngineConfig;
    use crate::error::ErrorKind;
    use crate::testing::{self, FakeFetcher};

    fn chapter(url: &str) -> Chapter {
        Chapter {
            name: "One".to_string(),
            url: url.to_string(),
            time: None,
            index: 0,
        }
    }

    const PAGED: &str = r##"{
        "id": "paged",
        "name": "Paged",
        "host": "https://books.example",
        "type": "novel",
        "enabled": true,
        "search": {"request": "/s?q={{keyword}}", "list": ".r", "name": "h3@text", "url": "a@href"},
        "chapter": {"list": "#toc li", "name": "a@text", "url": "a@href"},
        "content": {
            "content": "#content p@text",
            "purify": ["(?i)read more at \\S+", {"pattern": "teh", "replacement": "the"}],
            "pagination": {"nextUrl": "a.next@href", "stop": {"equalsNextChapter": true}}
        }
    }"##;

    fn page(paragraphs: &[&str], next: &str) -> String {
        let ps: String = paragraphs.iter().map(|p| format!("<p>{}</p>", p)).collect();
        format!(
            r#"<html><body><div id="content">{}</div><a class="next" href="{}">next</a></body></html>"#,
            ps, next
        )
    }

    #[tokio::test]
    async fn test_content_purified_across_pages() {
        let fetcher = Arc::new(
            FakeFetcher::new()
                .page(
                    "https://books.example/c/1",
                    &page(&["teh start.", "Read more at books.example"], "/c/1_2"),
                )
                .page("https://books.example/c/1_2", &page(&["The end."], "/c/2")),
        );
        let engine = RuleEngine::new(fetcher.clone(), EngineConfig::default());

        let content = chapter_content(
            &engine,
            testing::source_from(PAGED),
            None,
            &chapter("https://books.example/c/1"),
            Some("https://books.example/c/2"),
        )
        .await
        .unwrap();

        assert_eq!(content.kind, ContentKind::Text);
        assert_eq!(content.units, vec!["the start.", "The end."]);
        assert_eq!(fetcher.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_image_content_absolutized() {
        let json = r##"{
            "id": "comic",
            "name": "Comic",
            "host": "https://comics.example",
            "type": "comic",
            "enabled": true,
            "search": {"request": "/s?q={{keyword}}", "list": ".r", "name": "h3@text", "url": "a@href"},
            "chapter": {"list": "#toc li", "name": "a@text", "url": "a@href"},
            "content": {"content": ".pages img@src", "purify": ["\\d"]}
        }"##;
        let fetcher = Arc::new(FakeFetcher::new().page(
            "https://comics.example/ch/1/",
            r#"<div class="pages"><img src="p1.png"><img src="//cdn.example/p2.png"></div>"#,
        ));
        let engine = RuleEngine::new(fetcher, EngineConfig::default());

        let content = chapter_content(
            &engine,
            testing::source_from(json),
            None,
            &chapter("https://comics.example/ch/1/"),
            None,
        )
        .await
        .unwrap();

        assert_eq!(content.kind, ContentKind::Image);
        assert_eq!(
            content.units,
            vec!["https://comics.example/ch/1/p1.png", "https://cdn.example/p2.png"]
        );
    }

    #[tokio::test]
    async fn test_empty_content_is_parse_error() {
        let fetcher = Arc::new(FakeFetcher::new().page(
            "https://books.example/c/1",
            r#"<div id="content"><p>   </p></div>"#,
        ));
        let engine = RuleEngine::new(fetcher, EngineConfig::default());

        let err = chapter_content(
            &engine,
            testing::source(),
            None,
            &chapter("https://books.example/c/1"),
            None,
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Parse);
        assert_eq!(err.context.field_path.as_deref(), Some("content.content"));
    }
}
