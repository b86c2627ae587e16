use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::engine::context::RuleContext;
use crate::engine::eval::RuleEngine;
use crate::engine::expr::Mode;
use crate::engine::paginate::PageParser;
use crate::engine::post::absolutize;
use crate::engine::request::RequestConfig;
use crate::engine::source::{ChapterRule, Source};
use crate::error::RuleResult;

use super::fields::{optional, pagination_exprs, precompile, required};
use super::types::{Book, Chapter};

struct ChapterPage<'a> {
    rule: &'a ChapterRule,
    mode: Mode,
}

#[async_trait]
impl PageParser for ChapterPage<'_> {
    type Item = Chapter;

    async fn parse_page(&self, engine: &RuleEngine, ctx: &mut RuleContext) -> RuleResult<Vec<Chapter>> {
        let scopes = engine
            .eval_scopes(&self.rule.list, self.mode, ctx)
            .await
            .map_err(|e| e.with_field("chapter.list"))?;

        let page_scope = ctx.scope.clone();
        let mut chapters = Vec::with_capacity(scopes.len());

        for (i, scope) in scopes.into_iter().enumerate() {
            ctx.scope = scope;
            let chapter = self.item(engine, ctx, i).await;
            ctx.scope = page_scope.clone();
            chapters.push(chapter?);
        }

        Ok(chapters)
    }
}

impl ChapterPage<'_> {
    async fn item(&self, engine: &RuleEngine, ctx: &mut RuleContext, i: usize) -> RuleResult<Chapter> {
        let name = required(engine, &self.rule.name, self.mode, ctx, &format!("chapter[{}].name", i)).await?;
        let url = required(engine, &self.rule.url, self.mode, ctx, &format!("chapter[{}].url", i)).await?;
        let time = optional(
            engine,
            self.rule.time.as_deref(),
            self.mode,
            ctx,
            &format!("chapter[{}].time", i),
        )
        .await;

        Ok(Chapter {
            name,
            url: absolutize(&ctx.base_url, &url),
            time,
            index: 0,
        })
    }
}

/**
    Load the book's table of contents.

    Chapters come back in reading order with duplicate URLs dropped and
    `index` numbered from zero.
*/
pub async fn chapter_list(engine: &RuleEngine, source: Arc<Source>, book: &Book) -> RuleResult<Vec<Chapter>> {
    let rule = &source.chapter;
    let request = rule
        .request
        .clone()
        .unwrap_or_else(|| RequestConfig::get(book.toc_url()));
    let mode = request.mode();
    let source_id = source.id.clone();

    precompile(
        engine,
        mode,
        "chapter",
        [rule.list.as_str(), rule.name.as_str(), rule.url.as_str()]
            .into_iter()
            .chain(rule.time.as_deref())
            .chain(pagination_exprs(rule.pagination.as_ref())),
    )
    .map_err(|e| e.with_source_id(&source_id))?;

    let mut ctx = RuleContext::new(source.clone()).with_book(book.clone());
    let parser = ChapterPage { rule, mode };

    let found = engine
        .paginate(&request, rule.pagination.as_ref(), &mut ctx, &parser)
        .await
        .map_err(|e| e.with_module("chapter").with_source_id(&source_id))?;

    let total = found.len();
    let mut seen = HashSet::new();
    let mut chapters: Vec<Chapter> = found
        .into_iter()
        .filter(|c| seen.insert(c.url.clone()))
        .collect();

    if rule.reverse {
        chapters.reverse();
    }
    for (index, chapter) in chapters.iter_mut().enumerate() {
        chapter.index = index;
    }

    if chapters.len() < total {
        tracing::debug!(source = %source_id, dropped = total - chapters.len(), "duplicate chapters dropped");
    }
    tracing::info!(source = %source_id, book = %book.name, count = chapters.len(), "chapter list loaded");

    Ok(chapters)
}
