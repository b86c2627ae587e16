use std::sync::Arc;

use crate::engine::context::RuleContext;
use crate::engine::eval::RuleEngine;
use crate::engine::post::absolutize;
use crate::engine::request::RequestConfig;
use crate::engine::source::Source;
use crate::error::RuleResult;

use super::fields::{book_exprs, fill_book, optional, precompile};
use super::types::Book;

/**
    Load the book's detail page and fill in what it declares. Without a
    detail module the book is returned unchanged.

    Detail fields are all optional: a value found on the page replaces the
    one from the search result, an empty one keeps it.
*/
pub async fn book_detail(engine: &RuleEngine, source: Arc<Source>, book: Book) -> RuleResult<Book> {
    let Some(rule) = source.detail.as_ref() else {
        return Ok(book);
    };

    let request = rule
        .request
        .clone()
        .unwrap_or_else(|| RequestConfig::get("{{bookUrl}}"));
    let mode = request.mode();
    let source_id = source.id.clone();

    precompile(
        engine,
        mode,
        "detail",
        book_exprs(&rule.fields).chain(rule.chapter_url.as_deref()),
    )
    .map_err(|e| e.with_source_id(&source_id))?;

    let mut ctx = RuleContext::new(source.clone()).with_book(book.clone());
    engine
        .load_page(&request, &mut ctx)
        .await
        .map_err(|e| e.with_module("detail").with_source_id(&source_id))?;

    let mut detailed = book;

    if let Some(name) = optional(engine, rule.fields.name.as_deref(), mode, &mut ctx, "detail.name").await {
        detailed.name = name;
    }
    if let Some(url) = optional(engine, rule.fields.url.as_deref(), mode, &mut ctx, "detail.url").await {
        detailed.url = absolutize(&ctx.base_url, &url);
    }

    fill_book(engine, &rule.fields, mode, &mut ctx, "detail", &mut detailed).await;

    if let Some(toc) =
        optional(engine, rule.chapter_url.as_deref(), mode, &mut ctx, "detail.chapterUrl").await
    {
        detailed.chapter_url = Some(absolutize(&ctx.base_url, &toc));
    }

    tracing::info!(source = %source_id, book = %detailed.name, "detail loaded");
    Ok(detailed)
}
