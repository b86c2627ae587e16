use std::sync::Arc;

use crate::engine::context::RuleContext;
use crate::engine::eval::RuleEngine;
use crate::engine::source::Source;
use crate::error::RuleResult;

use super::fields::{BookListPage, book_exprs, pagination_exprs, precompile};
use super::types::Book;

/**
    Search `source` for `keyword`, starting at `page`.
*/
pub async fn search(
    engine: &RuleEngine,
    source: Arc<Source>,
    keyword: &str,
    page: i64,
) -> RuleResult<Vec<Book>> {
    let rule = &source.search;
    let mode = rule.request.mode();
    let source_id = source.id.clone();

    precompile(
        engine,
        mode,
        "search",
        std::iter::once(rule.list.as_str())
            .chain(book_exprs(&rule.fields))
            .chain(pagination_exprs(rule.pagination.as_ref())),
    )
    .map_err(|e| e.with_source_id(&source_id))?;

    let mut ctx = RuleContext::new(source.clone()).with_keyword(keyword);
    ctx.page = page;
    let pagination = rule.pagination.as_ref().map(|p| p.from_page(page));

    let parser = BookListPage {
        module: "search",
        list: &rule.list,
        fields: &rule.fields,
        mode,
    };

    let books = engine
        .paginate(&rule.request, pagination.as_ref(), &mut ctx, &parser)
        .await
        .map_err(|e| e.with_module("search").with_source_id(&source_id))?;

    tracing::info!(source = %source_id, keyword, count = books.len(), "search finished");
    Ok(books)
}
