//! Field extraction shared by the book modules.

use async_trait::async_trait;

use crate::engine::context::RuleContext;
use crate::engine::eval::RuleEngine;
use crate::engine::expr::Mode;
use crate::engine::paginate::{PageParser, Pagination};
use crate::engine::post::absolutize;
use crate::engine::source::BookFields;
use crate::error::{RuleError, RuleResult};

use super::types::Book;

/**
    Parse every expression a module will run, so a malformed rule fails
    before anything is fetched.
*/
pub(crate) fn precompile<'a>(
    engine: &RuleEngine,
    mode: Mode,
    module: &str,
    exprs: impl IntoIterator<Item = &'a str>,
) -> RuleResult<()> {
    for raw in exprs {
        engine
            .compile(raw, mode)
            .map_err(|e| e.with_module(module))?;
    }
    Ok(())
}

pub(crate) fn pagination_exprs(pagination: Option<&Pagination>) -> Vec<&str> {
    let mut exprs = Vec::new();
    if let Some(Pagination::NextUrl { next_url, .. }) = pagination {
        exprs.push(next_url.as_str());
    }
    if let Some(url_equals) = pagination.and_then(|p| p.stop().url_equals.as_deref()) {
        exprs.push(url_equals);
    }
    exprs
}

pub(crate) fn book_exprs(fields: &BookFields) -> impl Iterator<Item = &str> {
    [
        &fields.name,
        &fields.url,
        &fields.author,
        &fields.cover,
        &fields.description,
        &fields.latest_chapter,
        &fields.word_count,
        &fields.tags,
        &fields.status,
        &fields.update_time,
    ]
    .into_iter()
    .filter_map(|f| f.as_deref())
}

/// Evaluate a field that must produce a value.
pub(crate) async fn required(
    engine: &RuleEngine,
    raw: &str,
    mode: Mode,
    ctx: &mut RuleContext,
    path: &str,
) -> RuleResult<String> {
    match engine.eval_string(raw, mode, ctx).await {
        Ok(Some(value)) => Ok(value),
        Ok(None) => Err(RuleError::parse(format!("required field `{}` is empty", path))
            .with_field(path)
            .with_expr(raw)
            .with_url(&ctx.base_url)),
        Err(e) => Err(e.with_field(path).with_url(&ctx.base_url)),
    }
}

/// Evaluate a field that may be missing. Failures leave it absent.
pub(crate) async fn optional(
    engine: &RuleEngine,
    raw: Option<&str>,
    mode: Mode,
    ctx: &mut RuleContext,
    path: &str,
) -> Option<String> {
    let raw = raw?;
    match engine.eval_string(raw, mode, ctx).await {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!(source = %ctx.source.id, field = path, error = %e, "optional field failed");
            None
        }
    }
}

async fn optional_list(
    engine: &RuleEngine,
    raw: Option<&str>,
    mode: Mode,
    ctx: &mut RuleContext,
    path: &str,
) -> Vec<String> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    match engine.eval_strings(raw, mode, ctx).await {
        Ok(values) => values,
        Err(e) => {
            tracing::debug!(source = %ctx.source.id, field = path, error = %e, "optional field failed");
            Vec::new()
        }
    }
}

/**
    Fill the optional fields of `book` from the current scope. Fields that
    come back empty keep whatever `book` already had.
*/
pub(crate) async fn fill_book(
    engine: &RuleEngine,
    fields: &BookFields,
    mode: Mode,
    ctx: &mut RuleContext,
    prefix: &str,
    book: &mut Book,
) {
    let path = |field: &str| format!("{}.{}", prefix, field);

    if let Some(author) = optional(engine, fields.author.as_deref(), mode, ctx, &path("author")).await {
        book.author = Some(author);
    }
    if let Some(cover) = optional(engine, fields.cover.as_deref(), mode, ctx, &path("cover")).await {
        book.cover = Some(absolutize(&ctx.base_url, &cover));
    }
    if let Some(description) =
        optional(engine, fields.description.as_deref(), mode, ctx, &path("description")).await
    {
        book.description = Some(description);
    }
    if let Some(latest) =
        optional(engine, fields.latest_chapter.as_deref(), mode, ctx, &path("latestChapter")).await
    {
        book.latest_chapter = Some(latest);
    }
    if let Some(count) =
        optional(engine, fields.word_count.as_deref(), mode, ctx, &path("wordCount")).await
    {
        book.word_count = Some(count);
    }
    let tags = optional_list(engine, fields.tags.as_deref(), mode, ctx, &path("tags")).await;
    if !tags.is_empty() {
        book.tags = tags;
    }
    if let Some(status) = optional(engine, fields.status.as_deref(), mode, ctx, &path("status")).await {
        book.status = Some(status);
    }
    if let Some(time) =
        optional(engine, fields.update_time.as_deref(), mode, ctx, &path("updateTime")).await
    {
        book.update_time = Some(time);
    }
}

/**
    Parses a page of book items: partition by `list`, then extract each
    item's fields with the item as scope.
*/
pub(crate) struct BookListPage<'a> {
    pub module: &'static str,
    pub list: &'a str,
    pub fields: &'a BookFields,
    pub mode: Mode,
}

#[async_trait]
impl PageParser for BookListPage<'_> {
    type Item = Book;

    async fn parse_page(&self, engine: &RuleEngine, ctx: &mut RuleContext) -> RuleResult<Vec<Book>> {
        let scopes = engine
            .eval_scopes(self.list, self.mode, ctx)
            .await
            .map_err(|e| e.with_field(format!("{}.list", self.module)))?;

        let page_scope = ctx.scope.clone();
        let mut books = Vec::with_capacity(scopes.len());

        for (i, scope) in scopes.into_iter().enumerate() {
            ctx.scope = scope;
            let prefix = format!("{}[{}]", self.module, i);
            let book = self.item(engine, ctx, &prefix).await;
            ctx.scope = page_scope.clone();
            books.push(book?);
        }

        tracing::debug!(source = %ctx.source.id, module = self.module, page = ctx.page, count = books.len(), "items parsed");
        Ok(books)
    }
}

impl BookListPage<'_> {
    async fn item(&self, engine: &RuleEngine, ctx: &mut RuleContext, prefix: &str) -> RuleResult<Book> {
        let (Some(name_expr), Some(url_expr)) = (&self.fields.name, &self.fields.url) else {
            return Err(RuleError::invalid_source(format!(
                "`{}` needs `name` and `url`",
                self.module
            )));
        };

        let name = required(engine, name_expr, self.mode, ctx, &format!("{}.name", prefix)).await?;
        let url = required(engine, url_expr, self.mode, ctx, &format!("{}.url", prefix)).await?;

        let mut book = Book {
            source_id: ctx.source.id.clone(),
            name,
            url: absolutize(&ctx.base_url, &url),
            ..Book::default()
        };
        fill_book(engine, self.fields, self.mode, ctx, prefix, &mut book).await;

        Ok(book)
    }
}
