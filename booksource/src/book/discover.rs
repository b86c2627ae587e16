use std::sync::Arc;

use crate::engine::context::RuleContext;
use crate::engine::eval::RuleEngine;
use crate::engine::post::absolutize;
use crate::engine::source::{Categories, DiscoverRule, Source};
use crate::error::{RuleError, RuleResult};

use super::fields::{BookListPage, book_exprs, pagination_exprs, precompile, required};
use super::types::{Book, Category};

fn discover_rule(source: &Source) -> RuleResult<&DiscoverRule> {
    source.discover.as_ref().ok_or_else(|| {
        RuleError::invalid_source("source has no discover module")
            .with_source_id(&source.id)
            .with_module("discover")
    })
}

/**
    List the source's browsable categories, either as declared or scraped
    from a category page.
*/
pub async fn discover_categories(engine: &RuleEngine, source: Arc<Source>) -> RuleResult<Vec<Category>> {
    let rule = discover_rule(&source)?;
    let source_id = source.id.clone();

    let (request, list, name, url) = match &rule.categories {
        Categories::Static(categories) => {
            let host = &source.host;
            return Ok(categories
                .iter()
                .map(|c| Category {
                    name: c.name.clone(),
                    url: absolutize(host, &c.url),
                })
                .collect());
        }
        Categories::Dynamic {
            request,
            list,
            name,
            url,
        } => (request, list, name, url),
    };

    let mode = request.mode();
    precompile(engine, mode, "discover", [list.as_str(), name.as_str(), url.as_str()])
        .map_err(|e| e.with_source_id(&source_id))?;

    let mut ctx = RuleContext::new(source.clone());
    let with_context = |e: RuleError| e.with_module("discover").with_source_id(&source_id);

    engine.load_page(request, &mut ctx).await.map_err(with_context)?;

    let scopes = engine
        .eval_scopes(list, mode, &mut ctx)
        .await
        .map_err(|e| with_context(e.with_field("categories.list")))?;

    let mut categories = Vec::with_capacity(scopes.len());
    for (i, scope) in scopes.into_iter().enumerate() {
        ctx.scope = scope;
        let name = required(engine, name, mode, &mut ctx, &format!("categories[{}].name", i))
            .await
            .map_err(with_context)?;
        let url = required(engine, url, mode, &mut ctx, &format!("categories[{}].url", i))
            .await
            .map_err(with_context)?;
        categories.push(Category {
            name,
            url: absolutize(&ctx.base_url, &url),
        });
    }

    tracing::info!(source = %source_id, count = categories.len(), "categories loaded");
    Ok(categories)
}

/**
    List the books of one category, starting at `page`.
*/
pub async fn discover(
    engine: &RuleEngine,
    source: Arc<Source>,
    category: &Category,
    page: i64,
) -> RuleResult<Vec<Book>> {
    let rule = discover_rule(&source)?;
    let mode = rule.request.mode();
    let source_id = source.id.clone();

    precompile(
        engine,
        mode,
        "discover",
        std::iter::once(rule.list.as_str())
            .chain(book_exprs(&rule.fields))
            .chain(pagination_exprs(rule.pagination.as_ref())),
    )
    .map_err(|e| e.with_source_id(&source_id))?;

    let mut ctx = RuleContext::new(source.clone())
        .with_param("categoryUrl", category.url.clone())
        .with_param("categoryName", category.name.clone());
    ctx.page = page;
    let pagination = rule.pagination.as_ref().map(|p| p.from_page(page));

    let parser = BookListPage {
        module: "discover",
        list: &rule.list,
        fields: &rule.fields,
        mode,
    };

    let books = engine
        .paginate(&rule.request, pagination.as_ref(), &mut ctx, &parser)
        .await
        .map_err(|e| e.with_module("discover").with_source_id(&source_id))?;

    tracing::info!(source = %source_id, category = %category.name, count = books.len(), "discover finished");
    Ok(books)
}
