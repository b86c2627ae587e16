use std::sync::Arc;

use anyhow::{Result, bail};
use clap::Parser;

use booksource::book::{self, Book, Chapter};
use booksource::engine::{RuleEngine, Source};

use super::GlobalArgs;

#[derive(Parser, Debug)]
pub struct TestSourceCommand {
    /// Source ID (or partial match)
    pub source: String,

    /// Keyword to search for
    pub keyword: String,

    /// Stop after the chapter list
    #[arg(long)]
    pub skip_content: bool,
}

impl TestSourceCommand {
    pub async fn run(self, global: &GlobalArgs) -> Result<()> {
        let source = global.find_source(&self.source)?;
        let runtime = global.runtime()?;

        println!("Testing source: {} ({})", source.name, source.id);

        let outcome = self.phases(&runtime.engine, source.clone()).await;
        runtime.close().await;
        let (book, chapters, content_units) = outcome?;

        println!();
        println!("=== Summary ===");
        println!("  Source:   {} ({})", source.name, source.id);
        println!("  Book:     {}", book.name);
        println!("  Chapters: {}", chapters.len());
        match content_units {
            Some(units) => println!("  Content:  {} unit(s)", units),
            None => println!("  Content:  skipped"),
        }

        Ok(())
    }

    async fn phases(
        &self,
        engine: &RuleEngine,
        source: Arc<Source>,
    ) -> Result<(Book, Vec<Chapter>, Option<usize>)> {
        // --- Search ---
        println!();
        println!("=== Search ===");

        let books = book::search(engine, source.clone(), &self.keyword, 1).await?;
        println!("  Found {} book(s)", books.len());
        for (i, b) in books.iter().take(5).enumerate() {
            println!("  {:>3}. {} ({})", i + 1, b.name, b.url);
        }
        if books.len() > 5 {
            println!("  ... and {} more", books.len() - 5);
        }

        let Some(first) = books.into_iter().next() else {
            bail!("Search for '{}' returned no books", self.keyword);
        };

        // --- Detail ---
        println!();
        println!("=== Detail ===");

        let book = book::book_detail(engine, source.clone(), first).await?;
        println!("  Name:    {}", book.name);
        if let Some(author) = &book.author {
            println!("  Author:  {}", author);
        }
        if let Some(status) = &book.status {
            println!("  Status:  {}", status);
        }
        if !book.tags.is_empty() {
            println!("  Tags:    {}", book.tags.join(", "));
        }
        println!("  TOC:     {}", book.toc_url());

        // --- Chapters ---
        println!();
        println!("=== Chapters ===");

        let chapters = book::chapter_list(engine, source.clone(), &book).await?;
        if chapters.is_empty() {
            bail!("No chapters found for '{}'", book.name);
        }
        println!("  {} chapter(s)", chapters.len());
        for ch in chapters.iter().take(3) {
            println!("  {:>4}. {}", ch.index + 1, ch.name);
        }

        if self.skip_content {
            println!();
            println!("=== Content (skipped) ===");
            return Ok((book, chapters, None));
        }

        // --- Content ---
        println!();
        println!("=== Content ===");

        let next = chapters.get(1).map(|c| c.url.as_str());
        let content = book::chapter_content(engine, source, Some(&book), &chapters[0], next).await?;
        println!("  {} unit(s) ({:?})", content.units.len(), content.kind);
        if let Some(first) = content.units.first() {
            let preview: String = first.chars().take(80).collect();
            println!("  {}", preview);
        }
        let units = content.units.len();

        Ok((book, chapters, Some(units)))
    }
}
