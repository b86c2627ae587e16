use anyhow::Result;
use clap::Parser;

use booksource::book;

use super::GlobalArgs;

#[derive(Parser, Debug)]
pub struct SearchCommand {
    /// Source ID (or partial match)
    pub source: String,

    pub keyword: String,

    /// First page to request
    #[arg(long, default_value = "1")]
    pub page: i64,

    /// Print results as JSON
    #[arg(long)]
    pub json: bool,
}

impl SearchCommand {
    pub async fn run(self, global: &GlobalArgs) -> Result<()> {
        let source = global.find_source(&self.source)?;
        let runtime = global.runtime()?;

        let result = book::search(&runtime.engine, source.clone(), &self.keyword, self.page).await;
        runtime.close().await;
        let books = result?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&books)?);
            return Ok(());
        }

        println!("{} result(s) from {} for '{}':", books.len(), source.name, self.keyword);
        for (i, b) in books.iter().enumerate() {
            println!(
                "  {:>3}. {}{}",
                i + 1,
                b.name,
                b.author
                    .as_deref()
                    .map(|a| format!(" by {}", a))
                    .unwrap_or_default()
            );
            println!("       {}", b.url);
        }
        Ok(())
    }
}
